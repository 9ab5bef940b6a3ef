//! Report types for sweep results.
//!
//! Two outputs are produced:
//! - the completed-tasks CSV file, appended one [`TaskRecord`] per finished
//!   task so an interrupted sweep can resume,
//! - one [`BatchReport`] JSON file per codec batch (codec, effort, lossless).

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::{Error, Result};
use crate::stats::Summary;
use crate::task::{Codec, CodecSettings, Quality, TaskInput, TaskOutput};

/// Flat CSV row of a [`TaskOutput`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub image_path: PathBuf,
    pub encoded_path: Option<PathBuf>,
    pub codec: Codec,
    pub quality: Quality,
    pub effort: u8,
    pub image_width: u32,
    pub image_height: u32,
    pub bit_depth: u32,
    pub encoded_size: usize,
    pub encoding_duration: f64,
    pub decoding_duration: f64,
    pub decoding_color_conversion_duration: f64,
}

impl From<&TaskOutput> for TaskRecord {
    fn from(output: &TaskOutput) -> Self {
        let input = &output.task_input;
        Self {
            image_path: input.image_path.clone(),
            encoded_path: input.encoded_path.clone(),
            codec: input.codec_settings.codec,
            quality: input.codec_settings.quality,
            effort: input.codec_settings.effort,
            image_width: output.image_width,
            image_height: output.image_height,
            bit_depth: output.bit_depth,
            encoded_size: output.encoded_size,
            encoding_duration: output.encoding_duration,
            decoding_duration: output.decoding_duration,
            decoding_color_conversion_duration: output.decoding_color_conversion_duration,
        }
    }
}

impl TaskRecord {
    /// Convert back, rejecting qualities outside the codec's quality space.
    pub fn into_output(self) -> Result<TaskOutput> {
        if let Quality::Lossy(quality) = self.quality {
            if !codec::quality_space(self.codec).contains(&quality) {
                return Err(Error::InvalidTask(format!(
                    "quality {quality} is not valid for {} in record of {}",
                    self.codec,
                    self.image_path.display()
                )));
            }
        }
        Ok(TaskOutput {
            task_input: TaskInput {
                image_path: self.image_path,
                encoded_path: self.encoded_path,
                codec_settings: CodecSettings::new(self.codec, self.quality, self.effort),
            },
            image_width: self.image_width,
            image_height: self.image_height,
            bit_depth: self.bit_depth,
            encoded_size: self.encoded_size,
            encoding_duration: self.encoding_duration,
            decoding_duration: self.decoding_duration,
            decoding_color_conversion_duration: self.decoding_color_conversion_duration,
        })
    }
}

/// Appends finished tasks to the completed-tasks file.
///
/// The header is only written when the file is new or empty, so the same
/// file can be extended across runs.
pub struct CompletedTasksWriter {
    writer: csv::Writer<File>,
}

impl CompletedTasksWriter {
    pub fn append(path: &Path) -> Result<Self> {
        let has_content = path.metadata().map(|m| m.len() > 0).unwrap_or(false);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(!has_content)
            .from_writer(file);
        Ok(Self { writer })
    }

    /// Write one record and flush it, so a crash loses at most the tasks in flight.
    pub fn write(&mut self, output: &TaskOutput) -> Result<()> {
        self.writer.serialize(TaskRecord::from(output))?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Read every task of a completed-tasks file.
pub fn read_completed(path: &Path) -> Result<Vec<TaskOutput>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut outputs = Vec::new();
    for record in reader.deserialize::<TaskRecord>() {
        outputs.push(record?.into_output()?);
    }
    log::info!("Loaded {} tasks from {}", outputs.len(), path.display());
    Ok(outputs)
}

/// Measurements of one image at one quality, averaged over repetitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub image: PathBuf,
    pub quality: Quality,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u32,
    pub encoded_size: usize,
    pub bits_per_pixel: f64,
    /// Mean seconds.
    pub encoding_seconds: f64,
    pub decoding_seconds: f64,
    pub color_conversion_seconds: f64,
    /// Number of tasks averaged into this entry.
    pub repetitions: usize,
}

/// Results of one codec configuration across images and qualities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Display name, e.g. "WebP lossless e4".
    pub name: String,
    pub codec: Codec,
    pub codec_version: String,
    pub effort: u8,
    pub lossless: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub entries: Vec<BatchEntry>,
    pub bits_per_pixel: Option<Summary>,
    pub encoding_seconds: Option<Summary>,
    pub decoding_seconds: Option<Summary>,
}

impl BatchReport {
    fn new(codec: Codec, effort: u8, lossless: bool, entries: Vec<BatchEntry>) -> Self {
        let collect = |f: fn(&BatchEntry) -> f64| {
            Summary::compute(&entries.iter().map(f).collect::<Vec<_>>())
        };
        Self {
            name: codec.pretty_name(lossless, effort),
            codec,
            codec_version: codec::codec_version(codec),
            effort,
            lossless,
            timestamp: chrono::Utc::now(),
            bits_per_pixel: collect(|e| e.bits_per_pixel),
            encoding_seconds: collect(|e| e.encoding_seconds),
            decoding_seconds: collect(|e| e.decoding_seconds),
            entries,
        }
    }

    /// `<codec>_<effort>[_lossless].json`, effort zero-padded to two digits.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{:02}{}.json",
            self.codec,
            self.effort,
            if self.lossless { "_lossless" } else { "" }
        )
    }

    /// Write the report as pretty JSON into `dir`, returning the file path.
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}

/// Group outputs by codec configuration, then aggregate by image and quality.
///
/// Repeated tasks must agree on dimensions and encoded size; their timings
/// are averaged.
pub fn split_into_batches(outputs: &[TaskOutput]) -> Result<Vec<BatchReport>> {
    type Key = (Codec, u8, bool);
    let mut batches: BTreeMap<Key, BTreeMap<(PathBuf, Quality), Vec<&TaskOutput>>> =
        BTreeMap::new();
    for output in outputs {
        let settings = &output.task_input.codec_settings;
        batches
            .entry((settings.codec, settings.effort, settings.quality.is_lossless()))
            .or_default()
            .entry((output.task_input.image_path.clone(), settings.quality))
            .or_default()
            .push(output);
    }

    batches
        .into_iter()
        .map(|((codec, effort, lossless), groups)| {
            let entries = groups
                .into_iter()
                .map(|((image, quality), runs)| aggregate(image, quality, &runs))
                .collect::<Result<Vec<_>>>()?;
            Ok(BatchReport::new(codec, effort, lossless, entries))
        })
        .collect()
}

fn aggregate(image: PathBuf, quality: Quality, runs: &[&TaskOutput]) -> Result<BatchEntry> {
    let first = runs[0];
    if let Some(other) = runs.iter().find(|r| {
        (r.image_width, r.image_height, r.encoded_size)
            != (first.image_width, first.image_height, first.encoded_size)
    }) {
        return Err(Error::Sweep(format!(
            "inconsistent results for {} at quality {quality}: {} bytes vs {} bytes",
            image.display(),
            first.encoded_size,
            other.encoded_size
        )));
    }
    let n = runs.len() as f64;
    let mean = |f: fn(&TaskOutput) -> f64| runs.iter().map(|r| f(r)).sum::<f64>() / n;
    Ok(BatchEntry {
        image,
        quality,
        width: first.image_width,
        height: first.image_height,
        bit_depth: first.bit_depth,
        encoded_size: first.encoded_size,
        bits_per_pixel: first.bits_per_pixel(),
        encoding_seconds: mean(|r| r.encoding_duration),
        decoding_seconds: mean(|r| r.decoding_duration),
        color_conversion_seconds: mean(|r| r.decoding_color_conversion_duration),
        repetitions: runs.len(),
    })
}
