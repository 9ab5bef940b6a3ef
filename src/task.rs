//! Task descriptors: what a single benchmark unit encodes and decodes.
//!
//! A [`TaskInput`] names a source image and one [`CodecSettings`]. It is
//! consumed read-only by exactly one encode/decode pair and produces one
//! [`TaskOutput`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Codecs known to the benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// JPEG XL through libjxl.
    JpegXl,
    /// WebP through libwebp.
    WebP,
}

impl Codec {
    /// Every codec, in table order.
    pub const ALL: [Codec; 2] = [Codec::JpegXl, Codec::WebP];

    /// Stable identifier used in file names and task files.
    pub const fn name(self) -> &'static str {
        match self {
            Self::JpegXl => "jpegxl",
            Self::WebP => "webp",
        }
    }

    /// Output file extension.
    pub const fn extension(self) -> &'static str {
        match self {
            Self::JpegXl => "jxl",
            Self::WebP => "webp",
        }
    }

    /// Cargo feature providing the native backend.
    pub const fn backend(self) -> &'static str {
        match self {
            Self::JpegXl => "jpegxl",
            Self::WebP => "webp",
        }
    }

    /// Ordered lossy quality levels the codec accepts.
    ///
    /// The lossless mode is a separate [`Quality::Lossless`] and never appears
    /// here.
    pub fn lossy_qualities(self) -> Vec<u8> {
        match self {
            // 100 maps to distance 0, which is lossless.
            Self::JpegXl => (0..=99).collect(),
            Self::WebP => (0..=100).collect(),
        }
    }

    /// Valid effort levels (libjxl effort, libwebp method).
    pub const fn efforts(self) -> RangeInclusive<u8> {
        match self {
            Self::JpegXl => 1..=10,
            Self::WebP => 0..=6,
        }
    }

    /// Effort used when none is requested.
    pub const fn default_effort(self) -> u8 {
        match self {
            Self::JpegXl => 7,
            Self::WebP => 4,
        }
    }

    /// Label used in reports, e.g. "JPEG XL lossless e7".
    pub fn pretty_name(self, lossless: bool, effort: u8) -> String {
        let base = match self {
            Self::JpegXl => "JPEG XL",
            Self::WebP => "WebP",
        };
        if lossless {
            format!("{base} lossless e{effort}")
        } else {
            format!("{base} e{effort}")
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpegxl" | "jxl" => Ok(Self::JpegXl),
            "webp" => Ok(Self::WebP),
            other => Err(Error::InvalidTask(format!("unknown codec '{other}'"))),
        }
    }
}

/// Requested quality: a lossy level from the codec's quality space, or lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quality {
    Lossy(u8),
    Lossless,
}

impl Quality {
    pub const fn is_lossless(self) -> bool {
        matches!(self, Self::Lossless)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lossy(q) => write!(f, "{q}"),
            Self::Lossless => f.write_str("lossless"),
        }
    }
}

impl FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("lossless") {
            return Ok(Self::Lossless);
        }
        s.parse::<u8>()
            .map(Self::Lossy)
            .map_err(|_| Error::InvalidTask(format!("invalid quality '{s}'")))
    }
}

impl Serialize for Quality {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quality {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Codec configuration of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CodecSettings {
    pub codec: Codec,
    pub quality: Quality,
    /// Codec-defined speed/effort ordinal.
    pub effort: u8,
}

impl CodecSettings {
    pub fn new(codec: Codec, quality: Quality, effort: u8) -> Self {
        Self {
            codec,
            quality,
            effort,
        }
    }

    /// Settings for every quality × effort combination of `codec`.
    pub fn matrix(codec: Codec, qualities: &[Quality], efforts: &[u8]) -> Vec<Self> {
        efforts
            .iter()
            .flat_map(|&effort| {
                qualities
                    .iter()
                    .map(move |&quality| Self::new(codec, quality, effort))
            })
            .collect()
    }
}

impl fmt::Display for CodecSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} e{} q{}", self.codec, self.effort, self.quality)
    }
}

/// One benchmark unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskInput {
    /// Source image. Only used for loading and diagnostics.
    pub image_path: PathBuf,
    /// Where the encoded payload is saved to or loaded from, if anywhere.
    pub encoded_path: Option<PathBuf>,
    pub codec_settings: CodecSettings,
}

impl TaskInput {
    pub fn new(image_path: impl Into<PathBuf>, codec_settings: CodecSettings) -> Self {
        Self {
            image_path: image_path.into(),
            encoded_path: None,
            codec_settings,
        }
    }

    /// Image identifier used in diagnostics.
    pub fn image_name(&self) -> String {
        self.image_path.display().to_string()
    }
}

/// Measurements of a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub task_input: TaskInput,
    pub image_width: u32,
    pub image_height: u32,
    pub bit_depth: u32,
    /// Encoded payload size in bytes.
    pub encoded_size: usize,
    /// Seconds spent in the adapter's encode. Zero when loaded from disk.
    pub encoding_duration: f64,
    /// Seconds spent in the adapter's decode.
    pub decoding_duration: f64,
    /// Seconds of the decoder's post-processing sub-phase, part of `decoding_duration`.
    pub decoding_color_conversion_duration: f64,
}

impl TaskOutput {
    /// Encoded bits per source pixel.
    pub fn bits_per_pixel(&self) -> f64 {
        let pixels = f64::from(self.image_width) * f64::from(self.image_height);
        if pixels == 0.0 {
            0.0
        } else {
            self.encoded_size as f64 * 8.0 / pixels
        }
    }
}

/// Build the task matrix: every image with every codec setting.
///
/// When `encoded_dir` is set, each task gets a deterministic encoded path
/// inside it. Distinct images never share an encoded path.
pub fn plan_tasks(
    image_paths: &[PathBuf],
    settings: &[CodecSettings],
    encoded_dir: Option<&Path>,
) -> Vec<TaskInput> {
    let names = encoded_names(image_paths);
    let mut tasks = Vec::with_capacity(image_paths.len() * settings.len());
    for codec_settings in settings {
        for image_path in image_paths {
            let mut task = TaskInput::new(image_path.clone(), *codec_settings);
            task.encoded_path = encoded_dir.map(|dir| {
                let name = names.get(image_path).map_or("image", String::as_str);
                encoded_path(dir, name, codec_settings)
            });
            tasks.push(task);
        }
    }
    tasks
}

/// `<dir>/<name>_<codec>_e<effort>_q<quality>.<ext>`
pub fn encoded_path(dir: &Path, name: &str, settings: &CodecSettings) -> PathBuf {
    dir.join(format!(
        "{name}_{}_e{}_q{}.{}",
        settings.codec,
        settings.effort,
        settings.quality,
        settings.codec.extension()
    ))
}

/// File name prefix of every image's encoded payloads.
///
/// The file stem, unless another image shares it: then the whole path with
/// separators replaced by `_`, plus a counter if even that collides.
fn encoded_names(image_paths: &[PathBuf]) -> HashMap<&PathBuf, String> {
    let stem = |path: &Path| {
        path.file_stem()
            .map_or_else(|| "image".to_string(), |s| s.to_string_lossy().into_owned())
    };
    let mut images_per_stem: HashMap<String, HashSet<&PathBuf>> = HashMap::new();
    for path in image_paths {
        images_per_stem.entry(stem(path)).or_default().insert(path);
    }

    let mut names = HashMap::new();
    let mut taken = HashSet::new();
    for path in image_paths {
        if names.contains_key(path) {
            continue;
        }
        let base = stem(path);
        let base = if images_per_stem[&base].len() > 1 {
            flattened(path)
        } else {
            base
        };
        let mut name = base.clone();
        let mut n = 1;
        while !taken.insert(name.clone()) {
            n += 1;
            name = format!("{base}_{n}");
        }
        names.insert(path, name);
    }
    names
}

/// `set1/photo.png` becomes `set1_photo`.
fn flattened(path: &Path) -> String {
    let parts: Vec<String> = path
        .with_extension("")
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("up".to_string()),
            _ => None,
        })
        .collect();
    parts.join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_space_excludes_lossless() {
        for codec in Codec::ALL {
            let qualities = codec.lossy_qualities();
            assert!(!qualities.is_empty());
            assert!(qualities.windows(2).all(|w| w[0] < w[1]));
        }
        assert_eq!(Codec::JpegXl.lossy_qualities().last(), Some(&99));
    }

    #[test]
    fn test_quality_parse_and_display() {
        assert_eq!("lossless".parse::<Quality>().unwrap(), Quality::Lossless);
        assert_eq!("LOSSLESS".parse::<Quality>().unwrap(), Quality::Lossless);
        assert_eq!(" 75 ".parse::<Quality>().unwrap(), Quality::Lossy(75));
        assert!("300".parse::<Quality>().is_err());
        assert_eq!(Quality::Lossy(9).to_string(), "9");
        assert_eq!(Quality::Lossless.to_string(), "lossless");
        assert!(Quality::Lossy(100) < Quality::Lossless);
    }

    #[test]
    fn test_quality_json() {
        let settings = CodecSettings::new(Codec::WebP, Quality::Lossless, 4);
        let json = serde_json::to_string(&settings).unwrap();
        assert_eq!(json, r#"{"codec":"webp","quality":"lossless","effort":4}"#);
        let back: CodecSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn test_settings_display() {
        let settings = CodecSettings::new(Codec::JpegXl, Quality::Lossless, 7);
        assert_eq!(settings.to_string(), "jpegxl e7 qlossless");
    }

    #[test]
    fn test_codec_parse() {
        assert_eq!("jxl".parse::<Codec>().unwrap(), Codec::JpegXl);
        assert_eq!("WebP".parse::<Codec>().unwrap(), Codec::WebP);
        assert!("avif".parse::<Codec>().is_err());
    }

    #[test]
    fn test_plan_tasks() {
        let images = vec![PathBuf::from("a/one.png"), PathBuf::from("b/two.png")];
        let settings = CodecSettings::matrix(
            Codec::WebP,
            &[Quality::Lossy(50), Quality::Lossless],
            &[4, 6],
        );
        assert_eq!(settings.len(), 4);

        let tasks = plan_tasks(&images, &settings, Some(Path::new("out")));
        assert_eq!(tasks.len(), 8);
        assert_eq!(
            tasks[1].encoded_path.as_deref(),
            Some(Path::new("out/two_webp_e4_q50.webp"))
        );
        assert_eq!(
            tasks[3].encoded_path.as_deref(),
            Some(Path::new("out/two_webp_e4_qlossless.webp"))
        );
        assert!(plan_tasks(&images, &settings, None)
            .iter()
            .all(|t| t.encoded_path.is_none()));
    }

    #[test]
    fn test_same_stem_in_different_directories() {
        let images = vec![
            PathBuf::from("set1/photo.png"),
            PathBuf::from("set2/photo.png"),
            PathBuf::from("set2/other.png"),
        ];
        let settings = [CodecSettings::new(Codec::WebP, Quality::Lossy(50), 4)];
        let tasks = plan_tasks(&images, &settings, Some(Path::new("out")));
        let paths: Vec<_> = tasks
            .iter()
            .map(|t| t.encoded_path.clone().unwrap())
            .collect();
        assert_eq!(
            paths,
            [
                PathBuf::from("out/set1_photo_webp_e4_q50.webp"),
                PathBuf::from("out/set2_photo_webp_e4_q50.webp"),
                PathBuf::from("out/other_webp_e4_q50.webp"),
            ]
        );
    }

    #[test]
    fn test_flattened_names_stay_unique() {
        let images = vec![
            PathBuf::from("a_b/c.png"),
            PathBuf::from("a/b_c.png"),
            PathBuf::from("a/b_c.png"),
            PathBuf::from("c.png"),
        ];
        let names = encoded_names(&images);
        assert_eq!(names.len(), 3);
        assert_eq!(names[&images[0]], "a_b_c");
        assert_eq!(names[&images[1]], "b_c");
        assert_eq!(names[&images[3]], "c");

        let clash = vec![PathBuf::from("a_b/c.png"), PathBuf::from("a/b/c.png")];
        let names = encoded_names(&clash);
        assert_eq!(names[&clash[0]], "a_b_c");
        assert_eq!(names[&clash[1]], "a_b_c_2");
    }

    #[test]
    fn test_bits_per_pixel() {
        let output = TaskOutput {
            task_input: TaskInput::new(
                "x.png",
                CodecSettings::new(Codec::WebP, Quality::Lossy(80), 4),
            ),
            image_width: 4,
            image_height: 2,
            bit_depth: 8,
            encoded_size: 16,
            encoding_duration: 0.0,
            decoding_duration: 0.0,
            decoding_color_conversion_duration: 0.0,
        };
        assert_eq!(output.bits_per_pixel(), 16.0);
    }
}
