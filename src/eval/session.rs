//! Sweep session: runs a planned task matrix on a worker pool.
//!
//! [`SweepSession`] is the main entry point for benchmarking. It resumes from
//! a completed-tasks file, schedules the remaining tasks in order or shuffled,
//! enforces a failure budget, reports progress, and writes per-batch JSON
//! results.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::{Error, Result};
use crate::eval::report::{self, BatchReport, CompletedTasksWriter};
use crate::eval::runner::{self, EncodeMode};
use crate::image::ImageBuffer;
use crate::task::{CodecSettings, TaskInput, TaskOutput};
use crate::timer::{Timer, format_seconds};

/// Seconds between two progress lines.
const PROGRESS_INTERVAL: f64 = 30.0;

/// Source image loader.
///
/// Called once per task, from worker threads.
pub type LoadFn = Box<dyn Fn(&Path) -> Result<ImageBuffer> + Send + Sync>;

/// Configuration for a sweep.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Suppress per-failure diagnostics and progress lines.
    pub quiet: bool,

    /// Worker threads in addition to the first one.
    pub extra_threads: usize,

    /// Abort once failures exceed `round(num_tasks * ratio)`.
    pub abort_above_fail_ratio: f64,

    /// Shuffle the remaining tasks instead of running them in plan order.
    pub random_order: bool,

    /// Shuffle seed. A fresh one is drawn when unset.
    pub seed: Option<u64>,

    /// CSV file of finished tasks, read on start and appended while running.
    pub completed_tasks_file: Option<PathBuf>,

    /// Directory receiving one JSON report per batch.
    pub results_dir: Option<PathBuf>,

    /// Decode payloads saved by an earlier run instead of encoding.
    pub load_encoded_from_disk: bool,

    /// Only aggregate the completed-tasks file, run nothing.
    pub skip_all_remaining: bool,
}

impl SweepConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> SweepConfigBuilder {
        SweepConfigBuilder::default()
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`SweepConfig`].
#[derive(Debug, Default)]
pub struct SweepConfigBuilder {
    quiet: Option<bool>,
    extra_threads: Option<usize>,
    abort_above_fail_ratio: Option<f64>,
    random_order: Option<bool>,
    seed: Option<u64>,
    completed_tasks_file: Option<PathBuf>,
    results_dir: Option<PathBuf>,
    load_encoded_from_disk: Option<bool>,
    skip_all_remaining: Option<bool>,
}

impl SweepConfigBuilder {
    #[must_use]
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = Some(quiet);
        self
    }

    #[must_use]
    pub fn extra_threads(mut self, threads: usize) -> Self {
        self.extra_threads = Some(threads);
        self
    }

    /// Fraction of tasks allowed to fail before the sweep aborts.
    #[must_use]
    pub fn abort_above_fail_ratio(mut self, ratio: f64) -> Self {
        self.abort_above_fail_ratio = Some(ratio);
        self
    }

    #[must_use]
    pub fn random_order(mut self, random: bool) -> Self {
        self.random_order = Some(random);
        self
    }

    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn completed_tasks_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.completed_tasks_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn results_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_dir = Some(path.into());
        self
    }

    #[must_use]
    pub fn load_encoded_from_disk(mut self, load: bool) -> Self {
        self.load_encoded_from_disk = Some(load);
        self
    }

    #[must_use]
    pub fn skip_all_remaining(mut self, skip: bool) -> Self {
        self.skip_all_remaining = Some(skip);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> SweepConfig {
        SweepConfig {
            quiet: self.quiet.unwrap_or(true),
            extra_threads: self.extra_threads.unwrap_or(0),
            abort_above_fail_ratio: self.abort_above_fail_ratio.unwrap_or(0.0),
            random_order: self.random_order.unwrap_or(false),
            seed: self.seed,
            completed_tasks_file: self.completed_tasks_file,
            results_dir: self.results_dir,
            load_encoded_from_disk: self.load_encoded_from_disk.unwrap_or(false),
            skip_all_remaining: self.skip_all_remaining.unwrap_or(false),
        }
    }
}

/// Outcome of [`SweepSession::run`].
#[derive(Debug)]
pub struct SweepSummary {
    /// Loaded and newly completed tasks.
    pub outputs: Vec<TaskOutput>,
    /// Tasks read from the completed-tasks file.
    pub loaded: usize,
    pub completed_since_start: usize,
    pub failures: usize,
    /// Tasks dropped by `skip_all_remaining`.
    pub skipped: usize,
    pub batches: Vec<BatchReport>,
    pub elapsed_seconds: f64,
}

impl SweepSummary {
    /// The only task of a one-task sweep.
    pub fn single_result(&self) -> Option<&TaskOutput> {
        match self.outputs.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

/// Mutable sweep state shared by the workers.
struct SweepState {
    outputs: Vec<TaskOutput>,
    written_files: HashSet<PathBuf>,
    writer: Option<CompletedTasksWriter>,
    first_failure: Option<Error>,
    write_error: Option<Error>,
    aborted: bool,
    /// Tasks handed out, which is also the index of the next one.
    started: usize,
    finished: usize,
    failures: usize,
    completed_since_start: usize,
    last_progress: Timer,
}

fn lock(state: &Mutex<SweepState>) -> MutexGuard<'_, SweepState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sweep over a planned task matrix.
///
/// # Example
///
/// ```rust,ignore
/// use codec_bench::{SweepConfig, SweepSession, plan_tasks};
///
/// let config = SweepConfig::builder()
///     .extra_threads(7)
///     .completed_tasks_file("completed.csv")
///     .results_dir("results")
///     .build();
///
/// let session = SweepSession::new(config, Box::new(load_png));
/// let summary = session.run(plan_tasks(&images, &settings, None))?;
/// ```
pub struct SweepSession {
    config: SweepConfig,
    load: LoadFn,
}

impl fmt::Debug for SweepSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SweepSession")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SweepSession {
    #[must_use]
    pub fn new(config: SweepConfig, load: LoadFn) -> Self {
        Self { config, load }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Run every planned task that is not already in the completed-tasks file.
    ///
    /// Returns the first task failure when the failure budget was exceeded or
    /// when no task completed during this run.
    pub fn run(&self, planned: Vec<TaskInput>) -> Result<SweepSummary> {
        let timer = Timer::new();
        let config = &self.config;

        let completed = match &config.completed_tasks_file {
            Some(path) if path.exists() => report::read_completed(path)?,
            _ => Vec::new(),
        };
        let mut remaining = remove_completed(planned, &completed)?;
        let loaded = completed.len();

        if config.random_order {
            let mut rng = match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            remaining.shuffle(&mut rng);
        }

        let num_tasks = loaded + remaining.len();
        let max_failures = failure_budget(num_tasks, config.abort_above_fail_ratio);

        let mut skipped = 0;
        if config.skip_all_remaining {
            skipped = remaining.len();
            remaining.clear();
            log::info!("Skipping {skipped} tasks");
            if loaded == 0 {
                return Err(Error::Sweep(
                    "no task loaded, remove skip_all_remaining".to_string(),
                ));
            }
        }

        let writer = config
            .completed_tasks_file
            .as_deref()
            .map(CompletedTasksWriter::append)
            .transpose()?;
        let state = Mutex::new(SweepState {
            outputs: Vec::with_capacity(remaining.len()),
            written_files: HashSet::new(),
            writer,
            first_failure: None,
            write_error: None,
            aborted: false,
            started: 0,
            finished: 0,
            failures: 0,
            completed_since_start: 0,
            last_progress: Timer::new(),
        });

        log::info!("Starting {} tasks", remaining.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1 + config.extra_threads)
            .build()
            .map_err(|e| Error::Sweep(format!("cannot start worker pool: {e}")))?;
        // Workers pull tasks in order from the shared state until it runs dry or aborts.
        pool.broadcast(|_| {
            while let Some((task, mode)) = self.next_task(&remaining, &state) {
                self.run_task(task, mode, &state, max_failures, remaining.len(), &timer);
            }
        });

        let state = state.into_inner().unwrap_or_else(PoisonError::into_inner);
        if let Some(error) = state.write_error {
            return Err(error);
        }
        if state.failures > max_failures {
            log::error!(
                "Aborted after {} failures (budget {max_failures} of {num_tasks} tasks)",
                state.failures
            );
        }
        if state.failures > max_failures || state.completed_since_start == 0 {
            if let Some(error) = state.first_failure {
                return Err(error);
            }
        }

        let mut outputs = completed;
        outputs.extend(state.outputs);
        let batches = report::split_into_batches(&outputs)?;
        if let Some(dir) = &config.results_dir {
            for batch in &batches {
                let path = batch.write_json(dir)?;
                log::info!("Wrote {} to {}", batch.name, path.display());
            }
        } else if outputs.len() > 1 {
            log::warn!("No JSON results directory specified");
        }

        let elapsed_seconds = timer.seconds();
        log::info!("Took {}", format_seconds(elapsed_seconds));
        if state.failures > 0 {
            log::warn!("/!\\ Warning: {} failures", state.failures);
        }

        Ok(SweepSummary {
            outputs,
            loaded,
            completed_since_start: state.completed_since_start,
            failures: state.failures,
            skipped,
            batches,
            elapsed_seconds,
        })
    }

    fn next_task<'t>(
        &self,
        tasks: &'t [TaskInput],
        state: &Mutex<SweepState>,
    ) -> Option<(&'t TaskInput, EncodeMode)> {
        let mut guard = lock(state);
        if guard.aborted {
            return None;
        }
        let task = tasks.get(guard.started)?;
        guard.started += 1;
        let mode = self.encode_mode(task, &mut guard.written_files);
        Some((task, mode))
    }

    fn run_task(
        &self,
        task: &TaskInput,
        mode: EncodeMode,
        state: &Mutex<SweepState>,
        max_failures: usize,
        scheduled: usize,
        timer: &Timer,
    ) {
        let quiet = self.config.quiet;
        let result = (self.load)(&task.image_path)
            .and_then(|image| runner::encode_decode(task, &image, mode, quiet));

        let mut guard = lock(state);
        let s = &mut *guard;
        match result {
            Ok(output) => {
                if let Some(writer) = s.writer.as_mut() {
                    if let Err(e) = writer.write(&output) {
                        s.write_error.get_or_insert(e);
                        s.aborted = true;
                    }
                }
                s.outputs.push(output);
                s.completed_since_start += 1;
            }
            Err(e) => {
                s.failures += 1;
                if s.failures > max_failures {
                    s.aborted = true;
                } else {
                    log::warn!("Failure: {} {}", task.image_name(), task.codec_settings);
                }
                s.first_failure.get_or_insert(e);
            }
        }
        s.finished += 1;

        if !quiet && s.last_progress.seconds() >= PROGRESS_INTERVAL {
            s.last_progress = Timer::new();
            let in_flight = s.started - s.finished;
            log::info!(
                "{}",
                progress_line(s.finished, in_flight, scheduled, timer.seconds())
            );
        }
    }

    /// Payloads are saved on the first occurrence of an encoded path only.
    fn encode_mode(&self, task: &TaskInput, written: &mut HashSet<PathBuf>) -> EncodeMode {
        if self.config.load_encoded_from_disk {
            return EncodeMode::LoadFromDisk;
        }
        match &task.encoded_path {
            Some(path) if written.insert(path.clone()) => EncodeMode::EncodeAndSave,
            _ => EncodeMode::Encode,
        }
    }
}

/// Number of failures tolerated before a sweep of `num_tasks` aborts.
pub fn failure_budget(num_tasks: usize, ratio: f64) -> usize {
    (num_tasks as f64 * ratio).round().max(0.0) as usize
}

/// Drop planned tasks already present in `completed`, keeping plan order.
///
/// Tasks match on image path and codec settings. Duplicates are matched one
/// to one. Every completed task must match a planned one.
pub fn remove_completed(
    planned: Vec<TaskInput>,
    completed: &[TaskOutput],
) -> Result<Vec<TaskInput>> {
    if completed.len() > planned.len() {
        return Err(Error::Sweep(format!(
            "there are {} completed tasks but only {} were planned",
            completed.len(),
            planned.len()
        )));
    }

    let mut pending: HashMap<(PathBuf, CodecSettings), usize> = HashMap::new();
    for output in completed {
        let input = &output.task_input;
        *pending
            .entry((input.image_path.clone(), input.codec_settings))
            .or_default() += 1;
    }

    let mut remaining = Vec::with_capacity(planned.len() - completed.len());
    for task in planned {
        match pending.get_mut(&(task.image_path.clone(), task.codec_settings)) {
            Some(count) if *count > 0 => *count -= 1,
            _ => remaining.push(task),
        }
    }

    let mut unmatched: Vec<String> = pending
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|((path, settings), _)| format!("{} {settings}", path.display()))
        .collect();
    if !unmatched.is_empty() {
        unmatched.sort();
        return Err(Error::Sweep(format!(
            "completed tasks do not match the plan: {}",
            unmatched.join(", ")
        )));
    }
    Ok(remaining)
}

/// Progress with in-flight tasks counted as half done, and the estimated time left.
fn progress_line(finished: usize, in_flight: usize, total: usize, elapsed: f64) -> String {
    let done = finished as f64 + in_flight as f64 / 2.0;
    let left = if done > 0.0 {
        elapsed / done * (total as f64 - done)
    } else {
        0.0
    };
    format!(
        "{done}/{total} ({} elapsed, ~{} left)",
        format_seconds(elapsed),
        format_seconds(left)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::report::tests::output;
    use crate::task::{Codec, Quality};
    use std::sync::Arc;

    fn planned(images: &[&str], qualities: &[Quality]) -> Vec<TaskInput> {
        let settings: Vec<CodecSettings> = qualities
            .iter()
            .map(|q| CodecSettings::new(Codec::WebP, *q, 4))
            .collect();
        let paths: Vec<PathBuf> = images.iter().map(PathBuf::from).collect();
        crate::task::plan_tasks(&paths, &settings, None)
    }

    fn failing_loader() -> LoadFn {
        Box::new(|path| {
            Err(Error::ImageLoad {
                path: path.to_path_buf(),
                reason: "unreadable".to_string(),
            })
        })
    }

    #[test]
    fn test_builder_defaults() {
        let config = SweepConfig::default();
        assert!(config.quiet);
        assert_eq!(config.extra_threads, 0);
        assert_eq!(config.abort_above_fail_ratio, 0.0);
        assert!(!config.random_order);
        assert!(config.completed_tasks_file.is_none());

        let config = SweepConfig::builder().quiet(false).extra_threads(3).seed(9).build();
        assert!(!config.quiet);
        assert_eq!(config.extra_threads, 3);
        assert_eq!(config.seed, Some(9));
    }

    #[test]
    fn test_failure_budget_rounds() {
        assert_eq!(failure_budget(10, 0.0), 0);
        assert_eq!(failure_budget(10, 0.25), 3);
        assert_eq!(failure_budget(10, 0.24), 2);
        assert_eq!(failure_budget(3, 1.0), 3);
    }

    #[test]
    fn test_remove_completed_keeps_plan_order() {
        let plan = planned(&["a.png", "b.png", "c.png"], &[Quality::Lossy(50)]);
        let done = vec![output("b.png", Codec::WebP, Quality::Lossy(50), 10)];
        let remaining = remove_completed(plan, &done).unwrap();
        let names: Vec<String> = remaining.iter().map(TaskInput::image_name).collect();
        assert_eq!(names, ["a.png", "c.png"]);
    }

    #[test]
    fn test_remove_completed_matches_duplicates_once() {
        let mut plan = planned(&["a.png"], &[Quality::Lossy(50)]);
        plan.extend(plan.clone());
        let done = vec![output("a.png", Codec::WebP, Quality::Lossy(50), 10)];
        assert_eq!(remove_completed(plan, &done).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_completed_rejects_unknown_task() {
        let plan = planned(&["a.png", "b.png"], &[Quality::Lossy(50)]);
        let done = vec![output("z.png", Codec::WebP, Quality::Lossy(50), 10)];
        let err = remove_completed(plan, &done).unwrap_err().to_string();
        assert!(err.contains("z.png webp e4 q50"), "{err}");
    }

    #[test]
    fn test_remove_completed_rejects_oversized_file() {
        let plan = planned(&["a.png"], &[Quality::Lossy(50)]);
        let done = vec![
            output("a.png", Codec::WebP, Quality::Lossy(50), 10),
            output("a.png", Codec::WebP, Quality::Lossy(50), 10),
        ];
        assert!(matches!(remove_completed(plan, &done), Err(Error::Sweep(_))));
    }

    #[test]
    fn test_progress_line_counts_in_flight_as_half() {
        assert_eq!(progress_line(1, 2, 4, 2.0), "2/4 (2.00s elapsed, ~2.00s left)");
        assert_eq!(progress_line(0, 0, 4, 0.5), "0/4 (500.0ms elapsed, ~0.0ms left)");
    }

    #[test]
    fn test_encode_mode_saves_first_occurrence_only() {
        let session = SweepSession::new(SweepConfig::default(), failing_loader());
        let mut task = planned(&["a.png"], &[Quality::Lossless]).remove(0);
        let mut written = HashSet::new();
        assert_eq!(session.encode_mode(&task, &mut written), EncodeMode::Encode);
        task.encoded_path = Some(PathBuf::from("out/a.webp"));
        assert_eq!(session.encode_mode(&task, &mut written), EncodeMode::EncodeAndSave);
        assert_eq!(session.encode_mode(&task, &mut written), EncodeMode::Encode);

        let config = SweepConfig::builder().load_encoded_from_disk(true).build();
        let session = SweepSession::new(config, failing_loader());
        assert_eq!(session.encode_mode(&task, &mut written), EncodeMode::LoadFromDisk);
    }

    #[test]
    fn test_all_failures_return_first_error() {
        let session = SweepSession::new(SweepConfig::default(), failing_loader());
        let result = session.run(planned(&["a.png", "b.png"], &[Quality::Lossy(10)]));
        assert!(matches!(result, Err(Error::ImageLoad { .. })));
    }

    /// Fails every task after recording its image and holding the worker briefly.
    fn recording_loader(started: Arc<Mutex<Vec<String>>>) -> LoadFn {
        Box::new(move |path| {
            let name = path.to_string_lossy().into_owned();
            started.lock().unwrap().push(name);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Err(Error::ImageLoad {
                path: path.to_path_buf(),
                reason: "unreadable".to_string(),
            })
        })
    }

    #[test]
    fn test_workers_start_tasks_in_plan_order() {
        let images: Vec<String> = (0..8).map(|i| format!("{i}.png")).collect();
        let images: Vec<&str> = images.iter().map(String::as_str).collect();
        let started = Arc::new(Mutex::new(Vec::new()));
        let config = SweepConfig::builder()
            .extra_threads(3)
            .abort_above_fail_ratio(1.0)
            .build();
        let session = SweepSession::new(config, recording_loader(Arc::clone(&started)));
        assert!(session.run(planned(&images, &[Quality::Lossy(50)])).is_err());

        // Four workers: the first wave is tasks 0..4, the second 4..8.
        let mut order = started.lock().unwrap().clone();
        assert_eq!(order.len(), 8);
        order[..4].sort();
        order[4..].sort();
        assert_eq!(order, images);
    }

    #[test]
    fn test_abort_stops_handing_out_tasks() {
        let images = ["0.png", "1.png", "2.png", "3.png", "4.png", "5.png"];
        let started = Arc::new(Mutex::new(Vec::new()));
        let config = SweepConfig::builder().extra_threads(1).build();
        let session = SweepSession::new(config, recording_loader(Arc::clone(&started)));
        let result = session.run(planned(&images, &[Quality::Lossy(50)]));
        assert!(matches!(result, Err(Error::ImageLoad { .. })));

        // At most one task per worker started before the first failure aborted the sweep.
        let mut order = started.lock().unwrap().clone();
        order.sort();
        assert!(!order.is_empty() && order.len() <= 2, "{order:?}");
        assert_eq!(order, images[..order.len()]);
    }

    #[test]
    fn test_skip_all_remaining_without_completed_file_fails() {
        let config = SweepConfig::builder().skip_all_remaining(true).build();
        let session = SweepSession::new(config, failing_loader());
        let result = session.run(planned(&["a.png"], &[Quality::Lossy(10)]));
        assert!(matches!(result, Err(Error::Sweep(_))));
    }

    #[test]
    fn test_skip_all_remaining_aggregates_completed_file() {
        let dir = tempfile::tempdir().unwrap();
        let completed = dir.path().join("completed.csv");
        let mut writer = CompletedTasksWriter::append(&completed).unwrap();
        writer.write(&output("a.png", Codec::WebP, Quality::Lossy(10), 42)).unwrap();
        drop(writer);

        let config = SweepConfig::builder()
            .completed_tasks_file(&completed)
            .results_dir(dir.path().join("results"))
            .skip_all_remaining(true)
            .build();
        let session = SweepSession::new(config, failing_loader());
        let summary = session
            .run(planned(&["a.png", "b.png"], &[Quality::Lossy(10)]))
            .unwrap();

        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.completed_since_start, 0);
        assert_eq!(summary.single_result().map(|o| o.encoded_size), Some(42));
        assert!(dir.path().join("results").join("webp_04.json").exists());
    }

    #[cfg(feature = "webp")]
    mod with_webp {
        use super::*;
        use crate::image::PixelFormat;
        use std::sync::atomic::{AtomicUsize, Ordering};

        fn gradient_loader() -> LoadFn {
            Box::new(|_| {
                let data: Vec<u8> = (0..16 * 16 * 3).map(|i| (i % 256) as u8).collect();
                ImageBuffer::from_raw(data, 16, 16, 48, PixelFormat::Rgb8)
            })
        }

        #[test]
        fn test_sweep_writes_reports_and_resumes() {
            let dir = tempfile::tempdir().unwrap();
            let completed = dir.path().join("completed.csv");
            let plan = planned(&["a.png", "b.png"], &[Quality::Lossy(60), Quality::Lossless]);
            let config = SweepConfig::builder()
                .extra_threads(2)
                .completed_tasks_file(&completed)
                .results_dir(dir.path().join("results"))
                .build();

            let summary = SweepSession::new(config.clone(), gradient_loader())
                .run(plan.clone())
                .unwrap();
            assert_eq!(summary.completed_since_start, 4);
            assert_eq!(summary.failures, 0);
            assert_eq!(summary.batches.len(), 2);
            assert!(dir.path().join("results").join("webp_04_lossless.json").exists());

            // Everything is done; a second run loads and runs nothing.
            let resumed = SweepSession::new(config, gradient_loader()).run(plan).unwrap();
            assert_eq!(resumed.loaded, 4);
            assert_eq!(resumed.completed_since_start, 0);
            assert_eq!(resumed.outputs.len(), 4);
        }

        #[test]
        fn test_sweep_aborts_above_failure_budget() {
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            let loader: LoadFn = Box::new(move |path| {
                counter.fetch_add(1, Ordering::SeqCst);
                if path.ends_with("bad.png") {
                    return Err(Error::ImageLoad {
                        path: path.to_path_buf(),
                        reason: "unreadable".to_string(),
                    });
                }
                let data = vec![128u8; 4 * 4 * 3];
                ImageBuffer::from_raw(data, 4, 4, 12, PixelFormat::Rgb8)
            });

            // One thread in plan order: the first task fails with a zero budget.
            let plan = planned(&["bad.png", "a.png", "b.png"], &[Quality::Lossy(50)]);
            let result = SweepSession::new(SweepConfig::default(), loader).run(plan);
            assert!(matches!(result, Err(Error::ImageLoad { .. })));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn test_failures_within_budget_are_tolerated() {
            let loader: LoadFn = Box::new(|path| {
                if path.ends_with("bad.png") {
                    return Err(Error::ImageLoad {
                        path: path.to_path_buf(),
                        reason: "unreadable".to_string(),
                    });
                }
                ImageBuffer::from_raw(vec![7u8; 4 * 4 * 3], 4, 4, 12, PixelFormat::Rgb8)
            });
            let config = SweepConfig::builder()
                .abort_above_fail_ratio(0.5)
                .random_order(true)
                .seed(3)
                .build();
            let plan = planned(&["bad.png", "a.png", "b.png"], &[Quality::Lossy(50)]);
            let summary = SweepSession::new(config, loader).run(plan).unwrap();
            assert_eq!(summary.failures, 1);
            assert_eq!(summary.completed_since_start, 2);
        }
    }
}
