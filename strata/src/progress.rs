#[cfg(feature = "progress")]
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Integer percentage tracker used to throttle progress events.
///
/// `percent` is the floor of `100 * current / total`, clamped to 100. A tracker
/// built with `total == 0` starts out complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressModel {
    total: u64,
    current: u64,
    percent: u8,
}

impl ProgressModel {
    pub fn new(total: u64) -> Self {
        let percent = if total == 0 { 100 } else { 0 };
        Self {
            total,
            current: 0,
            percent,
        }
    }

    /// Record `value` as the current position. Returns true only when the
    /// percentage changed since the previous call.
    pub fn update(&mut self, value: u64) -> bool {
        self.current = self.current.max(value);
        let percent = self.compute_percent();
        let changed = percent != self.percent;
        self.percent = percent;
        changed
    }

    pub fn done(&mut self) {
        self.current = self.total;
        self.percent = 100;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    fn compute_percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let percent = (self.current as u128 * 100) / self.total as u128;
        percent.min(100) as u8
    }
}

/// Short display label for a task name; names shorter than `width` are
/// returned unchanged.
pub fn short_label(name: &str, width: usize) -> &str {
    match name.char_indices().nth(width) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}

// Observer for pipeline progress. Implementations only display; they never
// gate the pipeline.
pub trait ProgressTracker: Send + Sync {
    fn start(&self, task: &str, total: u64);
    fn update(&self, task: &str, current: u64, percent: u8);
    fn finish(&self, task: &str);
}

// No-op implementation
pub struct NoopProgress;

impl ProgressTracker for NoopProgress {
    fn start(&self, _task: &str, _total: u64) {}
    fn update(&self, _task: &str, _current: u64, _percent: u8) {}
    fn finish(&self, _task: &str) {}
}

/// Couples a [`ProgressModel`] with a tracker so callers only report raw
/// positions.
pub(crate) struct TaskProgress<'a> {
    task: &'a str,
    model: ProgressModel,
    tracker: &'a dyn ProgressTracker,
}

impl<'a> TaskProgress<'a> {
    pub(crate) fn start(task: &'a str, total: u64, tracker: &'a dyn ProgressTracker) -> Self {
        tracker.start(task, total);
        Self {
            task,
            model: ProgressModel::new(total),
            tracker,
        }
    }

    pub(crate) fn update(&mut self, value: u64) {
        if self.model.update(value) {
            self.tracker
                .update(self.task, self.model.current(), self.model.percent());
        }
    }

    pub(crate) fn finish(mut self) {
        self.model.done();
        self.tracker
            .update(self.task, self.model.current(), self.model.percent());
        self.tracker.finish(self.task);
    }
}

#[cfg(feature = "progress")]
const LABEL_WIDTH: usize = 15;

// Indicatif implementation (only when feature enabled)
#[cfg(feature = "progress")]
pub struct IndicatifProgress {
    multi: MultiProgress,
    bars: std::sync::Mutex<std::collections::HashMap<String, ProgressBar>>,
}

#[cfg(feature = "progress")]
impl IndicatifProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn with_bars<F: FnOnce(&mut std::collections::HashMap<String, ProgressBar>)>(&self, f: F) {
        // a poisoned lock only means another observer panicked mid-draw
        let mut bars = match self.bars.lock() {
            Ok(bars) => bars,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut bars);
    }
}

#[cfg(feature = "progress")]
impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "progress")]
impl ProgressTracker for IndicatifProgress {
    fn start(&self, task: &str, total: u64) {
        let pb = self.multi.add(ProgressBar::new(100));
        if let Ok(style) =
            ProgressStyle::default_bar().template("  {msg:<17} [{bar:40.cyan/blue}] {pos:>3}%")
        {
            pb.set_style(style.progress_chars("=> "));
        }
        pb.set_message(short_label(task, LABEL_WIDTH).to_string());
        if total == 0 {
            pb.set_position(100);
        }
        self.with_bars(|bars| {
            bars.insert(task.to_string(), pb);
        });
    }

    fn update(&self, task: &str, _current: u64, percent: u8) {
        self.with_bars(|bars| {
            if let Some(pb) = bars.get(task) {
                pb.set_position(u64::from(percent));
            }
        });
    }

    fn finish(&self, task: &str) {
        self.with_bars(|bars| {
            if let Some(pb) = bars.remove(task) {
                pb.finish_with_message(format!("{} done", short_label(task, LABEL_WIDTH)));
            }
        });
    }
}
