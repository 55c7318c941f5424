use std::time::Duration;

/// Tunables for the scheduling substrate.
///
/// Built with a `Builder`-style fluent API, mirroring the way the rest of the
/// ambient stack is configured.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    max_workers: usize,
    idle_dismiss_after: Duration,
    timer_slack: Duration,
    late_fire_threshold: Duration,
    scheduler_tick: Duration,
    idle_parking_watermark: usize,
}

impl SchedulerConfig {
    /// Default maximum number of live workers.
    pub const DEFAULT_MAX_WORKERS: usize = 6;

    /// Default idle tenure after which a worker becomes eligible for dismissal.
    pub const DEFAULT_IDLE_DISMISS_AFTER: Duration = Duration::from_secs(10);

    /// Default slack applied when checking whether a timer is due.
    pub const DEFAULT_TIMER_SLACK: Duration = Duration::from_millis(10);

    /// Default threshold beyond which a repeating timer's callback is skipped
    /// rather than fired late.
    pub const DEFAULT_LATE_FIRE_THRESHOLD: Duration = Duration::from_millis(300);

    /// Default interval of the thread manager's own safety-net tick.
    pub const DEFAULT_SCHEDULER_TICK: Duration = Duration::from_millis(2310);

    /// Default number of idle workers allowed to sit around before dismissal
    /// is even considered.
    pub const DEFAULT_IDLE_PARKING_WATERMARK: usize = 2;

    pub fn new() -> Self {
        Self {
            max_workers: Self::DEFAULT_MAX_WORKERS,
            idle_dismiss_after: Self::DEFAULT_IDLE_DISMISS_AFTER,
            timer_slack: Self::DEFAULT_TIMER_SLACK,
            late_fire_threshold: Self::DEFAULT_LATE_FIRE_THRESHOLD,
            scheduler_tick: Self::DEFAULT_SCHEDULER_TICK,
            idle_parking_watermark: Self::DEFAULT_IDLE_PARKING_WATERMARK,
        }
    }

    /// Changes the maximum number of live workers.
    pub fn max_workers(mut self, n: usize) -> Self {
        self.max_workers = n.max(1);
        self
    }

    /// Changes how long a worker may sit idle before becoming dismissal-eligible.
    pub fn idle_dismiss_after(mut self, d: Duration) -> Self {
        self.idle_dismiss_after = d;
        self
    }

    /// Changes the slack applied to timer due-checks.
    pub fn timer_slack(mut self, d: Duration) -> Self {
        self.timer_slack = d;
        self
    }

    /// Changes the late-fire coalescing threshold for repeating timers.
    pub fn late_fire_threshold(mut self, d: Duration) -> Self {
        self.late_fire_threshold = d;
        self
    }

    /// Changes the interval of the thread manager's periodic safety-net tick.
    pub fn scheduler_tick(mut self, d: Duration) -> Self {
        self.scheduler_tick = d;
        self
    }

    /// Changes how many idle workers are tolerated before dismissal is even
    /// considered.
    pub fn idle_parking_watermark(mut self, n: usize) -> Self {
        self.idle_parking_watermark = n;
        self
    }

    pub fn max_workers_get(&self) -> usize {
        self.max_workers
    }

    pub fn idle_dismiss_after_get(&self) -> Duration {
        self.idle_dismiss_after
    }

    pub fn timer_slack_get(&self) -> Duration {
        self.timer_slack
    }

    pub fn late_fire_threshold_get(&self) -> Duration {
        self.late_fire_threshold
    }

    pub fn scheduler_tick_get(&self) -> Duration {
        self.scheduler_tick
    }

    pub fn idle_parking_watermark_get(&self) -> usize {
        self.idle_parking_watermark
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}
