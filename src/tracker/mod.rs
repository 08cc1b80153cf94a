use crate::constants::{MIN_FLUSH_SECS, SAMPLE_INTERVAL_SECS};
use crate::engine::{is_limit_reached, remaining_minutes};
use crate::stores::UsageStore;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// What a tracking session accrues time against.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingTarget {
    /// Per-category time (time-category mode), keyed by normalized name.
    Category { name: String },
    /// The global bucket (time-total mode).
    Total,
}

/// Player capabilities the tracker needs. The real implementation lives in
/// the extension's content script, on the other side of the messaging
/// boundary; tests use a fake.
pub trait PlayerHandle: Send + Sync {
    fn is_paused(&self) -> bool;
    fn pause(&self);
    fn resume(&self);
    fn has_metadata(&self) -> bool;
}

/// Cancellation token shared between a session's owner and its worker
/// thread. Cancelling wakes any in-progress timed wait, so "stop
/// everything for this session" is a single call.
pub struct CancelToken {
    cancelled: Mutex<bool>,
    cv: Condvar,
}

impl CancelToken {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cancelled: Mutex::new(false),
            cv: Condvar::new(),
        })
    }

    pub fn cancel(&self) {
        let mut cancelled = self.cancelled.lock().unwrap_or_else(|p| p.into_inner());
        *cancelled = true;
        self.cv.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Block for up to `timeout`; returns true if the token was cancelled
    /// before or during the wait.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = self.cancelled.lock().unwrap_or_else(|p| p.into_inner());
        if *guard {
            return true;
        }
        let (guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(|p| p.into_inner());
        *guard
    }
}

/// Directive produced by a periodic sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    /// Still playing: flush the elapsed segment and re-base. The deadline
    /// is rescheduled from the updated remaining time, which also
    /// self-corrects drift between the sampler and the deadline.
    Continue { flush: f64 },
    /// Pause detected: flush the pre-pause segment unless it is under the
    /// noise threshold; the exhaustion deadline is cancelled.
    Paused { flush: Option<f64> },
    /// Playback resumed: re-base and reschedule the deadline.
    Resumed,
    /// Nothing changed (still paused, or session already over).
    Idle,
}

/// Per-session accumulation state machine, pure over injected timestamps.
///
/// `watched` is the session's view of today's usage for the target; it is
/// refreshed from the usage store's return value after every flush so that
/// concurrent writers (another tab) are folded in at the next sample.
#[derive(Debug)]
pub struct WatchSession {
    target: TrackingTarget,
    limit: f64,
    watched: f64,
    start_time: Option<DateTime<Utc>>,
    was_paused: bool,
    exhausted: bool,
}

impl WatchSession {
    pub fn new(target: TrackingTarget, limit_minutes: f64, watched_today: f64) -> Self {
        Self {
            target,
            limit: limit_minutes,
            watched: watched_today,
            start_time: None,
            was_paused: false,
            exhausted: false,
        }
    }

    pub fn target(&self) -> &TrackingTarget {
        &self.target
    }

    /// True when the quota is already spent before tracking starts; the
    /// caller blocks immediately instead of starting the session.
    pub fn is_exhausted_at_start(&self) -> bool {
        is_limit_reached(self.watched, self.limit)
    }

    pub fn remaining(&self) -> f64 {
        remaining_minutes(self.watched, self.limit)
    }

    pub fn is_pause_detected(&self) -> bool {
        self.was_paused
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Refresh today's usage from the store's post-flush total.
    pub fn set_watched(&mut self, watched: f64) {
        self.watched = watched;
    }

    pub fn begin(&mut self, now: DateTime<Utc>) {
        self.start_time = Some(now);
        self.was_paused = false;
    }

    pub fn sample(&mut self, now: DateTime<Utc>, paused: bool) -> SampleOutcome {
        if self.exhausted {
            return SampleOutcome::Idle;
        }
        match (paused, self.was_paused) {
            (true, false) => {
                let elapsed = self.elapsed_minutes(now);
                self.start_time = None;
                self.was_paused = true;
                let flush = (elapsed >= MIN_FLUSH_SECS / 60.0).then_some(elapsed);
                SampleOutcome::Paused { flush }
            }
            (true, true) => SampleOutcome::Idle,
            (false, true) => {
                self.start_time = Some(now);
                self.was_paused = false;
                SampleOutcome::Resumed
            }
            (false, false) => {
                let flush = self.elapsed_minutes(now);
                self.start_time = Some(now);
                SampleOutcome::Continue { flush }
            }
        }
    }

    /// Final flush when the session ends mid-playback (navigation, video
    /// end, tab close). Returns the unflushed segment, if playing.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Option<f64> {
        if self.exhausted || self.was_paused {
            self.start_time = None;
            return None;
        }
        let elapsed = self.start_time.map(|_| self.elapsed_minutes(now));
        self.start_time = None;
        elapsed
    }

    /// The exhaustion deadline fired: the exact remaining quota is flushed
    /// (a top-up, not a wall-clock measurement, so the stored total lands
    /// exactly on the limit). Returns `None` if already exhausted.
    pub fn exhaust(&mut self) -> Option<f64> {
        if self.exhausted {
            return None;
        }
        let top_up = self.remaining();
        self.exhausted = true;
        self.start_time = None;
        self.watched = self.limit;
        Some(top_up)
    }

    fn elapsed_minutes(&self, now: DateTime<Utc>) -> f64 {
        match self.start_time {
            Some(start) => (now - start).num_milliseconds().max(0) as f64 / 60_000.0,
            None => 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub sample_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(SAMPLE_INTERVAL_SECS),
        }
    }
}

/// Runs one tracking session on a worker thread: samples the player on the
/// configured interval, wakes early for the exhaustion deadline, flushes
/// into the usage store, and fires the block callback exactly once.
///
/// The session owns the player while running; nothing else pauses or
/// resumes it until the service is stopped.
pub struct TrackerService {
    token: Arc<CancelToken>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TrackerService {
    pub fn start(
        mut session: WatchSession,
        usage: Arc<UsageStore>,
        player: Arc<dyn PlayerHandle>,
        on_exhausted: Box<dyn FnOnce() + Send>,
        config: TrackerConfig,
    ) -> Self {
        let token = CancelToken::new();
        let thread_token = Arc::clone(&token);

        let handle = thread::spawn(move || {
            session.begin(Utc::now());
            let mut on_exhausted = Some(on_exhausted);

            loop {
                // While playing, the next wake is the earlier of the sample
                // tick and the exhaustion deadline; while paused there is
                // no deadline to honor.
                let deadline = Duration::from_secs_f64(session.remaining() * 60.0);
                let deadline_is_next =
                    !session.is_pause_detected() && deadline < config.sample_interval;
                let wait = if deadline_is_next {
                    deadline
                } else {
                    config.sample_interval
                };

                if thread_token.wait(wait) {
                    // Cancelled: flush the in-flight segment and go silent.
                    if let Some(minutes) = session.finish(Utc::now()) {
                        flush(&usage, session.target(), minutes);
                    }
                    return;
                }

                let now = Utc::now();
                let paused = player.is_paused();

                if deadline_is_next && !paused {
                    if let Some(top_up) = session.exhaust() {
                        flush(&usage, session.target(), top_up);
                        info!("daily limit reached, blocking playback");
                        player.pause();
                        if let Some(callback) = on_exhausted.take() {
                            callback();
                        }
                    }
                    return;
                }

                match session.sample(now, paused) {
                    SampleOutcome::Continue { flush: minutes } => {
                        let watched = flush(&usage, session.target(), minutes);
                        session.set_watched(watched);
                        // A concurrent writer (another tab) may have spent
                        // the rest of the quota between samples.
                        if session.remaining() <= 0.0 {
                            if session.exhaust().is_some() {
                                info!("daily limit reached, blocking playback");
                                player.pause();
                                if let Some(callback) = on_exhausted.take() {
                                    callback();
                                }
                            }
                            return;
                        }
                    }
                    SampleOutcome::Paused {
                        flush: Some(minutes),
                    } => {
                        let watched = flush(&usage, session.target(), minutes);
                        session.set_watched(watched);
                    }
                    SampleOutcome::Paused { flush: None } => {
                        debug!("pause segment under noise threshold, dropped");
                    }
                    SampleOutcome::Resumed | SampleOutcome::Idle => {}
                }
            }
        });

        Self {
            token,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Cancel the session and wait for the worker to finish its final
    /// flush. Idempotent.
    pub fn stop(&self) {
        self.token.cancel();
        let handle = self.handle.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TrackerService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn flush(usage: &UsageStore, target: &TrackingTarget, minutes: f64) -> f64 {
    match target {
        TrackingTarget::Category { name } => usage.add_watch_time(name, minutes),
        TrackingTarget::Total => {
            usage.add_total_watch_time(minutes);
            usage.total_time_today()
        }
    }
}
