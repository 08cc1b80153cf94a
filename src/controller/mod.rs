use crate::engine;
use crate::models::{normalize_name, LimitMode, VideoCategory};
use crate::stores::{LimitsStore, UsageStore};
use crate::tracker::{PlayerHandle, TrackerConfig, TrackerService, TrackingTarget, WatchSession};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use url::Url;

/// Why playback is being blocked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BlockReason {
    #[serde(rename_all = "camelCase")]
    CategoryExhausted { name: String },
    AllCategoriesExhausted,
    TotalTimeExhausted,
}

/// Overlay capabilities the controller needs; rendering lives in the
/// extension. `is_prompt_visible` is the live-handle check behind the
/// prompt re-entrancy guard.
pub trait OverlayUi: Send + Sync {
    fn show_category_prompt(&self, categories: &[VideoCategory]);
    fn show_blocking_screen(&self, reason: &BlockReason);
    fn dismiss_overlay(&self);
    fn is_prompt_visible(&self) -> bool;
}

/// Lifecycle of one watch-page session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Detecting,
    AwaitingSelection,
    Tracking,
    Exhausted,
    Ended,
}

struct ControllerState {
    current_url: Option<String>,
    phase: Phase,
    tracker: Option<TrackerService>,
}

/// Drives the per-URL watch session state machine:
/// `Idle -> Detecting -> AwaitingSelection -> Tracking -> {Exhausted,
/// Ended}`, with `Idle` reached directly when limits are disabled or no
/// active categories exist.
///
/// One controller serves one tab; concurrent tabs coordinate only through
/// the shared usage store. The player is exclusively this controller's
/// while a session is `Tracking`.
pub struct NavigationController {
    inner: Arc<Inner>,
}

struct Inner {
    limits: Arc<LimitsStore>,
    usage: Arc<UsageStore>,
    player: Arc<dyn PlayerHandle>,
    ui: Arc<dyn OverlayUi>,
    tracker_config: TrackerConfig,
    state: Mutex<ControllerState>,
}

impl NavigationController {
    pub fn new(
        limits: Arc<LimitsStore>,
        usage: Arc<UsageStore>,
        player: Arc<dyn PlayerHandle>,
        ui: Arc<dyn OverlayUi>,
        tracker_config: TrackerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                limits,
                usage,
                player,
                ui,
                tracker_config,
                state: Mutex::new(ControllerState {
                    current_url: None,
                    phase: Phase::Idle,
                    tracker: None,
                }),
            }),
        }
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock_state().phase
    }

    /// SPA navigation or first sight of a `<video>` element. Idempotent
    /// for the current URL; a new URL tears down the previous session
    /// (cancelling its timers) before anything else happens.
    pub fn on_navigation(&self, raw_url: &str) {
        {
            let state = self.inner.lock_state();
            if state.current_url.as_deref() == Some(raw_url) {
                debug!("navigation to current url, ignoring");
                return;
            }
        }
        self.end_session();

        if !is_watch_url(raw_url) {
            self.inner.lock_state().phase = Phase::Idle;
            return;
        }

        let settings = self.inner.limits.load();
        if !settings.is_limits_enabled
            || (settings.active_mode.is_category_mode()
                && settings.active_categories().count() == 0)
        {
            self.inner.lock_state().phase = Phase::Idle;
            return;
        }

        let mut state = self.inner.lock_state();
        state.current_url = Some(raw_url.to_string());
        state.phase = Phase::Detecting;
        info!("watch session detecting: {raw_url}");
    }

    /// The video element reported metadata readiness for `url`.
    pub fn on_video_metadata(&self, url: &str) {
        {
            let state = self.inner.lock_state();
            if state.current_url.as_deref() != Some(url) || state.phase != Phase::Detecting {
                return;
            }
        }

        let settings = self.inner.limits.load();
        match settings.active_mode {
            LimitMode::TimeTotal => {
                if engine::is_active_mode_fully_exhausted(&settings) {
                    self.block(BlockReason::TotalTimeExhausted);
                } else {
                    self.start_time_tracking(
                        TrackingTarget::Total,
                        settings.total_daily_time_limit as f64,
                        self.inner.usage.total_time_today(),
                        BlockReason::TotalTimeExhausted,
                    );
                }
            }
            LimitMode::VideoCount | LimitMode::TimeCategory => {
                self.inner.player.pause();
                if engine::is_active_mode_fully_exhausted(&settings) {
                    self.block(BlockReason::AllCategoriesExhausted);
                    return;
                }
                if self.inner.ui.is_prompt_visible() {
                    debug!("category prompt already visible, not re-showing");
                    return;
                }
                let choices: Vec<VideoCategory> =
                    settings.active_categories().cloned().collect();
                self.inner.ui.show_category_prompt(&choices);
                self.inner.lock_state().phase = Phase::AwaitingSelection;
            }
        }
    }

    /// The user picked a category in the prompt.
    pub fn on_category_selected(&self, category_id: &str) {
        {
            let state = self.inner.lock_state();
            if state.phase != Phase::AwaitingSelection {
                return;
            }
        }

        let settings = self.inner.limits.load();
        let Some(category) = settings
            .find_category(settings.active_mode, category_id)
            .cloned()
        else {
            warn!("selected category '{category_id}' no longer exists");
            return;
        };

        // The quota may have been spent elsewhere while the prompt was up.
        if engine::is_category_exhausted(&category, settings.active_mode) {
            self.block(BlockReason::CategoryExhausted {
                name: category.name.clone(),
            });
            return;
        }

        match settings.active_mode {
            LimitMode::VideoCount => {
                let count = self
                    .inner
                    .usage
                    .record_video_watched(&normalize_name(&category.name));
                info!("video {count}/{} for '{}'", category.daily_limit_count, category.name);
                self.inner.ui.dismiss_overlay();
                self.inner.player.resume();
                self.inner.lock_state().phase = Phase::Tracking;
            }
            LimitMode::TimeCategory => {
                self.inner.ui.dismiss_overlay();
                self.start_time_tracking(
                    TrackingTarget::Category {
                        name: normalize_name(&category.name),
                    },
                    category.daily_time_limit as f64,
                    category.time_watched_today,
                    BlockReason::CategoryExhausted {
                        name: category.name.clone(),
                    },
                );
            }
            LimitMode::TimeTotal => {}
        }
    }

    /// The user closed the prompt without picking; the video stays paused.
    pub fn on_prompt_dismissed(&self) {
        let mut state = self.inner.lock_state();
        if state.phase != Phase::AwaitingSelection {
            return;
        }
        state.phase = Phase::Ended;
        drop(state);
        self.inner.ui.dismiss_overlay();
    }

    pub fn on_video_ended(&self) {
        self.end_session();
    }

    /// Stop the accumulator, flush, release all timers, clear overlays.
    pub fn end_session(&self) {
        let (tracker, had_session) = {
            let mut state = self.inner.lock_state();
            let had_session = state.current_url.is_some();
            state.current_url = None;
            state.phase = Phase::Ended;
            (state.tracker.take(), had_session)
        };
        // Stop outside the state lock: the tracker thread's exhaustion
        // callback takes the same lock.
        if let Some(tracker) = tracker {
            tracker.stop();
        }
        if had_session {
            self.inner.ui.dismiss_overlay();
        }
    }

    fn start_time_tracking(
        &self,
        target: TrackingTarget,
        limit: f64,
        watched: f64,
        block_reason: BlockReason,
    ) {
        let session = WatchSession::new(target, limit, watched);
        if session.is_exhausted_at_start() {
            self.block(block_reason);
            return;
        }

        self.inner.player.resume();

        let callback_inner = Arc::clone(&self.inner);
        let url = self.inner.lock_state().current_url.clone();
        let on_exhausted = Box::new(move || {
            let mut state = callback_inner.lock_state();
            // A stale callback racing a navigation must not touch the new
            // session.
            if state.current_url != url || state.phase != Phase::Tracking {
                return;
            }
            state.phase = Phase::Exhausted;
            drop(state);
            callback_inner.ui.show_blocking_screen(&block_reason);
        });

        // Enter Tracking before the worker starts: an exhaustion callback
        // can fire arbitrarily soon and checks the phase.
        self.inner.lock_state().phase = Phase::Tracking;

        let tracker = TrackerService::start(
            session,
            Arc::clone(&self.inner.usage),
            Arc::clone(&self.inner.player),
            on_exhausted,
            self.inner.tracker_config.clone(),
        );

        self.inner.lock_state().tracker = Some(tracker);
    }

    fn block(&self, reason: BlockReason) {
        self.inner.player.pause();
        self.inner.ui.show_blocking_screen(&reason);
        self.inner.lock_state().phase = Phase::Exhausted;
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("NavigationController: state mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Only `youtube.com/watch?v=...` pages enter the pipeline.
pub fn is_watch_url(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    let host_matches = host == "youtube.com" || host.ends_with(".youtube.com");
    host_matches
        && url.path() == "/watch"
        && url.query_pairs().any(|(k, _)| k == "v")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MessageBus;
    use crate::models::LimitsSettings;
    use crate::storage::memory::MemoryStore;
    use crate::storage::{StorageArea, StorageClient, StorageClientConfig};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const URL_A: &str = "https://www.youtube.com/watch?v=aaa";
    const URL_B: &str = "https://www.youtube.com/watch?v=bbb";

    struct FakePlayer {
        paused: AtomicBool,
    }

    impl FakePlayer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                paused: AtomicBool::new(false),
            })
        }
    }

    impl PlayerHandle for FakePlayer {
        fn is_paused(&self) -> bool {
            self.paused.load(Ordering::SeqCst)
        }
        fn pause(&self) {
            self.paused.store(true, Ordering::SeqCst);
        }
        fn resume(&self) {
            self.paused.store(false, Ordering::SeqCst);
        }
        fn has_metadata(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct FakeUi {
        prompts_shown: Mutex<usize>,
        blocks: Mutex<Vec<BlockReason>>,
        prompt_visible: AtomicBool,
    }

    impl FakeUi {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn prompt_count(&self) -> usize {
            *self.prompts_shown.lock().unwrap()
        }

        fn blocks(&self) -> Vec<BlockReason> {
            self.blocks.lock().unwrap().clone()
        }
    }

    impl OverlayUi for FakeUi {
        fn show_category_prompt(&self, _categories: &[VideoCategory]) {
            *self.prompts_shown.lock().unwrap() += 1;
            self.prompt_visible.store(true, Ordering::SeqCst);
        }
        fn show_blocking_screen(&self, reason: &BlockReason) {
            self.blocks.lock().unwrap().push(reason.clone());
        }
        fn dismiss_overlay(&self) {
            self.prompt_visible.store(false, Ordering::SeqCst);
        }
        fn is_prompt_visible(&self) -> bool {
            self.prompt_visible.load(Ordering::SeqCst)
        }
    }

    struct Fixture {
        controller: NavigationController,
        player: Arc<FakePlayer>,
        ui: Arc<FakeUi>,
        limits: Arc<LimitsStore>,
        usage: Arc<UsageStore>,
    }

    fn setup(configure: impl FnOnce(&mut LimitsSettings)) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(StorageClient::new(
            store as Arc<dyn StorageArea>,
            StorageClientConfig::default(),
        ));
        let usage = Arc::new(UsageStore::load(Arc::clone(&client)));
        let limits = Arc::new(LimitsStore::new(
            client,
            Arc::clone(&usage),
            MessageBus::new(),
        ));

        let mut settings = limits.load();
        settings.is_limits_enabled = true;
        configure(&mut settings);
        limits.save(&settings);
        limits.flush();

        let player = FakePlayer::new();
        let ui = FakeUi::new();
        let controller = NavigationController::new(
            Arc::clone(&limits),
            Arc::clone(&usage),
            Arc::clone(&player) as Arc<dyn PlayerHandle>,
            Arc::clone(&ui) as Arc<dyn OverlayUi>,
            TrackerConfig {
                sample_interval: Duration::from_millis(50),
            },
        );

        Fixture {
            controller,
            player,
            ui,
            limits,
            usage,
        }
    }

    fn with_count_category(settings: &mut LimitsSettings) {
        settings.active_mode = LimitMode::VideoCount;
        settings
            .categories
            .video_count
            .push(VideoCategory::new("Gaming", "#f00", 2, 60));
    }

    #[test]
    fn test_is_watch_url() {
        assert!(is_watch_url(URL_A));
        assert!(is_watch_url("https://youtube.com/watch?v=x&t=10"));
        assert!(!is_watch_url("https://www.youtube.com/feed/subscriptions"));
        assert!(!is_watch_url("https://www.youtube.com/watch"));
        assert!(!is_watch_url("https://example.com/watch?v=x"));
        assert!(!is_watch_url("not a url"));
    }

    #[test]
    fn test_metadata_pauses_and_prompts_in_category_mode() {
        let f = setup(with_count_category);

        f.controller.on_navigation(URL_A);
        assert_eq!(f.controller.phase(), Phase::Detecting);
        assert!(!f.player.is_paused());

        f.controller.on_video_metadata(URL_A);
        assert_eq!(f.controller.phase(), Phase::AwaitingSelection);
        assert!(f.player.is_paused());
        assert_eq!(f.ui.prompt_count(), 1);
    }

    #[test]
    fn test_navigation_to_same_url_is_idempotent() {
        let f = setup(with_count_category);

        f.controller.on_navigation(URL_A);
        f.controller.on_video_metadata(URL_A);
        // Repeated DOM mutations re-report the same URL.
        f.controller.on_navigation(URL_A);
        f.controller.on_video_metadata(URL_A);

        assert_eq!(f.ui.prompt_count(), 1);
        assert_eq!(f.controller.phase(), Phase::AwaitingSelection);
    }

    #[test]
    fn test_prompt_reentrancy_guard_via_live_handle() {
        let f = setup(with_count_category);

        f.controller.on_navigation(URL_A);
        f.controller.on_video_metadata(URL_A);

        // A stale Detecting state with the prompt still visible must not
        // stack a second prompt.
        f.controller.inner.lock_state().phase = Phase::Detecting;
        f.controller.on_video_metadata(URL_A);
        assert_eq!(f.ui.prompt_count(), 1);
    }

    #[test]
    fn test_disabled_limits_short_circuit_to_idle() {
        let f = setup(|settings| {
            with_count_category(settings);
            settings.is_limits_enabled = false;
        });

        f.controller.on_navigation(URL_A);
        f.controller.on_video_metadata(URL_A);

        assert_eq!(f.ui.prompt_count(), 0);
        assert!(!f.player.is_paused());
    }

    #[test]
    fn test_no_active_categories_short_circuits_to_idle() {
        let f = setup(|settings| {
            settings.active_mode = LimitMode::VideoCount;
        });

        f.controller.on_navigation(URL_A);
        assert_eq!(f.controller.phase(), Phase::Idle);
        assert_eq!(f.ui.prompt_count(), 0);
    }

    #[test]
    fn test_non_watch_url_is_ignored() {
        let f = setup(with_count_category);
        f.controller
            .on_navigation("https://www.youtube.com/feed/subscriptions");
        assert_eq!(f.ui.prompt_count(), 0);
    }

    #[test]
    fn test_selecting_category_counts_video_and_resumes() {
        let f = setup(with_count_category);
        f.controller.on_navigation(URL_A);
        f.controller.on_video_metadata(URL_A);

        let id = f.limits.load().categories.video_count[0].id.clone();
        f.controller.on_category_selected(&id);

        assert_eq!(f.controller.phase(), Phase::Tracking);
        assert!(!f.player.is_paused());
        assert!(!f.ui.is_prompt_visible());
        assert_eq!(f.usage.usage_today("gaming").video_count, 1);
    }

    #[test]
    fn test_selecting_exhausted_category_blocks() {
        let f = setup(with_count_category);
        f.usage.record_video_watched("gaming");
        f.usage.record_video_watched("gaming"); // limit of 2 reached

        f.controller.on_navigation(URL_A);
        f.controller.on_video_metadata(URL_A);
        // Only one category, already exhausted: blocked at metadata.
        assert_eq!(f.controller.phase(), Phase::Exhausted);
        assert_eq!(
            f.ui.blocks(),
            vec![BlockReason::AllCategoriesExhausted]
        );
        assert!(f.player.is_paused());
    }

    #[test]
    fn test_race_to_exhaustion_between_prompt_and_selection() {
        let f = setup(with_count_category);
        f.controller.on_navigation(URL_A);
        f.controller.on_video_metadata(URL_A);

        // Another tab spends the remaining quota while the prompt is up.
        f.usage.record_video_watched("gaming");
        f.usage.record_video_watched("gaming");

        let id = f.limits.load().categories.video_count[0].id.clone();
        f.controller.on_category_selected(&id);

        assert_eq!(f.controller.phase(), Phase::Exhausted);
        assert_eq!(
            f.ui.blocks(),
            vec![BlockReason::CategoryExhausted {
                name: "Gaming".into()
            }]
        );
    }

    #[test]
    fn test_total_time_mode_skips_prompt_and_tracks() {
        let f = setup(|settings| {
            settings.active_mode = LimitMode::TimeTotal;
            settings.total_daily_time_limit = 120;
        });

        f.controller.on_navigation(URL_A);
        f.controller.on_video_metadata(URL_A);

        assert_eq!(f.controller.phase(), Phase::Tracking);
        assert_eq!(f.ui.prompt_count(), 0);
        assert!(!f.player.is_paused());
        f.controller.end_session();
    }

    #[test]
    fn test_total_time_mode_blocks_when_exhausted() {
        let f = setup(|settings| {
            settings.active_mode = LimitMode::TimeTotal;
            settings.total_daily_time_limit = 5;
        });
        f.usage.add_total_watch_time(5.0);

        f.controller.on_navigation(URL_A);
        f.controller.on_video_metadata(URL_A);

        assert_eq!(f.controller.phase(), Phase::Exhausted);
        assert_eq!(f.ui.blocks(), vec![BlockReason::TotalTimeExhausted]);
        assert!(f.player.is_paused());
    }

    #[test]
    fn test_navigation_tears_down_previous_session() {
        let f = setup(|settings| {
            settings.active_mode = LimitMode::TimeCategory;
            settings
                .categories
                .time_category
                .push(VideoCategory::new("Gaming", "#f00", 5, 60));
        });

        f.controller.on_navigation(URL_A);
        f.controller.on_video_metadata(URL_A);
        let id = f.limits.load().categories.time_category[0].id.clone();
        f.controller.on_category_selected(&id);
        assert_eq!(f.controller.phase(), Phase::Tracking);
        assert!(f.controller.inner.lock_state().tracker.is_some());

        f.controller.on_navigation(URL_B);
        // The old tracker is gone and its timers are cancelled; the new
        // session is detecting.
        assert_eq!(f.controller.phase(), Phase::Detecting);
        assert!(f.controller.inner.lock_state().tracker.is_none());

        // Nothing accrued: the session was torn down before any flush.
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(f.usage.usage_today("gaming").time_watched, 0.0);
        f.controller.end_session();
    }

    #[test]
    fn test_prompt_dismissed_keeps_video_paused() {
        let f = setup(with_count_category);
        f.controller.on_navigation(URL_A);
        f.controller.on_video_metadata(URL_A);

        f.controller.on_prompt_dismissed();
        assert_eq!(f.controller.phase(), Phase::Ended);
        assert!(f.player.is_paused());
        assert!(!f.ui.is_prompt_visible());
    }

    #[test]
    fn test_video_ended_releases_session() {
        let f = setup(with_count_category);
        f.controller.on_navigation(URL_A);
        f.controller.on_video_metadata(URL_A);
        let id = f.limits.load().categories.video_count[0].id.clone();
        f.controller.on_category_selected(&id);

        f.controller.on_video_ended();
        assert_eq!(f.controller.phase(), Phase::Ended);

        // The next navigation starts a fresh pipeline.
        f.controller.on_navigation(URL_B);
        f.controller.on_video_metadata(URL_B);
        assert_eq!(f.ui.prompt_count(), 2);
    }
}
