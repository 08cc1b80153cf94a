use crate::commands::categories::AddCategoryOutcome;
use crate::commands::CommandContext;
use crate::engine;
use crate::error::AppError;
use crate::models::{FavoriteCategory, LimitMode, LimitsSettings};
use chrono::{DateTime, Local, NaiveDate, Utc};
use log::info;
use serde::{Deserialize, Serialize};

/// Snapshot the popup renders from: hydrated settings plus the derived
/// flags both surfaces must agree on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsState {
    pub settings: LimitsSettings,
    pub is_active_mode_exhausted: bool,
    pub can_disable_today: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_write_error: Option<String>,
}

/// Today's raw usage ledger, for the popup's stats view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub date: String,
    pub total_time_watched: f64,
    pub records: crate::models::DayUsage,
}

pub fn get_usage_summary(ctx: &CommandContext) -> UsageSummary {
    let usage = ctx.limits.usage();
    UsageSummary {
        date: crate::models::date_key(Local::now().date_naive()),
        total_time_watched: usage.total_time_today(),
        records: usage.day_today(),
    }
}

pub fn get_limits_state(ctx: &CommandContext) -> LimitsState {
    let settings = ctx.limits.load();
    let is_active_mode_exhausted = engine::is_active_mode_fully_exhausted(&settings);
    let can_disable_today = engine::can_disable_limits_today(&settings, Local::now().date_naive());
    LimitsState {
        is_active_mode_exhausted,
        can_disable_today,
        last_write_error: ctx.limits.take_last_write_error(),
        settings,
    }
}

/// Switch the enforcement mode. Always allowed while limits are enabled
/// and never resets usage. Entering total-time mode stamps the activation
/// bookkeeping; leaving clears it.
pub fn set_active_mode(ctx: &CommandContext, mode: LimitMode) -> Result<(), AppError> {
    set_active_mode_at(ctx, mode, Utc::now())
}

fn set_active_mode_at(
    ctx: &CommandContext,
    mode: LimitMode,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let mut settings = ctx.limits.load();
    if settings.active_mode == mode {
        return Ok(());
    }

    settings.active_mode = mode;
    if mode == LimitMode::TimeTotal {
        settings.total_time_mode_activated_at = Some(now);
        settings.total_time_watched_at_activation = Some(settings.total_time_watched_today);
    } else {
        settings.total_time_mode_activated_at = None;
        settings.total_time_watched_at_activation = None;
    }

    info!("active mode switched to {mode:?}");
    ctx.limits.save(&settings);
    Ok(())
}

/// Change the total daily time limit; locked against increases once any
/// time has been watched today.
pub fn set_total_time_limit(ctx: &CommandContext, minutes: u32) -> Result<(), AppError> {
    let mut settings = ctx.limits.load();
    engine::validate_total_limit_change(&settings, minutes)?;
    settings.total_daily_time_limit = minutes;
    ctx.limits.save(&settings);
    Ok(())
}

pub fn enable_limits(ctx: &CommandContext) -> Result<(), AppError> {
    let mut settings = ctx.limits.load();
    settings.is_limits_enabled = true;
    ctx.limits.save(&settings);
    Ok(())
}

/// Turn enforcement off - allowed at most once per calendar day.
pub fn disable_limits(ctx: &CommandContext) -> Result<(), AppError> {
    disable_limits_at(ctx, Local::now().date_naive(), Utc::now())
}

fn disable_limits_at(
    ctx: &CommandContext,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let mut settings = ctx.limits.load();
    if !engine::can_disable_limits_today(&settings, today) {
        return Err(AppError::DisableUnavailable);
    }
    settings.is_limits_enabled = false;
    settings.last_disabled_at = Some(now);
    info!("limits disabled for the rest of the day's grace");
    ctx.limits.save(&settings);
    Ok(())
}

/// Explicit reset to factory defaults. Usage history is not touched; the
/// settings document alone is replaced.
pub fn reset_limits(ctx: &CommandContext) {
    ctx.limits.save(&LimitsSettings::default());
}

/// Save a live category as a reusable template.
pub fn save_favorite(
    ctx: &CommandContext,
    mode: LimitMode,
    category_id: &str,
) -> Result<FavoriteCategory, AppError> {
    let mut settings = ctx.limits.load();
    let category = settings
        .find_category(mode, category_id)
        .ok_or(AppError::NotFound { entity: "category" })?;
    let favorite = FavoriteCategory::from_category(category, Utc::now());
    settings.favorite_categories.push(favorite.clone());
    ctx.limits.save(&settings);
    Ok(favorite)
}

/// Instantiate a favorite as a live category. Goes through the same
/// clamp-and-restore path as adding a category by hand, so a favorite
/// cannot resurrect a higher limit than the name locked today.
pub fn load_favorite(
    ctx: &CommandContext,
    mode: LimitMode,
    favorite_id: &str,
) -> Result<AddCategoryOutcome, AppError> {
    let settings = ctx.limits.load();
    let favorite = settings
        .favorite_categories
        .iter()
        .find(|f| f.id == favorite_id)
        .cloned()
        .ok_or(AppError::NotFound { entity: "favorite" })?;

    crate::commands::categories::add_category(
        ctx,
        mode,
        &favorite.name,
        &favorite.color,
        favorite.daily_limit_count,
        favorite.daily_time_limit,
    )
}

pub fn delete_favorite(ctx: &CommandContext, favorite_id: &str) -> Result<(), AppError> {
    let mut settings = ctx.limits.load();
    let before = settings.favorite_categories.len();
    settings.favorite_categories.retain(|f| f.id != favorite_id);
    if settings.favorite_categories.len() == before {
        return Err(AppError::NotFound { entity: "favorite" });
    }
    ctx.limits.save(&settings);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::categories::add_category;
    use crate::messaging::MessageBus;
    use crate::storage::memory::MemoryStore;
    use crate::storage::{StorageArea, StorageClient, StorageClientConfig};
    use crate::stores::{LimitsStore, SettingsStore, UsageStore};
    use chrono::Duration;
    use std::sync::Arc;

    fn setup() -> CommandContext {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(StorageClient::new(
            store as Arc<dyn StorageArea>,
            StorageClientConfig::default(),
        ));
        let usage = Arc::new(UsageStore::load(Arc::clone(&client)));
        let bus = MessageBus::new();
        let limits = Arc::new(LimitsStore::new(Arc::clone(&client), usage, bus.clone()));
        let settings = Arc::new(SettingsStore::new(client, bus));
        CommandContext { limits, settings }
    }

    #[test]
    fn test_disable_allowed_once_per_day() {
        let ctx = setup();
        enable_limits(&ctx).unwrap();

        let today = Local::now().date_naive();
        disable_limits_at(&ctx, today, Utc::now()).unwrap();
        let settings = ctx.limits.load();
        assert!(!settings.is_limits_enabled);
        assert!(settings.last_disabled_at.is_some());

        // Second disable the same day is rejected.
        enable_limits(&ctx).unwrap();
        let err = disable_limits_at(&ctx, today, Utc::now());
        assert!(matches!(err, Err(AppError::DisableUnavailable)));

        // Tomorrow it works again.
        disable_limits_at(&ctx, today + Duration::days(1), Utc::now()).unwrap();
    }

    #[test]
    fn test_mode_switch_keeps_usage_and_stamps_total_mode() {
        let ctx = setup();
        enable_limits(&ctx).unwrap();
        ctx.limits.usage().add_total_watch_time(30.0);

        set_active_mode(&ctx, LimitMode::TimeTotal).unwrap();
        let settings = ctx.limits.load();
        assert_eq!(settings.active_mode, LimitMode::TimeTotal);
        assert!(settings.total_time_mode_activated_at.is_some());
        assert_eq!(settings.total_time_watched_at_activation, Some(30.0));
        // Usage was not reset by the switch.
        assert_eq!(settings.total_time_watched_today, 30.0);

        set_active_mode(&ctx, LimitMode::VideoCount).unwrap();
        let settings = ctx.limits.load();
        assert!(settings.total_time_mode_activated_at.is_none());
        assert!(settings.total_time_watched_at_activation.is_none());
    }

    #[test]
    fn test_total_limit_locks_once_time_watched() {
        let ctx = setup();
        set_total_time_limit(&ctx, 60).unwrap();

        ctx.limits.usage().add_total_watch_time(1.0);
        assert!(matches!(
            set_total_time_limit(&ctx, 90),
            Err(AppError::LimitLocked { .. })
        ));
        set_total_time_limit(&ctx, 30).unwrap();
        assert_eq!(ctx.limits.load().total_daily_time_limit, 30);
    }

    #[test]
    fn test_total_limit_range() {
        let ctx = setup();
        assert!(set_total_time_limit(&ctx, 4).is_err());
        assert!(set_total_time_limit(&ctx, 481).is_err());
        assert!(set_total_time_limit(&ctx, 5).is_ok());
    }

    #[test]
    fn test_exhaustion_flag_survives_disable_reenable_and_mode_switch() {
        let ctx = setup();
        enable_limits(&ctx).unwrap();
        set_active_mode(&ctx, LimitMode::TimeTotal).unwrap();
        set_total_time_limit(&ctx, 5).unwrap();
        ctx.limits.usage().add_total_watch_time(5.0);

        assert!(get_limits_state(&ctx).is_active_mode_exhausted);

        disable_limits_at(&ctx, Local::now().date_naive(), Utc::now()).unwrap();
        // Disabling does not clear exhaustion within the day.
        assert!(get_limits_state(&ctx).is_active_mode_exhausted);
    }

    #[test]
    fn test_favorites_round_trip_with_clamping() {
        let ctx = setup();
        let outcome = add_category(&ctx, LimitMode::VideoCount, "Gaming", "#f00", 8, 60).unwrap();
        let favorite = save_favorite(&ctx, LimitMode::VideoCount, &outcome.category.id).unwrap();
        assert_eq!(favorite.daily_limit_count, 8);

        // Lock at a lower limit, then delete the live category.
        crate::commands::categories::update_category_limit(
            &ctx,
            LimitMode::VideoCount,
            &outcome.category.id,
            5,
        )
        .unwrap();
        ctx.limits.usage().record_video_watched("gaming");
        crate::commands::categories::delete_category(
            &ctx,
            LimitMode::VideoCount,
            &outcome.category.id,
        )
        .unwrap();

        // Re-instantiating the favorite clamps to the locked value.
        let restored = load_favorite(&ctx, LimitMode::VideoCount, &favorite.id).unwrap();
        assert_eq!(restored.category.daily_limit_count, 5);
        assert!(!restored.notices.is_empty());
        assert_eq!(restored.category.videos_watched_today, 1);
    }

    #[test]
    fn test_delete_favorite() {
        let ctx = setup();
        let outcome = add_category(&ctx, LimitMode::VideoCount, "Gaming", "#f00", 8, 60).unwrap();
        let favorite = save_favorite(&ctx, LimitMode::VideoCount, &outcome.category.id).unwrap();

        delete_favorite(&ctx, &favorite.id).unwrap();
        assert!(matches!(
            delete_favorite(&ctx, &favorite.id),
            Err(AppError::NotFound { .. })
        ));
    }

    #[test]
    fn test_usage_summary_reports_todays_ledger() {
        let ctx = setup();
        ctx.limits.usage().record_video_watched("gaming");
        ctx.limits.usage().add_watch_time("gaming", 3.5);

        let summary = get_usage_summary(&ctx);
        assert_eq!(summary.total_time_watched, 3.5);
        assert_eq!(summary.records["gaming"].video_count, 1);
        assert_eq!(summary.records["gaming"].time_watched, 3.5);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let ctx = setup();
        enable_limits(&ctx).unwrap();
        add_category(&ctx, LimitMode::VideoCount, "Gaming", "#f00", 5, 60).unwrap();

        reset_limits(&ctx);
        let settings = ctx.limits.load();
        assert!(!settings.is_limits_enabled);
        assert!(settings.categories.video_count.is_empty());
    }
}
