use crate::commands::{ClampNotice, CommandContext};
use crate::engine;
use crate::error::AppError;
use crate::models::{normalize_name, LimitMode, VideoCategory};
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCategoryOutcome {
    pub category: VideoCategory,
    pub notices: Vec<ClampNotice>,
}

pub fn get_categories(
    ctx: &CommandContext,
    mode: LimitMode,
) -> Result<Vec<VideoCategory>, AppError> {
    require_category_mode(mode)?;
    Ok(ctx.limits.load().categories.for_mode(mode).to_vec())
}

/// Add a category. If a same-named category was locked and deleted earlier
/// today, the requested limits are clamped to the locked values and the
/// usage history is restored (by normalized name) - reported as notices,
/// not errors.
pub fn add_category(
    ctx: &CommandContext,
    mode: LimitMode,
    name: &str,
    color: &str,
    daily_limit_count: u32,
    daily_time_limit: u32,
) -> Result<AddCategoryOutcome, AppError> {
    require_category_mode(mode)?;
    engine::validate_count_range(daily_limit_count)?;
    engine::validate_time_range(daily_time_limit)?;

    let mut settings = ctx.limits.load();
    let name = engine::validate_category_name(name, settings.categories.for_mode(mode), None)?;

    let normalized = normalize_name(&name);
    let usage = ctx.limits.usage();
    let (locked_count, locked_time) = usage.locked_limits_today(&normalized);

    let mut notices = Vec::new();
    let effective_count = clamp_to_locked(
        daily_limit_count,
        locked_count,
        "dailyLimitCount",
        &mut notices,
    );
    let effective_time = clamp_to_locked(
        daily_time_limit,
        locked_time,
        "dailyTimeLimit",
        &mut notices,
    );

    let mut category = VideoCategory::new(&name, color, effective_count, effective_time);
    let record = usage.usage_today(&normalized);
    category.videos_watched_today = record.video_count;
    category.time_watched_today = record.time_watched;
    if record.video_count > 0 || record.time_watched > 0.0 {
        info!("restored today's usage for recreated category '{name}'");
    }

    let list = settings
        .categories
        .for_mode_mut(mode)
        .ok_or(AppError::InvalidInput {
            field: "mode",
            reason: "total-time mode has no categories".into(),
        })?;
    list.push(category.clone());
    ctx.limits.save(&settings);

    Ok(AddCategoryOutcome { category, notices })
}

/// Rename a category. Rejected while locked: the name is the join key to
/// today's usage history.
pub fn rename_category(
    ctx: &CommandContext,
    mode: LimitMode,
    id: &str,
    new_name: &str,
) -> Result<VideoCategory, AppError> {
    require_category_mode(mode)?;
    let mut settings = ctx.limits.load();

    let current = settings
        .find_category(mode, id)
        .ok_or(AppError::NotFound { entity: "category" })?;
    engine::validate_rename(current)?;
    let new_name =
        engine::validate_category_name(new_name, settings.categories.for_mode(mode), Some(id))?;

    let list = settings.categories.for_mode_mut(mode).ok_or(AppError::NotFound {
        entity: "category list",
    })?;
    let category = list
        .iter_mut()
        .find(|c| c.id == id)
        .ok_or(AppError::NotFound { entity: "category" })?;
    category.name = new_name;
    let updated = category.clone();

    ctx.limits.save(&settings);
    Ok(updated)
}

/// Change the limit in the dimension `mode` enforces. Locked categories
/// may only lower it.
pub fn update_category_limit(
    ctx: &CommandContext,
    mode: LimitMode,
    id: &str,
    proposed: u32,
) -> Result<VideoCategory, AppError> {
    require_category_mode(mode)?;
    let mut settings = ctx.limits.load();

    let current = settings
        .find_category(mode, id)
        .ok_or(AppError::NotFound { entity: "category" })?;
    engine::validate_limit_change(current, proposed, mode)?;

    let list = settings.categories.for_mode_mut(mode).ok_or(AppError::NotFound {
        entity: "category list",
    })?;
    let category = list
        .iter_mut()
        .find(|c| c.id == id)
        .ok_or(AppError::NotFound { entity: "category" })?;
    match mode {
        LimitMode::VideoCount => category.daily_limit_count = proposed,
        LimitMode::TimeCategory => category.daily_time_limit = proposed,
        LimitMode::TimeTotal => unreachable!("guarded by require_category_mode"),
    }
    let updated = category.clone();

    ctx.limits.save(&settings);
    Ok(updated)
}

pub fn set_category_active(
    ctx: &CommandContext,
    mode: LimitMode,
    id: &str,
    is_active: bool,
) -> Result<(), AppError> {
    require_category_mode(mode)?;
    let mut settings = ctx.limits.load();

    let list = settings.categories.for_mode_mut(mode).ok_or(AppError::NotFound {
        entity: "category list",
    })?;
    let category = list
        .iter_mut()
        .find(|c| c.id == id)
        .ok_or(AppError::NotFound { entity: "category" })?;
    category.is_active = is_active;

    ctx.limits.save(&settings);
    Ok(())
}

/// Delete a category. A locked category's current limits are stamped onto
/// today's usage record first, so recreating the name cannot raise them.
pub fn delete_category(ctx: &CommandContext, mode: LimitMode, id: &str) -> Result<(), AppError> {
    require_category_mode(mode)?;
    let mut settings = ctx.limits.load();

    let category = settings
        .find_category(mode, id)
        .cloned()
        .ok_or(AppError::NotFound { entity: "category" })?;
    if engine::is_category_locked(&category) {
        ctx.limits.usage().snapshot_locked_limits(
            &category.normalized_name(),
            category.daily_limit_count,
            category.daily_time_limit,
        );
    }

    let list = settings.categories.for_mode_mut(mode).ok_or(AppError::NotFound {
        entity: "category list",
    })?;
    list.retain(|c| c.id != id);

    ctx.limits.save(&settings);
    Ok(())
}

fn require_category_mode(mode: LimitMode) -> Result<(), AppError> {
    if !mode.is_category_mode() {
        return Err(AppError::InvalidInput {
            field: "mode",
            reason: "total-time mode has no categories".into(),
        });
    }
    Ok(())
}

fn clamp_to_locked(
    requested: u32,
    locked: Option<u32>,
    field: &str,
    notices: &mut Vec<ClampNotice>,
) -> u32 {
    match locked {
        Some(locked) if requested > locked => {
            notices.push(ClampNotice {
                field: field.to_string(),
                requested,
                clamped_to: locked,
            });
            locked
        }
        _ => requested,
    }
}
