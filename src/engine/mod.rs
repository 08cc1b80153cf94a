//! Pure limit/lock decision logic, shared by the popup command surface
//! (validating edits) and the content-side controller (enforcing at
//! runtime). Keeping one implementation is what guarantees the two sides
//! never disagree about "reached" or "allowed".

use crate::constants::{
    MAX_CATEGORY_NAME_LEN, MAX_TIME_LIMIT_MINUTES, MAX_VIDEO_COUNT_LIMIT, MIN_TIME_LIMIT_MINUTES,
    MIN_VIDEO_COUNT_LIMIT,
};
use crate::error::AppError;
use crate::models::{normalize_name, LimitMode, LimitsSettings, VideoCategory};
use chrono::{Local, NaiveDate};

/// Rounding-safe exhaustion comparison: both sides are scaled to
/// hundredths and rounded, so float drift between independently computed
/// values cannot flip the outcome.
pub fn is_limit_reached(watched: f64, limit: f64) -> bool {
    to_hundredths(watched) >= to_hundredths(limit)
}

fn to_hundredths(minutes: f64) -> i64 {
    (minutes * 100.0).round() as i64
}

/// Minutes left before `limit`, never negative, rounded like storage.
pub fn remaining_minutes(watched: f64, limit: f64) -> f64 {
    if is_limit_reached(watched, limit) {
        return 0.0;
    }
    ((limit * 100.0).round() - (watched * 100.0).round()) / 100.0
}

/// A category is locked for the day as soon as it has any usage; locked
/// limits may be lowered but never raised, and locked names may not change.
pub fn is_category_locked(category: &VideoCategory) -> bool {
    category.videos_watched_today > 0 || category.time_watched_today > 0.0
}

/// Validate a proposed category name against emptiness, length, and
/// duplicates (by normalized name). `exclude_id` skips the category being
/// renamed. Returns the trimmed name.
pub fn validate_category_name(
    name: &str,
    existing: &[VideoCategory],
    exclude_id: Option<&str>,
) -> Result<String, AppError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput {
            field: "name",
            reason: "cannot be empty".into(),
        });
    }
    if trimmed.len() > MAX_CATEGORY_NAME_LEN {
        return Err(AppError::InvalidInput {
            field: "name",
            reason: format!("cannot exceed {} characters", MAX_CATEGORY_NAME_LEN),
        });
    }

    let normalized = normalize_name(trimmed);
    let duplicate = existing
        .iter()
        .filter(|c| exclude_id != Some(c.id.as_str()))
        .any(|c| c.normalized_name() == normalized);
    if duplicate {
        return Err(AppError::AlreadyExists {
            name: trimmed.to_string(),
        });
    }

    Ok(trimmed.to_string())
}

/// Validate a proposed limit for `category` in the dimension `mode`
/// enforces: range first, then lock monotonicity (a locked category's
/// limit may only decrease).
pub fn validate_limit_change(
    category: &VideoCategory,
    proposed: u32,
    mode: LimitMode,
) -> Result<(), AppError> {
    let (current, field) = match mode {
        LimitMode::VideoCount => {
            validate_count_range(proposed)?;
            (category.daily_limit_count, "dailyLimitCount")
        }
        LimitMode::TimeCategory => {
            validate_time_range(proposed)?;
            (category.daily_time_limit, "dailyTimeLimit")
        }
        LimitMode::TimeTotal => {
            return Err(AppError::InvalidInput {
                field: "mode",
                reason: "total-time mode has no per-category limits".into(),
            })
        }
    };

    if is_category_locked(category) && proposed > current {
        return Err(AppError::LimitLocked {
            name: category.name.clone(),
            reason: format!("{field} can only be lowered once usage has started"),
        });
    }

    Ok(())
}

pub fn validate_count_range(count: u32) -> Result<(), AppError> {
    if !(MIN_VIDEO_COUNT_LIMIT..=MAX_VIDEO_COUNT_LIMIT).contains(&count) {
        return Err(AppError::InvalidInput {
            field: "dailyLimitCount",
            reason: format!("must be {MIN_VIDEO_COUNT_LIMIT}-{MAX_VIDEO_COUNT_LIMIT}"),
        });
    }
    Ok(())
}

pub fn validate_time_range(minutes: u32) -> Result<(), AppError> {
    if !(MIN_TIME_LIMIT_MINUTES..=MAX_TIME_LIMIT_MINUTES).contains(&minutes) {
        return Err(AppError::InvalidInput {
            field: "dailyTimeLimit",
            reason: format!("must be {MIN_TIME_LIMIT_MINUTES}-{MAX_TIME_LIMIT_MINUTES} minutes"),
        });
    }
    Ok(())
}

/// Validate a change to the total daily time limit. The total limit locks
/// (no increases) as soon as any time has been watched today.
pub fn validate_total_limit_change(
    settings: &LimitsSettings,
    proposed: u32,
) -> Result<(), AppError> {
    validate_time_range(proposed)?;
    if settings.total_time_watched_today > 0.0 && proposed > settings.total_daily_time_limit {
        return Err(AppError::LimitLocked {
            name: "total daily time".into(),
            reason: "the total limit can only be lowered once usage has started".into(),
        });
    }
    Ok(())
}

/// Renaming is how usage history is escaped, so a locked category's name
/// is frozen for the day.
pub fn validate_rename(category: &VideoCategory) -> Result<(), AppError> {
    if is_category_locked(category) {
        return Err(AppError::LimitLocked {
            name: category.name.clone(),
            reason: "the name cannot change once usage has started".into(),
        });
    }
    Ok(())
}

/// Has this category used up its quota in the dimension `mode` enforces?
pub fn is_category_exhausted(category: &VideoCategory, mode: LimitMode) -> bool {
    match mode {
        LimitMode::VideoCount => is_limit_reached(
            category.videos_watched_today as f64,
            category.daily_limit_count as f64,
        ),
        LimitMode::TimeCategory => is_limit_reached(
            category.time_watched_today,
            category.daily_time_limit as f64,
        ),
        LimitMode::TimeTotal => false,
    }
}

/// True iff every active category has reached its limit in the dimension
/// `mode` enforces. Vacuously false with zero active categories.
pub fn are_all_category_limits_exhausted(categories: &[VideoCategory], mode: LimitMode) -> bool {
    let mut active = categories.iter().filter(|c| c.is_active).peekable();
    if active.peek().is_none() {
        return false;
    }
    active.all(|c| is_category_exhausted(c, mode))
}

/// Is the currently active mode fully exhausted? Deliberately independent
/// of `is_limits_enabled`: exhaustion persists through a disable/re-enable
/// cycle within the same day.
pub fn is_active_mode_fully_exhausted(settings: &LimitsSettings) -> bool {
    match settings.active_mode {
        LimitMode::VideoCount | LimitMode::TimeCategory => are_all_category_limits_exhausted(
            settings.categories.for_mode(settings.active_mode),
            settings.active_mode,
        ),
        LimitMode::TimeTotal => is_limit_reached(
            settings.total_time_watched_today,
            settings.total_daily_time_limit as f64,
        ),
    }
}

/// Limits may be switched off at most once per calendar day.
pub fn can_disable_limits_today(settings: &LimitsSettings, today: NaiveDate) -> bool {
    match settings.last_disabled_at {
        None => true,
        Some(at) => at.with_timezone(&Local).date_naive() != today,
    }
}
