pub mod categories;
pub mod limits;
pub mod settings;

use crate::stores::{LimitsStore, SettingsStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared state for the popup-facing command surface.
pub struct CommandContext {
    pub limits: Arc<LimitsStore>,
    pub settings: Arc<SettingsStore>,
}

/// Informational notice that a requested limit was clamped to a value a
/// same-named category locked earlier today. Not an error: the operation
/// succeeded with the clamped value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClampNotice {
    pub field: String,
    pub requested: u32,
    pub clamped_to: u32,
}
