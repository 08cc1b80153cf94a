use crate::commands::CommandContext;
use crate::models::InterfaceSettings;

pub fn get_interface_settings(ctx: &CommandContext) -> InterfaceSettings {
    ctx.settings.load()
}

/// Persist the interface toggles and broadcast `SettingsUpdated` so the
/// feature-toggle layer re-applies them.
pub fn set_interface_settings(ctx: &CommandContext, settings: &InterfaceSettings) {
    ctx.settings.save(settings);
}
