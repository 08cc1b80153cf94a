use crate::commands::categories::{self, AddCategoryOutcome};
use crate::commands::limits::{self, LimitsState};
use crate::commands::settings as settings_commands;
use crate::commands::{ClampNotice, CommandContext};
use crate::controller::{BlockReason, NavigationController, OverlayUi};
use crate::error::AppError;
use crate::models::{FavoriteCategory, InterfaceSettings, LimitMode, VideoCategory};
use crate::tracker::PlayerHandle;
use log::warn;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// Chrome limits native messaging frames to 1MB (1024 * 1024 bytes)
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum IncomingMessage {
    // Content-script lifecycle events.
    VideoStarted { url: String },
    VideoMetadataReady { url: String },
    PlayerStateChanged { paused: bool },
    CategorySelected { category_id: String },
    PromptDismissed,
    VideoEnded,

    // Popup commands.
    GetLimitsState,
    GetUsageSummary,
    GetInterfaceSettings,
    SetInterfaceSettings { settings: InterfaceSettings },
    AddCategory {
        mode: LimitMode,
        name: String,
        color: String,
        daily_limit_count: u32,
        daily_time_limit: u32,
    },
    RenameCategory { mode: LimitMode, id: String, name: String },
    UpdateCategoryLimit { mode: LimitMode, id: String, limit: u32 },
    SetCategoryActive { mode: LimitMode, id: String, is_active: bool },
    DeleteCategory { mode: LimitMode, id: String },
    SetActiveMode { mode: LimitMode },
    SetTotalTimeLimit { minutes: u32 },
    EnableLimits,
    DisableLimits,
    ResetLimits,
    SaveFavorite { mode: LimitMode, category_id: String },
    LoadFavorite { mode: LimitMode, favorite_id: String },
    DeleteFavorite { favorite_id: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutgoingMessage {
    Ack { received: bool },
    Error { message: String },
    LimitsState { state: LimitsState },
    UsageSummary { summary: limits::UsageSummary },
    InterfaceSettings { settings: InterfaceSettings },
    CategoryAdded {
        category: VideoCategory,
        notices: Vec<ClampNotice>,
    },
    Category { category: VideoCategory },
    Favorite { favorite: FavoriteCategory },

    // Pushed to the content script.
    PauseVideo,
    ResumeVideo,
    ShowCategoryPrompt { categories: Vec<VideoCategory> },
    ShowBlockingScreen { reason: BlockReason },
    DismissOverlay,
}

/// Shared frame writer; push messages and request responses interleave on
/// the same stream, each in its own frame.
#[derive(Clone)]
pub struct MessageWriter {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl MessageWriter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }

    pub fn write_message(&self, message: &OutgoingMessage) -> io::Result<()> {
        let json = serde_json::to_vec(message)?;
        let len = json.len() as u32;
        let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());

        // Chrome Native Messaging protocol specifies little-endian byte order
        out.write_all(&len.to_le_bytes())?;
        out.write_all(&json)?;
        out.flush()
    }
}

pub fn read_message(input: &mut dyn Read) -> io::Result<IncomingMessage> {
    let mut len_bytes = [0u8; 4];
    input.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Message too large: {len} bytes (max: {MAX_MESSAGE_SIZE} bytes)"),
        ));
    }

    let mut buffer = vec![0u8; len];
    input.read_exact(&mut buffer)?;

    serde_json::from_slice(&buffer).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// The content script's `<video>` element, driven over the message stream.
/// Pause state is the last state the content script reported, updated
/// optimistically when the host itself pauses or resumes.
pub struct RemotePlayer {
    writer: MessageWriter,
    paused: AtomicBool,
    metadata_ready: AtomicBool,
}

impl RemotePlayer {
    pub fn new(writer: MessageWriter) -> Arc<Self> {
        Arc::new(Self {
            writer,
            paused: AtomicBool::new(false),
            metadata_ready: AtomicBool::new(false),
        })
    }

    fn note_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    fn note_metadata(&self, ready: bool) {
        self.metadata_ready.store(ready, Ordering::SeqCst);
    }
}

impl PlayerHandle for RemotePlayer {
    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        if let Err(e) = self.writer.write_message(&OutgoingMessage::PauseVideo) {
            warn!("failed to push pause: {e}");
        }
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        if let Err(e) = self.writer.write_message(&OutgoingMessage::ResumeVideo) {
            warn!("failed to push resume: {e}");
        }
    }

    fn has_metadata(&self) -> bool {
        self.metadata_ready.load(Ordering::SeqCst)
    }
}

/// The content script's overlay, driven over the message stream. The
/// visibility flag is the live handle the prompt re-entrancy guard checks.
pub struct RemoteOverlay {
    writer: MessageWriter,
    prompt_visible: AtomicBool,
}

impl RemoteOverlay {
    pub fn new(writer: MessageWriter) -> Arc<Self> {
        Arc::new(Self {
            writer,
            prompt_visible: AtomicBool::new(false),
        })
    }
}

impl OverlayUi for RemoteOverlay {
    fn show_category_prompt(&self, categories: &[VideoCategory]) {
        self.prompt_visible.store(true, Ordering::SeqCst);
        let message = OutgoingMessage::ShowCategoryPrompt {
            categories: categories.to_vec(),
        };
        if let Err(e) = self.writer.write_message(&message) {
            warn!("failed to push category prompt: {e}");
        }
    }

    fn show_blocking_screen(&self, reason: &BlockReason) {
        let message = OutgoingMessage::ShowBlockingScreen {
            reason: reason.clone(),
        };
        if let Err(e) = self.writer.write_message(&message) {
            warn!("failed to push blocking screen: {e}");
        }
    }

    fn dismiss_overlay(&self) {
        self.prompt_visible.store(false, Ordering::SeqCst);
        if let Err(e) = self.writer.write_message(&OutgoingMessage::DismissOverlay) {
            warn!("failed to push overlay dismissal: {e}");
        }
    }

    fn is_prompt_visible(&self) -> bool {
        self.prompt_visible.load(Ordering::SeqCst)
    }
}

/// One native-messaging connection: reads frames, dispatches to the
/// command surface and the per-tab controller, writes responses. One
/// controller per connection is the per-tab session policy.
pub struct NativeHost {
    ctx: CommandContext,
    controller: NavigationController,
    player: Arc<RemotePlayer>,
    writer: MessageWriter,
}

impl NativeHost {
    pub fn new(
        ctx: CommandContext,
        controller: NavigationController,
        player: Arc<RemotePlayer>,
        writer: MessageWriter,
    ) -> Self {
        Self {
            ctx,
            controller,
            player,
            writer,
        }
    }

    /// Read and dispatch frames until the stream closes.
    pub fn run(&self, input: &mut dyn Read) -> io::Result<()> {
        loop {
            let message = read_message(input)?;
            if let Some(response) = self.handle_message(message) {
                self.writer.write_message(&response)?;
            }
        }
    }

    pub fn handle_message(&self, message: IncomingMessage) -> Option<OutgoingMessage> {
        match message {
            IncomingMessage::VideoStarted { url } => {
                self.player.note_metadata(false);
                self.player.note_paused(false);
                self.controller.on_navigation(&url);
                Some(ack())
            }
            IncomingMessage::VideoMetadataReady { url } => {
                self.player.note_metadata(true);
                self.controller.on_video_metadata(&url);
                Some(ack())
            }
            IncomingMessage::PlayerStateChanged { paused } => {
                self.player.note_paused(paused);
                None
            }
            IncomingMessage::CategorySelected { category_id } => {
                self.controller.on_category_selected(&category_id);
                Some(ack())
            }
            IncomingMessage::PromptDismissed => {
                self.controller.on_prompt_dismissed();
                Some(ack())
            }
            IncomingMessage::VideoEnded => {
                self.controller.on_video_ended();
                Some(ack())
            }

            IncomingMessage::GetLimitsState => Some(OutgoingMessage::LimitsState {
                state: limits::get_limits_state(&self.ctx),
            }),
            IncomingMessage::GetUsageSummary => Some(OutgoingMessage::UsageSummary {
                summary: limits::get_usage_summary(&self.ctx),
            }),
            IncomingMessage::GetInterfaceSettings => Some(OutgoingMessage::InterfaceSettings {
                settings: settings_commands::get_interface_settings(&self.ctx),
            }),
            IncomingMessage::SetInterfaceSettings { settings } => {
                settings_commands::set_interface_settings(&self.ctx, &settings);
                Some(ack())
            }
            IncomingMessage::AddCategory {
                mode,
                name,
                color,
                daily_limit_count,
                daily_time_limit,
            } => Some(category_added(categories::add_category(
                &self.ctx,
                mode,
                &name,
                &color,
                daily_limit_count,
                daily_time_limit,
            ))),
            IncomingMessage::RenameCategory { mode, id, name } => Some(category_response(
                categories::rename_category(&self.ctx, mode, &id, &name),
            )),
            IncomingMessage::UpdateCategoryLimit { mode, id, limit } => Some(category_response(
                categories::update_category_limit(&self.ctx, mode, &id, limit),
            )),
            IncomingMessage::SetCategoryActive { mode, id, is_active } => Some(unit_response(
                categories::set_category_active(&self.ctx, mode, &id, is_active),
            )),
            IncomingMessage::DeleteCategory { mode, id } => Some(unit_response(
                categories::delete_category(&self.ctx, mode, &id),
            )),
            IncomingMessage::SetActiveMode { mode } => {
                Some(unit_response(limits::set_active_mode(&self.ctx, mode)))
            }
            IncomingMessage::SetTotalTimeLimit { minutes } => Some(unit_response(
                limits::set_total_time_limit(&self.ctx, minutes),
            )),
            IncomingMessage::EnableLimits => Some(unit_response(limits::enable_limits(&self.ctx))),
            IncomingMessage::DisableLimits => {
                Some(unit_response(limits::disable_limits(&self.ctx)))
            }
            IncomingMessage::ResetLimits => {
                limits::reset_limits(&self.ctx);
                Some(ack())
            }
            IncomingMessage::SaveFavorite { mode, category_id } => {
                match limits::save_favorite(&self.ctx, mode, &category_id) {
                    Ok(favorite) => Some(OutgoingMessage::Favorite { favorite }),
                    Err(e) => Some(error_response(e)),
                }
            }
            IncomingMessage::LoadFavorite { mode, favorite_id } => Some(category_added(
                limits::load_favorite(&self.ctx, mode, &favorite_id),
            )),
            IncomingMessage::DeleteFavorite { favorite_id } => Some(unit_response(
                limits::delete_favorite(&self.ctx, &favorite_id),
            )),
        }
    }
}

fn ack() -> OutgoingMessage {
    OutgoingMessage::Ack { received: true }
}

fn error_response(e: AppError) -> OutgoingMessage {
    OutgoingMessage::Error {
        message: e.to_string(),
    }
}

fn unit_response(result: Result<(), AppError>) -> OutgoingMessage {
    match result {
        Ok(()) => ack(),
        Err(e) => error_response(e),
    }
}

fn category_response(result: Result<VideoCategory, AppError>) -> OutgoingMessage {
    match result {
        Ok(category) => OutgoingMessage::Category { category },
        Err(e) => error_response(e),
    }
}

fn category_added(result: Result<AddCategoryOutcome, AppError>) -> OutgoingMessage {
    match result {
        Ok(outcome) => OutgoingMessage::CategoryAdded {
            category: outcome.category,
            notices: outcome.notices,
        },
        Err(e) => error_response(e),
    }
}
