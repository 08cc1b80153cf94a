//! Chrome Native Messaging host for the Tubecap extension.
//!
//! Runs as a standalone native messaging host: the extension's popup and
//! content script delegate limit state, decisions and watch-time tracking
//! here over stdin/stdout using Chrome's native messaging protocol.

use directories::ProjectDirs;
use std::io;
use std::sync::Arc;
use tubecap::commands::CommandContext;
use tubecap::controller::{NavigationController, OverlayUi};
use tubecap::native_host::{MessageWriter, NativeHost, RemoteOverlay, RemotePlayer};
use tubecap::tracker::{PlayerHandle, TrackerConfig};
use tubecap::App;

fn get_db_path() -> std::path::PathBuf {
    let proj_dirs = ProjectDirs::from("com", "tubecap", "Tubecap")
        .expect("Could not determine project directories");
    let data_dir = proj_dirs.data_dir();
    std::fs::create_dir_all(data_dir).expect("Could not create data directory");
    data_dir.join("tubecap.db")
}

fn main() {
    let app = App::init(&get_db_path()).expect("Failed to open storage");

    let writer = MessageWriter::new(Box::new(io::stdout()));
    let player = RemotePlayer::new(writer.clone());
    let overlay = RemoteOverlay::new(writer.clone());
    let controller = NavigationController::new(
        Arc::clone(&app.limits),
        Arc::clone(&app.usage),
        Arc::clone(&player) as Arc<dyn PlayerHandle>,
        overlay as Arc<dyn OverlayUi>,
        TrackerConfig::default(),
    );

    let ctx = CommandContext {
        limits: Arc::clone(&app.limits),
        settings: Arc::clone(&app.settings),
    };
    let host = NativeHost::new(ctx, controller, player, writer);

    // Read from stdin until the browser closes the connection, then make
    // sure pending debounced writes reach disk.
    let result = host.run(&mut io::stdin());
    app.flush();

    if let Err(e) = result {
        // EOF is the normal shutdown path when Chrome closes the pipe.
        if e.kind() != io::ErrorKind::UnexpectedEof {
            eprintln!("Native host error: {e}");
            std::process::exit(1);
        }
    }
}
