//! Feed Capture - native messaging host
//!
//! Receives page events from the browser extension on stdin, runs the
//! capture pipeline against them and writes captured actions to stdout.

use feed_capture::bridge::{apply_command, parse_command, read_frame, write_frame, Applied, OutgoingMessage};
use feed_capture::{CaptureApp, ChannelSink, Config, Page};
use std::io;
use std::rc::Rc;
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();

    // stdout carries frames, so logs go to stderr
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    info!("Starting Feed Capture host");
    info!("Configuration path {:?}", Config::default_config_path());

    // Materialize the effective settings so there is a file to edit
    if std::env::args().skip(1).any(|arg| arg == "--write-config") {
        config.save_to_path(Config::default_config_path())?;
        return Ok(());
    }

    if !config.general.enabled {
        info!("Capture is disabled in configuration, exiting");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    LocalSet::new().block_on(&runtime, run(config));

    info!("Feed Capture host stopped");
    Ok(())
}

async fn run(config: Config) {
    let frames = spawn_stdin_reader();
    let page = Rc::new(Page::blank());
    let (sink, actions) = ChannelSink::channel();

    let mut app = CaptureApp::new(config, Rc::clone(&page), Rc::new(sink));
    app.init();

    pump(&page, frames, actions).await;

    app.cleanup();
    let stats = OutgoingMessage::Stats { trackers: app.stats() };
    if let Err(e) = send(&stats) {
        debug!("Could not report stats: {}", e);
    }
}

async fn pump(
    page: &Page,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    mut actions: mpsc::UnboundedReceiver<feed_capture::CapturedAction>,
) {
    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    info!("Connection closed");
                    break;
                };
                debug!("Received {} bytes from extension", frame.len());
                match parse_command(&frame).and_then(|command| apply_command(page, command)) {
                    Ok(Applied::Continue) => {}
                    Ok(Applied::Unload) => {
                        info!("Page unloaded");
                        break;
                    }
                    Err(e) => {
                        warn!("Rejected host command: {}", e);
                        let reply = OutgoingMessage::Error { message: e.to_string() };
                        if let Err(e) = send(&reply) {
                            error!("Failed to write response: {}", e);
                            break;
                        }
                    }
                }
            }
            Some(action) = actions.recv() => {
                if let Err(e) = send(&OutgoingMessage::Captured { action }) {
                    error!("Failed to write captured action: {}", e);
                    break;
                }
            }
        }
    }

    // Deliveries that completed before the loop stopped
    while let Ok(action) = actions.try_recv() {
        if let Err(e) = send(&OutgoingMessage::Captured { action }) {
            error!("Failed to write captured action: {}", e);
            break;
        }
    }
}

/// Blocking stdin reads on their own thread, handed over as whole frames
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let mut stdin = io::stdin().lock();
        loop {
            match read_frame(&mut stdin) {
                Ok(Some(frame)) => {
                    if tx.send(frame).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Read error: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

fn send(message: &OutgoingMessage) -> Result<(), feed_capture::CaptureError> {
    let frame = message.to_frame()?;
    write_frame(&mut io::stdout().lock(), &frame)?;
    Ok(())
}
