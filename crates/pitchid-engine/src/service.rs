//! Async command/event wrapper around the engine.
//!
//! The UI never touches engine state directly: it sends commands over an
//! mpsc channel and consumes events from another. One service task owns the
//! engine, so commands apply strictly in arrival order and assignment
//! events come out in frame order. Cancellation is the only out-of-band
//! path: the handle flips the engine's cancel flag directly so a running
//! frame can stop between detections.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{info, warn};

use pitchid_models::{AnchorTag, Detection};
use pitchid_store::PlayerFields;

use crate::config::EngineConfig;
use crate::engine::{CancelFlag, Engine, FrameOutcome};
use crate::error::{EngineError, EngineResult};
use crate::hints::CsvHintTable;

/// Commands accepted by the engine service.
#[derive(Debug)]
pub enum EngineCommand {
    LoadVideo { path: PathBuf },
    SetCsvHints { path: PathBuf },
    SetFrameBounds { bounds: Option<(f32, f32)> },
    AddAnchor { frame_num: u32, tag: AnchorTag },
    ClearAnchors { video_path: Option<PathBuf> },
    UpsertPlayer { name: String, fields: PlayerFields },
    ProcessFrame { frame_num: u32, detections: Vec<Detection> },
    SaveAll,
    Shutdown,
}

/// Events emitted by the engine service.
#[derive(Debug)]
pub enum EngineEvent {
    VideoLoaded { path: PathBuf, anchor_tags: usize },
    HintsLoaded { frames: usize },
    AssignmentsReady { frame_num: u32, outcome: FrameOutcome },
    PlayerUpserted { player_id: String },
    AnchorsCleared,
    Saved,
    PersistFailed { message: String },
    WarningIssued { message: String },
}

/// Client side of the engine service.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    cancel: CancelFlag,
}

impl EngineHandle {
    /// Enqueue a command. Fails only when the service task has stopped.
    pub async fn send(&self, command: EngineCommand) -> EngineResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::ServiceStopped)
    }

    /// Request cooperative cancellation of the running frame.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Clear a previous cancellation request.
    pub fn reset_cancel(&self) {
        self.cancel.reset();
    }

    /// Ask the service to stop after draining queued commands.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.send(EngineCommand::Shutdown).await
    }
}

/// Start the engine service. Returns the command handle and the event
/// stream.
pub fn spawn_engine(
    config: EngineConfig,
) -> EngineResult<(EngineHandle, mpsc::Receiver<EngineEvent>)> {
    let engine = Engine::new(config)?;
    let cancel = engine.cancel_flag();

    let (command_tx, command_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(64);

    tokio::spawn(run_loop(engine, command_rx, event_tx));

    Ok((
        EngineHandle {
            commands: command_tx,
            cancel,
        },
        event_rx,
    ))
}

async fn run_loop(
    mut engine: Engine,
    mut commands: mpsc::Receiver<EngineCommand>,
    events: mpsc::Sender<EngineEvent>,
) {
    info!(instance = %engine.instance(), "Engine service started");

    while let Some(command) = commands.recv().await {
        if matches!(command, EngineCommand::Shutdown) {
            break;
        }
        if let Some(event) = apply_command(&mut engine, command) {
            if events.send(event).await.is_err() {
                warn!("Event receiver dropped; stopping engine service");
                break;
            }
        }
    }

    if let Err(e) = engine.save_all() {
        warn!(error = %e, "Final save failed during engine service shutdown");
    }
    info!(instance = %engine.instance(), "Engine service stopped");
}

/// Apply one command, mapping the result to an event. Commands that
/// succeed silently produce no event.
fn apply_command(engine: &mut Engine, command: EngineCommand) -> Option<EngineEvent> {
    let event = match command {
        // Handled by the loop before dispatch
        EngineCommand::Shutdown => return None,

        EngineCommand::LoadVideo { path } => match engine.load_video(&path) {
            Ok(summary) => EngineEvent::VideoLoaded {
                path,
                anchor_tags: summary.tags_loaded,
            },
            // The engine keeps running without anchors
            Err(e) => EngineEvent::WarningIssued {
                message: format!("load_video {}: {e}", path.display()),
            },
        },

        EngineCommand::SetCsvHints { path } => match CsvHintTable::from_path(&path) {
            Ok(table) => {
                let frames = table.frame_count();
                engine.set_csv_hints(Box::new(table));
                EngineEvent::HintsLoaded { frames }
            }
            Err(e) => EngineEvent::WarningIssued {
                message: format!("set_csv_hints {}: {e}", path.display()),
            },
        },

        EngineCommand::SetFrameBounds { bounds } => {
            engine.set_frame_bounds(bounds);
            return None;
        }

        EngineCommand::AddAnchor { frame_num, tag } => match engine.add_anchor(frame_num, tag) {
            Ok(()) => return None,
            Err(e @ EngineError::Store(_)) => EngineEvent::PersistFailed {
                message: e.to_string(),
            },
            Err(e) => EngineEvent::WarningIssued {
                message: e.to_string(),
            },
        },

        EngineCommand::ClearAnchors { video_path } => {
            engine.clear_anchors(video_path.as_deref());
            EngineEvent::AnchorsCleared
        }

        EngineCommand::UpsertPlayer { name, fields } => {
            match engine.upsert_player(&name, fields) {
                Ok(player_id) => EngineEvent::PlayerUpserted { player_id },
                Err(e @ EngineError::Store(_)) => EngineEvent::PersistFailed {
                    message: e.to_string(),
                },
                Err(e) => EngineEvent::WarningIssued {
                    message: e.to_string(),
                },
            }
        }

        EngineCommand::ProcessFrame {
            frame_num,
            detections,
        } => {
            let outcome = engine.process_frame(frame_num, &detections);
            EngineEvent::AssignmentsReady { frame_num, outcome }
        }

        EngineCommand::SaveAll => match engine.save_all() {
            Ok(()) => EngineEvent::Saved,
            Err(e) => EngineEvent::PersistFailed {
                message: e.to_string(),
            },
        },
    };

    Some(event)
}
