//! Engine self-check binary.
//!
//! Builds an engine in a temp directory, seeds a gallery and an anchor,
//! drives a few synthetic frames through the service, and verifies the
//! core guarantees: anchor dominance, per-frame name uniqueness, and
//! anchor persistence. Exits non-zero on any violation.

use std::path::Path;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pitchid_engine::{spawn_engine, EngineCommand, EngineConfig, EngineEvent};
use pitchid_models::{AnchorTag, AssignmentSource, BBox, Detection, FeatureVector};
use pitchid_store::PlayerFields;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("pitchid=info".parse().unwrap()))
        .init();

    let workdir = tempfile::tempdir().context("creating temp workdir")?;
    let video_path = workdir.path().join("selfcheck.mp4");
    std::fs::write(&video_path, b"")?;

    let config = EngineConfig {
        gallery_path: workdir.path().join("player_gallery.json"),
        ..EngineConfig::from_env()
    };

    info!(workdir = %workdir.path().display(), "pitchid-selfcheck: starting");

    let (handle, mut events) = spawn_engine(config)?;

    // Seed: one gallery player with features, one anchor pinning "Bob"
    let alice_feature = FeatureVector::new(vec![1.0, 0.0, 0.0, 0.0]);
    handle
        .send(EngineCommand::UpsertPlayer {
            name: "Alice".into(),
            fields: PlayerFields {
                features: Some(alice_feature.clone()),
                ..Default::default()
            },
        })
        .await?;

    handle
        .send(EngineCommand::LoadVideo {
            path: video_path.clone(),
        })
        .await?;

    handle
        .send(EngineCommand::AddAnchor {
            frame_num: 100,
            tag: AnchorTag::new("Bob", BBox::new(100.0, 100.0, 200.0, 300.0)),
        })
        .await?;

    // Frame 150: a detection on Bob's anchor position carrying Alice's
    // exact feature (the anchor must win), plus a far-away detection that
    // resembles Alice loosely enough to gallery-match without being
    // appearance-merged into the first.
    let alice_like = FeatureVector::new(vec![0.6, 0.8, 0.0, 0.0]);
    handle
        .send(EngineCommand::ProcessFrame {
            frame_num: 150,
            detections: vec![
                Detection::new(BBox::new(110.0, 105.0, 205.0, 305.0), 0.9)
                    .with_feature(alice_feature.clone()),
                Detection::new(BBox::new(900.0, 100.0, 1000.0, 350.0), 0.8)
                    .with_feature(alice_like),
            ],
        })
        .await?;

    let mut anchor_checked = false;
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::AssignmentsReady { frame_num, outcome } => {
                info!(
                    frame = frame_num,
                    detections = outcome.detections.len(),
                    "assignments ready"
                );
                println!(
                    "frame {frame_num}: {}",
                    serde_json::to_string_pretty(&outcome.assignments)?
                );

                // Uniqueness: no name twice in one frame
                let names: Vec<&str> = outcome
                    .assignments
                    .iter()
                    .filter_map(|a| a.player_name.as_deref())
                    .collect();
                let mut deduped = names.clone();
                deduped.sort_unstable();
                deduped.dedup();
                if deduped.len() != names.len() {
                    bail!("uniqueness violated in frame {frame_num}: {names:?}");
                }

                let bob = outcome
                    .assignments
                    .iter()
                    .find(|a| a.player_name.as_deref() == Some("Bob"))
                    .context("anchor player missing from assignments")?;
                if bob.source != AssignmentSource::Anchor || bob.confidence != 1.0 {
                    bail!("anchor did not dominate: {bob:?}");
                }
                anchor_checked = true;

                handle.send(EngineCommand::SaveAll).await?;
            }
            EngineEvent::Saved => break,
            EngineEvent::PersistFailed { message } => bail!("persist failed: {message}"),
            other => info!(?other, "event"),
        }
    }

    if !anchor_checked {
        bail!("no assignments observed");
    }

    // The anchor file must exist next to the video and survive a reload
    let seed_file = video_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("PlayerTagsSeed-selfcheck.json");
    if !seed_file.exists() {
        bail!("anchor file was not written: {}", seed_file.display());
    }

    handle.shutdown().await?;
    info!("pitchid-selfcheck: ok");
    println!("pitchid-selfcheck: ok");
    Ok(())
}
