//! End-to-end engine tests: merging, anchor dominance, gallery matching,
//! tag protection, CSV fallback, and cancellation.

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use pitchid_engine::{Engine, EngineConfig, ExtractError, FeatureExtractor};
use pitchid_models::{
    AnchorTag, AssignmentSource, BBox, Detection, FeatureVector,
};
use pitchid_store::PlayerFields;

fn engine_in(dir: &TempDir) -> Engine {
    let config = EngineConfig {
        gallery_path: dir.path().join("player_gallery.json"),
        ..EngineConfig::default()
    };
    Engine::new(config).unwrap()
}

fn feature(values: &[f32]) -> FeatureVector {
    FeatureVector::new(values.to_vec())
}

fn player_box(x1: f32, y1: f32) -> BBox {
    BBox::new(x1, y1, x1 + 100.0, y1 + 250.0)
}

#[test]
fn anchor_overrides_gallery_match() {
    // Gallery knows Alice; an anchor pins Bob at (100,100,200,300) on
    // frame 100. A detection inside the window that looks exactly like
    // Alice must still be Bob.
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in(&dir);

    let alice = feature(&[1.0, 0.0, 0.0]);
    engine
        .upsert_player(
            "Alice",
            PlayerFields {
                features: Some(alice.clone()),
                ..Default::default()
            },
        )
        .unwrap();

    engine
        .add_anchor(100, AnchorTag::new("Bob", BBox::new(100.0, 100.0, 200.0, 300.0)))
        .unwrap();

    let outcome = engine.process_frame(
        150,
        &[Detection::new(BBox::new(110.0, 105.0, 205.0, 305.0), 0.9).with_feature(alice)],
    );

    assert_eq!(outcome.assignments.len(), 1);
    let a = &outcome.assignments[0];
    assert_eq!(a.source, AssignmentSource::Anchor);
    assert_eq!(a.player_name.as_deref(), Some("Bob"));
    assert_eq!(a.confidence, 1.0);
}

#[test]
fn anchor_dominance_ends_outside_window() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in(&dir);
    let bbox = BBox::new(100.0, 100.0, 200.0, 300.0);
    engine.add_anchor(200, AnchorTag::new("Bob", bbox)).unwrap();

    // Both window edges are covered
    for frame in [50u32, 350] {
        let outcome = engine.process_frame(frame, &[Detection::new(bbox, 0.9)]);
        assert_eq!(
            outcome.assignments[0].source,
            AssignmentSource::Anchor,
            "frame {frame} should be protected"
        );
    }

    // One past the window: nothing protects this detection
    let outcome = engine.process_frame(351, &[Detection::new(bbox, 0.9)]);
    assert_eq!(outcome.assignments[0].source, AssignmentSource::Unmatched);
}

#[test]
fn duplicate_detections_merge_to_one() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in(&dir);

    let outcome = engine.process_frame(
        10,
        &[
            Detection::new(BBox::new(100.0, 100.0, 200.0, 300.0), 0.9),
            Detection::new(BBox::new(105.0, 100.0, 205.0, 300.0), 0.85),
        ],
    );

    assert_eq!(outcome.detections.len(), 1);
    assert_eq!(outcome.assignments.len(), 1);
    assert_eq!(outcome.detections[0].member_count(), 2);
}

#[test]
fn ball_shaped_detection_is_dropped() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in(&dir);

    let outcome = engine.process_frame(10, &[Detection::new(BBox::new(50.0, 50.0, 90.0, 90.0), 0.9)]);
    assert!(outcome.detections.is_empty());
    assert!(outcome.assignments.is_empty());
}

#[test]
fn path_mismatched_anchor_file_is_ignored() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in(&dir);

    let video = dir.path().join("MatchA.mp4");
    fs::write(&video, b"").unwrap();
    fs::write(
        dir.path().join("PlayerTagsSeed-MatchA.json"),
        r#"{
            "video_path": "C:/foo/MatchA.mp4",
            "anchor_frames": {
                "100": [
                    { "player_name": "Bob", "bbox": [100.0, 100.0, 200.0, 300.0], "confidence": 1.0 }
                ]
            }
        }"#,
    )
    .unwrap();

    let summary = engine.load_video(&video).unwrap();
    assert_eq!(summary.tags_loaded, 0);
    assert!(summary.loaded_from.is_none());
    assert_eq!(engine.anchors().tag_count(), 0);
}

#[test]
fn fresh_manual_tag_blocks_gallery_flip() {
    // Carol was tagged at frame 500. One frame later the gallery thinks
    // the same position is Dave; the tag wins.
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in(&dir);

    let carol = feature(&[0.0, 1.0, 0.0]);
    let dave = feature(&[0.0, 0.0, 1.0]);
    engine
        .upsert_player(
            "Carol",
            PlayerFields {
                features: Some(carol),
                ..Default::default()
            },
        )
        .unwrap();
    engine
        .upsert_player(
            "Dave",
            PlayerFields {
                features: Some(dave.clone()),
                ..Default::default()
            },
        )
        .unwrap();

    let tagged = BBox::new(300.0, 100.0, 380.0, 300.0);
    engine.add_anchor(500, AnchorTag::new("Carol", tagged)).unwrap();
    // Clear the anchor so only the ephemeral tag protection remains
    engine.clear_anchors(None);

    let outcome = engine.process_frame(
        501,
        &[Detection::new(BBox::new(302.0, 101.0, 379.0, 301.0), 0.9).with_feature(dave)],
    );

    let a = &outcome.assignments[0];
    assert_eq!(a.player_name.as_deref(), Some("Carol"));
    assert_eq!(a.confidence, 1.0);

    // Two frames later the shield has expired and Dave matches normally
    let dave_again = feature(&[0.0, 0.0, 1.0]);
    let outcome = engine.process_frame(
        503,
        &[Detection::new(BBox::new(302.0, 101.0, 379.0, 301.0), 0.9).with_feature(dave_again)],
    );
    assert_eq!(outcome.assignments[0].player_name.as_deref(), Some("Dave"));
    assert_eq!(outcome.assignments[0].source, AssignmentSource::Gallery);
}

#[test]
fn contested_gallery_player_goes_to_higher_similarity() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in(&dir);

    engine
        .upsert_player(
            "Eve",
            PlayerFields {
                features: Some(feature(&[1.0, 0.0, 0.0])),
                ..Default::default()
            },
        )
        .unwrap();

    // Two detections far apart, resembling Eve at 0.62 and 0.71, mutually
    // dissimilar so they are not appearance-merged
    let weaker = feature(&[0.62, 0.7846, 0.0]);
    let stronger = feature(&[0.71, 0.0, 0.7042]);

    let outcome = engine.process_frame(
        10,
        &[
            Detection::new(player_box(0.0, 0.0), 0.9).with_feature(weaker),
            Detection::new(player_box(800.0, 0.0), 0.9).with_feature(stronger),
        ],
    );

    assert_eq!(outcome.assignments.len(), 2);
    assert_eq!(outcome.assignments[1].player_name.as_deref(), Some("Eve"));
    assert_eq!(outcome.assignments[1].source, AssignmentSource::Gallery);
    assert_eq!(outcome.assignments[0].source, AssignmentSource::Unmatched);

    // Uniqueness: Eve appears exactly once
    let eves = outcome
        .assignments
        .iter()
        .filter(|a| a.player_name.as_deref() == Some("Eve"))
        .count();
    assert_eq!(eves, 1);
}

#[test]
fn csv_hints_fill_in_unmatched_detections() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in(&dir);

    let video = dir.path().join("MatchB.mp4");
    fs::write(&video, b"").unwrap();
    fs::write(
        dir.path().join("MatchB_analyzed_tracking_data.csv"),
        "frame,track_id,player_name,x1,y1,x2,y2\n150,3,Frank,100,100,200,300\n",
    )
    .unwrap();

    engine.load_video(&video).unwrap();

    let outcome = engine.process_frame(
        150,
        &[Detection::new(BBox::new(102.0, 101.0, 198.0, 299.0), 0.9)],
    );

    let a = &outcome.assignments[0];
    assert_eq!(a.source, AssignmentSource::CsvHint);
    assert_eq!(a.player_name.as_deref(), Some("Frank"));
    assert!((a.confidence - 0.9).abs() < 1e-6);
}

#[test]
fn anchors_persist_across_engine_restarts() {
    let dir = TempDir::new().unwrap();
    let video = dir.path().join("MatchC.mp4");
    fs::write(&video, b"").unwrap();

    {
        let mut engine = engine_in(&dir);
        engine.load_video(&video).unwrap();
        engine
            .add_anchor(42, AnchorTag::new("Grace", BBox::new(10.0, 10.0, 120.0, 280.0)))
            .unwrap();
        engine.save_all().unwrap();
    }

    let mut engine = engine_in(&dir);
    let summary = engine.load_video(&video).unwrap();
    assert_eq!(summary.tags_loaded, 1);
    assert_eq!(engine.anchors().tags_at(42)[0].player_name, "Grace");
}

#[test]
fn gallery_persists_after_upsert() {
    let dir = TempDir::new().unwrap();
    let gallery_path = dir.path().join("player_gallery.json");
    {
        let mut engine = engine_in(&dir);
        engine.upsert_player("Heidi", PlayerFields::default()).unwrap();
        assert!(gallery_path.exists());
    }

    let engine = engine_in(&dir);
    assert_eq!(engine.gallery().len(), 1);
    assert!(engine.gallery().find_by_name("Heidi").is_some());
}

#[test]
fn cancellation_yields_partial_unmatched_results() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in(&dir);
    engine.cancel_flag().cancel();

    let outcome = engine.process_frame(
        10,
        &[
            Detection::new(player_box(0.0, 0.0), 0.9),
            Detection::new(player_box(500.0, 0.0), 0.9),
        ],
    );

    assert!(outcome.cancelled);
    assert_eq!(outcome.assignments.len(), outcome.detections.len());
    assert!(outcome
        .assignments
        .iter()
        .all(|a| a.source == AssignmentSource::Unmatched));
}

struct FailingExtractor;

impl FeatureExtractor for FailingExtractor {
    fn extract(&self, _frame_num: u32, _bbox: &BBox) -> Result<FeatureVector, ExtractError> {
        Err(ExtractError::Failed("decoder offline".into()))
    }
}

#[test]
fn extractor_failure_degrades_to_unmatched_without_aborting() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in(&dir).with_extractor(Box::new(FailingExtractor));

    engine
        .upsert_player(
            "Ivan",
            PlayerFields {
                features: Some(feature(&[1.0, 0.0])),
                ..Default::default()
            },
        )
        .unwrap();

    let outcome = engine.process_frame(
        10,
        &[
            // No feature: extractor fails, detection degrades
            Detection::new(player_box(0.0, 0.0), 0.9),
            // Carries its own feature: unaffected
            Detection::new(player_box(800.0, 0.0), 0.9).with_feature(feature(&[1.0, 0.0])),
        ],
    );

    assert!(!outcome.cancelled);
    assert_eq!(outcome.assignments[0].source, AssignmentSource::Unmatched);
    assert_eq!(outcome.assignments[1].player_name.as_deref(), Some("Ivan"));
}

#[test]
fn identify_uses_the_stricter_threshold() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in(&dir);

    engine
        .upsert_player(
            "Liam",
            PlayerFields {
                features: Some(feature(&[1.0, 0.0, 0.0])),
                ..Default::default()
            },
        )
        .unwrap();

    // Similarity ~0.55: enough for the display-grade frame pass, not for
    // an authoritative identification
    let borderline = feature(&[0.55, 0.8352, 0.0]);
    assert!(engine.identify(&borderline).is_none());

    let clear = feature(&[0.9, 0.4359, 0.0]);
    let (id, name, sim) = engine.identify(&clear).unwrap();
    assert_eq!(id, "liam");
    assert_eq!(name, "Liam");
    assert!(sim > 0.6);
}

#[test]
fn invalid_anchor_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in(&dir);

    assert!(engine
        .add_anchor(1, AnchorTag::new("", BBox::new(0.0, 0.0, 100.0, 200.0)))
        .is_err());
    assert!(engine
        .add_anchor(1, AnchorTag::new("Judy", BBox::new(100.0, 0.0, 50.0, 200.0)))
        .is_err());
    assert_eq!(engine.anchors().tag_count(), 0);
}

#[test]
fn clear_anchors_ignores_other_videos() {
    let dir = TempDir::new().unwrap();
    let video = dir.path().join("MatchD.mp4");
    fs::write(&video, b"").unwrap();

    let mut engine = engine_in(&dir);
    engine.load_video(&video).unwrap();
    engine
        .add_anchor(5, AnchorTag::new("Kim", BBox::new(0.0, 0.0, 100.0, 250.0)))
        .unwrap();

    engine.clear_anchors(Some(&PathBuf::from("/elsewhere/MatchD.mp4")));
    assert_eq!(engine.anchors().tag_count(), 1);

    engine.clear_anchors(Some(&video));
    assert_eq!(engine.anchors().tag_count(), 0);
}
