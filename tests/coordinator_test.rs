//! Coordinator integration tests.
//!
//! Exercise the per-clip and merge state machines against a real temporary
//! working directory with a scripted media engine.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{age_markers, TestHarness};
use dayreel::coordinator::{Coordinator, Intake, MergeActivity, Readiness, Stall};
use dayreel_av::testing::{RecordingEngine, PLACEHOLDER};
use dayreel_common::{Error, StorageLayout};

fn merge_count(engine: &RecordingEngine) -> usize {
    engine.stages().iter().filter(|s| *s == "merge").count()
}

// ---------------------------------------------------------------------------
// Clip lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn accepted_clip_becomes_canonical_and_clears_marker() {
    let h = TestHarness::new().await;
    let layout = h.coordinator.layout().clone();

    h.submit_all(&[1]).await;

    assert!(layout.canonical_clip(1).exists());
    assert!(!layout.pending_marker(1).exists());
    assert!(!layout.raw_clip(1).exists(), "raw clip deleted by default");

    let progress = h.coordinator.progress();
    assert_eq!(progress.received, 1);
    assert_eq!(progress.completed, 1);
    assert!(progress.active.is_empty());
}

#[tokio::test]
async fn label_is_derived_from_start_date() {
    let h = TestHarness::new().await;
    h.submit_all(&[32]).await;

    let job = h
        .engine
        .jobs()
        .into_iter()
        .find(|j| j.stage == "final")
        .expect("final encode");
    let vf = job.video_filter.expect("video filter");
    assert!(vf.contains("text='1 Feb 2024'"), "{vf}");
}

#[tokio::test]
async fn index_zero_is_rejected_without_marker() {
    let h = TestHarness::new().await;
    let err = h.submit(0).await.unwrap_err();
    assert_matches!(err, Error::Validation(_));
    assert!(!h.coordinator.layout().pending_marker(0).exists());
    assert_eq!(h.coordinator.progress().received, 0);
}

#[tokio::test]
async fn missing_source_leaves_nothing_pending() {
    let h = TestHarness::new().await;
    let missing = h.dir.path().join("nope.mp4");

    let err = h
        .coordinator
        .accept_clip(4, &missing, Intake::Move)
        .await
        .unwrap_err();
    assert_matches!(err, Error::Io { .. });
    assert!(!h.coordinator.layout().pending_marker(4).exists());
    assert!(h.coordinator.progress().active.is_empty());
}

#[tokio::test]
async fn duplicate_submission_while_running_is_rejected() {
    let h = TestHarness::build(RecordingEngine::gated(), |_| {}).await;

    h.submit(2).await.unwrap();
    let err = h.submit(2).await.unwrap_err();
    assert_matches!(err, Error::Validation(msg) if msg.contains("already"));

    h.engine.release(10);
    h.coordinator.wait_idle().await;
    assert!(h.coordinator.layout().canonical_clip(2).exists());
}

#[tokio::test]
async fn finished_clip_is_not_reopened() {
    let h = TestHarness::new().await;
    h.submit_all(&[1]).await;

    let err = h.submit(1).await.unwrap_err();
    assert_matches!(err, Error::Validation(msg) if msg.contains("already done"));

    let layout = h.coordinator.layout();
    assert!(!layout.pending_marker(1).exists());
    assert!(layout.canonical_clip(1).exists());
    let progress = h.coordinator.progress();
    assert_eq!((progress.received, progress.completed), (1, 1));
    assert!(progress.active.is_empty());
    assert_eq!(h.engine.stages().iter().filter(|s| *s == "final").count(), 1);
}

#[tokio::test]
async fn originals_are_retained_when_configured() {
    let keep = tempfile::tempdir().unwrap();
    let keep_path = keep.path().join("kept");
    let h = TestHarness::build(RecordingEngine::new(), |c| {
        c.clips.copy_originals_to = Some(keep_path.clone());
    })
    .await;

    h.submit_all(&[5]).await;
    assert_eq!(
        std::fs::read_to_string(keep_path.join("5.mp4")).unwrap(),
        "raw clip 5"
    );
}

// ---------------------------------------------------------------------------
// Failure propagation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_normalization_keeps_marker_and_blocks_merge() {
    let h = TestHarness::new().await;
    h.engine.fail_stage("final");

    h.submit_all(&[1]).await;

    let layout = h.coordinator.layout();
    assert!(layout.pending_marker(1).exists());
    assert!(!layout.canonical_clip(1).exists());

    let progress = h.coordinator.progress();
    assert_eq!(progress.failed.len(), 1);
    assert_eq!(progress.failed[0].index, 1);
    assert!(progress.failed[0].error.contains("ffmpeg"));

    assert_eq!(
        h.coordinator.readiness().await.unwrap(),
        Readiness::ProcessingClips { pending: vec![1] }
    );
    assert_eq!(merge_count(&h.engine), 0);
}

#[tokio::test]
async fn failed_clip_can_be_resubmitted() {
    let h = TestHarness::new().await;
    h.engine.fail_stage("final");
    h.submit_all(&[1]).await;

    h.engine.clear_failures();
    h.submit_all(&[1]).await;

    assert!(!h.coordinator.layout().pending_marker(1).exists());
    assert!(h.coordinator.progress().failed.is_empty());
    h.merged().await;
}

#[tokio::test]
async fn rejected_resubmission_keeps_failed_marker() {
    let h = TestHarness::new().await;
    h.engine.fail_output_containing("2_processed");
    h.submit_all(&[1, 2]).await;
    h.engine.clear_failures();

    let missing = h.dir.path().join("gone.mp4");
    let err = h
        .coordinator
        .accept_clip(2, &missing, Intake::Move)
        .await
        .unwrap_err();
    assert_matches!(err, Error::Io { .. });

    let layout = h.coordinator.layout();
    assert!(layout.pending_marker(2).exists());
    assert!(!layout.canonical_clip(2).exists());
    assert_eq!(h.coordinator.progress().failed[0].index, 2);
    assert_eq!(
        h.coordinator.readiness().await.unwrap(),
        Readiness::ProcessingClips { pending: vec![2] }
    );
    assert_eq!(merge_count(&h.engine), 0);
}

#[tokio::test]
async fn resubmission_refused_under_merge_lock_keeps_failed_marker() {
    let h = TestHarness::new().await;
    h.engine.fail_stage("final");
    h.submit_all(&[3]).await;
    h.engine.clear_failures();

    let layout = h.coordinator.layout().clone();
    std::fs::write(layout.merge_marker(), b"").unwrap();

    let err = h.submit(3).await.unwrap_err();
    assert_matches!(err, Error::Validation(msg) if msg.contains("merge"));
    assert!(layout.pending_marker(3).exists());
    assert!(h.coordinator.progress().active.is_empty());
}

#[tokio::test]
async fn unattended_marker_is_reported_stalled_after_grace() {
    let h = TestHarness::build(RecordingEngine::new(), |c| {
        c.coordinator.stall_grace_secs = 0;
    })
    .await;
    h.engine.fail_stage("final");
    h.submit_all(&[1, 2]).await;
    h.engine.clear_failures();

    age_markers().await;
    assert_matches!(
        h.coordinator.readiness().await.unwrap(),
        Readiness::Stalled(Stall { clips, merge: false }) if clips == vec![1, 2]
    );
}

#[tokio::test]
async fn running_clip_is_not_stalled() {
    let h = TestHarness::build(RecordingEngine::gated(), |c| {
        c.coordinator.stall_grace_secs = 0;
    })
    .await;
    h.submit(1).await.unwrap();
    age_markers().await;

    assert_eq!(
        h.coordinator.readiness().await.unwrap(),
        Readiness::ProcessingClips { pending: vec![1] }
    );
    h.engine.release(10);
    h.coordinator.wait_idle().await;
}

#[tokio::test]
async fn failed_merge_keeps_merge_marker() {
    let h = TestHarness::new().await;
    h.submit_all(&[1, 2]).await;
    h.engine.fail_stage("merge");

    assert_eq!(
        h.coordinator.readiness().await.unwrap(),
        Readiness::MergeStarted
    );
    h.coordinator.wait_idle().await;

    let layout = h.coordinator.layout();
    assert!(layout.merge_marker().exists());
    assert!(!layout.merged_output().exists());
    assert!(layout.canonical_clip(1).exists(), "inputs survive a failed merge");

    let progress = h.coordinator.progress();
    assert_eq!(progress.merge, MergeActivity::Failed);
    assert!(progress.merge_error.is_some());

    assert_eq!(h.coordinator.readiness().await.unwrap(), Readiness::Merging);
    assert_eq!(merge_count(&h.engine), 1, "a failed merge is not retried");
}

#[tokio::test]
async fn failed_merge_is_stalled_after_grace() {
    let h = TestHarness::build(RecordingEngine::new(), |c| {
        c.coordinator.stall_grace_secs = 0;
    })
    .await;
    h.submit_all(&[1]).await;
    h.engine.fail_stage("merge");
    h.coordinator.readiness().await.unwrap();
    h.coordinator.wait_idle().await;

    age_markers().await;
    assert_eq!(
        h.coordinator.readiness().await.unwrap(),
        Readiness::Stalled(Stall {
            clips: vec![],
            merge: true
        })
    );
}

// ---------------------------------------------------------------------------
// Merge admission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn no_clips_means_no_merge() {
    let h = TestHarness::new().await;
    assert_eq!(
        h.coordinator.readiness().await.unwrap(),
        Readiness::ProcessingClips { pending: vec![] }
    );
    assert!(!h.coordinator.layout().merge_marker().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_polls_trigger_exactly_one_merge() {
    let h = TestHarness::new().await;
    h.submit_all(&[1, 2, 3]).await;

    let mut polls = Vec::new();
    for _ in 0..16 {
        let coordinator = h.coordinator.clone();
        polls.push(tokio::spawn(async move { coordinator.readiness().await }));
    }

    let mut started = 0;
    for poll in polls {
        match poll.await.unwrap().unwrap() {
            Readiness::MergeStarted => started += 1,
            Readiness::Merging | Readiness::Ready(_) => {}
            other => panic!("unexpected readiness {other:?}"),
        }
    }
    assert_eq!(started, 1);

    h.merged().await;
    assert_eq!(merge_count(&h.engine), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn polls_and_uploads_share_one_worker() {
    let h = TestHarness::build(RecordingEngine::gated(), |_| {}).await;
    h.submit(1).await.unwrap();

    let mut polls = Vec::new();
    for _ in 0..8 {
        let coordinator = h.coordinator.clone();
        polls.push(tokio::spawn(async move { coordinator.readiness().await }));
    }
    h.submit(2).await.unwrap();

    for poll in polls {
        assert_matches!(
            poll.await.unwrap().unwrap(),
            Readiness::ProcessingClips { pending } if pending.contains(&1)
        );
    }
    assert!(!h.coordinator.layout().merge_marker().exists());

    h.engine.release(20);
    h.coordinator.wait_idle().await;
    h.merged().await;
    assert_eq!(merge_count(&h.engine), 1);
}

#[tokio::test]
async fn merge_orders_clips_by_numeric_index() {
    let h = TestHarness::build(RecordingEngine::new(), |c| {
        c.storage.delete_intermediate_files = false;
    })
    .await;
    h.submit_all(&[3, 10, 1, 9, 2]).await;
    h.merged().await;

    let manifest = std::fs::read_to_string(h.coordinator.layout().manifest()).unwrap();
    let order: Vec<&str> = manifest
        .lines()
        .filter_map(|l| l.rsplit('/').next())
        .collect();
    assert_eq!(
        order,
        vec![
            "1_processed.mp4'",
            "2_processed.mp4'",
            "3_processed.mp4'",
            "9_processed.mp4'",
            "10_processed.mp4'",
        ]
    );
}

#[tokio::test]
async fn upload_after_merge_lock_is_rejected() {
    let h = TestHarness::build(RecordingEngine::gated(), |_| {}).await;
    h.engine.release(1);
    h.submit_all(&[1]).await;

    assert_eq!(
        h.coordinator.readiness().await.unwrap(),
        Readiness::MergeStarted
    );
    let err = h.submit(2).await.unwrap_err();
    assert_matches!(err, Error::Validation(msg) if msg.contains("merge"));
    assert!(!h.coordinator.layout().pending_marker(2).exists());

    h.engine.release(1);
    h.merged().await;
}

#[tokio::test]
async fn pending_clip_blocks_merge() {
    let h = TestHarness::build(RecordingEngine::gated(), |_| {}).await;
    h.engine.release(1);
    h.submit_all(&[1]).await;
    h.submit(2).await.unwrap();

    assert_eq!(
        h.coordinator.readiness().await.unwrap(),
        Readiness::ProcessingClips { pending: vec![2] }
    );
    assert!(!h.coordinator.layout().merge_marker().exists());

    h.engine.release(10);
    h.coordinator.wait_idle().await;
    h.merged().await;
}

// ---------------------------------------------------------------------------
// Resource serialization
// ---------------------------------------------------------------------------

async fn wait_for_in_flight(engine: &RecordingEngine, n: usize) {
    for _ in 0..200 {
        if engine.in_flight() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transcodes_are_serialized_by_default() {
    let h = TestHarness::build(RecordingEngine::gated(), |_| {}).await;
    for index in 1..=3 {
        h.submit(index).await.unwrap();
    }
    wait_for_in_flight(&h.engine, 1).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.engine.in_flight(), 1);
    assert_eq!(h.coordinator.progress().active, vec![1, 2, 3]);

    h.engine.release(10);
    h.coordinator.wait_idle().await;
    assert_eq!(h.engine.max_concurrent(), 1);
    assert_eq!(h.coordinator.progress().completed, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transcodes_run_concurrently_when_not_serialized() {
    let h = TestHarness::build(RecordingEngine::gated(), |c| {
        c.coordinator.serialize_transcodes = false;
    })
    .await;
    for index in 1..=3 {
        h.submit(index).await.unwrap();
    }
    wait_for_in_flight(&h.engine, 3).await;
    assert_eq!(h.engine.in_flight(), 3);

    h.engine.release(10);
    h.coordinator.wait_idle().await;
    assert_eq!(h.engine.max_concurrent(), 3);
}

// ---------------------------------------------------------------------------
// Completion and recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn finish_saves_result_and_removes_working_set() {
    let out = tempfile::tempdir().unwrap();
    let out_dir = out.path().join("results");
    let h = TestHarness::build(RecordingEngine::new(), |c| {
        c.storage.save_result_to = Some(out_dir.clone());
    })
    .await;
    h.submit_all(&[1, 2]).await;
    h.merged().await;

    let completion = h.coordinator.finish().await.unwrap();
    let saved = completion.saved_to.expect("saved copy");
    assert_eq!(saved, out_dir.join("result.mp4"));
    assert_eq!(std::fs::read(&saved).unwrap(), PLACEHOLDER);
    assert!(completion.cleaned_up);
    assert!(!h.work_dir().exists());

    let progress = h.coordinator.progress();
    assert_eq!(progress.received, 0);
    assert_eq!(progress.merge, MergeActivity::Idle);
}

#[tokio::test]
async fn finish_before_merge_is_rejected() {
    let h = TestHarness::new().await;
    h.submit_all(&[1]).await;
    let err = h.coordinator.finish().await.unwrap_err();
    assert_matches!(err, Error::Validation(_));
    assert!(h.coordinator.layout().canonical_clip(1).exists());
}

#[tokio::test]
async fn finish_keeps_working_set_when_intermediates_are_kept() {
    let h = TestHarness::build(RecordingEngine::new(), |c| {
        c.storage.delete_intermediate_files = false;
    })
    .await;
    h.submit_all(&[1]).await;
    let merged = h.merged().await;

    let completion = h.coordinator.finish().await.unwrap();
    assert!(!completion.cleaned_up);
    assert!(merged.exists());
    assert!(h.coordinator.layout().raw_clip(1).exists());
}

#[tokio::test]
async fn next_run_starts_clean_after_finish() {
    let h = TestHarness::new().await;
    h.submit_all(&[1]).await;
    h.merged().await;
    h.coordinator.finish().await.unwrap();
    assert!(!h.work_dir().exists());

    assert_eq!(
        h.coordinator.readiness().await.unwrap(),
        Readiness::ProcessingClips { pending: vec![] }
    );

    h.submit_all(&[1]).await;
    assert!(h.coordinator.layout().canonical_clip(1).exists());
    assert!(!h.coordinator.layout().pending_marker(1).exists());
}

#[tokio::test]
async fn state_is_recovered_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path().join("work"));
    std::fs::create_dir_all(layout.uploads_dir()).unwrap();
    std::fs::write(layout.canonical_clip(1), b"done").unwrap();
    std::fs::write(layout.canonical_clip(2), b"done").unwrap();
    std::fs::write(layout.pending_marker(3), b"").unwrap();

    let mut config = dayreel::config::Config::default();
    config.storage.work_dir = layout.root().to_path_buf();
    let coordinator = Coordinator::new(&config, Arc::new(RecordingEngine::new()));
    coordinator.prepare().await.unwrap();

    let progress = coordinator.progress();
    assert_eq!(progress.completed, 2);
    assert_eq!(progress.received, 3);
    assert_eq!(
        coordinator.readiness().await.unwrap(),
        Readiness::ProcessingClips { pending: vec![3] }
    );
}

#[tokio::test]
async fn completed_merge_is_served_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path().join("work"));
    std::fs::create_dir_all(layout.uploads_dir()).unwrap();
    std::fs::write(layout.merged_output(), b"merged").unwrap();

    let mut config = dayreel::config::Config::default();
    config.storage.work_dir = layout.root().to_path_buf();
    let engine = Arc::new(RecordingEngine::new());
    let coordinator = Coordinator::new(&config, engine.clone());
    coordinator.prepare().await.unwrap();

    assert_eq!(
        coordinator.readiness().await.unwrap(),
        Readiness::Ready(layout.merged_output())
    );
    assert!(engine.jobs().is_empty());
}
