//! Shared test harness: a coordinator over a temporary working directory
//! backed by the scripted [`RecordingEngine`].

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dayreel::config::Config;
use dayreel::coordinator::{Coordinator, Intake, Readiness};
use dayreel_av::testing::RecordingEngine;
use tempfile::TempDir;

pub struct TestHarness {
    pub dir: TempDir,
    pub config: Config,
    pub engine: Arc<RecordingEngine>,
    pub coordinator: Coordinator,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::build(RecordingEngine::new(), |_| {}).await
    }

    /// Harness whose config is adjusted by `tweak` before the coordinator
    /// is built.
    pub async fn build(engine: RecordingEngine, tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.storage.work_dir = dir.path().join("work");
        tweak(&mut config);

        let engine = Arc::new(engine);
        let coordinator = Coordinator::new(&config, engine.clone());
        coordinator.prepare().await.expect("prepare");

        Self {
            dir,
            config,
            engine,
            coordinator,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.config.storage.work_dir
    }

    /// Write a fake original clip outside the working set.
    pub fn source_clip(&self, index: u32) -> PathBuf {
        let dir = self.dir.path().join("originals");
        std::fs::create_dir_all(&dir).expect("originals dir");
        let path = dir.join(format!("{index}.mp4"));
        std::fs::write(&path, format!("raw clip {index}")).expect("write clip");
        path
    }

    /// Accept clip `index` from a fresh source file.
    pub async fn submit(&self, index: u32) -> dayreel_common::Result<()> {
        let source = self.source_clip(index);
        self.coordinator
            .accept_clip(index, &source, Intake::Copy)
            .await
    }

    /// Submit every index in order and wait for all workers.
    pub async fn submit_all(&self, indices: &[u32]) {
        for &index in indices {
            self.submit(index).await.expect("accept clip");
        }
        self.coordinator.wait_idle().await;
    }

    /// Drive readiness until the merged video exists.
    pub async fn merged(&self) -> PathBuf {
        for _ in 0..50 {
            match self.coordinator.readiness().await.expect("readiness") {
                Readiness::Ready(path) => return path,
                Readiness::Stalled(stall) => panic!("stalled: {stall}"),
                _ => self.coordinator.wait_idle().await,
            }
        }
        panic!("merged video never became ready");
    }
}

/// Let marker mtimes age past a zero grace period.
pub async fn age_markers() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
