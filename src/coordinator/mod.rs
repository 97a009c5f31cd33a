//! Filesystem Coordinator.
//!
//! Per-clip state lives in pending markers, merge state in the merge marker
//! and the merged artifact:
//!
//! | on disk                                   | meaning              |
//! |-------------------------------------------|----------------------|
//! | `uploads/<i>.lock`                        | clip `i` pending     |
//! | `uploads/<i>_processed.mp4`, no marker    | clip `i` done        |
//! | `process.lock`                            | merge locked/running |
//! | `combined_video.mp4`, no `process.lock`   | merge complete       |
//!
//! The merge is admitted lazily by [`Coordinator::readiness`]: when no
//! pending marker exists, the first caller to create `process.lock` starts
//! the one and only merge. Uploads write their pending marker before
//! checking the merge marker and the readiness query does the reverse, so a
//! clip can never slip in under a running merge.

pub mod markers;
pub mod progress;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use dayreel_av::{
    list_canonical_clips, merge, normalize_clip, ClipJob, MediaEngine, MergeSettings,
    NormalizeSettings,
};
use dayreel_common::{Error, Result, StorageLayout};
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::label::date_label;

pub use progress::{FailedClip, MergeActivity, Progress, ProgressSnapshot};

/// How an accepted clip's bytes reach the raw clip path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intake {
    /// Rename the source into place (uploads staged by the server).
    Move,
    /// Copy the source, leaving it untouched (replayed originals).
    Copy,
}

/// Answer to "is the merged video ready?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Clips are still pending, or none has been normalized yet.
    ProcessingClips { pending: Vec<u32> },
    /// This call won the merge lock and started the merge.
    MergeStarted,
    /// Someone else holds the merge lock.
    Merging,
    /// The merged artifact is complete.
    Ready(PathBuf),
    /// Markers nobody is working on have outlived the grace period.
    Stalled(Stall),
}

/// Work that stopped progressing and needs an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stall {
    pub clips: Vec<u32>,
    pub merge: bool,
}

impl fmt::Display for Stall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.clips.is_empty() {
            let list: Vec<String> = self.clips.iter().map(u32::to_string).collect();
            write!(f, "clips {} are stuck", list.join(", "))?;
            if self.merge {
                write!(f, "; ")?;
            }
        }
        if self.merge {
            write!(f, "merge is stuck")?;
        }
        Ok(())
    }
}

/// Outcome of [`Coordinator::finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Copy of the merged video outside the working set, if configured.
    pub saved_to: Option<PathBuf>,
    /// Whether the working set was deleted.
    pub cleaned_up: bool,
}

struct Inner {
    layout: StorageLayout,
    engine: Arc<dyn MediaEngine>,
    normalize: NormalizeSettings,
    merge: MergeSettings,
    start_date: NaiveDate,
    expected_total: Option<u32>,
    copy_originals_to: Option<PathBuf>,
    save_result_to: Option<PathBuf>,
    delete_working_set: bool,
    stall_grace: Duration,
    transcode_gate: Option<tokio::sync::Mutex<()>>,
    progress: Progress,
    tasks: TaskTracker,
    upload_seq: AtomicU64,
}

/// Tracks clips and the merge; cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(config: &Config, engine: Arc<dyn MediaEngine>) -> Self {
        let gate = config
            .coordinator
            .serialize_transcodes
            .then(|| tokio::sync::Mutex::new(()));

        Self {
            inner: Arc::new(Inner {
                layout: StorageLayout::new(&config.storage.work_dir),
                engine,
                normalize: config.normalize_settings(),
                merge: config.merge_settings(),
                start_date: config.clips.start_date,
                expected_total: config.clips.expected_total,
                copy_originals_to: config.clips.copy_originals_to.clone(),
                save_result_to: config.storage.save_result_to.clone(),
                delete_working_set: config.storage.delete_intermediate_files,
                stall_grace: config.coordinator.stall_grace(),
                transcode_gate: gate,
                progress: Progress::new(config.clips.expected_total),
                tasks: TaskTracker::new(),
                upload_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.inner.layout
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.inner.progress.snapshot()
    }

    /// Create the working directories and rebuild counters from disk.
    pub async fn prepare(&self) -> Result<()> {
        let layout = &self.inner.layout;
        tokio::fs::create_dir_all(layout.uploads_dir()).await?;
        tokio::fs::create_dir_all(layout.incoming_dir()).await?;

        let canonical: Vec<u32> = list_canonical_clips(&layout.uploads_dir())?
            .into_iter()
            .map(|(index, _)| index)
            .collect();
        let pending = markers::pending_indices(&layout.uploads_dir())?;
        self.inner.progress.restore(&canonical, &pending);

        if !canonical.is_empty() {
            tracing::info!(
                "Recovered {} canonical clips from {}",
                canonical.len(),
                layout.root().display()
            );
        }
        if !pending.is_empty() {
            tracing::warn!(
                "Clips {:?} were left pending by an earlier run; resubmit them or remove their markers",
                pending
            );
        }
        if layout.merge_marker().exists() {
            tracing::warn!(
                "Merge marker {} is present from an earlier run",
                layout.merge_marker().display()
            );
        }
        Ok(())
    }

    /// Set the expected number of clips. Overrides the configured total.
    pub fn set_total(&self, total: u32) -> Result<()> {
        if total == 0 {
            return Err(Error::Validation("total must be at least 1".to_string()));
        }
        self.inner.progress.set_total(total);
        tracing::info!("Expecting {} clips", total);
        Ok(())
    }

    /// Fresh staging path for an upload whose index is not known yet.
    pub fn staging_path(&self) -> PathBuf {
        let n = self.inner.upload_seq.fetch_add(1, Ordering::Relaxed);
        self.inner.layout.incoming_upload(n)
    }

    /// Accept the raw bytes of clip `index` from `source` and start
    /// normalizing it in the background.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for index 0, a clip that already has a worker,
    /// a clip that is already done, or an upload arriving after the merge
    /// started. I/O errors if the bytes cannot be placed. A rejected upload
    /// leaves the clip's marker as it found it.
    pub async fn accept_clip(&self, index: u32, source: &Path, intake: Intake) -> Result<()> {
        let label = date_label(self.inner.start_date, index)?;

        if !self.inner.progress.begin_clip(index) {
            return Err(Error::Validation(format!(
                "clip {index} is already being processed"
            )));
        }

        if let Err(e) = self.stage_clip(index, source, intake).await {
            self.inner.progress.abandon_clip(index);
            return Err(e);
        }
        self.inner.progress.receive_clip(index);

        let this = self.clone();
        self.inner
            .tasks
            .spawn(async move { this.run_clip(index, label).await });
        Ok(())
    }

    async fn stage_clip(&self, index: u32, source: &Path, intake: Intake) -> Result<()> {
        let layout = self.inner.layout.clone();
        let created = blocking(move || reserve_clip(&layout, index)).await?;

        let raw = self.inner.layout.raw_clip(index);
        if let Err(e) = place(source, &raw, intake).await {
            if created {
                let marker = self.inner.layout.pending_marker(index);
                blocking(move || markers::release(&marker)).await?;
            }
            return Err(e.into());
        }

        if let Some(dir) = &self.inner.copy_originals_to {
            let copy = dir.join(format!("{index}.mp4"));
            let kept = async {
                tokio::fs::create_dir_all(dir).await?;
                tokio::fs::copy(&raw, &copy).await
            };
            if let Err(e) = kept.await {
                tracing::warn!(index, "Could not keep original at {}: {}", copy.display(), e);
            }
        }
        Ok(())
    }

    async fn run_clip(&self, index: u32, label: String) {
        let _turn = match &self.inner.transcode_gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };

        let job = ClipJob::new(&self.inner.layout, index, label);
        match normalize_clip(self.inner.engine.as_ref(), &job, &self.inner.normalize).await {
            Ok(_) => self.inner.progress.complete_clip(index),
            Err(e) => {
                tracing::error!(index, "Clip normalization failed, marker kept: {}", e);
                self.inner.progress.fail_clip(index, e.to_string());
            }
        }
    }

    /// Report readiness, starting the merge if every clip is done.
    pub async fn readiness(&self) -> Result<Readiness> {
        let this = self.clone();
        blocking(move || this.assess()).await
    }

    /// Marker scans behind [`readiness`](Self::readiness). Runs on the
    /// blocking pool.
    fn assess(&self) -> Result<Readiness> {
        let layout = &self.inner.layout;
        let uploads = layout.uploads_dir();

        let pending = markers::pending_indices(&uploads)?;
        if !pending.is_empty() {
            let stalled = self.stalled_clips(&pending)?;
            if !stalled.is_empty() {
                return Ok(Readiness::Stalled(Stall {
                    clips: stalled,
                    merge: false,
                }));
            }
            return Ok(Readiness::ProcessingClips { pending });
        }

        let merge_marker = layout.merge_marker();
        let output = layout.merged_output();

        if merge_marker.exists() {
            return self.merge_in_progress();
        }
        if output.exists() {
            return Ok(Readiness::Ready(output));
        }
        if list_canonical_clips(&uploads)?.is_empty() {
            // A merge may have committed and consumed its inputs meanwhile.
            if output.exists() {
                return Ok(Readiness::Ready(output));
            }
            return Ok(Readiness::ProcessingClips {
                pending: Vec::new(),
            });
        }

        if !markers::try_acquire(&merge_marker)? {
            return self.merge_in_progress();
        }

        // The state may have moved between the checks and the acquire.
        if output.exists() {
            markers::release(&merge_marker)?;
            return Ok(Readiness::Ready(output));
        }
        let pending = markers::pending_indices(&uploads)?;
        if !pending.is_empty() {
            markers::release(&merge_marker)?;
            return Ok(Readiness::ProcessingClips { pending });
        }

        tracing::info!("All clips normalized, starting merge");
        self.inner.progress.begin_merge();
        let this = self.clone();
        self.inner.tasks.spawn(async move { this.run_merge().await });
        Ok(Readiness::MergeStarted)
    }

    fn merge_in_progress(&self) -> Result<Readiness> {
        if self.inner.progress.merge_running() {
            return Ok(Readiness::Merging);
        }
        match markers::age(&self.inner.layout.merge_marker())? {
            Some(age) if age > self.inner.stall_grace => Ok(Readiness::Stalled(Stall {
                clips: Vec::new(),
                merge: true,
            })),
            _ => Ok(Readiness::Merging),
        }
    }

    fn stalled_clips(&self, pending: &[u32]) -> Result<Vec<u32>> {
        let mut stalled = Vec::new();
        for &index in pending {
            if self.inner.progress.is_active(index) {
                continue;
            }
            let marker = self.inner.layout.pending_marker(index);
            if let Some(age) = markers::age(&marker)? {
                if age > self.inner.stall_grace {
                    stalled.push(index);
                }
            }
        }
        Ok(stalled)
    }

    async fn run_merge(&self) {
        let _turn = match &self.inner.transcode_gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };

        let layout = &self.inner.layout;
        let result = merge(
            self.inner.engine.as_ref(),
            &layout.uploads_dir(),
            &layout.manifest(),
            &layout.merged_output(),
            &self.inner.merge,
        )
        .await;

        match result {
            Ok(outcome) => {
                if let Err(e) = markers::release(&layout.merge_marker()) {
                    tracing::error!("Merged video written but merge marker not cleared: {}", e);
                }
                tracing::info!(
                    "Merged {} clips into {}",
                    outcome.clips.len(),
                    outcome.output.display()
                );
                self.inner.progress.finish_merge(Ok(()));
            }
            Err(e) => {
                tracing::error!("Merge failed, merge marker kept: {}", e);
                self.inner.progress.finish_merge(Err(e.to_string()));
            }
        }
    }

    /// Wait for every background worker started so far.
    pub async fn wait_idle(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    /// Deliver the merged video and tear the run down.
    ///
    /// Copies the result to `save_result_to/result.mp4` when configured,
    /// deletes the working set when intermediate files are not kept, and
    /// resets progress.
    pub async fn finish(&self) -> Result<Completion> {
        if self.inner.progress.has_active_work() {
            return Err(Error::Validation(
                "processing is still running".to_string(),
            ));
        }

        let layout = &self.inner.layout;
        let output = layout.merged_output();
        let locked = tokio::fs::try_exists(layout.merge_marker()).await?;
        if locked || !tokio::fs::try_exists(&output).await? {
            return Err(Error::Validation(
                "there is no completed merged video yet".to_string(),
            ));
        }

        let saved_to = match &self.inner.save_result_to {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                let dest = dir.join("result.mp4");
                tokio::fs::copy(&output, &dest).await?;
                tracing::info!("Saved result to {}", dest.display());
                Some(dest)
            }
            None => None,
        };

        if self.inner.delete_working_set {
            match tokio::fs::remove_dir_all(layout.root()).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            tracing::info!("Removed working set {}", layout.root().display());
        }

        self.inner.progress.reset(self.inner.expected_total);
        Ok(Completion {
            saved_to,
            cleaned_up: self.inner.delete_working_set,
        })
    }
}

/// Write clip `index`'s pending marker unless the clip is already done or
/// the merge has begun. Returns whether this call created the marker.
fn reserve_clip(layout: &StorageLayout, index: u32) -> Result<bool> {
    std::fs::create_dir_all(layout.uploads_dir())?;
    let marker = layout.pending_marker(index);
    let created = !marker.exists();

    if created && layout.canonical_clip(index).exists() {
        return Err(Error::Validation(format!("clip {index} is already done")));
    }

    markers::touch(&marker)?;
    if layout.merge_marker().exists() || layout.merged_output().exists() {
        if created {
            markers::release(&marker)?;
        }
        return Err(Error::Validation(
            "the merge has already started; no more clips are accepted".to_string(),
        ));
    }
    Ok(created)
}

/// Run marker and directory scans on the blocking pool.
async fn blocking<T, E, F>(f: F) -> Result<T>
where
    F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<Error> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("filesystem task failed: {e}")))?
        .map_err(Into::into)
}

/// Put `source` at `dest`. A move falls back to copy+remove across
/// filesystems.
async fn place(source: &Path, dest: &Path, intake: Intake) -> std::io::Result<()> {
    match intake {
        Intake::Copy => tokio::fs::copy(source, dest).await.map(|_| ()),
        Intake::Move => {
            if tokio::fs::rename(source, dest).await.is_err() {
                tokio::fs::copy(source, dest).await?;
                let _ = tokio::fs::remove_file(source).await;
            }
            Ok(())
        }
    }
}
