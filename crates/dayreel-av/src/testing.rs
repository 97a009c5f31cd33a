//! In-process [`MediaEngine`] for tests.
//!
//! [`RecordingEngine`] never runs ffmpeg. Probes come from canned results
//! (or a default portrait SDR clip with audio), every transcode is recorded
//! and writes a small placeholder file, and the engine can be scripted to
//! fail or to hold transcodes until the test releases them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dayreel_common::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::engine::{MediaEngine, TranscodeJob};
use crate::probe::{ClipProbe, ColorTags};

/// Bytes written to every output the engine "produces".
pub const PLACEHOLDER: &[u8] = b"dayreel placeholder video";

/// Scripted media engine. See the module docs.
pub struct RecordingEngine {
    probes: Mutex<HashMap<PathBuf, ClipProbe>>,
    default_probe: Mutex<ClipProbe>,
    jobs: Mutex<Vec<TranscodeJob>>,
    failing_stages: Mutex<Vec<String>>,
    failing_outputs: Mutex<Vec<String>>,
    gate: Option<Semaphore>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingEngine {
    /// Engine that completes every transcode immediately.
    pub fn new() -> Self {
        Self {
            probes: Mutex::new(HashMap::new()),
            default_probe: Mutex::new(ClipProbe {
                width: Some(1080),
                height: Some(1920),
                color: ColorTags::bt709(),
                audio_streams: 1,
                duration: Some(1.0),
                ..Default::default()
            }),
            jobs: Mutex::new(Vec::new()),
            failing_stages: Mutex::new(Vec::new()),
            failing_outputs: Mutex::new(Vec::new()),
            gate: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Engine whose transcodes block until [`release`](Self::release) hands
    /// out permits.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    /// Let `n` held (or future) transcodes proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Canned probe result for `path`.
    pub fn set_probe(&self, path: &Path, probe: ClipProbe) {
        self.probes.lock().insert(
            path.to_path_buf(),
            ClipProbe {
                path: path.to_path_buf(),
                ..probe
            },
        );
    }

    /// Probe returned for files without a canned result.
    pub fn set_default_probe(&self, probe: ClipProbe) {
        *self.default_probe.lock() = probe;
    }

    /// Metadata the engine attributes to `path`, if it has any.
    pub fn probe_of(&self, path: &Path) -> Option<ClipProbe> {
        self.probes.lock().get(path).cloned()
    }

    /// Fail every transcode of the named stage (`audio-repair`, `tonemap`,
    /// `final`, `merge`).
    pub fn fail_stage(&self, stage: &str) {
        self.failing_stages.lock().push(stage.to_string());
    }

    /// Fail every transcode whose output file name contains `fragment`.
    pub fn fail_output_containing(&self, fragment: &str) {
        self.failing_outputs.lock().push(fragment.to_string());
    }

    /// Stop failing anything.
    pub fn clear_failures(&self) {
        self.failing_stages.lock().clear();
        self.failing_outputs.lock().clear();
    }

    /// Every transcode started so far, in order.
    pub fn jobs(&self) -> Vec<TranscodeJob> {
        self.jobs.lock().clone()
    }

    /// Stage names of [`jobs`](Self::jobs).
    pub fn stages(&self) -> Vec<String> {
        self.jobs.lock().iter().map(|j| j.stage.clone()).collect()
    }

    pub fn clear_jobs(&self) {
        self.jobs.lock().clear();
    }

    /// Highest number of transcodes that ran at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Transcodes currently running (or held at the gate).
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn lookup(&self, path: &Path) -> ClipProbe {
        self.probes.lock().get(path).cloned().unwrap_or_else(|| ClipProbe {
            path: path.to_path_buf(),
            ..self.default_probe.lock().clone()
        })
    }

    fn should_fail(&self, job: &TranscodeJob) -> bool {
        if self.failing_stages.lock().iter().any(|s| *s == job.stage) {
            return true;
        }
        let name = job
            .output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.failing_outputs.lock().iter().any(|f| name.contains(f.as_str()))
    }

    /// Metadata of what `job` would have produced from its first input.
    fn derive_output_probe(&self, job: &TranscodeJob) -> ClipProbe {
        let mut probe = job
            .primary_input()
            .map(|input| self.lookup(Path::new(input)))
            .unwrap_or_else(|| self.default_probe.lock().clone());

        if job.output_option("-c:a").is_some() {
            probe.audio_streams = 1;
        }
        if job.video_filter.as_deref().is_some_and(|vf| vf.contains("tonemap")) {
            probe.color = ColorTags::bt709();
        }
        if job.output_option("-c:v") != Some("copy") {
            probe.rotation = None;
        }
        if let Some(t) = job.output_option("-t").and_then(|t| t.parse::<f64>().ok()) {
            probe.duration = Some(probe.duration.map_or(t, |d| d.min(t)));
        }
        probe
    }

    fn register_output(&self, output: &Path, probe: ClipProbe) {
        let mut probes = self.probes.lock();
        // Outputs written to `x.partial.mp4` are renamed to `x.mp4`.
        if let Some(name) = output.file_name().map(|n| n.to_string_lossy().to_string()) {
            if name.contains(".partial.") {
                let committed = output.with_file_name(name.replacen(".partial", "", 1));
                probes.insert(
                    committed.clone(),
                    ClipProbe {
                        path: committed,
                        ..probe.clone()
                    },
                );
            }
        }
        probes.insert(
            output.to_path_buf(),
            ClipProbe {
                path: output.to_path_buf(),
                ..probe
            },
        );
    }
}

#[async_trait]
impl MediaEngine for RecordingEngine {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn probe(&self, path: &Path) -> Result<ClipProbe> {
        if !path.exists() {
            return Err(Error::media_engine(
                "ffprobe",
                format!("{}: No such file or directory", path.display()),
            ));
        }
        Ok(self.lookup(path))
    }

    async fn transcode(&self, job: &TranscodeJob) -> Result<()> {
        self.jobs.lock().push(job.clone());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let result = self.run(job).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl RecordingEngine {
    async fn run(&self, job: &TranscodeJob) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| Error::Internal(e.to_string()))?
                .forget();
        }

        if let Some(parent) = job.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if self.should_fail(job) {
            // A crashed encoder usually leaves a truncated file behind.
            tokio::fs::write(&job.output, b"trunc").await?;
            return Err(Error::media_engine(
                "ffmpeg",
                format!("exited with status 1: scripted failure in {}", job.stage),
            ));
        }

        tokio::fs::write(&job.output, PLACEHOLDER).await?;
        let probe = self.derive_output_probe(job);
        self.register_output(&job.output, probe);
        Ok(())
    }
}
