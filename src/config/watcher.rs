//! Polling-based bundle watcher.
//!
//! Re-resolves the configured bundle (fixed name or latest run) every
//! `bundles.watch_interval_secs`. A bundle counts as new when the resolved
//! directory changes or its `algo_meta.json` is rewritten. Changes are
//! debounced for 500ms, because trainers write the bundle files in stages,
//! and then reported on an mpsc channel. The receiver decides whether to
//! publish the bundle, and hands back any directory that failed to load so
//! the next poll reports it again.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::bundle;

/// Events emitted by the bundle watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleEvent {
    /// A new or rewritten bundle directory is ready to load.
    NewBundle(PathBuf),
    /// The configured bundle can no longer be resolved (old generation stays active).
    Error(String),
}

/// Debounce delay after detecting a change.
const DEBOUNCE_DELAY: Duration = Duration::from_millis(500);

/// Identity of a resolved bundle: where it lives and when its metadata was written.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    dir: PathBuf,
    meta_mtime: Option<SystemTime>,
}

impl Fingerprint {
    fn of(dir: PathBuf) -> Self {
        let meta_mtime = get_mtime(&dir.join(bundle::ALGO_META_FILE));
        Self { dir, meta_mtime }
    }
}

/// Tracks the last bundle the watcher reported.
#[derive(Debug)]
pub struct BundleWatcher {
    base_dir: PathBuf,
    bundle: Option<String>,
    last: Option<Fingerprint>,
    missing_reported: bool,
}

impl BundleWatcher {
    /// `current` is the bundle already being served, if any; it is not reported again.
    pub fn new(base_dir: PathBuf, bundle: Option<String>, current: Option<PathBuf>) -> Self {
        Self {
            base_dir,
            bundle,
            last: current.map(Fingerprint::of),
            missing_reported: false,
        }
    }

    fn resolve(&self) -> Option<Fingerprint> {
        bundle::locate(&self.base_dir, self.bundle.as_deref()).map(Fingerprint::of)
    }

    /// One poll: returns the candidate fingerprint when it differs from the last reported one.
    fn detect(&mut self) -> Result<Option<Fingerprint>, String> {
        match self.resolve() {
            Some(fp) => {
                self.missing_reported = false;
                if self.last.as_ref() == Some(&fp) {
                    Ok(None)
                } else {
                    Ok(Some(fp))
                }
            }
            None if !self.missing_reported => {
                self.missing_reported = true;
                Err(match &self.bundle {
                    Some(name) => format!(
                        "bundle '{}' not found under {}",
                        name,
                        self.base_dir.display()
                    ),
                    None => format!("no run directory found under {}", self.base_dir.display()),
                })
            }
            None => Ok(None),
        }
    }

    /// Drop the record of `dir` so the next poll reports it again.
    /// A different bundle reported since then is left alone.
    pub fn forget(&mut self, dir: &Path) {
        if self.last.as_ref().is_some_and(|fp| fp.dir == dir) {
            self.last = None;
        }
    }

    /// Poll without debouncing. Used by the async loop and by tests.
    pub fn poll(&mut self) -> Option<BundleEvent> {
        match self.detect() {
            Ok(Some(fp)) => {
                let dir = fp.dir.clone();
                self.last = Some(fp);
                Some(BundleEvent::NewBundle(dir))
            }
            Ok(None) => None,
            Err(msg) => Some(BundleEvent::Error(msg)),
        }
    }
}

/// Run the bundle watcher loop.
///
/// Sends events on `tx`. Directories received on `failed` are retried on the
/// following poll. Returns when the channel is closed or `cancel` fires.
pub async fn run_bundle_watcher(
    mut watcher: BundleWatcher,
    interval: Duration,
    tx: mpsc::Sender<BundleEvent>,
    mut failed: mpsc::Receiver<PathBuf>,
    cancel: CancellationToken,
) {
    tracing::info!(
        base_dir = %watcher.base_dir.display(),
        interval_secs = interval.as_secs(),
        "Bundle watcher started"
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("Bundle watcher cancelled");
                return;
            }
            () = tokio::time::sleep(interval) => {}
        }

        while let Ok(dir) = failed.try_recv() {
            tracing::debug!(bundle = %dir.display(), "Retrying bundle that failed to load");
            watcher.forget(&dir);
        }

        let event = match watcher.detect() {
            Ok(None) => continue,
            Ok(Some(candidate)) => {
                tokio::time::sleep(DEBOUNCE_DELAY).await;
                // Still being written; pick it up on the next cycle
                if watcher.resolve().as_ref() != Some(&candidate) {
                    continue;
                }
                tracing::info!(bundle = %candidate.dir.display(), "New bundle detected");
                let dir = candidate.dir.clone();
                watcher.last = Some(candidate);
                BundleEvent::NewBundle(dir)
            }
            Err(msg) => {
                tracing::warn!(error = %msg, "Bundle watcher could not resolve a bundle, keeping current generation");
                BundleEvent::Error(msg)
            }
        };

        if tx.send(event).await.is_err() {
            tracing::debug!("Bundle watcher channel closed, stopping");
            return;
        }
    }
}

/// Read the modification time of a file, returning None on any error.
fn get_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}
