//! Cache manager: persisted records plus the in-flight build map.
//!
//! ## On-disk layout
//!
//! ```text
//! <cache_dir>/
//! ├── records/<fingerprint>.json   one CacheRecord per successful build
//! └── work/<fp-prefix>XXXXXX/      scratch directory of a running build
//! ```
//!
//! Records are written once and never updated in place; a changed
//! fingerprint is a new record. Eviction belongs to whoever cleans up the
//! cache directory, never to the pipeline.
//!
//! ## Single builder per fingerprint
//!
//! The in-flight map holds one `watch` channel per fingerprint being built.
//! [`CacheManager::acquire_or_join`] checks and inserts under the same lock,
//! so exactly one caller gets a [`BuildTicket`]; everyone else gets a
//! [`BuildWaiter`] that resolves to the builder's outcome. Dropping a ticket
//! without settling it releases waiters with an error instead of leaving
//! them hanging.

use crate::error::RenderError;
use crate::fingerprint::{hex_digest, Fingerprint};
use crate::process::ProcessOutput;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Persisted description of one successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub fingerprint: Fingerprint,
    /// Where the final SVG was written.
    pub artifact_path: PathBuf,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    /// SHA-256 of the normalised source.
    pub source_hash: String,
    /// SHA-256 of the artifact bytes, used to detect overwritten files.
    pub artifact_hash: String,
}

/// Result of a finished build, shared with every joined waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    pub artifact_path: PathBuf,
    pub svg: String,
    /// Recovered problems (e.g. optimizer fallback).
    pub warnings: Vec<String>,
    /// Output of every process the build ran, in order.
    pub logs: Vec<ProcessOutput>,
}

pub type BuildOutcome = Result<Arc<BuildArtifact>, RenderError>;

/// Either the right to build or a handle on someone else's build.
#[derive(Debug)]
pub enum Acquisition {
    Builder(BuildTicket),
    Waiter(BuildWaiter),
}

/// Owns the fingerprint → record mapping and the in-flight map.
#[derive(Debug)]
pub struct CacheManager {
    cache_dir: PathBuf,
    in_flight: Mutex<HashMap<Fingerprint, watch::Sender<Option<BuildOutcome>>>>,
}

impl CacheManager {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn record_path(&self, fp: &Fingerprint) -> PathBuf {
        self.cache_dir.join("records").join(format!("{fp}.json"))
    }

    /// Root under which per-build work directories are created.
    pub fn work_root(&self) -> PathBuf {
        self.cache_dir.join("work")
    }

    /// Load the record for `fp`.
    ///
    /// Any problem (missing file, bad JSON, mismatched key) is a miss; a
    /// damaged record must never fail a build.
    pub async fn lookup(&self, fp: &Fingerprint) -> Option<CacheRecord> {
        let path = self.record_path(fp);
        let bytes = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice::<CacheRecord>(&bytes) {
            Ok(record) if &record.fingerprint == fp => Some(record),
            Ok(_) => {
                warn!("cache record {} names a different fingerprint; ignoring", path.display());
                None
            }
            Err(e) => {
                warn!("unreadable cache record {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Load the record for `fp` and its artifact, verifying both.
    ///
    /// Returns `None` if the record is absent, belongs to different source
    /// text, or the artifact is missing or no longer matches its hash.
    pub async fn load_hit(&self, fp: &Fingerprint, source_hash: &str) -> Option<(CacheRecord, String)> {
        let record = self.lookup(fp).await?;
        if record.source_hash != source_hash {
            warn!("cache record {} has a different source hash; rebuilding", fp.short());
            return None;
        }
        let svg = tokio::fs::read_to_string(&record.artifact_path).await.ok()?;
        if hex_digest(svg.as_bytes()) != record.artifact_hash {
            debug!(
                "artifact {} changed since it was recorded; rebuilding",
                record.artifact_path.display()
            );
            return None;
        }
        Some((record, svg))
    }

    /// Become the builder for `fp`, or join the build already in flight.
    pub fn acquire_or_join(self: &Arc<Self>, fp: &Fingerprint) -> Acquisition {
        let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = map.get(fp) {
            return Acquisition::Waiter(BuildWaiter {
                fingerprint: fp.clone(),
                rx: tx.subscribe(),
            });
        }
        let (tx, _rx) = watch::channel(None);
        map.insert(fp.clone(), tx);
        Acquisition::Builder(BuildTicket {
            manager: Arc::clone(self),
            fingerprint: fp.clone(),
            settled: false,
        })
    }

    /// Number of fingerprints currently being built.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn write_record(&self, record: &CacheRecord) -> Result<(), RenderError> {
        let path = self.record_path(&record.fingerprint);
        let dir = self.cache_dir.join("records");
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RenderError::io(&dir, e))?;

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| RenderError::Internal(format!("failed to encode cache record: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| RenderError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| RenderError::io(&path, e))
    }

    fn settle(&self, fp: &Fingerprint, outcome: BuildOutcome) {
        let tx = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(fp);
        match tx {
            Some(tx) => {
                let waiters = tx.receiver_count();
                if waiters > 0 {
                    debug!("releasing {} waiter(s) for {}", waiters, fp.short());
                }
                tx.send_replace(Some(outcome));
            }
            None => warn!("settled {} but no build was in flight", fp.short()),
        }
    }
}

/// The exclusive right to build one fingerprint.
///
/// Settle it with [`commit`](Self::commit) or [`fail`](Self::fail).
#[derive(Debug)]
pub struct BuildTicket {
    manager: Arc<CacheManager>,
    fingerprint: Fingerprint,
    settled: bool,
}

impl BuildTicket {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Record a successful build and release all waiters with it.
    ///
    /// With `persist` off nothing is written; the artifact is still
    /// delivered. A record that cannot be written is downgraded to a
    /// warning on the artifact.
    pub async fn commit(
        mut self,
        mut artifact: BuildArtifact,
        source_hash: String,
        persist: bool,
    ) -> Arc<BuildArtifact> {
        if persist {
            let record = CacheRecord {
                fingerprint: self.fingerprint.clone(),
                artifact_path: artifact.artifact_path.clone(),
                created_at: unix_now(),
                source_hash,
                artifact_hash: hex_digest(artifact.svg.as_bytes()),
            };
            if let Err(e) = self.manager.write_record(&record).await {
                warn!("could not persist cache record for {}: {}", self.fingerprint.short(), e);
                artifact.warnings.push(format!("cache record not written: {e}"));
            }
        }

        let artifact = Arc::new(artifact);
        self.manager
            .settle(&self.fingerprint, Ok(Arc::clone(&artifact)));
        self.settled = true;
        artifact
    }

    /// Release all waiters with `err`. Nothing is cached.
    pub fn fail(mut self, err: RenderError) {
        self.manager.settle(&self.fingerprint, Err(err));
        self.settled = true;
    }
}

impl Drop for BuildTicket {
    fn drop(&mut self) {
        if !self.settled {
            self.manager.settle(
                &self.fingerprint,
                Err(RenderError::Internal(format!(
                    "build for {} was abandoned before completion",
                    self.fingerprint.short()
                ))),
            );
        }
    }
}

/// A joined request waiting on another caller's build.
#[derive(Debug)]
pub struct BuildWaiter {
    fingerprint: Fingerprint,
    rx: watch::Receiver<Option<BuildOutcome>>,
}

impl BuildWaiter {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Wait for the builder to settle.
    pub async fn wait(mut self) -> BuildOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or_else(|| Err(abandoned(&self.fingerprint))),
            Err(_) => Err(abandoned(&self.fingerprint)),
        }
    }
}

fn abandoned(fp: &Fingerprint) -> RenderError {
    RenderError::Internal(format!("builder for {} went away without a result", fp.short()))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
