//! Boundary to the embedding provider: vector files aligned with chunk lists, the
//! `Embedder` trait, and bounded-time calls with a single retry on transient failures.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::MatchError;
use crate::textutil::normalize;

/// Vectors for one document, index-aligned with its chunk list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorSet {
    #[serde(default)]
    pub doc_id: String,
    pub dimension: usize,
    pub vectors: Vec<Vec<f32>>,
}

impl VectorSet {
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string(self).context("serialize vectors")?;
        fs::write(path, json).with_context(|| format!("write vectors: {}", path.display()))?;
        Ok(())
    }

    /// Check that there is one vector per chunk and every vector has `dimension` entries.
    pub fn check_aligned(&self, chunks: usize) -> Result<(), MatchError> {
        if self.vectors.len() != chunks {
            return Err(MatchError::LengthMismatch {
                chunks,
                vectors: self.vectors.len(),
            });
        }
        for (index, v) in self.vectors.iter().enumerate() {
            if v.len() != self.dimension {
                return Err(MatchError::DimensionMismatch {
                    expected: self.dimension,
                    found: v.len(),
                    index,
                });
            }
        }
        Ok(())
    }
}

/// Text → fixed-length vector.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn embed(&self, text: &str) -> io::Result<Vec<f32>>;
}

/// Deterministic lexical embedder: normalized tokens hashed into `dimension` signed
/// buckets, L2-normalized. Identical texts get identical vectors.
#[derive(Clone, Debug)]
pub struct HashedBagOfWords {
    dimension: usize,
}

impl HashedBagOfWords {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for HashedBagOfWords {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashedBagOfWords {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> io::Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dimension];
        let normalized = normalize(text);
        for token in normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub retry_transient: bool,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_transient: true,
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Run `op` on a worker thread and wait at most `timeout` for it.
///
/// Timed-out work is abandoned, not cancelled: the worker keeps running detached, so a
/// retry may overlap it and the callee must tolerate concurrent calls.
pub fn call_with_timeout<T, F>(timeout: Duration, op: F) -> io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(op());
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no response within {timeout:?}"),
        )),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(io::Error::new(
            io::ErrorKind::Other,
            "worker exited without a result",
        )),
    }
}

/// Bounded call with one retry when the first attempt fails transiently.
pub fn call_bounded<T, F>(policy: CallPolicy, what: &str, op: F) -> io::Result<T>
where
    T: Send + 'static,
    F: Fn() -> io::Result<T> + Send + Sync + 'static,
{
    let op = Arc::new(op);
    let first = {
        let op = Arc::clone(&op);
        call_with_timeout(policy.timeout, move || op())
    };
    match first {
        Err(e) if policy.retry_transient && is_transient(&e) => {
            warn!(what, error = %e, "transient failure, retrying once");
            call_with_timeout(policy.timeout, move || op())
        }
        other => other,
    }
}

/// Embed every text through `embedder` as one bounded call.
pub fn embed_texts(
    embedder: Arc<dyn Embedder>,
    doc_id: &str,
    texts: Vec<String>,
    policy: CallPolicy,
) -> anyhow::Result<VectorSet> {
    let dimension = embedder.dimension();
    let texts = Arc::new(texts);
    let vectors = call_bounded(policy, "embed", move || {
        texts.iter().map(|t| embedder.embed(t)).collect::<io::Result<Vec<_>>>()
    })
    .with_context(|| format!("embed chunks of {doc_id}"))?;
    Ok(VectorSet {
        doc_id: doc_id.to_string(),
        dimension,
        vectors,
    })
}

/// Read a vector file as a bounded call.
pub fn load_bounded(path: &Path, policy: CallPolicy) -> anyhow::Result<VectorSet> {
    let owned = path.to_path_buf();
    let text = call_bounded(policy, "read vectors", move || fs::read_to_string(&owned))
        .with_context(|| format!("read vectors: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse vectors json: {}", path.display()))
}
