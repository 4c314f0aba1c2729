// src/lib.rs
// Public library surface for binaries and integration tests.

pub mod api;
pub mod classifier;
pub mod config;
pub mod detection;
pub mod error;
pub mod heuristic;
pub mod labels;
pub mod metrics;
pub mod pipeline;
pub mod reconcile;
pub mod scores;
pub mod vision;
pub mod vision_bootstrap;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::classifier::{classify, ClassificationResult, ImageInput, ModelBackend};
pub use crate::config::{PipelineConfig, VisionConfig};
pub use crate::detection::{DetectionChain, DetectionResult, DetectionSource, Strategy};
pub use crate::heuristic::{evaluate, RuleSet, Verdict};
pub use crate::labels::{Label, Maturity};
pub use crate::pipeline::Pipeline;
pub use crate::reconcile::reconcile;
pub use crate::scores::{softmax, ScoreStatistics, ScoreVector};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact tracing for binaries. `RUST_LOG` wins over the default filter.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dragonfruit=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

/// Short SHA-256 prefix used to identify images in logs.
pub fn anon_hash(bytes: impl AsRef<[u8]>) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(bytes.as_ref());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anon_hash_is_short_and_stable() {
        let a = anon_hash(b"dragon fruit");
        assert_eq!(a.len(), 12);
        assert_eq!(a, anon_hash(b"dragon fruit".to_vec()));
        assert_ne!(a, anon_hash(b"apple"));
    }
}
