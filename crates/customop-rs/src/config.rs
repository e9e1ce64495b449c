//! Engine configuration resolved from the environment or supplied explicitly.

use serde::{Deserialize, Serialize};

/// Worker cap used when `CUSTOMOP_NUM_THREADS` is unset or invalid.
pub const DEFAULT_MAX_WORKERS: usize = 16;

/// Selects how pushed work is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// No background scheduler exists; work runs inline on the pushing thread.
    Naive,
    /// Work is queued and executed by a lazily grown worker pool.
    #[default]
    Pooled,
}

/// Runtime knobs for [`CustomOpEngine`](crate::CustomOpEngine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,
    /// Upper bound on worker threads. The pool never shrinks below what it reached.
    pub max_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            kind: EngineKind::Pooled,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

impl EngineConfig {
    /// Reads `CUSTOMOP_ENGINE_TYPE` and `CUSTOMOP_NUM_THREADS`, once per process.
    pub fn from_env() -> Self {
        EngineConfig {
            kind: crate::env::engine_kind(),
            max_workers: crate::env::max_workers(),
        }
    }

    pub fn naive() -> Self {
        EngineConfig {
            kind: EngineKind::Naive,
            ..EngineConfig::default()
        }
    }

    pub fn pooled(max_workers: usize) -> Self {
        EngineConfig {
            kind: EngineKind::Pooled,
            max_workers,
        }
    }

    pub fn is_naive(&self) -> bool {
        self.kind == EngineKind::Naive
    }

    /// Replaces a zero worker cap, which would leave pooled tasks unserved, with the default.
    pub(crate) fn normalized(self) -> Self {
        if self.kind == EngineKind::Pooled && self.max_workers == 0 {
            tracing::warn!(
                default = DEFAULT_MAX_WORKERS,
                "worker cap of zero is not usable; falling back to default"
            );
            return EngineConfig {
                max_workers: DEFAULT_MAX_WORKERS,
                ..self
            };
        }
        self
    }
}
