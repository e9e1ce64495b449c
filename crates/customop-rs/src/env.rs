use std::env;
use std::sync::OnceLock;

use crate::config::{EngineKind, DEFAULT_MAX_WORKERS};

pub(crate) const ENGINE_TYPE_VAR: &str = "CUSTOMOP_ENGINE_TYPE";
pub(crate) const NUM_THREADS_VAR: &str = "CUSTOMOP_NUM_THREADS";

static ENGINE_KIND: OnceLock<EngineKind> = OnceLock::new();
static MAX_WORKERS: OnceLock<usize> = OnceLock::new();

/// Only the exact `NaiveEngine` selector disables the worker pool.
fn parse_engine_kind(value: &str) -> EngineKind {
    if value.trim() == "NaiveEngine" {
        EngineKind::Naive
    } else {
        EngineKind::Pooled
    }
}

fn parse_max_workers(value: &str) -> Option<usize> {
    match value.trim().parse::<usize>() {
        Ok(count) if count > 0 => Some(count),
        _ => None,
    }
}

pub(crate) fn engine_kind() -> EngineKind {
    *ENGINE_KIND.get_or_init(|| match env::var(ENGINE_TYPE_VAR) {
        Ok(value) => parse_engine_kind(&value),
        Err(_) => EngineKind::Pooled,
    })
}

pub(crate) fn max_workers() -> usize {
    *MAX_WORKERS.get_or_init(|| match env::var(NUM_THREADS_VAR) {
        Ok(value) if !value.trim().is_empty() => parse_max_workers(&value).unwrap_or_else(|| {
            tracing::warn!(
                var = NUM_THREADS_VAR,
                value = %value,
                default = DEFAULT_MAX_WORKERS,
                "ignoring invalid worker cap"
            );
            DEFAULT_MAX_WORKERS
        }),
        _ => DEFAULT_MAX_WORKERS,
    })
}
