//! Best-effort storage metrics.
//!
//! Emitted as `tracing` events on the `tabdata::metrics` target so any
//! subscriber can pick them up. Nothing depends on them for correctness.

use std::time::Instant;

use super::RecordKey;

pub const METRICS_TARGET: &str = "tabdata::metrics";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Save,
    Restore,
    Delete,
}

impl StorageOp {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageOp::Save => "save",
            StorageOp::Restore => "restore",
            StorageOp::Delete => "delete",
        }
    }
}

/// Measures one backend operation and reports it when finished.
#[derive(Debug)]
pub struct OpTimer {
    backend: &'static str,
    key: RecordKey,
    op: StorageOp,
    started: Instant,
}

impl OpTimer {
    pub fn start(backend: &'static str, key: RecordKey, op: StorageOp) -> Self {
        Self { backend, key, op, started: Instant::now() }
    }

    /// Report the outcome and return the elapsed time in milliseconds.
    pub fn finish(self, success: bool) -> u128 {
        let elapsed_ms = self.started.elapsed().as_millis();
        tracing::debug!(
            target: METRICS_TARGET,
            backend = self.backend,
            type_id = self.key.type_id,
            op = self.op.as_str(),
            success,
            elapsed_ms = elapsed_ms as u64,
            "storage op finished"
        );
        elapsed_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_names() {
        assert_eq!(StorageOp::Save.as_str(), "save");
        assert_eq!(StorageOp::Restore.as_str(), "restore");
        assert_eq!(StorageOp::Delete.as_str(), "delete");
    }

    #[test]
    fn test_timer_finish() {
        let timer = OpTimer::start("FPTDS", RecordKey::new(1, "CPTD"), StorageOp::Save);
        assert!(timer.finish(true) < 1_000);
    }
}
