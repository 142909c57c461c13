//! Operation results
//!
//! Every mutating or querying tree operation reports one of a small set of
//! outcomes instead of panicking. `SameAndNotChange` is a success from the
//! caller's point of view: the requested state already held, so no versions
//! were bumped and no replication was scheduled.

use std::fmt;

/// Outcome of a tree operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpResult {
    Success,
    /// The stored value already equals the requested one; nothing changed.
    SameAndNotChange,
    /// A path segment did not resolve to an existing node.
    NotFoundNode,
    /// The node exists but holds a different kind than the operation needs.
    NodeTypeMismatch,
    /// The operation would have to mutate structure it is not allowed to
    /// (e.g. growing a list through an index, re-kinding in ensure mode).
    PermissionDenied,
    /// A handle failed generation/liveness checks.
    InvalidId,
    /// The owning container is gone, or an internal invariant was violated.
    InvalidContainer,
    /// A map key or list index below the resolved node was missing.
    NotFoundSubNode,
    /// The slab is at capacity, or a multi-node copy would not fit.
    AllocateFailed,
}

impl OpResult {
    /// Success or idempotent no-op.
    pub fn is_ok(self) -> bool {
        matches!(self, OpResult::Success | OpResult::SameAndNotChange)
    }

    pub fn is_success(self) -> bool {
        self == OpResult::Success
    }

    pub fn describe(self) -> &'static str {
        match self {
            OpResult::Success => "Success",
            OpResult::SameAndNotChange => "Same value, no change needed",
            OpResult::NotFoundNode => "Node not found in path",
            OpResult::NodeTypeMismatch => "Node type mismatch",
            OpResult::PermissionDenied => "Permission denied",
            OpResult::InvalidId => "Invalid node id",
            OpResult::InvalidContainer => "Invalid or destroyed container",
            OpResult::NotFoundSubNode => "Sub-node not found",
            OpResult::AllocateFailed => "Failed to allocate new node",
        }
    }
}

impl fmt::Display for OpResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// An `OpResult` plus optional context, carried back from deep call sites so
/// the failure message can name the offending path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpReport {
    pub result: OpResult,
    pub message: Option<String>,
}

impl OpReport {
    pub fn new(result: OpResult) -> Self {
        OpReport {
            result,
            message: None,
        }
    }

    pub fn with_message(result: OpResult, message: impl Into<String>) -> Self {
        OpReport {
            result,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }

    /// Log at error level unless the outcome is ok. Mirrors the fire-and-
    /// forget diagnostics style game code uses on write results.
    pub fn log_if_failed(&self, context: &str) {
        if !self.is_ok() {
            match &self.message {
                Some(msg) => {
                    tracing::error!(context, result = %self.result, detail = %msg, "tree op failed")
                }
                None => tracing::error!(context, result = %self.result, "tree op failed"),
            }
        }
    }
}

impl From<OpResult> for OpReport {
    fn from(result: OpResult) -> Self {
        OpReport::new(result)
    }
}

impl PartialEq<OpResult> for OpReport {
    fn eq(&self, other: &OpResult) -> bool {
        self.result == *other
    }
}

impl fmt::Display for OpReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.result, msg),
            None => self.result.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_covers_success_and_same() {
        assert!(OpResult::Success.is_ok());
        assert!(OpResult::SameAndNotChange.is_ok());
        assert!(!OpResult::NotFoundNode.is_ok());
        assert!(!OpResult::AllocateFailed.is_ok());
    }

    #[test]
    fn report_compares_against_result() {
        let report = OpReport::with_message(OpResult::NodeTypeMismatch, "node [Root -> hp] is Int32");
        assert_eq!(report, OpResult::NodeTypeMismatch);
        assert!(report != OpResult::Success);
    }
}
