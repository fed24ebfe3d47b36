//! Per-request context threaded through planning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Half-open query time window in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    #[must_use]
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    /// Smallest range covering both operands.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self {
            start_ms: self.start_ms.min(other.start_ms),
            end_ms: self.end_ms.max(other.end_ms),
        }
    }
}

/// Context propagated from the original request to every plan it produces.
///
/// The context is cloned (never mutated) on the way down: each per-partition
/// child receives a derived context carrying its rewritten query text and the
/// `shard_key_resolved` routing flag, while `request_id` and `submitted_at`
/// propagate unchanged for end-to-end tracing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    /// Opaque request identifier, stable across every derived child context.
    pub request_id: Uuid,
    /// Human-readable query text for this (sub-)plan.
    pub query_text: String,
    pub range: TimeRange,
    pub step_ms: Option<u64>,
    /// Routing flag: partition routing is already resolved, do not re-expand.
    pub shard_key_resolved: bool,
    pub submitted_at: DateTime<Utc>,
}

impl QueryContext {
    #[must_use]
    pub fn new(query_text: impl Into<String>, range: TimeRange) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            query_text: query_text.into(),
            range,
            step_ms: None,
            shard_key_resolved: false,
            submitted_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_step(mut self, step_ms: u64) -> Self {
        self.step_ms = Some(step_ms);
        self
    }

    /// Derived context for a plan whose routing is fully resolved.
    #[must_use]
    pub fn resolved(&self) -> Self {
        let mut ctx = self.clone();
        ctx.shard_key_resolved = true;
        ctx
    }

    /// Derived context for a per-partition child: rewritten query text, routing
    /// resolved, request identity preserved.
    #[must_use]
    pub fn child_with_query(&self, query_text: impl Into<String>) -> Self {
        let mut ctx = self.resolved();
        ctx.query_text = query_text.into();
        ctx
    }

    /// Derived context for an independently expanded sub-plan (e.g. one side
    /// of a binary join): new text, routing still unresolved.
    #[must_use]
    pub fn side_with_query(&self, query_text: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.query_text = query_text.into();
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_context_preserves_request_identity() {
        let ctx = QueryContext::new("cpu{tenant=~\"a.*\"}", TimeRange::new(0, 1000)).with_step(15_000);
        let child = ctx.child_with_query("cpu{tenant=\"acme\"}");

        assert_eq!(child.request_id, ctx.request_id);
        assert_eq!(child.submitted_at, ctx.submitted_at);
        assert_eq!(child.range, ctx.range);
        assert_eq!(child.step_ms, Some(15_000));
        assert_eq!(child.query_text, "cpu{tenant=\"acme\"}");
        assert!(child.shard_key_resolved);
        assert!(!ctx.shard_key_resolved);
    }

    #[test]
    fn side_context_stays_unresolved() {
        let ctx = QueryContext::new("a + b", TimeRange::new(0, 10));
        let side = ctx.side_with_query("a");
        assert!(!side.shard_key_resolved);
        assert_eq!(side.query_text, "a");
    }

    #[test]
    fn union_covers_both_ranges() {
        let a = TimeRange::new(10, 20);
        let b = TimeRange::new(5, 15);
        assert_eq!(a.union(b), TimeRange::new(5, 20));
    }
}
