use emberdb_core::{LogicalPlan, PlanResult, QueryContext};

use crate::exec::ExecPlan;

/// Single-partition physical planner boundary.
///
/// Materializes a logical plan whose shard-key predicates are fully concrete
/// into an executable subtree scoped to one partition group's nodes. Behaviour
/// is undefined if a regex shard-key predicate remains; the fanout planner
/// always rebinds shard keys and marks the context resolved before
/// delegating.
pub trait PartitionPlanner: Send + Sync {
    fn materialize(&self, plan: &LogicalPlan, ctx: &QueryContext) -> PlanResult<ExecPlan>;
}
