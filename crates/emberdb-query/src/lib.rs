//! Shard-fanout query planning for EmberDB.
//!
//! This crate turns a logical plan whose shard-key predicates may contain
//! regexes into a physical plan that fans out across every concrete partition
//! the regex resolves to, recombining partial results according to the
//! semantics of the query's top-level operation.

pub mod exec;
pub mod matcher;
pub mod partition;
pub mod planner;
pub mod rewrite;

pub use exec::{ExecFuncArg, ExecNode, ExecPlan, Transformer};
pub use matcher::{ShardKeyCombination, ShardKeyMatcher, StaticShardKeyMatcher};
pub use partition::PartitionPlanner;
pub use planner::ShardFanoutPlanner;
pub use rewrite::{render_query, selector_predicates};
