//! Core domain types for the EmberDB distributed query-planning layer.

pub mod config;
pub mod context;
pub mod error;
pub mod plan;
pub mod predicate;

pub use config::PlannerConfig;
pub use context::{QueryContext, TimeRange};
pub use error::{PlanError, PlanResult};
pub use plan::{
    AggregateOp, Decomposition, FunctionArg, FunctionKind, FunctionName, JoinOp, LogicalPlan,
    MergeOp,
};
pub use predicate::{MatchOp, Predicate};
