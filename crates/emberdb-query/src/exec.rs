//! Executable plan trees.
//!
//! An [`ExecPlan`] is the output contract consumed by the execution runtime:
//! every node carries an ordered list of child plans, an ordered list of
//! result transformers applied left-to-right to the node's output stream, and
//! its own [`QueryContext`] with the rewritten query text for that subtree.
//! Child order follows matcher order and transformer order is semantically
//! significant; composition never reorders either.

use serde::{Deserialize, Serialize};

use emberdb_core::{AggregateOp, FunctionName, JoinOp, MergeOp, QueryContext};

/// Combinator kind of an [`ExecPlan`] node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecNode {
    /// Leaf scan of one partition's series, produced by a partition planner.
    PartitionSelect,
    /// Concatenation of subtrees executing on a single partition group.
    LocalConcat,
    /// Concatenation of subtrees fanned out across partition groups.
    MultiPartitionConcat,
    /// Merge of partial aggregates produced within one partition group.
    LocalReduceAggregate { op: AggregateOp, merge: MergeOp },
    /// Merge of partial aggregates fanned out across partition groups.
    MultiPartitionReduceAggregate { op: AggregateOp, merge: MergeOp },
    /// Binary join of exactly two subtrees.
    BinaryJoin {
        op: JoinOp,
        on: Vec<String>,
        ignoring: Vec<String>,
    },
    /// Scalar generator whose arguments may reference owned dependency
    /// subtrees, evaluated before the function itself.
    ScalarGenerator {
        function: FunctionName,
        args: Vec<ExecFuncArg>,
    },
    /// Concatenation of per-partition series-metadata results.
    MetadataConcat,
    /// Concatenation of per-partition label-values results.
    LabelValuesConcat,
}

/// Function argument of a [`ExecNode::ScalarGenerator`]: a literal, or an
/// exclusively owned child plan whose result is substituted at evaluation
/// time (never inlined into the parent's transformer chain).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecFuncArg {
    Literal(f64),
    Plan(Box<ExecPlan>),
}

/// Result transformer applied to a node's output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Transformer {
    /// Re-samples raw series onto the query's periodic step grid.
    PeriodicSampleMapper { step_ms: u64 },
    /// Per-partition partial aggregation (the push-down map step).
    AggregateMapReduce { op: AggregateOp, by: Vec<String> },
    /// Converts merged internal aggregate state into the user-visible shape.
    AggregatePresenter { op: AggregateOp },
    /// Element-wise function peeled off an aggregate and re-applied once on
    /// the merged result.
    InstantVectorFunction {
        function: FunctionName,
        scalar_args: Vec<f64>,
    },
}

/// Physical execution plan node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecPlan {
    pub node: ExecNode,
    pub children: Vec<ExecPlan>,
    pub transformers: Vec<Transformer>,
    pub context: QueryContext,
}

impl ExecPlan {
    /// Childless node with no transformers.
    #[must_use]
    pub fn leaf(node: ExecNode, context: QueryContext) -> Self {
        Self {
            node,
            children: Vec::new(),
            transformers: Vec::new(),
            context,
        }
    }

    /// Node over an ordered set of children.
    #[must_use]
    pub fn with_children(node: ExecNode, children: Vec<Self>, context: QueryContext) -> Self {
        Self {
            node,
            children,
            transformers: Vec::new(),
            context,
        }
    }

    /// Appends a transformer after all existing ones.
    #[must_use]
    pub fn with_transformer(mut self, transformer: Transformer) -> Self {
        self.transformers.push(transformer);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberdb_core::TimeRange;

    fn ctx() -> QueryContext {
        QueryContext::new("cpu{tenant=\"acme\"}", TimeRange::new(0, 1000))
    }

    #[test]
    fn transformers_append_in_order() {
        let plan = ExecPlan::leaf(ExecNode::PartitionSelect, ctx())
            .with_transformer(Transformer::PeriodicSampleMapper { step_ms: 15_000 })
            .with_transformer(Transformer::AggregateMapReduce {
                op: AggregateOp::Sum,
                by: vec![],
            });

        assert_eq!(
            plan.transformers,
            vec![
                Transformer::PeriodicSampleMapper { step_ms: 15_000 },
                Transformer::AggregateMapReduce {
                    op: AggregateOp::Sum,
                    by: vec![],
                },
            ]
        );
    }

    #[test]
    fn children_keep_construction_order() {
        let context = ctx();
        let children: Vec<ExecPlan> = (0..3)
            .map(|i| {
                ExecPlan::leaf(
                    ExecNode::PartitionSelect,
                    context.child_with_query(format!("cpu{{shard=\"{i}\"}}")),
                )
            })
            .collect();

        let plan = ExecPlan::with_children(ExecNode::MultiPartitionConcat, children, context);
        let texts: Vec<&str> = plan
            .children
            .iter()
            .map(|c| c.context.query_text.as_str())
            .collect();
        assert_eq!(
            texts,
            vec!["cpu{shard=\"0\"}", "cpu{shard=\"1\"}", "cpu{shard=\"2\"}"]
        );
    }
}
