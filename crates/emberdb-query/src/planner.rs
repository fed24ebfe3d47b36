//! Shard-fanout (regex expansion) planner.
//!
//! Walks a logical plan, decides per node whether shard-key expansion is
//! needed, resolves regex shard-key predicates into concrete combinations via
//! the injected matcher, rewrites the plan once per combination, delegates
//! each rewritten copy to the single-partition planner, and composes the
//! resulting subtrees with the operation-appropriate combinator.
//!
//! The walk is a pure synchronous transformation over immutable trees: it
//! holds no shared state, performs no I/O, and two calls with identical
//! inputs produce structurally identical output. Children always appear in
//! the order the matcher returned its combinations.

use tracing::{debug, info};

use emberdb_core::{
    AggregateOp, FunctionArg, FunctionKind, LogicalPlan, PlanError, PlanResult, PlannerConfig,
    QueryContext,
};

use crate::exec::{ExecFuncArg, ExecNode, ExecPlan, Transformer};
use crate::matcher::{ShardKeyCombination, ShardKeyMatcher};
use crate::partition::PartitionPlanner;
use crate::rewrite::render_query;

/// Planner that fans a query out across every partition group its shard-key
/// regex predicates resolve to.
///
/// The matcher and the single-partition planner are injected capabilities;
/// configuration is an immutable value threaded through every call.
pub struct ShardFanoutPlanner<M, P> {
    matcher: M,
    partition: P,
    config: PlannerConfig,
}

impl<M: ShardKeyMatcher, P: PartitionPlanner> ShardFanoutPlanner<M, P> {
    pub fn new(matcher: M, partition: P, config: PlannerConfig) -> PlanResult<Self> {
        config.validate()?;
        Ok(Self {
            matcher,
            partition,
            config,
        })
    }

    /// Produces the executable plan for `plan`.
    ///
    /// Errors are raised synchronously here, never deferred to execution;
    /// matcher and partition-planner failures propagate unchanged.
    pub fn materialize(&self, plan: &LogicalPlan, ctx: &QueryContext) -> PlanResult<ExecPlan> {
        if ctx.shard_key_resolved {
            debug!(request = %ctx.request_id, "routing already resolved, delegating");
            return self.partition.materialize(plan, ctx);
        }
        if !plan.needs_shard_key_resolution(&self.config.shard_key_columns) {
            debug!(request = %ctx.request_id, "shard-key predicates fully concrete, delegating");
            return self.partition.materialize(plan, &ctx.resolved());
        }

        match plan {
            LogicalPlan::BinaryJoin { .. } => self.materialize_join(plan, ctx),
            LogicalPlan::Aggregate { .. } => self.materialize_aggregate(plan, ctx),
            LogicalPlan::ScalarFunction { .. } => self.materialize_function(plan, ctx),
            LogicalPlan::RawSelect { .. }
            | LogicalPlan::PeriodicSeries { .. }
            | LogicalPlan::MetadataSelect { .. }
            | LogicalPlan::LabelValues { .. } => self.materialize_select(plan, ctx),
        }
    }

    /// Resolves the plan's shard-key predicate set to a non-empty, bounded
    /// sequence of concrete combinations.
    fn resolve_combinations(&self, plan: &LogicalPlan) -> PlanResult<Vec<ShardKeyCombination>> {
        let shard_predicates = plan.shard_key_predicates(&self.config.shard_key_columns);
        let combinations = self.matcher.resolve(&shard_predicates)?;
        if combinations.is_empty() {
            let selector: Vec<String> =
                shard_predicates.iter().map(ToString::to_string).collect();
            return Err(PlanError::no_partitions(format!("{{{}}}", selector.join(","))));
        }
        if combinations.len() > self.config.max_fanout {
            return Err(PlanError::Validation(format!(
                "shard-key expansion resolved to {} partition groups, exceeding max_fanout {}",
                combinations.len(),
                self.config.max_fanout
            )));
        }
        Ok(combinations)
    }

    /// Rebinds the plan to one concrete combination and delegates it, with
    /// rewritten query text, to the single-partition planner.
    fn delegate_rebound(
        &self,
        plan: &LogicalPlan,
        ctx: &QueryContext,
        combination: &ShardKeyCombination,
    ) -> PlanResult<ExecPlan> {
        let rebound = plan.rebind_shard_keys(combination.predicates());
        let child_ctx = ctx.child_with_query(render_query(&rebound));
        self.partition.materialize(&rebound, &child_ctx)
    }

    fn materialize_select(&self, plan: &LogicalPlan, ctx: &QueryContext) -> PlanResult<ExecPlan> {
        let combinations = self.resolve_combinations(plan)?;
        if combinations.len() == 1 {
            // The regex resolved unambiguously; the query is local.
            return self.delegate_rebound(plan, ctx, &combinations[0]);
        }
        info!(
            request = %ctx.request_id,
            partitions = combinations.len(),
            "fanning select out across partition groups"
        );
        let children = combinations
            .iter()
            .map(|combination| self.delegate_rebound(plan, ctx, combination))
            .collect::<PlanResult<Vec<_>>>()?;
        let node = match plan {
            LogicalPlan::MetadataSelect { .. } => ExecNode::MetadataConcat,
            LogicalPlan::LabelValues { .. } => ExecNode::LabelValuesConcat,
            _ => ExecNode::MultiPartitionConcat,
        };
        Ok(ExecPlan::with_children(node, children, ctx.clone()))
    }

    fn materialize_aggregate(&self, plan: &LogicalPlan, ctx: &QueryContext) -> PlanResult<ExecPlan> {
        let LogicalPlan::Aggregate { op, by, child, .. } = plan else {
            return Err(PlanError::internal(
                "materialize_aggregate requires an aggregate plan",
            ));
        };

        if child.contains_join() {
            // The join operator never crosses the partition boundary: expand
            // the child first, then aggregate once over the recombined stream.
            let decomposition = op
                .decomposition()
                .ok_or_else(|| Self::unsupported_aggregate(*op))?;
            let inner = self
                .materialize(child, &ctx.side_with_query(render_query(child)))?
                .with_transformer(Transformer::AggregateMapReduce {
                    op: *op,
                    by: by.clone(),
                });
            return Ok(ExecPlan::with_children(
                ExecNode::LocalReduceAggregate {
                    op: *op,
                    merge: decomposition.merge,
                },
                vec![inner],
                ctx.clone(),
            )
            .with_transformer(Transformer::AggregatePresenter { op: *op }));
        }

        let combinations = self.resolve_combinations(plan)?;
        if combinations.len() == 1 {
            // No cross-partition merge needed, legal for any operator.
            return self.delegate_rebound(plan, ctx, &combinations[0]);
        }
        self.ensure_mergeable(plan)?;
        self.fanout_aggregate(plan, ctx, &combinations)
    }

    /// Per-combination push-down of an associative aggregate, merged under the
    /// multi-partition reduce-aggregate combinator with a presenter step.
    fn fanout_aggregate(
        &self,
        plan: &LogicalPlan,
        ctx: &QueryContext,
        combinations: &[ShardKeyCombination],
    ) -> PlanResult<ExecPlan> {
        let LogicalPlan::Aggregate { op, .. } = plan else {
            return Err(PlanError::internal(
                "fanout_aggregate requires an aggregate plan",
            ));
        };
        let op = *op;
        let decomposition = op
            .decomposition()
            .ok_or_else(|| Self::unsupported_aggregate(op))?;
        info!(
            request = %ctx.request_id,
            op = %op,
            partitions = combinations.len(),
            "fanning out partial aggregation"
        );

        let mut children = Vec::with_capacity(combinations.len());
        for combination in combinations {
            let rebound = plan.rebind_shard_keys(combination.predicates());
            let pushed = match rebound {
                LogicalPlan::Aggregate {
                    by, param, child, ..
                } => LogicalPlan::Aggregate {
                    op: decomposition.partial,
                    by,
                    param,
                    child,
                },
                other => other,
            };
            let child_ctx = ctx.child_with_query(render_query(&pushed));
            children.push(self.partition.materialize(&pushed, &child_ctx)?);
        }

        Ok(ExecPlan::with_children(
            ExecNode::MultiPartitionReduceAggregate {
                op,
                merge: decomposition.merge,
            },
            children,
            ctx.clone(),
        )
        .with_transformer(Transformer::AggregatePresenter { op }))
    }

    fn materialize_join(&self, plan: &LogicalPlan, ctx: &QueryContext) -> PlanResult<ExecPlan> {
        let LogicalPlan::BinaryJoin {
            op,
            on,
            ignoring,
            lhs,
            rhs,
        } = plan
        else {
            return Err(PlanError::internal("materialize_join requires a join plan"));
        };
        // Each side is expanded independently; the join itself is never
        // pushed below the partition boundary.
        let lhs_exec = self.materialize(lhs, &ctx.side_with_query(render_query(lhs)))?;
        let rhs_exec = self.materialize(rhs, &ctx.side_with_query(render_query(rhs)))?;
        Ok(ExecPlan::with_children(
            ExecNode::BinaryJoin {
                op: *op,
                on: on.clone(),
                ignoring: ignoring.clone(),
            },
            vec![lhs_exec, rhs_exec],
            ctx.clone(),
        ))
    }

    fn materialize_function(&self, plan: &LogicalPlan, ctx: &QueryContext) -> PlanResult<ExecPlan> {
        let LogicalPlan::ScalarFunction { function, args } = plan else {
            return Err(PlanError::internal(
                "materialize_function requires a function plan",
            ));
        };

        match function.kind() {
            FunctionKind::ElementWise => {
                let plan_args: Vec<&LogicalPlan> =
                    args.iter().filter_map(FunctionArg::as_plan).collect();
                let [vector_arg] = plan_args.as_slice() else {
                    return Err(PlanError::Validation(format!(
                        "{function} takes exactly one vector argument, found {}",
                        plan_args.len()
                    )));
                };
                let scalar_args: Vec<f64> = args
                    .iter()
                    .filter_map(|arg| match arg {
                        FunctionArg::Literal(v) => Some(*v),
                        FunctionArg::Plan(_) => None,
                    })
                    .collect();

                if vector_arg.contains_join() {
                    // The join operator never crosses the partition boundary:
                    // expand the argument through the join rules, then apply
                    // the function once above the recombined stream.
                    let mut inner = self
                        .materialize(vector_arg, &ctx.side_with_query(render_query(vector_arg)))?;
                    inner.context = ctx.clone();
                    return Ok(inner.with_transformer(Transformer::InstantVectorFunction {
                        function: *function,
                        scalar_args,
                    }));
                }

                let combinations = self.resolve_combinations(plan)?;
                if combinations.len() == 1 {
                    return self.delegate_rebound(plan, ctx, &combinations[0]);
                }

                if let LogicalPlan::Aggregate { .. } = vector_arg {
                    // Peel the function off the aggregate: push partial
                    // aggregation down, re-apply the function exactly once as
                    // the outermost transformer on the merged result.
                    self.ensure_mergeable(vector_arg)?;
                    let merged = self.fanout_aggregate(vector_arg, ctx, &combinations)?;
                    return Ok(merged.with_transformer(Transformer::InstantVectorFunction {
                        function: *function,
                        scalar_args,
                    }));
                }

                // Element-wise over a non-aggregate vector: the function is
                // pointwise, so the whole plan pushes down per partition.
                let children = combinations
                    .iter()
                    .map(|combination| self.delegate_rebound(plan, ctx, combination))
                    .collect::<PlanResult<Vec<_>>>()?;
                Ok(ExecPlan::with_children(
                    ExecNode::MultiPartitionConcat,
                    children,
                    ctx.clone(),
                ))
            }
            FunctionKind::VectorToScalar | FunctionKind::Generator => {
                // Expand each nested sub-plan and attach it as an owned
                // dependency argument; the runtime evaluates arguments first
                // and substitutes their results into the function.
                let mut exec_args = Vec::with_capacity(args.len());
                for arg in args {
                    match arg {
                        FunctionArg::Literal(v) => exec_args.push(ExecFuncArg::Literal(*v)),
                        FunctionArg::Plan(nested) => {
                            let expanded = self
                                .materialize(nested, &ctx.side_with_query(render_query(nested)))?;
                            exec_args.push(ExecFuncArg::Plan(Box::new(expanded)));
                        }
                    }
                }
                Ok(ExecPlan::leaf(
                    ExecNode::ScalarGenerator {
                        function: *function,
                        args: exec_args,
                    },
                    ctx.clone(),
                ))
            }
        }
    }

    /// Rejects subtrees whose aggregates cannot be merged across partitions.
    fn ensure_mergeable(&self, plan: &LogicalPlan) -> PlanResult<()> {
        let ops = plan.aggregate_ops();
        for op in &ops {
            if !op.is_associative() {
                return Err(Self::unsupported_aggregate(*op));
            }
        }
        if let [outer, _, ..] = ops.as_slice() {
            // Pushing the whole chain down would merge each group's own
            // inner result; series spanning groups would be counted once per
            // group.
            return Err(PlanError::unsupported(
                outer.name(),
                "nested aggregations cannot be decomposed into per-partition partials",
            ));
        }
        Ok(())
    }

    fn unsupported_aggregate(op: AggregateOp) -> PlanError {
        PlanError::unsupported(
            op.name(),
            "per-partition partial results cannot be merged without full candidate sets",
        )
    }
}
