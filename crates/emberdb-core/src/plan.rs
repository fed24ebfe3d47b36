//! Logical query plans.
//!
//! A [`LogicalPlan`] is the parsed, structured form of a query: an immutable
//! tagged tree of query-semantic nodes, each carrying its predicate set and
//! sub-plans. Plans are produced upstream by the query-language parser and
//! consumed read-only here; every rewrite returns a new tree and unrelated
//! subtrees may be shared structurally but never mutated.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::TimeRange;
use crate::predicate::Predicate;

/// Aggregation operator of an [`LogicalPlan::Aggregate`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateOp {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    Group,
    TopK,
    BottomK,
    Quantile,
    CountValues,
}

/// Merge arithmetic applied when combining per-partition partial aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeOp {
    /// Sum the partial values (sum, count).
    Sum,
    /// Keep the minimum partial value.
    Min,
    /// Keep the maximum partial value.
    Max,
    /// Combine (sum, count) pairs into a weighted mean.
    AvgCombine,
    /// Union the grouped series.
    Group,
}

/// Partial/merge split of an associative aggregation.
///
/// `partial` is the operator pushed down to each partition; `merge` is the
/// arithmetic applied once at the top to combine the partial results. The two
/// differ where the partial state is not the user-visible shape: `count`
/// partials are *summed*, and `avg` partials carry (sum, count) pairs that
/// the merge recombines as a weighted mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decomposition {
    pub partial: AggregateOp,
    pub merge: MergeOp,
}

impl AggregateOp {
    /// Query-language name of the operator.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
            Self::Group => "group",
            Self::TopK => "topk",
            Self::BottomK => "bottomk",
            Self::Quantile => "quantile",
            Self::CountValues => "count_values",
        }
    }

    /// Partial/merge decomposition, or `None` for operators whose per-partition
    /// partials cannot be merged without the full candidate sets (the
    /// top-k/bottom-k family and quantiles).
    #[must_use]
    pub fn decomposition(self) -> Option<Decomposition> {
        let (partial, merge) = match self {
            Self::Sum => (Self::Sum, MergeOp::Sum),
            Self::Avg => (Self::Avg, MergeOp::AvgCombine),
            Self::Count => (Self::Count, MergeOp::Sum),
            Self::Min => (Self::Min, MergeOp::Min),
            Self::Max => (Self::Max, MergeOp::Max),
            Self::Group => (Self::Group, MergeOp::Group),
            Self::TopK | Self::BottomK | Self::Quantile | Self::CountValues => return None,
        };
        Some(Decomposition { partial, merge })
    }

    /// True when disjoint-partition partials merge into the same result as
    /// aggregating over the union directly.
    #[must_use]
    pub fn is_associative(self) -> bool {
        self.decomposition().is_some()
    }
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Binary-join operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Unless,
}

impl JoinOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::And => "and",
            Self::Or => "or",
            Self::Unless => "unless",
        }
    }
}

/// How a [`FunctionName`] consumes its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Produces a scalar or time series from literals alone; carries no
    /// shard-key predicates and bypasses expansion entirely.
    Generator,
    /// Collapses a vector argument to a scalar (`scalar(...)`); the vector
    /// subtree is evaluated as a dependency, never inlined.
    VectorToScalar,
    /// Element-wise transform of a vector argument; safe to push below the
    /// partition boundary except when wrapping an aggregate.
    ElementWise,
}

/// Closed set of supported scalar/vector functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionName {
    Time,
    Vector,
    Scalar,
    Exp,
    Ln,
    Abs,
    ClampMin,
    ClampMax,
    HistogramQuantile,
}

impl FunctionName {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Vector => "vector",
            Self::Scalar => "scalar",
            Self::Exp => "exp",
            Self::Ln => "ln",
            Self::Abs => "abs",
            Self::ClampMin => "clamp_min",
            Self::ClampMax => "clamp_max",
            Self::HistogramQuantile => "histogram_quantile",
        }
    }

    #[must_use]
    pub fn kind(self) -> FunctionKind {
        match self {
            Self::Time | Self::Vector => FunctionKind::Generator,
            Self::Scalar => FunctionKind::VectorToScalar,
            Self::Exp
            | Self::Ln
            | Self::Abs
            | Self::ClampMin
            | Self::ClampMax
            | Self::HistogramQuantile => FunctionKind::ElementWise,
        }
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Argument of a [`LogicalPlan::ScalarFunction`] node: either a literal or a
/// nested sub-plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FunctionArg {
    Literal(f64),
    Plan(Box<LogicalPlan>),
}

impl FunctionArg {
    #[must_use]
    pub fn as_plan(&self) -> Option<&LogicalPlan> {
        match self {
            Self::Plan(plan) => Some(plan),
            Self::Literal(_) => None,
        }
    }
}

/// Immutable tagged tree of query-semantic nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalPlan {
    /// Leaf series selection over a raw time range.
    RawSelect {
        predicates: Vec<Predicate>,
        range: TimeRange,
    },
    /// Range-sampled series selection evaluated at a fixed step.
    PeriodicSeries {
        predicates: Vec<Predicate>,
        range: TimeRange,
        step_ms: u64,
    },
    /// Aggregation over a child plan. `param` carries the operator parameter
    /// for parameterised forms (topk k, quantile q, ...).
    Aggregate {
        op: AggregateOp,
        by: Vec<String>,
        param: Option<f64>,
        child: Box<LogicalPlan>,
    },
    /// Binary join of two sub-plans.
    BinaryJoin {
        op: JoinOp,
        on: Vec<String>,
        ignoring: Vec<String>,
        lhs: Box<LogicalPlan>,
        rhs: Box<LogicalPlan>,
    },
    /// Scalar or vector function application.
    ScalarFunction {
        function: FunctionName,
        args: Vec<FunctionArg>,
    },
    /// Series-metadata query.
    MetadataSelect {
        predicates: Vec<Predicate>,
        range: TimeRange,
    },
    /// Label-values query.
    LabelValues {
        label_names: Vec<String>,
        predicates: Vec<Predicate>,
        range: TimeRange,
    },
}

impl LogicalPlan {
    /// Predicates attached directly to this node (not its children).
    #[must_use]
    pub fn own_predicates(&self) -> &[Predicate] {
        match self {
            Self::RawSelect { predicates, .. }
            | Self::PeriodicSeries { predicates, .. }
            | Self::MetadataSelect { predicates, .. }
            | Self::LabelValues { predicates, .. } => predicates,
            Self::Aggregate { .. } | Self::BinaryJoin { .. } | Self::ScalarFunction { .. } => &[],
        }
    }

    /// Direct sub-plans of this node, left to right.
    #[must_use]
    pub fn children(&self) -> Vec<&Self> {
        match self {
            Self::RawSelect { .. }
            | Self::PeriodicSeries { .. }
            | Self::MetadataSelect { .. }
            | Self::LabelValues { .. } => Vec::new(),
            Self::Aggregate { child, .. } => vec![child],
            Self::BinaryJoin { lhs, rhs, .. } => vec![lhs, rhs],
            Self::ScalarFunction { args, .. } => {
                args.iter().filter_map(FunctionArg::as_plan).collect()
            }
        }
    }

    /// Union over the whole subtree of predicates restricted to shard-key
    /// columns, de-duplicated in first-seen order.
    #[must_use]
    pub fn shard_key_predicates(&self, shard_keys: &[String]) -> Vec<Predicate> {
        let mut out: Vec<Predicate> = Vec::new();
        self.visit(&mut |node| {
            for pred in node.own_predicates() {
                if shard_keys.contains(&pred.column) && !out.contains(pred) {
                    out.push(pred.clone());
                }
            }
        });
        out
    }

    /// True when any shard-key predicate in the subtree is not a concrete
    /// equality, i.e. routing cannot be determined without the matcher.
    #[must_use]
    pub fn needs_shard_key_resolution(&self, shard_keys: &[String]) -> bool {
        !self
            .shard_key_predicates(shard_keys)
            .iter()
            .all(Predicate::is_concrete)
    }

    /// All aggregation operators appearing in the subtree, outermost first.
    #[must_use]
    pub fn aggregate_ops(&self) -> Vec<AggregateOp> {
        let mut ops = Vec::new();
        self.visit(&mut |node| {
            if let Self::Aggregate { op, .. } = node {
                ops.push(*op);
            }
        });
        ops
    }

    /// True when the subtree contains a binary-join node.
    #[must_use]
    pub fn contains_join(&self) -> bool {
        let mut found = false;
        self.visit(&mut |node| {
            if matches!(node, Self::BinaryJoin { .. }) {
                found = true;
            }
        });
        found
    }

    /// Effective time range of the subtree, or `None` for pure generators.
    #[must_use]
    pub fn time_range(&self) -> Option<TimeRange> {
        match self {
            Self::RawSelect { range, .. }
            | Self::PeriodicSeries { range, .. }
            | Self::MetadataSelect { range, .. }
            | Self::LabelValues { range, .. } => Some(*range),
            Self::Aggregate { child, .. } => child.time_range(),
            Self::BinaryJoin { lhs, rhs, .. } => match (lhs.time_range(), rhs.time_range()) {
                (Some(l), Some(r)) => Some(l.union(r)),
                (Some(one), None) | (None, Some(one)) => Some(one),
                (None, None) => None,
            },
            Self::ScalarFunction { args, .. } => args
                .iter()
                .filter_map(FunctionArg::as_plan)
                .filter_map(Self::time_range)
                .reduce(TimeRange::union),
        }
    }

    /// Returns a new tree with every predicate on a column bound by
    /// `combination` replaced by the combination's concrete predicates. All
    /// other predicates and structure are carried over unchanged. Leaves that
    /// carry no predicate on any bound column select data outside the shard
    /// key and are left untouched.
    #[must_use]
    pub fn rebind_shard_keys(&self, combination: &[Predicate]) -> Self {
        let rebind = |predicates: &[Predicate]| -> Vec<Predicate> {
            let constrained = predicates
                .iter()
                .any(|p| combination.iter().any(|c| c.column == p.column));
            if !constrained {
                return predicates.to_vec();
            }
            let mut out: Vec<Predicate> = predicates
                .iter()
                .filter(|p| !combination.iter().any(|c| c.column == p.column))
                .cloned()
                .collect();
            out.extend(combination.iter().cloned());
            out
        };

        match self {
            Self::RawSelect { predicates, range } => Self::RawSelect {
                predicates: rebind(predicates),
                range: *range,
            },
            Self::PeriodicSeries {
                predicates,
                range,
                step_ms,
            } => Self::PeriodicSeries {
                predicates: rebind(predicates),
                range: *range,
                step_ms: *step_ms,
            },
            Self::MetadataSelect { predicates, range } => Self::MetadataSelect {
                predicates: rebind(predicates),
                range: *range,
            },
            Self::LabelValues {
                label_names,
                predicates,
                range,
            } => Self::LabelValues {
                label_names: label_names.clone(),
                predicates: rebind(predicates),
                range: *range,
            },
            Self::Aggregate {
                op,
                by,
                param,
                child,
            } => Self::Aggregate {
                op: *op,
                by: by.clone(),
                param: *param,
                child: Box::new(child.rebind_shard_keys(combination)),
            },
            Self::BinaryJoin {
                op,
                on,
                ignoring,
                lhs,
                rhs,
            } => Self::BinaryJoin {
                op: *op,
                on: on.clone(),
                ignoring: ignoring.clone(),
                lhs: Box::new(lhs.rebind_shard_keys(combination)),
                rhs: Box::new(rhs.rebind_shard_keys(combination)),
            },
            Self::ScalarFunction { function, args } => Self::ScalarFunction {
                function: *function,
                args: args
                    .iter()
                    .map(|arg| match arg {
                        FunctionArg::Literal(v) => FunctionArg::Literal(*v),
                        FunctionArg::Plan(plan) => {
                            FunctionArg::Plan(Box::new(plan.rebind_shard_keys(combination)))
                        }
                    })
                    .collect(),
            },
        }
    }

    fn visit<F: FnMut(&Self)>(&self, f: &mut F) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }
}
