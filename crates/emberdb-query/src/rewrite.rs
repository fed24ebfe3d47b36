//! Query-text rewriting.
//!
//! Every per-partition child produced by the fanout planner carries a
//! rewritten textual form of the original request: the faithful serialization
//! of its rebound logical plan. Shard-key columns therefore appear in the
//! rewritten text only in equality form. The text is presentational, used for
//! diagnostics, tracing, and re-parsing by a remote single-partition service.
//!
//! [`selector_predicates`] is the narrow inverse used to verify round-trip
//! equivalence: it recovers the label matchers (and hoisted metric names) from
//! rendered selector text.

use emberdb_core::predicate::unescape_value;
use emberdb_core::{FunctionArg, LogicalPlan, MatchOp, PlanError, PlanResult, Predicate};

/// Reserved column carrying the metric name in selector predicates.
pub const NAME_COLUMN: &str = "__name__";

/// Serializes a logical plan into query-language text.
#[must_use]
pub fn render_query(plan: &LogicalPlan) -> String {
    match plan {
        LogicalPlan::RawSelect { predicates, .. }
        | LogicalPlan::PeriodicSeries { predicates, .. }
        | LogicalPlan::MetadataSelect { predicates, .. } => render_selector(predicates),
        LogicalPlan::LabelValues {
            label_names,
            predicates,
            ..
        } => format!(
            "label_values({}, {})",
            render_selector(predicates),
            label_names.join(", ")
        ),
        LogicalPlan::Aggregate {
            op,
            by,
            param,
            child,
        } => {
            let inner = match param {
                Some(p) => format!("{}, {}", p, render_query(child)),
                None => render_query(child),
            };
            if by.is_empty() {
                format!("{op}({inner})")
            } else {
                format!("{op} by ({}) ({inner})", by.join(","))
            }
        }
        LogicalPlan::BinaryJoin {
            op,
            on,
            ignoring,
            lhs,
            rhs,
        } => {
            let matching = if !on.is_empty() {
                format!(" on({})", on.join(","))
            } else if !ignoring.is_empty() {
                format!(" ignoring({})", ignoring.join(","))
            } else {
                String::new()
            };
            format!(
                "{} {}{} {}",
                render_query(lhs),
                op.symbol(),
                matching,
                render_query(rhs)
            )
        }
        LogicalPlan::ScalarFunction { function, args } => {
            let rendered: Vec<String> = args
                .iter()
                .map(|arg| match arg {
                    FunctionArg::Literal(v) => v.to_string(),
                    FunctionArg::Plan(plan) => render_query(plan),
                })
                .collect();
            format!("{function}({})", rendered.join(", "))
        }
    }
}

/// Renders a predicate set as a series selector, hoisting a concrete
/// `__name__` predicate into the metric-name position.
#[must_use]
pub fn render_selector(predicates: &[Predicate]) -> String {
    let name = predicates
        .iter()
        .find(|p| p.column == NAME_COLUMN && p.is_concrete())
        .map(|p| p.value.as_str())
        .unwrap_or("");
    let matchers: Vec<String> = predicates
        .iter()
        .filter(|p| !(p.column == NAME_COLUMN && p.is_concrete()))
        .map(ToString::to_string)
        .collect();

    if matchers.is_empty() {
        if name.is_empty() {
            "{}".to_string()
        } else {
            name.to_string()
        }
    } else {
        format!("{name}{{{}}}", matchers.join(","))
    }
}

/// Recovers the structural predicate set from rendered query text.
///
/// Scans for `{...}` matcher groups; an identifier immediately preceding a
/// group is recovered as a concrete `__name__` predicate. Returns predicates
/// in textual order across all groups.
pub fn selector_predicates(text: &str) -> PlanResult<Vec<Predicate>> {
    let mut predicates = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'{' {
            let name_start = ident_start(bytes, i);
            if name_start < i {
                predicates.push(Predicate::equals(NAME_COLUMN, &text[name_start..i]));
            }
            let close = matching_brace(text, i)?;
            parse_matchers(&text[i + 1..close], &mut predicates)?;
            i = close + 1;
        } else {
            i += 1;
        }
    }
    Ok(predicates)
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b':'
}

fn ident_start(bytes: &[u8], end: usize) -> usize {
    let mut start = end;
    while start > 0 && is_ident_byte(bytes[start - 1]) {
        start -= 1;
    }
    start
}

/// Index of the `}` closing the brace at `open`, skipping quoted sections.
fn matching_brace(text: &str, open: usize) -> PlanResult<usize> {
    let bytes = text.as_bytes();
    let mut in_quote = false;
    let mut escaped = false;
    for (offset, &b) in bytes.iter().enumerate().skip(open + 1) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_quote => escaped = true,
            b'"' => in_quote = !in_quote,
            b'}' if !in_quote => return Ok(offset),
            _ => {}
        }
    }
    Err(PlanError::Validation(format!(
        "unterminated selector in query text: {text}"
    )))
}

fn parse_matchers(inner: &str, predicates: &mut Vec<Predicate>) -> PlanResult<()> {
    for part in split_outside_quotes(inner) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        predicates.push(parse_matcher(part)?);
    }
    Ok(())
}

fn split_outside_quotes(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let bytes = inner.as_bytes();
    let mut in_quote = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_quote => escaped = true,
            b'"' => in_quote = !in_quote,
            b',' if !in_quote => {
                parts.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&inner[start..]);
    parts
}

fn parse_matcher(part: &str) -> PlanResult<Predicate> {
    let pos = part
        .find(|c| c == '=' || c == '!')
        .ok_or_else(|| PlanError::Validation(format!("matcher `{part}` has no operator")))?;
    let rest = &part[pos..];
    let (op, value_start) = if let Some(stripped) = rest.strip_prefix("=~") {
        (MatchOp::RegexMatch, part.len() - stripped.len())
    } else if let Some(stripped) = rest.strip_prefix("!=") {
        (MatchOp::NotEquals, part.len() - stripped.len())
    } else if let Some(stripped) = rest.strip_prefix("!~") {
        (MatchOp::RegexNotMatch, part.len() - stripped.len())
    } else if let Some(stripped) = rest.strip_prefix('=') {
        (MatchOp::Equals, part.len() - stripped.len())
    } else {
        return Err(PlanError::Validation(format!(
            "matcher `{part}` has an unknown operator"
        )));
    };

    let column = part[..pos].trim();
    if column.is_empty() {
        return Err(PlanError::Validation(format!(
            "matcher `{part}` has no column name"
        )));
    }
    let raw = part[value_start..].trim();
    let value = raw
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .ok_or_else(|| {
            PlanError::Validation(format!("matcher value in `{part}` must be quoted"))
        })?;
    Ok(Predicate::new(column, op, unescape_value(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberdb_core::{AggregateOp, FunctionName, JoinOp, TimeRange};

    fn range() -> TimeRange {
        TimeRange::new(0, 60_000)
    }

    fn cpu_select() -> LogicalPlan {
        LogicalPlan::RawSelect {
            predicates: vec![
                Predicate::equals(NAME_COLUMN, "cpu_usage"),
                Predicate::equals("tenant", "acme"),
                Predicate::regex_match("host", "web-.*"),
            ],
            range: range(),
        }
    }

    #[test]
    fn selector_hoists_metric_name() {
        assert_eq!(
            render_query(&cpu_select()),
            "cpu_usage{tenant=\"acme\",host=~\"web-.*\"}"
        );
    }

    #[test]
    fn bare_metric_and_empty_selector_render() {
        assert_eq!(
            render_selector(&[Predicate::equals(NAME_COLUMN, "up")]),
            "up"
        );
        assert_eq!(render_selector(&[]), "{}");
    }

    #[test]
    fn aggregates_render_by_clause_and_param() {
        let sum = LogicalPlan::Aggregate {
            op: AggregateOp::Sum,
            by: vec!["host".to_string(), "mode".to_string()],
            param: None,
            child: Box::new(cpu_select()),
        };
        assert_eq!(
            render_query(&sum),
            "sum by (host,mode) (cpu_usage{tenant=\"acme\",host=~\"web-.*\"})"
        );

        let topk = LogicalPlan::Aggregate {
            op: AggregateOp::TopK,
            by: vec![],
            param: Some(5.0),
            child: Box::new(cpu_select()),
        };
        assert_eq!(
            render_query(&topk),
            "topk(5, cpu_usage{tenant=\"acme\",host=~\"web-.*\"})"
        );
    }

    #[test]
    fn joins_render_operator_and_matching() {
        let join = LogicalPlan::BinaryJoin {
            op: JoinOp::Div,
            on: vec!["host".to_string()],
            ignoring: vec![],
            lhs: Box::new(cpu_select()),
            rhs: Box::new(LogicalPlan::RawSelect {
                predicates: vec![Predicate::equals(NAME_COLUMN, "cpu_total")],
                range: range(),
            }),
        };
        assert_eq!(
            render_query(&join),
            "cpu_usage{tenant=\"acme\",host=~\"web-.*\"} / on(host) cpu_total"
        );
    }

    #[test]
    fn functions_render_literal_and_plan_args() {
        let plan = LogicalPlan::ScalarFunction {
            function: FunctionName::HistogramQuantile,
            args: vec![
                FunctionArg::Literal(0.9),
                FunctionArg::Plan(Box::new(cpu_select())),
            ],
        };
        assert_eq!(
            render_query(&plan),
            "histogram_quantile(0.9, cpu_usage{tenant=\"acme\",host=~\"web-.*\"})"
        );
    }

    #[test]
    fn selector_predicates_round_trips_rendered_text() {
        let plan = LogicalPlan::Aggregate {
            op: AggregateOp::Sum,
            by: vec!["host".to_string()],
            param: None,
            child: Box::new(cpu_select()),
        };
        let parsed = selector_predicates(&render_query(&plan)).unwrap();
        assert_eq!(
            parsed,
            vec![
                Predicate::equals(NAME_COLUMN, "cpu_usage"),
                Predicate::equals("tenant", "acme"),
                Predicate::regex_match("host", "web-.*"),
            ]
        );
    }

    #[test]
    fn selector_predicates_handles_quoted_braces_and_commas() {
        let parsed =
            selector_predicates("m{path=~\"/a/{id},.*\",env=\"prod\"}").unwrap();
        assert_eq!(
            parsed,
            vec![
                Predicate::equals(NAME_COLUMN, "m"),
                Predicate::regex_match("path", "/a/{id},.*"),
                Predicate::equals("env", "prod"),
            ]
        );
    }

    #[test]
    fn values_with_quotes_and_backslashes_round_trip() {
        let predicates = vec![
            Predicate::equals(NAME_COLUMN, "audit"),
            Predicate::equals("msg", "say \"hi\""),
            Predicate::regex_match("dir", "C:\\\\temp\\\\.*"),
            Predicate::equals("tail", "slash\\"),
        ];
        let text = render_selector(&predicates);
        assert_eq!(
            text,
            "audit{msg=\"say \\\"hi\\\"\",dir=~\"C:\\\\\\\\temp\\\\\\\\.*\",tail=\"slash\\\\\"}"
        );
        assert_eq!(selector_predicates(&text).unwrap(), predicates);
    }

    #[test]
    fn selector_predicates_rejects_malformed_matchers() {
        assert!(selector_predicates("m{tenant}").is_err());
        assert!(selector_predicates("m{tenant=acme}").is_err());
        assert!(selector_predicates("m{tenant=\"acme\"").is_err());
    }

    #[test]
    fn both_join_sides_are_recovered() {
        let parsed = selector_predicates(
            "a{tenant=\"acme\"} + on(host) b{tenant=\"globex\"}",
        )
        .unwrap();
        assert_eq!(
            parsed,
            vec![
                Predicate::equals(NAME_COLUMN, "a"),
                Predicate::equals("tenant", "acme"),
                Predicate::equals(NAME_COLUMN, "b"),
                Predicate::equals("tenant", "globex"),
            ]
        );
    }
}
