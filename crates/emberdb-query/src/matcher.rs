//! Shard-key matching.
//!
//! The matcher resolves the shard-key predicate set of a plan (possibly
//! containing regexes) into the ordered sequence of concrete shard-key
//! combinations the query must fan out to. It is injected into the planner as
//! a narrow capability with one pure method, so tests can substitute a fake
//! without constructing a real partition topology.

use regex::Regex;

use emberdb_core::{MatchOp, PlanError, PlanResult, Predicate};

/// One fully-concrete binding of every shard-key column, identifying one
/// target partition group.
///
/// Invariant: a combination contains only `Equals` predicates and binds each
/// shard-key column exactly once. A regex or a partial binding is invalid and
/// must never be delegated downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardKeyCombination {
    predicates: Vec<Predicate>,
}

impl ShardKeyCombination {
    /// Validates the binding invariant against the configured shard keys.
    pub fn new(predicates: Vec<Predicate>, shard_keys: &[String]) -> PlanResult<Self> {
        for pred in &predicates {
            if !pred.is_concrete() {
                return Err(PlanError::Validation(format!(
                    "shard-key combination must be concrete, got {pred}"
                )));
            }
        }
        for key in shard_keys {
            let bound = predicates.iter().filter(|p| &p.column == key).count();
            if bound != 1 {
                return Err(PlanError::Validation(format!(
                    "shard-key column `{key}` must be bound exactly once, found {bound} bindings"
                )));
            }
        }
        if predicates.len() != shard_keys.len() {
            return Err(PlanError::Validation(format!(
                "shard-key combination binds {} columns, expected {}",
                predicates.len(),
                shard_keys.len()
            )));
        }
        Ok(Self { predicates })
    }

    /// Ordered concrete predicates of this combination.
    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Bound value of one shard-key column, if present.
    #[must_use]
    pub fn value_of(&self, column: &str) -> Option<&str> {
        self.predicates
            .iter()
            .find(|p| p.column == column)
            .map(|p| p.value.as_str())
    }
}

/// Resolves shard-key predicates to concrete partition-group combinations.
///
/// Pure and deterministic within one call: the partition universe may change
/// between calls but not during one.
pub trait ShardKeyMatcher: Send + Sync {
    fn resolve(&self, shard_key_predicates: &[Predicate]) -> PlanResult<Vec<ShardKeyCombination>>;
}

/// In-memory matcher over a registered universe of shard-key value tuples.
///
/// Equality predicates filter exactly; regex predicates are compiled with an
/// implicit full anchor, matching the query-language regex semantics. Output
/// preserves the registration order of the universe, so identical inputs
/// always resolve to identically ordered combinations.
pub struct StaticShardKeyMatcher {
    shard_keys: Vec<String>,
    universe: Vec<Vec<String>>,
}

impl StaticShardKeyMatcher {
    #[must_use]
    pub fn new(shard_keys: Vec<String>) -> Self {
        Self {
            shard_keys,
            universe: Vec::new(),
        }
    }

    /// Registers one known shard-key value tuple, in shard-key column order.
    pub fn register(&mut self, values: Vec<String>) -> PlanResult<()> {
        if values.len() != self.shard_keys.len() {
            return Err(PlanError::Validation(format!(
                "shard-key tuple has {} values, expected {}",
                values.len(),
                self.shard_keys.len()
            )));
        }
        if !self.universe.contains(&values) {
            self.universe.push(values);
        }
        Ok(())
    }

    fn tuple_matches(
        &self,
        tuple: &[String],
        predicate: &Predicate,
        pattern: Option<&Regex>,
    ) -> bool {
        let Some(idx) = self.shard_keys.iter().position(|k| k == &predicate.column) else {
            // Predicates on non-shard-key columns do not constrain placement.
            return true;
        };
        let value = &tuple[idx];
        match predicate.op {
            MatchOp::Equals => value == &predicate.value,
            MatchOp::NotEquals => value != &predicate.value,
            // Patterns are pre-compiled by `resolve`.
            MatchOp::RegexMatch => pattern.is_some_and(|re| re.is_match(value)),
            MatchOp::RegexNotMatch => !pattern.is_some_and(|re| re.is_match(value)),
        }
    }
}

impl ShardKeyMatcher for StaticShardKeyMatcher {
    fn resolve(&self, shard_key_predicates: &[Predicate]) -> PlanResult<Vec<ShardKeyCombination>> {
        // Compile each regex once per call, anchored at both ends.
        let mut patterns: Vec<Option<Regex>> = Vec::with_capacity(shard_key_predicates.len());
        for pred in shard_key_predicates {
            if pred.is_open() {
                let re = Regex::new(&format!("^(?:{})$", pred.value)).map_err(|err| {
                    PlanError::Validation(format!(
                        "invalid shard-key regex {}: {err}",
                        pred
                    ))
                })?;
                patterns.push(Some(re));
            } else {
                patterns.push(None);
            }
        }

        let mut combinations = Vec::new();
        for tuple in &self.universe {
            let matched = shard_key_predicates
                .iter()
                .zip(&patterns)
                .all(|(pred, pattern)| self.tuple_matches(tuple, pred, pattern.as_ref()));
            if matched {
                let predicates = self
                    .shard_keys
                    .iter()
                    .zip(tuple)
                    .map(|(key, value)| Predicate::equals(key.clone(), value.clone()))
                    .collect();
                combinations.push(ShardKeyCombination::new(predicates, &self.shard_keys)?);
            }
        }
        Ok(combinations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard_keys() -> Vec<String> {
        vec!["tenant".to_string(), "env".to_string()]
    }

    fn matcher() -> StaticShardKeyMatcher {
        let mut m = StaticShardKeyMatcher::new(shard_keys());
        for (tenant, env) in [
            ("acme", "prod"),
            ("acme", "dev"),
            ("globex", "prod"),
            ("initech", "prod"),
        ] {
            m.register(vec![tenant.to_string(), env.to_string()]).unwrap();
        }
        m
    }

    #[test]
    fn combination_rejects_regex_predicates() {
        let result = ShardKeyCombination::new(
            vec![
                Predicate::regex_match("tenant", "acme.*"),
                Predicate::equals("env", "prod"),
            ],
            &shard_keys(),
        );
        assert!(matches!(result, Err(PlanError::Validation(_))));
    }

    #[test]
    fn combination_rejects_partial_bindings() {
        let result = ShardKeyCombination::new(
            vec![Predicate::equals("tenant", "acme")],
            &shard_keys(),
        );
        assert!(matches!(result, Err(PlanError::Validation(_))));
    }

    #[test]
    fn equals_predicates_filter_exactly() {
        let combos = matcher()
            .resolve(&[
                Predicate::equals("tenant", "acme"),
                Predicate::equals("env", "prod"),
            ])
            .unwrap();
        assert_eq!(combos.len(), 1);
        assert_eq!(combos[0].value_of("tenant"), Some("acme"));
        assert_eq!(combos[0].value_of("env"), Some("prod"));
    }

    #[test]
    fn regex_is_anchored_and_resolves_in_registration_order() {
        let combos = matcher()
            .resolve(&[
                Predicate::regex_match("tenant", "acme|globex"),
                Predicate::equals("env", "prod"),
            ])
            .unwrap();
        let tenants: Vec<_> = combos.iter().map(|c| c.value_of("tenant").unwrap()).collect();
        assert_eq!(tenants, vec!["acme", "globex"]);

        // `acm` must not match `acme` because patterns are anchored.
        let combos = matcher()
            .resolve(&[Predicate::regex_match("tenant", "acm")])
            .unwrap();
        assert!(combos.is_empty());
    }

    #[test]
    fn unconstrained_columns_fan_out_across_the_universe() {
        let combos = matcher()
            .resolve(&[Predicate::regex_match("tenant", "acme")])
            .unwrap();
        // env is unconstrained, so both acme tuples match.
        assert_eq!(combos.len(), 2);
        assert_eq!(combos[0].value_of("env"), Some("prod"));
        assert_eq!(combos[1].value_of("env"), Some("dev"));
    }

    #[test]
    fn regex_not_match_excludes_partitions() {
        let combos = matcher()
            .resolve(&[
                Predicate::regex_not_match("tenant", "acme|initech"),
                Predicate::equals("env", "prod"),
            ])
            .unwrap();
        assert_eq!(combos.len(), 1);
        assert_eq!(combos[0].value_of("tenant"), Some("globex"));
    }

    #[test]
    fn invalid_pattern_is_a_validation_error() {
        let result = matcher().resolve(&[Predicate::regex_match("tenant", "ac(me")]);
        assert!(matches!(result, Err(PlanError::Validation(_))));
    }
}
