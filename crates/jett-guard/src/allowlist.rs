//! Default-deny permission table.
//!
//! Built once from configuration. There is no method that adds or removes
//! entries, so nothing running after startup can widen its own permissions.
//! Targets that are not plain container names are denied even under a
//! wildcard grant.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use jett_core::config::{AllowEntry, WILDCARD_TARGET};
use jett_core::error::ConfigError;
use jett_core::security::{Operation, OperationKind, PolicyDecision};

const TARGET_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.-]*$";

static TARGET_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// A Docker container name: one path segment, no `..`.
pub fn is_valid_target(target: &str) -> bool {
    let Some(re) = TARGET_RE.get_or_init(|| Regex::new(TARGET_PATTERN).ok()) else {
        return false;
    };
    re.is_match(target) && !target.contains("..")
}

#[derive(Debug, Clone)]
pub struct PolicyAllowlist {
    exact: HashMap<OperationKind, HashSet<String>>,
    wildcard: HashSet<OperationKind>,
}

impl PolicyAllowlist {
    /// Build from typed pairs. Wildcard targets on mutating kinds are rejected.
    pub fn new<I, S>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (OperationKind, S)>,
        S: Into<String>,
    {
        let mut exact: HashMap<OperationKind, HashSet<String>> = HashMap::new();
        let mut wildcard = HashSet::new();
        for (kind, target) in pairs {
            let target = target.into();
            if target == WILDCARD_TARGET {
                if !kind.is_read_only() {
                    return Err(ConfigError::WildcardOnMutatingKind(kind.to_string()));
                }
                wildcard.insert(kind);
            } else if !is_valid_target(&target) {
                return Err(ConfigError::Invalid {
                    field: "governor.allow.target",
                    reason: format!("{target:?} is not a container name"),
                });
            } else {
                exact.entry(kind).or_default().insert(target);
            }
        }
        Ok(Self { exact, wildcard })
    }

    pub fn from_config(entries: &[AllowEntry]) -> Result<Self, ConfigError> {
        let mut pairs = Vec::with_capacity(entries.len());
        for entry in entries {
            let kind: OperationKind = entry
                .kind
                .parse()
                .map_err(|_| ConfigError::UnknownKind(entry.kind.clone()))?;
            pairs.push((kind, entry.target.clone()));
        }
        Self::new(pairs)
    }

    pub fn is_permitted(&self, op: &Operation) -> bool {
        if !is_valid_target(&op.target) {
            return false;
        }
        if self.wildcard.contains(&op.kind) {
            return true;
        }
        self.exact
            .get(&op.kind)
            .is_some_and(|targets| targets.contains(&op.target))
    }

    pub fn decide(&self, op: &Operation) -> PolicyDecision {
        if !is_valid_target(&op.target) {
            PolicyDecision::deny(format!(
                "{} target {:?} is not a container name",
                op.kind, op.target
            ))
        } else if self.wildcard.contains(&op.kind) {
            PolicyDecision::permit(format!("{} permitted on any target", op.kind))
        } else if self.is_permitted(op) {
            PolicyDecision::permit(format!("{} {} allowlisted", op.kind, op.target))
        } else {
            PolicyDecision::deny(format!("{} {} not in allowlist", op.kind, op.target))
        }
    }

    /// Number of exact pairs plus wildcard kinds.
    pub fn len(&self) -> usize {
        self.exact.values().map(HashSet::len).sum::<usize>() + self.wildcard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(kind: OperationKind, target: &str) -> Operation {
        Operation::new(kind, target, "tester")
    }

    #[test]
    fn exact_match_permitted() {
        let list = PolicyAllowlist::new([(OperationKind::Restart, "svcA")]).unwrap();
        assert!(list.is_permitted(&op(OperationKind::Restart, "svcA")));
        assert!(!list.is_permitted(&op(OperationKind::Restart, "svcB")));
        assert!(!list.is_permitted(&op(OperationKind::Stop, "svcA")));
    }

    #[test]
    fn empty_list_denies_everything() {
        let list = PolicyAllowlist::new(Vec::<(OperationKind, String)>::new()).unwrap();
        assert!(list.is_empty());
        for kind in OperationKind::ALL {
            assert!(!list.is_permitted(&op(kind, "redis")));
        }
    }

    #[test]
    fn wildcard_for_read_only_kind() {
        let list = PolicyAllowlist::new([(OperationKind::Status, "*")]).unwrap();
        assert!(list.is_permitted(&op(OperationKind::Status, "anything")));
        assert!(!list.is_permitted(&op(OperationKind::Restart, "anything")));
    }

    #[test]
    fn wildcard_never_admits_path_like_targets() {
        let list =
            PolicyAllowlist::new([(OperationKind::Status, "*"), (OperationKind::Logs, "*")]).unwrap();
        let targets = [
            "../../../../users",
            "redis/../../users",
            "a/b",
            "..",
            "",
            ".hidden",
            "a..b",
            "redis?x=1",
        ];
        for target in targets {
            assert!(!list.is_permitted(&op(OperationKind::Status, target)), "{target}");
            let decision = list.decide(&op(OperationKind::Logs, target));
            assert!(!decision.permitted, "{target}");
            assert!(decision.reason.contains("not a container name"));
        }
        assert!(list.is_permitted(&op(OperationKind::Status, "my-app_1.web")));
    }

    #[test]
    fn malformed_exact_target_rejected() {
        let err = PolicyAllowlist::new([(OperationKind::Restart, "../n8n")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn container_names() {
        assert!(is_valid_target("n8n"));
        assert!(is_valid_target("Postgres-16"));
        assert!(!is_valid_target("-rm"));
        assert!(!is_valid_target("café"));
        assert!(!is_valid_target("a b"));
    }

    #[test]
    fn wildcard_for_mutating_kind_rejected() {
        let err = PolicyAllowlist::new([(OperationKind::Restart, "*")]).unwrap_err();
        assert!(matches!(err, ConfigError::WildcardOnMutatingKind(_)));
    }

    #[test]
    fn decision_reason_names_pair() {
        let list = PolicyAllowlist::new([(OperationKind::Logs, "redis")]).unwrap();
        let denied = list.decide(&op(OperationKind::Stop, "redis"));
        assert!(!denied.permitted);
        assert_eq!(denied.reason, "stop redis not in allowlist");
        assert!(list.decide(&op(OperationKind::Logs, "redis")).permitted);
    }

    #[test]
    fn from_default_config() {
        let cfg = jett_core::AppConfig::default();
        let list = PolicyAllowlist::from_config(&cfg.governor.allow).unwrap();
        assert_eq!(list.len(), 20);
        assert!(list.is_permitted(&op(OperationKind::Restart, "n8n")));
        assert!(!list.is_permitted(&op(OperationKind::Restart, "portainer")));
    }
}
