//! Per-client group access policy.

use serde::{Deserialize, Serialize};

/// Allow/deny lists for one client.
///
/// A non-empty allow list fully determines the outcome; the deny list is only
/// consulted when the allow list is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPolicy {
    #[serde(default)]
    pub allow_groups: Vec<String>,
    #[serde(default)]
    pub deny_groups: Vec<String>,
}

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny(String),
}

impl PolicyDecision {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

impl GroupPolicy {
    #[must_use]
    pub fn new(allow_groups: Vec<String>, deny_groups: Vec<String>) -> Self {
        Self { allow_groups, deny_groups }
    }

    /// Decide whether a user with `user_groups` may use the client.
    #[must_use]
    pub fn evaluate<S: AsRef<str>>(&self, user_groups: &[S]) -> PolicyDecision {
        let member_of = |group: &String| user_groups.iter().any(|g| g.as_ref() == group);

        if !self.allow_groups.is_empty() {
            return if self.allow_groups.iter().any(member_of) {
                PolicyDecision::Allow
            } else {
                PolicyDecision::Deny("not in allowed groups".to_string())
            };
        }

        match self.deny_groups.iter().find(|g| member_of(*g)) {
            Some(denied) => PolicyDecision::Deny(format!("in denied group {denied}")),
            None => PolicyDecision::Allow,
        }
    }
}

/// Evaluate an optional policy. Clients without one are unrestricted.
#[must_use]
pub fn evaluate<S: AsRef<str>>(policy: Option<&GroupPolicy>, user_groups: &[S]) -> PolicyDecision {
    policy.map_or(PolicyDecision::Allow, |p| p.evaluate(user_groups))
}
