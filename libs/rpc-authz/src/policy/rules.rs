//! Declarative rule-document policy.
//!
//! ```yaml
//! default: deny
//! rules:
//!   - name: operators-run-echo
//!     effect: allow
//!     methods: ["/Exec.Exec/Run"]
//!     principals: ["group:operators"]
//!     message: { command: "/bin/echo" }
//!   - name: no-verbosity-changes
//!     effect: deny
//!     methods: ["/Logging.Logging/Set*"]
//! ```
//!
//! A matching `deny` rule always wins; otherwise any matching `allow` grants
//! access; otherwise `default` applies.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use figment::Figment;
use figment::providers::{Format, Yaml};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{PolicyDecision, PolicyError, PolicyEvaluator};
use crate::input::AuthInput;

const GROUP_PREFIX: &str = "group:";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    #[default]
    Deny,
}

/// Parsed policy document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyDocument {
    /// Decision when no rule matches (default: `deny`).
    pub default: Effect,
    pub rules: Vec<Rule>,
}

/// One rule. Every populated matcher must hold for the rule to match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub effect: Effect,
    /// Full method names; a trailing `*` matches any suffix. Empty matches all.
    #[serde(default)]
    pub methods: Vec<String>,
    /// Peer principal ids, or `group:<name>`. Empty matches all.
    #[serde(default)]
    pub principals: Vec<String>,
    /// Structural subset the message must contain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    /// Metadata values that must be present.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Rule {
    fn label(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| format!("#{index}"))
    }

    fn matches(&self, input: &AuthInput) -> bool {
        self.matches_method(&input.method)
            && self.matches_principal(input)
            && self
                .message
                .as_ref()
                .is_none_or(|expected| is_subset(expected, &input.message))
            && self.metadata.iter().all(|(key, wanted)| {
                input
                    .metadata
                    .get(key)
                    .is_some_and(|values| values.iter().any(|v| v == wanted))
            })
    }

    fn matches_method(&self, method: &str) -> bool {
        self.methods.is_empty()
            || self
                .methods
                .iter()
                .any(|pattern| match pattern.strip_suffix('*') {
                    Some(prefix) => method.starts_with(prefix),
                    None => pattern == method,
                })
    }

    fn matches_principal(&self, input: &AuthInput) -> bool {
        if self.principals.is_empty() {
            return true;
        }
        let groups = input
            .peer
            .as_ref()
            .and_then(|p| p.principal.as_ref())
            .map(|p| p.groups.as_slice())
            .unwrap_or_default();
        let principal = input.peer_principal();

        self.principals
            .iter()
            .any(|wanted| match wanted.strip_prefix(GROUP_PREFIX) {
                Some(group) => groups.iter().any(|g| g == group),
                None => principal == Some(wanted.as_str()),
            })
    }

    fn validate(&self, index: usize) -> Result<(), PolicyError> {
        for pattern in &self.methods {
            let body = pattern.strip_suffix('*').unwrap_or(pattern);
            if !pattern.starts_with('/') || body.contains('*') {
                return Err(PolicyError::InvalidDocument(format!(
                    "rule {}: method pattern '{pattern}' must start with '/' and may only end with '*'",
                    self.label(index)
                )));
            }
        }
        if self.principals.iter().any(String::is_empty) {
            return Err(PolicyError::InvalidDocument(format!(
                "rule {}: empty principal",
                self.label(index)
            )));
        }
        Ok(())
    }
}

/// `expected` is contained in `actual`: objects match key-wise and
/// recursively, everything else by equality.
fn is_subset(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => expected
            .iter()
            .all(|(key, value)| actual.get(key).is_some_and(|a| is_subset(value, a))),
        _ => expected == actual,
    }
}

/// Evaluator over a [`PolicyDocument`].
#[derive(Debug, Clone)]
pub struct RulePolicy {
    document: PolicyDocument,
}

impl RulePolicy {
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidDocument`] if a rule is malformed.
    pub fn new(document: PolicyDocument) -> Result<Self, PolicyError> {
        for (index, rule) in document.rules.iter().enumerate() {
            rule.validate(index)?;
        }
        Ok(Self { document })
    }

    /// Parse a YAML (or JSON) policy document.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidDocument`] if the text does not parse or
    /// a rule is malformed.
    pub fn from_yaml(text: &str) -> Result<Self, PolicyError> {
        let document: PolicyDocument = Figment::from(Yaml::string(text))
            .extract()
            .map_err(|e| PolicyError::InvalidDocument(e.to_string()))?;
        Self::new(document)
    }

    /// Read and parse a policy document from disk.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Read`] if the file cannot be read, or
    /// [`PolicyError::InvalidDocument`] if it does not parse.
    pub fn from_path(path: &Path) -> Result<Self, PolicyError> {
        let text = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    #[must_use]
    pub fn document(&self) -> &PolicyDocument {
        &self.document
    }

    /// Evaluate `input` against the rules.
    #[must_use]
    pub fn decide(&self, input: &AuthInput) -> PolicyDecision {
        let mut allowed_by = None;
        for (index, rule) in self.document.rules.iter().enumerate() {
            if !rule.matches(input) {
                continue;
            }
            match rule.effect {
                Effect::Deny => {
                    return PolicyDecision::deny()
                        .with_diagnostic(format!("denied by rule {}", rule.label(index)));
                }
                Effect::Allow => {
                    if allowed_by.is_none() {
                        allowed_by = Some(rule.label(index));
                    }
                }
            }
        }

        match (allowed_by, self.document.default) {
            (Some(label), _) => {
                PolicyDecision::allow().with_diagnostic(format!("allowed by rule {label}"))
            }
            (None, Effect::Allow) => PolicyDecision::allow().with_diagnostic("allowed by default"),
            (None, Effect::Deny) => PolicyDecision::deny().with_diagnostic("no rule matched"),
        }
    }
}

#[async_trait]
impl PolicyEvaluator for RulePolicy {
    async fn eval(&self, input: &AuthInput) -> Result<PolicyDecision, PolicyError> {
        Ok(self.decide(input))
    }
}
