//! Desired-state declarations fed into the reconcilers.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::crd::{NamespaceMappingStrategy, PodOffloadingStrategy};
use crate::error::{PeerageError, PeerageResult};

/// Desired peering towards a remote (provider) cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeeringDeclaration {
    #[serde(rename = "remoteClusterID")]
    pub remote_cluster_id: String,
    pub remote_cluster_name: String,
    #[serde(rename = "remoteAuthURL")]
    pub remote_auth_url: String,
    pub remote_token: String,
    pub namespace: String,
}

impl PeeringDeclaration {
    /// Reject declarations with empty required fields.
    pub fn validate(&self) -> PeerageResult<()> {
        let fields = [
            ("remoteClusterID", &self.remote_cluster_id),
            ("remoteClusterName", &self.remote_cluster_name),
            ("remoteAuthURL", &self.remote_auth_url),
            ("remoteToken", &self.remote_token),
            ("namespace", &self.namespace),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(PeerageError::invalid(format!("{} must not be empty", name)));
            }
        }
        Ok(())
    }
}

/// Label-matching operator of one selector requirement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl SelectorOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorOperator::In => "In",
            SelectorOperator::NotIn => "NotIn",
            SelectorOperator::Exists => "Exists",
            SelectorOperator::DoesNotExist => "DoesNotExist",
        }
    }
}

impl fmt::Display for SelectorOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for SelectorOperator {
    type Err = PeerageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "In" => Ok(SelectorOperator::In),
            "NotIn" => Ok(SelectorOperator::NotIn),
            "Exists" => Ok(SelectorOperator::Exists),
            "DoesNotExist" => Ok(SelectorOperator::DoesNotExist),
            other => Err(PeerageError::invalid(format!(
                "unknown selector operator {:?} (expect In, NotIn, Exists or DoesNotExist)",
                other
            ))),
        }
    }
}

/// A single `key <operator> values` predicate over remote cluster labels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Prefix (DNS subdomain) + name, as accepted for Kubernetes label keys.
static LABEL_KEY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").expect("valid label name regex"));
static LABEL_KEY_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").expect("valid label prefix regex")
});

fn validate_label_key(key: &str) -> PeerageResult<()> {
    let (prefix, name) = match key.split_once('/') {
        Some((p, n)) => (Some(p), n),
        None => (None, key),
    };
    if let Some(p) = prefix {
        if p.is_empty() || p.len() > 253 || !LABEL_KEY_PREFIX.is_match(p) {
            return Err(PeerageError::invalid(format!("selector key {:?} has an invalid prefix", key)));
        }
    }
    if name.is_empty() || name.len() > 63 || !LABEL_KEY_NAME.is_match(name) {
        return Err(PeerageError::invalid(format!("selector key {:?} is not a valid label key", key)));
    }
    Ok(())
}

impl SelectorRequirement {
    pub fn new(key: impl Into<String>, operator: SelectorOperator, values: Vec<String>) -> Self {
        Self { key: key.into(), operator, values }
    }

    pub fn validate(&self) -> PeerageResult<()> {
        validate_label_key(&self.key)?;
        match self.operator {
            SelectorOperator::In | SelectorOperator::NotIn if self.values.is_empty() => Err(PeerageError::invalid(
                format!("selector on {:?}: operator {} requires at least one value", self.key, self.operator),
            )),
            SelectorOperator::Exists | SelectorOperator::DoesNotExist if !self.values.is_empty() => {
                Err(PeerageError::invalid(format!(
                    "selector on {:?}: operator {} takes no values",
                    self.key, self.operator
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Conjunction of requirements; terms are OR-combined.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SelectorTerm {
    #[serde(default)]
    pub match_expressions: Vec<SelectorRequirement>,
}

/// Desired offloading of one namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OffloadingDeclaration {
    pub namespace: String,
    #[serde(default)]
    pub pod_offloading_strategy: PodOffloadingStrategy,
    #[serde(default)]
    pub namespace_mapping_strategy: NamespaceMappingStrategy,
    #[serde(default)]
    pub cluster_selector_terms: Vec<SelectorTerm>,
}

impl OffloadingDeclaration {
    pub fn validate(&self) -> PeerageResult<()> {
        if self.namespace.trim().is_empty() {
            return Err(PeerageError::invalid("namespace must not be empty"));
        }
        for term in &self.cluster_selector_terms {
            for req in &term.match_expressions {
                req.validate()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl() -> PeeringDeclaration {
        PeeringDeclaration {
            remote_cluster_id: "cc38".into(),
            remote_cluster_name: "milan".into(),
            remote_auth_url: "https://172.19.0.3:30615".into(),
            remote_token: "a0a8".into(),
            namespace: "liqo".into(),
        }
    }

    #[test]
    fn peering_declaration_requires_every_field() {
        assert!(decl().validate().is_ok());
        let mut d = decl();
        d.remote_token = "  ".into();
        let err = d.validate().unwrap_err();
        assert!(matches!(err, PeerageError::InvalidArgument(_)));
        assert!(err.to_string().contains("remoteToken"), "{}", err);
    }

    #[test]
    fn parses_known_operators_only() {
        assert_eq!("NotIn".parse::<SelectorOperator>().unwrap(), SelectorOperator::NotIn);
        assert!(matches!("Gt".parse::<SelectorOperator>(), Err(PeerageError::InvalidArgument(_))));
    }

    #[test]
    fn operator_value_arity_is_enforced() {
        assert!(SelectorRequirement::new("region", SelectorOperator::In, vec![]).validate().is_err());
        assert!(SelectorRequirement::new("region", SelectorOperator::Exists, vec!["x".into()]).validate().is_err());
        assert!(SelectorRequirement::new("region", SelectorOperator::DoesNotExist, vec![]).validate().is_ok());
        assert!(SelectorRequirement::new("region", SelectorOperator::NotIn, vec!["eu".into()]).validate().is_ok());
    }

    #[test]
    fn label_keys_follow_kubernetes_rules() {
        assert!(validate_label_key("liqo.io/provider").is_ok());
        assert!(validate_label_key("topology.kubernetes.io/region").is_ok());
        assert!(validate_label_key("region").is_ok());
        assert!(validate_label_key("").is_err());
        assert!(validate_label_key("/region").is_err());
        assert!(validate_label_key("-region").is_err());
        assert!(validate_label_key("Bad_Prefix/region").is_err());
        assert!(validate_label_key(&"a".repeat(64)).is_err());
    }

    #[test]
    fn offloading_declaration_defaults_from_wire() {
        let d: OffloadingDeclaration = serde_json::from_value(serde_json::json!({ "namespace": "demo" })).unwrap();
        assert_eq!(d.pod_offloading_strategy, PodOffloadingStrategy::LocalAndRemote);
        assert_eq!(d.namespace_mapping_strategy, NamespaceMappingStrategy::DefaultName);
        assert!(d.cluster_selector_terms.is_empty());
    }
}
