//! Provisioning rules - static mapping of external identity claims to roles.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const WILDCARD_DOMAIN: &str = "*";

/// Grants `role` when claim `claim` equals `value` (or, for array claims,
/// contains it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimMapping {
    pub claim: String,
    pub value: String,
    pub role: String,
}

impl ClaimMapping {
    pub fn matches(&self, claims: &ExternalClaims) -> bool {
        match claims.attributes.get(&self.claim) {
            Some(serde_json::Value::String(s)) => s == &self.value,
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .any(|item| item.as_str() == Some(self.value.as_str())),
            Some(serde_json::Value::Bool(b)) => b.to_string() == self.value,
            Some(serde_json::Value::Number(n)) => n.to_string() == self.value,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRule {
    pub provider: String,
    /// Exact email domain, or `*` for the provider-wide fallback.
    pub domain: String,
    #[serde(default)]
    pub claim_mappings: Vec<ClaimMapping>,
    #[serde(default)]
    pub default_role: Option<String>,
    #[serde(default)]
    pub requires_approval: bool,
}

impl ProvisioningRule {
    pub fn is_wildcard(&self) -> bool {
        self.domain == WILDCARD_DOMAIN
    }

    pub fn applies_to_provider(&self, provider: &str) -> bool {
        self.provider.eq_ignore_ascii_case(provider)
    }

    /// Role names this rule grants for `claims`; falls back to the default
    /// role when no mapping matches.
    pub fn role_names_for(&self, claims: &ExternalClaims) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for mapping in &self.claim_mappings {
            if mapping.matches(claims) && !names.contains(&mapping.role) {
                names.push(mapping.role.clone());
            }
        }
        if names.is_empty() {
            names.extend(self.default_role.iter().cloned());
        }
        names
    }
}

/// Identity assertion handed over by the external identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalClaims {
    pub email: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub attributes: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims() -> ExternalClaims {
        serde_json::from_value(json!({
            "email": "ops@corp.example",
            "name": "Ops",
            "groups": ["dashboard-admins", "everyone"],
            "department": "finance"
        }))
        .unwrap()
    }

    fn rule() -> ProvisioningRule {
        ProvisioningRule {
            provider: "okta".to_string(),
            domain: "corp.example".to_string(),
            claim_mappings: vec![
                ClaimMapping {
                    claim: "groups".to_string(),
                    value: "dashboard-admins".to_string(),
                    role: "USER_ADMIN".to_string(),
                },
                ClaimMapping {
                    claim: "department".to_string(),
                    value: "finance".to_string(),
                    role: "ANALYST".to_string(),
                },
            ],
            default_role: Some("ANALYST".to_string()),
            requires_approval: false,
        }
    }

    #[test]
    fn test_maps_array_and_string_claims() {
        assert_eq!(rule().role_names_for(&claims()), vec!["USER_ADMIN", "ANALYST"]);
    }

    #[test]
    fn test_falls_back_to_default_role() {
        let mut rule = rule();
        rule.claim_mappings.clear();
        assert_eq!(rule.role_names_for(&claims()), vec!["ANALYST"]);
    }

    #[test]
    fn test_flattened_attributes_exclude_named_fields() {
        let claims = claims();
        assert!(!claims.attributes.contains_key("email"));
        assert!(claims.attributes.contains_key("groups"));
    }
}
