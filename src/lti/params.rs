// ABOUTME: Launch parameter bag in LTI 1.1 names, plus the LTI 1.3 claim mapping onto it
// ABOUTME: Empty values are treated as absent so both protocol versions read the same way
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::constants::claims;

/// Validated launch parameters keyed by LTI 1.1 name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LaunchParams(BTreeMap<String, String>);

impl LaunchParams {
    /// Empty parameter set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from decoded form pairs; later duplicates win
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    /// Non-empty, trimmed value of `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Set `key`
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Every `(key, value)`, sorted by key
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Number of parameters
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no parameter is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn set_str(&mut self, key: &str, value: Option<&Value>) {
        match value {
            Some(Value::String(text)) if !text.is_empty() => self.insert(key, text.clone()),
            Some(Value::Number(number)) => self.insert(key, number.to_string()),
            Some(Value::Bool(flag)) => self.insert(key, flag.to_string()),
            _ => {}
        }
    }

    /// Map verified LTI 1.3 claims onto LTI 1.1 parameter names
    #[must_use]
    pub fn from_lti13_claims(claims_json: &Value) -> Self {
        let mut params = Self::new();
        let claim = |name: &str| claims_json.get(name);
        let nested = |name: &str, field: &str| claims_json.get(name).and_then(|c| c.get(field));

        params.set_str("user_id", claim("sub"));
        params.set_str("lis_person_name_full", claim("name"));
        params.set_str("lis_person_name_given", claim("given_name"));
        params.set_str("lis_person_name_family", claim("family_name"));
        params.set_str("lis_person_contact_email_primary", claim("email"));

        if let Some(Value::Array(roles)) = claim(claims::ROLES) {
            let joined = roles
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(",");
            params.insert("roles", joined);
        }

        params.set_str("context_id", nested(claims::CONTEXT, "id"));
        params.set_str("context_title", nested(claims::CONTEXT, "title"));
        params.set_str("context_label", nested(claims::CONTEXT, "label"));
        params.set_str("resource_link_id", nested(claims::RESOURCE_LINK, "id"));
        params.set_str("resource_link_title", nested(claims::RESOURCE_LINK, "title"));

        params.set_str(
            "tool_consumer_instance_guid",
            nested(claims::TOOL_PLATFORM, "guid"),
        );
        params.set_str(
            "tool_consumer_info_product_family_code",
            nested(claims::TOOL_PLATFORM, "product_family_code"),
        );
        params.set_str(
            "tool_consumer_instance_name",
            nested(claims::TOOL_PLATFORM, "name"),
        );
        params.set_str("tool_consumer_instance_url", nested(claims::TOOL_PLATFORM, "url"));
        params.set_str(
            "launch_presentation_return_url",
            nested(claims::LAUNCH_PRESENTATION, "return_url"),
        );

        if let Some(Value::Object(custom)) = claim(claims::CUSTOM) {
            for (key, value) in custom {
                params.set_str(&format!("custom_{key}"), Some(value));
            }
        }

        params.set_str("deployment_id", claim(claims::DEPLOYMENT_ID));
        params.set_str("lti_version", claim(claims::VERSION));
        params.set_str("lti_message_type", claim(claims::MESSAGE_TYPE));
        params.set_str("target_link_uri", claim(claims::TARGET_LINK_URI));
        params.set_str("issuer", claim("iss"));
        match claim("aud") {
            Some(Value::Array(audiences)) => params.set_str("client_id", audiences.first()),
            other => params.set_str("client_id", other),
        }
        params
    }
}
