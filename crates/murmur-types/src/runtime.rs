// Runtime Catalog Types
// Polymorphic runtime definitions loaded from runtimes.json (and the legacy
// cli-providers.json), discriminated by the "type" field.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Provider/model selection, possibly partial.
///
/// Used both as a catalog default and as a per-agent override; see
/// [`ModelSpec::merge`] for how the two combine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "modelID"
    )]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl ModelSpec {
    /// Merge an explicit spec over a registry default.
    ///
    /// `provider` and `model_id` fall through to the default when the
    /// explicit value is absent; parameter maps merge key-by-key with
    /// explicit entries winning. Both inputs absent yields `None`.
    pub fn merge(explicit: Option<&ModelSpec>, default: Option<&ModelSpec>) -> Option<ModelSpec> {
        match (explicit, default) {
            (None, None) => None,
            (Some(spec), None) => Some(spec.clone()),
            (None, Some(spec)) => Some(spec.clone()),
            (Some(explicit), Some(default)) => {
                let mut parameters = default.parameters.clone();
                for (key, value) in &explicit.parameters {
                    parameters.insert(key.clone(), value.clone());
                }
                Some(ModelSpec {
                    provider: explicit.provider.clone().or_else(|| default.provider.clone()),
                    model_id: explicit.model_id.clone().or_else(|| default.model_id.clone()),
                    parameters,
                })
            }
        }
    }
}

/// One runtime definition from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuntimeEntry {
    #[serde(rename_all = "camelCase")]
    Cli {
        /// Unique id; looked up case-insensitively
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_model: Option<ModelSpec>,
        executable: String,
        /// Argv template; `{name}` placeholders are resolved at spawn time
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
        /// Literal placeholder values merged below `{prompt}`/`{model}`
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        defaults: BTreeMap<String, String>,
    },
    #[serde(rename_all = "camelCase")]
    Api {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_model: Option<ModelSpec>,
        base_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key_env_var: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Sdk {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_model: Option<ModelSpec>,
        sdk_name: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        options: BTreeMap<String, String>,
    },
}

impl RuntimeEntry {
    pub fn id(&self) -> &str {
        match self {
            Self::Cli { id, .. } | Self::Api { id, .. } | Self::Sdk { id, .. } => id,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        match self {
            Self::Cli { display_name, .. }
            | Self::Api { display_name, .. }
            | Self::Sdk { display_name, .. } => display_name.as_deref(),
        }
    }

    pub fn default_model(&self) -> Option<&ModelSpec> {
        match self {
            Self::Cli { default_model, .. }
            | Self::Api { default_model, .. }
            | Self::Sdk { default_model, .. } => default_model.as_ref(),
        }
    }
}

/// Top-level shape of runtimes.json.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeCatalog {
    pub runtimes: Vec<RuntimeEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(provider: Option<&str>, model: Option<&str>) -> ModelSpec {
        ModelSpec {
            provider: provider.map(String::from),
            model_id: model.map(String::from),
            parameters: BTreeMap::new(),
        }
    }

    #[test]
    fn merge_falls_through_to_default() {
        let explicit = spec(None, Some("sonnet"));
        let default = spec(Some("anthropic"), Some("haiku"));
        let merged = ModelSpec::merge(Some(&explicit), Some(&default)).unwrap();
        assert_eq!(merged.provider.as_deref(), Some("anthropic"));
        assert_eq!(merged.model_id.as_deref(), Some("sonnet"));
    }

    #[test]
    fn merge_parameters_key_by_key() {
        let mut explicit = spec(None, None);
        explicit.parameters.insert("temperature".into(), "0".into());
        let mut default = spec(Some("openai"), None);
        default.parameters.insert("temperature".into(), "1".into());
        default.parameters.insert("max_tokens".into(), "4096".into());

        let merged = ModelSpec::merge(Some(&explicit), Some(&default)).unwrap();
        assert_eq!(merged.parameters.get("temperature").unwrap(), "0");
        assert_eq!(merged.parameters.get("max_tokens").unwrap(), "4096");
    }

    #[test]
    fn merge_both_absent_is_none() {
        assert!(ModelSpec::merge(None, None).is_none());
    }

    #[test]
    fn catalog_discriminates_on_type() {
        let json = r#"{
            "runtimes": [
                {"type": "cli", "id": "claude", "executable": "claude",
                 "args": ["-p", "{prompt}", "--model", "{model}"]},
                {"type": "api", "id": "remote", "baseUrl": "https://example.invalid",
                 "apiKeyEnvVar": "REMOTE_KEY"},
                {"type": "sdk", "id": "native", "sdkName": "agent-sdk"}
            ]
        }"#;
        let catalog: RuntimeCatalog = serde_json::from_str(json).unwrap();
        assert_eq!(catalog.runtimes.len(), 3);
        assert!(matches!(catalog.runtimes[0], RuntimeEntry::Cli { .. }));
        assert!(matches!(catalog.runtimes[1], RuntimeEntry::Api { .. }));
        assert!(matches!(catalog.runtimes[2], RuntimeEntry::Sdk { .. }));
    }
}
