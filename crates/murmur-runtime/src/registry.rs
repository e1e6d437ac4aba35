// Runtime Registry & Factory
// Loads runtime definitions from runtimes.json (or the legacy
// cli-providers.json), answers case-insensitive lookups, and builds drivers
// with the per-agent model override merged over the catalog default.

use std::collections::BTreeMap;
use std::path::Path;

use murmur_core::{MurmurError, Result};
use murmur_types::{AgentProfile, ModelSpec, RuntimeCatalog, RuntimeEntry};
use serde::{Deserialize, Serialize};

use crate::driver::{DriverFactory, RuntimeDriver};
use crate::subprocess::SubprocessDriver;

/// Legacy catalog shape: every entry is implicitly a `cli` runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LegacyProviderFile {
    providers: Vec<LegacyCliProvider>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyCliProvider {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    executable: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    defaults: BTreeMap<String, String>,
}

impl From<LegacyCliProvider> for RuntimeEntry {
    fn from(provider: LegacyCliProvider) -> Self {
        RuntimeEntry::Cli {
            id: provider.id,
            display_name: provider.display_name,
            default_model: None,
            executable: provider.executable,
            args: provider.args,
            env: provider.env,
            defaults: provider.defaults,
        }
    }
}

pub struct RuntimeRegistry {
    /// Ordered as loaded, for faithful re-emission
    entries: Vec<RuntimeEntry>,
}

impl RuntimeRegistry {
    pub fn new(catalog: RuntimeCatalog) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for entry in &catalog.runtimes {
            if !seen.insert(entry.id().to_ascii_lowercase()) {
                return Err(MurmurError::Config(format!(
                    "duplicate runtime id: {}",
                    entry.id()
                )));
            }
        }
        Ok(Self {
            entries: catalog.runtimes,
        })
    }

    /// Load `runtimes.json`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let catalog: RuntimeCatalog = serde_json::from_str(&data)?;
        Self::new(catalog)
    }

    /// Load the legacy `cli-providers.json`.
    pub fn load_legacy(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let file: LegacyProviderFile = serde_json::from_str(&data)?;
        Self::new(RuntimeCatalog {
            runtimes: file.providers.into_iter().map(RuntimeEntry::from).collect(),
        })
    }

    pub fn get(&self, id: &str) -> Option<&RuntimeEntry> {
        self.entries
            .iter()
            .find(|entry| entry.id().eq_ignore_ascii_case(id))
    }

    pub fn entries(&self) -> &[RuntimeEntry] {
        &self.entries
    }

    /// Re-emit the catalog; loading the emission yields structurally equal
    /// entries.
    pub fn to_catalog(&self) -> RuntimeCatalog {
        RuntimeCatalog {
            runtimes: self.entries.clone(),
        }
    }
}

impl DriverFactory for RuntimeRegistry {
    fn create(&self, profile: &AgentProfile) -> Result<Box<dyn RuntimeDriver>> {
        let entry = self.get(&profile.runtime_id).ok_or_else(|| {
            MurmurError::NotFound(format!("runtime {}", profile.runtime_id))
        })?;

        let effective = ModelSpec::merge(profile.model.as_ref(), entry.default_model());

        match entry {
            RuntimeEntry::Cli {
                executable,
                args,
                env,
                defaults,
                ..
            } => {
                let (provider, model_id) = effective
                    .map(|spec| (spec.provider, spec.model_id))
                    .unwrap_or((None, None));
                Ok(Box::new(SubprocessDriver::new(
                    profile.id.clone(),
                    executable.clone(),
                    args.clone(),
                    env.clone(),
                    defaults.clone(),
                    provider,
                    model_id,
                )))
            }
            RuntimeEntry::Api { id, .. } => Err(MurmurError::Runtime(format!(
                "runtime {id} is an api runtime; api drivers are not implemented"
            ))),
            RuntimeEntry::Sdk { id, .. } => Err(MurmurError::Runtime(format!(
                "runtime {id} is an sdk runtime; sdk drivers are not implemented"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CATALOG: &str = r#"{
        "runtimes": [
            {
                "type": "cli",
                "id": "claude",
                "displayName": "Claude CLI",
                "defaultModel": {"provider": "anthropic", "modelId": "haiku"},
                "executable": "claude",
                "args": ["-p", "{prompt}", "--model", "{model}"],
                "env": {"NO_COLOR": "1"},
                "defaults": {"format": "stream-json"}
            },
            {
                "type": "api",
                "id": "hosted",
                "baseUrl": "https://example.invalid/v1",
                "apiKeyEnvVar": "HOSTED_KEY"
            }
        ]
    }"#;

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = RuntimeRegistry::new(serde_json::from_str(CATALOG).unwrap()).unwrap();
        assert!(registry.get("CLAUDE").is_some());
        assert!(registry.get("Claude").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let catalog: RuntimeCatalog = serde_json::from_str(
            r#"{"runtimes": [
                {"type": "cli", "id": "x", "executable": "x"},
                {"type": "cli", "id": "X", "executable": "x"}
            ]}"#,
        )
        .unwrap();
        assert!(RuntimeRegistry::new(catalog).is_err());
    }

    #[test]
    fn catalog_round_trips() {
        let registry = RuntimeRegistry::load(write_temp(CATALOG)).unwrap();
        let emitted = serde_json::to_string(&registry.to_catalog()).unwrap();
        let reloaded = RuntimeRegistry::load(write_temp(&emitted)).unwrap();
        assert_eq!(registry.entries(), reloaded.entries());
    }

    #[test]
    fn legacy_file_loads_as_cli_entries() {
        let legacy = r#"{
            "providers": [
                {"id": "aider", "executable": "aider", "args": ["-m", "{prompt}"]}
            ]
        }"#;
        let registry = RuntimeRegistry::load_legacy(write_temp(legacy)).unwrap();
        assert!(matches!(
            registry.get("aider"),
            Some(RuntimeEntry::Cli { .. })
        ));
    }

    #[test]
    fn factory_rejects_reserved_variants() {
        let registry = RuntimeRegistry::new(serde_json::from_str(CATALOG).unwrap()).unwrap();
        let profile = AgentProfile {
            id: "a1".to_string(),
            capabilities: Vec::new(),
            visual: Default::default(),
            runtime_id: "hosted".to_string(),
            model: None,
            capacity: None,
            blackboard_keys: Vec::new(),
        };
        assert!(registry.create(&profile).is_err());
    }

    #[test]
    fn factory_builds_cli_driver_with_merged_model() {
        let registry = RuntimeRegistry::new(serde_json::from_str(CATALOG).unwrap()).unwrap();
        let profile = AgentProfile {
            id: "a1".to_string(),
            capabilities: Vec::new(),
            visual: Default::default(),
            runtime_id: "claude".to_string(),
            model: Some(ModelSpec {
                provider: None,
                model_id: Some("sonnet".to_string()),
                parameters: Default::default(),
            }),
            capacity: None,
            blackboard_keys: Vec::new(),
        };
        assert!(registry.create(&profile).is_ok());
    }

    fn write_temp(contents: &str) -> tempfile::TempPath {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.into_temp_path()
    }
}
