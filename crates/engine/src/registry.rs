//! Registered adventure definitions.
//!
//! Definitions are validated once here and then shared read-only by every
//! instance through an `Arc`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use eira_domain::{Adventure, AdventureId, DomainError};
use serde::Deserialize;
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// A definition file holds one adventure or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum DefinitionFile {
    Many(Vec<Adventure>),
    One(Box<Adventure>),
}

#[derive(Default)]
pub struct AdventureRegistry {
    adventures: DashMap<AdventureId, Arc<Adventure>>,
}

impl AdventureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register `adventure`, replacing any definition with the
    /// same id. Running instances keep the definition they started with.
    pub fn register(&self, adventure: Adventure) -> Result<Arc<Adventure>, DomainError> {
        adventure.validate()?;
        let adventure = Arc::new(adventure);
        let previous = self
            .adventures
            .insert(adventure.id.clone(), Arc::clone(&adventure));
        tracing::info!(
            adventure_id = %adventure.id,
            checkpoints = adventure.checkpoints.len(),
            replaced = previous.is_some(),
            "Adventure registered"
        );
        Ok(adventure)
    }

    pub fn get(&self, id: &AdventureId) -> Option<Arc<Adventure>> {
        self.adventures.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: &AdventureId) -> Option<Arc<Adventure>> {
        self.adventures.remove(id).map(|(_, adventure)| adventure)
    }

    /// All definitions, ordered by id.
    pub fn adventures(&self) -> Vec<Arc<Adventure>> {
        let mut all: Vec<Arc<Adventure>> = self
            .adventures
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn len(&self) -> usize {
        self.adventures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adventures.is_empty()
    }

    /// Register every adventure in a JSON document. Nothing is registered if
    /// any definition fails to parse or validate.
    pub fn load_json(&self, json: &str) -> Result<Vec<Arc<Adventure>>, RegistryError> {
        let adventures = match serde_json::from_str::<DefinitionFile>(json)? {
            DefinitionFile::Many(adventures) => adventures,
            DefinitionFile::One(adventure) => vec![*adventure],
        };
        for adventure in &adventures {
            adventure.validate()?;
        }
        adventures
            .into_iter()
            .map(|adventure| self.register(adventure).map_err(RegistryError::from))
            .collect()
    }

    pub async fn load_file(&self, path: &Path) -> Result<Vec<Arc<Adventure>>, RegistryError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|source| RegistryError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let loaded = self.load_json(&content)?;
        tracing::info!(path = %path.display(), count = loaded.len(), "Loaded adventure definitions");
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eira_domain::{Checkpoint, CheckpointId, TriggerSpec};
    use std::io::Write;

    const VAULT: &str = r#"{
        "id": "vault",
        "name": "The Vault",
        "checkpoints": [
            {"id": "key", "name": "Find the key",
             "trigger": {"type": "game", "action": "obtainItem", "itemId": "minecraft:tripwire_hook"},
             "unlocks": ["door"]},
            {"id": "door", "name": "Open the door",
             "trigger": {"type": "manual"}, "prerequisites": ["key"]}
        ]
    }"#;

    fn adventure(id: &str) -> Adventure {
        Adventure::new(AdventureId::new(id).unwrap(), id).with_checkpoint(Checkpoint::new(
            CheckpointId::new("only").unwrap(),
            "Only",
            TriggerSpec::Manual,
        ))
    }

    #[test]
    fn register_validates() {
        let registry = AdventureRegistry::new();
        let empty = Adventure::new(AdventureId::new("empty").unwrap(), "Empty");
        assert!(registry.register(empty).is_err());
        assert!(registry.is_empty());

        registry.register(adventure("a")).unwrap();
        assert!(registry.get(&AdventureId::new("a").unwrap()).is_some());
    }

    #[test]
    fn register_replaces_same_id() {
        let registry = AdventureRegistry::new();
        let first = registry.register(adventure("a")).unwrap();
        let second = registry.register(adventure("a").with_description("v2")).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(first.description, "");
        assert_eq!(
            registry.get(&AdventureId::new("a").unwrap()).unwrap().description,
            second.description
        );
    }

    #[test]
    fn adventures_are_sorted() {
        let registry = AdventureRegistry::new();
        registry.register(adventure("b")).unwrap();
        registry.register(adventure("a")).unwrap();
        let ids: Vec<String> = registry.adventures().iter().map(|a| a.id.to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    mod json {
        use super::*;

        #[test]
        fn single_definition() {
            let registry = AdventureRegistry::new();
            let loaded = registry.load_json(VAULT).unwrap();
            assert_eq!(loaded.len(), 1);
            assert_eq!(loaded[0].checkpoints.len(), 2);
        }

        #[test]
        fn list_of_definitions() {
            let registry = AdventureRegistry::new();
            let json = format!("[{}]", VAULT);
            assert_eq!(registry.load_json(&json).unwrap().len(), 1);
        }

        #[test]
        fn invalid_definition_registers_nothing() {
            let registry = AdventureRegistry::new();
            let broken = VAULT.replace(r#""unlocks": ["door"]"#, r#""unlocks": ["ghost"]"#);
            let json = format!("[{}, {}]", VAULT.replace("vault", "other"), broken);
            let err = registry.load_json(&json).unwrap_err();
            assert!(matches!(err, RegistryError::Domain(DomainError::InvalidTrigger(_))));
            assert!(registry.is_empty());
        }

        #[test]
        fn malformed_json() {
            let registry = AdventureRegistry::new();
            assert!(matches!(
                registry.load_json("{ not json"),
                Err(RegistryError::Json(_))
            ));
        }

        #[tokio::test]
        async fn from_file() {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            file.write_all(VAULT.as_bytes()).unwrap();

            let registry = AdventureRegistry::new();
            let loaded = registry.load_file(file.path()).await.unwrap();
            assert_eq!(loaded[0].id, AdventureId::new("vault").unwrap());
        }

        #[tokio::test]
        async fn missing_file() {
            let registry = AdventureRegistry::new();
            let err = registry
                .load_file(Path::new("/definitely/not/here.json"))
                .await
                .unwrap_err();
            assert!(matches!(err, RegistryError::Io { .. }));
        }
    }
}
