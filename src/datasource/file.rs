//! File Repository
//!
//! Keeps models in memory and mirrors them to `<directory>/<NAME>.json`, a
//! JSON array of `[id, model]` pairs. The file is rewritten after every
//! mutation and on close.

use crate::datasource::memory::MemoryRepository;
use crate::domain::model::{Model, ModelId};
use crate::domain::ports::{LoadOptions, Query, Repository};
use crate::error::Result;
use crate::serializer::Serializer;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Repository persisted to a JSON file
pub struct FileRepository {
    memory: MemoryRepository,
    path: RwLock<PathBuf>,
    serializer: RwLock<Option<Arc<Serializer>>>,
    write_lock: Mutex<()>,
}

impl FileRepository {
    /// Store `name` under `directory`
    pub fn new(name: impl Into<String>, directory: impl AsRef<Path>) -> Self {
        let name = name.into();
        let path = file_path(directory.as_ref(), &name);
        Self {
            memory: MemoryRepository::new(name),
            path: RwLock::new(path),
            serializer: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.path.read().clone()
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Rewrite the backing file from memory
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let serializer = self.serializer.read().clone();

        let entries = self
            .memory
            .snapshot()
            .into_iter()
            .map(|(id, model)| {
                let document = model.to_value()?;
                let document = match &serializer {
                    Some(serializer) => serializer.serialize_tree(document),
                    None => document,
                };
                Ok(Value::Array(vec![Value::String(id.to_string()), document]))
            })
            .collect::<Result<Vec<Value>>>()?;

        let path = self.path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, serde_json::to_vec_pretty(&entries)?).await?;
        debug!(path = %path.display(), models = entries.len(), "repository flushed");
        Ok(())
    }

    async fn read(&self, options: &LoadOptions) -> Result<usize> {
        let path = self.path();
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no persisted models");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(0);
        }

        let entries: Vec<(String, Value)> = serde_json::from_str(&contents)?;
        let mut loaded = 0;
        for (id, document) in entries {
            let document = match &options.serializer {
                Some(serializer) => serializer.deserialize_tree(document),
                None => document,
            };
            match (options.hydrate)(document) {
                Ok(model) => {
                    self.memory.insert(ModelId::from(id), model);
                    loaded += 1;
                }
                Err(e) => warn!(path = %path.display(), id = %id, error = %e, "skipping unreadable model"),
            }
        }
        Ok(loaded)
    }
}

fn file_path(directory: &Path, name: &str) -> PathBuf {
    directory.join(format!("{}.json", name.to_uppercase()))
}

#[async_trait]
impl Repository for FileRepository {
    fn name(&self) -> &str {
        self.memory.name()
    }

    async fn find(&self, id: &ModelId) -> Result<Option<Model>> {
        self.memory.find(id).await
    }

    async fn save(&self, id: &ModelId, model: Model) -> Result<Model> {
        let saved = self.memory.save(id, model).await?;
        self.flush().await?;
        Ok(saved)
    }

    async fn update(&self, id: &ModelId, changes: Map<String, Value>) -> Result<Model> {
        let updated = self.memory.update(id, changes).await?;
        self.flush().await?;
        Ok(updated)
    }

    async fn delete(&self, id: &ModelId) -> Result<()> {
        self.memory.delete(id).await?;
        self.flush().await
    }

    async fn list(&self, query: Option<&Query>) -> Result<Vec<Model>> {
        self.memory.list(query).await
    }

    async fn load(&self, options: LoadOptions) -> Result<()> {
        if let Some(directory) = &options.directory {
            *self.path.write() = file_path(directory, self.memory.name());
        }
        *self.serializer.write() = options.serializer.clone();

        self.memory.clear();
        let loaded = self.read(&options).await?;
        info!(repository = %self.memory.name(), path = %self.path().display(), loaded, "models loaded");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::{KeyMatch, Serializer};
    use serde_json::json;
    use tempfile::TempDir;

    fn hydrate() -> crate::domain::ports::Hydrate {
        Arc::new(Model::from_value)
    }

    fn order(fields: Value) -> Model {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Model::new("ORDER".into(), fields, None)
    }

    #[tokio::test]
    async fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let repo = FileRepository::new("order", dir.path());
        let m = order(json!({"qty": 2}));
        let id = m.id().clone();
        repo.save(&id, m.clone()).await.unwrap();

        assert_eq!(repo.path(), dir.path().join("ORDER.json"));
        let raw: Value = serde_json::from_str(&std::fs::read_to_string(repo.path()).unwrap()).unwrap();
        assert_eq!(raw[0][0], json!(id.as_str()));
        assert_eq!(raw[0][1]["qty"], json!(2));

        let reopened = FileRepository::new("order", dir.path());
        reopened
            .load(LoadOptions {
                hydrate: hydrate(),
                serializer: None,
                directory: None,
            })
            .await
            .unwrap();
        assert_eq!(reopened.find(&id).await.unwrap(), Some(m));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let repo = FileRepository::new("order", dir.path().join("nested"));
        repo.load(LoadOptions {
            hydrate: hydrate(),
            serializer: None,
            directory: None,
        })
        .await
        .unwrap();
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_serializer_applied_on_disk() {
        let dir = TempDir::new().unwrap();
        let mut serializer = Serializer::new();
        serializer.add_rules(Serializer::map_rules(KeyMatch::exact("stock")));
        let options = LoadOptions {
            hydrate: hydrate(),
            serializer: Some(Arc::new(serializer)),
            directory: Some(dir.path().to_path_buf()),
        };

        let repo = FileRepository::new("order", "/nonexistent");
        repo.load(options.clone()).await.unwrap();
        let m = order(json!({"stock": {"a": 1, "b": 2}}));
        repo.save(&m.id().clone(), m.clone()).await.unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(repo.path()).unwrap()).unwrap();
        assert_eq!(raw[0][1]["stock"], json!([["a", 1], ["b", 2]]));

        let reopened = FileRepository::new("order", dir.path());
        reopened.load(options).await.unwrap();
        let restored = reopened.find(m.id()).await.unwrap().unwrap();
        assert_eq!(restored.get("stock"), Some(&json!({"a": 1, "b": 2})));
    }
}
