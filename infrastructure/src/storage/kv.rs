//! Redis-backed KV storage
//!
//! Key layout under the configured prefix:
//!
//! ```text
//! <prefix>:skills:<name>         skill source
//! <prefix>:skills:<name>:meta    JSON {description, created_at}
//! <prefix>:artifacts:<name>      raw payload
//! <prefix>:artifacts:<name>:meta JSON ArtifactMeta
//! <prefix>:vectors:<name>        JSON {content_hash, vector}
//! <prefix>:deps                  hash: package name -> full spec
//! ```
//!
//! Single-key operations are atomic; listings scan by pattern and accept
//! the resulting eventual consistency.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codemode_application::{
    ArtifactStore, DepsStore, EmbeddingProvider, SkillCatalog, SkillStore, StorageBackend,
    StoredSkill, StoredVector,
};
use codemode_domain::{
    is_valid_artifact_name, ArtifactMeta, DepSpec, StorageAccess, StorageError,
};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::skills::SkillLibrary;

fn kv_err(e: redis::RedisError) -> StorageError {
    StorageError::Unavailable(e.to_string())
}

#[derive(Debug, Serialize, Deserialize)]
struct SkillMetaRecord {
    #[serde(default)]
    description: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorRecord {
    content_hash: String,
    vector: Vec<f32>,
}

/// Skill persistence over Redis keys
pub struct KvSkillStore {
    manager: ConnectionManager,
    prefix: String,
}

impl KvSkillStore {
    fn source_key(&self, name: &str) -> String {
        format!("{}:skills:{name}", self.prefix)
    }

    fn meta_key(&self, name: &str) -> String {
        format!("{}:skills:{name}:meta", self.prefix)
    }

    fn vector_key(&self, name: &str) -> String {
        format!("{}:vectors:{name}", self.prefix)
    }
}

#[async_trait]
impl SkillStore for KvSkillStore {
    async fn get(&self, name: &str) -> Result<Option<StoredSkill>, StorageError> {
        let mut con = self.manager.clone();
        let source: Option<String> = con.get(self.source_key(name)).await.map_err(kv_err)?;
        let Some(source) = source else {
            return Ok(None);
        };
        let meta_raw: Option<String> = con.get(self.meta_key(name)).await.map_err(kv_err)?;
        let (description, created_at) = match meta_raw {
            Some(raw) => match serde_json::from_str::<SkillMetaRecord>(&raw) {
                Ok(meta) => (meta.description, meta.created_at),
                Err(error) => {
                    warn!(skill = name, %error, "ignoring unreadable skill meta");
                    (String::new(), Utc::now())
                }
            },
            None => (String::new(), Utc::now()),
        };
        Ok(Some(StoredSkill {
            name: name.to_string(),
            source,
            description,
            created_at,
        }))
    }

    async fn put(&self, skill: &StoredSkill) -> Result<(), StorageError> {
        if skill.name.is_empty() {
            return Err(StorageError::Conflict("skill name is empty".into()));
        }
        let meta = serde_json::to_string(&SkillMetaRecord {
            description: skill.description.clone(),
            created_at: skill.created_at,
        })
        .map_err(|e| StorageError::Encoding(e.to_string()))?;
        let mut con = self.manager.clone();
        con.set::<_, _, ()>(self.source_key(&skill.name), &skill.source)
            .await
            .map_err(kv_err)?;
        con.set::<_, _, ()>(self.meta_key(&skill.name), meta)
            .await
            .map_err(kv_err)?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let mut con = self.manager.clone();
        let removed: i64 = con.del(self.source_key(name)).await.map_err(kv_err)?;
        con.del::<_, ()>(self.meta_key(name)).await.map_err(kv_err)?;
        con.del::<_, ()>(self.vector_key(name)).await.map_err(kv_err)?;
        Ok(removed > 0)
    }

    async fn list(&self) -> Result<Vec<StoredSkill>, StorageError> {
        let mut con = self.manager.clone();
        let pattern = format!("{}:skills:*", self.prefix);
        let keys: Vec<String> = con.keys(pattern).await.map_err(kv_err)?;
        let prefix = format!("{}:skills:", self.prefix);
        let mut names: Vec<String> = keys
            .into_iter()
            .filter(|k| !k.ends_with(":meta"))
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect();
        names.sort();

        let mut skills = Vec::with_capacity(names.len());
        for name in names {
            if let Some(skill) = self.get(&name).await? {
                skills.push(skill);
            }
        }
        Ok(skills)
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let mut con = self.manager.clone();
        con.exists(self.source_key(name)).await.map_err(kv_err)
    }

    async fn get_vector(&self, name: &str) -> Result<Option<StoredVector>, StorageError> {
        let mut con = self.manager.clone();
        let raw: Option<String> = con.get(self.vector_key(name)).await.map_err(kv_err)?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str::<VectorRecord>(&raw) {
            Ok(record) => Ok(Some(StoredVector {
                content_hash: record.content_hash,
                vector: record.vector,
            })),
            Err(error) => {
                warn!(skill = name, %error, "discarding corrupt embedding cache entry");
                Ok(None)
            }
        }
    }

    async fn put_vector(&self, name: &str, vector: &StoredVector) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&VectorRecord {
            content_hash: vector.content_hash.clone(),
            vector: vector.vector.clone(),
        })
        .map_err(|e| StorageError::Encoding(e.to_string()))?;
        let mut con = self.manager.clone();
        con.set::<_, _, ()>(self.vector_key(name), raw)
            .await
            .map_err(kv_err)
    }

    async fn delete_vector(&self, name: &str) -> Result<(), StorageError> {
        let mut con = self.manager.clone();
        con.del::<_, ()>(self.vector_key(name)).await.map_err(kv_err)
    }
}

/// Artifact persistence over Redis keys
pub struct KvArtifactStore {
    manager: ConnectionManager,
    prefix: String,
}

impl KvArtifactStore {
    fn data_key(&self, name: &str) -> String {
        format!("{}:artifacts:{name}", self.prefix)
    }

    fn meta_key(&self, name: &str) -> String {
        format!("{}:artifacts:{name}:meta", self.prefix)
    }
}

#[async_trait]
impl ArtifactStore for KvArtifactStore {
    async fn save(
        &self,
        name: &str,
        data: &[u8],
        description: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ArtifactMeta, StorageError> {
        if !is_valid_artifact_name(name) {
            return Err(StorageError::Conflict(format!(
                "invalid artifact name '{name}'"
            )));
        }
        let meta = ArtifactMeta {
            name: name.to_string(),
            description: description.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        let meta_raw =
            serde_json::to_string(&meta).map_err(|e| StorageError::Encoding(e.to_string()))?;
        let mut con = self.manager.clone();
        con.set::<_, _, ()>(self.data_key(name), data)
            .await
            .map_err(kv_err)?;
        con.set::<_, _, ()>(self.meta_key(name), meta_raw)
            .await
            .map_err(kv_err)?;
        Ok(meta)
    }

    async fn load(&self, name: &str) -> Result<(Vec<u8>, ArtifactMeta), StorageError> {
        let mut con = self.manager.clone();
        let data: Option<Vec<u8>> = con.get(self.data_key(name)).await.map_err(kv_err)?;
        let Some(data) = data else {
            return Err(StorageError::NotFound(name.to_string()));
        };
        let meta_raw: Option<String> = con.get(self.meta_key(name)).await.map_err(kv_err)?;
        let meta = meta_raw
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_else(|| ArtifactMeta::new(name));
        Ok((data, meta))
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let mut con = self.manager.clone();
        let removed: i64 = con.del(self.data_key(name)).await.map_err(kv_err)?;
        con.del::<_, ()>(self.meta_key(name)).await.map_err(kv_err)?;
        Ok(removed > 0)
    }

    async fn list(&self) -> Result<Vec<ArtifactMeta>, StorageError> {
        let mut con = self.manager.clone();
        let pattern = format!("{}:artifacts:*", self.prefix);
        let keys: Vec<String> = con.keys(pattern).await.map_err(kv_err)?;
        let prefix = format!("{}:artifacts:", self.prefix);
        let mut names: Vec<String> = keys
            .into_iter()
            .filter(|k| !k.ends_with(":meta"))
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect();
        names.sort();

        let mut metas = Vec::with_capacity(names.len());
        for name in names {
            let meta_raw: Option<String> = con.get(self.meta_key(&name)).await.map_err(kv_err)?;
            let meta = meta_raw
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_else(|| ArtifactMeta::new(&name));
            metas.push(meta);
        }
        Ok(metas)
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let mut con = self.manager.clone();
        con.exists(self.data_key(name)).await.map_err(kv_err)
    }
}

/// Dependency declarations in a single Redis hash (name -> full spec)
pub struct KvDepsStore {
    manager: ConnectionManager,
    prefix: String,
}

impl KvDepsStore {
    fn key(&self) -> String {
        format!("{}:deps", self.prefix)
    }
}

#[async_trait]
impl DepsStore for KvDepsStore {
    async fn list(&self) -> Result<Vec<DepSpec>, StorageError> {
        let mut con = self.manager.clone();
        let entries: std::collections::HashMap<String, String> =
            con.hgetall(self.key()).await.map_err(kv_err)?;
        let mut specs = Vec::new();
        for (name, raw) in entries {
            match DepSpec::parse(&raw) {
                Ok(spec) => specs.push(spec),
                Err(error) => warn!(%error, dep = name, "skipping unparsable stored dep"),
            }
        }
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(specs)
    }

    async fn add(&self, spec: &DepSpec) -> Result<(), StorageError> {
        let mut con = self.manager.clone();
        con.hset::<_, _, _, ()>(self.key(), &spec.name, spec.to_string())
            .await
            .map_err(kv_err)
    }

    async fn remove(&self, name: &str) -> Result<bool, StorageError> {
        let mut con = self.manager.clone();
        let removed: i64 = con.hdel(self.key(), name).await.map_err(kv_err)?;
        Ok(removed > 0)
    }
}

/// Redis-backed [`StorageBackend`]
pub struct KvStorage {
    url: String,
    prefix: String,
    skills: Arc<KvSkillStore>,
    artifacts: Arc<KvArtifactStore>,
    deps: Arc<KvDepsStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    catalog: OnceLock<Arc<SkillLibrary>>,
}

impl KvStorage {
    /// Connect to the KV endpoint; fails with `StorageUnavailable` when it
    /// is unreachable.
    pub async fn connect(url: impl Into<String>, prefix: impl Into<String>) -> Result<Self, StorageError> {
        let url = url.into();
        let prefix = prefix.into();
        let client = redis::Client::open(url.as_str()).map_err(kv_err)?;
        let manager = client.get_connection_manager().await.map_err(kv_err)?;
        Ok(Self {
            skills: Arc::new(KvSkillStore {
                manager: manager.clone(),
                prefix: prefix.clone(),
            }),
            artifacts: Arc::new(KvArtifactStore {
                manager: manager.clone(),
                prefix: prefix.clone(),
            }),
            deps: Arc::new(KvDepsStore {
                manager,
                prefix: prefix.clone(),
            }),
            embedder: None,
            catalog: OnceLock::new(),
            url,
            prefix,
        })
    }

    /// Attach an embedding provider for semantic skill search
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl StorageBackend for KvStorage {
    fn skills(&self) -> Arc<dyn SkillStore> {
        Arc::clone(&self.skills) as Arc<dyn SkillStore>
    }

    fn artifacts(&self) -> Arc<dyn ArtifactStore> {
        Arc::clone(&self.artifacts) as Arc<dyn ArtifactStore>
    }

    fn deps(&self) -> Arc<dyn DepsStore> {
        Arc::clone(&self.deps) as Arc<dyn DepsStore>
    }

    fn skill_catalog(&self) -> Arc<dyn SkillCatalog> {
        let library = self
            .catalog
            .get_or_init(|| Arc::new(SkillLibrary::new(self.skills(), self.embedder.clone())));
        Arc::clone(library) as Arc<dyn SkillCatalog>
    }

    fn access(&self) -> StorageAccess {
        StorageAccess::Kv {
            connection_url: self.url.clone(),
            prefix: self.prefix.clone(),
        }
    }
}
