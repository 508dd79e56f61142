//! File-based storage
//!
//! Layout under the base directory:
//!
//! ```text
//! <base>/skills/<name>.lua       skill source
//! <base>/skills/<name>.meta      JSON {description, created_at}
//! <base>/artifacts/<name>        raw payload
//! <base>/artifacts/<name>.meta   JSON ArtifactMeta
//! <base>/vectors/<name>.json     embedding cache {content_hash, vector}
//! <base>/requirements.txt        one dep spec per line
//! ```
//!
//! All writes are atomic (temp file in the target directory, then rename),
//! so concurrent readers never observe partial entities.

use std::io::Write;
use std::path::{Path, PathBuf};
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
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::skills::SkillLibrary;

const SKILL_EXT: &str = "lua";
const META_EXT: &str = "meta";

async fn atomic_write(path: &Path, bytes: Vec<u8>) -> Result<(), StorageError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
        let dir = path
            .parent()
            .ok_or_else(|| StorageError::Conflict(format!("{} has no parent", path.display())))?;
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| StorageError::Unavailable(e.to_string()))?
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::Io(e)),
    }
}

async fn remove_if_present(path: &Path) -> Result<bool, StorageError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::Io(e)),
    }
}

/// Sidecar metadata persisted beside each skill source
#[derive(Debug, Serialize, Deserialize)]
struct SkillMetaFile {
    #[serde(default)]
    description: String,
    created_at: DateTime<Utc>,
}

/// Skill persistence over `<base>/skills` and `<base>/vectors`
pub struct FileSkillStore {
    skills_dir: PathBuf,
    vectors_dir: PathBuf,
}

impl FileSkillStore {
    pub fn new(base: &Path) -> Self {
        Self {
            skills_dir: base.join("skills"),
            vectors_dir: base.join("vectors"),
        }
    }

    fn source_path(&self, name: &str) -> PathBuf {
        self.skills_dir.join(format!("{name}.{SKILL_EXT}"))
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.skills_dir.join(format!("{name}.{META_EXT}"))
    }

    fn vector_path(&self, name: &str) -> PathBuf {
        self.vectors_dir.join(format!("{name}.json"))
    }

    async fn read_meta(&self, name: &str) -> Result<Option<SkillMetaFile>, StorageError> {
        match read_optional(&self.meta_path(name)).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Corrupt {
                    name: name.to_string(),
                    reason: format!("bad meta file: {e}"),
                }),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SkillStore for FileSkillStore {
    async fn get(&self, name: &str) -> Result<Option<StoredSkill>, StorageError> {
        let Some(bytes) = read_optional(&self.source_path(name)).await? else {
            return Ok(None);
        };
        let source = String::from_utf8(bytes).map_err(|e| StorageError::Corrupt {
            name: name.to_string(),
            reason: format!("source is not UTF-8: {e}"),
        })?;
        let meta = match self.read_meta(name).await {
            Ok(meta) => meta,
            Err(error) => {
                warn!(skill = name, %error, "ignoring unreadable skill meta");
                None
            }
        };
        let (description, created_at) = match meta {
            Some(m) => (m.description, m.created_at),
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
        atomic_write(&self.source_path(&skill.name), skill.source.clone().into_bytes()).await?;
        let meta = SkillMetaFile {
            description: skill.description.clone(),
            created_at: skill.created_at,
        };
        let bytes = serde_json::to_vec_pretty(&meta)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;
        atomic_write(&self.meta_path(&skill.name), bytes).await
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let existed = remove_if_present(&self.source_path(name)).await?;
        remove_if_present(&self.meta_path(name)).await?;
        remove_if_present(&self.vector_path(name)).await?;
        Ok(existed)
    }

    async fn list(&self) -> Result<Vec<StoredSkill>, StorageError> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.skills_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(SKILL_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
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
        Ok(tokio::fs::try_exists(&self.source_path(name))
            .await
            .unwrap_or(false))
    }

    async fn get_vector(&self, name: &str) -> Result<Option<StoredVector>, StorageError> {
        let Some(bytes) = read_optional(&self.vector_path(name)).await? else {
            return Ok(None);
        };
        #[derive(Deserialize)]
        struct VectorFile {
            content_hash: String,
            vector: Vec<f32>,
        }
        match serde_json::from_slice::<VectorFile>(&bytes) {
            Ok(v) => Ok(Some(StoredVector {
                content_hash: v.content_hash,
                vector: v.vector,
            })),
            // A bad cache entry is just a cache miss
            Err(error) => {
                warn!(skill = name, %error, "discarding corrupt embedding cache entry");
                Ok(None)
            }
        }
    }

    async fn put_vector(&self, name: &str, vector: &StoredVector) -> Result<(), StorageError> {
        #[derive(Serialize)]
        struct VectorFile<'a> {
            content_hash: &'a str,
            vector: &'a [f32],
        }
        let bytes = serde_json::to_vec(&VectorFile {
            content_hash: &vector.content_hash,
            vector: &vector.vector,
        })
        .map_err(|e| StorageError::Encoding(e.to_string()))?;
        atomic_write(&self.vector_path(name), bytes).await
    }

    async fn delete_vector(&self, name: &str) -> Result<(), StorageError> {
        remove_if_present(&self.vector_path(name)).await?;
        Ok(())
    }
}

/// Artifact persistence over `<base>/artifacts`
pub struct FileArtifactStore {
    dir: PathBuf,
}

impl FileArtifactStore {
    pub fn new(base: &Path) -> Self {
        Self {
            dir: base.join("artifacts"),
        }
    }

    fn data_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{META_EXT}"))
    }

    fn check_name(name: &str) -> Result<(), StorageError> {
        if !is_valid_artifact_name(name) {
            return Err(StorageError::Conflict(format!(
                "invalid artifact name '{name}'"
            )));
        }
        if name.ends_with(&format!(".{META_EXT}")) {
            return Err(StorageError::Conflict(format!(
                "artifact name '{name}' collides with metadata files"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn save(
        &self,
        name: &str,
        data: &[u8],
        description: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ArtifactMeta, StorageError> {
        Self::check_name(name)?;
        let meta = ArtifactMeta {
            name: name.to_string(),
            description: description.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        atomic_write(&self.data_path(name), data.to_vec()).await?;
        let bytes =
            serde_json::to_vec_pretty(&meta).map_err(|e| StorageError::Encoding(e.to_string()))?;
        atomic_write(&self.meta_path(name), bytes).await?;
        Ok(meta)
    }

    async fn load(&self, name: &str) -> Result<(Vec<u8>, ArtifactMeta), StorageError> {
        Self::check_name(name)?;
        let data = read_optional(&self.data_path(name))
            .await?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        let meta = match read_optional(&self.meta_path(name)).await? {
            Some(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                warn!(artifact = name, "artifact meta unreadable; synthesizing");
                ArtifactMeta::new(name)
            }),
            None => ArtifactMeta::new(name),
        };
        Ok((data, meta))
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        Self::check_name(name)?;
        let existed = remove_if_present(&self.data_path(name)).await?;
        remove_if_present(&self.meta_path(name)).await?;
        Ok(existed)
    }

    async fn list(&self) -> Result<Vec<ArtifactMeta>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e)),
        };
        let mut metas = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name.ends_with(&format!(".{META_EXT}")) {
                continue;
            }
            match read_optional(&self.meta_path(file_name)).await? {
                Some(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(meta) => metas.push(meta),
                    Err(error) => {
                        warn!(artifact = file_name, %error, "skipping corrupt artifact meta");
                        metas.push(ArtifactMeta::new(file_name));
                    }
                },
                None => metas.push(ArtifactMeta::new(file_name)),
            }
        }
        metas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(metas)
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Self::check_name(name)?;
        Ok(tokio::fs::try_exists(&self.data_path(name))
            .await
            .unwrap_or(false))
    }
}

/// Dependency declarations in `<base>/requirements.txt`
pub struct FileDepsStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process; cross-process
    // safety comes from the atomic rename.
    lock: tokio::sync::Mutex<()>,
}

impl FileDepsStore {
    pub fn new(base: &Path) -> Self {
        Self {
            path: base.join("requirements.txt"),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn read_specs(&self) -> Result<Vec<DepSpec>, StorageError> {
        let Some(bytes) = read_optional(&self.path).await? else {
            return Ok(Vec::new());
        };
        let content = String::from_utf8_lossy(&bytes).into_owned();
        let mut specs = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match DepSpec::parse(line) {
                Ok(spec) => specs.push(spec),
                Err(error) => warn!(%error, line, "skipping unparsable requirements line"),
            }
        }
        Ok(specs)
    }

    async fn write_specs(&self, specs: &[DepSpec]) -> Result<(), StorageError> {
        let mut lines: Vec<String> = specs.iter().map(|s| s.to_string()).collect();
        lines.sort();
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        atomic_write(&self.path, content.into_bytes()).await
    }
}

#[async_trait]
impl DepsStore for FileDepsStore {
    async fn list(&self) -> Result<Vec<DepSpec>, StorageError> {
        self.read_specs().await
    }

    async fn add(&self, spec: &DepSpec) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut specs = self.read_specs().await?;
        specs.retain(|existing| existing.name != spec.name);
        specs.push(spec.clone());
        self.write_specs(&specs).await
    }

    async fn remove(&self, name: &str) -> Result<bool, StorageError> {
        let _guard = self.lock.lock().await;
        let mut specs = self.read_specs().await?;
        let before = specs.len();
        specs.retain(|existing| existing.name != name);
        if specs.len() == before {
            return Ok(false);
        }
        self.write_specs(&specs).await?;
        Ok(true)
    }
}

/// File-backed [`StorageBackend`]
pub struct FileStorage {
    base: PathBuf,
    skills: Arc<FileSkillStore>,
    artifacts: Arc<FileArtifactStore>,
    deps: Arc<FileDepsStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    catalog: OnceLock<Arc<SkillLibrary>>,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory
    pub fn open(base: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;
        Ok(Self {
            skills: Arc::new(FileSkillStore::new(&base)),
            artifacts: Arc::new(FileArtifactStore::new(&base)),
            deps: Arc::new(FileDepsStore::new(&base)),
            embedder: None,
            catalog: OnceLock::new(),
            base,
        })
    }

    /// Attach an embedding provider for semantic skill search
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }
}

impl StorageBackend for FileStorage {
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
        StorageAccess::File {
            base_path: self.base.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored(name: &str, source: &str) -> StoredSkill {
        StoredSkill {
            name: name.into(),
            source: source.into(),
            description: "test skill".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_skill_round_trip_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSkillStore::new(dir.path());

        let source = "-- greets\nfunction run(name)\n  return 'hi ' .. name\nend\n";
        store.put(&stored("greet", source)).await.unwrap();

        let loaded = store.get("greet").await.unwrap().unwrap();
        assert_eq!(loaded.source, source);
        assert_eq!(loaded.description, "test skill");
    }

    #[tokio::test]
    async fn test_skill_delete_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSkillStore::new(dir.path());
        store.put(&stored("s", "function run() end")).await.unwrap();

        assert!(store.delete("s").await.unwrap());
        assert!(!store.delete("s").await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skill_list_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSkillStore::new(dir.path());
        store.put(&stored("zeta", "function run() end")).await.unwrap();
        store.put(&stored("alpha", "function run() end")).await.unwrap();

        let names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_vector_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSkillStore::new(dir.path());

        assert!(store.get_vector("s").await.unwrap().is_none());
        store
            .put_vector(
                "s",
                &StoredVector {
                    content_hash: "abc".into(),
                    vector: vec![0.1, 0.2],
                },
            )
            .await
            .unwrap();
        let cached = store.get_vector("s").await.unwrap().unwrap();
        assert_eq!(cached.content_hash, "abc");
        assert_eq!(cached.vector.len(), 2);
    }

    #[tokio::test]
    async fn test_artifact_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path());

        let mut metadata = serde_json::Map::new();
        metadata.insert("kind".into(), json!("bytes"));
        store
            .save("scan.bin", b"\x00\x01\x02", "raw scan", metadata.clone())
            .await
            .unwrap();

        let (data, meta) = store.load("scan.bin").await.unwrap();
        assert_eq!(data, b"\x00\x01\x02");
        assert_eq!(meta.description, "raw scan");
        assert_eq!(meta.metadata, metadata);
    }

    #[tokio::test]
    async fn test_artifact_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path());
        let err = store
            .save("../escape", b"x", "", serde_json::Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_artifact_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path());
        assert!(matches!(
            store.load("nope").await.unwrap_err(),
            StorageError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_deps_dedup_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDepsStore::new(dir.path());

        store.add(&DepSpec::parse("penlight>=1.0").unwrap()).await.unwrap();
        store.add(&DepSpec::parse("penlight==1.13").unwrap()).await.unwrap();

        let specs = store.list().await.unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].to_string(), "penlight==1.13");
    }

    #[tokio::test]
    async fn test_deps_remove_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDepsStore::new(dir.path());
        store.add(&DepSpec::parse("lua-cjson").unwrap()).await.unwrap();

        assert!(store.remove("lua-cjson").await.unwrap());
        assert!(!store.remove("lua-cjson").await.unwrap());
    }

    #[tokio::test]
    async fn test_storage_access_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        assert_eq!(
            storage.access(),
            StorageAccess::File {
                base_path: dir.path().to_path_buf()
            }
        );
    }
}
