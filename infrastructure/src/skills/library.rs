//! Skill library
//!
//! The parsed, searchable view over a [`SkillStore`]. Sources are compiled
//! at load time; entries that fail to parse are kept as corrupt records so
//! a single bad skill never takes down listings. Embeddings are computed
//! lazily and cached in the store under a content hash.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use codemode_application::{
    EmbeddingProvider, SkillCatalog, SkillStore, StoredSkill, StoredVector,
};
use codemode_domain::{is_valid_skill_name, Skill, SkillError, SkillSummary, StorageError};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::embedding::{content_hash, cosine_similarity};
use super::parse::{leading_comment_description, parse_skill_source};

#[derive(Default)]
struct LibraryState {
    skills: BTreeMap<String, Skill>,
    corrupt: BTreeMap<String, String>,
    vectors: BTreeMap<String, Vec<f32>>,
}

/// Skill management with semantic search
pub struct SkillLibrary {
    store: Arc<dyn SkillStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    state: RwLock<LibraryState>,
}

impl SkillLibrary {
    pub fn new(store: Arc<dyn SkillStore>, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self {
            store,
            embedder,
            state: RwLock::new(LibraryState::default()),
        }
    }

    fn build_skill(stored: &StoredSkill) -> Result<Skill, SkillError> {
        let parameters = parse_skill_source(&stored.name, &stored.source)?;
        let description = if stored.description.is_empty() {
            leading_comment_description(&stored.source)
        } else {
            stored.description.clone()
        };
        Ok(Skill {
            name: stored.name.clone(),
            description,
            source: stored.source.clone(),
            parameters,
            created_at: stored.created_at,
        })
    }

    /// Embed the skill description, reusing the cached vector when the
    /// content hash still matches.
    async fn index_embedding(&self, skill: &Skill) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        let hash = content_hash(&skill.description, &skill.source);

        match self.store.get_vector(&skill.name).await {
            Ok(Some(cached)) if cached.content_hash == hash => return Some(cached.vector),
            Ok(_) => {}
            Err(error) => warn!(skill = %skill.name, %error, "embedding cache read failed"),
        }

        let vector = match embedder.embed(&[skill.description.clone()]) {
            Ok(mut vectors) => vectors.pop()?,
            Err(error) => {
                warn!(skill = %skill.name, %error, "embedding failed; skill unranked");
                return None;
            }
        };

        if let Err(error) = self
            .store
            .put_vector(
                &skill.name,
                &StoredVector {
                    content_hash: hash,
                    vector: vector.clone(),
                },
            )
            .await
        {
            warn!(skill = %skill.name, %error, "embedding cache write failed");
        }
        Some(vector)
    }
}

#[async_trait]
impl SkillCatalog for SkillLibrary {
    async fn refresh(&self) -> Result<(), StorageError> {
        let stored = self.store.list().await?;
        let mut next = LibraryState::default();
        for entry in &stored {
            match Self::build_skill(entry) {
                Ok(skill) => {
                    if let Some(vector) = self.index_embedding(&skill).await {
                        next.vectors.insert(skill.name.clone(), vector);
                    }
                    next.skills.insert(skill.name.clone(), skill);
                }
                Err(error) => {
                    warn!(skill = %entry.name, %error, "skill failed to load; degraded to error record");
                    next.corrupt.insert(entry.name.clone(), error.to_string());
                }
            }
        }
        debug!(
            loaded = next.skills.len(),
            corrupt = next.corrupt.len(),
            "skill library refreshed"
        );
        *self.state.write().await = next;
        Ok(())
    }

    async fn list(&self) -> Vec<SkillSummary> {
        let state = self.state.read().await;
        let mut summaries: Vec<SkillSummary> =
            state.skills.values().map(|s| s.summary()).collect();
        summaries.extend(
            state
                .corrupt
                .iter()
                .map(|(name, error)| SkillSummary::corrupt(name, error)),
        );
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    async fn search(&self, query: &str, limit: usize) -> Vec<SkillSummary> {
        let state = self.state.read().await;
        if state.skills.is_empty() {
            return Vec::new();
        }

        if let Some(embedder) = &self.embedder {
            let query_vector = match embedder.embed_query(query) {
                Ok(vector) => vector,
                Err(error) => {
                    warn!(%error, "query embedding failed; falling back to substring search");
                    return substring_search(&state.skills, query, limit);
                }
            };
            let mut scored: Vec<(f32, &Skill)> = state
                .skills
                .values()
                .filter_map(|skill| {
                    let vector = state.vectors.get(&skill.name)?;
                    let score = cosine_similarity(&query_vector, vector);
                    (score > 0.0).then_some((score, skill))
                })
                .collect();
            scored.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.1.name.cmp(&b.1.name))
            });
            return scored
                .into_iter()
                .take(limit)
                .map(|(_, skill)| skill.summary())
                .collect();
        }

        substring_search(&state.skills, query, limit)
    }

    async fn get(&self, name: &str) -> Option<Skill> {
        if let Some(skill) = self.state.read().await.skills.get(name) {
            return Some(skill.clone());
        }
        // Fall back to the store so freshly persisted skills resolve
        // without a full refresh.
        let stored = self.store.get(name).await.ok().flatten()?;
        let skill = Self::build_skill(&stored).ok()?;
        self.state
            .write()
            .await
            .skills
            .insert(skill.name.clone(), skill.clone());
        Some(skill)
    }

    async fn create(
        &self,
        name: &str,
        source: &str,
        description: &str,
        overwrite: bool,
    ) -> Result<Skill, SkillError> {
        if !is_valid_skill_name(name) {
            return Err(SkillError::InvalidName(name.to_string()));
        }
        let parameters = parse_skill_source(name, source)?;
        if !overwrite {
            let exists = self
                .store
                .exists(name)
                .await
                .map_err(|e| SkillError::Storage(e.to_string()))?;
            if exists {
                return Err(SkillError::Duplicate(name.to_string()));
            }
        }

        let description = if description.is_empty() {
            leading_comment_description(source)
        } else {
            description.to_string()
        };
        let skill = Skill {
            name: name.to_string(),
            description,
            source: source.to_string(),
            parameters,
            created_at: Utc::now(),
        };

        self.store
            .put(&StoredSkill {
                name: skill.name.clone(),
                source: skill.source.clone(),
                description: skill.description.clone(),
                created_at: skill.created_at,
            })
            .await
            .map_err(|e| SkillError::Storage(e.to_string()))?;

        let vector = self.index_embedding(&skill).await;
        let mut state = self.state.write().await;
        state.corrupt.remove(name);
        if let Some(vector) = vector {
            state.vectors.insert(skill.name.clone(), vector);
        }
        state.skills.insert(skill.name.clone(), skill.clone());
        Ok(skill)
    }

    async fn remove(&self, name: &str) -> Result<bool, StorageError> {
        let existed = self.store.delete(name).await?;
        let mut state = self.state.write().await;
        let in_memory = state.skills.remove(name).is_some();
        state.corrupt.remove(name);
        state.vectors.remove(name);
        Ok(existed || in_memory)
    }
}

fn substring_search(
    skills: &BTreeMap<String, Skill>,
    query: &str,
    limit: usize,
) -> Vec<SkillSummary> {
    let needle = query.to_lowercase();
    // BTreeMap iteration gives the deterministic name tie-break
    skills
        .values()
        .filter(|skill| {
            skill.name.to_lowercase().contains(&needle)
                || skill.description.to_lowercase().contains(&needle)
        })
        .take(limit)
        .map(|skill| skill.summary())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::HashEmbedder;
    use crate::storage::FileStorage;
    use codemode_application::StorageBackend;

    fn file_store(dir: &tempfile::TempDir) -> Arc<dyn SkillStore> {
        FileStorage::open(dir.path()).unwrap().skills()
    }

    #[tokio::test]
    async fn test_create_then_list_contains_name() {
        let dir = tempfile::tempdir().unwrap();
        let library = SkillLibrary::new(file_store(&dir), None);

        library
            .create("greet", "function run(name) return 'hi ' .. name end", "Greets", false)
            .await
            .unwrap();

        let names: Vec<String> = library.list().await.into_iter().map(|s| s.name).collect();
        assert!(names.contains(&"greet".to_string()));
    }

    #[tokio::test]
    async fn test_create_duplicate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let library = SkillLibrary::new(file_store(&dir), None);

        library
            .create("s", "function run() end", "", false)
            .await
            .unwrap();
        let err = library
            .create("s", "function run() end", "", false)
            .await
            .unwrap_err();
        assert!(matches!(err, SkillError::Duplicate(_)));

        // overwrite=true replaces
        library
            .create("s", "function run() return 2 end", "", true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_invalid_name() {
        let dir = tempfile::tempdir().unwrap();
        let library = SkillLibrary::new(file_store(&dir), None);
        let err = library
            .create("not-valid", "function run() end", "", false)
            .await
            .unwrap_err();
        assert!(matches!(err, SkillError::InvalidName(_)));
    }

    #[tokio::test]
    async fn test_round_trip_source_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let library = SkillLibrary::new(file_store(&dir), None);

        let source = "-- docs\nfunction run(a, b)\n  return a + b\nend\n";
        library.create("add", source, "Adds", false).await.unwrap();

        let skill = library.get("add").await.unwrap();
        assert_eq!(skill.source, source);
        let names: Vec<&str> = skill.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_corrupt_skill_degrades_not_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir);
        // Write a skill that does not compile, directly through the store
        store
            .put(&StoredSkill {
                name: "broken".into(),
                source: "function run( end".into(),
                description: String::new(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .put(&StoredSkill {
                name: "fine".into(),
                source: "function run() return 1 end".into(),
                description: String::new(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let library = SkillLibrary::new(store, None);
        library.refresh().await.unwrap();

        let summaries = library.list().await;
        assert_eq!(summaries.len(), 2);
        let broken = summaries.iter().find(|s| s.name == "broken").unwrap();
        assert!(broken.error.is_some());
        let fine = summaries.iter().find(|s| s.name == "fine").unwrap();
        assert!(fine.error.is_none());
        // Corrupt skill is not invocable
        assert!(library.get("broken").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let library = SkillLibrary::new(file_store(&dir), None);
        library
            .create("s", "function run() end", "", false)
            .await
            .unwrap();

        assert!(library.remove("s").await.unwrap());
        assert!(!library.remove("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_semantic_search_ranks_by_description() {
        let dir = tempfile::tempdir().unwrap();
        let library = SkillLibrary::new(file_store(&dir), Some(Arc::new(HashEmbedder::default())));

        library
            .create(
                "fetch_json",
                "function run(url) end",
                "Fetch JSON payload from a url endpoint",
                false,
            )
            .await
            .unwrap();
        library
            .create(
                "port_scan",
                "function run(target) end",
                "Scan network ports on a target host",
                false,
            )
            .await
            .unwrap();

        let results = library.search("fetch json from url", 5).await;
        assert!(!results.is_empty());
        assert_eq!(results[0].name, "fetch_json");
    }

    #[tokio::test]
    async fn test_substring_search_without_embedder() {
        let dir = tempfile::tempdir().unwrap();
        let library = SkillLibrary::new(file_store(&dir), None);

        library
            .create("alpha_scan", "function run() end", "scans things", false)
            .await
            .unwrap();
        library
            .create("beta_scan", "function run() end", "scans things", false)
            .await
            .unwrap();
        library
            .create("gamma", "function run() end", "unrelated", false)
            .await
            .unwrap();

        let results = library.search("scan", 10).await;
        let names: Vec<String> = results.into_iter().map(|s| s.name).collect();
        // Deterministic name order
        assert_eq!(names, vec!["alpha_scan", "beta_scan"]);
    }

    #[tokio::test]
    async fn test_embedding_cache_reused_until_content_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir);
        let library =
            SkillLibrary::new(Arc::clone(&store), Some(Arc::new(HashEmbedder::default())));

        library
            .create("s", "function run() end", "first description", false)
            .await
            .unwrap();
        let first = store.get_vector("s").await.unwrap().unwrap();

        library.refresh().await.unwrap();
        let unchanged = store.get_vector("s").await.unwrap().unwrap();
        assert_eq!(first.content_hash, unchanged.content_hash);

        library
            .create("s", "function run() end", "different description", true)
            .await
            .unwrap();
        let changed = store.get_vector("s").await.unwrap().unwrap();
        assert_ne!(first.content_hash, changed.content_hash);
    }
}
