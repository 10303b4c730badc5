//! In-memory collaborator implementations for tests and examples.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use stratum_core::{
    Concept, ConceptChange, ConceptId, ConceptStore, Relation, RelationKind, Result, SearchHit,
    TextSearchProvider,
};

/// Concept store backed by concurrent maps. Honors the upsert contract on
/// (source, target, kind).
#[derive(Default)]
pub struct InMemoryConceptStore {
    concepts: DashMap<ConceptId, Concept>,
    relations: DashMap<(ConceptId, ConceptId, RelationKind), Relation>,
    changes: RwLock<Vec<ConceptChange>>,
}

#[async_trait]
impl ConceptStore for InMemoryConceptStore {
    async fn find_concept(&self, name: &str) -> Result<Option<Concept>> {
        Ok(self
            .concepts
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.clone()))
    }

    async fn save_concept(&self, concept: Concept) -> Result<()> {
        self.concepts.insert(concept.id, concept);
        Ok(())
    }

    async fn save_relationship(&self, relation: Relation) -> Result<()> {
        self.relations.insert(
            (relation.source, relation.target, relation.kind.clone()),
            relation,
        );
        Ok(())
    }

    async fn relationships_of(&self, concept: ConceptId) -> Result<Vec<Relation>> {
        Ok(self
            .relations
            .iter()
            .filter(|r| r.source == concept || r.target == concept)
            .map(|r| r.clone())
            .collect())
    }

    async fn all_concepts(&self) -> Result<Vec<Concept>> {
        Ok(self.concepts.iter().map(|c| c.clone()).collect())
    }

    async fn record_change(&self, change: ConceptChange) -> Result<()> {
        self.changes.write().push(change);
        Ok(())
    }

    async fn recent_changes(
        &self,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<ConceptChange>> {
        Ok(self
            .changes
            .read()
            .iter()
            .filter(|c| c.occurred_at >= since)
            .cloned()
            .collect())
    }
}

/// Text search over an in-memory corpus of (uri, contents) pairs.
pub struct InMemorySearch {
    files: Vec<(String, String)>,
}

impl InMemorySearch {
    pub fn new(files: Vec<(String, String)>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl TextSearchProvider for InMemorySearch {
    async fn search(&self, pattern: &str, glob: Option<&str>) -> Result<Vec<SearchHit>> {
        let re = regex::Regex::new(pattern)
            .map_err(|e| stratum_core::StratumError::Validation(e.to_string()))?;
        let mut hits = Vec::new();
        for (uri, contents) in &self.files {
            if let Some(glob) = glob {
                let suffix = glob.trim_start_matches("**/").trim_start_matches('*');
                if !suffix.is_empty() && !uri.ends_with(suffix) && !uri.starts_with(glob) {
                    continue;
                }
            }
            for (idx, line) in contents.lines().enumerate() {
                if let Some(m) = re.find(line) {
                    hits.push(SearchHit {
                        uri: uri.clone(),
                        line: idx as u32 + 1,
                        character: m.start() as u32,
                        text: line.to_string(),
                    });
                }
            }
        }
        Ok(hits)
    }
}
