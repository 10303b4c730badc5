use crate::concept::{Concept, ConceptChange, ConceptId, Relation};
use crate::types::{LayerKind, LayerResult, Request, SourceLocation};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A parsed file, as handed back by the external parse provider. The
/// orchestration core never inspects syntax directly; it only queries.
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    pub uri: String,
    pub node_count: usize,
}

/// One node matched by an AST query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstMatch {
    pub node_kind: String,
    pub name: String,
    pub location: SourceLocation,
    /// True when the node introduces the name (fn/struct/class/etc.),
    /// false when it merely refers to it.
    pub is_definition: bool,
}

/// External AST/parse provider, consumed through a narrow interface.
#[async_trait]
pub trait AstProvider: Send + Sync {
    async fn parse_file(&self, uri: &str) -> Result<SyntaxTree>;
    async fn query(&self, tree: &SyntaxTree, pattern: &str) -> Result<Vec<AstMatch>>;
}

/// Persistent concept store backing the knowledge graph.
#[async_trait]
pub trait ConceptStore: Send + Sync {
    async fn find_concept(&self, name: &str) -> Result<Option<Concept>>;
    async fn save_concept(&self, concept: Concept) -> Result<()>;
    /// Upsert on (source, target, kind); superseded relations are replaced.
    async fn save_relationship(&self, relation: Relation) -> Result<()>;
    async fn relationships_of(&self, concept: ConceptId) -> Result<Vec<Relation>>;
    async fn all_concepts(&self) -> Result<Vec<Concept>>;
    async fn record_change(&self, change: ConceptChange) -> Result<()>;
    async fn recent_changes(&self, since: chrono::DateTime<chrono::Utc>)
        -> Result<Vec<ConceptChange>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub uri: String,
    pub line: u32,
    pub character: u32,
    pub text: String,
}

/// Fast text search provider (ripgrep-class collaborator).
#[async_trait]
pub trait TextSearchProvider: Send + Sync {
    async fn search(&self, pattern: &str, glob: Option<&str>) -> Result<Vec<SearchHit>>;
}

/// Workspace file access used by apply-rename.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn read(&self, uri: &str) -> Result<String>;
    async fn write(&self, uri: &str, contents: &str) -> Result<()>;
}

/// One analysis layer. Differences between layers are configuration
/// (latency budget, enablement) rather than differing method names.
#[async_trait]
pub trait Layer: Send + Sync {
    fn kind(&self) -> LayerKind;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Run this layer for a request. `prior` carries the chain built by
    /// cheaper layers so a layer can refine earlier hits; the returned
    /// result is this layer's own contribution (the orchestrator chains it).
    async fn process(&self, request: &Request, prior: Option<&LayerResult>)
        -> Result<LayerResult>;

    /// Layer self-check, polled by the health monitor.
    async fn is_healthy(&self) -> bool {
        true
    }
}
