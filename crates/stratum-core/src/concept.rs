use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type ConceptId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptKind {
    Function,
    Class,
    Struct,
    Module,
    Variable,
    Interface,
    Type,
    Other,
}

/// A named, typed node in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptId,
    pub name: String,
    pub kind: ConceptKind,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Concept {
    pub fn new(name: impl Into<String>, kind: ConceptKind, confidence: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            metadata: HashMap::new(),
        }
    }

    /// File path recorded during analysis, when known.
    pub fn module_path(&self) -> Option<&str> {
        self.metadata.get("path").map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Uses,
    UsedBy,
    Extends,
    Implements,
    DependsOn,
    Imports,
    Parent,
    Child,
    Sibling,
    Other(String),
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationKind::Uses => "uses",
            RelationKind::UsedBy => "used_by",
            RelationKind::Extends => "extends",
            RelationKind::Implements => "implements",
            RelationKind::DependsOn => "depends_on",
            RelationKind::Imports => "imports",
            RelationKind::Parent => "parent",
            RelationKind::Child => "child",
            RelationKind::Sibling => "sibling",
            RelationKind::Other(s) => s.as_str(),
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RelationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uses" => Ok(RelationKind::Uses),
            "used_by" => Ok(RelationKind::UsedBy),
            "extends" => Ok(RelationKind::Extends),
            "implements" => Ok(RelationKind::Implements),
            "depends_on" => Ok(RelationKind::DependsOn),
            "imports" => Ok(RelationKind::Imports),
            "parent" => Ok(RelationKind::Parent),
            "child" => Ok(RelationKind::Child),
            "sibling" => Ok(RelationKind::Sibling),
            other => Ok(RelationKind::Other(other.to_string())),
        }
    }
}

/// A directed edge between two concepts. Superseded relations are replaced
/// via upsert on (source, target, kind), never silently deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub source: ConceptId,
    pub target: ConceptId,
    pub kind: RelationKind,
    pub confidence: f64,
}

impl Relation {
    pub fn new(source: ConceptId, target: ConceptId, kind: RelationKind, confidence: f64) -> Self {
        Self {
            source,
            target,
            kind,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// A change accepted into the knowledge graph, recorded so later propagations
/// can correlate co-changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptChange {
    pub concept_id: Option<ConceptId>,
    pub identifier: String,
    pub old_value: String,
    pub new_value: String,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
}

impl ConceptChange {
    pub fn rename(identifier: impl Into<String>, old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            concept_id: None,
            identifier: identifier.into(),
            old_value: old.into(),
            new_value: new.into(),
            occurred_at: chrono::Utc::now(),
        }
    }
}
