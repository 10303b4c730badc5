use crate::concept::Relation;
use crate::{Result, StratumError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

pub type RequestId = Uuid;

/// The kind of code fact being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Definition,
    Reference,
    Rename,
    DependencyAnalysis,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Definition => "definition",
            OperationKind::Reference => "reference",
            OperationKind::Rename => "rename",
            OperationKind::DependencyAnalysis => "dependency_analysis",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "definition" => Ok(OperationKind::Definition),
            "reference" | "references" => Ok(OperationKind::Reference),
            "rename" => Ok(OperationKind::Rename),
            "dependency_analysis" | "dependencies" => Ok(OperationKind::DependencyAnalysis),
            other => Err(format!("unknown operation kind: {}", other)),
        }
    }
}

/// The five analysis layers, cheapest first. Escalation follows this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    FastSearch,
    AstAnalysis,
    ConceptGraph,
    PatternLearner,
    KnowledgePropagation,
}

impl LayerKind {
    pub const ALL: [LayerKind; 5] = [
        LayerKind::FastSearch,
        LayerKind::AstAnalysis,
        LayerKind::ConceptGraph,
        LayerKind::PatternLearner,
        LayerKind::KnowledgePropagation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::FastSearch => "fast-search",
            LayerKind::AstAnalysis => "ast-analysis",
            LayerKind::ConceptGraph => "concept-graph",
            LayerKind::PatternLearner => "pattern-learner",
            LayerKind::KnowledgePropagation => "knowledge-propagation",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub uri: String,
    pub line: u32,
    pub character: u32,
    pub end_line: Option<u32>,
    pub end_character: Option<u32>,
}

impl SourceLocation {
    pub fn new(uri: impl Into<String>, line: u32, character: u32) -> Self {
        Self {
            uri: uri.into(),
            line,
            character,
            end_line: None,
            end_character: None,
        }
    }
}

/// One inbound request. Immutable once constructed; validation happens at
/// construction so downstream code never sees a malformed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub operation: OperationKind,
    pub identifier: String,
    pub location: Option<SourceLocation>,
    /// Optional glob restricting which files are considered.
    pub scope: Option<String>,
    pub limit: usize,
}

impl Request {
    pub const DEFAULT_LIMIT: usize = 50;

    pub fn new(operation: OperationKind, identifier: impl Into<String>) -> Result<Self> {
        Self::with_options(operation, identifier, None, None, Self::DEFAULT_LIMIT)
    }

    pub fn with_options(
        operation: OperationKind,
        identifier: impl Into<String>,
        location: Option<SourceLocation>,
        scope: Option<String>,
        limit: usize,
    ) -> Result<Self> {
        let identifier = identifier.into();
        if identifier.trim().is_empty() {
            return Err(StratumError::Validation(
                "identifier must not be empty".into(),
            ));
        }
        if limit == 0 {
            return Err(StratumError::Validation("limit must be positive".into()));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            operation,
            identifier,
            location,
            scope,
            limit,
        })
    }
}

/// How a single located hit relates to the requested identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Definition,
    Reference,
    Fuzzy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeMatch {
    pub uri: String,
    pub line: u32,
    pub character: u32,
    pub excerpt: String,
    pub kind: MatchKind,
    pub confidence: f64,
}

impl CodeMatch {
    fn position_key(&self) -> (String, u32, u32) {
        (self.uri.clone(), self.line, self.character)
    }
}

/// Typed payload per operation kind, so merge logic is exhaustive-checked
/// instead of probing optional fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerPayload {
    Definitions { matches: Vec<CodeMatch> },
    References { matches: Vec<CodeMatch> },
    RenameCandidates { matches: Vec<CodeMatch> },
    Dependencies { relations: Vec<Relation> },
    Empty,
}

impl LayerPayload {
    pub fn is_empty(&self) -> bool {
        match self {
            LayerPayload::Definitions { matches }
            | LayerPayload::References { matches }
            | LayerPayload::RenameCandidates { matches } => matches.is_empty(),
            LayerPayload::Dependencies { relations } => relations.is_empty(),
            LayerPayload::Empty => true,
        }
    }

    pub fn matches(&self) -> &[CodeMatch] {
        match self {
            LayerPayload::Definitions { matches }
            | LayerPayload::References { matches }
            | LayerPayload::RenameCandidates { matches } => matches,
            _ => &[],
        }
    }

    /// Union two payloads of the same variant, deduplicating positional hits.
    /// `Empty` is the identity. Mismatched variants keep `self`'s shape and
    /// absorb the other's matches where that makes sense (match-carrying
    /// variants only).
    pub fn merge(self, other: LayerPayload) -> LayerPayload {
        use LayerPayload::*;
        match (self, other) {
            (Empty, other) => other,
            (this, Empty) => this,
            (Definitions { matches: a }, Definitions { matches: b }) => Definitions {
                matches: dedup_matches(a, b),
            },
            (References { matches: a }, References { matches: b }) => References {
                matches: dedup_matches(a, b),
            },
            (RenameCandidates { matches: a }, RenameCandidates { matches: b }) => {
                RenameCandidates {
                    matches: dedup_matches(a, b),
                }
            }
            (Dependencies { relations: a }, Dependencies { relations: b }) => {
                let mut merged = a;
                for rel in b {
                    if !merged
                        .iter()
                        .any(|r| r.source == rel.source && r.target == rel.target && r.kind == rel.kind)
                    {
                        merged.push(rel);
                    }
                }
                Dependencies { relations: merged }
            }
            // A definition search can be refined by a layer that only found
            // references (and vice versa); keep the earlier variant and fold
            // the new hits in.
            (Definitions { matches: a }, References { matches: b })
            | (Definitions { matches: a }, RenameCandidates { matches: b }) => Definitions {
                matches: dedup_matches(a, b),
            },
            (References { matches: a }, Definitions { matches: b })
            | (References { matches: a }, RenameCandidates { matches: b }) => References {
                matches: dedup_matches(a, b),
            },
            (RenameCandidates { matches: a }, Definitions { matches: b })
            | (RenameCandidates { matches: a }, References { matches: b }) => RenameCandidates {
                matches: dedup_matches(a, b),
            },
            (this, _) => this,
        }
    }
}

fn dedup_matches(mut a: Vec<CodeMatch>, b: Vec<CodeMatch>) -> Vec<CodeMatch> {
    for m in b {
        if let Some(existing) = a
            .iter_mut()
            .find(|e| e.position_key() == m.position_key())
        {
            // Same position seen again with higher certainty: keep the best.
            if m.confidence > existing.confidence {
                *existing = m;
            }
        } else {
            a.push(m);
        }
    }
    a
}

/// The result of one escalation step, wrapping everything seen so far.
///
/// Results form an append-only chain: each layer call produces a *new*
/// `LayerResult` via [`LayerResult::extend`], never mutating the previous
/// one, which keeps partial-failure recovery simple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerResult {
    pub payload: LayerPayload,
    pub confidence: f64,
    pub layers_used: Vec<String>,
    pub elapsed_ms: u64,
    pub sufficient: bool,
    pub cache_hit: bool,
}

impl LayerResult {
    pub fn empty() -> Self {
        Self {
            payload: LayerPayload::Empty,
            confidence: 0.0,
            layers_used: Vec::new(),
            elapsed_ms: 0,
            sufficient: false,
            cache_hit: false,
        }
    }

    /// A single layer's contribution, before chaining.
    pub fn step(layer: LayerKind, payload: LayerPayload, confidence: f64, elapsed: Duration) -> Self {
        Self {
            payload,
            confidence: confidence.clamp(0.0, 1.0),
            layers_used: vec![layer.as_str().to_string()],
            elapsed_ms: elapsed.as_millis() as u64,
            sufficient: false,
            cache_hit: false,
        }
    }

    /// Chain a new step onto a previous result.
    ///
    /// Combined confidence is `max(prev, step)`: monotonically non-decreasing
    /// across escalation, and a weak layer can never dilute certainty an
    /// earlier layer established.
    pub fn extend(prev: &LayerResult, step: LayerResult) -> Self {
        let mut layers_used = prev.layers_used.clone();
        layers_used.extend(step.layers_used);
        Self {
            payload: prev.payload.clone().merge(step.payload),
            confidence: prev.confidence.max(step.confidence),
            layers_used,
            elapsed_ms: prev.elapsed_ms + step.elapsed_ms,
            sufficient: false,
            cache_hit: false,
        }
    }

    pub fn mark_sufficient(mut self) -> Self {
        self.sufficient = true;
        self
    }

    pub fn mark_cache_hit(mut self) -> Self {
        self.cache_hit = true;
        self
    }
}

/// A learned naming pattern, e.g. `{}Test` or `test_{}`. The placeholder
/// stands for the identifier the pattern was learned around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamePattern {
    pub template: String,
    pub confidence: f64,
}

impl NamePattern {
    pub const PLACEHOLDER: &'static str = "{}";

    pub fn new(template: impl Into<String>, confidence: f64) -> Self {
        Self {
            template: template.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Instantiate the template for a name. `None` when the template carries
    /// no placeholder.
    pub fn apply(&self, name: &str) -> Option<String> {
        if self.template.contains(Self::PLACEHOLDER) {
            Some(self.template.replace(Self::PLACEHOLDER, name))
        } else {
            None
        }
    }

    /// Derive the template that turns `base` into `derived`, if `derived`
    /// embeds `base` exactly once.
    pub fn infer(base: &str, derived: &str) -> Option<NamePattern> {
        if base.is_empty() || derived == base || derived.matches(base).count() != 1 {
            return None;
        }
        Some(NamePattern::new(
            derived.replacen(base, Self::PLACEHOLDER, 1),
            0.0,
        ))
    }
}
