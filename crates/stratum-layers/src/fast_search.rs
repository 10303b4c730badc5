use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use stratum_core::{
    CodeMatch, Layer, LayerKind, LayerPayload, LayerResult, MatchKind, OperationKind, Request,
    Result, SearchHit, TextSearchProvider,
};
use tracing::debug;

/// Keywords that introduce a name in the languages we index. A hit whose
/// text carries one of these right before the identifier is treated as
/// definition-like.
const DEFINITION_KEYWORDS: &[&str] = &[
    "fn", "struct", "enum", "trait", "impl", "type", "class", "interface", "def", "function",
    "const", "static", "let", "var", "module", "mod",
];

const DEFINITION_CONFIDENCE: f64 = 0.55;
const REFERENCE_CONFIDENCE: f64 = 0.35;
const FUZZY_CONFIDENCE: f64 = 0.3;
const NOTHING_FOUND_CONFIDENCE: f64 = 0.1;

/// Layer 1: word-boundary text search. Cheapest and least precise; exists to
/// answer the easy cases before anything expensive runs.
pub struct FastSearchLayer {
    search: Arc<dyn TextSearchProvider>,
}

impl FastSearchLayer {
    pub fn new(search: Arc<dyn TextSearchProvider>) -> Self {
        Self { search }
    }

    fn classify(hit: &SearchHit, identifier: &str) -> MatchKind {
        let Some(pos) = hit.text.find(identifier) else {
            return MatchKind::Fuzzy;
        };
        let before = hit.text[..pos].trim_end();
        let last_word = before.rsplit(|c: char| !c.is_alphanumeric() && c != '_').next();
        match last_word {
            Some(word) if DEFINITION_KEYWORDS.contains(&word) => MatchKind::Definition,
            _ => MatchKind::Reference,
        }
    }

    fn to_match(hit: SearchHit, kind: MatchKind) -> CodeMatch {
        let confidence = match kind {
            MatchKind::Definition => DEFINITION_CONFIDENCE,
            MatchKind::Reference => REFERENCE_CONFIDENCE,
            MatchKind::Fuzzy => FUZZY_CONFIDENCE,
        };
        CodeMatch {
            uri: hit.uri,
            line: hit.line,
            character: hit.character,
            excerpt: hit.text,
            kind,
            confidence,
        }
    }
}

#[async_trait]
impl Layer for FastSearchLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::FastSearch
    }

    async fn process(
        &self,
        request: &Request,
        _prior: Option<&LayerResult>,
    ) -> Result<LayerResult> {
        let started = Instant::now();
        let escaped = regex::escape(&request.identifier);
        let word_pattern = format!(r"\b{}\b", escaped);

        let hits = self
            .search
            .search(&word_pattern, request.scope.as_deref())
            .await?;

        let mut matches: Vec<CodeMatch> = hits
            .into_iter()
            .map(|hit| {
                let kind = Self::classify(&hit, &request.identifier);
                Self::to_match(hit, kind)
            })
            .collect();

        // Renames also want near-miss spellings (substring hits that the
        // word-boundary pattern skipped), surfaced as low-confidence fuzzy
        // candidates for the caller to vet.
        if request.operation == OperationKind::Rename {
            let loose = self
                .search
                .search(&escaped, request.scope.as_deref())
                .await?;
            let word_re = Regex::new(&word_pattern)
                .map_err(|e| stratum_core::StratumError::Validation(e.to_string()))?;
            for hit in loose {
                if !word_re.is_match(&hit.text) {
                    matches.push(Self::to_match(hit, MatchKind::Fuzzy));
                }
            }
        }

        matches.truncate(request.limit);

        let confidence = if matches.iter().any(|m| m.kind == MatchKind::Definition) {
            DEFINITION_CONFIDENCE
        } else if matches.iter().any(|m| m.kind == MatchKind::Reference) {
            REFERENCE_CONFIDENCE
        } else {
            NOTHING_FOUND_CONFIDENCE
        };
        debug!(
            identifier = %request.identifier,
            hits = matches.len(),
            confidence,
            "fast search completed"
        );

        let payload = match request.operation {
            OperationKind::Definition => LayerPayload::Definitions { matches },
            OperationKind::Reference => LayerPayload::References { matches },
            OperationKind::Rename => LayerPayload::RenameCandidates { matches },
            // Dependency facts come from the concept graph, not grep.
            OperationKind::DependencyAnalysis => LayerPayload::Empty,
        };

        Ok(LayerResult::step(
            self.kind(),
            payload,
            confidence,
            started.elapsed(),
        ))
    }
}
