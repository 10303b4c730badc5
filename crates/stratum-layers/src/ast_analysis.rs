use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use stratum_core::{
    AstMatch, AstProvider, CodeMatch, Layer, LayerKind, LayerPayload, LayerResult, MatchKind,
    OperationKind, Request, Result,
};
use tracing::{debug, warn};

const AST_DEFINITION_CONFIDENCE: f64 = 0.95;
const AST_REFERENCE_CONFIDENCE: f64 = 0.75;
const NOTHING_FOUND_CONFIDENCE: f64 = 0.2;

/// Only this many candidate files are parsed per request; AST parsing is the
/// most expensive thing this layer does.
const MAX_CANDIDATE_FILES: usize = 8;

/// Layer 2: symbol-accurate analysis over parsed files. Candidate files come
/// from the cheaper layers' hits, falling back to the request location.
pub struct AstAnalysisLayer {
    ast: Arc<dyn AstProvider>,
}

impl AstAnalysisLayer {
    pub fn new(ast: Arc<dyn AstProvider>) -> Self {
        Self { ast }
    }

    fn candidate_files(request: &Request, prior: Option<&LayerResult>) -> Vec<String> {
        let mut files = BTreeSet::new();
        if let Some(prior) = prior {
            for m in prior.payload.matches() {
                files.insert(m.uri.clone());
                if files.len() >= MAX_CANDIDATE_FILES {
                    break;
                }
            }
        }
        if files.is_empty() {
            if let Some(location) = &request.location {
                files.insert(location.uri.clone());
            }
        }
        files.into_iter().collect()
    }

    fn to_match(m: AstMatch) -> CodeMatch {
        let (kind, confidence) = if m.is_definition {
            (MatchKind::Definition, AST_DEFINITION_CONFIDENCE)
        } else {
            (MatchKind::Reference, AST_REFERENCE_CONFIDENCE)
        };
        CodeMatch {
            uri: m.location.uri,
            line: m.location.line,
            character: m.location.character,
            excerpt: format!("{} {}", m.node_kind, m.name),
            kind,
            confidence,
        }
    }
}

#[async_trait]
impl Layer for AstAnalysisLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::AstAnalysis
    }

    async fn process(
        &self,
        request: &Request,
        prior: Option<&LayerResult>,
    ) -> Result<LayerResult> {
        let started = Instant::now();
        let files = Self::candidate_files(request, prior);
        let mut matches = Vec::new();

        for uri in &files {
            // A file that fails to parse shouldn't sink the layer; the other
            // candidates may still carry the answer.
            let tree = match self.ast.parse_file(uri).await {
                Ok(tree) => tree,
                Err(err) => {
                    warn!(uri = %uri, error = %err, "skipping unparseable candidate");
                    continue;
                }
            };
            for ast_match in self.ast.query(&tree, &request.identifier).await? {
                if ast_match.name == request.identifier {
                    matches.push(Self::to_match(ast_match));
                }
            }
        }
        matches.truncate(request.limit);

        let confidence = if matches.iter().any(|m| m.kind == MatchKind::Definition) {
            AST_DEFINITION_CONFIDENCE
        } else if !matches.is_empty() {
            AST_REFERENCE_CONFIDENCE
        } else {
            NOTHING_FOUND_CONFIDENCE
        };
        debug!(
            identifier = %request.identifier,
            files = files.len(),
            hits = matches.len(),
            confidence,
            "ast analysis completed"
        );

        let payload = match request.operation {
            OperationKind::Definition => LayerPayload::Definitions { matches },
            OperationKind::Reference => LayerPayload::References { matches },
            OperationKind::Rename => LayerPayload::RenameCandidates { matches },
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stratum_core::{SourceLocation, StratumError, SyntaxTree};

    struct FakeAst {
        matches: Vec<AstMatch>,
        fail_parse: bool,
    }

    #[async_trait]
    impl AstProvider for FakeAst {
        async fn parse_file(&self, uri: &str) -> Result<SyntaxTree> {
            if self.fail_parse {
                return Err(StratumError::LayerUnavailable {
                    layer: "ast-analysis".into(),
                    reason: format!("cannot parse {}", uri),
                });
            }
            Ok(SyntaxTree {
                uri: uri.to_string(),
                node_count: 100,
            })
        }

        async fn query(&self, tree: &SyntaxTree, _pattern: &str) -> Result<Vec<AstMatch>> {
            Ok(self
                .matches
                .iter()
                .filter(|m| m.location.uri == tree.uri)
                .cloned()
                .collect())
        }
    }

    fn def(uri: &str, name: &str) -> AstMatch {
        AstMatch {
            node_kind: "struct_item".into(),
            name: name.into(),
            location: SourceLocation::new(uri, 10, 4),
            is_definition: true,
        }
    }

    fn prior_with(uri: &str) -> LayerResult {
        LayerResult::step(
            LayerKind::FastSearch,
            LayerPayload::Definitions {
                matches: vec![CodeMatch {
                    uri: uri.into(),
                    line: 10,
                    character: 0,
                    excerpt: String::new(),
                    kind: MatchKind::Definition,
                    confidence: 0.55,
                }],
            },
            0.55,
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn exact_definition_hit_scores_high() {
        let layer = AstAnalysisLayer::new(Arc::new(FakeAst {
            matches: vec![def("src/analyzer.rs", "CodeAnalyzer")],
            fail_parse: false,
        }));
        let request = Request::new(OperationKind::Definition, "CodeAnalyzer").unwrap();
        let prior = prior_with("src/analyzer.rs");
        let result = layer.process(&request, Some(&prior)).await.unwrap();
        assert_eq!(result.confidence, AST_DEFINITION_CONFIDENCE);
        assert_eq!(result.payload.matches().len(), 1);
    }

    #[tokio::test]
    async fn name_mismatch_is_filtered_out() {
        let layer = AstAnalysisLayer::new(Arc::new(FakeAst {
            matches: vec![def("src/analyzer.rs", "CodeAnalyzerFactory")],
            fail_parse: false,
        }));
        let request = Request::new(OperationKind::Definition, "CodeAnalyzer").unwrap();
        let prior = prior_with("src/analyzer.rs");
        let result = layer.process(&request, Some(&prior)).await.unwrap();
        assert!(result.payload.is_empty());
        assert_eq!(result.confidence, NOTHING_FOUND_CONFIDENCE);
    }

    #[tokio::test]
    async fn unparseable_candidates_are_skipped_not_fatal() {
        let layer = AstAnalysisLayer::new(Arc::new(FakeAst {
            matches: vec![],
            fail_parse: true,
        }));
        let request = Request::new(OperationKind::Definition, "CodeAnalyzer").unwrap();
        let prior = prior_with("src/broken.rs");
        let result = layer.process(&request, Some(&prior)).await.unwrap();
        assert_eq!(result.confidence, NOTHING_FOUND_CONFIDENCE);
    }

    #[tokio::test]
    async fn falls_back_to_request_location_without_prior() {
        let layer = AstAnalysisLayer::new(Arc::new(FakeAst {
            matches: vec![def("src/here.rs", "CodeAnalyzer")],
            fail_parse: false,
        }));
        let request = Request::with_options(
            OperationKind::Definition,
            "CodeAnalyzer",
            Some(SourceLocation::new("src/here.rs", 5, 0)),
            None,
            50,
        )
        .unwrap();
        let result = layer.process(&request, None).await.unwrap();
        assert_eq!(result.payload.matches().len(), 1);
    }
}
