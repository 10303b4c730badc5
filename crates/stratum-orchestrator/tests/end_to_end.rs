//! Full-stack scenarios: real layers over in-memory collaborators, driven
//! through the boundary API.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use stratum_core::{
    AstMatch, AstProvider, Concept, ConceptKind, ConceptStore, FileStore, MatchKind, Relation,
    RelationKind, Result, SourceLocation, StratumConfig, StratumError, SyntaxTree,
};
use stratum_layers::testing::{InMemoryConceptStore, InMemorySearch};
use stratum_orchestrator::{ApplyStatus, CycleSeverity, OverallHealth, Stratum};

/// AST provider that answers from a scripted match list, keyed by file.
struct ScriptedAst {
    matches: Vec<AstMatch>,
}

impl ScriptedAst {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            matches: Vec::new(),
        })
    }

    fn with(matches: Vec<AstMatch>) -> Arc<Self> {
        Arc::new(Self { matches })
    }
}

#[async_trait]
impl AstProvider for ScriptedAst {
    async fn parse_file(&self, uri: &str) -> Result<SyntaxTree> {
        Ok(SyntaxTree {
            uri: uri.to_string(),
            node_count: self.matches.len(),
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

struct MemFiles {
    files: DashMap<String, String>,
}

impl MemFiles {
    fn new(seed: &[(&str, &str)]) -> Arc<Self> {
        let files = DashMap::new();
        for (uri, contents) in seed {
            files.insert((*uri).to_string(), (*contents).to_string());
        }
        Arc::new(Self { files })
    }
}

#[async_trait]
impl FileStore for MemFiles {
    async fn read(&self, uri: &str) -> Result<String> {
        self.files
            .get(uri)
            .map(|c| c.clone())
            .ok_or_else(|| StratumError::Validation(format!("no such file: {uri}")))
    }

    async fn write(&self, uri: &str, contents: &str) -> Result<()> {
        self.files.insert(uri.to_string(), contents.to_string());
        Ok(())
    }
}

fn definition_match(name: &str, uri: &str, line: u32) -> AstMatch {
    AstMatch {
        node_kind: "struct_item".into(),
        name: name.into(),
        location: SourceLocation::new(uri, line, 11),
        is_definition: true,
    }
}

fn stratum(
    corpus: &[(&str, &str)],
    ast: Arc<ScriptedAst>,
    store: Arc<InMemoryConceptStore>,
    files: Arc<MemFiles>,
) -> Stratum {
    // RUST_LOG-driven output for debugging failing scenarios; idempotent.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let search = Arc::new(InMemorySearch::new(
        corpus
            .iter()
            .map(|(uri, contents)| ((*uri).to_string(), (*contents).to_string()))
            .collect(),
    ));
    Stratum::new(StratumConfig::default(), search, ast, store, files)
}

#[tokio::test]
async fn definition_lookup_stops_after_the_ast_layer() {
    let corpus = [("src/analyzer.rs", "pub struct CodeAnalyzer {\n}\n")];
    let ast = ScriptedAst::with(vec![definition_match("CodeAnalyzer", "src/analyzer.rs", 1)]);
    let app = stratum(
        &corpus,
        ast,
        Arc::new(InMemoryConceptStore::default()),
        MemFiles::new(&corpus),
    );

    let response = app.find_definition("CodeAnalyzer", None).await.unwrap();

    assert_eq!(response.layers_used, vec!["fast-search", "ast-analysis"]);
    assert!((response.confidence - 0.95).abs() < 1e-9);
    assert!(!response.definitions.is_empty());
    assert!(response
        .definitions
        .iter()
        .all(|d| d.kind == MatchKind::Definition));
    assert!(!response.cache_hit);
}

#[tokio::test]
async fn repeated_lookup_is_served_from_cache() {
    let corpus = [("src/analyzer.rs", "pub struct CodeAnalyzer {\n}\n")];
    let ast = ScriptedAst::with(vec![definition_match("CodeAnalyzer", "src/analyzer.rs", 1)]);
    let app = stratum(
        &corpus,
        ast,
        Arc::new(InMemoryConceptStore::default()),
        MemFiles::new(&corpus),
    );

    let first = app.find_definition("CodeAnalyzer", None).await.unwrap();
    let second = app.find_definition("CodeAnalyzer", None).await.unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.definitions.len(), second.definitions.len());
}

#[tokio::test]
async fn rename_plan_carries_exact_and_fuzzy_candidates() {
    let corpus = [
        ("src/analyzer.rs", "pub struct CodeAnalyzer {\n}\n"),
        ("src/pipeline.rs", "let a = CodeAnalyzer::new();\n"),
        ("src/report.rs", "fn build(a: CodeAnalyzer) {}\n"),
        ("src/registry.rs", "pub struct CodeAnalyzerRegistry {\n}\n"),
    ];
    let app = stratum(
        &corpus,
        ScriptedAst::empty(),
        Arc::new(InMemoryConceptStore::default()),
        MemFiles::new(&corpus),
    );

    let plan = app
        .plan_rename("CodeAnalyzer", "SourceAnalyzer", None)
        .await
        .unwrap();

    assert_eq!(plan.changes.len(), 4);
    assert_eq!(
        plan.changes
            .iter()
            .filter(|c| c.kind == MatchKind::Fuzzy)
            .count(),
        1
    );
    assert!(plan.risks.iter().any(|r| r == "uncertain-changes"));
}

#[tokio::test]
async fn applied_rename_rewrites_files_and_propagates() {
    let corpus = [("src/analyzer.rs", "pub struct CodeAnalyzer {\n}\n")];
    let files = MemFiles::new(&corpus);
    let store = Arc::new(InMemoryConceptStore::default());

    let analyzer = Concept::new("CodeAnalyzer", ConceptKind::Struct, 0.9);
    let factory = Concept::new("CodeAnalyzerFactory", ConceptKind::Struct, 0.9);
    let relation = Relation::new(analyzer.id, factory.id, RelationKind::Uses, 0.95);
    store.save_concept(analyzer).await.unwrap();
    store.save_concept(factory).await.unwrap();
    store.save_relationship(relation).await.unwrap();

    let app = stratum(&corpus, ScriptedAst::empty(), store.clone(), files.clone());

    let plan = app
        .plan_rename("CodeAnalyzer", "SourceAnalyzer", None)
        .await
        .unwrap();
    assert!(!plan.is_empty());

    let outcome = app.apply_rename(&plan).await.unwrap();

    assert!(outcome.report.completed);
    assert!(outcome
        .report
        .results
        .iter()
        .all(|r| r.status == ApplyStatus::Applied));
    let updated = files.read("src/analyzer.rs").await.unwrap();
    assert!(updated.contains("SourceAnalyzer"));
    assert!(!updated.contains("CodeAnalyzer"));

    // The applied change was recorded and propagated to the related concept.
    let recent = store
        .recent_changes(chrono::Utc::now() - chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(recent.len(), 1);
    let suggestion = outcome
        .suggestions
        .iter()
        .find(|s| s.target.name == "CodeAnalyzerFactory")
        .expect("related concept should get a suggestion");
    assert_eq!(suggestion.proposed_value, "SourceAnalyzerFactory");
    assert!(suggestion.auto_apply);
}

#[tokio::test]
async fn rollback_restores_original_contents() {
    let corpus = [("src/analyzer.rs", "pub struct CodeAnalyzer {\n}\n")];
    let files = MemFiles::new(&corpus);
    let app = stratum(
        &corpus,
        ScriptedAst::empty(),
        Arc::new(InMemoryConceptStore::default()),
        files.clone(),
    );

    let plan = app
        .plan_rename("CodeAnalyzer", "SourceAnalyzer", None)
        .await
        .unwrap();
    let outcome = app.apply_rename(&plan).await.unwrap();
    assert!(outcome.report.completed);

    app.rollback(&outcome.report.rollback_plan).await.unwrap();
    assert_eq!(
        files.read("src/analyzer.rs").await.unwrap(),
        "pub struct CodeAnalyzer {\n}\n"
    );
}

#[tokio::test]
async fn dependency_analysis_reports_cycles_and_health() {
    let store = Arc::new(InMemoryConceptStore::default());
    let a = Concept::new("ServiceA", ConceptKind::Struct, 0.9);
    let b = Concept::new("ServiceB", ConceptKind::Struct, 0.9);
    let c = Concept::new("ServiceC", ConceptKind::Struct, 0.9);
    let (a_id, b_id, c_id) = (a.id, b.id, c.id);
    for concept in [a, b, c] {
        store.save_concept(concept).await.unwrap();
    }
    for (source, target) in [(a_id, b_id), (b_id, c_id), (c_id, a_id)] {
        store
            .save_relationship(Relation::new(source, target, RelationKind::DependsOn, 0.9))
            .await
            .unwrap();
    }

    let app = stratum(
        &[],
        ScriptedAst::empty(),
        store,
        MemFiles::new(&[]),
    );

    let report = app.analyze_dependencies("ServiceA", true, true).await.unwrap();

    assert!(!report.direct.is_empty());
    let cycles = report.cycles.expect("cycles were requested");
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].nodes, vec![a_id, b_id, c_id, a_id]);
    assert_eq!(cycles[0].severity, CycleSeverity::Medium);

    let health = report.health.expect("target concept exists");
    assert_eq!(health.afferent, 1);
    assert_eq!(health.efferent, 1);
    assert!(report.transitive.is_some());
}

#[tokio::test]
async fn health_report_covers_every_layer() {
    let app = stratum(
        &[],
        ScriptedAst::empty(),
        Arc::new(InMemoryConceptStore::default()),
        MemFiles::new(&[]),
    );

    let report = app.get_health().await;
    assert_eq!(report.overall, OverallHealth::Healthy);
    assert_eq!(report.layers.len(), 5);
    assert!(report.layers.iter().all(|l| l.healthy));
}
