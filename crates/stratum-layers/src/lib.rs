pub mod ast_analysis;
pub mod concept_graph;
pub mod fast_search;
pub mod knowledge_propagation;
pub mod pattern_learner;
pub mod testing;

pub use ast_analysis::AstAnalysisLayer;
pub use concept_graph::ConceptGraphLayer;
pub use fast_search::FastSearchLayer;
pub use knowledge_propagation::KnowledgePropagationLayer;
pub use pattern_learner::PatternLearnerLayer;
