use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use stratum_core::{Concept, ConceptId, Relation};

/// Coupling counts saturate here when normalized to [0, 1].
const COUPLING_SATURATION: f64 = 10.0;

/// Structural health of one concept's dependency neighborhood. All three
/// scores are in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DependencyHealth {
    /// How entangled the concept is with the rest of the graph. Higher is
    /// worse.
    pub coupling: f64,
    /// Share of the concept's relations that stay inside its own module.
    /// Higher is better.
    pub cohesion: f64,
    /// Afferent / (afferent + efferent): 1.0 means everything depends on
    /// this concept and it depends on nothing.
    pub stability: f64,
    pub afferent: usize,
    pub efferent: usize,
}

/// Score `origin`'s neighborhood from its incident relations.
pub fn dependency_health(
    origin: &Concept,
    relations: &[Relation],
    concepts: &HashMap<ConceptId, Concept>,
) -> DependencyHealth {
    let efferent = relations.iter().filter(|r| r.source == origin.id).count();
    let afferent = relations.iter().filter(|r| r.target == origin.id).count();
    let total = efferent + afferent;

    let coupling = (total as f64 / COUPLING_SATURATION).min(1.0);
    let stability = if total == 0 {
        1.0
    } else {
        afferent as f64 / total as f64
    };

    let origin_module = module_of(origin);
    let intra = relations
        .iter()
        .filter(|r| {
            let other = if r.source == origin.id { r.target } else { r.source };
            concepts
                .get(&other)
                .map(|c| module_of(c) == origin_module)
                .unwrap_or(false)
        })
        .count();
    let cohesion = if total == 0 {
        1.0
    } else {
        intra as f64 / total as f64
    };

    DependencyHealth {
        coupling,
        cohesion,
        stability,
        afferent,
        efferent,
    }
}

fn module_of(concept: &Concept) -> Option<&str> {
    concept
        .module_path()
        .and_then(|p| p.rsplit_once('/').map(|(dir, _)| dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::{ConceptKind, RelationKind};

    fn located(name: &str, path: &str) -> Concept {
        let mut c = Concept::new(name, ConceptKind::Struct, 0.9);
        c.metadata.insert("path".into(), path.into());
        c
    }

    #[test]
    fn isolated_concept_is_stable_and_cohesive() {
        let origin = located("Widget", "src/ui/widget.rs");
        let health = dependency_health(&origin, &[], &HashMap::new());
        assert_eq!(health.coupling, 0.0);
        assert_eq!(health.cohesion, 1.0);
        assert_eq!(health.stability, 1.0);
    }

    #[test]
    fn stability_favors_incoming_edges() {
        let origin = located("Widget", "src/ui/widget.rs");
        let a = located("A", "src/a.rs");
        let b = located("B", "src/b.rs");
        let c = located("C", "src/c.rs");
        let relations = vec![
            Relation::new(a.id, origin.id, RelationKind::Uses, 0.9),
            Relation::new(b.id, origin.id, RelationKind::Uses, 0.9),
            Relation::new(origin.id, c.id, RelationKind::Uses, 0.9),
        ];
        let concepts: HashMap<_, _> = [a, b, c].into_iter().map(|c| (c.id, c)).collect();
        let health = dependency_health(&origin, &relations, &concepts);
        assert_eq!(health.afferent, 2);
        assert_eq!(health.efferent, 1);
        assert!((health.stability - 2.0 / 3.0).abs() < 1e-9);
        assert!((health.coupling - 0.3).abs() < 1e-9);
    }

    #[test]
    fn cohesion_counts_same_module_relations() {
        let origin = located("Widget", "src/ui/widget.rs");
        let neighbor = located("Painter", "src/ui/painter.rs");
        let remote = located("Remote", "src/net/remote.rs");
        let relations = vec![
            Relation::new(origin.id, neighbor.id, RelationKind::Uses, 0.9),
            Relation::new(origin.id, remote.id, RelationKind::Uses, 0.9),
        ];
        let concepts: HashMap<_, _> = [neighbor, remote].into_iter().map(|c| (c.id, c)).collect();
        let health = dependency_health(&origin, &relations, &concepts);
        assert!((health.cohesion - 0.5).abs() < 1e-9);
    }
}
