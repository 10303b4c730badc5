use stratum_core::NamePattern;

/// A transform that rewrites an affected concept's name in response to a
/// rename. Rules run after learned pattern templates and before the
/// identical-value fallback for strong direct relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationRule {
    /// `WidgetFactory` follows `Widget` -> `Gadget` as `GadgetFactory`.
    EmbeddedRename,
    /// `widget_factory` follows `Widget` -> `Gadget` as `gadget_factory`.
    EmbeddedSnakeCaseRename,
}

impl PropagationRule {
    pub const DEFAULTS: [PropagationRule; 2] = [
        PropagationRule::EmbeddedRename,
        PropagationRule::EmbeddedSnakeCaseRename,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PropagationRule::EmbeddedRename => "embedded-rename",
            PropagationRule::EmbeddedSnakeCaseRename => "embedded-snake-case-rename",
        }
    }

    /// Rewrite `target_name`, or `None` when the rule does not apply.
    pub fn transform(&self, target_name: &str, old: &str, new: &str) -> Option<String> {
        match self {
            PropagationRule::EmbeddedRename => embed_replace(target_name, old, new),
            PropagationRule::EmbeddedSnakeCaseRename => {
                embed_replace(target_name, &snake_case(old), &snake_case(new))
            }
        }
    }
}

fn embed_replace(target: &str, old: &str, new: &str) -> Option<String> {
    if old.is_empty() || target == old || target.matches(old).count() != 1 {
        return None;
    }
    Some(target.replacen(old, new, 1))
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Pick the strongest learned pattern that explains `target_name` as a
/// derivation of `old`, and re-derive it from `new`.
pub fn apply_best_pattern(
    patterns: &[NamePattern],
    target_name: &str,
    old: &str,
    new: &str,
) -> Option<String> {
    let derived = NamePattern::infer(old, target_name)?;
    patterns
        .iter()
        .filter(|p| p.template == derived.template)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .and_then(|p| p.apply(new))
}
