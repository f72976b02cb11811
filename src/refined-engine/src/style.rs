//! Stylesheet projection.
//!
//! Feature CSS is compiled once into a single stylesheet in which every
//! selector is scoped under the feature's token in the root marker
//! attribute. Navigation only rewrites the attribute; the stylesheet is
//! never recomputed.

use tracing::warn;

use crate::config::EngineConfig;
use crate::registry::FeatureRegistry;

/// Compiles scoped feature styles.
#[derive(Debug, Clone)]
pub struct StyleProjector {
    marker_attribute: String,
    override_attribute: String,
}

impl StyleProjector {
    pub fn new(marker_attribute: impl Into<String>, override_attribute: impl Into<String>) -> Self {
        Self {
            marker_attribute: marker_attribute.into(),
            override_attribute: override_attribute.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.marker_attribute, &config.override_attribute)
    }

    /// Scoping prefix for one feature.
    pub fn scope(&self, feature: &str, suppressible: bool) -> String {
        let mut scope = format!(":root[{}~=\"{}\"]", self.marker_attribute, feature);
        if suppressible {
            scope.push_str(&format!(":not([{}~=\"{}\"])", self.override_attribute, feature));
        }
        scope
    }

    /// Compile every feature's rules, in registry order.
    pub fn compile(&self, registry: &FeatureRegistry) -> String {
        let mut sheet = Vec::new();
        for feature in registry.iter() {
            if feature.style_rules.is_empty() {
                continue;
            }
            let scope = self.scope(&feature.name, registry.is_affected(&feature.name));
            for rule in &feature.style_rules {
                match scope_rule(rule, &scope) {
                    Some(scoped) => sheet.push(scoped),
                    None => warn!(feature = %feature.name, rule = rule.trim(), "Skipping rule without a block"),
                }
            }
        }
        sheet.join("\n")
    }
}

/// Prefix every selector of `rule` with `scope`. At-rules pass through
/// unchanged. Returns `None` for text that isn't a rule.
fn scope_rule(rule: &str, scope: &str) -> Option<String> {
    let rule = rule.trim();
    if rule.starts_with('@') {
        return Some(rule.to_string());
    }

    let open = find_top_level(rule, '{')?;
    let (selectors, block) = rule.split_at(open);
    let scoped: Vec<String> = split_top_level(selectors, ',')
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("{scope} {s}"))
        .collect();

    if scoped.is_empty() {
        return None;
    }
    Some(format!("{} {}", scoped.join(", "), block.trim()))
}

/// Byte offsets of `needle` outside brackets, parentheses and strings.
fn top_level_positions(text: &str, needle: char) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '(' | '[' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                _ if c == needle && depth == 0 => positions.push(i),
                _ => {}
            },
        }
    }
    positions
}

fn find_top_level(text: &str, needle: char) -> Option<usize> {
    top_level_positions(text, needle).into_iter().next()
}

fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for pos in top_level_positions(text, separator) {
        parts.push(&text[start..pos]);
        start = pos + separator.len_utf8();
    }
    parts.push(&text[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureDescriptor;
    use pretty_assertions::assert_eq;

    fn projector() -> StyleProjector {
        StyleProjector::new("data-f", "data-o")
    }

    #[test]
    fn test_scopes_every_selector() {
        let registry = FeatureRegistry::from_features([FeatureDescriptor::new("singleColumn", true)
            .style("main > div, [data-testid=\"sidebarColumn\"] { margin: 0 !important; }")])
        .unwrap();

        assert_eq!(
            projector().compile(&registry),
            ":root[data-f~=\"singleColumn\"] main > div, \
             :root[data-f~=\"singleColumn\"] [data-testid=\"sidebarColumn\"] \
             { margin: 0 !important; }"
        );
    }

    #[test]
    fn test_affected_features_are_suppressible() {
        let registry = FeatureRegistry::from_features([
            FeatureDescriptor::new("quietHours", ["22:00", "07:00"]).affects("highlightBadges"),
            FeatureDescriptor::new("highlightBadges", true).style(".badge { color: red }"),
        ])
        .unwrap();

        assert_eq!(
            projector().compile(&registry),
            ":root[data-f~=\"highlightBadges\"]:not([data-o~=\"highlightBadges\"]) .badge { color: red }"
        );
    }

    #[test]
    fn test_commas_inside_functions_are_kept() {
        let scoped = scope_rule("a:is(.x, .y), b[title=\"a,b\"] { }", "S").unwrap();
        assert_eq!(scoped, "S a:is(.x, .y), S b[title=\"a,b\"] { }");
    }

    #[test]
    fn test_at_rules_and_garbage() {
        assert_eq!(
            scope_rule("@import url(x.css);", "S").as_deref(),
            Some("@import url(x.css);")
        );
        assert_eq!(scope_rule("color: red", "S"), None);
        assert_eq!(scope_rule(" { color: red }", "S"), None);
    }

    #[test]
    fn test_registry_order_and_determinism() {
        let registry = FeatureRegistry::from_features([
            FeatureDescriptor::new("b", true).style("b {}"),
            FeatureDescriptor::new("a", true).style("a {}"),
        ])
        .unwrap();
        let first = projector().compile(&registry);
        assert_eq!(first, ":root[data-f~=\"b\"] b {}\n:root[data-f~=\"a\"] a {}");
        assert_eq!(first, projector().compile(&registry));
    }
}
