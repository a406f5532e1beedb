use crate::SourceRegistry;
use deepsearch_common::{ResearchError, ShortId, SourceRecord};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::warn;

/// Matches `[3]` and grouped markers such as `[1, 4]`.
fn marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]").expect("valid citation regex"))
}

/// An answer body checked against the registry
#[derive(Debug, Clone, Default)]
pub struct CitationRender {
    /// Text with dangling markers removed.
    pub text: String,
    /// Registered sources cited in `text`, in first-appearance order.
    pub sources: Vec<SourceRecord>,
    /// Ids the text referenced that the registry never allocated.
    pub dangling: Vec<ShortId>,
}

impl CitationRender {
    /// Fail on any dangling reference instead of silently dropping it.
    pub fn into_strict(self) -> Result<Self, ResearchError> {
        if self.dangling.is_empty() {
            Ok(self)
        } else {
            Err(ResearchError::CitationIntegrity(self.dangling))
        }
    }
}

/// Resolve the inline citation markers in `text` against `registry`.
///
/// Known ids are kept (deduplicated within a marker), unknown ids are
/// dropped from the marker, and a marker left with no known id is removed
/// together with the space before it.
pub fn render_citations(text: &str, registry: &SourceRegistry) -> CitationRender {
    let mut out = String::with_capacity(text.len());
    let mut sources = Vec::new();
    let mut seen = HashSet::new();
    let mut dangling = Vec::new();
    let mut last = 0;

    for caps in marker_regex().captures_iter(text) {
        let (Some(whole), Some(ids)) = (caps.get(0), caps.get(1)) else {
            continue;
        };

        let mut known: Vec<ShortId> = Vec::new();
        for part in ids.as_str().split(',') {
            let Ok(id) = part.trim().parse::<ShortId>() else {
                continue;
            };
            match registry.get(id) {
                Some(record) => {
                    if !known.contains(&id) {
                        known.push(id);
                    }
                    if seen.insert(id) {
                        sources.push(record.clone());
                    }
                }
                None => dangling.push(id),
            }
        }

        let prefix = &text[last..whole.start()];
        if known.is_empty() {
            out.push_str(prefix.strip_suffix(' ').unwrap_or(prefix));
        } else {
            out.push_str(prefix);
            let joined = known
                .iter()
                .map(ShortId::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            out.push('[');
            out.push_str(&joined);
            out.push(']');
        }
        last = whole.end();
    }
    out.push_str(&text[last..]);

    if !dangling.is_empty() {
        warn!("Dropped citation markers for unknown sources: {:?}", dangling);
    }

    CitationRender {
        text: out,
        sources,
        dangling,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepsearch_common::Citation;

    fn registry_with(n: usize) -> SourceRegistry {
        let mut registry = SourceRegistry::new();
        let citations: Vec<Citation> = (1..=n)
            .map(|i| Citation::new(format!("https://s{i}.example"), format!("S{i}")))
            .collect();
        registry.register(&citations);
        registry
    }

    #[test]
    fn test_sources_in_first_appearance_order() {
        let registry = registry_with(3);
        let render = render_citations("B is true [2]. A too [1]. B again [2].", &registry);
        let ids: Vec<_> = render.sources.iter().map(|s| s.short_id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert!(render.dangling.is_empty());
        assert_eq!(render.text, "B is true [2]. A too [1]. B again [2].");
    }

    #[test]
    fn test_uncited_sources_are_excluded() {
        let registry = registry_with(5);
        let render = render_citations("Only one claim [4].", &registry);
        assert_eq!(render.sources.len(), 1);
        assert_eq!(render.sources[0].short_id, 4);
    }

    #[test]
    fn test_dangling_marker_removed() {
        let registry = registry_with(1);
        let render = render_citations("Claim [9]. Other [1].", &registry);
        assert_eq!(render.text, "Claim. Other [1].");
        assert_eq!(render.dangling, vec![9]);
        assert_eq!(render.sources.len(), 1);
    }

    #[test]
    fn test_grouped_marker_keeps_known_ids() {
        let registry = registry_with(2);
        let render = render_citations("Claim [2, 7, 1, 2].", &registry);
        assert_eq!(render.text, "Claim [2, 1].");
        assert_eq!(render.dangling, vec![7]);
        let ids: Vec<_> = render.sources.iter().map(|s| s.short_id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_strict_mode_surfaces_integrity_error() {
        let registry = registry_with(1);
        let err = render_citations("Bad [3].", &registry)
            .into_strict()
            .unwrap_err();
        assert!(matches!(err, ResearchError::CitationIntegrity(ids) if ids == vec![3]));

        assert!(render_citations("Good [1].", &registry).into_strict().is_ok());
    }

    #[test]
    fn test_no_registry_no_markers() {
        let registry = SourceRegistry::new();
        let render = render_citations("Nothing cited here [1].", &registry);
        assert_eq!(render.text, "Nothing cited here.");
        assert!(render.sources.is_empty());
    }

    #[test]
    fn test_every_source_appears_in_text() {
        let registry = registry_with(4);
        let render = render_citations("x [1] y [3, 8] z [12]", &registry);
        for source in &render.sources {
            assert!(render.text.contains(&source.short_id.to_string()));
        }
    }
}
