use deepsearch_common::{Citation, ShortId, SourceRecord};
use std::collections::HashMap;
use tracing::debug;

/// Deduplicating registry of every source seen during one research session.
///
/// Short ids start at 1 and are handed out in the order urls are first
/// registered. They are never reused or renumbered, so folding the same
/// citations in the same order always yields the same mapping.
#[derive(Debug, Default, Clone)]
pub struct SourceRegistry {
    by_url: HashMap<String, ShortId>,
    records: Vec<SourceRecord>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one result's citations, returning the short id of each
    /// citation with a non-empty url (in input order).
    pub fn register(&mut self, citations: &[Citation]) -> Vec<ShortId> {
        let before = self.records.len();

        let ids: Vec<ShortId> = citations
            .iter()
            .filter_map(|c| {
                let url = c.url.trim();
                if url.is_empty() {
                    return None;
                }
                Some(self.register_one(url, c.title.trim()))
            })
            .collect();

        let added = self.records.len() - before;
        if added > 0 {
            debug!(
                "Registered {} new sources ({} citations, {} total)",
                added,
                citations.len(),
                self.records.len()
            );
        }

        ids
    }

    fn register_one(&mut self, url: &str, title: &str) -> ShortId {
        if let Some(&id) = self.by_url.get(url) {
            return id;
        }

        let short_id = self.records.len() as ShortId + 1;
        let title = if title.is_empty() { url } else { title };
        self.records.push(SourceRecord {
            url: url.to_string(),
            title: title.to_string(),
            short_id,
        });
        self.by_url.insert(url.to_string(), short_id);
        short_id
    }

    pub fn get(&self, short_id: ShortId) -> Option<&SourceRecord> {
        let index = (short_id as usize).checked_sub(1)?;
        self.records.get(index)
    }

    pub fn lookup_url(&self, url: &str) -> Option<&SourceRecord> {
        self.by_url.get(url.trim()).and_then(|&id| self.get(id))
    }

    /// All records in allocation order.
    pub fn records(&self) -> &[SourceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cite(url: &str) -> Citation {
        Citation::new(url, format!("title of {url}"))
    }

    #[test]
    fn test_ids_follow_first_sight() {
        let mut registry = SourceRegistry::new();
        assert_eq!(registry.register(&[cite("a"), cite("b")]), vec![1, 2]);
        assert_eq!(registry.register(&[cite("c"), cite("a")]), vec![3, 1]);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get(3).unwrap().url, "c");
    }

    #[test]
    fn test_registration_is_idempotent() {
        let mut registry = SourceRegistry::new();
        registry.register(&[cite("https://x.example")]);
        registry.register(&[cite("https://x.example"), cite(" https://x.example ")]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup_url("https://x.example").unwrap().short_id, 1);
    }

    #[test]
    fn test_same_fold_order_same_mapping() {
        let rounds = vec![
            vec![cite("u1"), cite("u2")],
            vec![cite("u2"), cite("u3"), cite("u1")],
            vec![cite("u4")],
        ];

        let run = || {
            let mut registry = SourceRegistry::new();
            for round in &rounds {
                registry.register(round);
            }
            registry
                .records()
                .iter()
                .map(|r| (r.url.clone(), r.short_id))
                .collect::<Vec<_>>()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn test_empty_urls_are_skipped_and_titles_fall_back() {
        let mut registry = SourceRegistry::new();
        let ids = registry.register(&[Citation::new("", "nothing"), Citation::new("u", "")]);
        assert_eq!(ids, vec![1]);
        assert_eq!(registry.get(1).unwrap().title, "u");
    }

    #[test]
    fn test_unknown_ids() {
        let registry = SourceRegistry::new();
        assert!(registry.get(0).is_none());
        assert!(registry.get(1).is_none());
        assert!(registry.is_empty());
    }
}
