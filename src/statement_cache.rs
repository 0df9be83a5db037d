use std::sync::Arc;

use hashlink::lru_cache::LruCache;

use crate::statement::PgStatement;

/// A per-connection cache of statement descriptions keyed by the SQL text,
/// verbatim. When full, the least recently used entry is removed.
///
/// In `Prepare` mode entries correspond to named server-side prepared
/// statements and the evicted entry must be deallocated on the server; in
/// `Describe` mode entries are descriptions of the unnamed statement and
/// eviction is free.
#[derive(Debug)]
pub struct StatementCache {
    inner: LruCache<String, Arc<PgStatement>>,
    capacity: usize,
}

impl StatementCache {
    pub fn new(capacity: usize) -> Self {
        StatementCache {
            inner: LruCache::new_unbounded(),
            capacity,
        }
    }

    /// A cache with zero capacity never stores anything.
    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up the statement for the given SQL, refreshing its recency.
    pub fn get(&mut self, sql: &str) -> Option<Arc<PgStatement>> {
        self.inner.get(sql).cloned()
    }

    /// Insert a statement, returning the statement that had to make room:
    /// the evicted LRU entry if the cache was full, or the displaced entry
    /// if the key was already present. The caller is responsible for
    /// deallocating the returned statement server-side where applicable.
    pub fn insert(&mut self, sql: &str, statement: Arc<PgStatement>) -> Option<Arc<PgStatement>> {
        let mut displaced = None;

        if !self.is_enabled() {
            return None;
        }

        if self.inner.contains_key(sql) {
            displaced = self.inner.remove(sql);
        } else if self.len() == self.capacity {
            displaced = self.remove_lru();
        }

        self.inner.insert(sql.to_owned(), statement);

        displaced
    }

    /// Remove the least recently used statement.
    pub fn remove_lru(&mut self) -> Option<Arc<PgStatement>> {
        self.inner.remove_lru().map(|(_, v)| v)
    }

    /// Drop every entry, returning them for server-side cleanup.
    pub fn drain(&mut self) -> Vec<Arc<PgStatement>> {
        let mut entries = Vec::with_capacity(self.len());

        while let Some(statement) = self.remove_lru() {
            entries.push(statement);
        }

        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement(sql: &str, name: &str) -> Arc<PgStatement> {
        Arc::new(PgStatement {
            name: name.to_owned(),
            sql: sql.to_owned(),
            param_types: vec![],
            columns: vec![],
        })
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = StatementCache::new(2);

        assert!(cache.insert("a", statement("a", "s1")).is_none());
        assert!(cache.insert("b", statement("b", "s2")).is_none());

        // refresh "a" so "b" becomes the eviction candidate
        assert!(cache.get("a").is_some());

        let evicted = cache.insert("c", statement("c", "s3")).unwrap();
        assert_eq!(evicted.name, "s2");

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reinsert_displaces_existing_entry() {
        let mut cache = StatementCache::new(2);

        cache.insert("a", statement("a", "s1"));
        let displaced = cache.insert("a", statement("a", "s9")).unwrap();

        assert_eq!(displaced.name, "s1");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut cache = StatementCache::new(0);

        assert!(!cache.is_enabled());
        assert!(cache.insert("a", statement("a", "s1")).is_none());
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }
}
