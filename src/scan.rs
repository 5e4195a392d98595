//! Cursor-paginated iteration over cache entries.
//!
//! A [`Scanner`] pulls pages of entries either from the store's shard-ordered
//! scan or, when a prefix is set on a string-keyed cache, from a radix-tree
//! walk pruned to that prefix. Expired entries are filtered out; a compiled
//! glob filters non-matching keys.
//!
//! Iteration is best-effort resumable through
//! [`cursor`](Scanner::cursor): concurrent writes may cause duplicates or
//! omissions, never invalid reads. A cursor of zero after an advance means
//! the walk completed.
//!
//! A scanner built from a malformed glob starts in a terminal error state:
//! it yields nothing and [`error`](Scanner::error) reports the compile
//! failure.

use std::any::Any;
use std::collections::VecDeque;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use crate::cache::CacheCore;
use crate::error::PatternError;
use crate::glob::Pattern;
use crate::store::Entry;

/// Converts a radix-tree key back into `K` (only `String` keys reach here).
fn key_from_str<K: 'static>(text: &str) -> Option<K> {
    let boxed: Box<dyn Any> = Box::new(text.to_string());
    boxed.downcast::<K>().ok().map(|key| *key)
}

/// Resumable iterator over cache entries.
pub struct Scanner<'a, K, V, S> {
    core: Option<&'a CacheCore<K, V, S>>,
    cursor: u64,
    page_size: usize,
    prefix: Option<String>,
    pattern: Option<Pattern>,
    page: VecDeque<Entry<K, V>>,
    current: Option<Entry<K, V>>,
    exhausted: bool,
    error: Option<PatternError>,
}

impl<'a, K, V, S> Scanner<'a, K, V, S> {
    pub(crate) fn new(
        core: &'a CacheCore<K, V, S>,
        cursor: u64,
        count: usize,
        prefix: Option<String>,
        pattern: Option<Pattern>,
    ) -> Self {
        Self {
            core: Some(core),
            cursor,
            page_size: if count == 0 { 10 } else { count },
            prefix,
            pattern,
            page: VecDeque::new(),
            current: None,
            exhausted: false,
            error: None,
        }
    }

    /// A scanner that yields nothing (closed cache, non-string keys).
    pub(crate) fn empty() -> Self {
        Self {
            core: None,
            cursor: 0,
            page_size: 0,
            prefix: None,
            pattern: None,
            page: VecDeque::new(),
            current: None,
            exhausted: true,
            error: None,
        }
    }

    /// A scanner in a terminal error state (bad glob).
    pub(crate) fn with_error(error: PatternError) -> Self {
        let mut scanner = Self::empty();
        scanner.error = Some(error);
        scanner
    }

    /// Key of the entry the scanner currently points at.
    pub fn key(&self) -> Option<&K> {
        self.current.as_ref().map(|entry| &entry.key)
    }

    /// Value of the entry the scanner currently points at.
    pub fn value(&self) -> Option<Arc<V>> {
        self.current.as_ref().map(|entry| Arc::clone(&entry.value))
    }

    /// Cursor to resume from; zero once the walk has completed.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Compile error for `scan_match` with a malformed pattern.
    pub fn error(&self) -> Option<&PatternError> {
        self.error.as_ref()
    }
}

impl<K, V, S> Scanner<'_, K, V, S>
where
    K: Eq + Hash + Clone + 'static,
    S: BuildHasher,
{
    /// Steps to the next entry. Returns `false` when iteration is done or
    /// the scanner is in an error state.
    pub fn advance(&mut self) -> bool {
        if self.error.is_some() {
            return false;
        }
        loop {
            if let Some(entry) = self.page.pop_front() {
                self.current = Some(entry);
                return true;
            }
            if self.exhausted {
                self.current = None;
                return false;
            }
            self.fetch_page();
        }
    }

    fn fetch_page(&mut self) {
        let Some(core) = self.core else {
            self.exhausted = true;
            return;
        };
        let use_radix = self
            .prefix
            .as_ref()
            .is_some_and(|prefix| !prefix.is_empty())
            && core.radix.is_some();
        if use_radix {
            self.fetch_prefix_page(core);
        } else {
            self.fetch_scan_page(core);
        }
    }

    fn entry_matches(&self, entry: &Entry<K, V>, now: i64) -> bool {
        if entry.is_expired_at(now) {
            return false;
        }
        match &self.pattern {
            Some(pattern) => (&entry.key as &dyn Any)
                .downcast_ref::<String>()
                .is_some_and(|key| pattern.matches(key)),
            None => true,
        }
    }

    fn fetch_scan_page(&mut self, core: &CacheCore<K, V, S>) {
        let now = core.clock.now_nanos();
        loop {
            let (entries, next) = core.store.scan(self.cursor, self.page_size);
            self.cursor = next;
            for entry in entries {
                if self.entry_matches(&entry, now) {
                    self.page.push_back(entry);
                }
            }
            if next == 0 {
                self.exhausted = true;
                return;
            }
            if !self.page.is_empty() {
                return;
            }
        }
    }

    /// Pages through the radix walk. The cursor counts leaves visited in
    /// walk order, which is stable while the tree is unchanged.
    fn fetch_prefix_page(&mut self, core: &CacheCore<K, V, S>) {
        let tree = core
            .radix
            .as_ref()
            .expect("radix checked by caller")
            .read();
        let prefix = self.prefix.as_deref().unwrap_or_default();
        let now = core.clock.now_nanos();
        let skip = self.cursor as usize;
        let wanted = self.page_size;

        let mut visited = 0usize;
        let mut collected: Vec<Entry<K, V>> = Vec::new();
        let mut stopped_early = false;
        tree.walk_prefix(prefix, |key_text, hash| {
            if visited < skip {
                visited += 1;
                return true;
            }
            visited += 1;
            if let Some(key) = key_from_str::<K>(key_text) {
                if let Some(entry) = core.store.peek(&key, hash) {
                    if self.entry_matches(&entry, now) {
                        collected.push(entry);
                    }
                }
            }
            if collected.len() >= wanted {
                stopped_early = true;
                return false;
            }
            true
        });
        drop(tree);

        self.page.extend(collected);
        if stopped_early {
            self.cursor = visited as u64;
        } else {
            self.cursor = 0;
            self.exhausted = true;
        }
    }

    /// Collects every remaining `(key, value)` pair.
    pub fn all(&mut self) -> Vec<(K, Arc<V>)> {
        let mut items = Vec::new();
        while self.advance() {
            let entry = self.current.as_ref().expect("advanced");
            items.push((entry.key.clone(), Arc::clone(&entry.value)));
        }
        items
    }

    /// Collects every remaining key.
    pub fn keys(&mut self) -> Vec<K> {
        let mut keys = Vec::new();
        while self.advance() {
            keys.push(self.current.as_ref().expect("advanced").key.clone());
        }
        keys
    }

    /// Collects every remaining value.
    pub fn values(&mut self) -> Vec<Arc<V>> {
        let mut values = Vec::new();
        while self.advance() {
            values.push(Arc::clone(&self.current.as_ref().expect("advanced").value));
        }
        values
    }

    /// Counts the remaining entries without collecting them.
    pub fn count(&mut self) -> usize {
        let mut counted = 0;
        while self.advance() {
            counted += 1;
        }
        counted
    }

    /// Calls `f` for each remaining entry; `f` returns `false` to stop.
    pub fn for_each<F>(&mut self, mut f: F)
    where
        F: FnMut(&K, &Arc<V>) -> bool,
    {
        while self.advance() {
            let entry = self.current.as_ref().expect("advanced");
            if !f(&entry.key, &entry.value) {
                return;
            }
        }
    }
}

impl<K, V, S> Iterator for Scanner<'_, K, V, S>
where
    K: Eq + Hash + Clone + 'static,
    S: BuildHasher,
{
    type Item = (K, Arc<V>);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.advance() {
            return None;
        }
        self.current
            .as_ref()
            .map(|entry| (entry.key.clone(), Arc::clone(&entry.value)))
    }
}
