//! Short-lived response cache.
//!
//! Entries carry their own TTL and are revalidated on every lookup, so an
//! expired entry is never returned even if `evict_expired` has not run.
//! Capacity is bounded; inserting past it evicts the oldest entry.

use std::hash::Hash;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use quill_protocol::{ActionKind, ActionRequest, AiContextSnapshot, CursorPosition};
use serde::Serialize;
use tokio::time::Instant;

/// Structural cache key for a request against a memory snapshot.
///
/// Content is not hashed: only its length and the text of the cursor line
/// take part, so a same-length edit elsewhere in the file can still hit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint {
    pub action: ActionKind,
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub selection: String,
    pub content_len: usize,
    pub cursor_line_text: String,
}

impl Fingerprint {
    /// Generation requests are never cached and yield `None`.
    pub fn for_request(request: &ActionRequest, snapshot: &AiContextSnapshot) -> Option<Self> {
        let (cursor, selection) = match request {
            ActionRequest::Completion { cursor, selection } => (*cursor, selection.clone()),
            ActionRequest::Refactor { code, intent } => {
                (snapshot.context.cursor, format!("{intent}\u{0}{code}"))
            }
            ActionRequest::Diagnosis {
                error_message,
                code,
            } => (snapshot.context.cursor, format!("{error_message}\u{0}{code}")),
            ActionRequest::Review { code, focus } => {
                (snapshot.context.cursor, format!("{}\u{0}{code}", focus.join(",")))
            }
            ActionRequest::Generation { .. } => return None,
        };
        Some(Self::new(request.kind(), snapshot, cursor, selection))
    }

    fn new(
        action: ActionKind,
        snapshot: &AiContextSnapshot,
        cursor: CursorPosition,
        selection: String,
    ) -> Self {
        let file = snapshot.current_file.as_ref();
        Self {
            action,
            file: file.map(|file| file.path.clone()).unwrap_or_default(),
            line: cursor.line,
            column: cursor.column,
            selection,
            content_len: file.map(|file| file.content.len()).unwrap_or(0),
            cursor_line_text: file
                .and_then(|file| file.content.lines().nth(cursor.line.saturating_sub(1)))
                .unwrap_or_default()
                .to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) < self.ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
pub struct CompletionCache<K, V> {
    inner: Mutex<CacheInner<K, V>>,
    capacity: usize,
}

#[derive(Debug)]
struct CacheInner<K, V> {
    entries: IndexMap<K, CacheEntry<V>>,
    hits: u64,
    misses: u64,
}

impl<K: Hash + Eq, V: Clone> CompletionCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: IndexMap::new(),
                hits: 0,
                misses: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let fresh = inner.entries.get(key).map(|entry| entry.is_fresh(now));
        match fresh {
            Some(true) => {
                inner.hits += 1;
                inner.entries.get(key).map(|entry| entry.value.clone())
            }
            Some(false) => {
                inner.entries.shift_remove(key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, key: K, value: V, ttl: Duration) {
        let mut inner = self.inner.lock();
        inner.entries.shift_remove(&key);
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
        while inner.entries.len() > self.capacity {
            inner.entries.shift_remove_index(0);
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.is_fresh(now));
        before - inner.entries.len()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            capacity: self.capacity,
            hits: inner.hits,
            misses: inner.misses,
        }
    }
}
