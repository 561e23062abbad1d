pub mod lru;

use crate::storage::page::{Page, PageId, PageRef};
use crate::storage::wal::Lsn;
use log::debug;
use lru::LruList;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

struct CacheEntry {
    page: PageRef,
    node: usize,
}

/// Fixed-capacity LRU cache of pages.
///
/// The cache is not internally synchronized; the engine keeps it behind a
/// single mutex. A page is pinned while any handle other than the cache's
/// own is alive, and pinned pages are never evicted.
pub struct BufferCache {
    capacity: usize,
    entries: HashMap<PageId, CacheEntry>,
    lru: LruList<PageId>,
}

impl BufferCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            lru: LruList::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.entries.contains_key(&page_id)
    }

    /// Looks up a page and marks it most recently used.
    pub fn get(&mut self, page_id: PageId) -> Option<PageRef> {
        let entry = self.entries.get(&page_id)?;
        self.lru.touch(entry.node);
        Some(Arc::clone(&entry.page))
    }

    /// Caches `page` as most recently used and returns its shared handle
    /// together with the page evicted to make room, if any. The caller owns
    /// writing the evicted page back when it is dirty.
    pub fn put(&mut self, page: Page) -> (PageRef, Option<PageRef>) {
        let page_id = page.id();

        if let Some(entry) = self.entries.get(&page_id) {
            *entry.page.write() = page;
            self.lru.touch(entry.node);
            return (Arc::clone(&entry.page), None);
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.evict()
        } else {
            None
        };

        let page = Arc::new(RwLock::new(page));
        let node = self.lru.push_front(page_id);
        self.entries.insert(
            page_id,
            CacheEntry {
                page: Arc::clone(&page),
                node,
            },
        );

        (page, evicted)
    }

    /// Re-caches a page returned by eviction whose write-back failed, so
    /// its changes stay visible. May leave the cache above capacity.
    pub fn restore(&mut self, page: PageRef) {
        let page_id = page.read().id();
        if self.entries.contains_key(&page_id) {
            return;
        }
        let node = self.lru.push_front(page_id);
        self.entries.insert(page_id, CacheEntry { page, node });
    }

    fn evict(&mut self) -> Option<PageRef> {
        let victim = self
            .lru
            .iter_lru()
            .find(|(_, page_id)| {
                self.entries
                    .get(page_id)
                    .is_some_and(|entry| Arc::strong_count(&entry.page) == 1)
            });

        match victim {
            Some((node, page_id)) => {
                self.lru.remove(node);
                let entry = self.entries.remove(&page_id)?;
                debug!("Evicted page {} from buffer cache", page_id);
                Some(entry.page)
            }
            None => {
                debug!(
                    "All {} cached pages are pinned; growing past capacity",
                    self.entries.len()
                );
                None
            }
        }
    }

    /// Handles to every cached page, least recently used first.
    pub fn pages(&self) -> Vec<PageRef> {
        self.lru
            .iter_lru()
            .filter_map(|(_, page_id)| self.entries.get(&page_id))
            .map(|entry| Arc::clone(&entry.page))
            .collect()
    }

    /// Dirty pages and their recovery LSNs.
    pub fn dirty_pages(&self) -> Vec<(PageId, Lsn)> {
        let mut dirty: Vec<(PageId, Lsn)> = self
            .entries
            .values()
            .filter_map(|entry| {
                let page = entry.page.read();
                if page.is_dirty() {
                    Some((page.id(), page.rec_lsn().unwrap_or(page.page_lsn())))
                } else {
                    None
                }
            })
            .collect();
        dirty.sort_by_key(|(page_id, _)| *page_id);
        dirty
    }
}
