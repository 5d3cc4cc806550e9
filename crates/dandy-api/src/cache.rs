//! In-process TTL cache over the public wish feed. One entry per
//! (sort, category, search) combination holds the full filtered result
//! set; pages are sliced out locally, so paging through a feed costs one
//! store query per five minutes. Invalidation is deliberately coarse: any
//! water anywhere clears everything.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::anyhow;

use dandy_types::WishError;
use dandy_types::api::{Paginated, SortOrder};
use dandy_types::models::Wish;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub sort: SortOrder,
    pub category: Option<String>,
    pub search: Option<String>,
}

struct CacheEntry {
    wishes: Vec<Wish>,
    fetched_at: Instant,
}

pub struct WishCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl Default for WishCache {
    fn default() -> Self {
        Self::new()
    }
}

impl WishCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        WishCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Serve a page from a fresh entry, or run `fetch` for the full result
    /// set and cache it. The fetch runs outside the lock; two concurrent
    /// misses may both query, which is harmless.
    pub fn get_or_fetch<F>(
        &self,
        key: CacheKey,
        page: u32,
        page_size: u32,
        fetch: F,
    ) -> Result<Paginated<Wish>, WishError>
    where
        F: FnOnce() -> Result<Vec<Wish>, WishError>,
    {
        {
            let entries = self.lock()?;
            if let Some(entry) = entries.get(&key) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(slice_page(&entry.wishes, page, page_size));
                }
            }
        }

        let wishes = fetch()?;
        let result = slice_page(&wishes, page, page_size);

        let mut entries = self.lock()?;
        entries.insert(
            key,
            CacheEntry {
                wishes,
                fetched_at: Instant::now(),
            },
        );
        Ok(result)
    }

    pub fn invalidate_all(&self) {
        if let Ok(mut entries) = self.lock() {
            entries.clear();
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<CacheKey, CacheEntry>>, WishError> {
        self.entries
            .lock()
            .map_err(|e| WishError::Upstream(anyhow!("cache lock poisoned: {}", e)))
    }
}

fn slice_page(all: &[Wish], page: u32, page_size: u32) -> Paginated<Wish> {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let start = (page as usize - 1) * page_size as usize;
    let items = all
        .iter()
        .skip(start)
        .take(page_size as usize)
        .cloned()
        .collect();
    Paginated::new(items, all.len() as u64, page, page_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::cell::Cell;
    use uuid::Uuid;

    fn sample_wishes(n: usize) -> Vec<Wish> {
        (0..n)
            .map(|i| Wish {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                body: format!("wish {}", i),
                category: "misc".to_string(),
                progress: 0,
                is_private: false,
                support_count: 0,
                milestones: vec![],
                created_at: Utc::now(),
            })
            .collect()
    }

    fn key() -> CacheKey {
        CacheKey {
            sort: SortOrder::Newest,
            category: None,
            search: None,
        }
    }

    #[test]
    fn second_fetch_within_ttl_hits_cache() {
        let cache = WishCache::new();
        let calls = Cell::new(0);
        let wishes = sample_wishes(5);

        let fetch = || {
            calls.set(calls.get() + 1);
            Ok(wishes.clone())
        };

        let first = cache.get_or_fetch(key(), 1, 3, fetch).unwrap();
        assert_eq!(first.items.len(), 3);
        assert_eq!(first.total_count, 5);
        assert_eq!(calls.get(), 1);

        // Different page, same key: sliced locally, no second query.
        let second = cache
            .get_or_fetch(key(), 2, 3, || {
                calls.set(calls.get() + 1);
                Ok(vec![])
            })
            .unwrap();
        assert_eq!(second.items.len(), 2);
        assert_eq!(calls.get(), 1);
        assert_eq!(second.items[0].body, first.items[0].body.replace("0", "3"));
    }

    #[test]
    fn expired_entry_refetches() {
        let cache = WishCache::with_ttl(Duration::ZERO);
        let calls = Cell::new(0);

        for _ in 0..2 {
            cache
                .get_or_fetch(key(), 1, 10, || {
                    calls.set(calls.get() + 1);
                    Ok(sample_wishes(1))
                })
                .unwrap();
        }
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn invalidate_all_clears_every_key() {
        let cache = WishCache::new();
        let calls = Cell::new(0);
        let fetch = || {
            calls.set(calls.get() + 1);
            Ok(sample_wishes(2))
        };

        cache.get_or_fetch(key(), 1, 10, fetch).unwrap();
        let other_key = CacheKey {
            sort: SortOrder::MostSupported,
            category: Some("food".to_string()),
            search: None,
        };
        cache
            .get_or_fetch(other_key.clone(), 1, 10, || {
                calls.set(calls.get() + 1);
                Ok(sample_wishes(2))
            })
            .unwrap();
        assert_eq!(calls.get(), 2);

        cache.invalidate_all();

        cache
            .get_or_fetch(key(), 1, 10, || {
                calls.set(calls.get() + 1);
                Ok(sample_wishes(2))
            })
            .unwrap();
        cache
            .get_or_fetch(other_key, 1, 10, || {
                calls.set(calls.get() + 1);
                Ok(sample_wishes(2))
            })
            .unwrap();
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn out_of_range_page_is_empty() {
        let cache = WishCache::new();
        let page = cache
            .get_or_fetch(key(), 9, 10, || Ok(sample_wishes(3)))
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 3);
        assert_eq!(page.total_pages, 1);
    }
}
