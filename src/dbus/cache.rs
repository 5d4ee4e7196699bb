//! Cached property snapshot of one remote interface.
//!
//! The cache is always in one of three states. `Fresh` holds a snapshot
//! verified by a full fetch plus any incremental patches applied since.
//! `Invalidated` means at least one key is known to be stale and a fetch is
//! owed. `Fetching` means a fetch is in flight.
//!
//! Every event (patch, invalidation, fetch start) takes the next generation
//! number. A fetch that completes keeps patched values newer than its start,
//! and leaves the cache `Invalidated` if an invalidation arrived while it was
//! in flight, so out-of-order completion resolves the same way every time.
//! Of two overlapping fetches only the later-started one is applied; an older
//! fetch finishing last is discarded.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard},
};

use super::{PropertyMap, Value, property::Property};

/// Consistency state of a [`PropertyCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing fetched yet.
    Empty,
    /// Verified snapshot, possibly patched since.
    Fresh,
    /// Some keys are stale; a full fetch is owed.
    Invalidated,
    /// A full fetch is in flight.
    Fetching,
}

/// Handed out by [`PropertyCache::begin_fetch`]; identifies the fetch when it
/// completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
}

/// What a completed fetch left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Snapshot applied, cache is fresh.
    Applied,
    /// Snapshot applied but keys were invalidated meanwhile; fetch again.
    StillStale,
    /// Discarded because a fetch started later was already applied.
    Superseded,
}

#[derive(Debug)]
struct CacheInner {
    state: CacheState,
    generation: u64,
    patched_at: BTreeMap<String, u64>,
    invalidated_at: u64,
    applied_fetch: u64,
    stale: BTreeSet<String>,
}

/// Property snapshot guarded by an explicit state machine.
#[derive(Debug)]
pub struct PropertyCache {
    inner: Mutex<CacheInner>,
    snapshot: Property<PropertyMap>,
}

impl Default for PropertyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                state: CacheState::Empty,
                generation: 0,
                patched_at: BTreeMap::new(),
                invalidated_at: 0,
                applied_fetch: 0,
                stale: BTreeSet::new(),
            }),
            snapshot: Property::new(PropertyMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state.
    pub fn state(&self) -> CacheState {
        self.lock().state
    }

    /// Keys known to be stale.
    pub fn stale_keys(&self) -> BTreeSet<String> {
        self.lock().stale.clone()
    }

    /// Copy of every cached property.
    pub fn snapshot(&self) -> PropertyMap {
        self.snapshot.get()
    }

    /// One cached property.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.snapshot.get().get(name).cloned()
    }

    /// Reactive view of the snapshot.
    pub fn property(&self) -> &Property<PropertyMap> {
        &self.snapshot
    }

    /// Merges an incremental patch. Only the given keys change.
    pub fn apply_changes(&self, changed: PropertyMap) {
        if changed.is_empty() {
            return;
        }

        let mut inner = self.lock();
        inner.generation += 1;
        let generation = inner.generation;

        let mut properties = self.snapshot.get();
        for (name, value) in changed {
            inner.stale.remove(&name);
            inner.patched_at.insert(name.clone(), generation);
            properties.insert(name, value);
        }
        self.snapshot.set(properties);
    }

    /// Marks keys stale. The cache stays `Invalidated` until a fetch started
    /// after this call completes.
    pub fn invalidate<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.invalidated_at = inner.generation;
        inner.stale.extend(keys.into_iter().map(Into::into));
        inner.state = CacheState::Invalidated;
    }

    /// Marks every cached key stale, e.g. after change notifications were
    /// lost.
    pub fn invalidate_all(&self) {
        let keys: Vec<String> = self.snapshot.get().into_keys().collect();
        self.invalidate(keys);
    }

    /// Records the start of a full fetch.
    pub fn begin_fetch(&self) -> FetchTicket {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.state = CacheState::Fetching;
        FetchTicket {
            generation: inner.generation,
        }
    }

    /// Applies the result of a full fetch.
    ///
    /// Keys patched after the fetch started keep their patched value. If keys
    /// were invalidated after the fetch started the cache remains
    /// `Invalidated` and [`FetchOutcome::StillStale`] is returned. A fetch
    /// older than the last applied one changes nothing.
    pub fn complete_fetch(&self, ticket: FetchTicket, fetched: PropertyMap) -> FetchOutcome {
        let mut inner = self.lock();
        if ticket.generation < inner.applied_fetch {
            return FetchOutcome::Superseded;
        }
        inner.applied_fetch = ticket.generation;
        let current = self.snapshot.get();

        let mut properties = fetched;
        for (name, patched_at) in &inner.patched_at {
            if *patched_at > ticket.generation {
                if let Some(value) = current.get(name) {
                    properties.insert(name.clone(), value.clone());
                }
            }
        }
        inner
            .patched_at
            .retain(|_, patched_at| *patched_at > ticket.generation);
        self.snapshot.set(properties);

        if inner.invalidated_at > ticket.generation {
            inner.state = CacheState::Invalidated;
            FetchOutcome::StillStale
        } else {
            inner.stale.clear();
            inner.state = CacheState::Fresh;
            FetchOutcome::Applied
        }
    }

    /// Records a failed fetch; the snapshot is kept and marked owed.
    pub fn fail_fetch(&self, ticket: FetchTicket) {
        let mut inner = self.lock();
        if inner.state == CacheState::Fetching {
            inner.invalidated_at = inner.invalidated_at.max(ticket.generation);
            inner.state = CacheState::Invalidated;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, u32)]) -> PropertyMap {
        entries
            .iter()
            .map(|(k, v)| (String::from(*k), Value::U32(*v)))
            .collect()
    }

    #[test]
    fn fetch_makes_cache_fresh() {
        let cache = PropertyCache::new();
        assert_eq!(cache.state(), CacheState::Empty);

        let ticket = cache.begin_fetch();
        assert_eq!(cache.state(), CacheState::Fetching);
        assert_eq!(cache.complete_fetch(ticket, map(&[("Count", 1)])), FetchOutcome::Applied);

        assert_eq!(cache.state(), CacheState::Fresh);
        assert_eq!(cache.get("Count"), Some(Value::U32(1)));
    }

    #[test]
    fn patch_only_touches_given_keys() {
        let cache = PropertyCache::new();
        let ticket = cache.begin_fetch();
        cache.complete_fetch(ticket, map(&[("Count", 1), ("Other", 2)]));

        cache.apply_changes(map(&[("Count", 5)]));

        assert_eq!(cache.snapshot(), map(&[("Count", 5), ("Other", 2)]));
        assert_eq!(cache.state(), CacheState::Fresh);
    }

    #[test]
    fn later_patch_survives_earlier_fetch() {
        let cache = PropertyCache::new();
        let ticket = cache.begin_fetch();

        cache.apply_changes(map(&[("Count", 9)]));
        cache.complete_fetch(ticket, map(&[("Count", 1), ("Other", 2)]));

        assert_eq!(cache.snapshot(), map(&[("Count", 9), ("Other", 2)]));
    }

    #[test]
    fn earlier_patch_is_replaced_by_fetch() {
        let cache = PropertyCache::new();
        cache.apply_changes(map(&[("Count", 9)]));

        let ticket = cache.begin_fetch();
        cache.complete_fetch(ticket, map(&[("Count", 1)]));

        assert_eq!(cache.get("Count"), Some(Value::U32(1)));
    }

    #[test]
    fn invalidation_during_fetch_keeps_cache_stale() {
        let cache = PropertyCache::new();
        let ticket = cache.begin_fetch();
        cache.invalidate(["Count"]);

        assert_eq!(
            cache.complete_fetch(ticket, map(&[("Count", 1)])),
            FetchOutcome::StillStale
        );
        assert_eq!(cache.state(), CacheState::Invalidated);

        let retry = cache.begin_fetch();
        assert_eq!(cache.complete_fetch(retry, map(&[("Count", 2)])), FetchOutcome::Applied);
        assert!(cache.stale_keys().is_empty());
    }

    #[test]
    fn older_fetch_finishing_last_is_discarded() {
        let cache = PropertyCache::new();
        let older = cache.begin_fetch();
        cache.apply_changes(map(&[("Count", 9)]));
        let newer = cache.begin_fetch();

        assert_eq!(cache.complete_fetch(newer, map(&[("Count", 9)])), FetchOutcome::Applied);
        assert_eq!(
            cache.complete_fetch(older, map(&[("Count", 1)])),
            FetchOutcome::Superseded
        );

        assert_eq!(cache.get("Count"), Some(Value::U32(9)));
        assert_eq!(cache.state(), CacheState::Fresh);
    }

    #[test]
    fn older_fetch_finishing_first_is_still_applied() {
        let cache = PropertyCache::new();
        let older = cache.begin_fetch();
        let newer = cache.begin_fetch();

        assert_eq!(cache.complete_fetch(older, map(&[("Count", 1)])), FetchOutcome::Applied);
        assert_eq!(cache.complete_fetch(newer, map(&[("Count", 2)])), FetchOutcome::Applied);

        assert_eq!(cache.get("Count"), Some(Value::U32(2)));
    }

    #[test]
    fn invalidate_all_marks_every_key() {
        let cache = PropertyCache::new();
        let ticket = cache.begin_fetch();
        cache.complete_fetch(ticket, map(&[("Count", 1), ("Other", 2)]));

        cache.invalidate_all();

        assert_eq!(cache.state(), CacheState::Invalidated);
        assert_eq!(cache.stale_keys().len(), 2);
    }

    #[test]
    fn failed_fetch_leaves_cache_owed() {
        let cache = PropertyCache::new();
        let ticket = cache.begin_fetch();
        cache.fail_fetch(ticket);

        assert_eq!(cache.state(), CacheState::Invalidated);
    }
}
