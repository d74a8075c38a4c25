//! The default BGP semantic cache: LRU over committed entries, with the
//! concurrent writer protocol of [`BgpCache`].

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use sparflow_common::{BgpCache, CanonicalBgp, WriterId};
use sparflow_model::{Bindings, TriplePattern};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Eviction parameters of the [`LruBgpCache`].
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Maximum number of committed entries.
    pub max_entries: usize,
    /// Maximum age of a committed entry.
    pub max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            max_age: Duration::from_secs(20 * 60),
        }
    }
}

/// An in-memory semantic cache with LRU and age-based eviction.
///
/// Multiple writers may stage rows for the same key concurrently; the first
/// commit installs the canonical entry and later commits are discarded.
/// Readers blocked on a staging key are woken by the first commit, or
/// resolve to `None` when the key disappears.
pub struct LruBgpCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    entries: FxHashMap<CanonicalBgp, CacheEntry>,
    sequence: u64,
}

enum CacheEntry {
    Staging {
        buffers: FxHashMap<WriterId, Vec<Bindings>>,
        notify: Arc<Notify>,
        last_update: Instant,
    },
    Committed {
        rows: Arc<Vec<Bindings>>,
        inserted_at: Instant,
        last_access: Instant,
        sequence: u64,
    },
}

impl CacheEntry {
    /// The instant this entry ages from: the last staged row for staging
    /// entries (a writer still streaming rows is not abandoned), the commit
    /// for committed ones.
    fn age_origin(&self) -> Instant {
        match self {
            CacheEntry::Staging { last_update, .. } => *last_update,
            CacheEntry::Committed { inserted_at, .. } => *inserted_at,
        }
    }
}

impl LruBgpCache {
    /// Creates a cache with the given eviction parameters.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes entries older than the maximum age and enforces the entry
    /// limit, evicting the least recently used committed entries first.
    ///
    /// Staging entries age out too: a writer that disappeared mid-stream
    /// (a cancelled consumer) must not occupy its key forever. Evicting a
    /// staging key drops its buffers and wakes pending readers, which then
    /// resolve to `None`.
    fn evict(&self, state: &mut CacheState) {
        let now = Instant::now();
        let stale: Vec<CanonicalBgp> = state
            .entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.age_origin()) > self.config.max_age)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            if let Some(CacheEntry::Staging { notify, .. }) = state.entries.remove(&key) {
                tracing::debug!(
                    patterns = key.patterns().len(),
                    "evicting stale staging entry"
                );
                notify.notify_waiters();
            }
        }

        loop {
            let committed = state
                .entries
                .iter()
                .filter(|(_, e)| matches!(e, CacheEntry::Committed { .. }))
                .count();
            if committed <= self.config.max_entries {
                break;
            }
            let oldest = state
                .entries
                .iter()
                .filter_map(|(key, entry)| match entry {
                    CacheEntry::Committed { last_access, .. } => {
                        Some((key.clone(), *last_access))
                    }
                    CacheEntry::Staging { .. } => None,
                })
                .min_by_key(|(_, last_access)| *last_access);
            match oldest {
                Some((key, _)) => {
                    tracing::debug!(patterns = key.patterns().len(), "evicting cache entry");
                    state.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl Default for LruBgpCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[async_trait]
impl BgpCache for LruBgpCache {
    async fn update(&self, bgp: &CanonicalBgp, solution: Bindings, writer: WriterId) {
        let mut state = self.lock();
        let entry = state.entries.entry(bgp.clone()).or_insert_with(|| {
            CacheEntry::Staging {
                buffers: FxHashMap::default(),
                notify: Arc::new(Notify::new()),
                last_update: Instant::now(),
            }
        });
        // Updates for an already-committed key are dropped.
        if let CacheEntry::Staging {
            buffers,
            last_update,
            ..
        } = entry
        {
            buffers.entry(writer).or_default().push(solution);
            *last_update = Instant::now();
        }
        self.evict(&mut state);
    }

    async fn commit(&self, bgp: &CanonicalBgp, writer: WriterId) {
        let mut state = self.lock();
        // First committer wins: if the entry is already committed, this
        // writer's rows were discarded when it was installed. A key deleted
        // while staging has nothing to install either.
        let staged = match state.entries.get_mut(bgp) {
            Some(CacheEntry::Staging { buffers, notify, .. }) => {
                let rows = buffers.remove(&writer).unwrap_or_default();
                Some((rows, Arc::clone(notify)))
            }
            _ => None,
        };
        let Some((rows, notify)) = staged else {
            return;
        };

        state.sequence += 1;
        let sequence = state.sequence;
        let now = Instant::now();
        tracing::debug!(rows = rows.len(), "committing cache entry");
        state.entries.insert(
            bgp.clone(),
            CacheEntry::Committed {
                rows: Arc::new(rows),
                inserted_at: now,
                last_access: now,
                sequence,
            },
        );
        notify.notify_waiters();
        self.evict(&mut state);
    }

    async fn abandon(&self, bgp: &CanonicalBgp, writer: WriterId) {
        let mut state = self.lock();
        let abandoned_notify = match state.entries.get_mut(bgp) {
            Some(CacheEntry::Staging { buffers, notify, .. }) => {
                buffers.remove(&writer);
                buffers.is_empty().then(|| Arc::clone(notify))
            }
            _ => None,
        };
        if let Some(notify) = abandoned_notify {
            state.entries.remove(bgp);
            notify.notify_waiters();
        }
    }

    async fn get(&self, bgp: &CanonicalBgp) -> Option<Vec<Bindings>> {
        enum Peek {
            Missing,
            Expired,
            Ready(Vec<Bindings>),
            Staging(Arc<Notify>),
        }
        loop {
            let peek = {
                let mut state = self.lock();
                match state.entries.get_mut(bgp) {
                    None => Peek::Missing,
                    Some(CacheEntry::Committed {
                        rows,
                        inserted_at,
                        last_access,
                        ..
                    }) => {
                        if inserted_at.elapsed() > self.config.max_age {
                            Peek::Expired
                        } else {
                            *last_access = Instant::now();
                            Peek::Ready(rows.as_ref().clone())
                        }
                    }
                    Some(CacheEntry::Staging { notify, .. }) => {
                        Peek::Staging(Arc::clone(notify))
                    }
                }
            };
            let notify = match peek {
                Peek::Missing => return None,
                Peek::Expired => {
                    self.lock().entries.remove(bgp);
                    return None;
                }
                Peek::Ready(rows) => return Some(rows),
                Peek::Staging(notify) => notify,
            };

            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            // Re-check before sleeping: the commit may have happened between
            // unlocking and registering interest.
            {
                let state = self.lock();
                if !matches!(state.entries.get(bgp), Some(CacheEntry::Staging { .. })) {
                    continue;
                }
            }
            notified.await;
        }
    }

    async fn has(&self, bgp: &CanonicalBgp) -> bool {
        let state = self.lock();
        match state.entries.get(bgp) {
            Some(CacheEntry::Committed { inserted_at, .. }) => {
                inserted_at.elapsed() <= self.config.max_age
            }
            _ => false,
        }
    }

    async fn count(&self) -> usize {
        let state = self.lock();
        state
            .entries
            .values()
            .filter(|entry| match entry {
                CacheEntry::Committed { inserted_at, .. } => {
                    inserted_at.elapsed() <= self.config.max_age
                }
                CacheEntry::Staging { .. } => false,
            })
            .count()
    }

    async fn delete(&self, bgp: &CanonicalBgp) {
        let mut state = self.lock();
        if let Some(CacheEntry::Staging { notify, .. }) = state.entries.remove(bgp) {
            // Wake pending readers; they will resolve to `None`.
            notify.notify_waiters();
        }
    }

    async fn find_subset(
        &self,
        bgp: &CanonicalBgp,
    ) -> Option<(CanonicalBgp, Vec<TriplePattern>)> {
        let mut state = self.lock();
        let now = Instant::now();
        let best = state
            .entries
            .iter()
            .filter_map(|(key, entry)| match entry {
                CacheEntry::Committed {
                    rows,
                    inserted_at,
                    sequence,
                    ..
                } if now.duration_since(*inserted_at) <= self.config.max_age
                    && key.is_subset_of(bgp) =>
                {
                    Some((key.clone(), rows.len(), *sequence))
                }
                _ => None,
            })
            // Largest BGP first, then largest result set, then insertion
            // order.
            .max_by_key(|(key, rows, sequence)| {
                (key.patterns().len(), *rows, std::cmp::Reverse(*sequence))
            });

        let (key, _, _) = best?;
        if let Some(CacheEntry::Committed { last_access, .. }) = state.entries.get_mut(&key) {
            *last_access = Instant::now();
        }
        let missing = key.missing_from(bgp);
        Some((key, missing))
    }
}
