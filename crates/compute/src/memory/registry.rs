//! Arena of tracked resources addressed by generational handles.
//!
//! Owners register what they allocate together with a dispose callback.
//! A slot's generation is bumped when it is released, so a handle kept past
//! release no longer resolves and every operation on it is ignored.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error};

/// Handle to a registered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceHandle {
    index: u32,
    generation: u32,
}

/// Called once when a resource is disposed.
pub type DisposeFn = Box<dyn FnOnce() + Send>;

/// Read-only view of a tracked resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceInfo {
    pub owner: String,
    pub size_bytes: u64,
    pub orphaned: bool,
}

struct Entry {
    owner: String,
    size_bytes: u64,
    created_at: Instant,
    last_used: Instant,
    orphaned: bool,
    dispose: Option<DisposeFn>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Default)]
pub struct ResourceRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    tracked_bytes: u64,
    live: usize,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        owner: &str,
        size_bytes: u64,
        dispose: DisposeFn,
        now: Instant,
    ) -> ResourceHandle {
        let entry = Entry {
            owner: owner.to_string(),
            size_bytes,
            created_at: now,
            last_used: now,
            orphaned: false,
            dispose: Some(dispose),
        };
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.entry = Some(entry);
        self.tracked_bytes += size_bytes;
        self.live += 1;
        ResourceHandle {
            index,
            generation: slot.generation,
        }
    }

    fn entry_mut(&mut self, handle: ResourceHandle) -> Option<&mut Entry> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    pub fn info(&self, handle: ResourceHandle) -> Option<ResourceInfo> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
            .map(|e| ResourceInfo {
                owner: e.owner.clone(),
                size_bytes: e.size_bytes,
                orphaned: e.orphaned,
            })
    }

    /// Record a use. Returns `false` for a stale handle.
    pub fn touch(&mut self, handle: ResourceHandle, now: Instant) -> bool {
        match self.entry_mut(handle) {
            Some(entry) => {
                entry.last_used = now;
                true
            }
            None => false,
        }
    }

    /// The owner is gone; the next cleanup disposes the resource.
    pub fn mark_orphaned(&mut self, handle: ResourceHandle) -> bool {
        match self.entry_mut(handle) {
            Some(entry) => {
                entry.orphaned = true;
                true
            }
            None => false,
        }
    }

    /// Dispose and forget a resource. Returns the bytes it held.
    pub fn release(&mut self, handle: ResourceHandle) -> Option<u64> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?;
        let mut entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.tracked_bytes = self.tracked_bytes.saturating_sub(entry.size_bytes);
        self.live -= 1;

        if let Some(dispose) = entry.dispose.take() {
            if catch_unwind(AssertUnwindSafe(dispose)).is_err() {
                error!(owner = %entry.owner, "dispose callback panicked");
            }
        }
        debug!(owner = %entry.owner, bytes = entry.size_bytes, "Resource released");
        Some(entry.size_bytes)
    }

    fn live_entries(&self) -> impl Iterator<Item = (ResourceHandle, &Entry)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.entry.as_ref().map(|e| {
                (
                    ResourceHandle {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    e,
                )
            })
        })
    }

    pub fn orphaned(&self) -> Vec<ResourceHandle> {
        self.live_entries()
            .filter(|(_, e)| e.orphaned)
            .map(|(h, _)| h)
            .collect()
    }

    /// Resources created more than `max_age` ago. With `recent` set, those
    /// used within that window are skipped.
    pub fn older_than(
        &self,
        now: Instant,
        max_age: Duration,
        recent: Option<Duration>,
    ) -> Vec<ResourceHandle> {
        self.live_entries()
            .filter(|(_, e)| now.saturating_duration_since(e.created_at) > max_age)
            .filter(|(_, e)| {
                recent.map_or(true, |window| {
                    now.saturating_duration_since(e.last_used) >= window
                })
            })
            .map(|(h, _)| h)
            .collect()
    }

    /// Every resource, largest first.
    pub fn largest_first(&self) -> Vec<ResourceHandle> {
        let mut entries: Vec<_> = self
            .live_entries()
            .map(|(h, e)| (h, e.size_bytes))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.into_iter().map(|(h, _)| h).collect()
    }

    pub fn tracked_bytes(&self) -> u64 {
        self.tracked_bytes
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("live", &self.live)
            .field("tracked_bytes", &self.tracked_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> DisposeFn) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            let c = Arc::clone(&c);
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }) as DisposeFn
        })
    }

    #[test]
    fn release_disposes_once_and_invalidates_handle() {
        let now = Instant::now();
        let (disposed, dispose) = counter();
        let mut reg = ResourceRegistry::new();
        let h = reg.register("grid", 100, dispose(), now);
        assert_eq!(reg.tracked_bytes(), 100);

        assert_eq!(reg.release(h), Some(100));
        assert_eq!(reg.release(h), None);
        assert!(!reg.touch(h, now));
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert!(reg.is_empty());
        assert_eq!(reg.tracked_bytes(), 0);
    }

    #[test]
    fn reused_slot_rejects_old_handle() {
        let now = Instant::now();
        let (_, dispose) = counter();
        let mut reg = ResourceRegistry::new();
        let old = reg.register("a", 1, dispose(), now);
        reg.release(old);
        let new = reg.register("b", 2, dispose(), now);

        assert!(!reg.mark_orphaned(old));
        assert_eq!(reg.info(new).map(|i| i.owner), Some("b".to_string()));
        assert_eq!(reg.info(old), None);
    }

    #[test]
    fn age_query_honours_recent_use() {
        let t0 = Instant::now();
        let (_, dispose) = counter();
        let mut reg = ResourceRegistry::new();
        let idle = reg.register("idle", 1, dispose(), t0);
        let busy = reg.register("busy", 1, dispose(), t0);

        let now = t0 + Duration::from_secs(10);
        reg.touch(busy, now - Duration::from_secs(1));

        let max_age = Duration::from_secs(5);
        assert_eq!(
            reg.older_than(now, max_age, Some(Duration::from_secs(3))),
            vec![idle]
        );
        assert_eq!(reg.older_than(now, max_age, None).len(), 2);
    }

    #[test]
    fn largest_first_orders_by_size() {
        let now = Instant::now();
        let (_, dispose) = counter();
        let mut reg = ResourceRegistry::new();
        let small = reg.register("s", 10, dispose(), now);
        let big = reg.register("b", 1000, dispose(), now);
        let mid = reg.register("m", 100, dispose(), now);
        assert_eq!(reg.largest_first(), vec![big, mid, small]);
    }

    #[test]
    fn panicking_dispose_still_releases() {
        let now = Instant::now();
        let mut reg = ResourceRegistry::new();
        let h = reg.register("bad", 5, Box::new(|| panic!("dispose failed")), now);
        assert_eq!(reg.release(h), Some(5));
        assert_eq!(reg.len(), 0);
    }
}
