use chrono::{NaiveDate, NaiveTime};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::model::Ms;

/// Lock key: one entry per (date, time-of-day), regardless of consultant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub date: NaiveDate,
    pub time_slot: NaiveTime,
}

impl SlotKey {
    pub fn new(date: NaiveDate, time_slot: NaiveTime) -> Self {
        Self { date, time_slot }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    pub locked_at: Ms,
    pub expires_at: Ms,
    /// Reference id of the draft the lock was taken for, once issued.
    pub holder: Option<String>,
}

impl LockEntry {
    fn is_live(&self, now: Ms) -> bool {
        self.expires_at > now
    }
}

/// In-process, time-bounded mutual exclusion over slot keys.
///
/// Only closes the check-then-write gap inside one process. Every read path
/// purges the expired entry it touches, so the sweeper is memory hygiene.
pub struct SlotLock {
    entries: DashMap<SlotKey, LockEntry>,
    default_ttl: Ms,
}

impl SlotLock {
    pub fn new(default_ttl: Ms) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Ms {
        self.default_ttl
    }

    pub fn acquire(&self, key: SlotKey, ttl: Option<Ms>) -> bool {
        self.acquire_at(key, ttl.unwrap_or(self.default_ttl), crate::engine::now_ms())
    }

    /// The entry API holds the shard lock for the key, so check and insert
    /// are one step.
    pub fn acquire_at(&self, key: SlotKey, ttl: Ms, now: Ms) -> bool {
        let fresh = LockEntry {
            locked_at: now,
            expires_at: now + ttl,
            holder: None,
        };
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return false;
                }
                occupied.insert(fresh);
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        }
    }

    /// Record which booking owns a live, untagged lock. No-op if the lock is
    /// gone or already belongs to someone else.
    pub fn tag(&self, key: SlotKey, reference_id: &str) {
        if let Some(mut entry) = self.entries.get_mut(&key)
            && entry.holder.is_none()
        {
            entry.holder = Some(reference_id.to_string());
        }
    }

    pub fn release(&self, key: SlotKey) -> bool {
        self.entries.remove(&key).is_some()
    }

    /// Release only if the lock was taken for this booking.
    pub fn release_held_by(&self, key: SlotKey, reference_id: &str) -> bool {
        self.entries
            .remove_if(&key, |_, e| e.holder.as_deref() == Some(reference_id))
            .is_some()
    }

    pub fn is_locked(&self, key: SlotKey) -> bool {
        self.is_locked_at(key, crate::engine::now_ms())
    }

    pub fn is_locked_at(&self, key: SlotKey, now: Ms) -> bool {
        self.entries.remove_if(&key, |_, e| !e.is_live(now));
        self.entries.contains_key(&key)
    }

    pub fn remaining_millis(&self, key: SlotKey) -> Ms {
        self.remaining_millis_at(key, crate::engine::now_ms())
    }

    pub fn remaining_millis_at(&self, key: SlotKey, now: Ms) -> Ms {
        self.entries.remove_if(&key, |_, e| !e.is_live(now));
        self.entries
            .get(&key)
            .map_or(0, |e| (e.expires_at - now).max(0))
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep(&self, now: Ms) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{date, time};

    const TTL: Ms = 5 * 60_000;

    fn key(t: &str) -> SlotKey {
        SlotKey::new(date("2025-03-10"), time(t))
    }

    #[test]
    fn second_acquire_within_ttl_fails() {
        let locks = SlotLock::new(TTL);
        assert!(locks.acquire_at(key("10:00"), TTL, 1_000));
        for offset in [0, 1, 60_000, TTL - 1] {
            assert!(!locks.acquire_at(key("10:00"), TTL, 1_000 + offset));
        }
        assert!(locks.acquire_at(key("10:30"), TTL, 1_000)); // different key
    }

    #[test]
    fn acquire_after_expiry_replaces_entry() {
        let locks = SlotLock::new(TTL);
        assert!(locks.acquire_at(key("10:00"), TTL, 0));
        assert!(locks.acquire_at(key("10:00"), TTL, TTL));
        assert_eq!(locks.remaining_millis_at(key("10:00"), TTL), TTL);
    }

    #[test]
    fn release_reports_presence() {
        let locks = SlotLock::new(TTL);
        assert!(!locks.release(key("10:00")));
        locks.acquire_at(key("10:00"), TTL, 0);
        assert!(locks.release(key("10:00")));
        assert!(!locks.release(key("10:00")));
    }

    #[test]
    fn is_locked_purges_expired() {
        let locks = SlotLock::new(TTL);
        locks.acquire_at(key("10:00"), TTL, 0);
        assert!(locks.is_locked_at(key("10:00"), TTL - 1));
        assert_eq!(locks.len(), 1);
        assert!(!locks.is_locked_at(key("10:00"), TTL));
        assert!(locks.is_empty());
    }

    #[test]
    fn remaining_millis_counts_down() {
        let locks = SlotLock::new(TTL);
        assert_eq!(locks.remaining_millis_at(key("10:00"), 0), 0);
        locks.acquire_at(key("10:00"), TTL, 0);
        assert_eq!(locks.remaining_millis_at(key("10:00"), 1_000), TTL - 1_000);
        assert_eq!(locks.remaining_millis_at(key("10:00"), TTL + 1), 0);
    }

    #[test]
    fn release_held_by_checks_holder() {
        let locks = SlotLock::new(TTL);
        locks.acquire_at(key("10:00"), TTL, 0);
        locks.tag(key("10:00"), "NAB_2025_0001");
        assert!(!locks.release_held_by(key("10:00"), "NAB_2025_0002"));
        assert!(locks.release_held_by(key("10:00"), "NAB_2025_0001"));
        assert!(locks.is_empty());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let locks = SlotLock::new(TTL);
        locks.acquire_at(key("09:00"), 1_000, 0);
        locks.acquire_at(key("10:00"), TTL, 0);
        assert_eq!(locks.sweep(1_000), 1);
        assert_eq!(locks.len(), 1);
        assert!(locks.is_locked_at(key("10:00"), 1_000));
    }

    #[test]
    fn concurrent_acquire_has_one_winner() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let locks = Arc::new(SlotLock::new(TTL));
        let wins = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let locks = locks.clone();
                let wins = wins.clone();
                std::thread::spawn(move || {
                    if locks.acquire_at(key("10:00"), TTL, 0) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }
}
