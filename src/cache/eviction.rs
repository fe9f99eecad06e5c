//! Eviction planning for the disk store.
//!
//! The request path never deletes entries. Eviction only happens when an
//! operator configures a byte budget or a maximum age, and then only through a
//! periodic sweep.
//!
//! The byte budget uses an LRU approximation based on modification time: once
//! the cache exceeds its limit, the oldest entries are removed until the total
//! drops to 90% of the limit, leaving headroom for new writes before the next
//! sweep.

use std::time::{Duration, SystemTime};

use super::keys::CacheKey;

/// Target fraction of the byte budget after eviction.
const EVICTION_TARGET_PERCENTAGE: f64 = 0.9;

/// Limits applied by a sweep. Both unset means entries are kept forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub max_bytes: Option<u64>,
    pub max_age: Option<Duration>,
}

/// Metadata for one stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: CacheKey,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub files_deleted: usize,
    pub bytes_freed: u64,
    pub size_before: u64,
    pub size_after: u64,
}

impl EvictionPolicy {
    pub fn is_enabled(&self) -> bool {
        self.max_bytes.is_some() || self.max_age.is_some()
    }

    /// Select the entries to delete, oldest first.
    pub fn plan(&self, entries: &[StoredEntry], now: SystemTime) -> Vec<CacheKey> {
        if !self.is_enabled() {
            return Vec::new();
        }

        let mut ordered: Vec<&StoredEntry> = entries.iter().collect();
        ordered.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.key.cmp(&b.key)));

        let mut victims = Vec::new();
        let mut survivors = Vec::with_capacity(ordered.len());
        for entry in ordered {
            if self.is_expired(entry, now) {
                victims.push(entry.key.clone());
            } else {
                survivors.push(entry);
            }
        }

        if let Some(max_bytes) = self.max_bytes {
            let mut remaining: u64 = survivors.iter().map(|entry| entry.size_bytes).sum();
            if remaining > max_bytes {
                let target = (max_bytes as f64 * EVICTION_TARGET_PERCENTAGE) as u64;
                for entry in survivors {
                    if remaining <= target {
                        break;
                    }
                    remaining = remaining.saturating_sub(entry.size_bytes);
                    victims.push(entry.key.clone());
                }
            }
        }

        victims
    }

    fn is_expired(&self, entry: &StoredEntry, now: SystemTime) -> bool {
        match self.max_age {
            Some(max_age) => now
                .duration_since(entry.modified)
                .map(|age| age > max_age)
                .unwrap_or(false),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, size_bytes: u64, modified: SystemTime) -> StoredEntry {
        StoredEntry {
            key: CacheKey::derive(name, "ackaisyo.ttf"),
            size_bytes,
            modified,
        }
    }

    #[test]
    fn default_policy_keeps_everything() {
        let now = SystemTime::now();
        let entries = vec![
            entry("a", 10_000, now - Duration::from_secs(86_400 * 365)),
            entry("b", 10_000, now),
        ];

        assert!(EvictionPolicy::default().plan(&entries, now).is_empty());
    }

    #[test]
    fn age_limit_removes_only_expired_entries() {
        let now = SystemTime::now();
        let old = entry("old", 10, now - Duration::from_secs(7_200));
        let fresh = entry("fresh", 10, now - Duration::from_secs(60));
        let policy = EvictionPolicy {
            max_age: Some(Duration::from_secs(3_600)),
            ..Default::default()
        };

        let victims = policy.plan(&[fresh, old.clone()], now);
        assert_eq!(victims, vec![old.key]);
    }

    #[test]
    fn entries_from_the_future_are_not_expired() {
        let now = SystemTime::now();
        let skewed = entry("skewed", 10, now + Duration::from_secs(600));
        let policy = EvictionPolicy {
            max_age: Some(Duration::from_secs(1)),
            ..Default::default()
        };

        assert!(policy.plan(&[skewed], now).is_empty());
    }

    #[test]
    fn byte_limit_evicts_oldest_until_below_target() {
        let now = SystemTime::now();
        let oldest = entry("oldest", 400, now - Duration::from_secs(300));
        let middle = entry("middle", 400, now - Duration::from_secs(200));
        let newest = entry("newest", 400, now - Duration::from_secs(100));
        let policy = EvictionPolicy {
            max_bytes: Some(1_000),
            ..Default::default()
        };

        // 1200 bytes against a 900 byte target: dropping the oldest leaves 800.
        let victims = policy.plan(&[newest, middle, oldest.clone()], now);
        assert_eq!(victims, vec![oldest.key]);
    }

    #[test]
    fn byte_limit_under_budget_is_a_no_op() {
        let now = SystemTime::now();
        let policy = EvictionPolicy {
            max_bytes: Some(1_000),
            ..Default::default()
        };

        assert!(policy.plan(&[entry("a", 1_000, now)], now).is_empty());
    }

    #[test]
    fn expired_entries_count_towards_the_byte_budget() {
        let now = SystemTime::now();
        let expired = entry("expired", 900, now - Duration::from_secs(7_200));
        let kept = entry("kept", 500, now - Duration::from_secs(10));
        let policy = EvictionPolicy {
            max_bytes: Some(1_000),
            max_age: Some(Duration::from_secs(3_600)),
        };

        let victims = policy.plan(&[kept, expired.clone()], now);
        assert_eq!(victims, vec![expired.key]);
    }
}
