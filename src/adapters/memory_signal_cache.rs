//! In-process signal cache.

use crate::domain::error::FactorbenchError;
use crate::domain::signal::Signal;
use crate::ports::signal_cache_port::{CacheKey, SignalCachePort};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MemorySignalCache {
    entries: HashMap<CacheKey, Vec<Signal>>,
}

impl MemorySignalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SignalCachePort for MemorySignalCache {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<Signal>>, FactorbenchError> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &CacheKey, signals: &[Signal]) -> Result<(), FactorbenchError> {
        self.entries.insert(key.clone(), signals.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn put_then_get_by_exact_key() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let key = CacheKey {
            config_hash: "a".into(),
            weights_hash: "b".into(),
            date,
        };
        let mut cache = MemorySignalCache::new();
        assert!(cache.is_empty());

        let signals = vec![Signal {
            symbol: "AAA".into(),
            date,
            value: 0.5,
        }];
        cache.put(&key, &signals).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key).unwrap(), Some(signals));

        let other_day = CacheKey {
            date: date.succ_opt().unwrap(),
            ..key
        };
        assert_eq!(cache.get(&other_day).unwrap(), None);
    }
}
