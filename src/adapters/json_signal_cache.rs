//! On-disk signal cache, one JSON file per rebalance date.
//!
//! Layout: `{dir}/{config_hash}/{YYYYMMDD}_{weights_hash}.json`. Writes go to
//! a `.tmp` sibling and are renamed into place.

use crate::domain::error::FactorbenchError;
use crate::domain::signal::Signal;
use crate::ports::signal_cache_port::{CacheKey, SignalCachePort};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// JSON has no NaN or infinity, so those are stored as `"nan"`, `"inf"`, `"-inf"`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum CachedValue {
    Finite(f64),
    NonFinite(String),
}

impl CachedValue {
    fn encode(value: f64) -> Self {
        if value.is_finite() {
            CachedValue::Finite(value)
        } else if value.is_nan() {
            CachedValue::NonFinite("nan".to_string())
        } else if value > 0.0 {
            CachedValue::NonFinite("inf".to_string())
        } else {
            CachedValue::NonFinite("-inf".to_string())
        }
    }

    fn decode(self) -> Result<f64, FactorbenchError> {
        match self {
            CachedValue::Finite(v) => Ok(v),
            CachedValue::NonFinite(s) => match s.as_str() {
                "nan" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(cache_error(format!("unknown signal value '{other}'"))),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedSignal {
    symbol: String,
    date: NaiveDate,
    value: CachedValue,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    config_hash: String,
    weights_hash: String,
    date: NaiveDate,
    signals: Vec<CachedSignal>,
}

fn cache_error(reason: impl Into<String>) -> FactorbenchError {
    FactorbenchError::Cache {
        reason: reason.into(),
    }
}

pub struct JsonSignalCache {
    dir: PathBuf,
}

impl JsonSignalCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(&key.config_hash).join(format!(
            "{}_{}.json",
            key.date.format("%Y%m%d"),
            key.weights_hash
        ))
    }
}

impl SignalCachePort for JsonSignalCache {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<Signal>>, FactorbenchError> {
        let path = self.entry_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(cache_error(format!("read {}: {e}", path.display()))),
        };

        let entry: CacheEntry = serde_json::from_str(&content)
            .map_err(|e| cache_error(format!("decode {}: {e}", path.display())))?;
        if entry.date != key.date || entry.weights_hash != key.weights_hash {
            return Err(cache_error(format!("key mismatch in {}", path.display())));
        }

        let signals = entry
            .signals
            .into_iter()
            .map(|s| {
                Ok(Signal {
                    symbol: s.symbol,
                    date: s.date,
                    value: s.value.decode()?,
                })
            })
            .collect::<Result<Vec<_>, FactorbenchError>>()?;
        Ok(Some(signals))
    }

    fn put(&mut self, key: &CacheKey, signals: &[Signal]) -> Result<(), FactorbenchError> {
        let path = self.entry_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| cache_error(format!("create {}: {e}", parent.display())))?;
        }

        let entry = CacheEntry {
            config_hash: key.config_hash.clone(),
            weights_hash: key.weights_hash.clone(),
            date: key.date,
            signals: signals
                .iter()
                .map(|s| CachedSignal {
                    symbol: s.symbol.clone(),
                    date: s.date,
                    value: CachedValue::encode(s.value),
                })
                .collect(),
        };
        let json = serde_json::to_vec(&entry).map_err(|e| cache_error(format!("encode: {e}")))?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json)
            .map_err(|e| cache_error(format!("write {}: {e}", tmp_path.display())))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            cache_error(format!("rename into {}: {e}", path.display()))
        })
    }
}
