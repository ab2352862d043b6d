//! Long/short bucket assignment from a signal cross-section.

use crate::domain::signal::Signal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
    Flat,
}

impl Side {
    /// +1, -1 or 0.
    pub fn as_i8(self) -> i8 {
        match self {
            Side::Long => 1,
            Side::Short => -1,
            Side::Flat => 0,
        }
    }

    pub fn is_active(self) -> bool {
        self != Side::Flat
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub date: NaiveDate,
    pub side: Side,
}

/// Bucket sizes for a cross-section of `n` signals.
///
/// `n_long` is forced up to 1 when `long_pct > 0` and `n > 0`.
pub fn bucket_sizes(n: usize, long_pct: f64, short_pct: f64) -> (usize, usize) {
    let floor = |pct: f64| {
        if pct > 0.0 {
            (n as f64 * pct).floor() as usize
        } else {
            0
        }
    };
    let mut n_long = floor(long_pct);
    let n_short = floor(short_pct).min(n);
    if n_long == 0 && long_pct > 0.0 && n > 0 {
        n_long = 1;
    }
    (n_long.min(n), n_short)
}

/// Positions for one cross-section, in descending signal order.
///
/// The top `n_long` rows go long and the bottom `n_short` rows go short. The
/// short slice is indexed from the tail independently of the long slice, so
/// when the buckets overlap the short assignment wins.
pub fn build_positions(signals: &[Signal], long_pct: f64, short_pct: f64) -> Vec<Position> {
    let mut ranked: Vec<&Signal> = signals.iter().filter(|s| !s.value.is_nan()).collect();
    // Stable sort keeps input order among equal signals.
    ranked.sort_by(|a, b| b.value.total_cmp(&a.value));

    let n = ranked.len();
    let (n_long, n_short) = bucket_sizes(n, long_pct, short_pct);

    ranked
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            let side = if n_short > 0 && i >= n - n_short {
                Side::Short
            } else if i < n_long {
                Side::Long
            } else {
                Side::Flat
            };
            Position {
                symbol: s.symbol.clone(),
                date: s.date,
                side,
            }
        })
        .collect()
}
