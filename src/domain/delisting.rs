//! Terminal-return estimate for positions whose exit price is unavailable.

use crate::domain::position::Side;

const MERGER_KEYWORDS: [&str; 5] = ["merger", "acquisition", "acquired", "buyout", "takeover"];
const BANKRUPTCY_KEYWORDS: [&str; 3] = ["bankruptcy", "chapter", "liquidation"];

/// Realized returns are clipped to this range.
pub const MIN_RETURN: f64 = -0.95;
pub const MAX_RETURN: f64 = 1.0;

pub fn clip_return(r: f64) -> f64 {
    r.clamp(MIN_RETURN, MAX_RETURN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelistingClass {
    Merger,
    Bankruptcy,
    Unknown,
}

impl DelistingClass {
    /// A recorded reason is matched by keyword; otherwise the move from entry
    /// to the last traded price decides.
    pub fn classify(entry_price: f64, last_price: f64, reason: Option<&str>) -> Self {
        let (merger, bankruptcy) = match reason.filter(|r| !r.trim().is_empty()) {
            Some(reason) => {
                let reason = reason.to_lowercase();
                (
                    MERGER_KEYWORDS.iter().any(|k| reason.contains(k)),
                    BANKRUPTCY_KEYWORDS.iter().any(|k| reason.contains(k)),
                )
            }
            None => {
                let change = (last_price - entry_price) / entry_price;
                (change >= -0.2, change <= -0.5)
            }
        };
        if merger {
            DelistingClass::Merger
        } else if bankruptcy {
            DelistingClass::Bankruptcy
        } else {
            DelistingClass::Unknown
        }
    }
}

/// Clipped return of a position closed by delisting.
pub fn estimate_return(entry_price: f64, last_price: f64, side: Side, reason: Option<&str>) -> f64 {
    let class = DelistingClass::classify(entry_price, last_price, reason);
    let r = match side {
        Side::Short => {
            let exit = match class {
                DelistingClass::Merger => last_price * 1.10,
                DelistingClass::Bankruptcy => entry_price * 0.10,
                DelistingClass::Unknown => entry_price * 0.50,
            };
            (entry_price - exit) / entry_price
        }
        Side::Long | Side::Flat => {
            let exit = match class {
                DelistingClass::Merger => last_price * 0.90,
                DelistingClass::Bankruptcy => entry_price * 0.20,
                DelistingClass::Unknown => entry_price * 0.50,
            };
            (exit - entry_price) / entry_price
        }
    };
    clip_return(r)
}
