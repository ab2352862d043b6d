//! Price-window sanity checks applied before a fill is accepted.

use crate::domain::price_bar::PriceBar;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityIssue {
    Empty,
    NonPositivePrice,
    /// More than half of the bars traded no volume.
    ZeroVolume,
    /// A close-to-close move above 100%.
    ExtremeJump,
    /// Open/close ratio outside [0.5, 2.0].
    OpenCloseRatio,
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityIssue::Empty => "empty window",
            QualityIssue::NonPositivePrice => "zero or negative price",
            QualityIssue::ZeroVolume => "more than 50% zero-volume bars",
            QualityIssue::ExtremeJump => "single-day move above 100%",
            QualityIssue::OpenCloseRatio => "open/close ratio outside [0.5, 2.0]",
        };
        f.write_str(s)
    }
}

/// Checks run in order; the first failure is reported. NaN fields never fail
/// a comparison.
pub fn validate_window(bars: &[PriceBar]) -> Result<(), QualityIssue> {
    if bars.is_empty() {
        return Err(QualityIssue::Empty);
    }

    if bars.iter().any(|b| b.close <= 0.0 || b.open <= 0.0) {
        return Err(QualityIssue::NonPositivePrice);
    }

    let zero_volume = bars.iter().filter(|b| b.volume == 0.0).count();
    if zero_volume as f64 > bars.len() as f64 * 0.5 {
        return Err(QualityIssue::ZeroVolume);
    }

    let jump = bars
        .windows(2)
        .any(|w| ((w[1].close - w[0].close) / w[0].close).abs() > 1.0);
    if jump {
        return Err(QualityIssue::ExtremeJump);
    }

    let bad_ratio = bars.iter().any(|b| {
        let ratio = b.open / b.close;
        ratio > 2.0 || ratio < 0.5
    });
    if bad_ratio {
        return Err(QualityIssue::OpenCloseRatio);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn bars(rows: &[(f64, f64, f64)]) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();
        rows.iter()
            .enumerate()
            .map(|(i, (open, close, volume))| PriceBar {
                symbol: "AAA".into(),
                date: start + Duration::days(i as i64),
                open: *open,
                high: open.max(*close),
                low: open.min(*close),
                close: *close,
                volume: *volume,
            })
            .collect()
    }

    #[test]
    fn clean_window_passes() {
        let w = bars(&[(10.0, 10.5, 100.0), (10.5, 10.2, 0.0), (10.2, 10.4, 300.0)]);
        assert_eq!(validate_window(&w), Ok(()));
    }

    #[test]
    fn each_rule_rejects() {
        assert_eq!(validate_window(&[]), Err(QualityIssue::Empty));
        assert_eq!(
            validate_window(&bars(&[(10.0, 0.0, 100.0)])),
            Err(QualityIssue::NonPositivePrice)
        );
        assert_eq!(
            validate_window(&bars(&[(10.0, 10.0, 0.0), (10.0, 10.0, 0.0), (10.0, 10.0, 5.0)])),
            Err(QualityIssue::ZeroVolume)
        );
        assert_eq!(
            validate_window(&bars(&[(10.0, 10.0, 1.0), (21.0, 21.0, 1.0)])),
            Err(QualityIssue::ExtremeJump)
        );
        assert_eq!(
            validate_window(&bars(&[(10.0, 10.0, 1.0), (4.0, 10.0, 1.0)])),
            Err(QualityIssue::OpenCloseRatio)
        );
    }

    #[test]
    fn exactly_half_zero_volume_passes() {
        let w = bars(&[(10.0, 10.0, 0.0), (10.0, 10.0, 7.0)]);
        assert_eq!(validate_window(&w), Ok(()));
    }
}
