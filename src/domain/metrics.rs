//! Information coefficient and return statistics.

use crate::domain::execution::ReturnRecord;
use crate::domain::signal::Signal;
use crate::domain::stats;
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Dates (and periods) with fewer joined rows carry no cross-sectional IC.
pub const MIN_ROWS_PER_DATE: usize = 5;

/// One signal joined with one return on `(symbol, date)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoinedRow {
    pub date: NaiveDate,
    pub signal: f64,
    pub ret: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IcStats {
    /// Mean of the per-date correlations.
    pub ic: Option<f64>,
    /// Single correlation pooled over every joined row.
    pub ic_overall: Option<f64>,
    pub t_stat: Option<f64>,
    pub p_value: Option<f64>,
    /// Dates contributing a per-date correlation.
    pub n: usize,
    pub n_merged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Yearly,
    Monthly,
}

impl Period {
    fn label(self, date: NaiveDate) -> String {
        match self {
            Period::Yearly => format!("{}", date.year()),
            Period::Monthly => format!("{}-{:02}", date.year(), date.month()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodIc {
    pub period: String,
    pub ic: f64,
    pub t_stat: Option<f64>,
    pub n: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnStats {
    pub count: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub std: Option<f64>,
    /// Annualized with √252.
    pub sharpe: Option<f64>,
    pub win_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub ic: IcStats,
    pub ic_yearly: Vec<PeriodIc>,
    pub ic_monthly: Vec<PeriodIc>,
    pub returns: ReturnStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutOfSampleComparison {
    pub train_ic: Option<f64>,
    pub train_t_stat: Option<f64>,
    pub train_n: usize,
    pub test_ic: Option<f64>,
    pub test_t_stat: Option<f64>,
    pub test_n: usize,
    pub ic_degradation_pct: Option<f64>,
}

/// Inner join of signals and returns on `(symbol, date == signal_date)`.
/// Rows where either side is not finite are dropped.
pub fn join(signals: &[Signal], returns: &[ReturnRecord]) -> Vec<JoinedRow> {
    let mut by_key: HashMap<(&str, NaiveDate), Vec<f64>> = HashMap::new();
    for r in returns {
        by_key
            .entry((r.symbol.as_str(), r.signal_date))
            .or_default()
            .push(r.ret);
    }

    let mut rows = Vec::new();
    for s in signals.iter().filter(|s| s.value.is_finite()) {
        let Some(rets) = by_key.get(&(s.symbol.as_str(), s.date)) else {
            continue;
        };
        rows.extend(rets.iter().filter(|r| r.is_finite()).map(|r| JoinedRow {
            date: s.date,
            signal: s.value,
            ret: *r,
        }));
    }
    rows
}

fn correlation(rows: &[JoinedRow]) -> Option<f64> {
    let (x, y): (Vec<f64>, Vec<f64>) = rows.iter().map(|r| (r.signal, r.ret)).unzip();
    stats::pearson(&x, &y)
}

/// Cross-sectional correlation for each date with enough rows.
pub fn ic_by_date(rows: &[JoinedRow]) -> Vec<(NaiveDate, f64)> {
    let mut groups: BTreeMap<NaiveDate, Vec<JoinedRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.date).or_default().push(*row);
    }
    groups
        .into_iter()
        .filter(|(_, g)| g.len() >= MIN_ROWS_PER_DATE)
        .filter_map(|(date, g)| correlation(&g).map(|ic| (date, ic)))
        .collect()
}

pub fn ic(signals: &[Signal], returns: &[ReturnRecord]) -> IcStats {
    let rows = join(signals, returns);
    let per_date: Vec<f64> = ic_by_date(&rows).into_iter().map(|(_, ic)| ic).collect();
    let n = per_date.len();

    let mean = stats::mean(&per_date);
    let t_stat = match (mean, stats::std_dev(&per_date, 1)) {
        (Some(m), Some(s)) if s > 0.0 => Some(m / (s / (n as f64).sqrt())),
        _ => None,
    };

    IcStats {
        ic: mean,
        ic_overall: correlation(&rows),
        t_stat,
        p_value: t_stat.map(|t| stats::two_sided_p_value(t, (n - 1) as f64)),
        n,
        n_merged: rows.len(),
    }
}

/// Pooled IC per calendar period, with `t = ic·√(n−2) / √(1−ic²)`.
pub fn ic_by_period(signals: &[Signal], returns: &[ReturnRecord], period: Period) -> Vec<PeriodIc> {
    let mut groups: BTreeMap<String, Vec<JoinedRow>> = BTreeMap::new();
    for row in join(signals, returns) {
        groups.entry(period.label(row.date)).or_default().push(row);
    }

    groups
        .into_iter()
        .filter(|(_, g)| g.len() >= MIN_ROWS_PER_DATE)
        .filter_map(|(label, g)| {
            let ic = correlation(&g)?;
            let n = g.len();
            let t_stat = (ic.abs() < 1.0)
                .then(|| ic * ((n - 2) as f64).sqrt() / (1.0 - ic * ic).sqrt());
            Some(PeriodIc {
                period: label,
                ic,
                t_stat,
                n,
            })
        })
        .collect()
}

pub fn return_stats(returns: &[ReturnRecord]) -> ReturnStats {
    let values: Vec<f64> = returns.iter().map(|r| r.ret).filter(|r| r.is_finite()).collect();
    let mean = stats::mean(&values);
    let std = stats::std_dev(&values, 1);
    let sharpe = match (mean, std) {
        (Some(m), Some(s)) if s > 0.0 => Some(m / s * TRADING_DAYS_PER_YEAR.sqrt()),
        _ => None,
    };
    let win_rate = (!values.is_empty())
        .then(|| values.iter().filter(|r| **r > 0.0).count() as f64 / values.len() as f64);

    ReturnStats {
        count: values.len(),
        mean,
        median: stats::median(&values),
        std,
        sharpe,
        win_rate,
    }
}

pub fn analyze(signals: &[Signal], returns: &[ReturnRecord]) -> Analysis {
    Analysis {
        ic: ic(signals, returns),
        ic_yearly: ic_by_period(signals, returns, Period::Yearly),
        ic_monthly: ic_by_period(signals, returns, Period::Monthly),
        returns: return_stats(returns),
    }
}

/// Train versus test IC; degradation is undefined when either IC is missing or zero.
pub fn out_of_sample(train: &IcStats, test: &IcStats) -> OutOfSampleComparison {
    let ic_degradation_pct = match (train.ic, test.ic) {
        (Some(tr), Some(te)) if tr != 0.0 && te != 0.0 => Some((te / tr - 1.0) * 100.0),
        _ => None,
    };
    OutOfSampleComparison {
        train_ic: train.ic,
        train_t_stat: train.t_stat,
        train_n: train.n,
        test_ic: test.ic,
        test_t_stat: test.t_stat,
        test_n: test.n,
        ic_degradation_pct,
    }
}
