//! Cross-sectional standardization of a combined signal.
//!
//! Order of operations: percentile winsor, then either a rank transform or a
//! z-score (rank wins when both are enabled). Z-scoring may first residualize
//! the values against exposure columns and industry dummies, and is followed
//! by an optional symmetric z-bound.

use crate::domain::stats;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMethod {
    Average,
    Min,
    Max,
    First,
    Dense,
}

impl RankMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "average" => Some(RankMethod::Average),
            "min" => Some(RankMethod::Min),
            "max" => Some(RankMethod::Max),
            "first" => Some(RankMethod::First),
            "dense" => Some(RankMethod::Dense),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandardizeConfig {
    pub zscore: bool,
    pub rank: bool,
    pub rank_method: RankMethod,
    /// Divide ranks by the number of ranked values.
    pub rank_pct: bool,
    /// Symmetric bound applied after z-scoring.
    pub winsor_z: Option<f64>,
    /// Quantile bounds applied before ranking or z-scoring.
    pub winsor_pct: Option<(f64, f64)>,
    pub industry_neutral: bool,
    pub industry_min_group: usize,
    /// Factor names used as exposure columns for residualization.
    pub neutralize_cols: Vec<String>,
}

impl Default for StandardizeConfig {
    fn default() -> Self {
        StandardizeConfig {
            zscore: false,
            rank: true,
            rank_method: RankMethod::Average,
            rank_pct: true,
            winsor_z: None,
            winsor_pct: Some((0.01, 0.99)),
            industry_neutral: false,
            industry_min_group: 5,
            neutralize_cols: Vec::new(),
        }
    }
}

impl StandardizeConfig {
    pub fn is_active(&self) -> bool {
        self.rank || self.zscore
    }
}

/// Per-row context for neutralization, aligned with the values slice.
#[derive(Debug, Clone, Default)]
pub struct Exposures<'a> {
    pub industries: Vec<Option<&'a str>>,
    /// One column per entry of `neutralize_cols`; NaN where missing.
    pub columns: Vec<Vec<f64>>,
}

/// Pandas-style rank: NaN stays NaN, ties broken by `method`.
pub fn rank(values: &[f64], method: RankMethod, pct: bool) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).filter(|&i| !values[i].is_nan()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]).then(a.cmp(&b)));

    let n = order.len();
    let mut out = vec![f64::NAN; values.len()];
    let mut dense = 0usize;
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        dense += 1;
        for (k, &pos) in order[i..=j].iter().enumerate() {
            out[pos] = match method {
                RankMethod::Average => (i + j) as f64 / 2.0 + 1.0,
                RankMethod::Min => (i + 1) as f64,
                RankMethod::Max => (j + 1) as f64,
                RankMethod::First => (i + k + 1) as f64,
                RankMethod::Dense => dense as f64,
            };
        }
        i = j + 1;
    }

    if pct && n > 0 {
        let denom = match method {
            RankMethod::Dense => dense,
            _ => n,
        } as f64;
        for v in out.iter_mut().filter(|v| !v.is_nan()) {
            *v /= denom;
        }
    }
    out
}

/// Population z-score over the non-NaN values. A zero spread yields all NaN.
pub fn zscore(values: &[f64]) -> Vec<f64> {
    let present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    match (stats::mean(&present), stats::std_dev(&present, 0)) {
        (Some(m), Some(s)) if s.is_finite() && s > 0.0 => {
            values.iter().map(|v| (v - m) / s).collect()
        }
        _ => vec![f64::NAN; values.len()],
    }
}

/// Like [`zscore`], but a zero spread maps to zeros.
fn zscore_or_zero(values: &[f64]) -> Vec<f64> {
    let present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    match (stats::mean(&present), stats::std_dev(&present, 0)) {
        (Some(m), Some(s)) if s.is_finite() && s > 0.0 => {
            values.iter().map(|v| (v - m) / s).collect()
        }
        _ => values.iter().map(|v| v * 0.0).collect(),
    }
}

/// Clip to the `low`/`high` quantiles. Ignored unless `0 < low < high < 1`.
pub fn winsorize_pct(values: &[f64], low: f64, high: f64) -> Vec<f64> {
    if !(low > 0.0 && high < 1.0 && low < high) {
        return values.to_vec();
    }
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let (Some(lo), Some(hi)) = (stats::quantile(&finite, low), stats::quantile(&finite, high))
    else {
        return values.to_vec();
    };
    if !(lo <= hi) {
        return values.to_vec();
    }
    values
        .iter()
        .map(|v| if v.is_nan() { *v } else { v.clamp(lo, hi) })
        .collect()
}

/// Clip to `[-bound, bound]`.
pub fn clip_z(values: &[f64], bound: f64) -> Vec<f64> {
    if !(bound.is_finite() && bound > 0.0) {
        return values.to_vec();
    }
    values
        .iter()
        .map(|v| if v.is_nan() { *v } else { v.clamp(-bound, bound) })
        .collect()
}

/// Z-score within each industry of at least `min_group` rows; everything
/// else takes its global z-score.
pub fn industry_zscore(values: &[f64], industries: &[Option<&str>], min_group: usize) -> Vec<f64> {
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, ind) in industries.iter().enumerate() {
        if let Some(ind) = ind {
            groups.entry(ind).or_default().push(i);
        }
    }

    let mut out = vec![f64::NAN; values.len()];
    for rows in groups.values().filter(|rows| rows.len() >= min_group) {
        let group: Vec<f64> = rows.iter().map(|&i| values[i]).collect();
        let z = zscore(&group);
        for (&i, v) in rows.iter().zip(z) {
            out[i] = v;
        }
    }

    if out.iter().any(|v| v.is_nan()) {
        let global = zscore(values);
        for (o, g) in out.iter_mut().zip(global) {
            if o.is_nan() {
                *o = g;
            }
        }
    }
    out
}

/// OLS residuals of `values` on an intercept, z-scored exposure columns and
/// (when `industries` is given) industry dummies for groups of at least
/// `min_group` rows, first group dropped.
///
/// Rows missing a value or an exposure come back NaN. When the regression
/// sample is smaller than `max(20, k + 5)` or the system is singular, the
/// input is returned unchanged.
pub fn residualize(
    values: &[f64],
    columns: &[Vec<f64>],
    industries: Option<&[Option<&str>]>,
    min_group: usize,
) -> Vec<f64> {
    let n = values.len();
    let mut design: Vec<Vec<f64>> = columns.iter().map(|c| zscore_or_zero(c)).collect();

    if let Some(industries) = industries {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for ind in industries.iter().flatten() {
            *counts.entry(ind).or_default() += 1;
        }
        let kept: BTreeSet<&str> = counts
            .into_iter()
            .filter(|(_, c)| *c >= min_group)
            .map(|(k, _)| k)
            .collect();
        for group in kept.iter().skip(1) {
            design.push(
                industries
                    .iter()
                    .map(|ind| if *ind == Some(*group) { 1.0 } else { 0.0 })
                    .collect(),
            );
        }
    }

    if design.is_empty() {
        return values.to_vec();
    }

    let sample: Vec<usize> = (0..n)
        .filter(|&i| !values[i].is_nan() && design.iter().all(|c| !c[i].is_nan()))
        .collect();
    let k = design.len() + 1;
    if sample.len() < 20.max(design.len() + 5) {
        return values.to_vec();
    }

    let row = |i: usize| -> Vec<f64> {
        std::iter::once(1.0)
            .chain(design.iter().map(|c| c[i]))
            .collect()
    };

    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    for &i in &sample {
        let x = row(i);
        for a in 0..k {
            xty[a] += x[a] * values[i];
            for b in 0..k {
                xtx[a][b] += x[a] * x[b];
            }
        }
    }

    let Some(beta) = solve(xtx, xty) else {
        return values.to_vec();
    };

    let mut out = vec![f64::NAN; n];
    for &i in &sample {
        let fitted: f64 = row(i).iter().zip(&beta).map(|(x, b)| x * b).sum();
        out[i] = values[i] - fitted;
    }
    out
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let k = b.len();
    for col in 0..k {
        let pivot = (col..k).max_by(|&x, &y| a[x][col].abs().total_cmp(&a[y][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for r in col + 1..k {
            let f = a[r][col] / a[col][col];
            if f == 0.0 {
                continue;
            }
            for c in col..k {
                a[r][c] -= f * a[col][c];
            }
            b[r] -= f * b[col];
        }
    }
    let mut x = vec![0.0; k];
    for r in (0..k).rev() {
        let tail: f64 = (r + 1..k).map(|c| a[r][c] * x[c]).sum();
        x[r] = (b[r] - tail) / a[r][r];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

pub fn standardize(values: &[f64], exposures: &Exposures<'_>, config: &StandardizeConfig) -> Vec<f64> {
    let mut v = values.to_vec();
    if let Some((low, high)) = config.winsor_pct {
        v = winsorize_pct(&v, low, high);
    }

    if config.rank {
        return rank(&v, config.rank_method, config.rank_pct);
    }
    if !config.zscore {
        return v;
    }

    let industries =
        (config.industry_neutral && exposures.industries.iter().any(Option::is_some))
            .then_some(exposures.industries.as_slice());

    if !exposures.columns.is_empty() {
        v = residualize(&v, &exposures.columns, industries, config.industry_min_group);
    } else if let Some(industries) = industries {
        v = industry_zscore(&v, industries, config.industry_min_group);
    }
    v = zscore(&v);

    match config.winsor_z {
        Some(bound) => clip_z(&v, bound),
        None => v,
    }
}
