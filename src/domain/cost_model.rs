//! Liquidity- and volatility-adjusted transaction cost.

/// Trade size above this fraction of daily dollar volume pays market impact.
const IMPACT_THRESHOLD: f64 = 0.01;
const IMPACT_SCALE: f64 = 0.10;
const IMPACT_CAP: f64 = 0.0050;

/// Daily volatility above this level widens the spread.
const VOL_THRESHOLD: f64 = 0.02;
const VOL_SCALE: f64 = 0.50;
const VOL_CAP: f64 = 0.0030;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    pub base_cost: f64,
}

impl CostModel {
    pub fn new(base_cost: f64) -> Self {
        Self { base_cost }
    }

    /// Trade size as a fraction of the bar's dollar volume; 1.0 when the bar
    /// has no volume.
    pub fn pct_of_volume(price: f64, volume: f64, trade_size_usd: f64) -> f64 {
        let dollar_volume = price * volume;
        if dollar_volume > 0.0 {
            trade_size_usd / dollar_volume
        } else {
            1.0
        }
    }

    /// One-way cost as a fraction of price.
    pub fn cost(&self, price: f64, volume: f64, volatility: f64, trade_size_usd: f64) -> f64 {
        let mut cost = self.base_cost;

        let pct = Self::pct_of_volume(price, volume, trade_size_usd);
        if pct > IMPACT_THRESHOLD {
            cost += (pct * IMPACT_SCALE).min(IMPACT_CAP);
        }

        if volatility > VOL_THRESHOLD {
            cost += ((volatility - VOL_THRESHOLD) * VOL_SCALE).min(VOL_CAP);
        }

        cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn liquid_calm_stock_pays_base_cost() {
        let m = CostModel::new(0.002);
        assert_relative_eq!(m.cost(50.0, 1_000_000.0, 0.01, 10_000.0), 0.002);
    }

    #[test]
    fn impact_scales_then_caps() {
        let m = CostModel::new(0.002);
        // 10_000 / (10 * 50_000) = 2% of volume -> 20bps impact
        assert_relative_eq!(m.cost(10.0, 50_000.0, 0.0, 10_000.0), 0.004, epsilon = 1e-15);
        // 100% of volume -> capped at 50bps
        assert_relative_eq!(m.cost(10.0, 1_000.0, 0.0, 10_000.0), 0.007, epsilon = 1e-15);
        // zero volume counts as 100%
        assert_relative_eq!(m.cost(10.0, 0.0, 0.0, 10_000.0), 0.007, epsilon = 1e-15);
    }

    #[test]
    fn volatility_term_scales_then_caps() {
        let m = CostModel::new(0.0);
        assert_relative_eq!(m.cost(50.0, 1e9, 0.025, 10_000.0), 0.0025, epsilon = 1e-15);
        assert_relative_eq!(m.cost(50.0, 1e9, 0.10, 10_000.0), 0.003, epsilon = 1e-15);
        assert_relative_eq!(m.cost(50.0, 1e9, 0.02, 10_000.0), 0.0);
    }
}
