//! Run output port trait.

use crate::domain::backtest::{BacktestRun, OutOfSampleRun};
use crate::domain::error::FactorbenchError;

/// Port for writing run output tables and the analysis summary.
pub trait OutputPort {
    fn write_run(&self, run: &BacktestRun) -> Result<(), FactorbenchError>;

    /// Default implementation: writes both legs and nothing else.
    fn write_out_of_sample(&self, run: &OutOfSampleRun) -> Result<(), FactorbenchError> {
        self.write_run(&run.train)?;
        self.write_run(&run.test)
    }
}
