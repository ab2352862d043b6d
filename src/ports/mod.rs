//! Port traits at the storage, configuration, cache and output seams.

pub mod config_port;
pub mod data_port;
pub mod output_port;
pub mod signal_cache_port;
