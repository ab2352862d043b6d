//! Core domain types and logic.

pub mod price_bar;
pub mod price_store;
pub mod market_cap;
pub mod fundamentals;
pub mod market_data;
pub mod calendar;
pub mod universe;
pub mod factors;
pub mod standardize;
pub mod signal;
pub mod position;
pub mod cost_model;
pub mod quality;
pub mod delisting;
pub mod execution;
pub mod stats;
pub mod metrics;
pub mod config;
pub mod config_validation;
pub mod backtest;
pub mod error;
