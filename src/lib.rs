pub mod backtester;
pub mod broker;
pub mod commands;
pub mod config;
pub mod data;
pub mod error;
pub mod indicators;
pub mod ledger;
pub mod live;
pub mod models;
pub mod optimizer;
pub mod performance;
pub mod report;
pub(crate) mod retry;
pub mod risk;
pub mod strategy;
pub mod venue;
