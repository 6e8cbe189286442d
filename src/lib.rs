pub mod analytics;
pub mod api;
pub mod cache;
pub mod config;
pub mod storage;
pub mod tracker;

pub use tracker::{PeriodStats, Tracker};
