// src/lib.rs
// Public library surface for the daemon binary and the integration tests.

pub mod models;

// trend intake
pub mod monitor;
pub mod safety;
pub mod aggregator;

// quote retrieval and judgement
pub mod embedding;
pub mod index;
pub mod retrieval;
pub mod completion;
pub mod selector;
pub mod matching;

// output
pub mod formatter;
pub mod publish;

// process
pub mod config;
pub mod store;
pub mod health;
pub mod scheduler;
pub mod app;
pub mod api;
pub mod metrics;

pub use crate::app::App;
pub use crate::config::Config;
pub use crate::scheduler::{PostCycleOutcome, Scheduler};
