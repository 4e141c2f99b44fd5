// semantic-stream - Streaming generation client with a semantic response cache
// Author: kelexine (https://github.com/kelexine)

pub mod cache;
pub mod cli;
pub mod config;
pub mod controller;
pub mod embedding;
pub mod error;
pub mod metrics;
pub mod persistence;
pub mod protocol;
pub mod telemetry;
pub mod transport;
pub mod utils;
