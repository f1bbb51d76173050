// ASI-Chain Indexer Library
// Exposes internal modules for benchmarking and testing

#[macro_use]
extern crate log;

pub mod config;
pub mod extractor;
pub mod monitoring;
pub mod node;
pub mod processor;
pub mod reorg;
pub mod resilience;
pub mod store;
pub mod sync;
