pub mod array;
pub mod builder;
pub mod calculator;
pub mod catalog;
pub mod combine;
pub mod config;
pub mod curves;
pub mod engine;
pub mod epsilon;
pub mod error;
pub mod events;
pub mod exposure;
pub mod hazard;
pub mod partition;
pub mod producer;
pub mod sparse;
pub mod stats;
pub mod store;
pub mod types;
pub mod vulnerability;
