//! Application services: counting, identity and ranking over the store port.

pub mod aggregator;
pub mod error;
pub mod identity;
pub mod ranking;
pub mod recorder;
pub mod store;
pub mod views;
