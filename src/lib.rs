//! Client library for the drand randomness beacon network.
//!
//! The crate assembles a small set of composable wrappers around a
//! [`Client`](client::Client) — racing across endpoints, caching, polling,
//! failover, fan-out, and verification — in the fixed order described by
//! [`builder`]. Consumers normally only touch [`builder::ClientConfigBuilder`]
//! and the [`client::Client`] trait it returns.

pub mod aggregator;
pub mod builder;
pub mod cache;
pub mod caching;
pub mod client;
pub mod error;
pub mod failover;
pub mod model;
pub mod optimizing;
pub mod polling;
pub mod time;
pub mod verify;
pub mod verifying;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use builder::{ClientConfig, ClientConfigBuilder};
pub use client::{BeaconStream, Client};
pub use error::ClientError;
pub use model::{Beacon, ChainInfo, Round};
