//! Plain data types shared across the crate.

pub mod config;
pub mod params;
