//! Common types for the TinyAI weight loader
//!
//! This crate holds the pieces shared by the format parser, the mapped
//! model store and the progressive loader: the error enum and the
//! configuration structs for both caching layers.

pub mod config;
pub mod error;

pub use config::*;
pub use error::*;
