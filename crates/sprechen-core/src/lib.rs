//! Core types, config, errors, and the realtime protocol for Sprechen.

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;
