//! Client for the validator endpoint admin log API

#![forbid(unsafe_code)]

pub mod client;
pub mod context;

pub use client::{COUNT_PATH, LOGS_PATH, LogClient};
pub use context::RequestContext;
