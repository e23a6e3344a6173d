//! HTTP control surface implementation.

pub mod http;
pub mod types;
