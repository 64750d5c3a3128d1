//! Quotaguard - Request Admission Guard
//!
//! This crate decides whether an incoming HTTP request is admitted, based on
//! how many matching requests the same client address has made recently.
//! Rules match requests by HTTP method and by endpoint identifier or URL
//! path pattern; each rule carries per-second, per-minute and per-hour
//! quotas evaluated as fixed windows against a counter store.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod reload;
