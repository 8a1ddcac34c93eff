//! Windowguard - Per-client admission control for HTTP services
//!
//! This crate bounds how often a single client may call protected endpoints.
//! A fixed-window counter store tracks requests per client identity, and a
//! tower middleware consults it on every request, either forwarding the
//! request downstream or answering `429 Too Many Requests` with rate-limit
//! headers attached.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
