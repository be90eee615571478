//! HTTP helpers for key-discovery retrieval.

pub mod client;
pub mod retry;
