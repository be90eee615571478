//! End-to-end tests against a mock key-discovery endpoint.

mod common;
mod key_rotation;
mod sign_in;
