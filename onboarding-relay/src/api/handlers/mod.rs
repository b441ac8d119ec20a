//! HTTP request handlers.
//!
//! - [`upload`]: the onboarding upload endpoint, its CORS preflight and the liveness variant
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`] which converts to a status code and a plain-text
//! body meant to be shown to the person filling in the form.

pub mod upload;
