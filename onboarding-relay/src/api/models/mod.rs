//! API response data models.

pub mod upload;
