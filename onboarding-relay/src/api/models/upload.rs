use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body returned by the liveness variant of the upload endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct LivenessResponse {
    pub ok: bool,
    pub message: String,
    /// Upper-cased HTTP method of the request being answered
    pub method: String,
}

impl LivenessResponse {
    pub fn for_method(method: &str) -> Self {
        Self {
            ok: true,
            message: "upload endpoint is alive".to_string(),
            method: method.to_uppercase(),
        }
    }
}
