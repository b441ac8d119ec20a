//! Multipart parsing of an onboarding submission.
//!
//! The form posts plain text fields (client name, contact details, registration number...) and
//! any number of photo parts. Text fields are collected by name, file parts are buffered in
//! memory one at a time and appended to the attachment list when the part ends.
//!
//! A file part with no bytes is an optional photo input the client left empty and is dropped.
//! The summed size of all attachments is checked after every chunk so an oversized upload is
//! rejected before the rest of the stream is read.

use axum::http::{HeaderMap, header};
use indexmap::IndexMap;
use multer::{Constraints, Multipart, SizeLimit};

use crate::errors::{Error, Result};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A file part of the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Name of the form input the file was posted under
    pub field: String,
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Everything a single request carried. Dropped once the response is sent.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Text fields in arrival order; a repeated name keeps its first position and last value
    pub fields: IndexMap<String, String>,
    /// Non-empty files in the order they arrived
    pub files: Vec<Attachment>,
}

/// Size ceilings applied while reading the stream.
#[derive(Debug, Clone, Copy)]
pub struct ParseLimits {
    pub max_attachment_bytes: u64,
    pub max_body_size: u64,
}

impl Submission {
    /// Returns a trimmed, non-empty text field.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    pub fn total_attachment_bytes(&self) -> u64 {
        self.files.iter().map(Attachment::size).sum()
    }

    /// Builds a multer reader for an axum request body, taking the boundary from `Content-Type`.
    pub fn reader(headers: &HeaderMap, body: axum::body::Body, limits: ParseLimits) -> Result<Multipart<'static>> {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .ok_or(Error::Multipart(multer::Error::NoMultipart))?;
        let boundary = multer::parse_boundary(content_type)?;

        let constraints = Constraints::new().size_limit(SizeLimit::new().whole_stream(limits.max_body_size));
        Ok(Multipart::with_constraints(body.into_data_stream(), boundary, constraints))
    }

    /// Reads every part of the form.
    pub async fn read(mut multipart: Multipart<'_>, limits: ParseLimits) -> Result<Self> {
        let mut submission = Submission::default();
        let mut total_size = 0u64;
        let mut dropped_empty = 0usize;

        while let Some(mut field) = multipart.next_field().await? {
            let name = field.name().unwrap_or("").to_string();

            let Some(filename) = field.file_name().map(str::to_string) else {
                let value = field.text().await?;
                submission.fields.insert(name, value);
                continue;
            };

            let filename = if filename.is_empty() { format!("{name}.bin") } else { filename };
            let content_type = field
                .content_type()
                .map(|mime| mime.to_string())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

            let mut content = Vec::new();
            while let Some(chunk) = field.chunk().await? {
                total_size += chunk.len() as u64;

                if total_size > limits.max_attachment_bytes {
                    tracing::warn!(
                        field = %name,
                        total_size = total_size,
                        max_attachment_bytes = limits.max_attachment_bytes,
                        "Attachment size limit exceeded, aborting upload"
                    );
                    return Err(Error::PayloadTooLarge {
                        limit: limits.max_attachment_bytes,
                    });
                }

                content.extend_from_slice(&chunk);
            }

            if content.is_empty() {
                dropped_empty += 1;
                tracing::debug!(field = %name, "Dropping empty file part");
                continue;
            }

            tracing::debug!(field = %name, filename = %filename, size = content.len(), "Received file part");
            submission.files.push(Attachment {
                field: name,
                filename,
                content_type,
                content,
            });
        }

        tracing::info!(
            fields = submission.fields.len(),
            files = submission.files.len(),
            dropped_empty = dropped_empty,
            total_size = total_size,
            "Parsed onboarding submission"
        );

        Ok(submission)
    }
}
