//! Enqueue-time validation policy.
//!
//! Mutations that break the policy are rejected before they touch the log.

use crate::operation::Mutation;
use crate::types::{EntityType, OperationKind};
use thiserror::Error;

/// Default payload size limit: 10 MiB.
pub const MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Upload types accepted by default: pdf, jpeg, png, doc, docx.
const DEFAULT_UPLOAD_TYPES: [&str; 5] = [
    "application/pdf",
    "image/jpeg",
    "image/png",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

/// Reasons a mutation is refused at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The payload exceeds the size limit.
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Payload size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// A file upload carries no MIME type.
    #[error("file upload is missing a content type")]
    MissingContentType,

    /// A file upload's MIME type is not on the allowlist.
    #[error("content type {content_type:?} is not allowed for uploads")]
    DisallowedContentType {
        /// The rejected type.
        content_type: String,
    },

    /// An update or delete does not name its entity.
    #[error("{kind} mutation requires an entity id")]
    MissingEntityId {
        /// The mutation kind.
        kind: OperationKind,
    },
}

/// Size and type rules applied to every mutation before it is queued.
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    /// Maximum payload size in bytes.
    pub max_payload_bytes: usize,
    /// MIME types accepted for [`EntityType::FileUpload`] payloads.
    pub allowed_upload_types: Vec<String>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            allowed_upload_types: DEFAULT_UPLOAD_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ValidationPolicy {
    /// Sets the payload size limit.
    #[must_use]
    pub fn with_max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = limit;
        self
    }

    /// Replaces the upload allowlist.
    #[must_use]
    pub fn with_allowed_upload_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_upload_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Checks a mutation against the policy.
    ///
    /// # Errors
    ///
    /// Returns the first rule the mutation breaks.
    pub fn validate(&self, mutation: &Mutation) -> Result<(), ValidationError> {
        if mutation.kind != OperationKind::Create && mutation.entity_id.is_none() {
            return Err(ValidationError::MissingEntityId {
                kind: mutation.kind,
            });
        }

        let size = mutation.payload.len();
        if size > self.max_payload_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        }

        if mutation.entity_type == EntityType::FileUpload && mutation.kind != OperationKind::Delete
        {
            let content_type = mutation
                .payload
                .content_type
                .as_deref()
                .ok_or(ValidationError::MissingContentType)?;
            if !self.upload_type_allowed(content_type) {
                return Err(ValidationError::DisallowedContentType {
                    content_type: content_type.to_string(),
                });
            }
        }

        Ok(())
    }

    fn upload_type_allowed(&self, content_type: &str) -> bool {
        // Ignore parameters such as "; charset=binary".
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.allowed_upload_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&essence))
    }
}
