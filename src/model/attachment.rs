//! Attachments carried from the source message to the outbound one.

/// MIME type used for `.zip` files.
pub const ZIP_MIME: &str = "application/zip";

/// MIME type used for everything else.
pub const OCTET_STREAM_MIME: &str = "application/octet-stream";

/// A decoded attachment.
///
/// `filename` is already RFC 2047 decoded into its display form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Display filename.
    pub filename: String,

    /// Decoded payload (transfer encoding already removed).
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }

    /// Content type for the outbound part: `application/zip` for `.zip`
    /// (any case), otherwise `application/octet-stream`.
    pub fn outbound_content_type(&self) -> &'static str {
        if self.filename.to_lowercase().ends_with(".zip") {
            ZIP_MIME
        } else {
            OCTET_STREAM_MIME
        }
    }
}
