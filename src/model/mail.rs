//! Message types that live for the duration of one pass.

use super::address::EmailAddress;

/// Mailbox-scoped message identifier (IMAP UID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(pub u32);

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One complete message in wire form, as fetched from the mailbox.
///
/// Produced by the mailbox reader and consumed within the same pass.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: Uid,
    pub bytes: Vec<u8>,
}

/// Read-only view over the parts of a message the forwarder cares about.
#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    /// Decoded `Subject:`; `None` when the header is missing or blank.
    pub subject: Option<String>,

    /// Body text: first `text/plain` part, else first `text/html`, else empty.
    pub body: String,

    /// First address of the `From:` header.
    pub from: Option<EmailAddress>,
}
