//! Mailbox side: session traits, the unseen-message iterator, sender filtering
//! and read-state updates.
//!
//! The reader never changes `\Seen` on its own; only [`mark_read`] does.

pub mod imap;

use std::ops::{Deref, DerefMut};

use tracing::{debug, info, warn};

use crate::config::{Credentials, Endpoint};
use crate::error::Result;
use crate::model::mail::{RawMessage, Uid};
use crate::parser::header::parse_from;

/// Name of the mailbox that is polled.
pub const INBOX: &str = "INBOX";

/// An authenticated mailbox connection.
pub trait MailboxSession {
    /// Select [`INBOX`] read-write.
    fn select_inbox(&mut self) -> Result<()>;

    /// UIDs of messages without `\Seen`, ascending.
    fn search_unseen(&mut self) -> Result<Vec<Uid>>;

    /// Header block of one message, without touching its flags.
    /// `Ok(None)` when the server returned no data for `uid`.
    fn fetch_header(&mut self, uid: Uid) -> Result<Option<Vec<u8>>>;

    /// Complete message, without touching its flags.
    /// `Ok(None)` when the server returned no data for `uid`.
    fn fetch_raw(&mut self, uid: Uid) -> Result<Option<Vec<u8>>>;

    /// Add (`seen = true`) or remove the `\Seen` flag.
    fn set_seen(&mut self, uid: Uid, seen: bool) -> Result<()>;

    /// Close the selected mailbox and log out.
    fn close(&mut self) -> Result<()>;
}

/// Opens [`MailboxSession`]s.
pub trait MailboxConnector {
    type Session: MailboxSession;

    fn connect(&self, endpoint: &Endpoint, credentials: &Credentials) -> Result<Self::Session>;
}

/// A mailbox session that is closed when dropped.
///
/// Close failures are logged, never propagated.
pub struct SessionGuard<S: MailboxSession> {
    session: S,
}

impl<S: MailboxSession> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: MailboxSession> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: MailboxSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        match self.session.close() {
            Ok(()) => debug!("Mailbox session closed"),
            Err(e) => warn!(error = %e, "Failed to close mailbox session"),
        }
    }
}

/// Connect and log in.
pub fn connect<C: MailboxConnector>(
    connector: &C,
    endpoint: &Endpoint,
    credentials: &Credentials,
) -> Result<SessionGuard<C::Session>> {
    info!(%endpoint, user = %credentials.user, "Connecting to mailbox");
    let session = connector.connect(endpoint, credentials)?;
    info!("Mailbox login successful");
    Ok(SessionGuard { session })
}

/// `true` when `raw_message`'s `From:` address equals `expected` (case-insensitive,
/// display name ignored). A missing `expected` accepts everything.
pub fn filter_by_sender(raw_message: &[u8], expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    parse_from(raw_message).is_some_and(|from| from.is_same_mailbox(expected))
}

/// Set (`as_unread = false`) or clear (`as_unread = true`) the `\Seen` flag.
pub fn mark_read<S: MailboxSession>(session: &mut S, uid: Uid, as_unread: bool) -> Result<()> {
    session.set_seen(uid, !as_unread)?;
    if as_unread {
        info!(%uid, "Restored unread status");
    } else {
        info!(%uid, "Marked as read");
    }
    Ok(())
}

/// Lazy sequence of unseen messages from the expected sender.
///
/// Built from a single SELECT + SEARCH; each `next()` fetches one message.
/// The sequence is finite and cannot be restarted: iterating again requires
/// a fresh [`UnseenMessages::open`]. Messages that fail to fetch are logged
/// and skipped.
pub struct UnseenMessages<'a, S: MailboxSession> {
    session: &'a mut S,
    pending: std::vec::IntoIter<Uid>,
    expected_sender: Option<&'a str>,
    sender_mismatches: usize,
    fetch_failures: usize,
}

impl<'a, S: MailboxSession> UnseenMessages<'a, S> {
    /// Select the inbox and search for unseen messages.
    pub fn open(session: &'a mut S, expected_sender: Option<&'a str>) -> Result<Self> {
        debug!(mailbox = INBOX, "Selecting mailbox");
        session.select_inbox()?;

        let uids = session.search_unseen()?;
        info!(count = uids.len(), ?uids, "Found unseen messages");

        Ok(Self {
            session,
            pending: uids.into_iter(),
            expected_sender,
            sender_mismatches: 0,
            fetch_failures: 0,
        })
    }

    /// The underlying session, for flag updates between items.
    pub fn session_mut(&mut self) -> &mut S {
        self.session
    }

    /// Messages skipped so far because their sender did not match.
    pub fn sender_mismatches(&self) -> usize {
        self.sender_mismatches
    }

    /// Messages skipped so far because they could not be fetched.
    pub fn fetch_failures(&self) -> usize {
        self.fetch_failures
    }
}

/// Sender check on the header block only, so mismatching messages are never
/// downloaded in full. `None` when the header could not be fetched.
fn sender_matches<S: MailboxSession>(
    session: &mut S,
    uid: Uid,
    expected: Option<&str>,
) -> Option<bool> {
    let Some(expected) = expected else {
        return Some(true);
    };

    match session.fetch_header(uid) {
        Ok(Some(header)) => {
            let matches = filter_by_sender(&header, Some(expected));
            if !matches {
                info!(%uid, expected, "Skipping message from another sender");
            }
            Some(matches)
        }
        Ok(None) => {
            warn!(%uid, "Empty header returned, skipping");
            None
        }
        Err(e) => {
            warn!(%uid, error = %e, "Header fetch failed, skipping");
            None
        }
    }
}

impl<S: MailboxSession> Iterator for UnseenMessages<'_, S> {
    type Item = RawMessage;

    fn next(&mut self) -> Option<RawMessage> {
        for uid in self.pending.by_ref() {
            match sender_matches(self.session, uid, self.expected_sender) {
                Some(true) => {}
                Some(false) => {
                    self.sender_mismatches += 1;
                    continue;
                }
                None => {
                    self.fetch_failures += 1;
                    continue;
                }
            }

            debug!(%uid, "Fetching message");
            match self.session.fetch_raw(uid) {
                Ok(Some(bytes)) if !bytes.is_empty() => {
                    return Some(RawMessage { uid, bytes });
                }
                Ok(_) => {
                    warn!(%uid, "Empty message body returned, skipping");
                    self.fetch_failures += 1;
                }
                Err(e) => {
                    warn!(%uid, error = %e, "Message fetch failed, skipping");
                    self.fetch_failures += 1;
                }
            }
        }
        None
    }
}
