//! `mailrelay`: forward attachments of unread mail to a fixed recipient.
//!
//! One pass connects to a mailbox, walks the unseen messages from an optional
//! expected sender, extracts the attachments that match a filename pattern and
//! sends them on through SMTP, then updates the source message's read state.

pub mod config;
pub mod error;
pub mod mailbox;
pub mod model;
pub mod notify;
pub mod parser;
pub mod pipeline;
pub mod transport;
