//! One forwarding pass: mailbox → extraction → transport → flag update.
//!
//! Each candidate is handled independently and produces an [`Outcome`]; only a
//! failure to open or scan the mailbox aborts the pass. Sessions are held in
//! guards, so they are released on every exit path.

use tracing::{error, info, info_span, warn};

use crate::config::ForwardPolicy;
use crate::error::{RelayError, Result};
use crate::mailbox::{self, MailboxConnector, UnseenMessages};
use crate::model::mail::{RawMessage, Uid};
use crate::notify::Notifier;
use crate::parser::mime;
use crate::transport::{self, OutgoingMessage, TransportConnector};

/// What happened to one candidate message.
#[derive(Debug)]
pub enum Outcome {
    /// Sent with this many attachments.
    Forwarded { attachments: usize },
    /// No attachment matched; nothing was sent and flags were left alone.
    NoAttachment,
    /// Transport connection or send failed; flags were left alone.
    Failed(RelayError),
}

impl Outcome {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Self::Forwarded { .. })
    }
}

/// Summary of one pass.
#[derive(Debug, Default)]
pub struct PassReport {
    /// One entry per candidate, in mailbox order.
    pub outcomes: Vec<(Uid, Outcome)>,
    /// Unseen messages dropped by the sender filter.
    pub sender_mismatches: usize,
    /// Unseen messages that could not be fetched.
    pub fetch_failures: usize,
}

impl PassReport {
    pub fn forwarded(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_forwarded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, Outcome::Failed(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, Outcome::NoAttachment))
            .count()
    }
}

/// Drives passes with a fixed policy, a pair of connectors and a notification sink.
pub struct Forwarder<'a, M, T, N> {
    policy: &'a ForwardPolicy,
    mailbox: M,
    transport: T,
    notifier: N,
}

impl<'a, M, T, N> Forwarder<'a, M, T, N>
where
    M: MailboxConnector,
    T: TransportConnector,
    N: Notifier,
{
    pub fn new(policy: &'a ForwardPolicy, mailbox: M, transport: T, notifier: N) -> Self {
        Self {
            policy,
            mailbox,
            transport,
            notifier,
        }
    }

    /// Run one pass over the currently unseen messages.
    ///
    /// Returns `Err` only when the mailbox cannot be opened, selected or
    /// searched; per-message problems are reported in the [`PassReport`].
    pub fn run_pass(&self) -> Result<PassReport> {
        info!("Starting email processing");

        let mut session = match mailbox::connect(
            &self.mailbox,
            &self.policy.imap,
            &self.policy.credentials,
        ) {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "Mailbox connection failed");
                self.notifier.notify(&format!("Mail forwarding aborted: {e}"));
                return Err(e);
            }
        };

        let result = self.scan(&mut *session);
        drop(session);

        match &result {
            Ok(report) => info!(
                forwarded = report.forwarded(),
                skipped = report.skipped(),
                failed = report.failed(),
                sender_mismatches = report.sender_mismatches,
                fetch_failures = report.fetch_failures,
                "Pass finished"
            ),
            Err(e) => {
                error!(error = %e, "Mailbox scan failed");
                self.notifier.notify(&format!("Mail forwarding aborted: {e}"));
            }
        }
        result
    }

    fn scan(&self, session: &mut M::Session) -> Result<PassReport> {
        let mut candidates =
            UnseenMessages::open(session, self.policy.expected_sender.as_deref())?;
        let mut report = PassReport::default();

        while let Some(raw) = candidates.next() {
            let uid = raw.uid;
            let span = info_span!("message", %uid);
            let _entered = span.enter();

            let outcome = self.process(raw);
            if outcome.is_forwarded() {
                let as_unread = self.policy.set_unread;
                if let Err(e) = mailbox::mark_read(candidates.session_mut(), uid, as_unread) {
                    warn!(error = %e, "Message forwarded but its flags could not be updated");
                }
            }
            report.outcomes.push((uid, outcome));
        }

        report.sender_mismatches = candidates.sender_mismatches();
        report.fetch_failures = candidates.fetch_failures();

        if report.outcomes.is_empty() {
            info!("No unread messages found");
            self.notifier.notify("No new messages to forward");
        }

        Ok(report)
    }

    /// Extract, then forward. Never touches the mailbox.
    fn process(&self, raw: RawMessage) -> Outcome {
        let uid = raw.uid;
        let extracted = mime::extract(&raw.bytes, self.policy.attachment_pattern.as_ref());
        let subject = extracted.parsed.subject.as_deref().unwrap_or("[No Subject]");
        info!(subject, body_len = extracted.parsed.body.len(), "Processing message");

        if extracted.attachments.is_empty() {
            info!("No attachments found, skipping");
            self.notifier.notify(&format!(
                "Message {uid} ('{subject}') has no matching attachments; nothing forwarded"
            ));
            return Outcome::NoAttachment;
        }

        let count = extracted.attachments.len();
        let message = OutgoingMessage::compose(
            self.policy,
            extracted.parsed.subject.as_deref(),
            Some(extracted.parsed.body.as_str()),
            extracted.attachments,
        );

        let mut smtp = match transport::connect(
            &self.transport,
            &self.policy.smtp,
            &self.policy.credentials,
        ) {
            Ok(smtp) => smtp,
            Err(e) => {
                error!(error = %e, "Transport connection failed");
                self.notifier.notify(&format!(
                    "Cannot forward message {uid} ('{subject}'): transport unavailable: {e}"
                ));
                return Outcome::Failed(e);
            }
        };

        match transport::forward(&mut *smtp, &message) {
            Ok(()) => {
                self.notifier.notify(&format!(
                    "Forwarded {count} attachment(s) from message {uid} ('{subject}') to {}",
                    message.to
                ));
                Outcome::Forwarded { attachments: count }
            }
            Err(e) => {
                error!(error = %e, "Forwarding failed");
                self.notifier
                    .notify(&format!("Failed to forward message {uid} ('{subject}'): {e}"));
                Outcome::Failed(e)
            }
        }
    }
}
