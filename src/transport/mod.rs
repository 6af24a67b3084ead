//! Outbound side: message composition and transport session traits.

pub mod smtp;

use std::ops::{Deref, DerefMut};

use tracing::{debug, info, warn};

use crate::config::{Credentials, Endpoint, ForwardPolicy};
use crate::error::Result;
use crate::model::attachment::Attachment;

/// A fully decided outbound message: addresses, subject, body, attachments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl OutgoingMessage {
    /// Decide subject and body from the policy and the original message.
    ///
    /// - subject: the original when `same_subject` is set and an original
    ///   subject exists, otherwise `default_subject`. A missing or blank
    ///   subject takes `default_subject`, never a `[No Subject]` placeholder;
    /// - body: the original when `same_body` is set and an original body was
    ///   supplied (an empty string counts), otherwise `default_body`.
    pub fn compose(
        policy: &ForwardPolicy,
        original_subject: Option<&str>,
        original_body: Option<&str>,
        attachments: Vec<Attachment>,
    ) -> Self {
        let subject = match original_subject {
            Some(s) if policy.same_subject && !s.trim().is_empty() => s,
            _ => policy.default_subject.as_str(),
        };
        let body = match original_body {
            Some(b) if policy.same_body => b,
            _ => policy.default_body.as_str(),
        };

        Self {
            from: policy.sender.clone(),
            to: policy.recipient.clone(),
            subject: subject.to_string(),
            body: body.to_string(),
            attachments,
        }
    }
}

/// An authenticated outbound mail connection.
pub trait TransportSession {
    fn send(&mut self, message: &OutgoingMessage) -> Result<()>;

    /// End the session politely.
    fn quit(&mut self) -> Result<()>;
}

/// Opens [`TransportSession`]s.
pub trait TransportConnector {
    type Session: TransportSession;

    fn connect(&self, endpoint: &Endpoint, credentials: &Credentials) -> Result<Self::Session>;
}

/// A transport session that quits when dropped.
pub struct SessionGuard<S: TransportSession> {
    session: S,
}

impl<S: TransportSession> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: TransportSession> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: TransportSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        match self.session.quit() {
            Ok(()) => debug!("Transport session closed"),
            Err(e) => warn!(error = %e, "Failed to close transport session"),
        }
    }
}

/// Connect and log in.
pub fn connect<C: TransportConnector>(
    connector: &C,
    endpoint: &Endpoint,
    credentials: &Credentials,
) -> Result<SessionGuard<C::Session>> {
    info!(%endpoint, "Connecting to transport");
    let session = connector.connect(endpoint, credentials)?;
    info!("Transport login successful");
    Ok(SessionGuard { session })
}

/// Send `message` through `session`. The caller owns the session's lifetime.
pub fn forward<S: TransportSession>(session: &mut S, message: &OutgoingMessage) -> Result<()> {
    session.send(message)?;
    info!(
        to = %message.to,
        subject = %message.subject,
        attachments = message.attachments.len(),
        "Message sent"
    );
    Ok(())
}
