//! SMTP submission through `lettre`.
//!
//! Port 465 gets TLS from the first byte; any other port connects in clear
//! and must upgrade with STARTTLS before authenticating.

use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::{Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::{Credentials as SmtpCredentials, Mechanism};
use lettre::transport::smtp::client::{SmtpConnection, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::Message;
use tracing::debug;

use super::{OutgoingMessage, TransportConnector, TransportSession};
use crate::config::{Credentials, Endpoint, NetworkSettings, SMTPS_PORT};
use crate::error::{RelayError, Result};

/// Opens [`SmtpSession`]s with explicit timeouts.
#[derive(Debug, Clone)]
pub struct SmtpConnector {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl SmtpConnector {
    pub fn new(network: &NetworkSettings) -> Self {
        Self {
            connect_timeout: network.connect_timeout(),
            io_timeout: network.io_timeout(),
        }
    }
}

impl TransportConnector for SmtpConnector {
    type Session = SmtpSession;

    fn connect(&self, endpoint: &Endpoint, credentials: &Credentials) -> Result<SmtpSession> {
        let conn_err = |e: lettre::transport::smtp::Error| {
            RelayError::connection(&endpoint.host, endpoint.port, e)
        };

        let tls = TlsParameters::new(endpoint.host.clone()).map_err(conn_err)?;
        let hello = ClientId::default();
        let implicit_tls = endpoint.port == SMTPS_PORT;

        let mut conn = SmtpConnection::connect(
            (endpoint.host.as_str(), endpoint.port),
            Some(self.connect_timeout),
            &hello,
            implicit_tls.then_some(&tls),
            None,
        )
        .map_err(conn_err)?;

        if !implicit_tls {
            if !conn.can_starttls() {
                return Err(RelayError::connection(
                    &endpoint.host,
                    endpoint.port,
                    "server does not offer STARTTLS",
                ));
            }
            conn.starttls(&tls, &hello).map_err(conn_err)?;
            debug!("STARTTLS negotiated");
        }

        conn.set_timeout(Some(self.io_timeout))
            .map_err(|e| RelayError::connection(&endpoint.host, endpoint.port, e))?;

        conn.auth(
            &[Mechanism::Plain, Mechanism::Login],
            &SmtpCredentials::new(credentials.user.clone(), credentials.password.clone()),
        )
        .map_err(|e| RelayError::Auth {
            user: credentials.user.clone(),
            reason: e.to_string(),
        })?;

        Ok(SmtpSession { conn })
    }
}

/// An authenticated SMTP connection.
pub struct SmtpSession {
    conn: SmtpConnection,
}

impl TransportSession for SmtpSession {
    fn send(&mut self, message: &OutgoingMessage) -> Result<()> {
        let email = render(message)?;
        let response = self
            .conn
            .send(email.envelope(), &email.formatted())
            .map_err(|e| RelayError::Send(e.to_string()))?;
        debug!(code = %response.code(), "SMTP accepted message");
        Ok(())
    }

    fn quit(&mut self) -> Result<()> {
        self.conn
            .quit()
            .map(|_| ())
            .map_err(|e| RelayError::Send(format!("QUIT failed: {e}")))
    }
}

/// Build the MIME message: a plain-text part followed by one part per attachment.
pub fn render(message: &OutgoingMessage) -> Result<Message> {
    let from: Mailbox = message
        .from
        .parse()
        .map_err(|e| RelayError::Build(format!("invalid sender '{}': {e}", message.from)))?;
    let to: Mailbox = message
        .to
        .parse()
        .map_err(|e| RelayError::Build(format!("invalid recipient '{}': {e}", message.to)))?;

    let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(message.body.clone()));
    for attachment in &message.attachments {
        let content_type = ContentType::parse(attachment.outbound_content_type())
            .map_err(|e| RelayError::Build(e.to_string()))?;
        parts = parts.singlepart(
            MimeAttachment::new(attachment.filename.clone())
                .body(attachment.content.clone(), content_type),
        );
    }

    Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject.as_str())
        .multipart(parts)
        .map_err(|e| RelayError::Build(e.to_string()))
}
