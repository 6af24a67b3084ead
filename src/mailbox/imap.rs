//! IMAP over implicit TLS.
//!
//! All reads use `BODY.PEEK[...]` so fetching never sets `\Seen`, and all
//! commands address messages by UID.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use native_tls::TlsStream;
use tracing::debug;

use super::{MailboxConnector, MailboxSession, INBOX};
use crate::config::{Credentials, Endpoint, NetworkSettings};
use crate::error::{RelayError, Result};
use crate::model::mail::Uid;

type TlsSession = imap::Session<TlsStream<TcpStream>>;

/// Opens [`ImapMailbox`] sessions with explicit timeouts.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl ImapConnector {
    pub fn new(network: &NetworkSettings) -> Self {
        Self {
            connect_timeout: network.connect_timeout(),
            io_timeout: network.io_timeout(),
        }
    }
}

impl MailboxConnector for ImapConnector {
    type Session = ImapMailbox;

    fn connect(&self, endpoint: &Endpoint, credentials: &Credentials) -> Result<ImapMailbox> {
        let tcp = connect_tcp(endpoint, self.connect_timeout, self.io_timeout)?;

        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(|e| RelayError::connection(&endpoint.host, endpoint.port, e))?;
        let stream = tls
            .connect(&endpoint.host, tcp)
            .map_err(|e| RelayError::connection(&endpoint.host, endpoint.port, e))?;

        let mut client = imap::Client::new(stream);
        client
            .read_greeting()
            .map_err(|e| RelayError::connection(&endpoint.host, endpoint.port, e))?;

        let session = client
            .login(&credentials.user, &credentials.password)
            .map_err(|(e, _)| RelayError::Auth {
                user: credentials.user.clone(),
                reason: e.to_string(),
            })?;

        Ok(ImapMailbox {
            session,
            selected: false,
        })
    }
}

/// Resolve `endpoint` and connect to the first address that answers.
pub(crate) fn connect_tcp(
    endpoint: &Endpoint,
    connect_timeout: Duration,
    io_timeout: Duration,
) -> Result<TcpStream> {
    let addrs = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|e| RelayError::connection(&endpoint.host, endpoint.port, e))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, connect_timeout) {
            Ok(tcp) => {
                tcp.set_read_timeout(Some(io_timeout))
                    .and_then(|()| tcp.set_write_timeout(Some(io_timeout)))
                    .map_err(|e| RelayError::connection(&endpoint.host, endpoint.port, e))?;
                debug!(%addr, "TCP connection established");
                return Ok(tcp);
            }
            Err(e) => {
                debug!(%addr, error = %e, "TCP connect failed");
                last_error = Some(e);
            }
        }
    }

    Err(RelayError::connection(
        &endpoint.host,
        endpoint.port,
        last_error.map_or_else(|| "no addresses resolved".to_string(), |e| e.to_string()),
    ))
}

/// An authenticated IMAP session.
pub struct ImapMailbox {
    session: TlsSession,
    selected: bool,
}

impl ImapMailbox {
    /// Run a `UID FETCH` for one message and hand the first response to `pick`.
    fn fetch_one(
        &mut self,
        uid: Uid,
        query: &str,
        pick: impl Fn(&imap::types::Fetch) -> Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>> {
        let fetches = self
            .session
            .uid_fetch(uid.to_string(), query)
            .map_err(|e| RelayError::Fetch {
                uid: uid.0,
                reason: e.to_string(),
            })?;

        Ok(fetches.iter().find_map(|f| pick(f).map(<[u8]>::to_vec)))
    }
}

impl MailboxSession for ImapMailbox {
    fn select_inbox(&mut self) -> Result<()> {
        let mailbox = self.session.select(INBOX).map_err(|e| RelayError::Mailbox {
            mailbox: INBOX.to_string(),
            reason: e.to_string(),
        })?;
        debug!(exists = mailbox.exists, unseen = ?mailbox.unseen, "Mailbox selected");
        self.selected = true;
        Ok(())
    }

    fn search_unseen(&mut self) -> Result<Vec<Uid>> {
        let found = self
            .session
            .uid_search("UNSEEN")
            .map_err(|e| RelayError::Search(e.to_string()))?;
        let mut uids: Vec<Uid> = found.into_iter().map(Uid).collect();
        uids.sort_unstable();
        Ok(uids)
    }

    fn fetch_header(&mut self, uid: Uid) -> Result<Option<Vec<u8>>> {
        self.fetch_one(uid, "BODY.PEEK[HEADER]", |f| f.header())
    }

    fn fetch_raw(&mut self, uid: Uid) -> Result<Option<Vec<u8>>> {
        self.fetch_one(uid, "BODY.PEEK[]", |f| f.body())
    }

    fn set_seen(&mut self, uid: Uid, seen: bool) -> Result<()> {
        let query = if seen {
            "+FLAGS (\\Seen)"
        } else {
            "-FLAGS (\\Seen)"
        };
        self.session
            .uid_store(uid.to_string(), query)
            .map_err(|e| RelayError::Store {
                uid: uid.0,
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.selected {
            self.selected = false;
            if let Err(e) = self.session.close() {
                debug!(error = %e, "CLOSE failed, logging out anyway");
            }
        }
        self.session
            .logout()
            .map_err(|e| RelayError::Mailbox {
                mailbox: INBOX.to_string(),
                reason: format!("logout failed: {e}"),
            })
    }
}
