//! Integration tests for a full forwarding pass against in-memory mailbox and
//! transport fakes.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use mailrelay::config::{Credentials, Endpoint, ForwardPolicy};
use mailrelay::error::{RelayError, Result};
use mailrelay::mailbox::{MailboxConnector, MailboxSession};
use mailrelay::model::mail::Uid;
use mailrelay::notify::Notifier;
use mailrelay::pipeline::{Forwarder, Outcome};
use mailrelay::transport::{OutgoingMessage, TransportConnector, TransportSession};

// ─── Fixtures ───────────────────────────────────────────────────────

const REPORT_WITH_ZIP: &str = "From: Reports <expected@x.com>\r\n\
To: robot@x.com\r\n\
Subject: Report\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"sep\"\r\n\
\r\n\
--sep\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
hello\r\n\
--sep\r\n\
Content-Type: application/zip; name=\"data.zip\"\r\n\
Content-Disposition: attachment; filename=\"data.zip\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
UEsDBA==\r\n\
--sep--\r\n";

const NO_ATTACHMENT: &str = "From: expected@x.com\r\n\
Subject: Just text\r\n\
\r\n\
nothing attached\r\n";

const ENCODED_NAME: &str = "From: expected@x.com\r\n\
Subject: Encoded\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"sep\"\r\n\
\r\n\
--sep\r\n\
Content-Type: text/plain\r\n\
\r\n\
see attached\r\n\
--sep\r\n\
Content-Type: application/octet-stream\r\n\
Content-Disposition: attachment; filename=\"=?UTF-8?B?0L7RgtGH0ZHRgi56aXA=?=\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
UEsDBA==\r\n\
--sep--\r\n";

fn policy(extra: &[(&str, &str)]) -> ForwardPolicy {
    let mut vars: BTreeMap<String, String> = [
        ("EMAIL_USER", "robot@x.com"),
        ("EMAIL_PASSWORD", "secret"),
        ("RECIPIENT_EMAIL", "dest@y.com"),
    ]
    .iter()
    .chain(extra)
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    vars.insert("DEFAULT_SUBJECT".into(), "Fallback subject".into());
    ForwardPolicy::from_lookup(|key| vars.get(key).cloned()).expect("valid policy")
}

// ─── Fake mailbox ───────────────────────────────────────────────────

#[derive(Default)]
struct MailboxState {
    messages: BTreeMap<u32, (String, bool)>,
    connect_error: bool,
    select_error: bool,
    broken_fetch: Vec<u32>,
    full_fetches: Vec<u32>,
    stores: Vec<(u32, bool)>,
    closed: usize,
}

#[derive(Clone, Default)]
struct FakeMailbox(Rc<RefCell<MailboxState>>);

impl FakeMailbox {
    fn with(messages: &[(u32, &str)]) -> Self {
        let mailbox = Self::default();
        for (uid, raw) in messages {
            mailbox
                .0
                .borrow_mut()
                .messages
                .insert(*uid, (raw.to_string(), false));
        }
        mailbox
    }

    fn seen(&self, uid: u32) -> bool {
        self.0.borrow().messages[&uid].1
    }
}

impl MailboxConnector for FakeMailbox {
    type Session = FakeMailbox;

    fn connect(&self, endpoint: &Endpoint, _credentials: &Credentials) -> Result<FakeMailbox> {
        if self.0.borrow().connect_error {
            return Err(RelayError::connection(&endpoint.host, endpoint.port, "refused"));
        }
        Ok(self.clone())
    }
}

impl MailboxSession for FakeMailbox {
    fn select_inbox(&mut self) -> Result<()> {
        if self.0.borrow().select_error {
            return Err(RelayError::Mailbox {
                mailbox: "INBOX".into(),
                reason: "locked".into(),
            });
        }
        Ok(())
    }

    fn search_unseen(&mut self) -> Result<Vec<Uid>> {
        Ok(self
            .0
            .borrow()
            .messages
            .iter()
            .filter(|(_, (_, seen))| !seen)
            .map(|(uid, _)| Uid(*uid))
            .collect())
    }

    fn fetch_header(&mut self, uid: Uid) -> Result<Option<Vec<u8>>> {
        let state = self.0.borrow();
        Ok(state.messages.get(&uid.0).map(|(raw, _)| {
            let end = raw.find("\r\n\r\n").unwrap_or(raw.len());
            raw.as_bytes()[..end].to_vec()
        }))
    }

    fn fetch_raw(&mut self, uid: Uid) -> Result<Option<Vec<u8>>> {
        let mut state = self.0.borrow_mut();
        if state.broken_fetch.contains(&uid.0) {
            return Err(RelayError::Fetch {
                uid: uid.0,
                reason: "truncated".into(),
            });
        }
        state.full_fetches.push(uid.0);
        Ok(state
            .messages
            .get(&uid.0)
            .map(|(raw, _)| raw.as_bytes().to_vec()))
    }

    fn set_seen(&mut self, uid: Uid, seen: bool) -> Result<()> {
        let mut state = self.0.borrow_mut();
        state.stores.push((uid.0, seen));
        if let Some(entry) = state.messages.get_mut(&uid.0) {
            entry.1 = seen;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.0.borrow_mut().closed += 1;
        Ok(())
    }
}

// ─── Fake transport ─────────────────────────────────────────────────

#[derive(Default)]
struct TransportState {
    connect_error: bool,
    send_error: bool,
    connects: usize,
    sent: Vec<OutgoingMessage>,
    quits: usize,
}

#[derive(Clone, Default)]
struct FakeTransport(Rc<RefCell<TransportState>>);

impl TransportConnector for FakeTransport {
    type Session = FakeTransport;

    fn connect(&self, endpoint: &Endpoint, _credentials: &Credentials) -> Result<FakeTransport> {
        let mut state = self.0.borrow_mut();
        state.connects += 1;
        if state.connect_error {
            return Err(RelayError::connection(&endpoint.host, endpoint.port, "refused"));
        }
        Ok(self.clone())
    }
}

impl TransportSession for FakeTransport {
    fn send(&mut self, message: &OutgoingMessage) -> Result<()> {
        let mut state = self.0.borrow_mut();
        if state.send_error {
            return Err(RelayError::Send("554 rejected".into()));
        }
        state.sent.push(message.clone());
        Ok(())
    }

    fn quit(&mut self) -> Result<()> {
        self.0.borrow_mut().quits += 1;
        Ok(())
    }
}

// ─── Notification recorder ──────────────────────────────────────────

#[derive(Clone, Default)]
struct Recorder(Rc<RefCell<Vec<String>>>);

impl Notifier for Recorder {
    fn notify(&self, message: &str) {
        self.0.borrow_mut().push(message.to_string());
    }
}

impl Recorder {
    fn messages(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

struct Harness {
    mailbox: FakeMailbox,
    transport: FakeTransport,
    notes: Recorder,
}

impl Harness {
    fn new(messages: &[(u32, &str)]) -> Self {
        Self {
            mailbox: FakeMailbox::with(messages),
            transport: FakeTransport::default(),
            notes: Recorder::default(),
        }
    }

    fn run(&self, policy: &ForwardPolicy) -> Result<mailrelay::pipeline::PassReport> {
        Forwarder::new(
            policy,
            self.mailbox.clone(),
            self.transport.clone(),
            self.notes.clone(),
        )
        .run_pass()
    }
}

// ─── Scenarios ──────────────────────────────────────────────────────

#[test]
fn test_forward_report_marks_read() {
    let h = Harness::new(&[(7, REPORT_WITH_ZIP)]);
    let report = h
        .run(&policy(&[("EXPECTED_SENDER", "expected@x.com")]))
        .unwrap();

    assert_eq!(report.forwarded(), 1);
    let transport = h.transport.0.borrow();
    assert_eq!(transport.sent.len(), 1);
    let sent = &transport.sent[0];
    assert_eq!(sent.subject, "Report");
    assert_eq!(sent.body.trim(), "hello");
    assert_eq!(sent.to, "dest@y.com");
    assert_eq!(sent.from, "robot@x.com");
    assert_eq!(sent.attachments.len(), 1);
    assert_eq!(sent.attachments[0].filename, "data.zip");
    assert_eq!(sent.attachments[0].outbound_content_type(), "application/zip");
    assert_eq!(transport.quits, 1);

    assert!(h.mailbox.seen(7));
    let notes = h.notes.messages();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].starts_with("Forwarded 1 attachment(s)"));
    assert_eq!(h.mailbox.0.borrow().closed, 1);
}

#[test]
fn test_set_unread_restores_unread() {
    let h = Harness::new(&[(7, REPORT_WITH_ZIP)]);
    let report = h.run(&policy(&[("SET_UNREAD", "true")])).unwrap();

    assert_eq!(report.forwarded(), 1);
    assert_eq!(h.transport.0.borrow().sent[0].subject, "Report");
    assert!(!h.mailbox.seen(7));
    assert_eq!(h.mailbox.0.borrow().stores, vec![(7, false)]);
}

#[test]
fn test_no_attachment_skips_send() {
    let h = Harness::new(&[(3, NO_ATTACHMENT)]);
    let report = h.run(&policy(&[])).unwrap();

    assert!(matches!(report.outcomes[..], [(Uid(3), Outcome::NoAttachment)]));
    assert_eq!(h.transport.0.borrow().connects, 0);
    assert!(h.transport.0.borrow().sent.is_empty());
    assert!(h.mailbox.0.borrow().stores.is_empty());
    assert!(!h.mailbox.seen(3));

    let notes = h.notes.messages();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].contains("no matching attachments"));
}

#[test]
fn test_pattern_mismatch_counts_as_no_attachment() {
    let h = Harness::new(&[(1, REPORT_WITH_ZIP)]);
    let report = h
        .run(&policy(&[("ATTACHMENT_FILENAME_PATTERN", "*.pdf")]))
        .unwrap();

    assert_eq!(report.skipped(), 1);
    assert!(h.transport.0.borrow().sent.is_empty());
    assert!(h.mailbox.0.borrow().stores.is_empty());
}

#[test]
fn test_sender_mismatch_is_excluded() {
    let h = Harness::new(&[(5, REPORT_WITH_ZIP)]);
    let report = h
        .run(&policy(&[("EXPECTED_SENDER", "other@x.com")]))
        .unwrap();

    assert!(report.outcomes.is_empty());
    assert_eq!(report.sender_mismatches, 1);
    assert!(h.mailbox.0.borrow().full_fetches.is_empty());
    assert!(h.transport.0.borrow().sent.is_empty());
    assert_eq!(h.notes.messages(), vec!["No new messages to forward"]);
}

#[test]
fn test_empty_inbox_does_nothing() {
    let h = Harness::new(&[]);
    let report = h.run(&policy(&[])).unwrap();

    assert!(report.outcomes.is_empty());
    let mailbox = h.mailbox.0.borrow();
    assert!(mailbox.full_fetches.is_empty());
    assert!(mailbox.stores.is_empty());
    assert_eq!(mailbox.closed, 1);
    assert_eq!(h.transport.0.borrow().connects, 0);
    assert_eq!(h.notes.messages(), vec!["No new messages to forward"]);
}

#[test]
fn test_already_seen_messages_are_ignored() {
    let h = Harness::new(&[(1, REPORT_WITH_ZIP)]);
    h.mailbox.0.borrow_mut().messages.get_mut(&1).unwrap().1 = true;
    let report = h.run(&policy(&[])).unwrap();
    assert!(report.outcomes.is_empty());
    assert!(h.transport.0.borrow().sent.is_empty());
}

#[test]
fn test_send_failure_leaves_flags_and_continues() {
    let h = Harness::new(&[(1, REPORT_WITH_ZIP), (2, REPORT_WITH_ZIP)]);
    h.transport.0.borrow_mut().send_error = true;
    let report = h.run(&policy(&[])).unwrap();

    assert_eq!(report.failed(), 2);
    assert!(matches!(report.outcomes[0].1, Outcome::Failed(RelayError::Send(_))));
    assert!(h.mailbox.0.borrow().stores.is_empty());
    assert_eq!(h.transport.0.borrow().quits, 2);
    let notes = h.notes.messages();
    assert_eq!(notes.len(), 2);
    assert!(notes.iter().all(|n| n.starts_with("Failed to forward message")));
}

#[test]
fn test_transport_connect_failure_continues_with_next() {
    let h = Harness::new(&[(1, REPORT_WITH_ZIP), (2, NO_ATTACHMENT)]);
    h.transport.0.borrow_mut().connect_error = true;
    let report = h.run(&policy(&[])).unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert!(matches!(report.outcomes[0], (Uid(1), Outcome::Failed(RelayError::Connection { .. }))));
    assert!(matches!(report.outcomes[1], (Uid(2), Outcome::NoAttachment)));
    assert!(!h.mailbox.seen(1));
    assert_eq!(h.transport.0.borrow().quits, 0);
    assert_eq!(h.mailbox.0.borrow().closed, 1);
}

#[test]
fn test_fetch_failure_isolated() {
    let h = Harness::new(&[(1, REPORT_WITH_ZIP), (2, REPORT_WITH_ZIP)]);
    h.mailbox.0.borrow_mut().broken_fetch.push(1);
    let report = h.run(&policy(&[])).unwrap();

    assert_eq!(report.fetch_failures, 1);
    assert_eq!(report.forwarded(), 1);
    assert!(h.mailbox.seen(2));
    assert!(!h.mailbox.seen(1));
}

#[test]
fn test_mailbox_connect_failure_aborts_pass() {
    let h = Harness::new(&[(1, REPORT_WITH_ZIP)]);
    h.mailbox.0.borrow_mut().connect_error = true;
    let err = h.run(&policy(&[])).unwrap_err();

    assert!(matches!(err, RelayError::Connection { .. }));
    assert_eq!(h.transport.0.borrow().connects, 0);
    assert_eq!(h.mailbox.0.borrow().closed, 0);
    let notes = h.notes.messages();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].starts_with("Mail forwarding aborted"));
}

#[test]
fn test_select_failure_still_releases_session() {
    let h = Harness::new(&[(1, REPORT_WITH_ZIP)]);
    h.mailbox.0.borrow_mut().select_error = true;
    let err = h.run(&policy(&[])).unwrap_err();

    assert!(matches!(err, RelayError::Mailbox { .. }));
    assert_eq!(h.mailbox.0.borrow().closed, 1);
    assert_eq!(h.notes.messages().len(), 1);
}

#[test]
fn test_default_subject_and_body_when_not_inherited() {
    let h = Harness::new(&[(1, REPORT_WITH_ZIP)]);
    h.run(&policy(&[
        ("SAME_SUBJECT", "false"),
        ("SAME_BODY", "false"),
        ("DEFAULT_BODY", "Automatic forward"),
    ]))
    .unwrap();

    let transport = h.transport.0.borrow();
    assert_eq!(transport.sent[0].subject, "Fallback subject");
    assert_eq!(transport.sent[0].body, "Automatic forward");
}

#[test]
fn test_encoded_filename_roundtrip() {
    let h = Harness::new(&[(1, ENCODED_NAME)]);
    h.run(&policy(&[("ATTACHMENT_FILENAME_PATTERN", "*.ZIP")]))
        .unwrap();

    let transport = h.transport.0.borrow();
    assert_eq!(transport.sent[0].attachments[0].filename, "отчёт.zip");
    assert_eq!(transport.sent[0].attachments[0].content, b"PK\x03\x04");
}

#[test]
fn test_mark_read_twice_is_noop() {
    let h = Harness::new(&[(1, REPORT_WITH_ZIP)]);
    h.run(&policy(&[])).unwrap();
    assert!(h.mailbox.seen(1));

    // Second pass sees no unseen messages and changes nothing.
    let report = h.run(&policy(&[])).unwrap();
    assert!(report.outcomes.is_empty());
    assert!(h.mailbox.seen(1));
    assert_eq!(h.mailbox.0.borrow().stores.len(), 1);
}
