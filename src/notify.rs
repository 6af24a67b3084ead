//! Operational notifications: fire-and-forget status lines.

use std::io::Write;
use std::process::{Command, Stdio};

/// A sink for human-readable status messages. Delivery is not confirmed.
pub trait Notifier {
    fn notify(&self, message: &str);
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn notify(&self, message: &str) {
        (**self).notify(message)
    }
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn notify(&self, message: &str) {
        (**self).notify(message)
    }
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        tracing::info!(target: "mailrelay::notify", "{message}");
    }
}

/// Runs a shell command per notification with the message on stdin,
/// e.g. a script that posts to a chat channel.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    command: String,
}

impl CommandNotifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn run(&self, message: &str) -> std::io::Result<std::process::ExitStatus> {
        let mut child = shell(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()?;

        // The child is reaped even when it exits without reading stdin.
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin
                .write_all(message.as_bytes())
                .and_then(|()| stdin.write_all(b"\n")),
            None => Ok(()),
        };
        let status = child.wait()?;
        written.map(|()| status)
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, message: &str) {
        match self.run(message) {
            Ok(status) if status.success() => {}
            Ok(status) => {
                tracing::warn!(command = %self.command, %status, "Notification command failed");
            }
            Err(e) => {
                tracing::warn!(command = %self.command, error = %e, "Cannot run notification command");
            }
        }
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Fan-out to several sinks.
#[derive(Default)]
pub struct Notifications {
    sinks: Vec<Box<dyn Notifier>>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl Notifier + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Notifier for Notifications {
    fn notify(&self, message: &str) {
        for sink in &self.sinks {
            sink.notify(message);
        }
    }
}
