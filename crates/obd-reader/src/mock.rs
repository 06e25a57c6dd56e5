//! Mock ELM327 adapter for testing.
//!
//! Replies are scripted per command and every command written is recorded,
//! so sessions and clients can be exercised without hardware. Clones share
//! the same script and recording, which lets a test keep a handle after
//! moving the transport into a client.

use crate::error::ObdError;
use crate::transport::Transport;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// What the mock does after receiving a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Reply text; the `\r\r>` prompt is appended when missing
    Text(String),
    /// Never send a prompt, so the reader times out
    Silent,
}

impl MockReply {
    pub fn text(reply: &str) -> Self {
        MockReply::Text(reply.to_string())
    }
}

#[derive(Debug, Default)]
struct MockState {
    /// Queued replies per command; the last one repeats forever
    script: HashMap<String, VecDeque<MockReply>>,
    echo: bool,
    outbox: Option<MockReply>,
    sent: Vec<String>,
    closed: bool,
    fail_writes: bool,
}

/// Scripted ELM327 transport
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Adapter with an empty script and echo on (the ELM327 power-on default).
    /// Unscripted commands are answered with `?`.
    pub fn new() -> Self {
        let mock = Self::default();
        mock.lock().echo = true;
        mock
    }

    /// Adapter attached to a healthy CAN vehicle
    pub fn elm327() -> Self {
        let mock = Self::new();
        mock.on("ATZ", "\r\rELM327 v1.5")
            .on("ATE0", "OK")
            .on("ATSP0", "OK")
            .on("ATDPN", "A6")
            .on("ATRV", "12.6V")
            .on_sequence(
                "0100",
                vec![
                    MockReply::text("SEARCHING...\r41 00 BE 1F A8 13"),
                    MockReply::text("41 00 BE 1F A8 13"),
                ],
            )
            .on("0120", "41 20 00 02 20 01")
            .on("0140", "41 40 44 00 00 00")
            .on("0103", "41 03 02 00")
            .on("0104", "41 04 66")
            .on("0105", "41 05 7B")
            .on("010C", "41 0C 1A F8")
            .on("010D", "41 0D 28")
            .on("012F", "41 2F 80")
            .on("03", "43 02 01 33 03 00")
            .on("04", "44");
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Answer `command` with `reply` from now on
    pub fn on(&self, command: &str, reply: &str) -> &Self {
        self.on_sequence(command, vec![MockReply::text(reply)])
    }

    /// Never answer `command`
    pub fn on_silent(&self, command: &str) -> &Self {
        self.on_sequence(command, vec![MockReply::Silent])
    }

    /// Answer `command` with each reply in turn, repeating the last
    pub fn on_sequence(&self, command: &str, replies: Vec<MockReply>) -> &Self {
        self.lock()
            .script
            .insert(command.to_ascii_uppercase(), replies.into());
        self
    }

    /// Make every following write fail as if the port vanished
    pub fn fail_writes(&self) {
        self.lock().fail_writes = true;
    }

    /// Commands received so far, without carriage returns
    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    /// How many times `command` was received
    pub fn count(&self, command: &str) -> usize {
        self.lock()
            .sent
            .iter()
            .filter(|sent| sent.eq_ignore_ascii_case(command))
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl MockState {
    fn next_reply(&mut self, command: &str) -> MockReply {
        match self.script.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(MockReply::Silent),
            Some(queue) => queue.front().cloned().unwrap_or(MockReply::Silent),
            None => MockReply::text("?"),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), ObdError> {
        let mut state = self.lock();
        if state.closed {
            return Err(ObdError::Transport("mock adapter is closed".to_string()));
        }
        if state.fail_writes {
            return Err(ObdError::Transport("mock adapter unplugged".to_string()));
        }

        let command = String::from_utf8_lossy(bytes).trim().to_ascii_uppercase();
        state.sent.push(command.clone());

        let reply = match state.next_reply(&command) {
            MockReply::Text(text) => {
                let mut text = if state.echo {
                    format!("{command}\r{text}")
                } else {
                    text
                };
                if !text.ends_with('>') {
                    text.push_str("\r\r>");
                }
                MockReply::Text(text)
            }
            MockReply::Silent => MockReply::Silent,
        };

        match command.as_str() {
            "ATZ" | "ATE1" => state.echo = true,
            "ATE0" => state.echo = false,
            _ => {}
        }
        state.outbox = Some(reply);
        Ok(())
    }

    async fn read_until(&mut self, _terminator: u8, timeout: Duration) -> Result<Vec<u8>, ObdError> {
        match self.lock().outbox.take() {
            Some(MockReply::Text(text)) => Ok(text.into_bytes()),
            Some(MockReply::Silent) | None => Err(ObdError::Timeout(timeout.as_millis() as u64)),
        }
    }

    async fn close(&mut self) -> Result<(), ObdError> {
        let mut state = self.lock();
        state.closed = true;
        state.outbox = None;
        Ok(())
    }
}
