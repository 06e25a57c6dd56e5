//! ELM327 Adapter Session
//!
//! Owns the transport and drives the adapter through
//! `Disconnected -> Connecting -> ProtocolNegotiating -> Ready`. Only the
//! init sequence may talk to the adapter before the session is ready, and
//! exactly one command is in flight at a time.

use crate::codec::{self, AdapterStatus, DecodedReply, PROMPT};
use crate::config::SessionConfig;
use crate::error::ObdError;
use crate::protocol::ObdProtocol;
use crate::transport::Transport;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Lifecycle of an adapter session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    ProtocolNegotiating,
    Ready,
    /// Init or transport failure; the transport has been released
    Error(String),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => f.write_str("disconnected"),
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::ProtocolNegotiating => f.write_str("negotiating protocol"),
            SessionState::Ready => f.write_str("ready"),
            SessionState::Error(reason) => write!(f, "error ({reason})"),
        }
    }
}

/// One adapter behind one transport
pub struct AdapterSession {
    config: SessionConfig,
    transport: Option<Box<dyn Transport>>,
    state: SessionState,
    protocol: ObdProtocol,
    adapter_version: Option<String>,
    /// A timed-out reply may still arrive and must be discarded first
    stale: bool,
}

impl AdapterSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            transport: None,
            state: SessionState::Disconnected,
            protocol: ObdProtocol::Auto,
            adapter_version: None,
            stale: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Protocol in use, as reported by the adapter after negotiation
    pub fn protocol(&self) -> ObdProtocol {
        self.protocol
    }

    /// Banner printed by the adapter on reset, e.g. `"ELM327 v1.5"`
    pub fn adapter_version(&self) -> Option<&str> {
        self.adapter_version.as_deref()
    }

    /// Take ownership of `transport` and run the init sequence.
    ///
    /// Returns the decoded probe reply. On failure the transport is closed,
    /// the state is `Error(reason)` and the error is `AdapterInit`.
    pub async fn initialize(
        &mut self,
        mut transport: Box<dyn Transport>,
    ) -> Result<DecodedReply, ObdError> {
        if matches!(
            self.state,
            SessionState::Connecting | SessionState::ProtocolNegotiating | SessionState::Ready
        ) {
            if let Err(e) = transport.close().await {
                warn!("Failed to release rejected transport: {}", e);
            }
            return Err(ObdError::InvalidState {
                command: "connect".to_string(),
                state: self.state.to_string(),
            });
        }

        self.release().await;
        self.transport = Some(transport);
        self.state = SessionState::Connecting;
        self.protocol = ObdProtocol::Auto;
        self.adapter_version = None;

        match self.run_init().await {
            Ok(probe) => {
                self.state = SessionState::Ready;
                info!(
                    "Adapter ready ({}, protocol {:?})",
                    self.adapter_version.as_deref().unwrap_or("unknown adapter"),
                    self.protocol
                );
                Ok(probe)
            }
            Err(e) => {
                let reason = match e {
                    ObdError::AdapterInit(reason) => reason,
                    other => other.to_string(),
                };
                warn!("Adapter initialization failed: {}", reason);
                self.release().await;
                self.state = SessionState::Error(reason.clone());
                Err(ObdError::AdapterInit(reason))
            }
        }
    }

    async fn run_init(&mut self) -> Result<DecodedReply, ObdError> {
        let timeout = self.config.init_timeout();

        for command in self.config.init_commands.clone() {
            let lines = self.at_command(&command, timeout).await?;
            if command.eq_ignore_ascii_case("ATZ") {
                self.adapter_version = lines.last().cloned();
            }
        }
        self.at_command(self.config.protocol.to_elm_command(), timeout)
            .await?;

        self.state = SessionState::ProtocolNegotiating;
        let probe_command = self.config.probe_command.clone();
        let raw = self.exchange(&probe_command, timeout).await?;
        let probe = codec::decode_lines(&raw, &probe_command)?;
        if let Some(status) = probe.error_status() {
            return Err(ObdError::AdapterInit(format!(
                "probe {probe_command} answered {status}"
            )));
        }
        if probe.frames.is_empty() {
            return Err(ObdError::AdapterInit(format!(
                "probe {probe_command} returned no data; is the ignition on?"
            )));
        }

        self.protocol = self.detect_protocol(timeout).await;
        Ok(probe)
    }

    async fn detect_protocol(&mut self, timeout: Duration) -> ObdProtocol {
        if self.config.protocol != ObdProtocol::Auto {
            return self.config.protocol;
        }
        match self.at_command("ATDPN", timeout).await {
            Ok(lines) => lines
                .last()
                .and_then(|line| ObdProtocol::from_elm_number(line))
                .unwrap_or_else(|| {
                    warn!("Unrecognized ATDPN reply {:?}", lines);
                    ObdProtocol::Auto
                }),
            Err(e) => {
                warn!("Could not read negotiated protocol: {}", e);
                ObdProtocol::Auto
            }
        }
    }

    /// Send an AT command and return its text lines; error statuses fail
    async fn at_command(&mut self, command: &str, timeout: Duration) -> Result<Vec<String>, ObdError> {
        let raw = self.exchange(command, timeout).await?;
        let lines = codec::text_lines(&raw, command);
        if let Some(status) = lines
            .iter()
            .filter_map(|line| AdapterStatus::parse(line))
            .find(AdapterStatus::is_error)
        {
            return Err(ObdError::Adapter(format!("{command} answered {status}")));
        }
        Ok(lines)
    }

    /// Send a command once the session is ready and return the raw reply.
    ///
    /// A timeout leaves the state unchanged so the caller may retry.
    pub async fn send_command(&mut self, command: &str) -> Result<String, ObdError> {
        if self.state != SessionState::Ready {
            return Err(ObdError::InvalidState {
                command: command.trim_end().to_string(),
                state: self.state.to_string(),
            });
        }
        let timeout = self.config.command_timeout();
        self.exchange(command, timeout).await
    }

    async fn exchange(&mut self, command: &str, timeout: Duration) -> Result<String, ObdError> {
        let drain = std::mem::take(&mut self.stale).then(|| self.config.drain_timeout());
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| ObdError::Transport("no transport attached".to_string()))?;

        match roundtrip(transport.as_mut(), command, timeout, drain).await {
            Ok(raw) => Ok(raw),
            Err(ObdError::Timeout(ms)) => {
                warn!("No prompt after {}ms for {:?}", ms, command.trim_end());
                self.stale = true;
                Err(ObdError::Timeout(ms))
            }
            Err(e) => {
                warn!("Transport failed during {:?}: {}", command.trim_end(), e);
                self.release().await;
                self.state = SessionState::Error(e.to_string());
                Err(e)
            }
        }
    }

    /// Close the transport; safe to call in any state, any number of times
    pub async fn close(&mut self) {
        self.release().await;
        if self.state != SessionState::Disconnected {
            info!("Adapter session closed");
        }
        self.state = SessionState::Disconnected;
    }

    async fn release(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                warn!("Error closing transport: {}", e);
            }
        }
        self.stale = false;
    }
}

async fn roundtrip(
    transport: &mut dyn Transport,
    command: &str,
    timeout: Duration,
    drain: Option<Duration>,
) -> Result<String, ObdError> {
    if let Some(drain) = drain {
        match transport.read_until(PROMPT, drain).await {
            Ok(late) => debug!("Discarded late reply {:?}", String::from_utf8_lossy(&late)),
            Err(ObdError::Timeout(_)) => {}
            Err(e) => return Err(e),
        }
    }

    let command = command.trim_end();
    debug!("-> {}", command);
    transport.write(format!("{command}\r").as_bytes()).await?;

    // a reply arriving after its own timeout must not be taken for this one
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let raw = match transport.read_until(PROMPT, remaining).await {
            Ok(raw) => raw,
            Err(ObdError::Timeout(_)) => return Err(ObdError::Timeout(timeout.as_millis() as u64)),
            Err(e) => return Err(e),
        };
        let reply = String::from_utf8_lossy(&raw).into_owned();
        if codec::answers(&reply, command) {
            debug!("<- {:?}", reply);
            return Ok(reply);
        }
        warn!("Discarding reply {:?} that does not answer {}", reply, command);
    }
}
