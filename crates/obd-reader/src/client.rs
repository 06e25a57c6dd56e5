//! OBD-II Client for ELM327 Adapters
//!
//! High-level vehicle queries on top of an [`AdapterSession`]. The session
//! sits behind an async mutex held for a whole exchange (retries included),
//! so a client can be shared between tasks without interleaving commands.

use crate::codec;
use crate::config::ClientConfig;
use crate::decoder::{self, PhysicalValue, Response};
use crate::dtc::DtcCode;
use crate::error::ObdError;
use crate::mode;
use crate::pid::{self, Pid, SupportedCommandSet, SUPPORT_BLOCKS};
use crate::protocol::ObdProtocol;
use crate::session::{AdapterSession, SessionState};
use crate::transport::{SerialTransport, Transport};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// OBD-II client for communicating with ELM327-compatible adapters
pub struct ObdClient {
    config: ClientConfig,
    inner: Mutex<ClientInner>,
}

struct ClientInner {
    session: AdapterSession,
    /// Discovered at connect; `None` until then
    supported: Option<SupportedCommandSet>,
}

/// What the vehicle said to one request
enum Reply {
    /// Payloads after the mode/PID echo, one per answering ECU
    Data(Vec<Vec<u8>>),
    NoData,
    /// Negative response code
    Refused(u8),
}

impl ObdClient {
    /// Create a disconnected client
    pub fn new(config: ClientConfig) -> Self {
        let session = AdapterSession::new(config.session.clone());
        Self {
            config,
            inner: Mutex::new(ClientInner {
                session,
                supported: None,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open the configured serial port, initialize the adapter and discover
    /// which PIDs the vehicle supports
    pub async fn connect(&self) -> Result<SupportedCommandSet, ObdError> {
        let serial = &self.config.serial;
        info!("Connecting to OBD adapter on {}", serial.port);
        let transport = SerialTransport::open(&serial.port, serial.baud_rate)
            .map_err(|e| ObdError::AdapterInit(e.to_string()))?;
        self.connect_with(Box::new(transport)).await
    }

    /// Like [`connect`](Self::connect), over a caller-supplied transport
    pub async fn connect_with(
        &self,
        transport: Box<dyn Transport>,
    ) -> Result<SupportedCommandSet, ObdError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.supported = None;

        let probe = inner.session.initialize(transport).await?;
        match self.discover(&mut inner.session, &probe).await {
            Ok(supported) => {
                info!(
                    "Vehicle supports {} known commands: {}",
                    supported.len(),
                    supported.iter().map(|p| p.name).collect::<Vec<_>>().join(", ")
                );
                inner.supported = Some(supported.clone());
                Ok(supported)
            }
            Err(e) => {
                warn!("PID discovery failed: {}", e);
                inner.session.close().await;
                Err(match e {
                    ObdError::AdapterInit(_) => e,
                    other => ObdError::AdapterInit(other.to_string()),
                })
            }
        }
    }

    /// Walk the support bitmasks, starting with the probe's `0100` answer
    async fn discover(
        &self,
        session: &mut AdapterSession,
        probe: &codec::DecodedReply,
    ) -> Result<SupportedCommandSet, ObdError> {
        let mut supported = SupportedCommandSet::new();

        let first = match codec::payloads(&probe.frames, mode::CURRENT_DATA, Some(0x00))
            .into_iter()
            .next()
        {
            Some(bitmask) => bitmask,
            None => match self.request(session, &pid::PIDS_A).await? {
                Reply::Data(payloads) => payloads.into_iter().next().unwrap_or_default(),
                _ => {
                    return Err(ObdError::AdapterInit(
                        "vehicle did not answer 0100".to_string(),
                    ))
                }
            },
        };
        let mut more = supported.absorb(0x00, &first)?;

        for &base in SUPPORT_BLOCKS.iter().skip(1) {
            if !more {
                break;
            }
            let Some(block) = pid::lookup(mode::CURRENT_DATA, Some(base)) else {
                break;
            };
            more = match self.request(session, block).await {
                Ok(Reply::Data(payloads)) => match supported.absorb(base, &payloads[0]) {
                    Ok(next) => next,
                    Err(e) => {
                        warn!("Ignoring {}: {}", block.name, e);
                        false
                    }
                },
                Ok(_) => {
                    warn!("{} advertised but not answered", block.name);
                    false
                }
                Err(e @ ObdError::Transport(_)) => return Err(e),
                Err(e) => {
                    warn!("Stopping discovery at {}: {}", block.name, e);
                    false
                }
            };
        }

        Ok(supported)
    }

    /// Send a command, retrying only on timeout
    async fn send_with_retry(
        &self,
        session: &mut AdapterSession,
        command: &str,
    ) -> Result<String, ObdError> {
        let attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match session.send_command(command).await {
                Err(e) if e.is_timeout() && attempt < attempts => {
                    warn!(
                        "{} timed out (attempt {}/{}), retrying",
                        command.trim_end(),
                        attempt,
                        attempts
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn request(&self, session: &mut AdapterSession, pid: &Pid) -> Result<Reply, ObdError> {
        let command = codec::encode(pid);
        let raw = self.send_with_retry(session, &command).await?;
        let reply = codec::decode_lines(&raw, &command)?;

        if let Some(status) = reply.error_status() {
            return Err(ObdError::Adapter(format!("{} answered {}", pid.name, status)));
        }

        // on a shared bus one ECU may refuse while another answers
        let payloads = codec::payloads(&reply.frames, pid.mode, pid.code);
        if !payloads.is_empty() {
            return Ok(Reply::Data(payloads));
        }
        if let Some(nrc) = codec::negative_response(&reply.frames, pid.mode) {
            debug!("{} refused with NRC {:02X}", pid.name, nrc);
            Ok(Reply::Refused(nrc))
        } else if reply.frames.is_empty() {
            Ok(Reply::NoData)
        } else {
            Err(ObdError::MalformedFrame(format!(
                "no frame answers {}: {:?}",
                pid.name,
                raw.trim_end_matches(|c: char| c == '>' || c.is_whitespace())
            )))
        }
    }

    /// Query one PID.
    ///
    /// The response carries no value when the vehicle does not support the
    /// PID (nothing is sent), answers `NO DATA`, refuses the request or stays
    /// silent on every attempt.
    pub async fn query(&self, pid: &Pid) -> Result<Response, ObdError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let supported = inner
            .supported
            .as_ref()
            .ok_or_else(|| not_connected(pid.name, &inner.session))?;
        if !supported.contains(pid) {
            debug!("{} not supported by vehicle, skipping", pid.name);
            return Ok(Response::null(*pid));
        }

        match self.request(&mut inner.session, pid).await {
            Ok(Reply::Data(payloads)) => decoder::decode(pid, &payloads[0]),
            Ok(Reply::NoData) | Ok(Reply::Refused(_)) => Ok(Response::null(*pid)),
            Err(ObdError::Timeout(ms)) => {
                warn!("{} unanswered after {}ms", pid.name, ms);
                Ok(Response::null(*pid))
            }
            Err(e) => Err(e),
        }
    }

    async fn numeric(&self, pid: &Pid) -> Result<Option<f64>, ObdError> {
        Ok(self.query(pid).await?.value.and_then(|v| v.as_f64()))
    }

    /// Engine speed in rpm
    pub async fn get_rpm(&self) -> Result<Option<f64>, ObdError> {
        self.numeric(&pid::RPM).await
    }

    /// Vehicle speed in km/h
    pub async fn get_speed(&self) -> Result<Option<f64>, ObdError> {
        self.numeric(&pid::SPEED).await
    }

    /// Engine coolant temperature in °C
    pub async fn get_coolant_temp(&self) -> Result<Option<f64>, ObdError> {
        self.numeric(&pid::COOLANT_TEMP).await
    }

    /// Calculated engine load in percent
    pub async fn get_engine_load(&self) -> Result<Option<f64>, ObdError> {
        self.numeric(&pid::ENGINE_LOAD).await
    }

    /// Fuel system status text
    pub async fn get_fuel_status(&self) -> Result<Option<String>, ObdError> {
        Ok(self
            .query(&pid::FUEL_STATUS)
            .await?
            .value
            .and_then(|v| match v {
                PhysicalValue::StringCode(status) => Some(status),
                _ => None,
            }))
    }

    /// Stored trouble codes, in the order the ECUs report them.
    ///
    /// `NO DATA` means no codes; a timeout is an error, never "no faults".
    pub async fn read_dtc_codes(&self) -> Result<Vec<DtcCode>, ObdError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if inner.supported.is_none() {
            return Err(not_connected(pid::GET_DTC.name, &inner.session));
        }

        match self.request(&mut inner.session, &pid::GET_DTC).await? {
            Reply::Data(payloads) => {
                let mut codes = Vec::new();
                for payload in &payloads {
                    if let Some(PhysicalValue::DtcList(found)) =
                        decoder::decode(&pid::GET_DTC, payload)?.value
                    {
                        codes.extend(found);
                    }
                }
                info!("{} trouble codes stored", codes.len());
                Ok(codes)
            }
            Reply::NoData => Ok(Vec::new()),
            Reply::Refused(nrc) => Err(ObdError::Adapter(format!(
                "vehicle refused to report trouble codes (NRC {nrc:02X})"
            ))),
        }
    }

    /// Clear stored trouble codes and the MIL.
    ///
    /// Anything but a `44` acknowledgement is [`ObdError::ClearRejected`];
    /// the session stays ready either way.
    pub async fn clear_dtc(&self) -> Result<(), ObdError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if inner.supported.is_none() {
            return Err(not_connected(pid::CLEAR_DTC.name, &inner.session));
        }

        let command = codec::encode(&pid::CLEAR_DTC);
        let raw = self.send_with_retry(&mut inner.session, &command).await?;
        let reply = codec::decode_lines(&raw, &command)
            .map_err(|e| ObdError::ClearRejected(e.to_string()))?;

        if let Some(status) = reply.error_status().or_else(|| {
            reply
                .is_no_data()
                .then_some(codec::AdapterStatus::NoData)
        }) {
            return Err(ObdError::ClearRejected(format!("adapter answered {status}")));
        }
        if let Some(nrc) = codec::negative_response(&reply.frames, mode::CLEAR_DTC) {
            return Err(ObdError::ClearRejected(format!(
                "negative response {nrc:02X}"
            )));
        }
        let acknowledged = codec::payloads(&reply.frames, mode::CLEAR_DTC, None)
            .iter()
            .any(|payload| decoder::decode(&pid::CLEAR_DTC, payload).is_ok());
        if !acknowledged {
            return Err(ObdError::ClearRejected(format!(
                "unexpected reply {:?}",
                raw.trim_end_matches(|c: char| c == '>' || c.is_whitespace())
            )));
        }

        info!("Trouble codes cleared");
        Ok(())
    }

    /// Supply voltage measured by the adapter at the OBD connector (`ATRV`)
    pub async fn battery_voltage(&self) -> Result<Option<f64>, ObdError> {
        let mut guard = self.inner.lock().await;
        let raw = self.send_with_retry(&mut guard.session, "ATRV").await?;

        let Some(line) = codec::text_lines(&raw, "ATRV").pop() else {
            return Ok(None);
        };
        if let Some(status) = codec::AdapterStatus::parse(&line) {
            return Err(ObdError::Adapter(format!("ATRV answered {status}")));
        }
        line.trim_end_matches(|c: char| c == 'V' || c == 'v')
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ObdError::MalformedFrame(format!("unexpected ATRV reply {line:?}")))
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.session.state().clone()
    }

    /// Protocol negotiated with the vehicle
    pub async fn protocol(&self) -> ObdProtocol {
        self.inner.lock().await.session.protocol()
    }

    pub async fn adapter_version(&self) -> Option<String> {
        self.inner
            .lock()
            .await
            .session
            .adapter_version()
            .map(str::to_string)
    }

    /// Commands discovered at connect; `None` while disconnected
    pub async fn supported_commands(&self) -> Option<SupportedCommandSet> {
        self.inner.lock().await.supported.clone()
    }

    /// Release the adapter; the client can be connected again afterwards
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.supported = None;
        inner.session.close().await;
    }
}

fn not_connected(command: &str, session: &AdapterSession) -> ObdError {
    ObdError::InvalidState {
        command: command.to_string(),
        state: session.state().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockReply, MockTransport};
    use crate::transport::StreamTransport;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    async fn connected(mock: &MockTransport) -> ObdClient {
        let client = ObdClient::new(ClientConfig::default());
        client.connect_with(Box::new(mock.clone())).await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_connect_discovers_supported_pids() {
        let mock = MockTransport::elm327();
        let client = ObdClient::new(ClientConfig::default());
        let supported = client.connect_with(Box::new(mock.clone())).await.unwrap();

        assert_eq!(
            mock.sent(),
            vec!["ATZ", "ATE0", "ATSP0", "0100", "ATDPN", "0120", "0140"]
        );
        for pid in [&pid::RPM, &pid::SPEED, &pid::FUEL_STATUS, &pid::FUEL_LEVEL, &pid::AMBIENT_AIR_TEMP] {
            assert!(supported.contains(pid), "{} should be supported", pid.name);
        }
        assert!(!supported.contains(&pid::INTAKE_PRESSURE));
        assert!(supported.contains(&pid::GET_DTC));
        assert_eq!(client.state().await, SessionState::Ready);
        assert_eq!(client.protocol().await, ObdProtocol::Iso15765_4Can11bit500);
        assert_eq!(client.adapter_version().await.as_deref(), Some("ELM327 v1.5"));
    }

    #[tokio::test]
    async fn test_typed_getters() {
        let mock = MockTransport::elm327();
        let client = connected(&mock).await;

        assert_eq!(client.get_rpm().await.unwrap(), Some(1726.0));
        assert_eq!(client.get_speed().await.unwrap(), Some(40.0));
        assert_eq!(client.get_coolant_temp().await.unwrap(), Some(83.0));
        assert_eq!(client.get_engine_load().await.unwrap(), Some(40.0));
        assert_eq!(
            client.get_fuel_status().await.unwrap().as_deref(),
            Some("Closed loop, using oxygen sensor feedback to determine fuel mix")
        );
        assert_eq!(client.battery_voltage().await.unwrap(), Some(12.6));
    }

    #[tokio::test]
    async fn test_unsupported_pid_skips_round_trip() {
        let mock = MockTransport::elm327();
        let client = connected(&mock).await;
        let before = mock.sent().len();

        let response = client.query(&pid::INTAKE_PRESSURE).await.unwrap();
        assert!(response.is_null());
        assert_eq!(mock.sent().len(), before);
    }

    #[tokio::test]
    async fn test_silent_pid_retried_then_null() {
        let mock = MockTransport::elm327();
        mock.on_silent("010C");
        let client = connected(&mock).await;

        assert_eq!(client.get_rpm().await.unwrap(), None);
        assert_eq!(mock.count("010C"), 2);
        assert_eq!(client.state().await, SessionState::Ready);

        // the session is still usable afterwards
        assert_eq!(client.get_speed().await.unwrap(), Some(40.0));
    }

    #[tokio::test]
    async fn test_retry_recovers_after_one_timeout() {
        let mock = MockTransport::elm327();
        mock.on_sequence(
            "010D",
            vec![MockReply::Silent, MockReply::text("41 0D 3C")],
        );
        let client = connected(&mock).await;

        assert_eq!(client.get_speed().await.unwrap(), Some(60.0));
        assert_eq!(mock.count("010D"), 2);
    }

    #[tokio::test]
    async fn test_no_data_and_refusal_are_null() {
        let mock = MockTransport::elm327();
        mock.on("010D", "NO DATA").on("0105", "7F 01 12");
        let client = connected(&mock).await;

        assert_eq!(client.get_speed().await.unwrap(), None);
        assert_eq!(client.get_coolant_temp().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_bad_replies_are_errors() {
        let mock = MockTransport::elm327();
        mock.on("010C", "41 0C 1A")
            .on("010D", "41 0D ZZ")
            .on("0105", "CAN ERROR");
        let client = connected(&mock).await;

        assert!(matches!(client.get_rpm().await, Err(ObdError::Decode { .. })));
        assert!(matches!(
            client.get_speed().await,
            Err(ObdError::MalformedFrame(_))
        ));
        assert!(matches!(
            client.get_coolant_temp().await,
            Err(ObdError::Adapter(_))
        ));
    }

    #[tokio::test]
    async fn test_read_dtc_codes() {
        let mock = MockTransport::elm327();
        let client = connected(&mock).await;

        let codes = client.read_dtc_codes().await.unwrap();
        let names: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        assert_eq!(names, vec!["P0133", "P0300"]);

        mock.on("03", "NO DATA");
        assert!(client.read_dtc_codes().await.unwrap().is_empty());

        mock.on_silent("03");
        assert!(matches!(
            client.read_dtc_codes().await,
            Err(ObdError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_answer_wins_over_other_ecu_refusal() {
        let mock = MockTransport::elm327();
        mock.on("010C", "41 0C 1A F8\r7F 01 12")
            .on("03", "43 01 01 33\r7F 03 11");
        let client = connected(&mock).await;

        assert_eq!(client.get_rpm().await.unwrap(), Some(1726.0));
        let codes: Vec<String> = client
            .read_dtc_codes()
            .await
            .unwrap()
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(codes, vec!["P0133"]);
    }

    #[tokio::test]
    async fn test_read_dtc_codes_multiframe() {
        let mock = MockTransport::elm327();
        mock.on("03", "008\r0: 43 03 01 33 02 20\r1: 03 00 00 00 00 00 00");
        let client = connected(&mock).await;

        let codes: Vec<String> = client
            .read_dtc_codes()
            .await
            .unwrap()
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(codes, vec!["P0133", "P0220", "P0300"]);
    }

    #[tokio::test]
    async fn test_clear_dtc() {
        let mock = MockTransport::elm327();
        let client = connected(&mock).await;
        client.clear_dtc().await.unwrap();

        mock.on("04", "7F 04 22");
        assert!(matches!(
            client.clear_dtc().await,
            Err(ObdError::ClearRejected(_))
        ));

        mock.on("04", "NO DATA");
        assert!(matches!(
            client.clear_dtc().await,
            Err(ObdError::ClearRejected(_))
        ));

        mock.on_silent("04");
        assert_eq!(client.clear_dtc().await, Err(ObdError::Timeout(2000)));
        assert_eq!(mock.count("04"), 5);
        assert_eq!(client.state().await, SessionState::Ready);
    }

    #[tokio::test]
    async fn test_calls_before_connect_are_rejected() {
        let client = ObdClient::new(ClientConfig::default());
        assert!(matches!(
            client.get_rpm().await,
            Err(ObdError::InvalidState { .. })
        ));
        assert!(matches!(
            client.read_dtc_codes().await,
            Err(ObdError::InvalidState { .. })
        ));
        assert!(matches!(
            client.clear_dtc().await,
            Err(ObdError::InvalidState { .. })
        ));
        assert!(client.supported_commands().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_releases_transport() {
        let mock = MockTransport::elm327();
        mock.on("0100", "SEARCHING...\rUNABLE TO CONNECT");
        let client = ObdClient::new(ClientConfig::default());

        let err = client.connect_with(Box::new(mock.clone())).await.unwrap_err();
        assert!(matches!(err, ObdError::AdapterInit(_)));
        assert!(mock.is_closed());
        assert!(matches!(client.state().await, SessionState::Error(_)));

        // a later attempt over a healthy adapter succeeds
        client
            .connect_with(Box::new(MockTransport::elm327()))
            .await
            .unwrap();
        assert_eq!(client.get_speed().await.unwrap(), Some(40.0));
    }

    #[tokio::test]
    async fn test_missing_serial_port_is_init_error() {
        let mut config = ClientConfig::default();
        config.serial.port = "/dev/does-not-exist-obd".to_string();
        let client = ObdClient::new(config);

        assert!(matches!(
            client.connect().await,
            Err(ObdError::AdapterInit(_))
        ));
    }

    #[tokio::test]
    async fn test_close_then_reject() {
        let mock = MockTransport::elm327();
        let client = connected(&mock).await;
        client.close().await;

        assert!(mock.is_closed());
        assert_eq!(client.state().await, SessionState::Disconnected);
        assert!(client.get_rpm().await.is_err());
        client.close().await;
    }

    #[tokio::test]
    async fn test_shared_client_serializes_commands() {
        let mock = MockTransport::elm327();
        let client = Arc::new(connected(&mock).await);

        let rpm = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.get_rpm().await }
        });
        let speed = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.get_speed().await }
        });

        assert_eq!(rpm.await.unwrap().unwrap(), Some(1726.0));
        assert_eq!(speed.await.unwrap().unwrap(), Some(40.0));
    }

    /// Minimal ELM327 speaking over a byte stream, echo already off
    async fn fake_adapter(stream: DuplexStream) {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\r', &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let reply = match String::from_utf8_lossy(&line).trim() {
                "ATZ" => "\r\rELM327 v2.1",
                "ATE0" | "ATSP0" => "OK",
                "0100" => "SEARCHING...\r41 00 BE 1F A8 12",
                "ATDPN" => "A6",
                "010C" => "41 0C 0F A0",
                "03" => "43 00",
                _ => "?",
            };
            if writer
                .write_all(format!("{reply}\r\r>").as_bytes())
                .await
                .is_err()
            {
                break;
            }
        }
    }

    /// Adapter that answers the first `010C` only after the client gave up on it
    async fn slow_adapter(stream: DuplexStream) {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        let mut rpm_requests = 0;
        loop {
            line.clear();
            match reader.read_until(b'\r', &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let reply = match String::from_utf8_lossy(&line).trim() {
                "ATZ" => "\r\rELM327 v1.5",
                "ATE0" | "ATSP0" => "OK",
                "0100" => "41 00 BE 1F A8 12",
                "ATDPN" => "A6",
                "010C" => {
                    rpm_requests += 1;
                    if rpm_requests == 1 {
                        tokio::time::sleep(Duration::from_millis(2150)).await;
                        "41 0C 1A F8"
                    } else {
                        "41 0C 0F A0"
                    }
                }
                "010D" => "41 0D 28",
                "0105" => "41 05 7B",
                _ => "?",
            };
            if writer
                .write_all(format!("{reply}\r\r>").as_bytes())
                .await
                .is_err()
            {
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_does_not_shift_later_replies() {
        let (near, far) = tokio::io::duplex(256);
        let adapter = tokio::spawn(slow_adapter(far));

        let client = ObdClient::new(ClientConfig::default());
        client
            .connect_with(Box::new(StreamTransport::new(near, "duplex")))
            .await
            .unwrap();

        // the late answer to the first attempt satisfies the retry
        assert_eq!(client.get_rpm().await.unwrap(), Some(1726.0));
        // the retry's own answer is still in flight and gets skipped
        assert_eq!(client.get_speed().await.unwrap(), Some(40.0));
        assert_eq!(client.get_coolant_temp().await.unwrap(), Some(83.0));
        assert_eq!(client.get_rpm().await.unwrap(), Some(1000.0));

        client.close().await;
        adapter.await.unwrap();
    }

    #[tokio::test]
    async fn test_end_to_end_over_byte_stream() {
        let (near, far) = tokio::io::duplex(256);
        let adapter = tokio::spawn(fake_adapter(far));

        let client = ObdClient::new(ClientConfig::default());
        let supported = client
            .connect_with(Box::new(StreamTransport::new(near, "duplex")))
            .await
            .unwrap();
        assert!(!supported.contains(&pid::FUEL_LEVEL));

        assert_eq!(client.get_rpm().await.unwrap(), Some(1000.0));
        assert!(client.read_dtc_codes().await.unwrap().is_empty());
        assert_eq!(client.adapter_version().await.as_deref(), Some("ELM327 v2.1"));

        client.close().await;
        adapter.await.unwrap();
    }
}
