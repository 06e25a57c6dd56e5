//! ELM327 Frame Codec
//!
//! Encodes requests into the adapter's ASCII-hex command lines and turns its
//! text replies back into byte frames. Replies look like:
//!
//! ```text
//! 010C            <- echo (only while ATE1 is active)
//! SEARCHING...    <- status line
//! 41 0C 1A F8     <- single frame
//! 014             <- ISO-TP byte count ...
//! 0: 49 02 01 31  <- ... followed by indexed continuation lines
//! >               <- prompt
//! ```

use crate::error::ObdError;
use crate::pid::Pid;
use std::fmt;
use tracing::warn;

/// Prompt byte that ends every adapter reply
pub const PROMPT: u8 = b'>';

/// Service byte of a negative response
const NEGATIVE_RESPONSE: u8 = 0x7F;

/// Largest padding an ELM327 leaves on the last consecutive frame
const MAX_FRAME_PADDING: usize = 6;

/// Format a request as the adapter expects it: `"010C\r"`, or `"03\r"` for
/// services without a PID.
pub fn encode(pid: &Pid) -> String {
    match pid.code {
        Some(code) => format!("{:02X}{:02X}\r", pid.mode, code),
        None => format!("{:02X}\r", pid.mode),
    }
}

/// Protocol-level signals the adapter prints instead of data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus {
    Ok,
    NoData,
    Searching,
    UnableToConnect,
    UnknownCommand,
    Stopped,
    BusInit,
    BusError,
    BusBusy,
    CanError,
    BufferFull,
    DataError,
    FeedbackError,
    LowVoltageReset,
    ActivityAlert,
    InternalError,
}

impl AdapterStatus {
    /// Recognise a status line (case-insensitive, spacing preserved)
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim().to_ascii_uppercase();
        let status = match line.as_str() {
            "OK" => AdapterStatus::Ok,
            "NO DATA" | "NODATA" => AdapterStatus::NoData,
            "?" => AdapterStatus::UnknownCommand,
            "STOPPED" => AdapterStatus::Stopped,
            "BUS ERROR" => AdapterStatus::BusError,
            "BUS BUSY" => AdapterStatus::BusBusy,
            "BUFFER FULL" => AdapterStatus::BufferFull,
            "FB ERROR" => AdapterStatus::FeedbackError,
            "LV RESET" => AdapterStatus::LowVoltageReset,
            "ACT ALERT" => AdapterStatus::ActivityAlert,
            "UNABLE TO CONNECT" => AdapterStatus::UnableToConnect,
            l if l.starts_with("SEARCHING") => AdapterStatus::Searching,
            l if l.starts_with("BUS INIT") && l.contains("ERROR") => AdapterStatus::BusError,
            l if l.starts_with("BUS INIT") => AdapterStatus::BusInit,
            l if l.starts_with("CAN ERROR") => AdapterStatus::CanError,
            l if l.contains("DATA ERROR") => AdapterStatus::DataError,
            l if l.starts_with("ERR") && l[3..].chars().all(|c| c.is_ascii_digit()) => {
                AdapterStatus::InternalError
            }
            _ => return None,
        };
        Some(status)
    }

    /// Whether the status means the request failed
    pub fn is_error(&self) -> bool {
        !matches!(
            self,
            AdapterStatus::Ok | AdapterStatus::NoData | AdapterStatus::Searching | AdapterStatus::BusInit
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterStatus::Ok => "OK",
            AdapterStatus::NoData => "NO DATA",
            AdapterStatus::Searching => "SEARCHING...",
            AdapterStatus::UnableToConnect => "UNABLE TO CONNECT",
            AdapterStatus::UnknownCommand => "?",
            AdapterStatus::Stopped => "STOPPED",
            AdapterStatus::BusInit => "BUS INIT",
            AdapterStatus::BusError => "BUS ERROR",
            AdapterStatus::BusBusy => "BUS BUSY",
            AdapterStatus::CanError => "CAN ERROR",
            AdapterStatus::BufferFull => "BUFFER FULL",
            AdapterStatus::DataError => "DATA ERROR",
            AdapterStatus::FeedbackError => "FB ERROR",
            AdapterStatus::LowVoltageReset => "LV RESET",
            AdapterStatus::ActivityAlert => "ACT ALERT",
            AdapterStatus::InternalError => "INTERNAL ERROR",
        }
    }
}

impl fmt::Display for AdapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One headerless response frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    pub bytes: Vec<u8>,
    /// Reassembled from ISO-TP continuation lines
    pub is_multiline: bool,
    /// The reply ended with the adapter prompt
    pub terminator_seen: bool,
}

/// Everything found in one adapter reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedReply {
    /// Echoed command, without the carriage return
    pub echo: Option<String>,
    pub frames: Vec<RawFrame>,
    pub statuses: Vec<AdapterStatus>,
}

impl DecodedReply {
    /// First status that means the request failed
    pub fn error_status(&self) -> Option<AdapterStatus> {
        self.statuses.iter().copied().find(AdapterStatus::is_error)
    }

    pub fn is_no_data(&self) -> bool {
        self.frames.is_empty() && self.statuses.contains(&AdapterStatus::NoData)
    }
}

/// Split a reply into trimmed, non-empty lines with the prompt removed
fn split_lines(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(|c: char| c == '\r' || c == '\n')
        .map(|line| line.trim_matches(|c: char| c == '>' || c.is_whitespace()))
        .filter(|line| !line.is_empty())
}

fn compact(line: &str) -> String {
    line.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

fn is_echo(line: &str, sent: &str) -> bool {
    let sent = compact(sent);
    !sent.is_empty() && compact(line) == sent
}

fn parse_hex(hex: &str, line: &str) -> Result<Vec<u8>, ObdError> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ObdError::MalformedFrame(format!(
            "non-hex characters in {line:?}"
        )));
    }
    if hex.len() % 2 != 0 {
        return Err(ObdError::MalformedFrame(format!(
            "odd number of hex digits in {line:?}"
        )));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| ObdError::MalformedFrame(format!("{line:?}: {e}")))
        })
        .collect()
}

/// ISO-TP message being reassembled from indexed lines
struct Continuation {
    declared: usize,
    next_index: u8,
    bytes: Vec<u8>,
}

impl Continuation {
    fn finish(mut self, terminator_seen: bool) -> Result<RawFrame, ObdError> {
        if self.bytes.len() < self.declared || self.bytes.len() > self.declared + MAX_FRAME_PADDING {
            return Err(ObdError::MalformedFrame(format!(
                "declared {} bytes but continuation lines carry {}",
                self.declared,
                self.bytes.len()
            )));
        }
        self.bytes.truncate(self.declared);
        Ok(RawFrame {
            bytes: self.bytes,
            is_multiline: true,
            terminator_seen,
        })
    }
}

/// Decode a reply to an OBD request into frames and statuses.
///
/// `sent` is the command that produced the reply; a first line equal to it
/// is the adapter's echo and is returned in [`DecodedReply::echo`].
pub fn decode_lines(raw: &str, sent: &str) -> Result<DecodedReply, ObdError> {
    let terminator_seen = raw.as_bytes().contains(&PROMPT);
    let mut reply = DecodedReply::default();
    let mut pending: Option<Continuation> = None;

    for (index, line) in split_lines(raw).enumerate() {
        if index == 0 && is_echo(line, sent) {
            reply.echo = Some(compact(line));
            continue;
        }

        if let Some(status) = AdapterStatus::parse(line) {
            reply.statuses.push(status);
            continue;
        }

        let hex = compact(line);
        if hex.len() == 3 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            if let Some(done) = pending.take() {
                reply.frames.push(done.finish(terminator_seen)?);
            }
            let declared = usize::from_str_radix(&hex, 16)
                .map_err(|e| ObdError::MalformedFrame(format!("{line:?}: {e}")))?;
            pending = Some(Continuation {
                declared,
                next_index: 0,
                bytes: Vec::with_capacity(declared),
            });
        } else if let Some((index_hex, data)) = hex.split_once(':') {
            let continuation = pending.as_mut().ok_or_else(|| {
                ObdError::MalformedFrame(format!("continuation line {line:?} without byte count"))
            })?;
            let frame_index = u8::from_str_radix(index_hex, 16)
                .map_err(|_| ObdError::MalformedFrame(format!("bad frame index in {line:?}")))?;
            if frame_index != continuation.next_index {
                return Err(ObdError::MalformedFrame(format!(
                    "expected frame index {:X}, got {:X}",
                    continuation.next_index, frame_index
                )));
            }
            continuation.next_index = (continuation.next_index + 1) & 0x0F;
            continuation.bytes.extend(parse_hex(data, line)?);
        } else {
            if let Some(done) = pending.take() {
                reply.frames.push(done.finish(terminator_seen)?);
            }
            reply.frames.push(RawFrame {
                bytes: parse_hex(&hex, line)?,
                is_multiline: false,
                terminator_seen,
            });
        }
    }

    if let Some(done) = pending.take() {
        reply.frames.push(done.finish(terminator_seen)?);
    }

    Ok(reply)
}

/// Text lines of a reply to an AT command, echo removed
pub fn text_lines(raw: &str, sent: &str) -> Vec<String> {
    split_lines(raw)
        .enumerate()
        .filter(|(index, line)| !(*index == 0 && is_echo(line, sent)))
        .map(|(_, line)| line.to_string())
        .collect()
}

/// Payloads answering a request, one per matching frame.
///
/// A frame answers when its first byte is `mode + 0x40` and, for requests
/// with a PID, its second byte echoes the PID. The returned payload starts
/// after that echo header.
pub fn payloads(frames: &[RawFrame], mode: u8, code: Option<u8>) -> Vec<Vec<u8>> {
    let response_mode = mode.wrapping_add(0x40);
    let header = if code.is_some() { 2 } else { 1 };

    frames
        .iter()
        .filter(|frame| frame.bytes.first() == Some(&response_mode))
        .filter(|frame| code.is_none() || frame.bytes.get(1).copied() == code)
        .filter(|frame| frame.bytes.len() >= header)
        .map(|frame| frame.bytes[header..].to_vec())
        .collect()
}

/// Negative response code for `mode`, if the vehicle refused the request
pub fn negative_response(frames: &[RawFrame], mode: u8) -> Option<u8> {
    frames.iter().find_map(|frame| match frame.bytes.as_slice() {
        [NEGATIVE_RESPONSE, rejected, nrc, ..] if *rejected == mode => Some(*nrc),
        [NEGATIVE_RESPONSE, rejected] if *rejected == mode => {
            warn!("Negative response without a reason code");
            Some(0)
        }
        _ => None,
    })
}

/// Service and PID of a hex request such as `"010C"`; `None` for AT commands
fn request_header(sent: &str) -> Option<(u8, Option<u8>)> {
    let hex = compact(sent);
    if hex.len() < 2 || hex.len() % 2 != 0 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let bytes = parse_hex(&hex, sent).ok()?;
    let (&mode, rest) = bytes.split_first()?;
    Some((mode, rest.first().copied()))
}

/// Whether a reply can belong to the request `sent`.
///
/// A reply carrying frames must contain one answering the request's service
/// and PID, or a negative response to that service. Status-only replies,
/// undecodable text and replies to AT commands always match.
pub fn answers(raw: &str, sent: &str) -> bool {
    let Some((mode, code)) = request_header(sent) else {
        return true;
    };
    let Ok(reply) = decode_lines(raw, sent) else {
        return true;
    };
    reply.frames.is_empty()
        || !payloads(&reply.frames, mode, code).is_empty()
        || negative_response(&reply.frames, mode).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pid::{CLEAR_DTC, GET_DTC, RPM, SPEED};

    #[test]
    fn test_encode() {
        assert_eq!(encode(&RPM), "010C\r");
        assert_eq!(encode(&SPEED), "010D\r");
        assert_eq!(encode(&GET_DTC), "03\r");
        assert_eq!(encode(&CLEAR_DTC), "04\r");
    }

    #[test]
    fn test_echo_round_trip() {
        let command = encode(&RPM);
        let raw = format!("{command}41 0C 1A F8\r\r>");
        let reply = decode_lines(&raw, &command).unwrap();
        let echo = reply.echo.unwrap();
        assert_eq!(format!("{echo}\r"), command);
        assert_eq!(reply.frames.len(), 1);
    }

    #[test]
    fn test_single_frame_without_spaces() {
        let reply = decode_lines("410C1AF8\r\r>", "010C").unwrap();
        assert!(reply.echo.is_none());
        assert_eq!(
            reply.frames,
            vec![RawFrame {
                bytes: vec![0x41, 0x0C, 0x1A, 0xF8],
                is_multiline: false,
                terminator_seen: true,
            }]
        );
    }

    #[test]
    fn test_status_lines_are_not_payload() {
        let reply = decode_lines("SEARCHING...\r41 00 BE 1F A8 13\r\r>", "0100").unwrap();
        assert_eq!(reply.statuses, vec![AdapterStatus::Searching]);
        assert_eq!(reply.frames.len(), 1);
        assert!(reply.error_status().is_none());

        let reply = decode_lines("NO DATA\r\r>", "010C").unwrap();
        assert!(reply.frames.is_empty());
        assert!(reply.is_no_data());
        assert!(reply.error_status().is_none());

        let reply = decode_lines("SEARCHING...\rUNABLE TO CONNECT\r\r>", "0100").unwrap();
        assert_eq!(reply.error_status(), Some(AdapterStatus::UnableToConnect));
    }

    #[test]
    fn test_missing_prompt_recorded() {
        let reply = decode_lines("41 0D 28\r", "010D").unwrap();
        assert!(!reply.frames[0].terminator_seen);
    }

    #[test]
    fn test_malformed_lines() {
        let err = decode_lines("41 0C ZZ F8\r\r>", "010C").unwrap_err();
        assert!(matches!(err, ObdError::MalformedFrame(_)));

        let err = decode_lines("41 0C 1A F\r\r>", "010C").unwrap_err();
        assert!(matches!(err, ObdError::MalformedFrame(_)));
    }

    #[test]
    fn test_multiframe_reassembly() {
        let raw = "014\r\
                   0: 49 02 01 31 44 34\r\
                   1: 47 50 30 30 52 35 35\r\
                   2: 42 31 32 33 34 35 36\r\r>";
        let reply = decode_lines(raw, "0902").unwrap();
        assert_eq!(reply.frames.len(), 1);
        let frame = &reply.frames[0];
        assert!(frame.is_multiline);
        assert_eq!(frame.bytes.len(), 0x14);
        assert_eq!(&frame.bytes[..3], &[0x49, 0x02, 0x01]);
        assert_eq!(frame.bytes.last(), Some(&0x36));
    }

    #[test]
    fn test_multiframe_padding_trimmed() {
        let raw = "008\r0: 43 03 01 33 02 20\r1: 03 00 00 00 00 00 00\r\r>";
        let reply = decode_lines(raw, "03").unwrap();
        assert_eq!(
            reply.frames[0].bytes,
            vec![0x43, 0x03, 0x01, 0x33, 0x02, 0x20, 0x03, 0x00]
        );
    }

    #[test]
    fn test_multiframe_length_disagreement() {
        let short = "014\r0: 49 02 01 31 44 34\r\r>";
        assert!(matches!(
            decode_lines(short, "0902"),
            Err(ObdError::MalformedFrame(_))
        ));

        let out_of_order = "00A\r0: 49 02 01 31 44 34\r2: 47 50 30 30\r\r>";
        assert!(matches!(
            decode_lines(out_of_order, "0902"),
            Err(ObdError::MalformedFrame(_))
        ));

        let orphan = "1: 47 50 30 30\r\r>";
        assert!(decode_lines(orphan, "0902").is_err());
    }

    #[test]
    fn test_text_lines_strip_echo() {
        let lines = text_lines("ATZ\r\r\rELM327 v1.5\r\r>", "ATZ");
        assert_eq!(lines, vec!["ELM327 v1.5".to_string()]);

        let lines = text_lines("12.6V\r\r>", "ATRV\r");
        assert_eq!(lines, vec!["12.6V".to_string()]);
    }

    #[test]
    fn test_payloads_select_matching_frames() {
        let reply = decode_lines("41 0C 1A F8\r41 0D 28\r41 0C 0F A0\r\r>", "010C").unwrap();
        let found = payloads(&reply.frames, 0x01, Some(0x0C));
        assert_eq!(found, vec![vec![0x1A, 0xF8], vec![0x0F, 0xA0]]);

        let reply = decode_lines("43 01 01 33\r43 00\r\r>", "03").unwrap();
        let found = payloads(&reply.frames, 0x03, None);
        assert_eq!(found, vec![vec![0x01, 0x01, 0x33], vec![0x00]]);
    }

    #[test]
    fn test_negative_response() {
        let reply = decode_lines("7F 04 22\r\r>", "04").unwrap();
        assert!(payloads(&reply.frames, 0x04, None).is_empty());
        assert_eq!(negative_response(&reply.frames, 0x04), Some(0x22));
        assert_eq!(negative_response(&reply.frames, 0x01), None);
    }

    #[test]
    fn test_reply_matches_request() {
        assert!(answers("41 0C 1A F8\r\r>", "010C"));
        assert!(answers("010C\r41 0C 1A F8\r\r>", "010C\r"));
        assert!(answers("41 0C 1A F8\r41 0D 28\r\r>", "010D"));
        assert!(answers("7F 01 12\r\r>", "010D"));
        assert!(answers("NO DATA\r\r>", "010D"));
        assert!(answers("43 01 01 33\r\r>", "03"));

        // leftovers from an earlier request
        assert!(!answers("41 0C 1A F8\r\r>", "010D"));
        assert!(!answers("43 01 01 33\r\r>", "04"));
        assert!(!answers("010C\r41 0C 1A F8\r\r>", "010D"));

        // only hex requests are checked
        assert!(answers("41 0C 1A F8\r\r>", "ATRV"));
        assert!(answers("41 0C ZZ\r\r>", "010D"));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(AdapterStatus::parse("no data"), Some(AdapterStatus::NoData));
        assert_eq!(
            AdapterStatus::parse("BUS INIT: ...ERROR"),
            Some(AdapterStatus::BusError)
        );
        assert_eq!(AdapterStatus::parse("BUS INIT: ...OK"), Some(AdapterStatus::BusInit));
        assert_eq!(AdapterStatus::parse("ERR94"), Some(AdapterStatus::InternalError));
        assert_eq!(AdapterStatus::parse("41 0C 1A F8"), None);
        assert!(AdapterStatus::CanError.is_error());
        assert!(!AdapterStatus::Searching.is_error());
    }
}
