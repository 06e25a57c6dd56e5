//! Response Decoding
//!
//! Applies a PID's formula to the payload bytes that follow the mode/PID
//! echo in the vehicle's answer.

use crate::dtc::DtcCode;
use crate::error::ObdError;
use crate::pid::{Formula, Pid, Unit};
use serde::Serialize;

/// Fuel system status bits (SAE J1979 PID 03); exactly one bit is set per system
const FUEL_SYSTEM_STATUS: [(u8, &str); 5] = [
    (0x01, "Open loop due to insufficient engine temperature"),
    (0x02, "Closed loop, using oxygen sensor feedback to determine fuel mix"),
    (0x04, "Open loop due to engine load OR fuel cut due to deceleration"),
    (0x08, "Open loop due to system failure"),
    (
        0x10,
        "Closed loop, using at least one oxygen sensor but there is a fault in the feedback system",
    ),
];

/// A decoded physical value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PhysicalValue {
    Int(i64),
    Float(f64),
    StringCode(String),
    DtcList(Vec<DtcCode>),
    Bitmask(u32),
}

impl PhysicalValue {
    /// Numeric view of `Int` and `Float` values
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PhysicalValue::Int(v) => Some(*v as f64),
            PhysicalValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PhysicalValue::StringCode(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_dtcs(&self) -> Option<&[DtcCode]> {
        match self {
            PhysicalValue::DtcList(codes) => Some(codes),
            _ => None,
        }
    }
}

/// Decoded answer to one PID query.
///
/// A missing value means the vehicle gave no answer; zero is a real reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub pid: Pid,
    pub value: Option<PhysicalValue>,
}

impl Response {
    /// Response carrying no value
    pub fn null(pid: Pid) -> Self {
        Self { pid, value: None }
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    pub fn unit(&self) -> Unit {
        self.pid.unit
    }
}

fn decode_error(pid: &Pid, reason: String) -> ObdError {
    ObdError::Decode {
        pid: pid.name,
        reason,
    }
}

/// Decode a payload (bytes after the mode/PID echo) with the PID's formula
pub fn decode(pid: &Pid, payload: &[u8]) -> Result<Response, ObdError> {
    if !pid.bytes.contains(payload.len()) {
        return Err(decode_error(
            pid,
            format!(
                "expected {}..={} bytes, got {}",
                pid.bytes.min,
                pid.bytes.max,
                payload.len()
            ),
        ));
    }

    let a = payload.first().copied().unwrap_or(0);
    let b = payload.get(1).copied().unwrap_or(0);
    let word = (a as u32 * 256) + b as u32;

    let value = match pid.formula {
        Formula::Rpm => PhysicalValue::Float(word as f64 / 4.0),
        Formula::Direct => PhysicalValue::Int(a as i64),
        Formula::Temperature => PhysicalValue::Int(a as i64 - 40),
        Formula::Percent => PhysicalValue::Float(a as f64 * 100.0 / 255.0),
        Formula::FuelTrim => PhysicalValue::Float((a as f64 - 128.0) * 100.0 / 128.0),
        Formula::Maf => PhysicalValue::Float(word as f64 / 100.0),
        Formula::O2Voltage => PhysicalValue::Float(a as f64 / 200.0),
        Formula::Word => PhysicalValue::Int(word as i64),
        Formula::Bitmask => PhysicalValue::Bitmask(u32::from_be_bytes([
            payload[0], payload[1], payload[2], payload[3],
        ])),
        Formula::FuelStatus => PhysicalValue::StringCode(decode_fuel_status(pid, payload)?),
        Formula::Dtc => PhysicalValue::DtcList(decode_dtcs(pid, payload)?),
        // A cleared ECU stores no codes
        Formula::ClearAck => PhysicalValue::DtcList(Vec::new()),
    };

    Ok(Response {
        pid: *pid,
        value: Some(value),
    })
}

fn fuel_system(bits: u8) -> Option<&'static str> {
    FUEL_SYSTEM_STATUS
        .iter()
        .find(|(mask, _)| *mask == bits)
        .map(|(_, text)| *text)
}

/// System 1 must hold a known status; system 2 is optional (0 = not fitted).
fn decode_fuel_status(pid: &Pid, payload: &[u8]) -> Result<String, ObdError> {
    let system1 = fuel_system(payload[0]).ok_or_else(|| {
        decode_error(pid, format!("unknown fuel system status 0x{:02X}", payload[0]))
    })?;

    match payload.get(1).copied() {
        None | Some(0) => Ok(system1.to_string()),
        Some(bits) => {
            let system2 = fuel_system(bits).ok_or_else(|| {
                decode_error(pid, format!("unknown fuel system 2 status 0x{bits:02X}"))
            })?;
            Ok(format!("{system1} / {system2}"))
        }
    }
}

/// Decode a mode 03 payload from one ECU.
///
/// CAN ECUs prefix the codes with a count byte, which makes the payload odd
/// in length; other protocols send bare pairs padded with `00 00`.
fn decode_dtcs(pid: &Pid, payload: &[u8]) -> Result<Vec<DtcCode>, ObdError> {
    let pairs = if payload.len() % 2 == 1 {
        let count = payload[0] as usize;
        let rest = &payload[1..];
        if rest.len() < count * 2 {
            return Err(decode_error(
                pid,
                format!("{count} codes announced but only {} bytes follow", rest.len()),
            ));
        }
        &rest[..count * 2]
    } else {
        payload
    };

    Ok(pairs
        .chunks_exact(2)
        .filter_map(|pair| DtcCode::from_bytes(pair[0], pair[1]))
        .collect())
}
