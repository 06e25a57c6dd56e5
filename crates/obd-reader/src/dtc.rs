//! Diagnostic Trouble Codes
//!
//! Two-byte SAE encoding: the top two bits of the first byte select the
//! system letter, the next two bits are the first digit, and the remaining
//! three nibbles are hex digits.

use serde::Serialize;
use std::fmt;

/// System a trouble code belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DtcLetter {
    /// Powertrain
    P,
    /// Chassis
    C,
    /// Body
    B,
    /// Network
    U,
}

impl DtcLetter {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => DtcLetter::P,
            1 => DtcLetter::C,
            2 => DtcLetter::B,
            _ => DtcLetter::U,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            DtcLetter::P => 'P',
            DtcLetter::C => 'C',
            DtcLetter::B => 'B',
            DtcLetter::U => 'U',
        }
    }
}

/// A decoded trouble code such as `P0133`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DtcCode {
    pub letter: DtcLetter,
    /// The four characters after the letter
    pub digits: String,
    pub description: Option<&'static str>,
}

impl DtcCode {
    /// Decode one two-byte code. `00 00` is padding and yields `None`.
    pub fn from_bytes(a: u8, b: u8) -> Option<Self> {
        if a == 0 && b == 0 {
            return None;
        }
        let letter = DtcLetter::from_bits(a >> 6);
        let digits = format!("{}{:X}{:X}{:X}", (a >> 4) & 0x03, a & 0x0F, b >> 4, b & 0x0F);
        let description = describe(&format!("{}{}", letter.as_char(), digits));
        Some(Self {
            letter,
            digits,
            description,
        })
    }

    /// Full code string, e.g. `"P0133"`
    pub fn code(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DtcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.letter.as_char(), self.digits)
    }
}

/// Look up the generic description of a code. Case-insensitive.
pub fn describe(code: &str) -> Option<&'static str> {
    let description = match code.to_ascii_uppercase().as_str() {
        // Fuel and air metering
        "P0100" => "Mass or Volume Air Flow Circuit Malfunction",
        "P0101" => "Mass or Volume Air Flow Circuit Range/Performance",
        "P0102" => "Mass or Volume Air Flow Circuit Low Input",
        "P0103" => "Mass or Volume Air Flow Circuit High Input",
        "P0110" => "Intake Air Temperature Circuit Malfunction",
        "P0115" => "Engine Coolant Temperature Circuit Malfunction",
        "P0116" => "Engine Coolant Temperature Circuit Range/Performance",
        "P0117" => "Engine Coolant Temperature Circuit Low Input",
        "P0118" => "Engine Coolant Temperature Circuit High Input",
        "P0120" => "Throttle Position Sensor Circuit Malfunction",
        "P0128" => "Coolant Thermostat Below Regulating Temperature",
        "P0130" => "O2 Sensor Circuit Malfunction (Bank 1, Sensor 1)",
        "P0131" => "O2 Sensor Circuit Low Voltage (Bank 1, Sensor 1)",
        "P0132" => "O2 Sensor Circuit High Voltage (Bank 1, Sensor 1)",
        "P0133" => "O2 Sensor Circuit Slow Response (Bank 1, Sensor 1)",
        "P0134" => "O2 Sensor Circuit No Activity Detected (Bank 1, Sensor 1)",
        "P0171" => "System Too Lean (Bank 1)",
        "P0172" => "System Too Rich (Bank 1)",
        "P0174" => "System Too Lean (Bank 2)",
        "P0175" => "System Too Rich (Bank 2)",
        // Ignition and misfire
        "P0300" => "Random/Multiple Cylinder Misfire Detected",
        "P0301" => "Cylinder 1 Misfire Detected",
        "P0302" => "Cylinder 2 Misfire Detected",
        "P0303" => "Cylinder 3 Misfire Detected",
        "P0304" => "Cylinder 4 Misfire Detected",
        "P0325" => "Knock Sensor 1 Circuit Malfunction",
        "P0335" => "Crankshaft Position Sensor A Circuit Malfunction",
        "P0340" => "Camshaft Position Sensor Circuit Malfunction",
        // Emission controls
        "P0401" => "Exhaust Gas Recirculation Flow Insufficient Detected",
        "P0420" => "Catalyst System Efficiency Below Threshold (Bank 1)",
        "P0430" => "Catalyst System Efficiency Below Threshold (Bank 2)",
        "P0440" => "Evaporative Emission Control System Malfunction",
        "P0442" => "Evaporative Emission Control System Leak Detected (small leak)",
        "P0455" => "Evaporative Emission Control System Leak Detected (gross leak)",
        // Speed and idle control
        "P0500" => "Vehicle Speed Sensor Malfunction",
        "P0505" => "Idle Control System Malfunction",
        // Computer and transmission
        "P0562" => "System Voltage Low",
        "P0563" => "System Voltage High",
        "P0600" => "Serial Communication Link Malfunction",
        "P0700" => "Transmission Control System Malfunction",
        // Network
        "U0100" => "Lost Communication With ECM/PCM",
        "U0101" => "Lost Communication With TCM",
        _ => return None,
    };
    Some(description)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_powertrain_code() {
        let dtc = DtcCode::from_bytes(0x01, 0x33).unwrap();
        assert_eq!(dtc.letter, DtcLetter::P);
        assert_eq!(dtc.digits, "0133");
        assert_eq!(dtc.to_string(), "P0133");
        assert_eq!(
            dtc.description,
            Some("O2 Sensor Circuit Slow Response (Bank 1, Sensor 1)")
        );
    }

    #[test]
    fn test_letter_bits() {
        assert_eq!(DtcCode::from_bytes(0x41, 0x23).unwrap().code(), "C0123");
        assert_eq!(DtcCode::from_bytes(0x9A, 0xBC).unwrap().code(), "B1ABC");
        assert_eq!(DtcCode::from_bytes(0xC1, 0x00).unwrap().code(), "U0100");
        assert_eq!(DtcCode::from_bytes(0xF0, 0x01).unwrap().code(), "U3001");
    }

    #[test]
    fn test_padding_pair() {
        assert!(DtcCode::from_bytes(0x00, 0x00).is_none());
        assert_eq!(DtcCode::from_bytes(0x00, 0x01).unwrap().code(), "P0001");
    }

    #[test]
    fn test_describe_unknown() {
        assert_eq!(describe("p0300"), Some("Random/Multiple Cylinder Misfire Detected"));
        assert!(describe("P1234").is_none());
        assert!(DtcCode::from_bytes(0x12, 0x34).unwrap().description.is_none());
    }
}
