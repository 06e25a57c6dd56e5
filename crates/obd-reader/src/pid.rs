//! OBD-II PID Definitions
//!
//! Static table of the SAE J1979 parameters this client understands, plus
//! decoding of the mode 01 "supported PIDs" bitmasks.

use crate::error::ObdError;
use crate::mode;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Physical unit of a decoded value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Unit {
    Rpm,
    Kph,
    Celsius,
    Percent,
    GramsPerSec,
    Kpa,
    Volts,
    Seconds,
    None,
}

impl Unit {
    /// Short display symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Rpm => "rpm",
            Unit::Kph => "km/h",
            Unit::Celsius => "°C",
            Unit::Percent => "%",
            Unit::GramsPerSec => "g/s",
            Unit::Kpa => "kPa",
            Unit::Volts => "V",
            Unit::Seconds => "s",
            Unit::None => "",
        }
    }
}

/// Byte-level formula applied to a response payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Formula {
    /// 32-bit "PIDs supported" bitmask
    Bitmask,
    /// Fuel system status enumeration
    FuelStatus,
    /// ((A*256)+B)/4
    Rpm,
    /// A
    Direct,
    /// A-40
    Temperature,
    /// A*100/255
    Percent,
    /// (A-128)*100/128
    FuelTrim,
    /// ((A*256)+B)/100
    Maf,
    /// A/200
    O2Voltage,
    /// (A*256)+B
    Word,
    /// Two bytes per trouble code
    Dtc,
    /// Empty acknowledgement of a clear request
    ClearAck,
}

/// Inclusive range of payload lengths a PID may answer with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ByteRange {
    pub min: u8,
    pub max: u8,
}

impl ByteRange {
    pub const fn exactly(n: u8) -> Self {
        Self { min: n, max: n }
    }

    pub fn contains(&self, len: usize) -> bool {
        len >= self.min as usize && len <= self.max as usize
    }
}

/// A request the adapter can be asked, with everything needed to decode the answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Pid {
    /// OBD-II service number
    pub mode: u8,
    /// Parameter code; `None` for services that take no PID (03, 04)
    pub code: Option<u8>,
    pub name: &'static str,
    pub description: &'static str,
    /// Payload length after the mode/PID echo
    pub bytes: ByteRange,
    pub formula: Formula,
    pub unit: Unit,
}

const fn current(
    code: u8,
    name: &'static str,
    description: &'static str,
    bytes: ByteRange,
    formula: Formula,
    unit: Unit,
) -> Pid {
    Pid {
        mode: mode::CURRENT_DATA,
        code: Some(code),
        name,
        description,
        bytes,
        formula,
        unit,
    }
}

const fn support(code: u8, name: &'static str, description: &'static str) -> Pid {
    current(code, name, description, ByteRange::exactly(4), Formula::Bitmask, Unit::None)
}

pub const PIDS_A: Pid = support(0x00, "PIDS_A", "Supported PIDs [01-20]");
pub const PIDS_B: Pid = support(0x20, "PIDS_B", "Supported PIDs [21-40]");
pub const PIDS_C: Pid = support(0x40, "PIDS_C", "Supported PIDs [41-60]");
pub const PIDS_D: Pid = support(0x60, "PIDS_D", "Supported PIDs [61-80]");
pub const PIDS_E: Pid = support(0x80, "PIDS_E", "Supported PIDs [81-A0]");
pub const PIDS_F: Pid = support(0xA0, "PIDS_F", "Supported PIDs [A1-C0]");
pub const PIDS_G: Pid = support(0xC0, "PIDS_G", "Supported PIDs [C1-E0]");

pub const FUEL_STATUS: Pid = current(
    0x03,
    "FUEL_STATUS",
    "Fuel system status",
    ByteRange { min: 1, max: 2 },
    Formula::FuelStatus,
    Unit::None,
);
pub const ENGINE_LOAD: Pid = current(
    0x04,
    "ENGINE_LOAD",
    "Calculated engine load",
    ByteRange::exactly(1),
    Formula::Percent,
    Unit::Percent,
);
pub const COOLANT_TEMP: Pid = current(
    0x05,
    "COOLANT_TEMP",
    "Engine coolant temperature",
    ByteRange::exactly(1),
    Formula::Temperature,
    Unit::Celsius,
);
pub const SHORT_FUEL_TRIM_1: Pid = current(
    0x06,
    "SHORT_FUEL_TRIM_1",
    "Short term fuel trim - bank 1",
    ByteRange::exactly(1),
    Formula::FuelTrim,
    Unit::Percent,
);
pub const LONG_FUEL_TRIM_1: Pid = current(
    0x07,
    "LONG_FUEL_TRIM_1",
    "Long term fuel trim - bank 1",
    ByteRange::exactly(1),
    Formula::FuelTrim,
    Unit::Percent,
);
pub const INTAKE_PRESSURE: Pid = current(
    0x0B,
    "INTAKE_PRESSURE",
    "Intake manifold absolute pressure",
    ByteRange::exactly(1),
    Formula::Direct,
    Unit::Kpa,
);
pub const RPM: Pid = current(
    0x0C,
    "RPM",
    "Engine RPM",
    ByteRange::exactly(2),
    Formula::Rpm,
    Unit::Rpm,
);
pub const SPEED: Pid = current(
    0x0D,
    "SPEED",
    "Vehicle speed",
    ByteRange::exactly(1),
    Formula::Direct,
    Unit::Kph,
);
pub const INTAKE_TEMP: Pid = current(
    0x0F,
    "INTAKE_TEMP",
    "Intake air temperature",
    ByteRange::exactly(1),
    Formula::Temperature,
    Unit::Celsius,
);
pub const MAF: Pid = current(
    0x10,
    "MAF",
    "Mass air flow rate",
    ByteRange::exactly(2),
    Formula::Maf,
    Unit::GramsPerSec,
);
pub const THROTTLE_POS: Pid = current(
    0x11,
    "THROTTLE_POS",
    "Throttle position",
    ByteRange::exactly(1),
    Formula::Percent,
    Unit::Percent,
);
pub const O2_B1S1: Pid = current(
    0x14,
    "O2_B1S1",
    "O2 sensor voltage - bank 1, sensor 1",
    ByteRange::exactly(2),
    Formula::O2Voltage,
    Unit::Volts,
);
pub const RUN_TIME: Pid = current(
    0x1F,
    "RUN_TIME",
    "Engine run time",
    ByteRange::exactly(2),
    Formula::Word,
    Unit::Seconds,
);
pub const FUEL_LEVEL: Pid = current(
    0x2F,
    "FUEL_LEVEL",
    "Fuel tank level input",
    ByteRange::exactly(1),
    Formula::Percent,
    Unit::Percent,
);
pub const BAROMETRIC_PRESSURE: Pid = current(
    0x33,
    "BAROMETRIC_PRESSURE",
    "Barometric pressure",
    ByteRange::exactly(1),
    Formula::Direct,
    Unit::Kpa,
);
pub const AMBIENT_AIR_TEMP: Pid = current(
    0x46,
    "AMBIENT_AIR_TEMP",
    "Ambient air temperature",
    ByteRange::exactly(1),
    Formula::Temperature,
    Unit::Celsius,
);

pub const GET_DTC: Pid = Pid {
    mode: mode::READ_DTC,
    code: None,
    name: "GET_DTC",
    description: "Get stored diagnostic trouble codes",
    bytes: ByteRange { min: 0, max: u8::MAX },
    formula: Formula::Dtc,
    unit: Unit::None,
};

pub const CLEAR_DTC: Pid = Pid {
    mode: mode::CLEAR_DTC,
    code: None,
    name: "CLEAR_DTC",
    description: "Clear trouble codes and malfunction indicator lamp",
    bytes: ByteRange::exactly(0),
    formula: Formula::ClearAck,
    unit: Unit::None,
};

static TABLE: [Pid; 25] = [
    PIDS_A,
    FUEL_STATUS,
    ENGINE_LOAD,
    COOLANT_TEMP,
    SHORT_FUEL_TRIM_1,
    LONG_FUEL_TRIM_1,
    INTAKE_PRESSURE,
    RPM,
    SPEED,
    INTAKE_TEMP,
    MAF,
    THROTTLE_POS,
    O2_B1S1,
    RUN_TIME,
    PIDS_B,
    FUEL_LEVEL,
    BAROMETRIC_PRESSURE,
    PIDS_C,
    AMBIENT_AIR_TEMP,
    PIDS_D,
    PIDS_E,
    PIDS_F,
    PIDS_G,
    GET_DTC,
    CLEAR_DTC,
];

/// Block bases of the mode 01 support bitmasks, in query order
pub const SUPPORT_BLOCKS: [u8; 7] = [0x00, 0x20, 0x40, 0x60, 0x80, 0xA0, 0xC0];

/// All known PIDs
pub fn all() -> &'static [Pid] {
    &TABLE
}

/// Find the table entry for a service and parameter code
pub fn lookup(mode: u8, code: Option<u8>) -> Option<&'static Pid> {
    TABLE.iter().find(|pid| pid.mode == mode && pid.code == code)
}

fn bitmask_word(base: u8, bitmask: &[u8]) -> Result<u32, ObdError> {
    let bytes: [u8; 4] = bitmask.try_into().map_err(|_| ObdError::Decode {
        pid: lookup(mode::CURRENT_DATA, Some(base)).map_or("PIDS", |p| p.name),
        reason: format!("support bitmask must be 4 bytes, got {}", bitmask.len()),
    })?;
    Ok(u32::from_be_bytes(bytes))
}

/// PID codes advertised by one support bitmask.
///
/// Bit 31-i (MSB first) set means PID `base + i + 1` is supported.
pub fn supported_codes(base: u8, bitmask: &[u8]) -> Result<Vec<u8>, ObdError> {
    let word = bitmask_word(base, bitmask)?;
    Ok((0..32u8)
        .filter(|i| word & (1 << (31 - i)) != 0)
        .filter_map(|i| base.checked_add(i + 1))
        .collect())
}

/// Known PIDs advertised by one support bitmask, in code order
pub fn supported_subset(base: u8, bitmask: &[u8]) -> Result<Vec<&'static Pid>, ObdError> {
    Ok(supported_codes(base, bitmask)?
        .into_iter()
        .filter_map(|code| lookup(mode::CURRENT_DATA, Some(code)))
        .collect())
}

/// Whether a bitmask advertises the next block's own support PID (its last bit)
pub fn next_block_supported(base: u8, bitmask: &[u8]) -> Result<bool, ObdError> {
    Ok(bitmask_word(base, bitmask)? & 1 == 1)
}

/// Commands the connected vehicle answers, discovered once at connect time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SupportedCommandSet {
    pids: BTreeMap<(u8, Option<u8>), &'static Pid>,
    advertised: BTreeSet<u8>,
}

impl SupportedCommandSet {
    /// Set holding only what every compliant vehicle answers
    pub fn new() -> Self {
        let mut set = Self::default();
        for pid in [&PIDS_A, &GET_DTC, &CLEAR_DTC] {
            set.insert(pid);
        }
        set
    }

    fn insert(&mut self, pid: &'static Pid) {
        self.pids.insert((pid.mode, pid.code), pid);
    }

    /// Merge one support bitmask; returns whether the next block should be queried
    pub fn absorb(&mut self, base: u8, bitmask: &[u8]) -> Result<bool, ObdError> {
        self.advertised.extend(supported_codes(base, bitmask)?);
        for pid in supported_subset(base, bitmask)? {
            self.insert(pid);
        }
        next_block_supported(base, bitmask)
    }

    pub fn contains(&self, pid: &Pid) -> bool {
        self.pids.contains_key(&(pid.mode, pid.code))
    }

    /// Whether the vehicle advertised a mode 01 code, known to the table or not
    pub fn is_advertised(&self, code: u8) -> bool {
        self.advertised.contains(&code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static Pid> + '_ {
        self.pids.values().copied()
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }
}
