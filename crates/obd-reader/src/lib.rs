//! OBD-II Diagnostics over ELM327
//!
//! This crate provides async communication with ELM327-compatible OBD-II
//! adapters over serial ports or TCP bridges: adapter initialization,
//! supported-PID discovery, live sensor readings and trouble codes.
//!
//! ```no_run
//! use obd_reader::{ClientConfig, ObdClient};
//!
//! # async fn run() -> Result<(), obd_reader::ObdError> {
//! let client = ObdClient::new(ClientConfig::load(None)?);
//! client.connect().await?;
//! if let Some(rpm) = client.get_rpm().await? {
//!     println!("{rpm} rpm");
//! }
//! for code in client.read_dtc_codes().await? {
//!     println!("{code}");
//! }
//! client.close().await;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod codec;
pub mod config;
pub mod decoder;
pub mod dtc;
mod error;
mod logging;
pub mod mock;
pub mod pid;
mod protocol;
pub mod session;
pub mod transport;

pub use client::ObdClient;
pub use crate::config::{ClientConfig, LoggingConfig, RetryConfig, SerialConfig, SessionConfig};
pub use decoder::{PhysicalValue, Response};
pub use dtc::DtcCode;
pub use error::ObdError;
pub use logging::init_logging;
pub use mock::MockTransport;
pub use pid::{Pid, SupportedCommandSet, Unit};
pub use protocol::ObdProtocol;
pub use session::{AdapterSession, SessionState};
pub use transport::{SerialTransport, StreamTransport, TcpTransport, Transport};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Freeze frame data
    pub const FREEZE_FRAME: u8 = 0x02;
    /// Diagnostic trouble codes
    pub const READ_DTC: u8 = 0x03;
    /// Clear trouble codes
    pub const CLEAR_DTC: u8 = 0x04;
    /// Vehicle information
    pub const VEHICLE_INFO: u8 = 0x09;
}
