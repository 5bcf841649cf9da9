//! # csd-mt94 - Modbus TCP client for the RTA CSD-MT-94 stepper drive
//!
//! Commands motion on a CSD-MT-94 (absolute and relative moves, velocity mode,
//! homing) and reads back its status without the caller knowing the register
//! map. The drive follows the CiA-402 power state machine, which this crate
//! models explicitly so every move is sequenced from a known state.
//!
//! ## Features
//!
//! - **Typed register map**: every register is a named descriptor with width,
//!   signedness, access and bounds; values are checked before they are sent
//! - **Unit conversion**: steps, degrees, radians, revolutions, RPM and
//!   millimetres, rounded half to even
//! - **CiA-402 state machine**: status word decoding, transition table and a
//!   bounded `ensure_operation_enabled` that resets faults first
//! - **Set-point handshake**: target writes in one exchange, followed by the
//!   new set-point / acknowledge handshake
//! - **Async**: Tokio based, with the transport behind a trait
//! - **Simulator**: an in-process drive for tests, in memory or over TCP
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Used for |
//! |------|----------|----------|
//! | 0x03 | Read Holding Registers | every read |
//! | 0x06 | Write Single Register | 16-bit writes |
//! | 0x10 | Write Multiple Registers | 32-bit pairs |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use csd_mt94::{CoordinateSystem, CsdMt94, DriveConfig, DriveResult, Unit};
//!
//! #[tokio::main]
//! async fn main() -> DriveResult<()> {
//!     let config = DriveConfig::new("192.168.1.100");
//!     let mut drive = CsdMt94::new(config)?;
//!     drive.connect().await?;
//!
//!     // Steps per revolution straight from the drive
//!     drive.sync_steps_per_revolution().await?;
//!
//!     drive.move_position(25600, CoordinateSystem::Relative).await?;
//!     drive.rotate(0.0, CoordinateSystem::Absolute, Unit::Degrees).await?;
//!
//!     println!("state: {}", drive.read_state().await?);
//!     println!("fault: {}", drive.error_code().await?);
//!
//!     drive.disconnect().await
//! }
//! ```
//!
//! With the `simulator` feature, `CsdMt94::with_transport` accepts a
//! `SimulatedTransport`, and `DriveSimulator` serves the same drive model
//! over a local TCP socket.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  CsdMt94                     │
//! │   power · parameters · service · motion      │
//! └──────────────────────────────────────────────┘
//!      │              │                 │
//! ┌──────────┐  ┌────────────┐  ┌──────────────────┐
//! │  Units   │  │Register Map│  │  State Machine   │
//! │Converter │  │ (static)   │  │    (CiA-402)     │
//! └──────────┘  └────────────┘  └──────────────────┘
//!                     │                 │
//!              ┌─────────────────────────────┐
//!              │       Register Client       │
//!              │ word order · access · logs  │
//!              └─────────────────────────────┘
//!                            │
//!              ┌─────────────────────────────┐
//!              │  ModbusTransport (trait)    │
//!              │ TcpTransport │ Simulated    │
//!              └─────────────────────────────┘
//! ```

/// Transport and drive error types
pub mod error;

/// Modbus PDU definitions and register data helpers
pub mod protocol;

/// Modbus TCP transport
pub mod transport;

/// Typed register access over a transport
pub mod client;

/// CSD-MT-94 register table
pub mod register_map;

/// Native count and physical unit conversion
pub mod units;

/// CiA-402 power state machine
pub mod state;

/// Drive client configuration
pub mod config;

/// Command facade
pub mod drive;

/// Callback logging for register exchanges
pub mod logging;

/// In-process drive simulator
#[cfg(feature = "simulator")]
pub mod simulator;

// Re-export main types for convenience
pub use client::RegisterClient;
pub use config::DriveConfig;
pub use drive::{
    AlarmEvent, CsdMt94, DeviceInfo, DriveFault, EncoderWindow, FollowingErrorReaction, ModeOfOperation,
    MotionOptions, NetworkSettings, RevolutionDirection,
};
pub use error::{DriveError, DriveResult, ModbusError, ModbusResult};
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};
pub use protocol::{ModbusFunction, ModbusRequest, ModbusResponse};
pub use register_map::{RegisterBlock, RegisterDescriptor, RegisterMap};
pub use state::{ControlCommand, ControlWord, DriveState, DriveStateMachine, StatusWord};
pub use transport::{ModbusTransport, TcpTransport, TransportStats};
pub use units::{CoordinateSystem, Unit, UnitConverter};

#[cfg(feature = "simulator")]
pub use simulator::{DriveModel, DriveSimulator, Exchange, SimulatedTransport};

/// Default timeout for operations (5 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Maximum number of registers that can be read in a single request
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

/// Maximum number of registers that can be written in a single request
pub const MAX_REGISTERS_PER_WRITE: u16 = 123;

/// Maximum Modbus TCP frame size (MBAP header + PDU)
pub const MAX_TCP_FRAME_SIZE: usize = 260;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Factory unit id of the drive
pub const DEFAULT_UNIT_ID: u8 = 1;

/// Bound of the enable-operation loop
pub const DEFAULT_TRANSITION_ATTEMPTS: u32 = 10;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("csd-mt94 v{} - Modbus TCP client for the RTA CSD-MT-94 stepper drive", VERSION)
}
