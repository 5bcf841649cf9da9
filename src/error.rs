//! # Error Handling
//!
//! Two error layers are used throughout the crate:
//!
//! - [`ModbusError`] covers everything that can go wrong on the wire: socket
//!   failures, timeouts, malformed frames and Modbus exception responses.
//! - [`DriveError`] covers application-level failures of the CSD-MT-94 client:
//!   unknown register names, values that do not fit a register, missing unit
//!   configuration, and drive power-state sequencing failures. Transport
//!   errors are carried unchanged inside [`DriveError::Transport`].
//!
//! ## Error Categories
//!
//! ### Transport Errors
//! - **I/O Errors**: socket read/write failures
//! - **Connection Errors**: connect refused, session dropped
//! - **Timeout Errors**: exchange exceeded the configured timeout
//!
//! ### Protocol Errors
//! - **Frame Errors**: MBAP header or PDU violations
//! - **Exception Responses**: standard Modbus exception codes from the drive
//!
//! ### Drive Errors
//! - **Register Errors**: unknown names, out-of-range values, access violations
//! - **Unit Errors**: physical-unit calls without the required constants
//! - **Sequencing Errors**: the drive did not reach or confirm a requested state
//!
//! ## Usage Examples
//!
//! ```rust
//! use csd_mt94::{DriveError, ModbusError};
//!
//! fn describe(error: &DriveError) -> &'static str {
//!     match error {
//!         DriveError::Transport(inner) if inner.is_transport_error() => "network problem",
//!         DriveError::FaultNotCleared { .. } => "drive stuck in fault",
//!         DriveError::OutOfRange { .. } => "bad value",
//!         _ => "other",
//!     }
//! }
//!
//! let err = DriveError::from(ModbusError::timeout("read holding registers", 5000));
//! assert_eq!(describe(&err), "network problem");
//! ```

use thiserror::Error;

use crate::state::DriveState;

/// Result type alias for transport-level operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Result type alias for drive operations
pub type DriveResult<T> = Result<T, DriveError>;

/// Modbus transport and protocol errors
///
/// Each variant carries enough context to diagnose the failing exchange.
/// These are reported by [`ModbusTransport`](crate::transport::ModbusTransport)
/// implementations and never produced by the drive logic itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    /// I/O related errors
    ///
    /// Low-level socket failures such as a reset connection or a broken pipe.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection errors
    ///
    /// Connection establishment failed, or an exchange was attempted without
    /// an open session.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Timeout errors
    ///
    /// Includes the operation that timed out and the configured limit.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Protocol-level errors
    ///
    /// # Examples
    /// - Response transaction ID does not match the request
    /// - Response echoes a different address than the one written
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Invalid function code
    ///
    /// The response carried a function code this client never sends.
    #[error("Invalid function code: {code}")]
    InvalidFunction { code: u8 },

    /// Invalid address range
    ///
    /// # Examples
    /// - Reading 200 holding registers (max 125)
    /// - Starting address + quantity > 65536
    /// - Zero quantity
    #[error("Invalid address: start={start}, count={count}")]
    InvalidAddress { start: u16, count: u16 },

    /// Invalid data value
    ///
    /// Response payload that does not decode into the expected registers.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Modbus exception response
    ///
    /// Standard exception codes returned by the drive:
    /// - 0x01: Illegal Function
    /// - 0x02: Illegal Data Address
    /// - 0x03: Illegal Data Value
    /// - 0x04: Slave Device Failure
    /// - 0x05: Acknowledge
    /// - 0x06: Slave Device Busy
    #[error("Modbus exception: function={function:02X}, code={code:02X} ({message})")]
    Exception { function: u8, code: u8, message: String },

    /// Frame parsing errors
    ///
    /// # Examples
    /// - Incomplete MBAP header
    /// - Length field larger than a Modbus TCP frame
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Configuration errors
    ///
    /// Host name cannot be resolved, invalid unit id, and similar.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal errors (should not occur in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModbusError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the operation that timed out
    /// * `timeout_ms` - Timeout duration in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Create an invalid function error
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create an invalid address error
    pub fn invalid_address(start: u16, count: u16) -> Self {
        Self::InvalidAddress { start, count }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    /// Create a Modbus exception error
    ///
    /// Maps standard exception codes to human-readable messages.
    ///
    /// # Arguments
    ///
    /// * `function` - Original function code that caused the exception
    /// * `code` - Modbus exception code
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match code {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Slave Device Failure",
            0x05 => "Acknowledge",
            0x06 => "Slave Device Busy",
            0x08 => "Memory Parity Error",
            0x0A => "Gateway Path Unavailable",
            0x0B => "Gateway Target Device Failed to Respond",
            _ => "Unknown Exception",
        }
        .to_string();

        Self::Exception { function, code, message }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if the error is recoverable (the exchange could be repeated)
    ///
    /// The drive client itself never retries a failed exchange; this is a
    /// hint for callers that implement their own policy.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use csd_mt94::ModbusError;
    ///
    /// assert!(ModbusError::timeout("read", 5000).is_recoverable());
    /// assert!(!ModbusError::invalid_function(0x99).is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::Connection { .. } => true,
            Self::Timeout { .. } => true,
            // Acknowledge, Busy
            Self::Exception { code, .. } => matches!(code, 0x05 | 0x06),
            _ => false,
        }
    }

    /// Check if the error is a network/transport issue
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Connection { .. } | Self::Timeout { .. }
        )
    }

    /// Check if the error is a protocol issue
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. }
                | Self::InvalidFunction { .. }
                | Self::Exception { .. }
                | Self::Frame { .. }
        )
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convert from tokio timeout errors
///
/// The elapsed error carries no duration; transports that know their timeout
/// build [`ModbusError::Timeout`] directly.
impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

/// CSD-MT-94 drive client errors
///
/// Every public drive operation either completes with its documented
/// postcondition or fails with one of these variants.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriveError {
    /// A register name that is not part of the register map
    #[error("Unknown register: {name}")]
    UnknownRegister { name: String },

    /// Value does not fit the register's width, signedness or bounds
    #[error("Value {value} out of range for register '{register}' ({min}..={max})")]
    OutOfRange {
        register: String,
        value: i128,
        min: i64,
        max: i64,
    },

    /// A physical-unit conversion without the constant it needs
    #[error("Misconfigured units: {message}")]
    MisconfiguredUnits { message: String },

    /// Argument not accepted by the operation (bad enum value, unit string, ...)
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Read of a write-only register or write of a read-only register
    #[error("Register '{register}' does not permit {operation}")]
    AccessDenied {
        register: String,
        operation: &'static str,
    },

    /// Transport failure, propagated unchanged
    #[error(transparent)]
    Transport(#[from] ModbusError),

    /// Status word that matches no CiA-402 power state
    #[error("Status word 0x{status_word:04X} does not decode to a drive state")]
    InvalidStatusWord { status_word: u16 },

    /// Drive did not reach the target state within the retry bound
    #[error("Drive did not reach {target:?} after {attempts} attempts (last state {last:?})")]
    StateTransitionTimeout {
        target: DriveState,
        last: DriveState,
        attempts: u32,
    },

    /// Drive stayed in Fault after repeated fault resets
    #[error("Drive fault not cleared after {attempts} attempts")]
    FaultNotCleared { attempts: u32 },

    /// Drive never raised the set-point acknowledge bit
    #[error("Set-point not acknowledged after {attempts} status reads")]
    SetpointNotAcknowledged { attempts: u32 },

    /// Motion did not complete within the requested time
    #[error("Timeout after {timeout_ms}ms waiting for {operation}")]
    MotionTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Drive raised the homing error bit
    #[error("Homing failed (status word 0x{status_word:04X})")]
    HomingFailed { status_word: u16 },

    /// Invalid client configuration
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl DriveError {
    /// Create an unknown register error
    pub fn unknown_register<S: Into<String>>(name: S) -> Self {
        Self::UnknownRegister { name: name.into() }
    }

    /// Create an out-of-range error
    ///
    /// # Arguments
    ///
    /// * `register` - Name of the register the value was meant for
    /// * `value` - Offending value, after conversion to native units
    /// * `min`, `max` - Inclusive accepted range
    pub fn out_of_range<S: Into<String>>(register: S, value: i128, min: i64, max: i64) -> Self {
        Self::OutOfRange {
            register: register.into(),
            value,
            min,
            max,
        }
    }

    /// Create a misconfigured units error
    pub fn misconfigured_units<S: Into<String>>(message: S) -> Self {
        Self::MisconfiguredUnits { message: message.into() }
    }

    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    /// Create an access denied error
    pub fn access_denied<S: Into<String>>(register: S, operation: &'static str) -> Self {
        Self::AccessDenied {
            register: register.into(),
            operation,
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    /// Check if the failure came from the transport layer
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Check if the failure was detected before any exchange with the drive
    ///
    /// Validation errors are raised while building the request, so the drive
    /// has not been touched.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownRegister { .. }
                | Self::OutOfRange { .. }
                | Self::MisconfiguredUnits { .. }
                | Self::InvalidArgument { .. }
                | Self::AccessDenied { .. }
                | Self::Config { .. }
        )
    }
}

/// Convert from serde JSON errors (configuration files)
impl From<serde_json::Error> for DriveError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(format!("JSON error: {}", err))
    }
}
