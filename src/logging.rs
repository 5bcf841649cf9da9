use std::sync::Arc;

use crate::protocol::{ModbusFunction, ModbusRequest};
use crate::register_map::RegisterMap;

/// Log levels for the callback logging system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Error messages
    Error,
    /// Warning messages
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
}

/// Logging mode for exchange display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Show the raw PDU only
    Raw,
    /// Show register names and decoded values
    Interpreted,
    /// Show both raw and interpreted data
    Both,
}

impl LogLevel {
    /// Convert log level to string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Type alias for log callback functions
///
/// The callback receives a log level and message string
pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logger that uses callbacks for flexible logging
///
/// The register client reports every exchange here. By default the logger is
/// disabled; attach one with
/// [`CsdMt94::set_logger`](crate::drive::CsdMt94::set_logger).
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
    mode: LoggingMode,
}

impl CallbackLogger {
    /// Create a new callback logger
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode: LoggingMode::Interpreted,
        }
    }

    /// Create a new callback logger with specific mode
    pub fn with_mode(callback: Option<LogCallback>, min_level: LogLevel, mode: LoggingMode) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode,
        }
    }

    /// Create a logger with default console output
    pub fn console() -> Self {
        let callback: LogCallback = Box::new(|level, message| {
            let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
            match level {
                LogLevel::Error | LogLevel::Warn => eprintln!("[{}] {}: {}", timestamp, level.as_str(), message),
                LogLevel::Info | LogLevel::Debug => println!("[{}] {}: {}", timestamp, level.as_str(), message),
            }
        });
        Self::new(Some(callback), LogLevel::Info)
    }

    /// Create a logger that outputs nothing (disabled)
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    /// Set logging mode
    pub fn set_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
    }

    /// Get current logging mode
    pub fn get_mode(&self) -> LoggingMode {
        self.mode
    }

    /// Log a message at the specified level
    pub fn log(&self, level: LogLevel, message: &str) {
        if self.should_log(level) {
            if let Some(ref callback) = self.callback {
                callback(level, message);
            }
        }
    }

    /// Log an error message
    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    /// Log a warning message
    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    /// Log an info message
    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    /// Log a debug message
    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    /// Check if a message at the given level should be logged
    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level as u8 <= self.min_level as u8
    }

    /// Log an outgoing register request
    pub fn log_request(&self, request: &ModbusRequest) {
        if !self.should_log(LogLevel::Info) && !self.should_log(LogLevel::Debug) {
            return;
        }

        let interpreted = || {
            let detail = if request.function.is_write_function() {
                format!("Values: {}", describe_registers(request.address, &request.values))
            } else {
                format!("Quantity: {}", request.quantity)
            };
            format!(
                "Modbus Request -> Unit: {}, Function: {}, Register: {}, {}",
                request.unit_id,
                request.function,
                describe_address(request.address),
                detail
            )
        };
        let raw = || format!("Modbus Request -> Raw: {}", hex::encode_upper(request.encode_pdu()));

        self.emit(interpreted, raw);
    }

    /// Log the registers returned for a read, or confirmed by a write
    pub fn log_response(&self, function: ModbusFunction, address: u16, registers: &[u16]) {
        if !self.should_log(LogLevel::Info) && !self.should_log(LogLevel::Debug) {
            return;
        }

        let interpreted = || {
            format!(
                "Modbus Response <- Function: {}, {}",
                function,
                describe_registers(address, registers)
            )
        };
        let raw = || {
            let bytes = crate::protocol::data_utils::registers_to_bytes(registers);
            format!("Modbus Response <- Raw: {}", hex::encode_upper(bytes))
        };

        self.emit(interpreted, raw);
    }

    fn emit(&self, interpreted: impl Fn() -> String, raw: impl Fn() -> String) {
        match self.mode {
            LoggingMode::Raw => self.info(&raw()),
            LoggingMode::Interpreted => self.info(&interpreted()),
            LoggingMode::Both => {
                self.info(&interpreted());
                self.debug(&raw());
            }
        }
    }
}

/// Register name and address, e.g. `control_word (1040)`
fn describe_address(address: u16) -> String {
    match RegisterMap::describe_address(address) {
        Some(name) => format!("{} ({})", name, address),
        None => format!("{}", address),
    }
}

/// Register values labelled with register names where known
fn describe_registers(address: u16, registers: &[u16]) -> String {
    registers
        .iter()
        .enumerate()
        .map(|(offset, value)| {
            let register = address.wrapping_add(offset as u16);
            match RegisterMap::describe_address(register) {
                Some(name) => format!("{}[{}]=0x{:04X}", name, register, value),
                None => format!("[{}]=0x{:04X}", register, value),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Convenience macro for creating a simple console logger
#[macro_export]
macro_rules! console_logger {
    () => {
        $crate::logging::CallbackLogger::console()
    };
}

/// Convenience macro for creating a custom logger
#[macro_export]
macro_rules! custom_logger {
    ($callback:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $crate::logging::LogLevel::Info)
    };
    ($callback:expr, $level:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $level)
    };
    ($callback:expr, $level:expr, $mode:expr) => {
        $crate::logging::CallbackLogger::with_mode(Some($callback), $level, $mode)
    };
}
