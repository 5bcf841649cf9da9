/// Modbus protocol definitions and data structures
///
/// Only the holding-register function codes are modelled: the CSD-MT-94
/// exposes every parameter, command and status value as a holding register.
/// The same request/response types are used by the client transport and by
/// the drive simulator, so PDU encoding exists in both directions.

use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{ModbusError, ModbusResult};

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus unit identifier (1-247)
pub type UnitId = u8;

/// Modbus function codes used by the drive client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl ModbusFunction {
    /// Convert from u8 to ModbusFunction
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x06 => Ok(ModbusFunction::WriteSingleRegister),
            0x10 => Ok(ModbusFunction::WriteMultipleRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a write function
    pub fn is_write_function(self) -> bool {
        matches!(
            self,
            ModbusFunction::WriteSingleRegister | ModbusFunction::WriteMultipleRegisters
        )
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
}

impl ModbusException {
    /// Convert from u8 to ModbusException
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalFunction),
            0x02 => Some(ModbusException::IllegalDataAddress),
            0x03 => Some(ModbusException::IllegalDataValue),
            0x04 => Some(ModbusException::ServerDeviceFailure),
            0x05 => Some(ModbusException::Acknowledge),
            0x06 => Some(ModbusException::ServerDeviceBusy),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus Exception 0x{:02X} ({:?})", self.to_u8(), self)
    }
}

/// Modbus request structure
///
/// `values` is empty for reads. For writes, `quantity` always equals
/// `values.len()`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusRequest {
    pub unit_id: UnitId,
    pub function: ModbusFunction,
    pub address: ModbusAddress,
    pub quantity: u16,
    pub values: Vec<u16>,
}

impl ModbusRequest {
    /// Create a read holding registers request
    pub fn read_holding_registers(unit_id: UnitId, address: ModbusAddress, quantity: u16) -> Self {
        Self {
            unit_id,
            function: ModbusFunction::ReadHoldingRegisters,
            address,
            quantity,
            values: Vec::new(),
        }
    }

    /// Create a register write request
    ///
    /// A single value is sent as Write Single Register (0x06), anything longer
    /// as Write Multiple Registers (0x10), so that a 32-bit pair always lands
    /// in one atomic exchange.
    pub fn write_registers(unit_id: UnitId, address: ModbusAddress, values: &[u16]) -> Self {
        let function = if values.len() == 1 {
            ModbusFunction::WriteSingleRegister
        } else {
            ModbusFunction::WriteMultipleRegisters
        };

        Self {
            unit_id,
            function,
            address,
            quantity: values.len() as u16,
            values: values.to_vec(),
        }
    }

    /// Validate the request against Modbus limits
    pub fn validate(&self) -> ModbusResult<()> {
        if self.unit_id == 0 || self.unit_id > 247 {
            return Err(ModbusError::invalid_data(format!(
                "Invalid unit ID: {}",
                self.unit_id
            )));
        }

        let max = match self.function {
            ModbusFunction::ReadHoldingRegisters => crate::MAX_REGISTERS_PER_REQUEST,
            ModbusFunction::WriteSingleRegister => 1,
            ModbusFunction::WriteMultipleRegisters => crate::MAX_REGISTERS_PER_WRITE,
        };

        if self.quantity == 0 || self.quantity > max {
            return Err(ModbusError::invalid_address(self.address, self.quantity));
        }

        if (self.address as u32 + self.quantity as u32) > 65536 {
            return Err(ModbusError::invalid_address(self.address, self.quantity));
        }

        if self.function.is_write_function() && self.values.len() != self.quantity as usize {
            return Err(ModbusError::invalid_data(format!(
                "Quantity {} does not match {} values",
                self.quantity,
                self.values.len()
            )));
        }

        Ok(())
    }

    /// Encode the PDU (function code + data, without unit id)
    pub fn encode_pdu(&self) -> Vec<u8> {
        let mut pdu = Vec::with_capacity(6 + self.values.len() * 2);
        pdu.push(self.function.to_u8());
        pdu.extend_from_slice(&self.address.to_be_bytes());

        match self.function {
            ModbusFunction::ReadHoldingRegisters => {
                pdu.extend_from_slice(&self.quantity.to_be_bytes());
            }
            ModbusFunction::WriteSingleRegister => {
                let value = self.values.first().copied().unwrap_or(0);
                pdu.extend_from_slice(&value.to_be_bytes());
            }
            ModbusFunction::WriteMultipleRegisters => {
                pdu.extend_from_slice(&self.quantity.to_be_bytes());
                pdu.push((self.values.len() * 2) as u8);
                pdu.extend_from_slice(&data_utils::registers_to_bytes(&self.values));
            }
        }

        pdu
    }

    /// Decode a request PDU (server side)
    pub fn decode_pdu(unit_id: UnitId, pdu: &[u8]) -> ModbusResult<Self> {
        if pdu.len() < 5 {
            return Err(ModbusError::frame("Request PDU too short"));
        }

        let function = ModbusFunction::from_u8(pdu[0])?;
        let address = u16::from_be_bytes([pdu[1], pdu[2]]);
        let word = u16::from_be_bytes([pdu[3], pdu[4]]);

        let request = match function {
            ModbusFunction::ReadHoldingRegisters => {
                Self::read_holding_registers(unit_id, address, word)
            }
            ModbusFunction::WriteSingleRegister => Self {
                unit_id,
                function,
                address,
                quantity: 1,
                values: vec![word],
            },
            ModbusFunction::WriteMultipleRegisters => {
                let byte_count = *pdu
                    .get(5)
                    .ok_or_else(|| ModbusError::frame("Missing byte count"))?
                    as usize;
                if byte_count != word as usize * 2 || pdu.len() < 6 + byte_count {
                    return Err(ModbusError::frame("Inconsistent write multiple registers request"));
                }
                Self {
                    unit_id,
                    function,
                    address,
                    quantity: word,
                    values: data_utils::bytes_to_registers(&pdu[6..6 + byte_count])?,
                }
            }
        };

        Ok(request)
    }
}

/// Modbus response structure
///
/// `data` is the PDU payload after the function code.
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusResponse {
    pub unit_id: UnitId,
    pub function: ModbusFunction,
    pub data: Vec<u8>,
}

impl ModbusResponse {
    /// Create a successful response
    pub fn new(unit_id: UnitId, function: ModbusFunction, data: Vec<u8>) -> Self {
        Self { unit_id, function, data }
    }

    /// Build the response a server sends for a successfully served request
    ///
    /// Reads carry the byte count and register values; writes echo address and
    /// value (0x06) or address and quantity (0x10).
    pub fn for_request(request: &ModbusRequest, registers: &[u16]) -> Self {
        let mut data = Vec::new();
        match request.function {
            ModbusFunction::ReadHoldingRegisters => {
                data.push((registers.len() * 2) as u8);
                data.extend_from_slice(&data_utils::registers_to_bytes(registers));
            }
            ModbusFunction::WriteSingleRegister => {
                data.extend_from_slice(&request.address.to_be_bytes());
                data.extend_from_slice(&request.values.first().copied().unwrap_or(0).to_be_bytes());
            }
            ModbusFunction::WriteMultipleRegisters => {
                data.extend_from_slice(&request.address.to_be_bytes());
                data.extend_from_slice(&request.quantity.to_be_bytes());
            }
        }
        Self::new(request.unit_id, request.function, data)
    }

    /// Decode a response PDU
    ///
    /// Exception responses (function code with the high bit set) are turned
    /// into [`ModbusError::Exception`].
    pub fn decode_pdu(unit_id: UnitId, pdu: &[u8]) -> ModbusResult<Self> {
        let function_code = *pdu
            .first()
            .ok_or_else(|| ModbusError::frame("Empty response PDU"))?;

        if function_code & 0x80 != 0 {
            let exception_code = *pdu
                .get(1)
                .ok_or_else(|| ModbusError::frame("Invalid exception response"))?;
            return Err(ModbusError::exception(function_code & 0x7F, exception_code));
        }

        let function = ModbusFunction::from_u8(function_code)?;
        Ok(Self::new(unit_id, function, pdu[1..].to_vec()))
    }

    /// Encode the PDU (function code + data)
    pub fn encode_pdu(&self) -> Vec<u8> {
        let mut pdu = Vec::with_capacity(1 + self.data.len());
        pdu.push(self.function.to_u8());
        pdu.extend_from_slice(&self.data);
        pdu
    }

    /// Encode an exception PDU
    ///
    /// Takes the raw function code so that unsupported functions can be
    /// answered too.
    pub fn encode_exception(function: u8, exception: u8) -> Vec<u8> {
        vec![function | 0x80, exception]
    }

    /// Parse response data as registers, checking the expected count
    pub fn parse_registers(&self, expected: u16) -> ModbusResult<Vec<u16>> {
        if self.function != ModbusFunction::ReadHoldingRegisters {
            return Err(ModbusError::protocol(format!(
                "Expected register data, got {}",
                self.function
            )));
        }

        let byte_count = *self
            .data
            .first()
            .ok_or_else(|| ModbusError::frame("Empty response data"))? as usize;

        if self.data.len() < 1 + byte_count {
            return Err(ModbusError::frame("Incomplete register data"));
        }

        if byte_count != expected as usize * 2 {
            return Err(ModbusError::invalid_data(format!(
                "Expected {} registers, got {} bytes",
                expected, byte_count
            )));
        }

        data_utils::bytes_to_registers(&self.data[1..1 + byte_count])
    }

    /// Verify a write response echoes the request
    pub fn check_write_echo(&self, request: &ModbusRequest) -> ModbusResult<()> {
        if self.function != request.function || self.data.len() < 4 {
            return Err(ModbusError::protocol("Write response does not match request"));
        }

        let address = u16::from_be_bytes([self.data[0], self.data[1]]);
        let second = u16::from_be_bytes([self.data[2], self.data[3]]);
        let expected = match request.function {
            ModbusFunction::WriteSingleRegister => request.values.first().copied().unwrap_or(0),
            _ => request.quantity,
        };

        if address != request.address || second != expected {
            return Err(ModbusError::protocol(format!(
                "Write echo mismatch: address {} value/quantity {}",
                address, second
            )));
        }

        Ok(())
    }
}

/// Data conversion utilities
pub mod data_utils {
    use super::*;

    /// Order of the two 16-bit words that make up a 32-bit register value
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum WordOrder {
        /// Low word at the lower address (CSD-MT-94 layout)
        LowWordFirst,
        /// High word at the lower address
        HighWordFirst,
    }

    /// Convert register values to bytes (big-endian)
    pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(registers.len() * 2);
        for &register in registers {
            bytes.extend_from_slice(&register.to_be_bytes());
        }
        bytes
    }

    /// Convert bytes to register values (big-endian)
    pub fn bytes_to_registers(bytes: &[u8]) -> ModbusResult<Vec<u16>> {
        if bytes.len() % 2 != 0 {
            return Err(ModbusError::invalid_data("Byte array length must be even"));
        }

        Ok(bytes
            .chunks(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect())
    }

    /// Split a 32-bit value into two registers
    pub fn u32_to_registers(value: u32, order: WordOrder) -> [u16; 2] {
        let (high, low) = ((value >> 16) as u16, value as u16);
        match order {
            WordOrder::LowWordFirst => [low, high],
            WordOrder::HighWordFirst => [high, low],
        }
    }

    /// Join two registers into a 32-bit value
    pub fn registers_to_u32(registers: &[u16], order: WordOrder) -> ModbusResult<u32> {
        if registers.len() < 2 {
            return Err(ModbusError::invalid_data("Need at least 2 registers for u32"));
        }
        let (high, low) = match order {
            WordOrder::LowWordFirst => (registers[1], registers[0]),
            WordOrder::HighWordFirst => (registers[0], registers[1]),
        };
        Ok(((high as u32) << 16) | (low as u32))
    }
}
