/// Typed register access over a Modbus transport
///
/// The register client sits between the drive logic and the transport. It
/// takes [`RegisterDescriptor`]s instead of raw addresses and takes care of:
/// - access checks (no reads of write-only, no writes of read-only registers)
/// - width, signedness and bounds checks before anything is sent
/// - splitting and joining 32-bit values in the drive's word order, always in
///   one exchange so a pair is never half-written
/// - reporting each exchange to the [`CallbackLogger`]
///
/// Any type implementing [`ModbusTransport`] can be plugged in, which is how
/// the drive simulator replaces the TCP transport in tests.

use log::debug;

use crate::error::{DriveError, DriveResult};
use crate::logging::CallbackLogger;
use crate::protocol::data_utils::{registers_to_u32, u32_to_registers};
use crate::protocol::{ModbusFunction, ModbusRequest, UnitId};
use crate::register_map::{RegisterBlock, RegisterDescriptor, RegisterWidth, DRIVE_WORD_ORDER};
use crate::transport::{ModbusTransport, TransportStats};

/// Encode a native value into the register words for `descriptor`
///
/// # Errors
///
/// `DriveError::OutOfRange` if the value does not fit the register.
pub fn encode_value(descriptor: &RegisterDescriptor, value: i64) -> DriveResult<Vec<u16>> {
    let value = descriptor.check_native(value as i128)?;
    Ok(match descriptor.width {
        // Two's complement truncation covers both signed and unsigned
        RegisterWidth::Bits16 => vec![value as u16],
        RegisterWidth::Bits32 => u32_to_registers(value as u32, DRIVE_WORD_ORDER).to_vec(),
    })
}

/// Decode register words read for `descriptor` into a native value
pub fn decode_value(descriptor: &RegisterDescriptor, words: &[u16]) -> DriveResult<i64> {
    let count = descriptor.register_count() as usize;
    if words.len() != count {
        return Err(crate::error::ModbusError::invalid_data(format!(
            "'{}' needs {} registers, got {}",
            descriptor.name,
            count,
            words.len()
        ))
        .into());
    }

    Ok(match (descriptor.width, descriptor.signed) {
        (RegisterWidth::Bits16, false) => words[0] as i64,
        (RegisterWidth::Bits16, true) => words[0] as i16 as i64,
        (RegisterWidth::Bits32, signed) => {
            let raw = registers_to_u32(words, DRIVE_WORD_ORDER)?;
            if signed {
                raw as i32 as i64
            } else {
                raw as i64
            }
        }
    })
}

/// Register-level client over any [`ModbusTransport`]
pub struct RegisterClient<T: ModbusTransport> {
    transport: T,
    unit_id: UnitId,
    logger: CallbackLogger,
}

impl<T: ModbusTransport> RegisterClient<T> {
    /// Create a new client with the specified transport
    pub fn new(transport: T, unit_id: UnitId) -> Self {
        Self {
            transport,
            unit_id,
            logger: CallbackLogger::default(),
        }
    }

    /// Create a new client with logging
    pub fn with_logger(transport: T, unit_id: UnitId, logger: CallbackLogger) -> Self {
        Self {
            transport,
            unit_id,
            logger,
        }
    }

    /// Replace the exchange logger
    pub fn set_logger(&mut self, logger: CallbackLogger) {
        self.logger = logger;
    }

    /// Get a reference to the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub async fn connect(&mut self, host: &str, port: u16) -> DriveResult<()> {
        self.transport.connect(host, port).await?;
        Ok(())
    }

    pub async fn disconnect(&mut self) -> DriveResult<()> {
        self.transport.disconnect().await?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn get_stats(&self) -> TransportStats {
        self.transport.get_stats()
    }

    /// Read raw holding registers
    pub async fn read_raw(&mut self, address: u16, count: u16) -> DriveResult<Vec<u16>> {
        self.logger
            .log_request(&ModbusRequest::read_holding_registers(self.unit_id, address, count));

        let registers = self.transport.read_registers(address, count).await.map_err(|e| {
            self.logger.error(&format!("Read of {} registers at {} failed: {}", count, address, e));
            e
        })?;

        self.logger
            .log_response(ModbusFunction::ReadHoldingRegisters, address, &registers);
        Ok(registers)
    }

    /// Write raw holding registers in one exchange
    pub async fn write_raw(&mut self, address: u16, values: &[u16]) -> DriveResult<()> {
        let request = ModbusRequest::write_registers(self.unit_id, address, values);
        self.logger.log_request(&request);

        self.transport.write_registers(address, values).await.map_err(|e| {
            self.logger.error(&format!("Write of {} registers at {} failed: {}", values.len(), address, e));
            e
        })?;

        self.logger.log_response(request.function, address, values);
        Ok(())
    }

    /// Read a register and decode it to a native value
    ///
    /// # Errors
    ///
    /// `AccessDenied` for write-only registers; transport errors otherwise.
    pub async fn read(&mut self, descriptor: &RegisterDescriptor) -> DriveResult<i64> {
        if !descriptor.access.can_read() {
            return Err(DriveError::access_denied(descriptor.name, "read"));
        }

        let words = self.read_raw(descriptor.address, descriptor.register_count()).await?;
        let value = decode_value(descriptor, &words)?;
        debug!("read {} = {}", descriptor.name, value);
        Ok(value)
    }

    /// Encode and write a native value
    ///
    /// The value is validated before any exchange takes place.
    pub async fn write(&mut self, descriptor: &RegisterDescriptor, value: i64) -> DriveResult<()> {
        if !descriptor.access.can_write() {
            return Err(DriveError::access_denied(descriptor.name, "write"));
        }

        let words = encode_value(descriptor, value)?;
        self.write_raw(descriptor.address, &words).await?;
        debug!("wrote {} = {}", descriptor.name, value);
        Ok(())
    }

    /// Read a multi-register block
    pub async fn read_block(&mut self, block: &RegisterBlock) -> DriveResult<Vec<u16>> {
        self.read_raw(block.address, block.count).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ModbusError, ModbusResult};
    use crate::register_map::{
        ACTUAL_POSITION, CURRENT_RATIO, MODE_OF_OPERATION, MOTOR_CODE, POSITION_ERROR_RESET,
        STATUS_WORD, TARGET_POSITION,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Register store that records write exchanges
    #[derive(Default)]
    struct MemoryTransport {
        registers: HashMap<u16, u16>,
        writes: Vec<(u16, Vec<u16>)>,
        exchanges: usize,
    }

    #[async_trait]
    impl ModbusTransport for MemoryTransport {
        async fn connect(&mut self, _host: &str, _port: u16) -> ModbusResult<()> {
            Ok(())
        }

        async fn disconnect(&mut self) -> ModbusResult<()> {
            Ok(())
        }

        async fn read_registers(&mut self, address: u16, count: u16) -> ModbusResult<Vec<u16>> {
            self.exchanges += 1;
            Ok((address..address + count)
                .map(|a| self.registers.get(&a).copied().unwrap_or(0))
                .collect())
        }

        async fn write_registers(&mut self, address: u16, values: &[u16]) -> ModbusResult<()> {
            self.exchanges += 1;
            if address == 9999 {
                return Err(ModbusError::exception(0x06, 0x02));
            }
            for (offset, value) in values.iter().enumerate() {
                self.registers.insert(address + offset as u16, *value);
            }
            self.writes.push((address, values.to_vec()));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn get_stats(&self) -> TransportStats {
            TransportStats::default()
        }
    }

    #[test]
    fn test_encode_signed_32_bit_low_word_first() {
        assert_eq!(encode_value(&TARGET_POSITION, 25600).unwrap(), vec![0x6400, 0x0000]);
        assert_eq!(encode_value(&TARGET_POSITION, -1).unwrap(), vec![0xFFFF, 0xFFFF]);
        assert_eq!(encode_value(&TARGET_POSITION, 0x12345).unwrap(), vec![0x2345, 0x0001]);
        assert_eq!(encode_value(&MODE_OF_OPERATION, -2).unwrap(), vec![0xFFFE]);
        assert!(encode_value(&CURRENT_RATIO, 121).is_err());
    }

    #[test]
    fn test_decode_values() {
        assert_eq!(decode_value(&ACTUAL_POSITION, &[0xFFFF, 0xFFFF]).unwrap(), -1);
        assert_eq!(decode_value(&ACTUAL_POSITION, &[0x6400, 0x0000]).unwrap(), 25600);
        assert_eq!(decode_value(&MOTOR_CODE, &[0xFFFF, 0xFFFF]).unwrap(), u32::MAX as i64);
        assert_eq!(decode_value(&MODE_OF_OPERATION, &[0xFFFA]).unwrap(), -6);
        assert_eq!(decode_value(&STATUS_WORD, &[0x8237]).unwrap(), 0x8237);
        assert!(decode_value(&ACTUAL_POSITION, &[0x0001]).is_err());
    }

    #[tokio::test]
    async fn test_pair_written_in_one_exchange() {
        let mut client = RegisterClient::new(MemoryTransport::default(), 1);
        client.write(&TARGET_POSITION, -25600).await.unwrap();

        let transport = client.transport();
        assert_eq!(transport.writes, vec![(1042, vec![0x9C00, 0xFFFF])]);
        assert_eq!(client.read(&TARGET_POSITION).await.unwrap(), -25600);
    }

    #[tokio::test]
    async fn test_access_checked_before_exchange() {
        let mut client = RegisterClient::new(MemoryTransport::default(), 1);

        let err = client.write(&STATUS_WORD, 0).await.unwrap_err();
        assert_eq!(err, DriveError::access_denied("status_word", "write"));

        let err = client.read(&POSITION_ERROR_RESET).await.unwrap_err();
        assert!(matches!(err, DriveError::AccessDenied { operation: "read", .. }));

        assert!(matches!(
            client.write(&CURRENT_RATIO, 500).await,
            Err(DriveError::OutOfRange { .. })
        ));
        assert_eq!(client.transport().exchanges, 0);
    }

    #[tokio::test]
    async fn test_transport_error_propagates_unchanged() {
        let mut client = RegisterClient::new(MemoryTransport::default(), 1);
        let err = client.write_raw(9999, &[1]).await.unwrap_err();
        assert_eq!(err, DriveError::Transport(ModbusError::exception(0x06, 0x02)));
    }
}
