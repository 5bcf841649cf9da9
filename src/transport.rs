//! # Modbus Transport Layer
//!
//! This module provides the register-level transport used by the drive
//! client: a [`ModbusTransport`] trait with the four operations the drive
//! needs (connect, disconnect, read holding registers, write registers) and a
//! Modbus TCP implementation, [`TcpTransport`].
//!
//! ## Modbus TCP (`TcpTransport`)
//! - MBAP header handling with transaction ID management
//! - Unit identifier taken from the client configuration
//! - Per-exchange timeout; a timed-out session is dropped, never silently
//!   re-opened
//! - Statistics and optional packet logging
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use csd_mt94::transport::{ModbusTransport, TcpTransport};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut transport = TcpTransport::new(1, Duration::from_secs(5));
//!     transport.connect("192.168.1.10", 502).await?;
//!
//!     // Status word
//!     let status = transport.read_registers(1001, 1).await?;
//!     println!("Status word: 0x{:04X}", status[0]);
//!
//!     let stats = transport.get_stats();
//!     println!("Requests sent: {}", stats.requests_sent);
//!
//!     transport.disconnect().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::time::Duration;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::info;

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusRequest, ModbusResponse, UnitId};
use crate::MAX_TCP_FRAME_SIZE;

/// Modbus TCP Application Protocol header size
pub(crate) const MBAP_HEADER_SIZE: usize = 6;

/// Format raw bytes as hex string for packet logging
fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Log packet with direction
fn log_packet(direction: &str, data: &[u8], unit_id: UnitId) {
    info!("[MODBUS-TCP] {} unit:{} {}", direction, unit_id, format_hex_packet(data));
}

/// Register transport abstraction
///
/// The drive client only ever talks to holding registers, so the trait is
/// expressed in registers rather than raw PDUs. Implementations must not
/// retry or reconnect on their own: every failure is reported to the caller,
/// since a dropped motion command is safety-relevant.
///
/// All implementations must be `Send + Sync` so a client can be moved into a
/// task or shared behind a mutex.
#[async_trait]
pub trait ModbusTransport: Send + Sync {
    /// Open a session to the controller at `host:port`
    ///
    /// An already open session is closed first.
    async fn connect(&mut self, host: &str, port: u16) -> ModbusResult<()>;

    /// Close the session
    ///
    /// Closing a transport that is not connected is not an error.
    async fn disconnect(&mut self) -> ModbusResult<()>;

    /// Read `count` consecutive holding registers starting at `address`
    ///
    /// # Errors
    ///
    /// - `ModbusError::Connection` - no open session
    /// - `ModbusError::Timeout` - the drive did not answer in time
    /// - `ModbusError::Exception` - the drive rejected the request
    /// - `ModbusError::Frame` / `Protocol` - malformed response
    async fn read_registers(&mut self, address: u16, count: u16) -> ModbusResult<Vec<u16>>;

    /// Write consecutive holding registers starting at `address` in one exchange
    async fn write_registers(&mut self, address: u16, values: &[u16]) -> ModbusResult<()>;

    /// Check if the transport believes a session is open
    ///
    /// This is a local check and does not verify that the drive is responsive.
    fn is_connected(&self) -> bool;

    /// Get communication statistics
    fn get_stats(&self) -> TransportStats;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl TransportStats {
    /// Percentage of requests that received a response
    pub fn success_rate(&self) -> f64 {
        if self.requests_sent == 0 {
            return 0.0;
        }
        (self.responses_received as f64 / self.requests_sent as f64) * 100.0
    }
}

/// Modbus TCP transport implementation
pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    unit_id: UnitId,
    timeout: Duration,
    transaction_id: u16,
    stats: TransportStats,
    /// Enable packet logging for debugging
    packet_logging: bool,
}

impl TcpTransport {
    /// Create a new, unconnected TCP transport
    pub fn new(unit_id: UnitId, timeout: Duration) -> Self {
        Self {
            stream: None,
            peer: None,
            unit_id,
            timeout,
            transaction_id: 0,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// Address of the connected controller
    pub fn peer_address(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Unit identifier placed in every MBAP header
    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    /// Get next transaction ID (never 0)
    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        if self.transaction_id == 0 {
            self.transaction_id = 1;
        }
        self.transaction_id
    }

    /// Encode request to TCP frame
    fn encode_frame(transaction_id: u16, request: &ModbusRequest) -> Vec<u8> {
        let pdu = request.encode_pdu();
        // unit id + PDU
        let length = (1 + pdu.len()) as u16;

        let mut frame = Vec::with_capacity(MBAP_HEADER_SIZE + length as usize);
        frame.extend_from_slice(&transaction_id.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(&length.to_be_bytes());
        frame.push(request.unit_id);
        frame.extend_from_slice(&pdu);
        frame
    }

    /// Decode a response frame, checking it belongs to the request
    fn decode_frame(
        transaction_id: u16,
        request: &ModbusRequest,
        frame: &[u8],
    ) -> ModbusResult<ModbusResponse> {
        if frame.len() < MBAP_HEADER_SIZE + 2 {
            return Err(ModbusError::frame("Frame too short"));
        }

        let response_tid = u16::from_be_bytes([frame[0], frame[1]]);
        let protocol_id = u16::from_be_bytes([frame[2], frame[3]]);
        let unit_id = frame[6];

        if response_tid != transaction_id {
            return Err(ModbusError::protocol(format!(
                "Transaction ID mismatch: sent {}, received {}",
                transaction_id, response_tid
            )));
        }
        if protocol_id != 0 {
            return Err(ModbusError::frame("Invalid protocol ID"));
        }
        if unit_id != request.unit_id {
            return Err(ModbusError::protocol(format!(
                "Unit ID mismatch: sent {}, received {}",
                request.unit_id, unit_id
            )));
        }

        ModbusResponse::decode_pdu(unit_id, &frame[MBAP_HEADER_SIZE + 1..])
    }

    /// Send a frame and read back one complete response frame
    async fn round_trip(stream: &mut TcpStream, frame: &[u8], limit: Duration) -> ModbusResult<Vec<u8>> {
        let timeout_ms = limit.as_millis() as u64;

        timeout(limit, stream.write_all(frame))
            .await
            .map_err(|_| ModbusError::timeout("send request", timeout_ms))??;

        // MBAP header + unit id
        let mut header = [0u8; MBAP_HEADER_SIZE + 1];
        timeout(limit, stream.read_exact(&mut header))
            .await
            .map_err(|_| ModbusError::timeout("read response header", timeout_ms))??;

        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if length < 2 || MBAP_HEADER_SIZE + length > MAX_TCP_FRAME_SIZE {
            return Err(ModbusError::frame(format!("Invalid MBAP length {}", length)));
        }

        let mut response = vec![0u8; MBAP_HEADER_SIZE + length];
        response[..MBAP_HEADER_SIZE + 1].copy_from_slice(&header);
        timeout(limit, stream.read_exact(&mut response[MBAP_HEADER_SIZE + 1..]))
            .await
            .map_err(|_| ModbusError::timeout("read response data", timeout_ms))??;

        Ok(response)
    }

    /// Perform one request/response exchange
    async fn request(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        request.validate()?;

        let transaction_id = self.next_transaction_id();
        let frame = Self::encode_frame(transaction_id, request);
        let limit = self.timeout;

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("Not connected"))?;

        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;
        if self.packet_logging {
            log_packet("send", &frame, request.unit_id);
        }

        let response_frame = match Self::round_trip(stream, &frame, limit).await {
            Ok(bytes) => bytes,
            Err(error) => {
                self.stats.errors += 1;
                if matches!(error, ModbusError::Timeout { .. }) {
                    self.stats.timeouts += 1;
                }
                // The stream position is unknown after a failed exchange
                self.stream = None;
                return Err(error);
            }
        };

        self.stats.responses_received += 1;
        self.stats.bytes_received += response_frame.len() as u64;
        if self.packet_logging {
            log_packet("receive", &response_frame, request.unit_id);
        }

        Self::decode_frame(transaction_id, request, &response_frame).map_err(|error| {
            self.stats.errors += 1;
            error
        })
    }
}

#[async_trait]
impl ModbusTransport for TcpTransport {
    async fn connect(&mut self, host: &str, port: u16) -> ModbusResult<()> {
        self.disconnect().await?;

        let stream = timeout(self.timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ModbusError::timeout(format!("connect to {}:{}", host, port), self.timeout_ms()))?
            .map_err(|e| ModbusError::connection(format!("Failed to connect to {}:{}: {}", host, port, e)))?;

        stream.set_nodelay(true)?;
        self.peer = stream.peer_addr().ok();
        self.stream = Some(stream);
        Ok(())
    }

    async fn disconnect(&mut self) -> ModbusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.peer = None;
        Ok(())
    }

    async fn read_registers(&mut self, address: u16, count: u16) -> ModbusResult<Vec<u16>> {
        let request = ModbusRequest::read_holding_registers(self.unit_id, address, count);
        let response = self.request(&request).await?;
        response.parse_registers(count)
    }

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> ModbusResult<()> {
        let request = ModbusRequest::write_registers(self.unit_id, address, values);
        let response = self.request(&request).await?;
        response.check_write_echo(&request)
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ModbusFunction;

    #[test]
    fn test_frame_encoding() {
        let request = ModbusRequest::read_holding_registers(1, 1001, 1);
        let frame = TcpTransport::encode_frame(0x0102, &request);
        assert_eq!(
            frame,
            vec![0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x03, 0xE9, 0x00, 0x01]
        );
    }

    #[test]
    fn test_frame_decoding_checks_transaction() {
        let request = ModbusRequest::read_holding_registers(1, 1001, 1);
        let frame = [0x00, 0x07, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x02, 0x37];

        let response = TcpTransport::decode_frame(7, &request, &frame).unwrap();
        assert_eq!(response.function, ModbusFunction::ReadHoldingRegisters);
        assert_eq!(response.parse_registers(1).unwrap(), vec![0x0237]);

        assert!(TcpTransport::decode_frame(8, &request, &frame).is_err());
    }

    #[test]
    fn test_frame_decoding_exception() {
        let request = ModbusRequest::write_registers(1, 1081, &[1]);
        let frame = [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x86, 0x02];
        let err = TcpTransport::decode_frame(1, &request, &frame).unwrap_err();
        assert!(matches!(err, ModbusError::Exception { function: 0x06, code: 0x02, .. }));
    }

    #[test]
    fn test_transaction_id_skips_zero() {
        let mut transport = TcpTransport::new(1, Duration::from_secs(1));
        transport.transaction_id = u16::MAX;
        assert_eq!(transport.next_transaction_id(), 1);
    }

    #[tokio::test]
    async fn test_exchange_without_session() {
        let mut transport = TcpTransport::new(1, Duration::from_millis(100));
        assert!(!transport.is_connected());

        let err = transport.read_registers(1001, 1).await.unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }));
        assert_eq!(transport.get_stats().requests_sent, 0);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = TcpTransport::new(1, Duration::from_secs(1));
        let result = transport.connect("127.0.0.1", port).await;
        assert!(result.is_err());
        assert!(!transport.is_connected());
    }
}
