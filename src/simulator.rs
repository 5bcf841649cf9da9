//! In-process CSD-MT-94 emulation
//!
//! [`DriveModel`] is a holding-register image that reacts to writes the way the
//! drive does: control word writes run the CiA-402 transition table, a rising
//! edge of the new set-point bit starts (and immediately completes) a profile
//! position move, and homing or velocity mode update the status word
//! accordingly. Faults can be injected, made sticky, and set-point
//! acknowledgement can be withheld to exercise the client's error paths.
//!
//! The model is served two ways:
//! - [`SimulatedTransport`] implements [`ModbusTransport`] in memory and records
//!   every exchange
//! - [`DriveSimulator`] is a Modbus TCP server on a bound address

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::data_utils::{registers_to_u32, u32_to_registers};
use crate::protocol::{ModbusException, ModbusFunction, ModbusRequest, ModbusResponse, UnitId};
use crate::register_map::{
    Access, RegisterMap, ACTUAL_POSITION, ACTUAL_VELOCITY, ALARM_LOG, ALARM_LOG_RESET, CONTROL_WORD,
    CURRENT_RATIO, CURRENT_RECYCLING_ENABLE, CURRENT_REDUCTION, CURRENT_REDUCTION_RATIO, DEVICE_INFO,
    DRIVE_TEMPERATURE, DRIVE_WORD_ORDER, ENCODER_COUNTS_PER_REVOLUTION, ENCODER_WINDOW, ERROR_ACTIVE,
    ERROR_CODE, FOLLOWING_ERROR_REACTION, GATEWAY, IP_ADDRESS, MODE_OF_OPERATION,
    MODE_OF_OPERATION_DISPLAY, MOTOR_CODE, MOTOR_CURRENT_LIMIT, MOTOR_DYNAMIC_BALANCING,
    MOTOR_PROPORTIONAL_GAIN, NETMASK, POSITION_ERROR_RESET, PROFILE_ACCELERATION,
    PROFILE_DECELERATION, PROFILE_VELOCITY, RESTORE_DEFAULTS, REVOLUTION_DIRECTION, STATUS_WORD,
    STEPS_PER_REVOLUTION, STORE_PARAMETERS, TARGET_POSITION, TARGET_VELOCITY,
};
use crate::state::{transition_for_control_word, ControlWord, DriveState, StatusWord};
use crate::transport::{ModbusTransport, TransportStats, MBAP_HEADER_SIZE};

const MODE_PROFILE_POSITION: i16 = 1;
const MODE_PROFILE_VELOCITY: i16 = 3;
const MODE_HOMING: i16 = 6;

/// Number of (time, code) entries in the alarm log
const ALARM_LOG_DEPTH: usize = 10;

/// Register image and CiA-402 behaviour of one drive
#[derive(Debug, Clone)]
pub struct DriveModel {
    registers: HashMap<u16, u16>,
    state: DriveState,
    previous_control: ControlWord,
    target_reached: bool,
    setpoint_acknowledged: bool,
    following_error: bool,
    sticky_fault: bool,
    acknowledge_setpoints: bool,
    complete_moves: bool,
    alarm_clock: u16,
    service_writes: Vec<(u16, u16)>,
}

impl Default for DriveModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DriveModel {
    /// Powered drive in `SwitchOnDisabled` with factory parameters
    pub fn new() -> Self {
        let mut model = Self {
            registers: HashMap::new(),
            state: DriveState::SwitchOnDisabled,
            previous_control: ControlWord(0),
            target_reached: true,
            setpoint_acknowledged: false,
            following_error: false,
            sticky_fault: false,
            acknowledge_setpoints: true,
            complete_moves: true,
            alarm_clock: 0,
            service_writes: Vec::new(),
        };
        model.load_defaults();
        model.load_identity();
        model.refresh();
        model
    }

    fn load_defaults(&mut self) {
        self.set_u16(MODE_OF_OPERATION.address, MODE_PROFILE_POSITION as u16);
        self.set_u16(MODE_OF_OPERATION_DISPLAY.address, MODE_PROFILE_POSITION as u16);
        self.set_u32(PROFILE_VELOCITY.address, 12800);
        self.set_u32(PROFILE_ACCELERATION.address, 25600);
        self.set_u32(PROFILE_DECELERATION.address, 25600);
        self.set_u16(CURRENT_RATIO.address, 50);
        self.set_u16(STEPS_PER_REVOLUTION.address, 12800);
        self.set_u16(CURRENT_REDUCTION.address, 50);
        self.set_u16(ENCODER_WINDOW.address, 2);
        self.set_u16(FOLLOWING_ERROR_REACTION.address, 0);
        self.set_u32(MOTOR_CODE.address, 0x15B1);
        self.set_u16(REVOLUTION_DIRECTION.address, 0);
        self.set_u16(CURRENT_REDUCTION_RATIO.address, 50);
        self.set_u16(MOTOR_CURRENT_LIMIT.address, 30);
        self.set_u16(MOTOR_PROPORTIONAL_GAIN.address, 100);
        self.set_u16(MOTOR_DYNAMIC_BALANCING.address, 0);
        self.set_u16(CURRENT_RECYCLING_ENABLE.address, 1);
        self.set_u16(ENCODER_COUNTS_PER_REVOLUTION.address, 4000);
    }

    fn load_identity(&mut self) {
        self.set_u16(DRIVE_TEMPERATURE.address, 35);
        self.set_block(IP_ADDRESS.address, &[192, 168, 1, 100]);
        self.set_block(NETMASK.address, &[255, 255, 255, 0]);
        self.set_block(GATEWAY.address, &[192, 168, 1, 1]);

        // software, product, hardware, serial, then the endianness marker
        self.set_u32(DEVICE_INFO.address, 0x0001_0203);
        self.set_u32(DEVICE_INFO.address + 2, 0x0000_5E94);
        self.set_u32(DEVICE_INFO.address + 4, 0x0000_0002);
        self.set_u32(DEVICE_INFO.address + 6, 20_240_117);
        self.set_u16(DEVICE_INFO.address + 8, 1);
    }

    fn set_u16(&mut self, address: u16, value: u16) {
        self.registers.insert(address, value);
    }

    fn set_u32(&mut self, address: u16, value: u32) {
        let words = u32_to_registers(value, DRIVE_WORD_ORDER);
        self.set_block(address, &words);
    }

    fn set_block(&mut self, address: u16, values: &[u16]) {
        for (offset, value) in values.iter().enumerate() {
            self.registers.insert(address.wrapping_add(offset as u16), *value);
        }
    }

    fn u32_at(&self, address: u16) -> u32 {
        let words = [self.register(address), self.register(address.wrapping_add(1))];
        registers_to_u32(&words, DRIVE_WORD_ORDER).unwrap_or(0)
    }

    /// Raw register value (0 for registers never written)
    pub fn register(&self, address: u16) -> u16 {
        self.registers.get(&address).copied().unwrap_or(0)
    }

    /// Overwrite a register without triggering drive behaviour
    pub fn set_register(&mut self, address: u16, value: u16) {
        self.set_u16(address, value);
        self.refresh();
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    /// Force the power state, bypassing the transition table
    pub fn set_state(&mut self, state: DriveState) {
        self.state = state;
        self.refresh();
    }

    pub fn status_word(&self) -> StatusWord {
        StatusWord(self.register(STATUS_WORD.address))
    }

    pub fn control_word(&self) -> ControlWord {
        ControlWord(self.register(CONTROL_WORD.address))
    }

    pub fn mode_of_operation(&self) -> i16 {
        self.register(MODE_OF_OPERATION.address) as i16
    }

    pub fn actual_position(&self) -> i32 {
        self.u32_at(ACTUAL_POSITION.address) as i32
    }

    pub fn set_actual_position(&mut self, position: i32) {
        self.set_u32(ACTUAL_POSITION.address, position as u32);
    }

    pub fn target_position(&self) -> i32 {
        self.u32_at(TARGET_POSITION.address) as i32
    }

    pub fn actual_velocity(&self) -> i32 {
        self.u32_at(ACTUAL_VELOCITY.address) as i32
    }

    /// Enter `Fault` with `code` in the error registers and the alarm log
    pub fn inject_fault(&mut self, code: u16) {
        debug!("simulated fault 0x{:04X}", code);
        self.state = DriveState::Fault;
        self.set_u16(ERROR_ACTIVE.address, 1);
        self.set_u16(ERROR_CODE.address, code);
        if code == 0x8611 {
            self.following_error = true;
        }
        self.log_alarm(code);
        self.refresh();
    }

    /// A sticky fault survives fault reset
    pub fn set_sticky_fault(&mut self, sticky: bool) {
        self.sticky_fault = sticky;
    }

    /// When disabled, new set-points are ignored and bit 12 never rises
    pub fn set_acknowledge_setpoints(&mut self, acknowledge: bool) {
        self.acknowledge_setpoints = acknowledge;
    }

    /// When disabled, set-points are acknowledged but the axis never arrives
    pub fn set_complete_moves(&mut self, complete: bool) {
        self.complete_moves = complete;
    }

    /// Raise or drop status bit 13 (following error, or homing error in homing mode)
    pub fn set_following_error(&mut self, active: bool) {
        self.following_error = active;
        self.refresh();
    }

    /// (address, value) of every write to the store/restore registers
    pub fn service_writes(&self) -> &[(u16, u16)] {
        &self.service_writes
    }

    /// Serve a read of holding registers
    pub fn read(&self, address: u16, count: u16) -> ModbusResult<Vec<u16>> {
        let function = ModbusFunction::ReadHoldingRegisters.to_u8();
        if count == 0 || count > crate::MAX_REGISTERS_PER_REQUEST {
            return Err(ModbusError::exception(function, ModbusException::IllegalDataValue.to_u8()));
        }
        if address.checked_add(count - 1).is_none() {
            return Err(ModbusError::exception(function, ModbusException::IllegalDataAddress.to_u8()));
        }

        Ok((0..count).map(|offset| self.register(address + offset)).collect())
    }

    /// Serve a write of holding registers
    ///
    /// Writes touching a read-only register are rejected as a whole with an
    /// illegal data address exception.
    pub fn write(&mut self, address: u16, values: &[u16]) -> ModbusResult<()> {
        let function = if values.len() == 1 {
            ModbusFunction::WriteSingleRegister
        } else {
            ModbusFunction::WriteMultipleRegisters
        }
        .to_u8();

        if values.is_empty() || values.len() > crate::MAX_REGISTERS_PER_WRITE as usize {
            return Err(ModbusError::exception(function, ModbusException::IllegalDataValue.to_u8()));
        }
        let last = address
            .checked_add(values.len() as u16 - 1)
            .ok_or_else(|| ModbusError::exception(function, ModbusException::IllegalDataAddress.to_u8()))?;

        let read_only = (address..=last).any(|register| {
            RegisterMap::by_address(register).map_or(false, |d| d.access == Access::ReadOnly)
        });
        if read_only {
            return Err(ModbusError::exception(function, ModbusException::IllegalDataAddress.to_u8()));
        }

        self.set_block(address, values);
        for (offset, value) in values.iter().enumerate() {
            self.on_write(address + offset as u16, *value);
        }
        self.refresh();
        Ok(())
    }

    fn on_write(&mut self, address: u16, value: u16) {
        match address {
            a if a == CONTROL_WORD.address => self.on_control_word(ControlWord(value)),
            a if a == MODE_OF_OPERATION.address => {
                self.set_u16(MODE_OF_OPERATION_DISPLAY.address, value);
            }
            a if a == POSITION_ERROR_RESET.address => self.following_error = false,
            a if a == ALARM_LOG_RESET.address => {
                if value == 1 {
                    self.set_block(ALARM_LOG.address, &[0; ALARM_LOG_DEPTH * 2]);
                }
            }
            a if a == STORE_PARAMETERS.address => self.service_writes.push((address, value)),
            a if a == RESTORE_DEFAULTS.address => {
                self.service_writes.push((address, value));
                if value == 0x6F6C {
                    self.load_defaults();
                }
            }
            _ => {}
        }
    }

    fn on_control_word(&mut self, control: ControlWord) {
        let previous = self.previous_control;
        self.previous_control = control;

        if self.state == DriveState::Fault {
            if control.fault_reset() && !previous.fault_reset() {
                if self.sticky_fault {
                    debug!("fault reset ignored, fault is sticky");
                } else {
                    self.state = DriveState::SwitchOnDisabled;
                    self.set_u16(ERROR_ACTIVE.address, 0);
                    self.set_u16(ERROR_CODE.address, 0);
                }
            }
        } else if let Some(transition) = transition_for_control_word(self.state, control) {
            debug!("transition {}: {} -> {}", transition.number, transition.from, transition.to);
            self.state = transition.to;
        }

        if !control.new_setpoint() {
            self.setpoint_acknowledged = false;
        } else if !previous.new_setpoint() && self.state == DriveState::OperationEnabled {
            self.start_setpoint(control);
        }
    }

    fn start_setpoint(&mut self, control: ControlWord) {
        match self.mode_of_operation() {
            MODE_PROFILE_POSITION => {
                if !self.acknowledge_setpoints {
                    return;
                }
                let target = self.target_position();
                let position = if control.relative() {
                    self.actual_position().wrapping_add(target)
                } else {
                    target
                };
                self.setpoint_acknowledged = true;
                if self.complete_moves {
                    self.set_actual_position(position);
                    self.target_reached = true;
                } else {
                    self.target_reached = false;
                }
            }
            MODE_HOMING => {
                self.target_reached = true;
                if !self.following_error {
                    self.set_actual_position(0);
                    // bit 12 doubles as homing attained
                    self.setpoint_acknowledged = true;
                }
            }
            _ => {}
        }
    }

    fn log_alarm(&mut self, code: u16) {
        self.alarm_clock = self.alarm_clock.wrapping_add(1);
        let mut entries: Vec<u16> = (0..(ALARM_LOG_DEPTH as u16 * 2))
            .map(|offset| self.register(ALARM_LOG.address + offset))
            .collect();
        entries.truncate((ALARM_LOG_DEPTH - 1) * 2);
        let mut log = vec![self.alarm_clock, code];
        log.extend(entries);
        self.set_block(ALARM_LOG.address, &log);
    }

    /// Recompute the status word and the derived velocity
    fn refresh(&mut self) {
        let mut status = self.state.status_bits() | 1 << StatusWord::REMOTE;
        if matches!(
            self.state,
            DriveState::ReadyToSwitchOn
                | DriveState::SwitchedOn
                | DriveState::OperationEnabled
                | DriveState::QuickStopActive
        ) {
            status |= 1 << StatusWord::VOLTAGE_ENABLED;
        }
        if self.target_reached {
            status |= 1 << StatusWord::TARGET_REACHED;
        }
        if self.setpoint_acknowledged {
            status |= 1 << StatusWord::SETPOINT_ACKNOWLEDGE;
        }
        if self.following_error {
            status |= 1 << StatusWord::FOLLOWING_ERROR;
        }
        self.set_u16(STATUS_WORD.address, status);

        let velocity = if self.state == DriveState::OperationEnabled
            && self.mode_of_operation() == MODE_PROFILE_VELOCITY
        {
            self.u32_at(TARGET_VELOCITY.address)
        } else {
            0
        };
        self.set_u32(ACTUAL_VELOCITY.address, velocity);
    }
}

/// One exchange seen by a [`SimulatedTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    Read { address: u16, count: u16 },
    Write { address: u16, values: Vec<u16> },
}

/// In-memory transport backed by a shared [`DriveModel`]
///
/// Clones share the model and the exchange log, so a test can keep one
/// handle while the drive client owns another.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransport {
    model: Arc<Mutex<DriveModel>>,
    exchanges: Arc<Mutex<Vec<Exchange>>>,
    connected: bool,
    stats: TransportStats,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: DriveModel) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
            ..Self::default()
        }
    }

    /// Shared handle on the model
    pub fn model(&self) -> Arc<Mutex<DriveModel>> {
        Arc::clone(&self.model)
    }

    /// Run `f` against the model
    pub fn with_drive<R>(&self, f: impl FnOnce(&mut DriveModel) -> R) -> ModbusResult<R> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| ModbusError::internal("Failed to lock drive model"))?;
        Ok(f(&mut model))
    }

    /// Exchanges served so far, oldest first
    pub fn exchanges(&self) -> Vec<Exchange> {
        self.exchanges.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn clear_exchanges(&self) {
        if let Ok(mut log) = self.exchanges.lock() {
            log.clear();
        }
    }

    /// Values of every write starting at `address`
    pub fn writes_to(&self, address: u16) -> Vec<Vec<u16>> {
        self.exchanges()
            .into_iter()
            .filter_map(|exchange| match exchange {
                Exchange::Write { address: a, values } if a == address => Some(values),
                _ => None,
            })
            .collect()
    }

    fn record(&self, exchange: Exchange) {
        if let Ok(mut log) = self.exchanges.lock() {
            log.push(exchange);
        }
    }

    fn check_connected(&self) -> ModbusResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(ModbusError::connection("Not connected"))
        }
    }

    fn account<R>(&mut self, result: &ModbusResult<R>) {
        self.stats.requests_sent += 1;
        match result {
            Ok(_) => self.stats.responses_received += 1,
            Err(_) => self.stats.errors += 1,
        }
    }
}

#[async_trait]
impl ModbusTransport for SimulatedTransport {
    async fn connect(&mut self, host: &str, port: u16) -> ModbusResult<()> {
        debug!("simulated drive connected as {}:{}", host, port);
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> ModbusResult<()> {
        self.connected = false;
        Ok(())
    }

    async fn read_registers(&mut self, address: u16, count: u16) -> ModbusResult<Vec<u16>> {
        self.check_connected()?;
        self.record(Exchange::Read { address, count });
        let result = self.with_drive(|drive| drive.read(address, count)).and_then(|r| r);
        self.account(&result);
        result
    }

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> ModbusResult<()> {
        self.check_connected()?;
        self.record(Exchange::Write {
            address,
            values: values.to_vec(),
        });
        let result = self.with_drive(|drive| drive.write(address, values)).and_then(|r| r);
        self.account(&result);
        result
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Modbus TCP server in front of a [`DriveModel`]
///
/// The accept loop runs on a spawned task until [`DriveSimulator::shutdown`]
/// is called or the simulator is dropped.
pub struct DriveSimulator {
    model: Arc<Mutex<DriveModel>>,
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
}

impl DriveSimulator {
    /// Bind `address` (use port 0 for an ephemeral port) and start serving
    pub async fn bind(address: &str, unit_id: UnitId) -> ModbusResult<Self> {
        Self::bind_with_model(address, unit_id, DriveModel::new()).await
    }

    pub async fn bind_with_model(address: &str, unit_id: UnitId, model: DriveModel) -> ModbusResult<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| ModbusError::connection(format!("Failed to bind to {}: {}", address, e)))?;
        let local_addr = listener.local_addr()?;

        let model = Arc::new(Mutex::new(model));
        let (shutdown_tx, _) = broadcast::channel(1);

        info!("Drive simulator listening on {} (unit {})", local_addr, unit_id);

        let served = Arc::clone(&model);
        let clients_tx = shutdown_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((stream, peer)) => {
                            debug!("Accepted connection from {}", peer);
                            let model = Arc::clone(&served);
                            let shutdown_rx = clients_tx.subscribe();
                            tokio::spawn(async move {
                                Self::handle_client(stream, peer, model, unit_id, shutdown_rx).await;
                            });
                        }
                        Err(e) => error!("Failed to accept connection: {}", e),
                    },
                    _ = shutdown_rx.recv() => {
                        info!("Drive simulator on {} stopped", local_addr);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            model,
            local_addr,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared handle on the served model
    pub fn model(&self) -> Arc<Mutex<DriveModel>> {
        Arc::clone(&self.model)
    }

    /// Stop accepting and close client connections
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    async fn handle_client(
        mut stream: TcpStream,
        peer: SocketAddr,
        model: Arc<Mutex<DriveModel>>,
        unit_id: UnitId,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                frame = Self::read_frame(&mut stream) => {
                    let frame = match frame {
                        Ok(Some(frame)) => frame,
                        Ok(None) => {
                            debug!("Client {} disconnected", peer);
                            break;
                        }
                        Err(e) => {
                            warn!("Dropping client {}: {}", peer, e);
                            break;
                        }
                    };

                    let Some(response) = Self::process_frame(&frame, &model, unit_id) else {
                        continue;
                    };
                    if let Err(e) = stream.write_all(&response).await {
                        error!("Failed to send response to {}: {}", peer, e);
                        break;
                    }
                }
            }
        }
    }

    /// Read one MBAP frame; `None` on a clean close
    async fn read_frame(stream: &mut TcpStream) -> ModbusResult<Option<Vec<u8>>> {
        let mut header = [0u8; MBAP_HEADER_SIZE];
        match stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if length < 2 || MBAP_HEADER_SIZE + length > crate::MAX_TCP_FRAME_SIZE {
            return Err(ModbusError::frame(format!("Invalid MBAP length {}", length)));
        }

        let mut frame = vec![0u8; MBAP_HEADER_SIZE + length];
        frame[..MBAP_HEADER_SIZE].copy_from_slice(&header);
        stream.read_exact(&mut frame[MBAP_HEADER_SIZE..]).await?;
        Ok(Some(frame))
    }

    /// Serve one request frame and build the response frame
    ///
    /// Frames for another unit id or with a non-zero protocol id get no answer.
    fn process_frame(frame: &[u8], model: &Mutex<DriveModel>, unit_id: UnitId) -> Option<Vec<u8>> {
        let transaction_id = u16::from_be_bytes([frame[0], frame[1]]);
        let protocol_id = u16::from_be_bytes([frame[2], frame[3]]);
        let request_unit = frame[MBAP_HEADER_SIZE];
        let pdu = &frame[MBAP_HEADER_SIZE + 1..];

        if protocol_id != 0 || request_unit != unit_id {
            warn!(
                "Ignoring frame TID={} protocol={} unit={}",
                transaction_id, protocol_id, request_unit
            );
            return None;
        }

        debug!(
            "Processing request: TID={}, Function=0x{:02x}, Unit={}",
            transaction_id, pdu[0], request_unit
        );

        let response_pdu = match Self::serve(request_unit, pdu, model) {
            Ok(response) => response.encode_pdu(),
            Err(ModbusError::Exception { function, code, .. }) => ModbusResponse::encode_exception(function, code),
            Err(ModbusError::InvalidFunction { code }) => {
                ModbusResponse::encode_exception(code, ModbusException::IllegalFunction.to_u8())
            }
            Err(e) => {
                debug!("Rejecting request: {}", e);
                ModbusResponse::encode_exception(pdu[0], ModbusException::IllegalDataValue.to_u8())
            }
        };

        let mut response = Vec::with_capacity(MBAP_HEADER_SIZE + 1 + response_pdu.len());
        response.extend_from_slice(&transaction_id.to_be_bytes());
        response.extend_from_slice(&0u16.to_be_bytes());
        response.extend_from_slice(&((1 + response_pdu.len()) as u16).to_be_bytes());
        response.push(request_unit);
        response.extend_from_slice(&response_pdu);
        Some(response)
    }

    fn serve(unit_id: UnitId, pdu: &[u8], model: &Mutex<DriveModel>) -> ModbusResult<ModbusResponse> {
        let request = ModbusRequest::decode_pdu(unit_id, pdu)?;
        let function = request.function.to_u8();
        request
            .validate()
            .map_err(|_| ModbusError::exception(function, ModbusException::IllegalDataValue.to_u8()))?;

        let mut drive = model
            .lock()
            .map_err(|_| ModbusError::exception(function, ModbusException::ServerDeviceFailure.to_u8()))?;

        let registers = match request.function {
            ModbusFunction::ReadHoldingRegisters => drive.read(request.address, request.quantity)?,
            ModbusFunction::WriteSingleRegister | ModbusFunction::WriteMultipleRegisters => {
                drive.write(request.address, &request.values)?;
                Vec::new()
            }
        };

        Ok(ModbusResponse::for_request(&request, &registers))
    }
}

impl Drop for DriveSimulator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enable(model: &mut DriveModel) {
        model.write(CONTROL_WORD.address, &[0x0006]).unwrap();
        model.write(CONTROL_WORD.address, &[0x0007]).unwrap();
        model.write(CONTROL_WORD.address, &[0x000F]).unwrap();
    }

    #[test]
    fn test_defaults() {
        let model = DriveModel::new();
        assert_eq!(model.state(), DriveState::SwitchOnDisabled);
        assert_eq!(model.status_word().state().unwrap(), DriveState::SwitchOnDisabled);
        assert_eq!(model.register(STEPS_PER_REVOLUTION.address), 12800);
        assert_eq!(model.u32_at(MOTOR_CODE.address), 0x15B1);
        assert_eq!(model.read(IP_ADDRESS.address, 4).unwrap(), vec![192, 168, 1, 100]);
    }

    #[test]
    fn test_power_up_sequence() {
        let mut model = DriveModel::new();
        enable(&mut model);
        assert_eq!(model.state(), DriveState::OperationEnabled);
        assert!(model.status_word().operation_enabled());
        assert!(model.status_word().voltage_enabled());

        // quick stop, then release
        model.write(CONTROL_WORD.address, &[0x000B]).unwrap();
        assert_eq!(model.state(), DriveState::QuickStopActive);
        model.write(CONTROL_WORD.address, &[0x000F]).unwrap();
        assert_eq!(model.state(), DriveState::OperationEnabled);
    }

    #[test]
    fn test_fault_reset_needs_rising_edge() {
        let mut model = DriveModel::new();
        model.inject_fault(0x4310);
        assert!(model.status_word().fault());
        assert_eq!(model.register(ERROR_CODE.address), 0x4310);

        model.write(CONTROL_WORD.address, &[0x0080]).unwrap();
        assert_eq!(model.state(), DriveState::SwitchOnDisabled);
        assert_eq!(model.register(ERROR_ACTIVE.address), 0);

        model.inject_fault(0x2130);
        // bit 7 still set: no edge
        model.write(CONTROL_WORD.address, &[0x0080]).unwrap();
        assert_eq!(model.state(), DriveState::Fault);
        model.write(CONTROL_WORD.address, &[0x0000]).unwrap();
        model.write(CONTROL_WORD.address, &[0x0080]).unwrap();
        assert_eq!(model.state(), DriveState::SwitchOnDisabled);
    }

    #[test]
    fn test_sticky_fault() {
        let mut model = DriveModel::new();
        model.set_sticky_fault(true);
        model.inject_fault(0x5100);
        model.write(CONTROL_WORD.address, &[0x0080]).unwrap();
        assert_eq!(model.state(), DriveState::Fault);
    }

    #[test]
    fn test_relative_and_absolute_setpoints() {
        let mut model = DriveModel::new();
        enable(&mut model);
        model.set_actual_position(1000);

        model.write(TARGET_POSITION.address, &[500, 0]).unwrap();
        model.write(CONTROL_WORD.address, &[0x004F]).unwrap();
        model.write(CONTROL_WORD.address, &[0x005F]).unwrap();
        assert_eq!(model.actual_position(), 1500);
        assert!(model.status_word().setpoint_acknowledged());
        assert!(model.status_word().target_reached());

        model.write(CONTROL_WORD.address, &[0x000F]).unwrap();
        assert!(!model.status_word().setpoint_acknowledged());

        model.write(TARGET_POSITION.address, &[0xFFFF, 0xFFFF]).unwrap();
        model.write(CONTROL_WORD.address, &[0x001F]).unwrap();
        assert_eq!(model.actual_position(), -1);
    }

    #[test]
    fn test_setpoint_ignored_when_not_enabled_or_suppressed() {
        let mut model = DriveModel::new();
        model.write(TARGET_POSITION.address, &[500, 0]).unwrap();
        model.write(CONTROL_WORD.address, &[0x0010]).unwrap();
        assert_eq!(model.actual_position(), 0);

        enable(&mut model);
        model.set_acknowledge_setpoints(false);
        model.write(CONTROL_WORD.address, &[0x001F]).unwrap();
        assert!(!model.status_word().setpoint_acknowledged());
        assert_eq!(model.actual_position(), 0);
    }

    #[test]
    fn test_velocity_mode() {
        let mut model = DriveModel::new();
        model.write(MODE_OF_OPERATION.address, &[3]).unwrap();
        assert_eq!(model.register(MODE_OF_OPERATION_DISPLAY.address), 3);
        model.write(TARGET_VELOCITY.address, &[0xF000, 0xFFFF]).unwrap();
        assert_eq!(model.actual_velocity(), 0);

        enable(&mut model);
        assert_eq!(model.actual_velocity(), -4096);
    }

    #[test]
    fn test_read_only_write_rejected() {
        let mut model = DriveModel::new();
        let err = model.write(ACTUAL_POSITION.address, &[1, 0]).unwrap_err();
        assert_eq!(err, ModbusError::exception(0x10, 0x02));
        let err = model.read(0, 126).unwrap_err();
        assert_eq!(err, ModbusError::exception(0x03, 0x03));
    }

    #[test]
    fn test_exception_frame() {
        let model = Mutex::new(DriveModel::new());
        // TID 7, write single register 1001 = 5
        let frame = [0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x03, 0xE9, 0x00, 0x05];
        let response = DriveSimulator::process_frame(&frame, &model, 1).unwrap();
        assert_eq!(response, vec![0x00, 0x07, 0x00, 0x00, 0x00, 0x03, 0x01, 0x86, 0x02]);

        // Unsupported function code
        let frame = [0x00, 0x08, 0x00, 0x00, 0x00, 0x06, 0x01, 0x04, 0x03, 0xE9, 0x00, 0x01];
        let response = DriveSimulator::process_frame(&frame, &model, 1).unwrap();
        assert_eq!(&response[7..], &[0x84, 0x01]);
    }

    #[test]
    fn test_alarm_log() {
        let mut model = DriveModel::new();
        model.inject_fault(0x8611);
        model.inject_fault(0x8400);
        let log = model.read(ALARM_LOG.address, 4).unwrap();
        assert_eq!(log, vec![2, 0x8400, 1, 0x8611]);
        assert!(model.status_word().following_error());

        model.write(ALARM_LOG_RESET.address, &[1]).unwrap();
        assert_eq!(model.read(ALARM_LOG.address, 20).unwrap(), vec![0; 20]);
    }

    #[tokio::test]
    async fn test_simulated_transport_records_exchanges() {
        let mut transport = SimulatedTransport::new();
        assert!(transport.read_registers(1001, 1).await.is_err());

        transport.connect("sim", 502).await.unwrap();
        let status = transport.read_registers(1001, 1).await.unwrap();
        assert_eq!(DriveState::decode(status[0]).unwrap(), DriveState::SwitchOnDisabled);
        transport.write_registers(1040, &[0x0006]).await.unwrap();

        let handle = transport.clone();
        assert_eq!(
            handle.exchanges(),
            vec![
                Exchange::Read { address: 1001, count: 1 },
                Exchange::Write { address: 1040, values: vec![0x0006] },
            ]
        );
        assert_eq!(handle.writes_to(1040), vec![vec![0x0006]]);
        assert_eq!(
            handle.with_drive(|drive| drive.state()).unwrap(),
            DriveState::ReadyToSwitchOn
        );
        assert_eq!(transport.get_stats().responses_received, 2);
    }
}
