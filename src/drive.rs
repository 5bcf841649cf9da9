/// CSD-MT-94 command facade
///
/// [`CsdMt94`] is the public entry point. It owns the session to one drive and
/// combines the register map, unit converter and state machine into semantic
/// operations: power control, parameter access, service registers and motion.
///
/// Every operation validates its arguments before the first exchange, so a
/// rejected call never leaves a partial write on the drive.
///
/// ```rust,no_run
/// use csd_mt94::{CoordinateSystem, CsdMt94, DriveConfig, DriveResult, Unit};
///
/// #[tokio::main]
/// async fn main() -> DriveResult<()> {
///     let config = DriveConfig::new("192.168.1.100").with_steps_per_revolution(12800);
///     let mut drive = CsdMt94::new(config)?;
///     drive.connect().await?;
///
///     drive.ensure_operation_enabled().await?;
///     drive.rotate(90.0, CoordinateSystem::Relative, Unit::Degrees).await?;
///     println!("at {} deg", drive.actual_position(Unit::Degrees).await?);
///
///     drive.disconnect().await
/// }
/// ```

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::client::RegisterClient;
use crate::config::DriveConfig;
use crate::error::{DriveError, DriveResult, ModbusError};
use crate::logging::CallbackLogger;
use crate::protocol::data_utils::registers_to_u32;
use crate::register_map::{
    RegisterDescriptor, RegisterMap, ACTUAL_POSITION, ACTUAL_VELOCITY, ALARM_LOG, ALARM_LOG_RESET,
    CONTROL_WORD, CURRENT_RATIO, CURRENT_RECYCLING_ENABLE, CURRENT_REDUCTION, CURRENT_REDUCTION_RATIO,
    DEVICE_INFO, DRIVE_TEMPERATURE, DRIVE_WORD_ORDER, ENCODER_COUNTS_PER_REVOLUTION, ENCODER_WINDOW,
    ERROR_ACTIVE, ERROR_CODE, FOLLOWING_ERROR_REACTION, GATEWAY, IP_ADDRESS, MODE_OF_OPERATION,
    MODE_OF_OPERATION_DISPLAY, MOTOR_CODE, MOTOR_CURRENT_LIMIT, MOTOR_DYNAMIC_BALANCING,
    MOTOR_PROPORTIONAL_GAIN, NETMASK, OUTPUT, POSITION_ERROR_RESET, PROFILE_ACCELERATION,
    PROFILE_DECELERATION, PROFILE_VELOCITY, RESTORE_DEFAULTS, REVOLUTION_DIRECTION,
    STEPS_PER_REVOLUTION, STORE_PARAMETERS, TARGET_POSITION, TARGET_VELOCITY,
};
use crate::state::{ControlCommand, ControlWord, DriveState, DriveStateMachine, StatusWord};
use crate::transport::{ModbusTransport, TcpTransport, TransportStats};
use crate::units::{CoordinateSystem, Unit, UnitConverter};

/// Wait for target reached used by [`MotionOptions::default`]
pub const DEFAULT_MOTION_TIMEOUT: Duration = Duration::from_secs(10);

const SAVE_PARAMETERS_KEY: u16 = 0x6173;
const SAVE_NETWORK_KEY: u16 = 0x1111;
const RESTORE_DEFAULTS_KEY: u16 = 0x6F6C;

/// Active drive error, decoded from the error code register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DriveFault {
    pub code: u16,
    pub message: &'static str,
}

impl DriveFault {
    pub fn from_code(code: u16) -> Self {
        let message = match code {
            0x8611 => "Motor following error",
            0x8400 => "Axis speed too high",
            0x5100 => "Error power supply out of range",
            0x4310 => "Error drive excessive temperature",
            0x2130 => "Error short circuit",
            0x0000 => "Emergency end",
            _ => "Unknown error",
        };
        Self { code, message }
    }
}

impl fmt::Display for DriveFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}: {}", self.code, self.message)
    }
}

/// One entry of the drive alarm log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmEvent {
    /// Event time since power on, as reported by the drive
    pub time: u16,
    pub code: u16,
}

impl AlarmEvent {
    pub fn fault(&self) -> DriveFault {
        DriveFault::from_code(self.code)
    }
}

/// Identification registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub software_version: u32,
    pub product_code: u32,
    pub hardware_version: u32,
    pub serial_number: u32,
    pub little_big_endian: u16,
}

impl DeviceInfo {
    /// Decode the 9-register identification block
    pub fn from_registers(registers: &[u16]) -> DriveResult<Self> {
        if registers.len() != DEVICE_INFO.count as usize {
            return Err(ModbusError::invalid_data(format!(
                "device info needs {} registers, got {}",
                DEVICE_INFO.count,
                registers.len()
            ))
            .into());
        }

        let pair = |index: usize| registers_to_u32(&registers[index..index + 2], DRIVE_WORD_ORDER);
        Ok(Self {
            software_version: pair(0)?,
            product_code: pair(2)?,
            hardware_version: pair(4)?,
            serial_number: pair(6)?,
            little_big_endian: registers[8],
        })
    }
}

/// IPv4 settings of the drive's Ethernet port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

/// One octet per register
fn decode_ipv4(registers: &[u16]) -> DriveResult<Ipv4Addr> {
    let octets = registers
        .iter()
        .map(|value| {
            u8::try_from(*value)
                .map_err(|_| ModbusError::invalid_data(format!("address octet {} out of range", value)))
        })
        .collect::<Result<Vec<u8>, _>>()?;

    match octets.as_slice() {
        [a, b, c, d] => Ok(Ipv4Addr::new(*a, *b, *c, *d)),
        _ => Err(ModbusError::invalid_data(format!("expected 4 address registers, got {}", octets.len())).into()),
    }
}

/// Operating modes supported by the drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModeOfOperation {
    ProfilePosition = 1,
    ProfileVelocity = 3,
    Homing = 6,
}

impl TryFrom<i64> for ModeOfOperation {
    type Error = DriveError;

    fn try_from(value: i64) -> DriveResult<Self> {
        match value {
            1 => Ok(Self::ProfilePosition),
            3 => Ok(Self::ProfileVelocity),
            6 => Ok(Self::Homing),
            other => Err(DriveError::invalid_argument(format!("invalid mode of operation {}", other))),
        }
    }
}

impl fmt::Display for ModeOfOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ProfilePosition => "Profile position mode",
            Self::ProfileVelocity => "Profile velocity mode",
            Self::Homing => "Homing mode",
        };
        f.write_str(name)
    }
}

/// Angular error limit that raises the synchronism loss error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncoderWindow {
    Deg0_9 = 0,
    Deg1_8 = 1,
    Deg3_6 = 2,
    Deg5_4 = 3,
    Deg7_2 = 4,
    Deg9_0 = 5,
}

impl EncoderWindow {
    pub fn degrees(self) -> f64 {
        match self {
            Self::Deg0_9 => 0.9,
            Self::Deg1_8 => 1.8,
            Self::Deg3_6 => 3.6,
            Self::Deg5_4 => 5.4,
            Self::Deg7_2 => 7.2,
            Self::Deg9_0 => 9.0,
        }
    }
}

impl TryFrom<i64> for EncoderWindow {
    type Error = DriveError;

    fn try_from(value: i64) -> DriveResult<Self> {
        match value {
            0 => Ok(Self::Deg0_9),
            1 => Ok(Self::Deg1_8),
            2 => Ok(Self::Deg3_6),
            3 => Ok(Self::Deg5_4),
            4 => Ok(Self::Deg7_2),
            5 => Ok(Self::Deg9_0),
            other => Err(DriveError::invalid_argument(format!("invalid encoder window {}", other))),
        }
    }
}

/// Drive reaction to a following error
///
/// Motors without an encoder must use [`FollowingErrorReaction::NoEncoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FollowingErrorReaction {
    Reaction00 = 0x00,
    Reaction01 = 0x01,
    Reaction02 = 0x02,
    NoEncoder = 0x11,
}

impl TryFrom<i64> for FollowingErrorReaction {
    type Error = DriveError;

    fn try_from(value: i64) -> DriveResult<Self> {
        match value {
            0x00 => Ok(Self::Reaction00),
            0x01 => Ok(Self::Reaction01),
            0x02 => Ok(Self::Reaction02),
            0x11 => Ok(Self::NoEncoder),
            other => Err(DriveError::invalid_argument(format!(
                "invalid following error reaction 0x{:02X}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RevolutionDirection {
    Normal = 0,
    Inverted = 1,
}

impl TryFrom<i64> for RevolutionDirection {
    type Error = DriveError;

    fn try_from(value: i64) -> DriveResult<Self> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Inverted),
            other => Err(DriveError::invalid_argument(format!("invalid revolution direction {}", other))),
        }
    }
}

/// How a position move is sequenced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionOptions {
    /// Bring the drive to `OperationEnabled` first
    pub ensure_enabled: bool,
    /// Control word bit 5: a new set-point replaces the running one
    pub change_set_immediately: bool,
    /// Poll for set-point acknowledge and complete the bit 4 handshake
    pub wait_for_acknowledge: bool,
    /// Wait for status bit 10 (target reached) within this limit
    pub wait_for_target: Option<Duration>,
}

impl Default for MotionOptions {
    fn default() -> Self {
        Self {
            ensure_enabled: true,
            change_set_immediately: false,
            wait_for_acknowledge: true,
            wait_for_target: Some(DEFAULT_MOTION_TIMEOUT),
        }
    }
}

impl MotionOptions {
    pub fn with_ensure_enabled(mut self, ensure_enabled: bool) -> Self {
        self.ensure_enabled = ensure_enabled;
        self
    }

    pub fn with_change_set_immediately(mut self, immediately: bool) -> Self {
        self.change_set_immediately = immediately;
        self
    }

    pub fn with_wait_for_acknowledge(mut self, wait: bool) -> Self {
        self.wait_for_acknowledge = wait;
        self
    }

    pub fn with_wait_for_target(mut self, limit: Option<Duration>) -> Self {
        self.wait_for_target = limit;
        self
    }
}

/// Client for one CSD-MT-94 drive
pub struct CsdMt94<T: ModbusTransport = TcpTransport> {
    client: RegisterClient<T>,
    config: DriveConfig,
    converter: UnitConverter,
    state_machine: DriveStateMachine,
}

impl CsdMt94<TcpTransport> {
    /// Create a client using Modbus TCP
    ///
    /// No connection is made until [`connect`](Self::connect).
    pub fn new(config: DriveConfig) -> DriveResult<Self> {
        let mut transport = TcpTransport::new(config.unit_id, config.timeout());
        transport.set_packet_logging(config.packet_logging);
        Self::with_transport(transport, config)
    }
}

impl<T: ModbusTransport> CsdMt94<T> {
    /// Create a client over any transport
    pub fn with_transport(transport: T, config: DriveConfig) -> DriveResult<Self> {
        config.validate()?;

        Ok(Self {
            client: RegisterClient::new(transport, config.unit_id),
            converter: UnitConverter::new(config.steps_per_revolution, config.millimetres_per_revolution),
            state_machine: DriveStateMachine::new(config.max_transition_attempts, config.state_poll_interval()),
            config,
        })
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    pub fn converter(&self) -> &UnitConverter {
        &self.converter
    }

    pub fn set_steps_per_revolution(&mut self, steps: Option<u32>) {
        self.converter.set_steps_per_revolution(steps);
    }

    pub fn set_millimetres_per_revolution(&mut self, millimetres: Option<f64>) {
        self.converter.set_millimetres_per_revolution(millimetres);
    }

    /// Attach a per-exchange logger
    pub fn set_logger(&mut self, logger: CallbackLogger) {
        self.client.set_logger(logger);
    }

    pub fn transport(&self) -> &T {
        self.client.transport()
    }

    // ---- Session ----

    pub async fn connect(&mut self) -> DriveResult<()> {
        self.client.connect(&self.config.host, self.config.port).await?;
        info!("Connected to CSD-MT-94 at {}:{}", self.config.host, self.config.port);
        Ok(())
    }

    pub async fn disconnect(&mut self) -> DriveResult<()> {
        self.client.disconnect().await?;
        info!("Disconnected from {}:{}", self.config.host, self.config.port);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn transport_stats(&self) -> TransportStats {
        self.client.get_stats()
    }

    // ---- Generic register access ----

    /// Read a register by name, in native counts
    pub async fn read_register(&mut self, name: &str) -> DriveResult<i64> {
        let descriptor = RegisterMap::resolve(name)?;
        self.client.read(descriptor).await
    }

    /// Write a register by name, in native counts
    pub async fn write_register(&mut self, name: &str, value: i64) -> DriveResult<()> {
        let descriptor = RegisterMap::resolve(name)?;
        self.client.write(descriptor, value).await
    }

    /// Read a register by name, converted to `unit`
    pub async fn read_in(&mut self, name: &str, unit: Unit) -> DriveResult<f64> {
        let descriptor = RegisterMap::resolve(name)?;
        self.read_scaled(descriptor, unit).await
    }

    /// Write a register by name from a value in `unit`
    pub async fn write_in(&mut self, name: &str, value: f64, unit: Unit) -> DriveResult<()> {
        let descriptor = RegisterMap::resolve(name)?;
        self.write_scaled(descriptor, value, unit).await
    }

    async fn read_scaled(&mut self, descriptor: &RegisterDescriptor, unit: Unit) -> DriveResult<f64> {
        // Fail on units before touching the drive
        self.converter.resolution(unit, descriptor)?;
        let raw = self.client.read(descriptor).await?;
        self.converter.from_native(raw, unit, descriptor)
    }

    async fn write_scaled(&mut self, descriptor: &RegisterDescriptor, value: f64, unit: Unit) -> DriveResult<()> {
        let native = self.converter.to_native(value, unit, descriptor)?;
        self.client.write(descriptor, native).await
    }

    // ---- Power state ----

    pub async fn read_state(&mut self) -> DriveResult<DriveState> {
        self.state_machine.read_state(&mut self.client).await
    }

    pub async fn status_word(&mut self) -> DriveResult<StatusWord> {
        self.state_machine.read_status_word(&mut self.client).await
    }

    pub async fn control_word(&mut self) -> DriveResult<ControlWord> {
        self.state_machine.read_control_word(&mut self.client).await
    }

    pub async fn request_transition(&mut self, command: ControlCommand) -> DriveResult<()> {
        self.state_machine.request_transition(&mut self.client, command).await
    }

    /// Drive the power state machine to `OperationEnabled`
    pub async fn ensure_operation_enabled(&mut self) -> DriveResult<()> {
        self.state_machine.ensure_operation_enabled(&mut self.client).await
    }

    async fn write_control_word(&mut self, control: ControlWord) -> DriveResult<()> {
        self.client.write(&CONTROL_WORD, control.0 as i64).await
    }

    /// Read-modify-write of single control word bits
    async fn update_control_word(&mut self, bits: &[(u8, bool)]) -> DriveResult<ControlWord> {
        let current = self.control_word().await?;
        let next = bits
            .iter()
            .fold(current, |control, (bit, value)| control.with_bit(*bit, *value));
        debug!("control word {} -> {}", current, next);
        self.write_control_word(next).await?;
        Ok(next)
    }

    pub async fn shutdown(&mut self) -> DriveResult<()> {
        self.request_transition(ControlCommand::Shutdown).await
    }

    pub async fn switch_on(&mut self) -> DriveResult<()> {
        self.request_transition(ControlCommand::SwitchOn).await
    }

    /// Clear control word bit 0 only
    pub async fn switch_off(&mut self) -> DriveResult<()> {
        self.update_control_word(&[(ControlWord::SWITCH_ON, false)]).await.map(|_| ())
    }

    /// Set control word bit 1 only
    pub async fn enable_voltage(&mut self) -> DriveResult<()> {
        self.update_control_word(&[(ControlWord::ENABLE_VOLTAGE, true)]).await.map(|_| ())
    }

    pub async fn disable_voltage(&mut self) -> DriveResult<()> {
        self.request_transition(ControlCommand::DisableVoltage).await
    }

    /// CiA-402 quick stop (bit 2 cleared, it is active low)
    pub async fn quick_stop(&mut self) -> DriveResult<()> {
        self.request_transition(ControlCommand::QuickStop).await
    }

    /// Set bit 2 again; from `QuickStopActive` this resumes operation
    pub async fn release_quick_stop(&mut self) -> DriveResult<()> {
        self.update_control_word(&[(ControlWord::QUICK_STOP, true)]).await.map(|_| ())
    }

    pub async fn enable_operation(&mut self) -> DriveResult<()> {
        self.request_transition(ControlCommand::EnableOperation).await
    }

    pub async fn disable_operation(&mut self) -> DriveResult<()> {
        self.request_transition(ControlCommand::DisableOperation).await
    }

    pub async fn fault_reset(&mut self) -> DriveResult<()> {
        self.request_transition(ControlCommand::FaultReset).await
    }

    /// Set or release the halt bit (8)
    pub async fn halt(&mut self, halted: bool) -> DriveResult<()> {
        self.update_control_word(&[(ControlWord::HALT, halted)]).await.map(|_| ())
    }

    // ---- Parameters ----

    pub async fn motor_code(&mut self) -> DriveResult<u32> {
        Ok(self.client.read(&MOTOR_CODE).await? as u32)
    }

    pub async fn set_motor_code(&mut self, code: u32) -> DriveResult<()> {
        self.client.write(&MOTOR_CODE, code as i64).await
    }

    /// Mode currently active on the drive
    pub async fn mode_of_operation(&mut self) -> DriveResult<ModeOfOperation> {
        ModeOfOperation::try_from(self.client.read(&MODE_OF_OPERATION_DISPLAY).await?)
    }

    pub async fn set_mode_of_operation(&mut self, mode: ModeOfOperation) -> DriveResult<()> {
        debug!("mode of operation -> {}", mode);
        self.client.write(&MODE_OF_OPERATION, mode as i64).await
    }

    pub async fn profile_velocity(&mut self, unit: Unit) -> DriveResult<f64> {
        self.read_scaled(&PROFILE_VELOCITY, unit).await
    }

    /// Cruise speed of position moves (0 to 800000 steps/s)
    pub async fn set_profile_velocity(&mut self, value: f64, unit: Unit) -> DriveResult<()> {
        self.write_scaled(&PROFILE_VELOCITY, value, unit).await
    }

    pub async fn profile_acceleration(&mut self, unit: Unit) -> DriveResult<f64> {
        self.read_scaled(&PROFILE_ACCELERATION, unit).await
    }

    pub async fn set_profile_acceleration(&mut self, value: f64, unit: Unit) -> DriveResult<()> {
        self.write_scaled(&PROFILE_ACCELERATION, value, unit).await
    }

    pub async fn profile_deceleration(&mut self, unit: Unit) -> DriveResult<f64> {
        self.read_scaled(&PROFILE_DECELERATION, unit).await
    }

    pub async fn set_profile_deceleration(&mut self, value: f64, unit: Unit) -> DriveResult<()> {
        self.write_scaled(&PROFILE_DECELERATION, value, unit).await
    }

    pub async fn target_velocity(&mut self, unit: Unit) -> DriveResult<f64> {
        self.read_scaled(&TARGET_VELOCITY, unit).await
    }

    pub async fn set_target_velocity(&mut self, value: f64, unit: Unit) -> DriveResult<()> {
        self.write_scaled(&TARGET_VELOCITY, value, unit).await
    }

    pub async fn actual_position(&mut self, unit: Unit) -> DriveResult<f64> {
        self.read_scaled(&ACTUAL_POSITION, unit).await
    }

    pub async fn actual_velocity(&mut self, unit: Unit) -> DriveResult<f64> {
        self.read_scaled(&ACTUAL_VELOCITY, unit).await
    }

    pub async fn target_position(&mut self, unit: Unit) -> DriveResult<f64> {
        self.read_scaled(&TARGET_POSITION, unit).await
    }

    /// Drive current as a percentage of the nominal full scale (0-120)
    pub async fn current_ratio(&mut self) -> DriveResult<u16> {
        Ok(self.client.read(&CURRENT_RATIO).await? as u16)
    }

    pub async fn set_current_ratio(&mut self, ratio: u16) -> DriveResult<()> {
        self.client.write(&CURRENT_RATIO, ratio as i64).await
    }

    pub async fn drive_steps_per_revolution(&mut self) -> DriveResult<u32> {
        Ok(self.client.read(&STEPS_PER_REVOLUTION).await? as u32)
    }

    /// Load the drive's steps per revolution into the unit converter
    pub async fn sync_steps_per_revolution(&mut self) -> DriveResult<u32> {
        let steps = self.drive_steps_per_revolution().await?;
        if steps == 0 {
            return Err(DriveError::misconfigured_units("drive reports 0 steps per revolution"));
        }
        self.converter.set_steps_per_revolution(Some(steps));
        debug!("steps per revolution synchronised: {}", steps);
        Ok(steps)
    }

    pub async fn current_reduction(&mut self) -> DriveResult<u16> {
        Ok(self.client.read(&CURRENT_REDUCTION).await? as u16)
    }

    pub async fn encoder_window(&mut self) -> DriveResult<EncoderWindow> {
        EncoderWindow::try_from(self.client.read(&ENCODER_WINDOW).await?)
    }

    pub async fn set_encoder_window(&mut self, window: EncoderWindow) -> DriveResult<()> {
        self.client.write(&ENCODER_WINDOW, window as i64).await
    }

    pub async fn following_error_reaction(&mut self) -> DriveResult<FollowingErrorReaction> {
        FollowingErrorReaction::try_from(self.client.read(&FOLLOWING_ERROR_REACTION).await?)
    }

    pub async fn set_following_error_reaction(&mut self, reaction: FollowingErrorReaction) -> DriveResult<()> {
        self.client.write(&FOLLOWING_ERROR_REACTION, reaction as i64).await
    }

    pub async fn position_error_reset(&mut self) -> DriveResult<()> {
        self.client.write(&POSITION_ERROR_RESET, 1).await
    }

    /// Drive the digital outputs (bit mask, 0-31)
    pub async fn set_output(&mut self, outputs: u16) -> DriveResult<()> {
        self.client.write(&OUTPUT, outputs as i64).await
    }

    pub async fn revolution_direction(&mut self) -> DriveResult<RevolutionDirection> {
        RevolutionDirection::try_from(self.client.read(&REVOLUTION_DIRECTION).await?)
    }

    /// Only takes effect at drive start-up
    pub async fn set_revolution_direction(&mut self, direction: RevolutionDirection) -> DriveResult<()> {
        warn!("revolution direction can only be set at machine start-up, not during operation");
        self.client.write(&REVOLUTION_DIRECTION, direction as i64).await
    }

    /// Standstill current reduction in percent (1-100)
    pub async fn current_reduction_ratio(&mut self) -> DriveResult<u16> {
        Ok(self.client.read(&CURRENT_REDUCTION_RATIO).await? as u16)
    }

    pub async fn set_current_reduction_ratio(&mut self, ratio: u16) -> DriveResult<()> {
        self.client.write(&CURRENT_REDUCTION_RATIO, ratio as i64).await
    }

    pub async fn encoder_counts_per_revolution(&mut self) -> DriveResult<u16> {
        Ok(self.client.read(&ENCODER_COUNTS_PER_REVOLUTION).await? as u16)
    }

    pub async fn set_encoder_counts_per_revolution(&mut self, counts: u16) -> DriveResult<()> {
        self.client.write(&ENCODER_COUNTS_PER_REVOLUTION, counts as i64).await
    }

    /// Degrees Celsius
    pub async fn drive_temperature(&mut self) -> DriveResult<u16> {
        Ok(self.client.read(&DRIVE_TEMPERATURE).await? as u16)
    }

    pub async fn motor_current_limit(&mut self) -> DriveResult<u16> {
        Ok(self.client.read(&MOTOR_CURRENT_LIMIT).await? as u16)
    }

    pub async fn motor_proportional_gain(&mut self) -> DriveResult<u16> {
        Ok(self.client.read(&MOTOR_PROPORTIONAL_GAIN).await? as u16)
    }

    pub async fn motor_dynamic_balancing(&mut self) -> DriveResult<u16> {
        Ok(self.client.read(&MOTOR_DYNAMIC_BALANCING).await? as u16)
    }

    pub async fn current_recycling_enabled(&mut self) -> DriveResult<bool> {
        Ok(self.client.read(&CURRENT_RECYCLING_ENABLE).await? != 0)
    }

    // ---- Service and identification ----

    pub async fn is_error(&mut self) -> DriveResult<bool> {
        Ok(self.client.read(&ERROR_ACTIVE).await? != 0)
    }

    pub async fn error_code(&mut self) -> DriveResult<DriveFault> {
        Ok(DriveFault::from_code(self.client.read(&ERROR_CODE).await? as u16))
    }

    /// The 10 alarm log entries, in register order from 1220
    pub async fn alarms(&mut self) -> DriveResult<Vec<AlarmEvent>> {
        let registers = self.client.read_block(&ALARM_LOG).await?;
        Ok(registers
            .chunks_exact(2)
            .map(|pair| AlarmEvent {
                time: pair[0],
                code: pair[1],
            })
            .collect())
    }

    pub async fn reset_alarm_log(&mut self) -> DriveResult<()> {
        self.client.write(&ALARM_LOG_RESET, 1).await?;
        self.client.write(&ALARM_LOG_RESET, 0).await
    }

    /// Store parameters and/or network settings in non-volatile memory
    ///
    /// Waits `parameter_save_delay` after the last write while the drive
    /// commits to flash.
    pub async fn save_parameters(&mut self, store_parameters: bool, store_network: bool) -> DriveResult<()> {
        if !store_parameters && !store_network {
            return Ok(());
        }
        if store_parameters {
            self.client.write(&STORE_PARAMETERS, SAVE_PARAMETERS_KEY as i64).await?;
        }
        if store_network {
            self.client.write(&STORE_PARAMETERS, SAVE_NETWORK_KEY as i64).await?;
        }
        tokio::time::sleep(self.config.parameter_save_delay()).await;
        info!("Parameters saved");
        Ok(())
    }

    pub async fn restore_default_parameters(&mut self) -> DriveResult<()> {
        self.client.write(&RESTORE_DEFAULTS, RESTORE_DEFAULTS_KEY as i64).await?;
        tokio::time::sleep(self.config.parameter_save_delay()).await;
        info!("Parameters restored to default values");
        Ok(())
    }

    pub async fn device_info(&mut self) -> DriveResult<DeviceInfo> {
        let registers = self.client.read_block(&DEVICE_INFO).await?;
        DeviceInfo::from_registers(&registers)
    }

    pub async fn network_settings(&mut self) -> DriveResult<NetworkSettings> {
        let ip = decode_ipv4(&self.client.read_block(&IP_ADDRESS).await?)?;
        let netmask = decode_ipv4(&self.client.read_block(&NETMASK).await?)?;
        let gateway = decode_ipv4(&self.client.read_block(&GATEWAY).await?)?;
        Ok(NetworkSettings { ip, netmask, gateway })
    }

    // ---- Motion ----

    /// Move to `target` steps and wait for target reached
    pub async fn move_position(&mut self, target: i64, cs: CoordinateSystem) -> DriveResult<()> {
        self.move_position_with(target, cs, &MotionOptions::default()).await
    }

    /// Move to `target` expressed in `unit`
    pub async fn rotate(&mut self, target: f64, cs: CoordinateSystem, unit: Unit) -> DriveResult<()> {
        self.rotate_with(target, cs, unit, &MotionOptions::default()).await
    }

    pub async fn rotate_with(
        &mut self,
        target: f64,
        cs: CoordinateSystem,
        unit: Unit,
        options: &MotionOptions,
    ) -> DriveResult<()> {
        let native = self.converter.to_native(target, unit, &TARGET_POSITION)?;
        self.move_position_with(native, cs, options).await
    }

    /// Start a move and return once the set-point is acknowledged
    pub async fn start_move(&mut self, target: i64, cs: CoordinateSystem) -> DriveResult<()> {
        let options = MotionOptions::default().with_wait_for_target(None);
        self.move_position_with(target, cs, &options).await
    }

    /// Profile position move
    ///
    /// 1. `target` is checked against the target position register
    /// 2. the drive is enabled (optional)
    /// 3. control word: bit 4 cleared, bit 5 and bit 6 per options and `cs`
    /// 4. the target position pair is written in a single exchange
    /// 5. bit 4 is set, status bit 12 is polled (optional), bit 4 is cleared
    /// 6. status bit 10 is awaited (optional)
    ///
    /// # Errors
    ///
    /// - `OutOfRange` - `target` does not fit, nothing was sent
    /// - `SetpointNotAcknowledged` - bit 12 never rose
    /// - `MotionTimeout` - target not reached in time
    pub async fn move_position_with(
        &mut self,
        target: i64,
        cs: CoordinateSystem,
        options: &MotionOptions,
    ) -> DriveResult<()> {
        let target = TARGET_POSITION.check_native(target as i128)?;

        if options.ensure_enabled {
            self.ensure_operation_enabled().await?;
        }

        let control = self
            .control_word()
            .await?
            .with_bit(ControlWord::NEW_SETPOINT, false)
            .with_bit(ControlWord::CHANGE_SET_IMMEDIATELY, options.change_set_immediately)
            .with_bit(ControlWord::RELATIVE, cs.is_relative());
        self.write_control_word(control).await?;

        self.client.write(&TARGET_POSITION, target).await?;
        self.write_control_word(control.with_bit(ControlWord::NEW_SETPOINT, true))
            .await?;

        let acknowledged = if options.wait_for_acknowledge {
            self.wait_for_setpoint_acknowledge().await
        } else {
            Ok(())
        };
        // Bit 4 goes low again whether or not the drive acknowledged
        self.write_control_word(control).await?;
        acknowledged?;
        debug!("set-point {} ({}) accepted", target, cs);

        if let Some(limit) = options.wait_for_target {
            self.wait_for_status(limit, "target reached", StatusWord::target_reached)
                .await?;
            info!("Move to {} ({}) completed", target, cs);
        }
        Ok(())
    }

    async fn wait_for_setpoint_acknowledge(&mut self) -> DriveResult<()> {
        let attempts = self.config.setpoint_ack_attempts;
        for attempt in 1..=attempts {
            if self.status_word().await?.setpoint_acknowledged() {
                return Ok(());
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.state_poll_interval()).await;
            }
        }
        warn!("set-point not acknowledged after {} status reads", attempts);
        Err(DriveError::SetpointNotAcknowledged { attempts })
    }

    /// Poll the status word until `condition` holds or `limit` elapses
    async fn wait_for_status(
        &mut self,
        limit: Duration,
        operation: &'static str,
        condition: fn(StatusWord) -> bool,
    ) -> DriveResult<StatusWord> {
        let deadline = Instant::now() + limit;
        loop {
            let status = self.status_word().await?;
            if condition(status) {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(DriveError::MotionTimeout {
                    operation,
                    timeout_ms: limit.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.config.state_poll_interval()).await;
        }
    }

    /// Run at `value` in profile velocity mode
    pub async fn run_velocity(&mut self, value: f64, unit: Unit) -> DriveResult<()> {
        let native = self.converter.to_native(value, unit, &TARGET_VELOCITY)?;
        self.set_mode_of_operation(ModeOfOperation::ProfileVelocity).await?;
        self.client.write(&TARGET_VELOCITY, native).await?;
        self.ensure_operation_enabled().await
    }

    /// Run the homing procedure and wait for homing attained
    ///
    /// # Errors
    ///
    /// - `HomingFailed` - the drive raised the homing error bit (13)
    /// - `MotionTimeout` - homing not attained within `limit`
    pub async fn home(&mut self, limit: Duration) -> DriveResult<()> {
        self.set_mode_of_operation(ModeOfOperation::Homing).await?;
        self.ensure_operation_enabled().await?;

        let control = self.control_word().await?.with_bit(ControlWord::NEW_SETPOINT, false);
        self.write_control_word(control).await?;
        self.write_control_word(control.with_bit(ControlWord::NEW_SETPOINT, true))
            .await?;

        let outcome = self
            .wait_for_status(limit, "homing attained", |s| s.homing_attained() || s.homing_error())
            .await;
        self.write_control_word(control).await?;

        let status = outcome?;
        if status.homing_error() {
            return Err(DriveError::HomingFailed { status_word: status.0 });
        }
        info!("Homing attained");
        Ok(())
    }
}

#[cfg(all(test, feature = "simulator"))]
mod tests {
    use super::*;
    use crate::simulator::{Exchange, SimulatedTransport};

    async fn drive_with(steps: Option<u32>) -> (CsdMt94<SimulatedTransport>, SimulatedTransport) {
        let transport = SimulatedTransport::new();
        let handle = transport.clone();

        let mut config = DriveConfig::new("sim");
        config.steps_per_revolution = steps;
        config.state_poll_interval_ms = 0;
        config.parameter_save_delay_ms = 0;

        let mut drive = CsdMt94::with_transport(transport, config).unwrap();
        drive.connect().await.unwrap();
        (drive, handle)
    }

    #[tokio::test]
    async fn test_relative_move_handshake() {
        let (mut drive, sim) = drive_with(None).await;
        drive.ensure_operation_enabled().await.unwrap();
        sim.clear_exchanges();

        drive.move_position(25600, CoordinateSystem::Relative).await.unwrap();

        assert_eq!(
            sim.exchanges(),
            vec![
                Exchange::Read { address: 1001, count: 1 },
                Exchange::Read { address: 1040, count: 1 },
                Exchange::Write { address: 1040, values: vec![0x004F] },
                Exchange::Write { address: 1042, values: vec![0x6400, 0x0000] },
                Exchange::Write { address: 1040, values: vec![0x005F] },
                Exchange::Read { address: 1001, count: 1 },
                Exchange::Write { address: 1040, values: vec![0x004F] },
                Exchange::Read { address: 1001, count: 1 },
            ]
        );
        assert_eq!(drive.actual_position(Unit::Native).await.unwrap(), 25600.0);
    }

    #[tokio::test]
    async fn test_move_enables_drive_first() {
        let (mut drive, sim) = drive_with(None).await;
        drive.move_position(-100, CoordinateSystem::Absolute).await.unwrap();

        assert_eq!(sim.writes_to(1042), vec![vec![0xFF9C, 0xFFFF]]);
        assert_eq!(drive.read_state().await.unwrap(), DriveState::OperationEnabled);
        assert_eq!(drive.actual_position(Unit::Native).await.unwrap(), -100.0);
    }

    #[tokio::test]
    async fn test_rotate_without_steps_per_revolution() {
        let (mut drive, sim) = drive_with(None).await;
        let err = drive
            .rotate(25600.0, CoordinateSystem::Relative, Unit::Degrees)
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::MisconfiguredUnits { .. }));
        assert!(sim.exchanges().is_empty());
    }

    #[tokio::test]
    async fn test_rotate_to_zero_absolute() {
        let (mut drive, sim) = drive_with(Some(12800)).await;
        sim.with_drive(|d| d.set_actual_position(5000)).unwrap();

        drive.rotate(0.0, CoordinateSystem::Absolute, Unit::Degrees).await.unwrap();

        assert_eq!(sim.writes_to(1042), vec![vec![0, 0]]);
        let setpoint_writes: Vec<u16> = sim
            .writes_to(1040)
            .into_iter()
            .map(|values| values[0])
            .filter(|value| value & 0x0010 != 0)
            .collect();
        assert!(setpoint_writes.iter().all(|value| value & 0x0040 == 0));
        assert_eq!(drive.actual_position(Unit::Degrees).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_rotate_degrees() {
        let (mut drive, _sim) = drive_with(Some(12800)).await;
        drive.rotate(90.0, CoordinateSystem::Relative, Unit::Degrees).await.unwrap();
        drive.rotate(90.0, CoordinateSystem::Relative, Unit::Degrees).await.unwrap();
        assert_eq!(drive.actual_position(Unit::Native).await.unwrap(), 6400.0);
        assert_eq!(drive.actual_position(Unit::Revolutions).await.unwrap(), 0.5);
    }

    #[tokio::test]
    async fn test_out_of_range_target_sends_nothing() {
        let (mut drive, sim) = drive_with(None).await;
        let err = drive
            .move_position(i64::from(i32::MAX) + 1, CoordinateSystem::Absolute)
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::OutOfRange { .. }));
        assert!(sim.exchanges().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_register_sends_nothing() {
        let (mut drive, sim) = drive_with(None).await;
        assert_eq!(
            drive.read_register("not_a_register").await,
            Err(DriveError::unknown_register("not_a_register"))
        );
        assert!(drive.write_register("not_a_register", 1).await.is_err());
        assert!(sim.exchanges().is_empty());
    }

    #[tokio::test]
    async fn test_fault_reset_before_switch_on() {
        let (mut drive, sim) = drive_with(None).await;
        sim.with_drive(|d| d.inject_fault(0x2130)).unwrap();

        drive.ensure_operation_enabled().await.unwrap();

        let control_writes = sim.writes_to(1040);
        assert_ne!(control_writes[0][0] & 0x0080, 0);
        assert_eq!(
            control_writes.iter().map(|values| values[0] & 0x008F).collect::<Vec<_>>(),
            vec![0x0080, 0x0006, 0x0007, 0x000F]
        );
        assert_eq!(drive.read_state().await.unwrap(), DriveState::OperationEnabled);
    }

    #[tokio::test]
    async fn test_sticky_fault_not_cleared() {
        let (mut drive, sim) = drive_with(None).await;
        sim.with_drive(|d| {
            d.set_sticky_fault(true);
            d.inject_fault(0x5100);
        })
        .unwrap();

        let err = drive.ensure_operation_enabled().await.unwrap_err();
        assert_eq!(err, DriveError::FaultNotCleared { attempts: 10 });
        // only fault reset edges were written
        assert!(sim.writes_to(1040).iter().all(|values| values[0] & 0x000F == 0));
    }

    #[tokio::test]
    async fn test_setpoint_not_acknowledged() {
        let (mut drive, sim) = drive_with(None).await;
        sim.with_drive(|d| d.set_acknowledge_setpoints(false)).unwrap();

        let err = drive.start_move(100, CoordinateSystem::Relative).await.unwrap_err();
        assert_eq!(err, DriveError::SetpointNotAcknowledged { attempts: 50 });
        assert_eq!(sim.writes_to(1042).len(), 1);

        // New set-point is withdrawn before the error is returned
        let last = sim.writes_to(1040).pop().unwrap();
        assert_eq!(last[0] & 0x0010, 0);
        assert!(!drive.control_word().await.unwrap().new_setpoint());
    }

    #[tokio::test]
    async fn test_move_without_acknowledge_wait() {
        let (mut drive, sim) = drive_with(None).await;
        drive.ensure_operation_enabled().await.unwrap();
        sim.clear_exchanges();

        let options = MotionOptions::default()
            .with_wait_for_acknowledge(false)
            .with_wait_for_target(None);
        drive
            .move_position_with(100, CoordinateSystem::Absolute, &options)
            .await
            .unwrap();

        assert_eq!(
            sim.exchanges(),
            vec![
                Exchange::Read { address: 1001, count: 1 },
                Exchange::Read { address: 1040, count: 1 },
                Exchange::Write { address: 1040, values: vec![0x000F] },
                Exchange::Write { address: 1042, values: vec![100, 0] },
                Exchange::Write { address: 1040, values: vec![0x001F] },
                Exchange::Write { address: 1040, values: vec![0x000F] },
            ]
        );
        assert!(!drive.control_word().await.unwrap().new_setpoint());
        assert_eq!(drive.actual_position(Unit::Native).await.unwrap(), 100.0);
    }

    #[tokio::test]
    async fn test_change_set_immediately() {
        let (mut drive, sim) = drive_with(None).await;
        let options = MotionOptions::default().with_change_set_immediately(true);
        drive
            .move_position_with(500, CoordinateSystem::Relative, &options)
            .await
            .unwrap();

        let setpoint_writes: Vec<u16> = sim
            .writes_to(1040)
            .into_iter()
            .map(|values| values[0])
            .filter(|value| value & 0x0010 != 0)
            .collect();
        assert_eq!(setpoint_writes, vec![0x007F]);
        assert!(drive.control_word().await.unwrap().bit(ControlWord::CHANGE_SET_IMMEDIATELY));
    }

    #[tokio::test]
    async fn test_target_not_reached() {
        let (mut drive, sim) = drive_with(None).await;
        sim.with_drive(|d| d.set_complete_moves(false)).unwrap();

        let options = MotionOptions::default().with_wait_for_target(Some(Duration::from_millis(20)));
        let err = drive
            .move_position_with(1000, CoordinateSystem::Absolute, &options)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DriveError::MotionTimeout {
                operation: "target reached",
                timeout_ms: 20
            }
        );
        assert!(!drive.status_word().await.unwrap().target_reached());
        assert!(!drive.control_word().await.unwrap().new_setpoint());
    }

    #[tokio::test]
    async fn test_state_transition_timeout() {
        let (mut drive, sim) = drive_with(None).await;
        sim.with_drive(|d| d.set_state(DriveState::NotReadyToSwitchOn)).unwrap();

        let err = drive.ensure_operation_enabled().await.unwrap_err();
        assert_eq!(
            err,
            DriveError::StateTransitionTimeout {
                target: DriveState::OperationEnabled,
                last: DriveState::NotReadyToSwitchOn,
                attempts: 10
            }
        );
        // no command applies while the drive initialises
        assert!(sim.writes_to(1040).is_empty());
    }

    #[tokio::test]
    async fn test_quick_stop_and_release() {
        let (mut drive, _sim) = drive_with(None).await;
        drive.ensure_operation_enabled().await.unwrap();

        drive.quick_stop().await.unwrap();
        assert_eq!(drive.read_state().await.unwrap(), DriveState::QuickStopActive);
        drive.release_quick_stop().await.unwrap();
        assert_eq!(drive.read_state().await.unwrap(), DriveState::OperationEnabled);

        drive.halt(true).await.unwrap();
        assert!(drive.control_word().await.unwrap().halt());
        drive.disable_voltage().await.unwrap();
        assert_eq!(drive.read_state().await.unwrap(), DriveState::SwitchOnDisabled);
    }

    #[tokio::test]
    async fn test_service_registers() {
        let (mut drive, sim) = drive_with(None).await;
        sim.with_drive(|d| d.inject_fault(0x8611)).unwrap();

        assert!(drive.is_error().await.unwrap());
        let fault = drive.error_code().await.unwrap();
        assert_eq!(fault.message, "Motor following error");
        assert_eq!(fault.to_string(), "0x8611: Motor following error");

        let alarms = drive.alarms().await.unwrap();
        assert_eq!(alarms.len(), 10);
        assert_eq!(alarms[0], AlarmEvent { time: 1, code: 0x8611 });

        drive.reset_alarm_log().await.unwrap();
        assert_eq!(sim.writes_to(1240), vec![vec![1], vec![0]]);
        assert!(drive.alarms().await.unwrap().iter().all(|a| a.code == 0));

        drive.save_parameters(true, true).await.unwrap();
        drive.save_parameters(false, false).await.unwrap();
        drive.restore_default_parameters().await.unwrap();
        let writes = sim.with_drive(|d| d.service_writes().to_vec()).unwrap();
        assert_eq!(writes, vec![(1260, 0x6173), (1260, 0x1111), (1261, 0x6F6C)]);
    }

    #[tokio::test]
    async fn test_identification() {
        let (mut drive, _sim) = drive_with(None).await;

        let info = drive.device_info().await.unwrap();
        assert_eq!(info.software_version, 0x0001_0203);
        assert_eq!(info.serial_number, 20_240_117);

        let network = drive.network_settings().await.unwrap();
        assert_eq!(network.ip, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(network.netmask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(network.gateway, Ipv4Addr::new(192, 168, 1, 1));
    }

    #[tokio::test]
    async fn test_parameters() {
        let (mut drive, sim) = drive_with(None).await;

        assert_eq!(drive.motor_code().await.unwrap(), 0x15B1);
        drive.set_motor_code(0x0001_0002).await.unwrap();
        assert_eq!(sim.writes_to(1090), vec![vec![0x0002, 0x0001]]);

        assert!(matches!(
            drive.set_current_ratio(121).await,
            Err(DriveError::OutOfRange { .. })
        ));
        drive.set_current_ratio(120).await.unwrap();
        assert_eq!(drive.current_ratio().await.unwrap(), 120);

        drive.set_encoder_window(EncoderWindow::Deg5_4).await.unwrap();
        assert_eq!(drive.encoder_window().await.unwrap(), EncoderWindow::Deg5_4);

        drive
            .set_following_error_reaction(FollowingErrorReaction::NoEncoder)
            .await
            .unwrap();
        assert_eq!(sim.writes_to(1085), vec![vec![0x11]]);

        drive.set_revolution_direction(RevolutionDirection::Inverted).await.unwrap();
        assert_eq!(drive.revolution_direction().await.unwrap(), RevolutionDirection::Inverted);

        assert!(drive.set_encoder_counts_per_revolution(399).await.is_err());
        drive.set_encoder_counts_per_revolution(400).await.unwrap();
        assert!(drive.set_output(32).await.is_err());
        drive.set_output(31).await.unwrap();

        assert_eq!(drive.drive_temperature().await.unwrap(), 35);
        assert!(drive.current_recycling_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_sync_steps_per_revolution() {
        let (mut drive, _sim) = drive_with(None).await;
        assert!(drive.actual_position(Unit::Degrees).await.is_err());

        assert_eq!(drive.sync_steps_per_revolution().await.unwrap(), 12800);
        assert_eq!(drive.converter().steps_per_revolution(), Some(12800));
        assert_eq!(drive.actual_position(Unit::Degrees).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_mode_of_operation() {
        let (mut drive, _sim) = drive_with(None).await;
        assert_eq!(drive.mode_of_operation().await.unwrap(), ModeOfOperation::ProfilePosition);
        drive.set_mode_of_operation(ModeOfOperation::Homing).await.unwrap();
        assert_eq!(drive.mode_of_operation().await.unwrap(), ModeOfOperation::Homing);

        assert!(matches!(
            ModeOfOperation::try_from(2),
            Err(DriveError::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_velocity() {
        let (mut drive, _sim) = drive_with(Some(12800)).await;
        drive.run_velocity(60.0, Unit::Rpm).await.unwrap();

        assert_eq!(drive.mode_of_operation().await.unwrap(), ModeOfOperation::ProfileVelocity);
        assert_eq!(drive.actual_velocity(Unit::Native).await.unwrap(), 12800.0);
        assert_eq!(drive.actual_velocity(Unit::Rpm).await.unwrap(), 60.0);

        let err = drive.run_velocity(60.0, Unit::Degrees).await.unwrap_err();
        assert!(matches!(err, DriveError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_homing() {
        let (mut drive, sim) = drive_with(None).await;
        sim.with_drive(|d| d.set_actual_position(777)).unwrap();

        drive.home(Duration::from_millis(100)).await.unwrap();
        assert_eq!(drive.actual_position(Unit::Native).await.unwrap(), 0.0);
        assert!(!drive.control_word().await.unwrap().new_setpoint());

        sim.with_drive(|d| d.set_following_error(true)).unwrap();
        let err = drive.home(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, DriveError::HomingFailed { .. }));
    }

    #[tokio::test]
    async fn test_generic_unit_access() {
        let (mut drive, sim) = drive_with(Some(12800)).await;
        drive.write_in("profile_velocity", 1.0, Unit::Rpm).await.unwrap();
        assert_eq!(sim.writes_to(1044), vec![vec![213, 0]]);
        let rpm = drive.read_in("profile_velocity", Unit::Rpm).await.unwrap();
        assert!((rpm - 1.0).abs() < drive.converter().resolution(Unit::Rpm, &PROFILE_VELOCITY).unwrap());

        assert!(matches!(
            drive.write_register("status_word", 1).await,
            Err(DriveError::AccessDenied { .. })
        ));
    }
}
