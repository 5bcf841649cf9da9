//! # CiA-402 Drive State Machine
//!
//! The CSD-MT-94 follows the CiA-402 power state model. The client never owns
//! the state: it reads the status word, decodes it with the mask table below
//! and requests transitions by writing command bits into the control word.
//! A transition request is fire-and-forget; confirmation is a separate
//! status read.
//!
//! ```text
//!   NotReadyToSwitchOn ──(auto)──► SwitchOnDisabled ◄──────────────┐
//!                                    │ 2 ▲ 7                        │ 15 fault reset
//!                                    ▼   │                          │
//!                                  ReadyToSwitchOn                Fault
//!                                    │ 3 ▲ 6                        ▲
//!                                    ▼   │                          │ (auto)
//!                                  SwitchedOn               FaultReactionActive
//!                                    │ 4 ▲ 5
//!                                    ▼   │
//!                                  OperationEnabled ──11──► QuickStopActive
//!                                                    ◄──16──
//! ```

use std::fmt;
use std::time::Duration;

use log::{debug, warn};

use crate::client::RegisterClient;
use crate::error::{DriveError, DriveResult};
use crate::register_map::{CONTROL_WORD, STATUS_WORD};
use crate::transport::ModbusTransport;

/// CiA-402 power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveState {
    NotReadyToSwitchOn,
    SwitchOnDisabled,
    ReadyToSwitchOn,
    SwitchedOn,
    OperationEnabled,
    QuickStopActive,
    FaultReactionActive,
    Fault,
}

/// (mask, value, state) rows for decoding the status word
const STATE_TABLE: [(u16, u16, DriveState); 8] = [
    (0x004F, 0x0000, DriveState::NotReadyToSwitchOn),
    (0x004F, 0x0040, DriveState::SwitchOnDisabled),
    (0x006F, 0x0021, DriveState::ReadyToSwitchOn),
    (0x006F, 0x0023, DriveState::SwitchedOn),
    (0x006F, 0x0027, DriveState::OperationEnabled),
    (0x006F, 0x0007, DriveState::QuickStopActive),
    (0x004F, 0x000F, DriveState::FaultReactionActive),
    (0x004F, 0x0008, DriveState::Fault),
];

impl DriveState {
    /// Decode the power state from a status word
    ///
    /// # Errors
    ///
    /// `DriveError::InvalidStatusWord` if no row of the mask table matches.
    pub fn decode(status_word: u16) -> DriveResult<Self> {
        STATE_TABLE
            .iter()
            .find(|(mask, value, _)| status_word & mask == *value)
            .map(|(_, _, state)| *state)
            .ok_or(DriveError::InvalidStatusWord { status_word })
    }

    /// Status word bits that identify the state (the table row value)
    pub fn status_bits(self) -> u16 {
        STATE_TABLE
            .iter()
            .find(|(_, _, state)| *state == self)
            .map(|(_, value, _)| *value)
            .unwrap_or(0)
    }

    /// Command to issue next when driving towards `OperationEnabled`
    ///
    /// `None` for states that are left automatically (or already reached).
    pub fn next_command_towards_operation(self) -> Option<ControlCommand> {
        match self {
            DriveState::Fault => Some(ControlCommand::FaultReset),
            DriveState::SwitchOnDisabled => Some(ControlCommand::Shutdown),
            DriveState::ReadyToSwitchOn => Some(ControlCommand::SwitchOn),
            DriveState::SwitchedOn | DriveState::QuickStopActive => Some(ControlCommand::EnableOperation),
            DriveState::NotReadyToSwitchOn
            | DriveState::FaultReactionActive
            | DriveState::OperationEnabled => None,
        }
    }
}

impl fmt::Display for DriveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriveState::NotReadyToSwitchOn => "Not ready to switch on",
            DriveState::SwitchOnDisabled => "Switch on disabled",
            DriveState::ReadyToSwitchOn => "Ready to switch on",
            DriveState::SwitchedOn => "Switched on",
            DriveState::OperationEnabled => "Operation enabled",
            DriveState::QuickStopActive => "Quick stop active",
            DriveState::FaultReactionActive => "Fault reaction active",
            DriveState::Fault => "Fault",
        };
        f.write_str(name)
    }
}

/// Status word (register 1001)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusWord(pub u16);

impl StatusWord {
    pub const READY_TO_SWITCH_ON: u8 = 0;
    pub const SWITCHED_ON: u8 = 1;
    pub const OPERATION_ENABLED: u8 = 2;
    pub const FAULT: u8 = 3;
    pub const VOLTAGE_ENABLED: u8 = 4;
    /// Active low
    pub const QUICK_STOP: u8 = 5;
    pub const SWITCH_ON_DISABLED: u8 = 6;
    pub const WARNING: u8 = 7;
    pub const MANUFACTURER_SPECIFIC: u8 = 8;
    pub const REMOTE: u8 = 9;
    pub const TARGET_REACHED: u8 = 10;
    pub const INTERNAL_LIMIT_ACTIVE: u8 = 11;
    /// Set-point acknowledge in profile position mode, homing attained in homing mode
    pub const SETPOINT_ACKNOWLEDGE: u8 = 12;
    /// Following error in profile position mode, homing error in homing mode
    pub const FOLLOWING_ERROR: u8 = 13;
    pub const CLOSED_LOOP_ACTIVE: u8 = 14;
    pub const PROFILE_RAMP: u8 = 15;

    pub fn bit(self, bit: u8) -> bool {
        self.0 & (1 << bit) != 0
    }

    pub fn state(self) -> DriveResult<DriveState> {
        DriveState::decode(self.0)
    }

    pub fn ready_to_switch_on(self) -> bool {
        self.bit(Self::READY_TO_SWITCH_ON)
    }

    pub fn switched_on(self) -> bool {
        self.bit(Self::SWITCHED_ON)
    }

    pub fn operation_enabled(self) -> bool {
        self.bit(Self::OPERATION_ENABLED)
    }

    pub fn fault(self) -> bool {
        self.bit(Self::FAULT)
    }

    pub fn voltage_enabled(self) -> bool {
        self.bit(Self::VOLTAGE_ENABLED)
    }

    /// True while quick stop is *not* requested (bit is active low)
    pub fn quick_stop(self) -> bool {
        self.bit(Self::QUICK_STOP)
    }

    pub fn switch_on_disabled(self) -> bool {
        self.bit(Self::SWITCH_ON_DISABLED)
    }

    pub fn warning(self) -> bool {
        self.bit(Self::WARNING)
    }

    pub fn remote(self) -> bool {
        self.bit(Self::REMOTE)
    }

    pub fn target_reached(self) -> bool {
        self.bit(Self::TARGET_REACHED)
    }

    pub fn internal_limit_active(self) -> bool {
        self.bit(Self::INTERNAL_LIMIT_ACTIVE)
    }

    pub fn setpoint_acknowledged(self) -> bool {
        self.bit(Self::SETPOINT_ACKNOWLEDGE)
    }

    pub fn homing_attained(self) -> bool {
        self.bit(Self::SETPOINT_ACKNOWLEDGE)
    }

    pub fn following_error(self) -> bool {
        self.bit(Self::FOLLOWING_ERROR)
    }

    pub fn homing_error(self) -> bool {
        self.bit(Self::FOLLOWING_ERROR)
    }

    pub fn closed_loop_active(self) -> bool {
        self.bit(Self::CLOSED_LOOP_ACTIVE)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state() {
            Ok(state) => write!(f, "0x{:04X} ({})", self.0, state),
            Err(_) => write!(f, "0x{:04X} (undecodable)", self.0),
        }
    }
}

/// Control word (register 1040)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ControlWord(pub u16);

impl ControlWord {
    pub const SWITCH_ON: u8 = 0;
    pub const ENABLE_VOLTAGE: u8 = 1;
    /// Active low: clearing the bit requests a quick stop
    pub const QUICK_STOP: u8 = 2;
    pub const ENABLE_OPERATION: u8 = 3;
    /// New set-point in profile position mode, homing start in homing mode
    pub const NEW_SETPOINT: u8 = 4;
    pub const CHANGE_SET_IMMEDIATELY: u8 = 5;
    pub const RELATIVE: u8 = 6;
    pub const FAULT_RESET: u8 = 7;
    pub const HALT: u8 = 8;

    pub fn bit(self, bit: u8) -> bool {
        self.0 & (1 << bit) != 0
    }

    #[must_use]
    pub fn with_bit(self, bit: u8, value: bool) -> Self {
        if value {
            ControlWord(self.0 | (1 << bit))
        } else {
            ControlWord(self.0 & !(1 << bit))
        }
    }

    pub fn new_setpoint(self) -> bool {
        self.bit(Self::NEW_SETPOINT)
    }

    pub fn change_set_immediately(self) -> bool {
        self.bit(Self::CHANGE_SET_IMMEDIATELY)
    }

    pub fn relative(self) -> bool {
        self.bit(Self::RELATIVE)
    }

    pub fn fault_reset(self) -> bool {
        self.bit(Self::FAULT_RESET)
    }

    pub fn halt(self) -> bool {
        self.bit(Self::HALT)
    }
}

impl fmt::Display for ControlWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Power state command written through the control word
///
/// Each command sets bits 0-3 and 7 according to its CiA-402 pattern and
/// leaves every other control word bit untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCommand {
    Shutdown,
    SwitchOn,
    SwitchOnAndEnableOperation,
    DisableVoltage,
    QuickStop,
    DisableOperation,
    EnableOperation,
    FaultReset,
}

impl ControlCommand {
    /// (mask, value) of the command pattern
    pub const fn pattern(self) -> (u16, u16) {
        match self {
            ControlCommand::Shutdown => (0x0087, 0x0006),
            ControlCommand::SwitchOn => (0x008F, 0x0007),
            ControlCommand::SwitchOnAndEnableOperation => (0x008F, 0x000F),
            ControlCommand::DisableVoltage => (0x0082, 0x0000),
            ControlCommand::QuickStop => (0x0086, 0x0002),
            ControlCommand::DisableOperation => (0x008F, 0x0007),
            ControlCommand::EnableOperation => (0x008F, 0x000F),
            ControlCommand::FaultReset => (0x0080, 0x0080),
        }
    }

    /// Apply the command to a control word, preserving non-command bits
    pub fn apply(self, control: ControlWord) -> ControlWord {
        let (mask, value) = self.pattern();
        ControlWord((control.0 & !mask) | value)
    }

    /// Check whether a control word carries this command's pattern
    pub fn matches(self, control: ControlWord) -> bool {
        let (mask, value) = self.pattern();
        control.0 & mask == value
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One row of the CiA-402 transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// CiA-402 transition number
    pub number: &'static str,
    pub from: DriveState,
    pub command: ControlCommand,
    pub to: DriveState,
}

const fn row(number: &'static str, from: DriveState, command: ControlCommand, to: DriveState) -> Transition {
    Transition { number, from, command, to }
}

/// Commanded transitions
pub static TRANSITIONS: [Transition; 16] = {
    use ControlCommand::*;
    use DriveState::*;
    [
        row("2", SwitchOnDisabled, Shutdown, ReadyToSwitchOn),
        row("3", ReadyToSwitchOn, SwitchOn, SwitchedOn),
        row("3+4", ReadyToSwitchOn, SwitchOnAndEnableOperation, OperationEnabled),
        row("4", SwitchedOn, EnableOperation, OperationEnabled),
        row("5", OperationEnabled, DisableOperation, SwitchedOn),
        row("6", SwitchedOn, Shutdown, ReadyToSwitchOn),
        row("7", ReadyToSwitchOn, DisableVoltage, SwitchOnDisabled),
        row("7", ReadyToSwitchOn, QuickStop, SwitchOnDisabled),
        row("8", OperationEnabled, Shutdown, ReadyToSwitchOn),
        row("9", OperationEnabled, DisableVoltage, SwitchOnDisabled),
        row("10", SwitchedOn, DisableVoltage, SwitchOnDisabled),
        row("10", SwitchedOn, QuickStop, SwitchOnDisabled),
        row("11", OperationEnabled, QuickStop, QuickStopActive),
        row("12", QuickStopActive, DisableVoltage, SwitchOnDisabled),
        row("15", Fault, FaultReset, SwitchOnDisabled),
        row("16", QuickStopActive, EnableOperation, OperationEnabled),
    ]
};

/// Look up the state a command leads to from `from`
///
/// `None` means the drive ignores the command in that state.
pub fn transition(from: DriveState, command: ControlCommand) -> Option<&'static Transition> {
    TRANSITIONS
        .iter()
        .find(|t| t.from == from && t.command == command)
}

/// Look up the transition a written control word triggers from `from`
///
/// Fault reset is edge-triggered on bit 7 and is not matched here.
pub fn transition_for_control_word(from: DriveState, control: ControlWord) -> Option<&'static Transition> {
    TRANSITIONS
        .iter()
        .filter(|t| t.command != ControlCommand::FaultReset)
        .find(|t| t.from == from && t.command.matches(control))
}

/// Sequencing of power state changes over a register client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveStateMachine {
    max_attempts: u32,
    poll_interval: Duration,
}

impl Default for DriveStateMachine {
    fn default() -> Self {
        Self::new(crate::DEFAULT_TRANSITION_ATTEMPTS, Duration::from_millis(10))
    }
}

impl DriveStateMachine {
    pub fn new(max_attempts: u32, poll_interval: Duration) -> Self {
        Self {
            max_attempts,
            poll_interval,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub async fn read_status_word<T: ModbusTransport>(
        &self,
        client: &mut RegisterClient<T>,
    ) -> DriveResult<StatusWord> {
        Ok(StatusWord(client.read(&STATUS_WORD).await? as u16))
    }

    pub async fn read_control_word<T: ModbusTransport>(
        &self,
        client: &mut RegisterClient<T>,
    ) -> DriveResult<ControlWord> {
        Ok(ControlWord(client.read(&CONTROL_WORD).await? as u16))
    }

    /// One status word read, decoded
    pub async fn read_state<T: ModbusTransport>(&self, client: &mut RegisterClient<T>) -> DriveResult<DriveState> {
        self.read_status_word(client).await?.state()
    }

    /// Write the command pattern into the control word
    ///
    /// Read-modify-write: bits outside the command pattern keep their value.
    /// For `FaultReset`, a control word that already has bit 7 set is first
    /// written with the bit cleared so the drive sees a rising edge.
    /// The resulting state is not checked.
    pub async fn request_transition<T: ModbusTransport>(
        &self,
        client: &mut RegisterClient<T>,
        command: ControlCommand,
    ) -> DriveResult<()> {
        let current = self.read_control_word(client).await?;

        if command == ControlCommand::FaultReset && current.fault_reset() {
            let cleared = current.with_bit(ControlWord::FAULT_RESET, false);
            client.write(&CONTROL_WORD, cleared.0 as i64).await?;
        }

        let next = command.apply(current);
        debug!("control word {} -> {} ({})", current, next, command);
        client.write(&CONTROL_WORD, next.0 as i64).await
    }

    /// Drive the state machine to `OperationEnabled`
    ///
    /// Issues one command per attempt (fault reset first when faulted), then
    /// waits `poll_interval` and re-reads the state.
    ///
    /// # Errors
    ///
    /// - `FaultNotCleared` if the drive still reports `Fault` after the last attempt
    /// - `StateTransitionTimeout` if it ends in any other state
    pub async fn ensure_operation_enabled<T: ModbusTransport>(
        &self,
        client: &mut RegisterClient<T>,
    ) -> DriveResult<()> {
        let mut state = self.read_state(client).await?;

        for attempt in 1..=self.max_attempts {
            if state == DriveState::OperationEnabled {
                return Ok(());
            }

            match state.next_command_towards_operation() {
                Some(command) => {
                    debug!("attempt {}: {} -> {}", attempt, state, command);
                    self.request_transition(client, command).await?;
                }
                None => debug!("attempt {}: waiting in {}", attempt, state),
            }

            tokio::time::sleep(self.poll_interval).await;
            state = self.read_state(client).await?;
        }

        match state {
            DriveState::OperationEnabled => Ok(()),
            DriveState::Fault => {
                warn!("drive fault not cleared after {} attempts", self.max_attempts);
                Err(DriveError::FaultNotCleared {
                    attempts: self.max_attempts,
                })
            }
            last => Err(DriveError::StateTransitionTimeout {
                target: DriveState::OperationEnabled,
                last,
                attempts: self.max_attempts,
            }),
        }
    }
}
