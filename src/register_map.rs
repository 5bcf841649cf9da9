//! # CSD-MT-94 Register Map
//!
//! Static description of every holding register the drive client touches.
//! Each [`RegisterDescriptor`] records the address, width, signedness,
//! access rights and the physical quantity the value represents, plus
//! optional bounds narrower than the register width.
//!
//! The table is a process-wide constant: descriptors are `const` items and
//! [`RegisterMap`] only looks them up, so the map is immutable and shareable
//! between threads without synchronisation.
//!
//! 32-bit values occupy two consecutive registers and are stored by the drive
//! with the low word at the lower address ([`DRIVE_WORD_ORDER`]).
//!
//! ```rust
//! use csd_mt94::register_map::RegisterMap;
//!
//! let target = RegisterMap::resolve("target_position").unwrap();
//! assert_eq!(target.address, 1042);
//! assert_eq!(target.register_count(), 2);
//!
//! assert!(RegisterMap::resolve("not_a_register").is_err());
//! ```

use std::fmt;

use crate::error::{DriveError, DriveResult};
use crate::protocol::data_utils::WordOrder;
use crate::protocol::ModbusAddress;

/// Word order of 32-bit registers on the CSD-MT-94
pub const DRIVE_WORD_ORDER: WordOrder = WordOrder::LowWordFirst;

/// Number of 16-bit registers backing a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterWidth {
    Bits16,
    Bits32,
}

impl RegisterWidth {
    /// Number of Modbus registers this width occupies
    pub const fn register_count(self) -> u16 {
        match self {
            RegisterWidth::Bits16 => 1,
            RegisterWidth::Bits32 => 2,
        }
    }

    /// Inclusive value range representable by this width
    pub const fn range(self, signed: bool) -> (i64, i64) {
        match (self, signed) {
            (RegisterWidth::Bits16, false) => (0, u16::MAX as i64),
            (RegisterWidth::Bits16, true) => (i16::MIN as i64, i16::MAX as i64),
            (RegisterWidth::Bits32, false) => (0, u32::MAX as i64),
            (RegisterWidth::Bits32, true) => (i32::MIN as i64, i32::MAX as i64),
        }
    }
}

/// Access rights of a register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    ReadOnly,
    ReadWrite,
    /// Command registers that read back as undefined
    WriteOnly,
}

impl Access {
    pub const fn can_read(self) -> bool {
        !matches!(self, Access::WriteOnly)
    }

    pub const fn can_write(self) -> bool {
        !matches!(self, Access::ReadOnly)
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Access::ReadOnly => "R-",
            Access::ReadWrite => "RW",
            Access::WriteOnly => "-W",
        })
    }
}

/// Physical quantity a register value represents
///
/// Decides which units the converter accepts for the register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    /// Steps
    Position,
    /// Steps per second
    Velocity,
    /// Steps per second squared
    Acceleration,
    /// Anything else (flags, codes, percentages, temperatures)
    Scalar,
}

/// Rational scale: native counts per physical base unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scale {
    pub numerator: i64,
    pub denominator: i64,
}

impl Scale {
    pub const UNITY: Scale = Scale::new(1, 1);

    pub const fn new(numerator: i64, denominator: i64) -> Self {
        Self { numerator, denominator }
    }

    pub fn as_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

/// Inclusive bounds narrower than the register width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bounds {
    pub min: i64,
    pub max: i64,
}

/// Static description of a single drive register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterDescriptor {
    pub name: &'static str,
    pub address: ModbusAddress,
    pub width: RegisterWidth,
    pub signed: bool,
    pub scale: Scale,
    pub access: Access,
    pub quantity: Quantity,
    pub bounds: Option<Bounds>,
}

impl RegisterDescriptor {
    const fn new(
        name: &'static str,
        address: ModbusAddress,
        width: RegisterWidth,
        signed: bool,
        access: Access,
    ) -> Self {
        Self {
            name,
            address,
            width,
            signed,
            scale: Scale::UNITY,
            access,
            quantity: Quantity::Scalar,
            bounds: None,
        }
    }

    pub const fn u16(name: &'static str, address: ModbusAddress, access: Access) -> Self {
        Self::new(name, address, RegisterWidth::Bits16, false, access)
    }

    pub const fn i16(name: &'static str, address: ModbusAddress, access: Access) -> Self {
        Self::new(name, address, RegisterWidth::Bits16, true, access)
    }

    pub const fn u32(name: &'static str, address: ModbusAddress, access: Access) -> Self {
        Self::new(name, address, RegisterWidth::Bits32, false, access)
    }

    pub const fn i32(name: &'static str, address: ModbusAddress, access: Access) -> Self {
        Self::new(name, address, RegisterWidth::Bits32, true, access)
    }

    pub const fn with_quantity(self, quantity: Quantity) -> Self {
        Self { quantity, ..self }
    }

    pub const fn with_bounds(self, min: i64, max: i64) -> Self {
        Self {
            bounds: Some(Bounds { min, max }),
            ..self
        }
    }

    pub const fn with_scale(self, scale: Scale) -> Self {
        Self { scale, ..self }
    }

    /// Number of Modbus registers occupied (1 or 2)
    pub const fn register_count(&self) -> u16 {
        self.width.register_count()
    }

    /// Inclusive accepted native range: width range intersected with bounds
    pub fn native_range(&self) -> (i64, i64) {
        let (min, max) = self.width.range(self.signed);
        match self.bounds {
            Some(bounds) => (min.max(bounds.min), max.min(bounds.max)),
            None => (min, max),
        }
    }

    /// Check a native value against [`native_range`](Self::native_range)
    pub fn check_native(&self, value: i128) -> DriveResult<i64> {
        let (min, max) = self.native_range();
        if value < min as i128 || value > max as i128 {
            return Err(DriveError::out_of_range(self.name, value, min, max));
        }
        Ok(value as i64)
    }

    /// Last address covered by the register
    pub const fn last_address(&self) -> ModbusAddress {
        self.address + self.register_count() - 1
    }
}

impl fmt::Display for RegisterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match (self.width, self.signed) {
            (RegisterWidth::Bits16, false) => "U16",
            (RegisterWidth::Bits16, true) => "I16",
            (RegisterWidth::Bits32, false) => "U32",
            (RegisterWidth::Bits32, true) => "I32",
        };
        write!(f, "{}@{} {} {}", self.name, self.address, kind, self.access)
    }
}

/// A multi-register structure read as one block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterBlock {
    pub name: &'static str,
    pub address: ModbusAddress,
    pub count: u16,
}

impl RegisterBlock {
    pub const fn new(name: &'static str, address: ModbusAddress, count: u16) -> Self {
        Self { name, address, count }
    }
}

use Access::{ReadOnly as RO, ReadWrite as RW, WriteOnly as WO};

// Status and readback
pub const STATUS_WORD: RegisterDescriptor = RegisterDescriptor::u16("status_word", 1001, RO);
pub const MODE_OF_OPERATION_DISPLAY: RegisterDescriptor =
    RegisterDescriptor::i16("mode_of_operation_display", 1002, RO);
pub const ACTUAL_POSITION: RegisterDescriptor =
    RegisterDescriptor::i32("actual_position", 1004, RO).with_quantity(Quantity::Position);
pub const ERROR_ACTIVE: RegisterDescriptor = RegisterDescriptor::u16("error_active", 1006, RO);
pub const ERROR_CODE: RegisterDescriptor = RegisterDescriptor::u16("error_code", 1007, RO);
pub const ACTUAL_VELOCITY: RegisterDescriptor =
    RegisterDescriptor::i32("actual_velocity", 1020, RO).with_quantity(Quantity::Velocity);

// Command and motion
pub const CONTROL_WORD: RegisterDescriptor = RegisterDescriptor::u16("control_word", 1040, RW);
pub const MODE_OF_OPERATION: RegisterDescriptor = RegisterDescriptor::i16("mode_of_operation", 1041, RW);
pub const TARGET_POSITION: RegisterDescriptor =
    RegisterDescriptor::i32("target_position", 1042, RW).with_quantity(Quantity::Position);
pub const PROFILE_VELOCITY: RegisterDescriptor = RegisterDescriptor::u32("profile_velocity", 1044, RW)
    .with_quantity(Quantity::Velocity)
    .with_bounds(0, 800_000);
pub const PROFILE_ACCELERATION: RegisterDescriptor =
    RegisterDescriptor::u32("profile_acceleration", 1046, RW).with_quantity(Quantity::Acceleration);
pub const TARGET_VELOCITY: RegisterDescriptor =
    RegisterDescriptor::i32("target_velocity", 1048, RW).with_quantity(Quantity::Velocity);
pub const PROFILE_DECELERATION: RegisterDescriptor =
    RegisterDescriptor::u32("profile_deceleration", 1072, RW).with_quantity(Quantity::Acceleration);

// Drive parameters
pub const CURRENT_RATIO: RegisterDescriptor =
    RegisterDescriptor::u16("current_ratio", 1080, RW).with_bounds(0, 120);
pub const STEPS_PER_REVOLUTION: RegisterDescriptor =
    RegisterDescriptor::u16("steps_per_revolution", 1081, RO);
pub const CURRENT_REDUCTION: RegisterDescriptor = RegisterDescriptor::u16("current_reduction", 1083, RO);
pub const ENCODER_WINDOW: RegisterDescriptor =
    RegisterDescriptor::u16("encoder_window", 1084, RW).with_bounds(0, 5);
pub const FOLLOWING_ERROR_REACTION: RegisterDescriptor =
    RegisterDescriptor::u16("following_error_reaction", 1085, RW);
pub const POSITION_ERROR_RESET: RegisterDescriptor =
    RegisterDescriptor::u16("position_error_reset", 1086, WO);
pub const OUTPUT: RegisterDescriptor = RegisterDescriptor::u16("output", 1087, WO).with_bounds(0, 31);
pub const MOTOR_CODE: RegisterDescriptor = RegisterDescriptor::u32("motor_code", 1090, RW);
pub const REVOLUTION_DIRECTION: RegisterDescriptor =
    RegisterDescriptor::u16("revolution_direction", 1092, RW).with_bounds(0, 1);
pub const CURRENT_REDUCTION_RATIO: RegisterDescriptor =
    RegisterDescriptor::u16("current_reduction_ratio", 1112, RW).with_bounds(1, 100);
pub const MOTOR_CURRENT_LIMIT: RegisterDescriptor = RegisterDescriptor::u16("motor_current_limit", 1117, RO);
pub const MOTOR_PROPORTIONAL_GAIN: RegisterDescriptor =
    RegisterDescriptor::u16("motor_proportional_gain", 1118, RO);
pub const MOTOR_DYNAMIC_BALANCING: RegisterDescriptor =
    RegisterDescriptor::u16("motor_dynamic_balancing", 1119, RO);
pub const CURRENT_RECYCLING_ENABLE: RegisterDescriptor =
    RegisterDescriptor::u16("current_recycling_enable", 1120, RO);
pub const ENCODER_COUNTS_PER_REVOLUTION: RegisterDescriptor =
    RegisterDescriptor::u16("encoder_counts_per_revolution", 1121, RW).with_bounds(400, 4000);
pub const DRIVE_TEMPERATURE: RegisterDescriptor = RegisterDescriptor::u16("drive_temperature", 1124, RO);

// Service commands
pub const ALARM_LOG_RESET: RegisterDescriptor = RegisterDescriptor::u16("alarm_log_reset", 1240, WO);
pub const STORE_PARAMETERS: RegisterDescriptor = RegisterDescriptor::u16("store_parameters", 1260, WO);
pub const RESTORE_DEFAULTS: RegisterDescriptor = RegisterDescriptor::u16("restore_defaults", 1261, WO);

// Blocks
pub const IP_ADDRESS: RegisterBlock = RegisterBlock::new("ip_address", 1130, 4);
pub const NETMASK: RegisterBlock = RegisterBlock::new("netmask", 1134, 4);
pub const GATEWAY: RegisterBlock = RegisterBlock::new("gateway", 1138, 4);
pub const DEVICE_INFO: RegisterBlock = RegisterBlock::new("device_info", 1152, 9);
/// 10 (time, code) pairs
pub const ALARM_LOG: RegisterBlock = RegisterBlock::new("alarm_log", 1220, 20);

/// Every descriptor known to the client, ordered by address
pub static REGISTERS: &[RegisterDescriptor] = &[
    STATUS_WORD,
    MODE_OF_OPERATION_DISPLAY,
    ACTUAL_POSITION,
    ERROR_ACTIVE,
    ERROR_CODE,
    ACTUAL_VELOCITY,
    CONTROL_WORD,
    MODE_OF_OPERATION,
    TARGET_POSITION,
    PROFILE_VELOCITY,
    PROFILE_ACCELERATION,
    TARGET_VELOCITY,
    PROFILE_DECELERATION,
    CURRENT_RATIO,
    STEPS_PER_REVOLUTION,
    CURRENT_REDUCTION,
    ENCODER_WINDOW,
    FOLLOWING_ERROR_REACTION,
    POSITION_ERROR_RESET,
    OUTPUT,
    MOTOR_CODE,
    REVOLUTION_DIRECTION,
    CURRENT_REDUCTION_RATIO,
    MOTOR_CURRENT_LIMIT,
    MOTOR_PROPORTIONAL_GAIN,
    MOTOR_DYNAMIC_BALANCING,
    CURRENT_RECYCLING_ENABLE,
    ENCODER_COUNTS_PER_REVOLUTION,
    DRIVE_TEMPERATURE,
    ALARM_LOG_RESET,
    STORE_PARAMETERS,
    RESTORE_DEFAULTS,
];

/// Every block known to the client
pub static BLOCKS: &[RegisterBlock] = &[IP_ADDRESS, NETMASK, GATEWAY, DEVICE_INFO, ALARM_LOG];

/// Lookup over the static register table
pub struct RegisterMap;

impl RegisterMap {
    /// Resolve a register by name
    ///
    /// Pure table lookup; no transport exchange is involved.
    ///
    /// # Errors
    ///
    /// `DriveError::UnknownRegister` if no descriptor carries `name`.
    pub fn resolve(name: &str) -> DriveResult<&'static RegisterDescriptor> {
        REGISTERS
            .iter()
            .find(|descriptor| descriptor.name == name)
            .ok_or_else(|| DriveError::unknown_register(name))
    }

    /// Find the descriptor covering `address` (either word of a 32-bit pair)
    pub fn by_address(address: ModbusAddress) -> Option<&'static RegisterDescriptor> {
        REGISTERS
            .iter()
            .find(|descriptor| (descriptor.address..=descriptor.last_address()).contains(&address))
    }

    /// Name for an address, including block members, for log output
    pub fn describe_address(address: ModbusAddress) -> Option<&'static str> {
        Self::by_address(address).map(|descriptor| descriptor.name).or_else(|| {
            BLOCKS
                .iter()
                .find(|block| address >= block.address && address < block.address + block.count)
                .map(|block| block.name)
        })
    }

    /// Iterate over all descriptors in address order
    pub fn iter() -> impl Iterator<Item = &'static RegisterDescriptor> {
        REGISTERS.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_addresses_are_unique() {
        let mut used = HashSet::new();
        let blocks = BLOCKS.iter().flat_map(|b| b.address..b.address + b.count);
        let registers = REGISTERS.iter().flat_map(|d| d.address..=d.last_address());

        for address in registers.chain(blocks) {
            assert!(used.insert(address), "address {} mapped twice", address);
        }
    }

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<_> = REGISTERS.iter().map(|d| d.name).collect();
        assert_eq!(names.len(), REGISTERS.len());
    }

    #[test]
    fn test_table_is_sorted() {
        assert!(REGISTERS.windows(2).all(|w| w[0].address < w[1].address));
    }

    #[test]
    fn test_resolve() {
        let descriptor = RegisterMap::resolve("profile_velocity").unwrap();
        assert_eq!(descriptor.address, 1044);
        assert_eq!(descriptor.width, RegisterWidth::Bits32);
        assert!(!descriptor.signed);
        assert_eq!(descriptor.native_range(), (0, 800_000));

        let err = RegisterMap::resolve("not_a_register").unwrap_err();
        assert_eq!(err, DriveError::unknown_register("not_a_register"));
    }

    #[test]
    fn test_by_address_covers_high_word() {
        assert_eq!(RegisterMap::by_address(1042).unwrap().name, "target_position");
        assert_eq!(RegisterMap::by_address(1043).unwrap().name, "target_position");
        assert!(RegisterMap::by_address(1044).unwrap().name == "profile_velocity");
        assert!(RegisterMap::by_address(1000).is_none());
        assert_eq!(RegisterMap::describe_address(1133), Some("ip_address"));
    }

    #[test]
    fn test_width_ranges() {
        assert_eq!(RegisterWidth::Bits16.range(true), (-32768, 32767));
        assert_eq!(RegisterWidth::Bits16.range(false), (0, 65535));
        assert_eq!(RegisterWidth::Bits32.range(true), (i32::MIN as i64, i32::MAX as i64));
        assert_eq!(RegisterWidth::Bits32.range(false), (0, u32::MAX as i64));
    }

    #[test]
    fn test_check_native_boundaries() {
        assert_eq!(MODE_OF_OPERATION.check_native(32767).unwrap(), 32767);
        assert_eq!(MODE_OF_OPERATION.check_native(-32768).unwrap(), -32768);
        assert!(MODE_OF_OPERATION.check_native(32768).is_err());

        assert!(CURRENT_RATIO.check_native(120).is_ok());
        assert!(matches!(
            CURRENT_RATIO.check_native(121),
            Err(DriveError::OutOfRange { min: 0, max: 120, .. })
        ));
        assert!(TARGET_POSITION.check_native(i32::MIN as i128).is_ok());
        assert!(TARGET_POSITION.check_native(i32::MIN as i128 - 1).is_err());
    }

    #[test]
    fn test_access() {
        assert!(STATUS_WORD.access.can_read());
        assert!(!STATUS_WORD.access.can_write());
        assert!(!STORE_PARAMETERS.access.can_read());
        assert!(CONTROL_WORD.access.can_read() && CONTROL_WORD.access.can_write());
        assert_eq!(ACTUAL_POSITION.to_string(), "actual_position@1004 I32 R-");
    }
}
