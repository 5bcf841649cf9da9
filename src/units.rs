//! # Unit Conversion
//!
//! Pure conversions between drive-native counts (steps, steps/s, steps/s²)
//! and physical units. Angular units need the motor's steps per revolution;
//! linear units additionally need the millimetres travelled per revolution.
//!
//! ## Rounding
//!
//! [`UnitConverter::to_native`] rounds half to even: 0.5 step becomes 0,
//! 1.5 steps become 2. Converting back with
//! [`UnitConverter::from_native`] therefore reproduces the physical value to
//! within one native unit.
//!
//! ```rust
//! use csd_mt94::register_map::TARGET_POSITION;
//! use csd_mt94::units::{Unit, UnitConverter};
//!
//! let converter = UnitConverter::new(Some(12800), None);
//! let steps = converter.to_native(90.0, Unit::Degrees, &TARGET_POSITION).unwrap();
//! assert_eq!(steps, 3200);
//! ```

use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DriveError, DriveResult};
use crate::register_map::{Quantity, RegisterDescriptor};

/// Physical unit for a register value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    /// Raw register counts (steps, steps/s, ...)
    Native,
    Degrees,
    Radians,
    Revolutions,
    Millimetres,
    Rpm,
    DegreesPerSecond,
    MillimetresPerSecond,
    DegreesPerSecondSquared,
    MillimetresPerSecondSquared,
}

impl Unit {
    /// Check whether the unit can express values of `quantity`
    pub fn applies_to(self, quantity: Quantity) -> bool {
        match self {
            Unit::Native => true,
            Unit::Degrees | Unit::Radians | Unit::Revolutions | Unit::Millimetres => {
                quantity == Quantity::Position
            }
            Unit::Rpm | Unit::DegreesPerSecond | Unit::MillimetresPerSecond => {
                quantity == Quantity::Velocity
            }
            Unit::DegreesPerSecondSquared | Unit::MillimetresPerSecondSquared => {
                quantity == Quantity::Acceleration
            }
        }
    }

    fn is_linear(self) -> bool {
        matches!(
            self,
            Unit::Millimetres | Unit::MillimetresPerSecond | Unit::MillimetresPerSecondSquared
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Native => "steps",
            Unit::Degrees => "deg",
            Unit::Radians => "rad",
            Unit::Revolutions => "rev",
            Unit::Millimetres => "mm",
            Unit::Rpm => "rpm",
            Unit::DegreesPerSecond => "deg/s",
            Unit::MillimetresPerSecond => "mm/s",
            Unit::DegreesPerSecondSquared => "deg/s2",
            Unit::MillimetresPerSecondSquared => "mm/s2",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = DriveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "steps" => Ok(Unit::Native),
            "deg" => Ok(Unit::Degrees),
            "rad" => Ok(Unit::Radians),
            "rev" => Ok(Unit::Revolutions),
            "mm" => Ok(Unit::Millimetres),
            "rpm" => Ok(Unit::Rpm),
            "deg/s" => Ok(Unit::DegreesPerSecond),
            "mm/s" => Ok(Unit::MillimetresPerSecond),
            "deg/s2" => Ok(Unit::DegreesPerSecondSquared),
            "mm/s2" => Ok(Unit::MillimetresPerSecondSquared),
            other => Err(DriveError::invalid_argument(format!("unknown unit '{}'", other))),
        }
    }
}

/// Interpretation of a motion target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordinateSystem {
    Absolute,
    Relative,
}

impl CoordinateSystem {
    pub fn is_relative(self) -> bool {
        self == CoordinateSystem::Relative
    }
}

impl fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CoordinateSystem::Absolute => "absolute",
            CoordinateSystem::Relative => "relative",
        })
    }
}

impl FromStr for CoordinateSystem {
    type Err = DriveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "absolute" => Ok(CoordinateSystem::Absolute),
            "relative" => Ok(CoordinateSystem::Relative),
            other => Err(DriveError::invalid_argument(format!(
                "unknown coordinate system '{}'",
                other
            ))),
        }
    }
}

/// Converter between native counts and physical units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UnitConverter {
    steps_per_revolution: Option<u32>,
    millimetres_per_revolution: Option<f64>,
}

impl UnitConverter {
    pub fn new(steps_per_revolution: Option<u32>, millimetres_per_revolution: Option<f64>) -> Self {
        Self {
            steps_per_revolution,
            millimetres_per_revolution,
        }
    }

    pub fn steps_per_revolution(&self) -> Option<u32> {
        self.steps_per_revolution
    }

    pub fn millimetres_per_revolution(&self) -> Option<f64> {
        self.millimetres_per_revolution
    }

    pub fn set_steps_per_revolution(&mut self, steps: Option<u32>) {
        self.steps_per_revolution = steps;
    }

    pub fn set_millimetres_per_revolution(&mut self, millimetres: Option<f64>) {
        self.millimetres_per_revolution = millimetres;
    }

    /// Physical units per motor revolution for `unit`
    fn units_per_revolution(&self, unit: Unit) -> DriveResult<f64> {
        if unit.is_linear() {
            return self
                .millimetres_per_revolution
                .ok_or_else(|| DriveError::misconfigured_units(format!(
                    "'{}' requires millimetres per revolution",
                    unit
                )));
        }

        Ok(match unit {
            Unit::Degrees | Unit::DegreesPerSecond | Unit::DegreesPerSecondSquared => 360.0,
            Unit::Radians => TAU,
            Unit::Revolutions => 1.0,
            // rev/min against steps/s
            Unit::Rpm => 60.0,
            _ => 1.0,
        })
    }

    /// Conversion ratio for `unit` on `descriptor`, as
    /// (native counts per revolution, physical units per revolution)
    fn ratio(&self, unit: Unit, descriptor: &RegisterDescriptor) -> DriveResult<(f64, f64)> {
        if !unit.applies_to(descriptor.quantity) {
            return Err(DriveError::invalid_argument(format!(
                "unit '{}' does not apply to register '{}'",
                unit, descriptor.name
            )));
        }

        if unit == Unit::Native {
            return Ok((1.0, 1.0));
        }

        let steps = self.steps_per_revolution.ok_or_else(|| {
            DriveError::misconfigured_units(format!("'{}' requires steps per revolution", unit))
        })?;
        let per_revolution = self.units_per_revolution(unit)?;

        Ok((steps as f64 * descriptor.scale.as_f64(), per_revolution))
    }

    /// Convert a physical value to native counts
    ///
    /// Rounds half to even, then checks the result against the register's
    /// width, signedness and bounds.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` - unit does not fit the register, or `value` is not finite
    /// - `MisconfiguredUnits` - a required constant is not configured
    /// - `OutOfRange` - the rounded value does not fit the register
    pub fn to_native(&self, value: f64, unit: Unit, descriptor: &RegisterDescriptor) -> DriveResult<i64> {
        if !value.is_finite() {
            return Err(DriveError::invalid_argument(format!(
                "non-finite value for register '{}'",
                descriptor.name
            )));
        }

        let (native, physical) = self.ratio(unit, descriptor)?;
        // Multiply before dividing so exact halves stay exact
        let exact = value * native / physical;

        descriptor.check_native(exact.round_ties_even() as i128)
    }

    /// Convert native counts to a physical value
    pub fn from_native(&self, raw: i64, unit: Unit, descriptor: &RegisterDescriptor) -> DriveResult<f64> {
        let (native, physical) = self.ratio(unit, descriptor)?;
        Ok(raw as f64 * physical / native)
    }

    /// Physical size of one native count in `unit`
    pub fn resolution(&self, unit: Unit, descriptor: &RegisterDescriptor) -> DriveResult<f64> {
        self.from_native(1, unit, descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_map::{
        ACTUAL_VELOCITY, CURRENT_RATIO, MODE_OF_OPERATION, PROFILE_ACCELERATION, PROFILE_VELOCITY,
        TARGET_POSITION,
    };

    fn converter() -> UnitConverter {
        UnitConverter::new(Some(12800), Some(5.0))
    }

    #[test]
    fn test_degree_conversion() {
        let c = converter();
        assert_eq!(c.to_native(90.0, Unit::Degrees, &TARGET_POSITION).unwrap(), 3200);
        assert_eq!(c.to_native(-360.0, Unit::Degrees, &TARGET_POSITION).unwrap(), -12800);
        assert_eq!(c.to_native(0.0, Unit::Degrees, &TARGET_POSITION).unwrap(), 0);
        assert_eq!(c.from_native(6400, Unit::Degrees, &TARGET_POSITION).unwrap(), 180.0);
        assert_eq!(c.to_native(2.0, Unit::Revolutions, &TARGET_POSITION).unwrap(), 25600);
        assert_eq!(c.to_native(TAU, Unit::Radians, &TARGET_POSITION).unwrap(), 12800);
    }

    #[test]
    fn test_linear_and_velocity_conversion() {
        let c = converter();
        assert_eq!(c.to_native(2.5, Unit::Millimetres, &TARGET_POSITION).unwrap(), 6400);
        assert_eq!(c.to_native(60.0, Unit::Rpm, &PROFILE_VELOCITY).unwrap(), 12800);
        assert_eq!(c.to_native(10.0, Unit::MillimetresPerSecond, &PROFILE_VELOCITY).unwrap(), 25600);
        assert_eq!(c.from_native(-12800, Unit::Rpm, &ACTUAL_VELOCITY).unwrap(), -60.0);
        assert_eq!(
            c.to_native(360.0, Unit::DegreesPerSecondSquared, &PROFILE_ACCELERATION).unwrap(),
            12800
        );
    }

    #[test]
    fn test_round_half_to_even() {
        // 1.8 degrees per step
        let c = UnitConverter::new(Some(200), None);
        assert_eq!(c.to_native(0.9, Unit::Degrees, &TARGET_POSITION).unwrap(), 0);
        assert_eq!(c.to_native(2.7, Unit::Degrees, &TARGET_POSITION).unwrap(), 2);
        assert_eq!(c.to_native(4.5, Unit::Degrees, &TARGET_POSITION).unwrap(), 2);
        assert_eq!(c.to_native(-2.7, Unit::Degrees, &TARGET_POSITION).unwrap(), -2);
        assert_eq!(c.to_native(2.5, Unit::Native, &TARGET_POSITION).unwrap(), 2);
        assert_eq!(c.to_native(3.5, Unit::Native, &TARGET_POSITION).unwrap(), 4);
    }

    #[test]
    fn test_round_trip_within_one_step() {
        let c = UnitConverter::new(Some(200), Some(2.0));
        let resolution = c.resolution(Unit::Degrees, &TARGET_POSITION).unwrap();
        assert!((resolution - 1.8).abs() < 1e-12);

        for &value in &[0.0, 1.0, -1.0, 17.3, 359.99, -1234.5678, 100000.0] {
            let native = c.to_native(value, Unit::Degrees, &TARGET_POSITION).unwrap();
            let back = c.from_native(native, Unit::Degrees, &TARGET_POSITION).unwrap();
            assert!((back - value).abs() <= resolution, "{} -> {} -> {}", value, native, back);
        }

        for &value in &[0.1, 3.3, -7.77] {
            let native = c.to_native(value, Unit::Millimetres, &TARGET_POSITION).unwrap();
            let back = c.from_native(native, Unit::Millimetres, &TARGET_POSITION).unwrap();
            assert!((back - value).abs() <= c.resolution(Unit::Millimetres, &TARGET_POSITION).unwrap());
        }
    }

    #[test]
    fn test_range_boundaries() {
        let c = UnitConverter::default();
        assert_eq!(c.to_native(32767.0, Unit::Native, &MODE_OF_OPERATION).unwrap(), 32767);
        assert_eq!(c.to_native(-32768.0, Unit::Native, &MODE_OF_OPERATION).unwrap(), -32768);
        assert!(matches!(
            c.to_native(32768.0, Unit::Native, &MODE_OF_OPERATION),
            Err(DriveError::OutOfRange { .. })
        ));

        let max = i32::MAX as f64;
        assert!(c.to_native(max, Unit::Native, &TARGET_POSITION).is_ok());
        assert!(c.to_native(max + 1.0, Unit::Native, &TARGET_POSITION).is_err());

        assert!(c.to_native(800_000.0, Unit::Native, &PROFILE_VELOCITY).is_ok());
        assert!(c.to_native(800_001.0, Unit::Native, &PROFILE_VELOCITY).is_err());
        assert!(c.to_native(-1.0, Unit::Native, &PROFILE_VELOCITY).is_err());
        assert!(c.to_native(f64::NAN, Unit::Native, &PROFILE_VELOCITY).is_err());
    }

    #[test]
    fn test_out_of_range_after_conversion() {
        let c = converter();
        // 1e6 revolutions overflow a signed 32-bit step count
        let err = c.to_native(1e6, Unit::Revolutions, &TARGET_POSITION).unwrap_err();
        assert!(matches!(err, DriveError::OutOfRange { value, .. } if value == 12_800_000_000));
    }

    #[test]
    fn test_missing_constants() {
        let c = UnitConverter::default();
        assert!(matches!(
            c.to_native(25600.0, Unit::Degrees, &TARGET_POSITION),
            Err(DriveError::MisconfiguredUnits { .. })
        ));

        let c = UnitConverter::new(Some(12800), None);
        assert!(matches!(
            c.to_native(1.0, Unit::Millimetres, &TARGET_POSITION),
            Err(DriveError::MisconfiguredUnits { .. })
        ));
        assert!(matches!(
            c.from_native(1, Unit::MillimetresPerSecond, &ACTUAL_VELOCITY),
            Err(DriveError::MisconfiguredUnits { .. })
        ));
    }

    #[test]
    fn test_unit_quantity_mismatch() {
        let c = converter();
        assert!(matches!(
            c.to_native(10.0, Unit::Rpm, &TARGET_POSITION),
            Err(DriveError::InvalidArgument { .. })
        ));
        assert!(matches!(
            c.to_native(10.0, Unit::Degrees, &CURRENT_RATIO),
            Err(DriveError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_parse_strings() {
        assert_eq!("deg".parse::<Unit>().unwrap(), Unit::Degrees);
        assert_eq!("mm/s".parse::<Unit>().unwrap(), Unit::MillimetresPerSecond);
        assert_eq!("steps".parse::<Unit>().unwrap(), Unit::Native);
        assert!(matches!("degrees".parse::<Unit>(), Err(DriveError::InvalidArgument { .. })));

        assert_eq!("relative".parse::<CoordinateSystem>().unwrap(), CoordinateSystem::Relative);
        assert_eq!("absolute".parse::<CoordinateSystem>().unwrap(), CoordinateSystem::Absolute);
        assert!(matches!(
            "Relative".parse::<CoordinateSystem>(),
            Err(DriveError::InvalidArgument { .. })
        ));

        for unit in [Unit::Native, Unit::Rpm, Unit::DegreesPerSecondSquared] {
            assert_eq!(unit.to_string().parse::<Unit>().unwrap(), unit);
        }
    }
}
