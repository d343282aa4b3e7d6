//! Physical units and the conversions applied to every fetched value,
//! regardless of which catalog it came from.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A physical unit attached to a [`crate::NormalizedField`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Kelvin,
    Celsius,
    Fahrenheit,
    MetersPerSecond,
    Knots,
    MilesPerHour,
    Pascal,
    Hectopascal,
    Meter,
    Foot,
    Percent,
    /// Cloud cover in oktas (0-8).
    Oktas,
    /// Dimensionless, e.g. a boolean mask or a count.
    Dimensionless,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Kelvin => "K",
            Unit::Celsius => "degC",
            Unit::Fahrenheit => "degF",
            Unit::MetersPerSecond => "m/s",
            Unit::Knots => "kt",
            Unit::MilesPerHour => "mph",
            Unit::Pascal => "Pa",
            Unit::Hectopascal => "hPa",
            Unit::Meter => "m",
            Unit::Foot => "ft",
            Unit::Percent => "%",
            Unit::Oktas => "oktas",
            Unit::Dimensionless => "1",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A unit conversion step, looked up per field in the [`crate::FieldTable`].
///
/// ```
/// use firewx::{Conversion, Unit};
///
/// assert_eq!(Conversion::KelvinToFahrenheit.target_unit(), Unit::Fahrenheit);
/// assert!((Conversion::KelvinToFahrenheit.apply(273.15) - 32.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conversion {
    KelvinToFahrenheit,
    CelsiusToFahrenheit,
    MetersPerSecondToMph,
    KnotsToMph,
    PascalToHectopascal,
    MetersToFeet,
    /// Value is already in the wanted unit.
    Identity(Unit),
}

impl Conversion {
    pub fn source_unit(&self) -> Unit {
        match self {
            Conversion::KelvinToFahrenheit => Unit::Kelvin,
            Conversion::CelsiusToFahrenheit => Unit::Celsius,
            Conversion::MetersPerSecondToMph => Unit::MetersPerSecond,
            Conversion::KnotsToMph => Unit::Knots,
            Conversion::PascalToHectopascal => Unit::Pascal,
            Conversion::MetersToFeet => Unit::Meter,
            Conversion::Identity(unit) => *unit,
        }
    }

    pub fn target_unit(&self) -> Unit {
        match self {
            Conversion::KelvinToFahrenheit | Conversion::CelsiusToFahrenheit => Unit::Fahrenheit,
            Conversion::MetersPerSecondToMph | Conversion::KnotsToMph => Unit::MilesPerHour,
            Conversion::PascalToHectopascal => Unit::Hectopascal,
            Conversion::MetersToFeet => Unit::Foot,
            Conversion::Identity(unit) => *unit,
        }
    }

    /// Converts a single value. NaN (missing) stays NaN.
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            Conversion::KelvinToFahrenheit => kelvin_to_fahrenheit(value),
            Conversion::CelsiusToFahrenheit => celsius_to_fahrenheit(value),
            Conversion::MetersPerSecondToMph => mps_to_mph(value),
            Conversion::KnotsToMph => knots_to_mph(value),
            Conversion::PascalToHectopascal => pascal_to_hectopascal(value),
            Conversion::MetersToFeet => meters_to_feet(value),
            Conversion::Identity(_) => value,
        }
    }

    pub fn apply_all(&self, values: &mut [f64]) {
        if matches!(self, Conversion::Identity(_)) {
            return;
        }
        for v in values.iter_mut() {
            *v = self.apply(*v);
        }
    }
}

const MPS_TO_MPH: f64 = 2.236_936_292_054_402;
const KNOTS_TO_MPH: f64 = 1.150_779_448_023_543;
const METERS_TO_FEET: f64 = 3.280_839_895_013_123;

pub fn kelvin_to_fahrenheit(k: f64) -> f64 {
    celsius_to_fahrenheit(k - 273.15)
}

pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

pub fn mps_to_mph(mps: f64) -> f64 {
    mps * MPS_TO_MPH
}

pub fn mph_to_mps(mph: f64) -> f64 {
    mph / MPS_TO_MPH
}

pub fn knots_to_mph(kt: f64) -> f64 {
    kt * KNOTS_TO_MPH
}

pub fn pascal_to_hectopascal(pa: f64) -> f64 {
    pa / 100.0
}

pub fn meters_to_feet(m: f64) -> f64 {
    m * METERS_TO_FEET
}

/// Saturation vapor pressure in hPa for a temperature in degrees Celsius
/// (Bolton 1980).
pub fn saturation_vapor_pressure(celsius: f64) -> f64 {
    6.112 * ((17.67 * celsius) / (celsius + 243.5)).exp()
}

/// Relative humidity in percent from temperature and dewpoint, both in degrees
/// Fahrenheit. The result is clamped to 0-100; NaN input yields NaN.
pub fn relative_humidity_from_dewpoint(temperature_f: f64, dewpoint_f: f64) -> f64 {
    if temperature_f.is_nan() || dewpoint_f.is_nan() {
        return f64::NAN;
    }
    let e = saturation_vapor_pressure(fahrenheit_to_celsius(dewpoint_f));
    let es = saturation_vapor_pressure(fahrenheit_to_celsius(temperature_f));
    (100.0 * e / es).clamp(0.0, 100.0)
}

/// Eastward and northward wind components from a meteorological direction
/// (degrees the wind blows *from*) and a speed, in the speed's unit.
pub fn wind_components(speed: f64, direction_deg: f64) -> (f64, f64) {
    let rad = direction_deg.to_radians();
    (-speed * rad.sin(), -speed * rad.cos())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_temperature_conversions() {
        assert!(close(kelvin_to_fahrenheit(273.15), 32.0));
        assert!(close(kelvin_to_fahrenheit(373.15), 212.0));
        assert!(close(celsius_to_fahrenheit(-40.0), -40.0));
        assert!(close(fahrenheit_to_celsius(212.0), 100.0));
    }

    #[test]
    fn test_speed_pressure_distance_conversions() {
        assert!(close(mps_to_mph(10.0), 22.36936292));
        assert!(close(mph_to_mps(mps_to_mph(7.5)), 7.5));
        assert!(close(knots_to_mph(10.0), 11.50779448));
        assert!(close(pascal_to_hectopascal(101_325.0), 1013.25));
        assert!(close(meters_to_feet(1000.0), 3280.839895));
    }

    #[test]
    fn test_relative_humidity_saturated_and_dry() {
        assert_eq!(relative_humidity_from_dewpoint(75.0, 75.0), 100.0);
        let rh = relative_humidity_from_dewpoint(95.0, 30.0);
        assert!(rh > 5.0 && rh < 15.0, "unexpected rh {rh}");
        // Supersaturated input is clamped.
        assert_eq!(relative_humidity_from_dewpoint(60.0, 65.0), 100.0);
        assert!(relative_humidity_from_dewpoint(f64::NAN, 40.0).is_nan());
    }

    #[test]
    fn test_conversion_apply_all_keeps_nan() {
        let mut values = vec![0.0, f64::NAN, 100.0];
        Conversion::PascalToHectopascal.apply_all(&mut values);
        assert_eq!(values[0], 0.0);
        assert!(values[1].is_nan());
        assert_eq!(values[2], 1.0);
    }

    #[test]
    fn test_wind_components() {
        // Wind from the north blows toward the south.
        let (u, v) = wind_components(10.0, 0.0);
        assert!(close(u, 0.0));
        assert!(close(v, -10.0));
        // Wind from the west blows toward the east.
        let (u, v) = wind_components(10.0, 270.0);
        assert!(close(u, 10.0));
        assert!(close(v, 0.0));
    }
}
