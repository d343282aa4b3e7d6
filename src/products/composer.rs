//! Pure combinations of already-fetched fields.
//!
//! Inputs must be unit-normalized and grid-aligned; nothing here reprojects
//! or converts.

use crate::products::error::ProductError;
use crate::types::field::{FieldId, MaskField, NormalizedField, Provenance};
use crate::types::request::{Comparator, ThresholdTest};
use crate::types::units::{relative_humidity_from_dewpoint, Unit};

fn ensure_aligned(left: &NormalizedField, right: &NormalizedField) -> Result<(), ProductError> {
    if !left.is_aligned_with(right) || left.values.len() != right.values.len() {
        return Err(ProductError::GridMismatch {
            left: left.field,
            left_shape: left.shape,
            right: right.field,
            right_shape: right.shape,
        });
    }
    Ok(())
}

fn ensure_same_time(left: &NormalizedField, right: &NormalizedField) -> Result<(), ProductError> {
    if left.valid_time != right.valid_time {
        return Err(ProductError::ValidTimeMismatch {
            left: left.valid_time,
            right: right.valid_time,
        });
    }
    Ok(())
}

fn ensure_unit(field: &NormalizedField, expected: Unit) -> Result<(), ProductError> {
    if field.unit != expected {
        return Err(ProductError::UnitMismatch {
            field: field.field,
            expected,
            found: field.unit,
        });
    }
    Ok(())
}

fn derived_provenance(name: &str, inputs: &[&NormalizedField]) -> Provenance {
    let first = inputs[0];
    let locators: Vec<&str> = inputs.iter().map(|f| f.provenance.locator.as_str()).collect();
    Provenance {
        family: first.provenance.family,
        domain: first.provenance.domain.clone(),
        locator: format!("derived:{}({})", name, locators.join(", ")),
        source_name: name.to_string(),
    }
}

/// Relative humidity in percent from temperature and dewpoint in °F.
pub fn relative_humidity(
    temperature: &NormalizedField,
    dewpoint: &NormalizedField,
) -> Result<NormalizedField, ProductError> {
    ensure_aligned(temperature, dewpoint)?;
    ensure_same_time(temperature, dewpoint)?;
    ensure_unit(temperature, Unit::Fahrenheit)?;
    ensure_unit(dewpoint, Unit::Fahrenheit)?;

    let values = temperature
        .values
        .iter()
        .zip(&dewpoint.values)
        .map(|(t, td)| relative_humidity_from_dewpoint(*t, *td))
        .collect();

    Ok(NormalizedField {
        field: FieldId::RelativeHumidity,
        shape: temperature.shape,
        values,
        latitudes: temperature.latitudes.clone(),
        longitudes: temperature.longitudes.clone(),
        unit: Unit::Percent,
        valid_time: temperature.valid_time,
        provenance: derived_provenance("relative_humidity", &[temperature, dewpoint]),
    })
}

/// `current - previous`, elementwise, valid at the current field's time.
pub fn difference(
    current: &NormalizedField,
    previous: &NormalizedField,
) -> Result<NormalizedField, ProductError> {
    if current.field != previous.field {
        return Err(ProductError::FieldMismatch {
            expected: current.field,
            found: previous.field,
        });
    }
    ensure_aligned(current, previous)?;
    ensure_unit(previous, current.unit)?;

    let values = current
        .values
        .iter()
        .zip(&previous.values)
        .map(|(now, before)| now - before)
        .collect();

    Ok(NormalizedField {
        field: current.field,
        shape: current.shape,
        values,
        latitudes: current.latitudes.clone(),
        longitudes: current.longitudes.clone(),
        unit: current.unit,
        valid_time: current.valid_time,
        provenance: derived_provenance("difference", &[current, previous]),
    })
}

/// Two threshold tests ANDed together.
pub fn threshold_mask(
    field_a: &NormalizedField,
    threshold_a: f64,
    comparator_a: Comparator,
    field_b: &NormalizedField,
    threshold_b: f64,
    comparator_b: Comparator,
) -> Result<MaskField, ProductError> {
    compound_mask(&[
        (
            field_a,
            ThresholdTest::new(field_a.field, comparator_a, threshold_a),
        ),
        (
            field_b,
            ThresholdTest::new(field_b.field, comparator_b, threshold_b),
        ),
    ])
}

/// Every criterion ANDed together over co-located grids.
pub fn compound_mask(criteria: &[(&NormalizedField, ThresholdTest)]) -> Result<MaskField, ProductError> {
    let Some((first, _)) = criteria.first() else {
        return Err(ProductError::EmptyCriteria);
    };
    for (field, test) in criteria {
        if field.field != test.field {
            return Err(ProductError::FieldMismatch {
                expected: test.field,
                found: field.field,
            });
        }
        ensure_aligned(first, field)?;
        ensure_same_time(first, field)?;
    }

    let values = (0..first.values.len())
        .map(|i| {
            criteria
                .iter()
                .all(|(field, test)| test.comparator.test(field.values[i], test.threshold))
        })
        .collect();
    let description = criteria
        .iter()
        .map(|(_, test)| test.to_string())
        .collect::<Vec<_>>()
        .join(" AND ");

    Ok(MaskField {
        shape: first.shape,
        values,
        latitudes: first.latitudes.clone(),
        longitudes: first.longitudes.clone(),
        valid_time: first.valid_time,
        description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::field::test_support::grid;
    use crate::types::field::GridShape;
    use chrono::Duration;

    #[test]
    fn test_identical_inputs_difference_to_zero() {
        let values = vec![71.2, 65.0, f64::NAN, 90.5];
        let now = grid(FieldId::Temperature, Unit::Fahrenheit, 2, 2, values.clone());
        let mut before = now.clone();
        before.valid_time = now.valid_time - Duration::hours(24);

        let delta = difference(&now, &before).unwrap();
        assert_eq!(delta.unit, Unit::Fahrenheit);
        assert_eq!(delta.valid_time, now.valid_time);
        assert_eq!(delta.values[0], 0.0);
        assert_eq!(delta.values[1], 0.0);
        assert!(delta.values[2].is_nan());
        assert_eq!(delta.values[3], 0.0);
    }

    #[test]
    fn test_saturation_is_full_humidity() {
        let temps = vec![-10.0, 32.0, 75.0, 104.0];
        let t = grid(FieldId::Temperature, Unit::Fahrenheit, 2, 2, temps.clone());
        let td = grid(FieldId::Dewpoint, Unit::Fahrenheit, 2, 2, temps);
        let rh = relative_humidity(&t, &td).unwrap();
        assert_eq!(rh.field, FieldId::RelativeHumidity);
        assert_eq!(rh.unit, Unit::Percent);
        for value in rh.values {
            assert!((value - 100.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_humidity_is_bounded() {
        let t = grid(FieldId::Temperature, Unit::Fahrenheit, 1, 3, vec![95.0, 60.0, 40.0]);
        let td = grid(FieldId::Dewpoint, Unit::Fahrenheit, 1, 3, vec![20.0, 50.0, 45.0]);
        let rh = relative_humidity(&t, &td).unwrap();
        assert!(rh.values[0] > 0.0 && rh.values[0] < 15.0);
        assert!(rh.values[1] > 60.0 && rh.values[1] < 75.0);
        assert_eq!(rh.values[2], 100.0);
    }

    #[test]
    fn test_three_criteria_single_cell() {
        let temperature = grid(
            FieldId::Temperature,
            Unit::Fahrenheit,
            3,
            3,
            vec![70.0, 80.0, 90.0, 76.0, 85.0, 74.0, 95.0, 60.0, 88.0],
        );
        let humidity = grid(
            FieldId::RelativeHumidity,
            Unit::Percent,
            3,
            3,
            vec![10.0, 40.0, 20.0, 20.0, 15.0, 10.0, 30.0, 5.0, 50.0],
        );
        let wind = grid(
            FieldId::WindSpeed,
            Unit::MilesPerHour,
            3,
            3,
            vec![20.0, 20.0, 10.0, 14.9, 25.0, 30.0, 40.0, 40.0, 5.0],
        );
        let mask = compound_mask(&[
            (&temperature, ThresholdTest::new(FieldId::Temperature, Comparator::GreaterOrEqual, 75.0)),
            (&humidity, ThresholdTest::new(FieldId::RelativeHumidity, Comparator::LessOrEqual, 25.0)),
            (&wind, ThresholdTest::new(FieldId::WindSpeed, Comparator::GreaterOrEqual, 15.0)),
        ])
        .unwrap();
        assert_eq!(mask.count_true(), 1);
        assert_eq!(mask.true_cells(), vec![(1, 1)]);
        assert_eq!(
            mask.description,
            "temperature >= 75 AND relative_humidity <= 25 AND wind_speed >= 15"
        );
    }

    #[test]
    fn test_two_field_threshold_mask() {
        let humidity = grid(FieldId::RelativeHumidity, Unit::Percent, 1, 3, vec![10.0, 30.0, f64::NAN]);
        let wind = grid(FieldId::WindSpeed, Unit::MilesPerHour, 1, 3, vec![30.0, 30.0, 30.0]);
        let mask = threshold_mask(
            &humidity,
            15.0,
            Comparator::LessOrEqual,
            &wind,
            25.0,
            Comparator::GreaterOrEqual,
        )
        .unwrap();
        assert_eq!(mask.values, vec![true, false, false]);
    }

    #[test]
    fn test_mismatched_grids_are_rejected() {
        let a = grid(FieldId::Temperature, Unit::Fahrenheit, 2, 2, vec![1.0; 4]);
        let b = grid(FieldId::Temperature, Unit::Fahrenheit, 1, 4, vec![1.0; 4]);
        assert!(matches!(
            difference(&a, &b),
            Err(ProductError::GridMismatch {
                left_shape: GridShape { ny: 2, nx: 2 },
                ..
            })
        ));

        let kelvin = grid(FieldId::Dewpoint, Unit::Kelvin, 2, 2, vec![1.0; 4]);
        assert!(matches!(
            relative_humidity(&a, &kelvin),
            Err(ProductError::UnitMismatch { .. })
        ));

        let mut later = grid(FieldId::Dewpoint, Unit::Fahrenheit, 2, 2, vec![1.0; 4]);
        later.valid_time += Duration::hours(1);
        assert!(matches!(
            relative_humidity(&a, &later),
            Err(ProductError::ValidTimeMismatch { .. })
        ));

        assert_eq!(compound_mask(&[]), Err(ProductError::EmptyCriteria));
    }
}
