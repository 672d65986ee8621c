// Values with presentation properties and rolling statistics

use crate::format;

/// Presentation properties of a value: unit, formatting precision and the
/// allowed metric-prefix range.
#[derive(Debug, Clone, PartialEq)]
pub struct Properties {
    pub unit: String,
    pub delta_unit: String,
    pub inverse_delta_unit: String,
    pub precision: String,
    pub highest_prefix: f64,
    pub lowest_prefix: f64,
}

impl Properties {
    pub fn new(unit: &str, precision: &str, highest_prefix: f64, lowest_prefix: f64) -> Self {
        Self {
            unit: unit.to_string(),
            delta_unit: unit.to_string(),
            inverse_delta_unit: String::new(),
            precision: precision.to_string(),
            highest_prefix,
            lowest_prefix,
        }
    }

    pub fn with_delta_unit(mut self, delta_unit: &str) -> Self {
        self.delta_unit = delta_unit.to_string();
        self
    }

    pub fn with_inverse_delta_unit(mut self, inverse_delta_unit: &str) -> Self {
        self.inverse_delta_unit = inverse_delta_unit.to_string();
        self
    }
}

impl Default for Properties {
    fn default() -> Self {
        Self::new("", "8.2", 1e12, 1e-12)
    }
}

/// A number grouped with its presentation properties. Invalid values render
/// as a fixed-width placeholder instead of a number.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub value: f64,
    pub properties: Properties,
    pub valid: bool,
}

impl Value {
    pub fn new(value: f64, properties: Properties) -> Self {
        Self {
            value,
            properties,
            valid: true,
        }
    }

    pub fn format(&self) -> String {
        self.format_other(self.value)
    }

    /// Format another number as if it had the properties of this value.
    /// Useful for derived quantities, e.g. a peak-to-peak distance.
    pub fn format_other(&self, other: f64) -> String {
        if !self.valid {
            return format::invalid(&self.properties.precision, &self.properties.unit);
        }
        format::metric(
            other,
            &self.properties.precision,
            &self.properties.unit,
            false,
            self.properties.highest_prefix,
            self.properties.lowest_prefix,
        )
    }

    pub fn format_delta(&self, other: f64) -> String {
        if !self.valid {
            return format::invalid(&self.properties.precision, &self.properties.delta_unit);
        }
        format::metric(
            other,
            &self.properties.precision,
            &self.properties.delta_unit,
            true,
            self.properties.highest_prefix,
            self.properties.lowest_prefix,
        )
    }

    /// Format a reciprocal quantity, e.g. a time delta presented in hertz.
    /// The prefix range is inverted alongside the unit.
    pub fn format_inverse_delta(&self, other: f64) -> String {
        if !self.valid {
            return format::invalid(
                &self.properties.precision,
                &self.properties.inverse_delta_unit,
            );
        }
        format::metric(
            other,
            &self.properties.precision,
            &self.properties.inverse_delta_unit,
            true,
            1.0 / self.properties.lowest_prefix,
            1.0 / self.properties.highest_prefix,
        )
    }

    /// Render as a CSV cell, "value,unit".
    pub fn format_csv(&self) -> String {
        format!("{},{}", self.value, self.properties.unit)
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::new(0.0, Properties::default())
    }
}

/// A value that additionally accumulates min/max/mean statistics over every
/// recorded sample.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueWithStatistics {
    pub current: Value,
    min: f64,
    max: f64,
    sum: f64,
    nof_values: usize,
}

impl ValueWithStatistics {
    pub fn new(properties: Properties) -> Self {
        Self {
            current: Value::new(0.0, properties),
            min: f64::MAX,
            max: f64::MIN,
            sum: 0.0,
            nof_values: 0,
        }
    }

    /// Record a new sample, updating the current value and the statistics.
    pub fn record(&mut self, value: f64) {
        self.current.value = value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.nof_values += 1;
    }

    pub fn mean(&self) -> Value {
        Value::new(
            self.sum / self.nof_values as f64,
            self.current.properties.clone(),
        )
    }

    pub fn max(&self) -> Value {
        Value::new(self.max, self.current.properties.clone())
    }

    pub fn min(&self) -> Value {
        Value::new(self.min, self.current.properties.clone())
    }

    pub fn clear(&mut self) {
        self.current.value = 0.0;
        self.min = f64::MAX;
        self.max = f64::MIN;
        self.sum = 0.0;
        self.nof_values = 0;
    }
}

impl Default for ValueWithStatistics {
    fn default() -> Self {
        Self::new(Properties::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_renders_placeholder() {
        let mut value = Value::new(1.0, Properties::new("V", "7.2", 1e12, 1e-12));
        assert!(value.format().contains('V'));
        value.valid = false;
        assert!(value.format().starts_with("Invalid"));
    }

    #[test]
    fn test_statistics_accumulate() {
        let mut stats = ValueWithStatistics::default();
        for v in [1.0, 2.0, 3.0, 4.0] {
            stats.record(v);
        }
        assert_eq!(stats.current.value, 4.0);
        assert_eq!(stats.min().value, 1.0);
        assert_eq!(stats.max().value, 4.0);
        assert_eq!(stats.mean().value, 2.5);

        stats.clear();
        stats.record(-1.0);
        assert_eq!(stats.min().value, -1.0);
        assert_eq!(stats.max().value, -1.0);
        assert_eq!(stats.mean().value, -1.0);
    }

    #[test]
    fn test_csv_rendering() {
        let value = Value::new(2.5, Properties::new("V", "7.2", 1e12, 1e-12));
        assert_eq!(value.format_csv(), "2.5,V");
    }
}
