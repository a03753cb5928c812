use serde::{Deserialize, Serialize};

/// A virtual acquisition setting (TE, TR, TI, ...) bound into signal equations
///
/// `min <= value <= max` always holds; out-of-range values are clamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerParameter {
    name: String,
    label: String,
    min: f64,
    max: f64,
    step: f64,
    default: f64,
    value: f64,
}

impl ScannerParameter {
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        min: f64,
        max: f64,
        step: f64,
        default: f64,
    ) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        let default = default.clamp(min, max);
        Self {
            name: name.into(),
            label: label.into(),
            min,
            max,
            step,
            default,
            value: default,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn default_value(&self) -> f64 {
        self.default
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Set the current value, clamped into `[min, max]`; returns the stored value
    pub fn set_value(&mut self, value: f64) -> f64 {
        self.value = if value.is_nan() {
            self.default
        } else {
            value.clamp(self.min, self.max)
        };
        self.value
    }

    pub fn reset(&mut self) {
        self.value = self.default;
    }
}
