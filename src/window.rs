use ndarray::{Array, ArrayBase, Data, Dimension};

/// Lowest admissible window width or center
pub const MIN_BOUND: f64 = -7000.0;
/// Highest admissible window width or center
pub const MAX_BOUND: f64 = 262143.0;

/// Display window `[center - width/2, center + width/2]` of a synthesized image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowLevel {
    width: f64,
    center: f64,
}

fn clamp(value: f64) -> f64 {
    value.clamp(MIN_BOUND, MAX_BOUND)
}

impl WindowLevel {
    pub fn new(width: f64, center: f64) -> Self {
        Self {
            width: clamp(width),
            center: clamp(center),
        }
    }

    /// Window from configured defaults, falling back to the data range:
    /// `width = floor(max|x|)`, `center = floor(max|x| / 2)`.
    pub fn from_data<S, D>(
        data: &ArrayBase<S, D>,
        default_width: Option<f64>,
        default_center: Option<f64>,
    ) -> Self
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        let max_abs = data
            .iter()
            .filter(|v| v.is_finite())
            .fold(0.0_f64, |acc, &v| acc.max(f64::from(v.abs())));
        let width = default_width.unwrap_or_else(|| max_abs.floor());
        let center = default_center.unwrap_or_else(|| (max_abs / 2.0).floor());
        Self::new(width, center)
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn center(&self) -> f64 {
        self.center
    }

    pub fn add_delta_width(&mut self, delta: f64) -> f64 {
        if !delta.is_nan() {
            self.width = clamp(self.width + delta);
        }
        self.width
    }

    pub fn add_delta_center(&mut self, delta: f64) -> f64 {
        if !delta.is_nan() {
            self.center = clamp(self.center + delta);
        }
        self.center
    }

    pub fn set_width(&mut self, width: f64) -> f64 {
        if !width.is_nan() {
            self.width = clamp(width);
        }
        self.width
    }

    pub fn set_center(&mut self, center: f64) -> f64 {
        if !center.is_nan() {
            self.center = clamp(center);
        }
        self.center
    }

    pub fn floor(&self) -> f64 {
        self.center - self.width / 2.0
    }

    pub fn ceiling(&self) -> f64 {
        self.center + self.width / 2.0
    }

    /// Copy of `data` with values clipped into the window.
    ///
    /// A negative width puts the floor above the ceiling; every value then
    /// lands on one of the two ends.
    pub fn clip<S, D>(&self, data: &ArrayBase<S, D>) -> Array<f32, D>
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        let (low, high) = (self.floor() as f32, self.ceiling() as f32);
        data.mapv(|v| if v < low { low } else if v > high { high } else { v })
    }
}
