use crate::enums::{DragAxis, HeaderField, Orientation};
use crate::equation::{Bindings, EvalError};
use crate::image_type::{DragBindings, SyntheticImageType};
use crate::map_store::MapStore;
use crate::parameter::ScannerParameter;
use crate::quantitative_map::{SliceCursor, extract_plane};
use crate::window::WindowLevel;

use ndarray::{Array2, Array3, ArrayD, CowArray, IxDyn, Zip};
use rayon::prelude::*;
use std::collections::BTreeMap;
use thiserror::Error;

/// Ceiling of the 16-bit output range
pub const SCALE: f64 = 65535.0;
/// Voxels whose mask map magnitude does not exceed this are zeroed
pub const MASK_THRESHOLD: f32 = 0.01;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SynthesisError {
    #[error("Synthetic image not selected")]
    NotSelected,

    #[error("{} map not loaded (needed by {image_type})", .missing.join(", "))]
    NotLoaded {
        image_type: String,
        missing: Vec<String>,
    },

    #[error("{image_type} has no scanner parameter {parameter}")]
    UnknownParameter {
        image_type: String,
        parameter: String,
    },

    #[error("{orientation} slice {index} is outside map {map}")]
    SliceOutOfRange {
        map: String,
        orientation: Orientation,
        index: usize,
    },

    #[error("Cannot evaluate {image_type}: {source}")]
    Evaluation {
        image_type: String,
        #[source]
        source: EvalError,
    },

    #[error("{image_type} evaluated to an array of shape {shape:?}")]
    UnexpectedShape {
        image_type: String,
        shape: Vec<usize>,
    },
}

/// Whether to synthesize the current 2D slice or the whole volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dims {
    Slice,
    Volume,
}

/// The session's working synthetic image
///
/// Holds the selected type, the caller's parameter values and the arrays
/// derived from them. The arrays are only replaced by a successful recompute.
#[derive(Debug, Clone, Default)]
pub struct SynthesizedImage {
    image_type: Option<SyntheticImageType>,
    parameters: Vec<ScannerParameter>,
    drag: DragBindings,
    slice: Option<Array2<f32>>,
    volume: Option<Array3<f32>>,
    window: Option<WindowLevel>,
    cursor: SliceCursor,
    series_number: Option<u32>,
    header: BTreeMap<HeaderField, String>,
}

impl SynthesizedImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to `image_type`, with parameters at their defaults and slice
    /// positions copied from `reference`. Cached arrays and the window are cleared.
    pub fn select(&mut self, image_type: SyntheticImageType, reference: Option<&SliceCursor>) {
        self.parameters = image_type.parameters().to_vec();
        self.drag = image_type.drag().clone();
        if let Some(cursor) = reference {
            self.cursor = *cursor;
        }
        self.slice = None;
        self.volume = None;
        self.window = None;
        log::debug!("Selected synthetic image {}", image_type.name());
        self.image_type = Some(image_type);
    }

    pub fn image_type(&self) -> Option<&SyntheticImageType> {
        self.image_type.as_ref()
    }

    fn selected(&self) -> Result<&SyntheticImageType, SynthesisError> {
        self.image_type.as_ref().ok_or(SynthesisError::NotSelected)
    }

    pub fn parameters(&self) -> &[ScannerParameter] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&ScannerParameter> {
        self.parameters.iter().find(|p| p.name() == name)
    }

    pub fn set_default_parameters(&mut self) {
        self.parameters.iter_mut().for_each(ScannerParameter::reset);
    }

    /// Set a scanner parameter, clamped to its range; returns the stored value.
    /// Cached arrays are stale until the next recompute.
    pub fn set_parameter_value(&mut self, name: &str, value: f64) -> Result<f64, SynthesisError> {
        let image_type = self.selected()?.name().to_string();
        self.parameters
            .iter_mut()
            .find(|p| p.name() == name)
            .map(|p| p.set_value(value))
            .ok_or(SynthesisError::UnknownParameter {
                image_type,
                parameter: name.to_string(),
            })
    }

    pub fn drag(&self) -> &DragBindings {
        &self.drag
    }

    /// Bind a parameter of the selected type to a drag axis
    pub fn bind_drag(&mut self, parameter: &str, axis: DragAxis) -> Result<(), SynthesisError> {
        let image_type = self.selected()?;
        if self.parameter(parameter).is_none() {
            return Err(SynthesisError::UnknownParameter {
                image_type: image_type.name().to_string(),
                parameter: parameter.to_string(),
            });
        }
        self.drag.bind(parameter, axis);
        Ok(())
    }

    pub fn drag_parameter_value(&self, axis: DragAxis) -> Option<f64> {
        self.drag
            .get(axis)
            .and_then(|name| self.parameter(name))
            .map(ScannerParameter::value)
    }

    /// Set the parameter bound to `axis`; `None` when nothing is bound
    pub fn set_drag_parameter_value(&mut self, axis: DragAxis, value: f64) -> Option<f64> {
        let name = self.drag.get(axis)?.to_string();
        self.set_parameter_value(&name, value).ok()
    }

    pub fn cursor(&self) -> &SliceCursor {
        &self.cursor
    }

    pub fn cursor_mut(&mut self) -> &mut SliceCursor {
        &mut self.cursor
    }

    /// Dependencies of the selected type that `store` has not loaded
    pub fn missing_maps(&self, store: &MapStore) -> Vec<String> {
        self.image_type
            .as_ref()
            .map(|image_type| {
                store
                    .missing(image_type.dependencies())
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Evaluate the selected type against `store` and cache the result.
    ///
    /// The equation result has non-finite values zeroed, is masked by the
    /// first dependency map, made non-negative and rescaled so that it spans
    /// `[0, SCALE * 0.1]`.
    ///
    /// # Errors
    ///
    /// [`SynthesisError::NotSelected`] or [`SynthesisError::NotLoaded`] when
    /// inputs are missing; the previously cached arrays are kept on any error.
    pub fn recompute(
        &mut self,
        store: &MapStore,
        orientation: Orientation,
        dims: Dims,
    ) -> Result<(), SynthesisError> {
        let image_type = self.image_type.as_ref().ok_or(SynthesisError::NotSelected)?;
        let name = image_type.name();
        let missing = store.missing(image_type.dependencies());
        if !missing.is_empty() {
            return Err(SynthesisError::NotLoaded {
                image_type: name.to_string(),
                missing: missing.into_iter().map(str::to_string).collect(),
            });
        }

        let index = self.cursor.current(orientation);
        let inputs = image_type
            .dependencies()
            .iter()
            .map(|map| {
                let volume = store.volume(map).ok_or_else(|| SynthesisError::NotLoaded {
                    image_type: name.to_string(),
                    missing: vec![map.clone()],
                })?;
                let data = match dims {
                    Dims::Volume => CowArray::from(volume.view().into_dyn()),
                    Dims::Slice => extract_plane(volume, orientation, index)
                        .map(|plane| CowArray::from(plane.into_dyn()))
                        .ok_or_else(|| SynthesisError::SliceOutOfRange {
                            map: map.clone(),
                            orientation,
                            index,
                        })?,
                };
                Ok((map.as_str(), data))
            })
            .collect::<Result<Vec<_>, SynthesisError>>()?;

        let mut bindings = Bindings::new();
        for parameter in &self.parameters {
            bindings.insert_parameter(parameter.name(), parameter.value());
        }
        for (map, data) in &inputs {
            bindings.insert_map(map, data.view());
        }

        let evaluation_error = |source| SynthesisError::Evaluation {
            image_type: name.to_string(),
            source,
        };
        let Some((_, mask)) = inputs.first() else {
            return Err(SynthesisError::NotSelected);
        };
        let result = image_type
            .equation()
            .evaluate(&bindings)
            .map_err(evaluation_error)?
            .into_array(mask.shape());
        if result.shape() != mask.shape() {
            return Err(evaluation_error(EvalError::ShapeMismatch {
                left: result.shape().to_vec(),
                right: mask.shape().to_vec(),
            }));
        }

        let scaled = rescale(mask_and_rectify(result, mask));
        let shape = scaled.shape().to_vec();
        let unexpected = || SynthesisError::UnexpectedShape {
            image_type: name.to_string(),
            shape: shape.clone(),
        };
        match dims {
            Dims::Slice => {
                self.slice = Some(scaled.into_dimensionality().map_err(|_| unexpected())?);
            }
            Dims::Volume => {
                self.volume = Some(scaled.into_dimensionality().map_err(|_| unexpected())?);
            }
        }
        Ok(())
    }

    /// Last successfully synthesized 2D slice
    pub fn slice(&self) -> Option<&Array2<f32>> {
        self.slice.as_ref()
    }

    /// Last successfully synthesized volume
    pub fn volume(&self) -> Option<&Array3<f32>> {
        self.volume.as_ref()
    }

    pub fn window(&self) -> Option<WindowLevel> {
        self.window
    }

    /// Restore the configured window, or derive it from the current slice
    pub fn reset_window(&mut self) -> Result<WindowLevel, SynthesisError> {
        let image_type = self.selected()?;
        let slice = self.slice.as_ref().ok_or(SynthesisError::NotSelected)?;
        let window = WindowLevel::from_data(
            slice,
            image_type.default_window_width(),
            image_type.default_window_center(),
        );
        self.window = Some(window);
        Ok(window)
    }

    fn window_mut(&mut self) -> Result<&mut WindowLevel, SynthesisError> {
        if self.window.is_none() {
            self.reset_window()?;
        }
        self.window.as_mut().ok_or(SynthesisError::NotSelected)
    }

    pub fn add_delta_window_width(&mut self, delta: f64) -> Result<f64, SynthesisError> {
        Ok(self.window_mut()?.add_delta_width(delta))
    }

    pub fn add_delta_window_center(&mut self, delta: f64) -> Result<f64, SynthesisError> {
        Ok(self.window_mut()?.add_delta_center(delta))
    }

    pub fn set_window_width(&mut self, width: f64) -> Result<f64, SynthesisError> {
        Ok(self.window_mut()?.set_width(width))
    }

    pub fn set_window_center(&mut self, center: f64) -> Result<f64, SynthesisError> {
        Ok(self.window_mut()?.set_center(center))
    }

    /// Current window, initialised from defaults on first use
    pub fn current_window(&mut self) -> Result<WindowLevel, SynthesisError> {
        self.window_mut().map(|window| *window)
    }

    pub fn series_number(&self) -> Option<u32> {
        self.series_number
    }

    pub fn set_series_number(&mut self, series_number: u32) {
        self.series_number = Some(series_number);
    }

    pub fn header(&self, field: HeaderField) -> Option<&str> {
        self.header.get(&field).map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<HeaderField, String> {
        &self.header
    }

    pub fn set_header(&mut self, field: HeaderField, value: impl Into<String>) {
        self.header.insert(field, value.into());
    }

    /// `"<type> <P>:<value> ..."` over the current parameters
    pub fn series_description(&self) -> String {
        let mut description = self
            .image_type
            .as_ref()
            .map(|image_type| image_type.name().to_string())
            .unwrap_or_default();
        for parameter in &self.parameters {
            description.push_str(&format!(" {}:{}", parameter.name(), parameter.value()));
        }
        description
    }
}

/// Zero non-finite values and voxels outside the mask, then take magnitudes
fn mask_and_rectify(mut result: ArrayD<f32>, mask: &CowArray<'_, f32, IxDyn>) -> ArrayD<f32> {
    Zip::from(&mut result).and(mask).par_for_each(|value, &support| {
        *value = if support.abs() > MASK_THRESHOLD && value.is_finite() {
            value.abs()
        } else {
            0.0
        };
    });
    result
}

/// Map `[min, max]` of `data` onto `[0, SCALE * 0.1]`; a constant array becomes zero
fn rescale(mut data: ArrayD<f32>) -> ArrayD<f32> {
    let (min, max) = data
        .as_slice_memory_order()
        .map(|values| {
            values
                .par_iter()
                .fold(
                    || (f32::INFINITY, f32::NEG_INFINITY),
                    |(lo, hi), &v| (lo.min(v), hi.max(v)),
                )
                .reduce(
                    || (f32::INFINITY, f32::NEG_INFINITY),
                    |a, b| (a.0.min(b.0), a.1.max(b.1)),
                )
        })
        .unwrap_or_else(|| {
            data.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
        });

    let range = f64::from(max) - f64::from(min);
    if !range.is_finite() || range <= 0.0 {
        data.fill(0.0);
        return data;
    }
    let scaling = SCALE / range * 0.1;
    let offset = f64::from(min);
    data.par_mapv_inplace(|v| (scaling * (f64::from(v) - offset)) as f32);
    data
}
