use crate::enums::Interpolation;

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Output size of a slice scaled by `scale`, at least one pixel per axis
    pub(crate) fn scaled_dimensions(dim: (usize, usize), scale: f32) -> (usize, usize) {
        let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
        let rows = ((dim.0 as f32 * scale).round() as usize).max(1);
        let cols = ((dim.1 as f32 * scale).round() as usize).max(1);
        (rows, cols)
    }

    /// Resample `slice` to `rows` x `cols`. `Interpolation::None` returns a copy.
    pub(crate) fn resize(
        slice: &ArrayView2<f32>,
        rows: usize,
        cols: usize,
        interpolation: Interpolation,
    ) -> Array2<f32> {
        let (slice_rows, slice_cols) = slice.dim();
        if interpolation == Interpolation::None
            || slice_rows == 0
            || slice_cols == 0
            || (rows, cols) == (slice_rows, slice_cols)
        {
            return slice.to_owned();
        }

        let pixel_data: Vec<f32> = (0..rows)
            .into_par_iter()
            .flat_map_iter(|y| {
                (0..cols).map(move |x| {
                    // Normalized coordinates with half-pixel offset
                    let src_y = (y as f32 + 0.5) / rows as f32 * slice_rows as f32 - 0.5;
                    let src_x = (x as f32 + 0.5) / cols as f32 * slice_cols as f32 - 0.5;

                    let src_y = src_y.clamp(0.0, (slice_rows - 1) as f32);
                    let src_x = src_x.clamp(0.0, (slice_cols - 1) as f32);

                    match interpolation {
                        Interpolation::Bilinear => Self::bilinear_interpolate(slice, src_y, src_x),
                        _ => slice[[src_y.round() as usize, src_x.round() as usize]],
                    }
                })
            })
            .collect();

        Array2::from_shape_vec((rows, cols), pixel_data)
            .unwrap_or_else(|_| Array2::zeros((rows, cols)))
    }

    #[inline]
    pub(crate) fn bilinear_interpolate(slice: &ArrayView2<f32>, y: f32, x: f32) -> f32 {
        let (height, width) = slice.dim();

        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);

        let dy = y - y0 as f32;
        let dx = x - x0 as f32;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;

        let v00 = slice[[y0, x0]];
        let v01 = slice[[y0, x1]];
        let v10 = slice[[y1, x0]];
        let v11 = slice[[y1, x1]];

        let v0 = v00.mul_add(one_minus_dx, v01 * dx);
        let v1 = v10.mul_add(one_minus_dx, v11 * dx);

        v0.mul_add(one_minus_dy, v1 * dy)
    }
}
