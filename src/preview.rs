use crate::enums::Interpolation;
use crate::interpolator::Interpolator;
use crate::window::WindowLevel;

use image::{ImageBuffer, Luma};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

pub type Preview = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Render a synthesized slice for display
///
/// Values are clipped to `window`, optionally upscaled by `scale`, then
/// stretched over the full 16-bit range. A flat slice renders black.
///
/// # Arguments
///
/// * `slice` - Synthesized 2D slice (rows x columns)
/// * `window` - Display window to clip against
/// * `interpolation` - Resampling used when `scale` differs from 1
/// * `scale` - Upscaling factor of the output
pub fn render_preview(
    slice: ArrayView2<'_, f32>,
    window: &WindowLevel,
    interpolation: Interpolation,
    scale: f32,
) -> Option<Preview> {
    let clipped = window.clip(&slice);
    let (rows, cols) = Interpolator::scaled_dimensions(clipped.dim(), scale);
    let resized = Interpolator::resize(&clipped.view(), rows, cols, interpolation);
    slice_to_image(&resized)
}

fn slice_to_image(slice: &Array2<f32>) -> Option<Preview> {
    let (height, width) = slice.dim();
    let (min, max) = slice
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;

    let pixel_data: Vec<u16> = slice
        .as_standard_layout()
        .as_slice()?
        .par_iter()
        .map(|&v| {
            if range > 0.0 && range.is_finite() {
                (65535.0 * (v - min) / range).clamp(0.0, 65535.0) as u16
            } else {
                0
            }
        })
        .collect();
    ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn window_is_stretched_to_full_range() {
        let slice = array![[0.0_f32, 100.0], [200.0, 400.0]];
        let window = WindowLevel::new(200.0, 200.0);
        let image = render_preview(slice.view(), &window, Interpolation::None, 1.0).unwrap();

        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.get_pixel(0, 0).0[0], 0);
        assert_eq!(image.get_pixel(1, 0).0[0], 0);
        assert_eq!(image.get_pixel(0, 1).0[0], 32767);
        assert_eq!(image.get_pixel(1, 1).0[0], 65535);
    }

    #[test]
    fn upscaling_changes_dimensions() {
        let slice = array![[0.0_f32, 1.0, 2.0], [3.0, 4.0, 5.0]];
        let window = WindowLevel::new(100.0, 50.0);
        let image = render_preview(slice.view(), &window, Interpolation::Bilinear, 2.0).unwrap();
        assert_eq!(image.dimensions(), (6, 4));
    }

    #[test]
    fn flat_slice_is_black() {
        let slice = Array2::from_elem((3, 3), 7.0_f32);
        let window = WindowLevel::new(100.0, 50.0);
        let image = render_preview(slice.view(), &window, Interpolation::None, 1.0).unwrap();
        assert!(image.pixels().all(|p| p.0[0] == 0));
    }
}
