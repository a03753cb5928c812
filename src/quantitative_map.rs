use crate::enums::{Colormap, MapFormat, Orientation};
use crate::map_loader::{LoadedVolume, SourceHeaders, reorient_plane};

use ndarray::{Array2, Array3, Axis};
use std::path::{Path, PathBuf};

/// Current and total slice counts for the three orientations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceCursor {
    current: [usize; 3],
    total: [usize; 3],
}

impl SliceCursor {
    /// Cursor for an (x, y, z) volume, resting on the middle slice of each axis
    pub fn for_dim(dim: (usize, usize, usize)) -> Self {
        let mut cursor = Self::default();
        for orientation in Orientation::ALL {
            let total = match orientation.axis() {
                0 => dim.0,
                1 => dim.1,
                _ => dim.2,
            };
            cursor.total[orientation.index()] = total;
            cursor.current[orientation.index()] = total / 2;
        }
        cursor
    }

    pub fn current(&self, orientation: Orientation) -> usize {
        self.current[orientation.index()]
    }

    pub fn total(&self, orientation: Orientation) -> usize {
        self.total[orientation.index()]
    }

    /// Whether both cursors count the same number of slices in every orientation
    pub fn same_extent(&self, other: &SliceCursor) -> bool {
        self.total == other.total
    }

    /// Move to `index`, wrapping around the slice count; returns the stored index
    pub fn set(&mut self, orientation: Orientation, index: isize) -> usize {
        let total = self.total(orientation);
        let wrapped = if total == 0 {
            0
        } else {
            index.rem_euclid(total as isize) as usize
        };
        self.current[orientation.index()] = wrapped;
        wrapped
    }

    pub fn next(&mut self, orientation: Orientation) -> usize {
        self.set(orientation, self.current(orientation) as isize + 1)
    }

    pub fn previous(&mut self, orientation: Orientation) -> usize {
        self.set(orientation, self.current(orientation) as isize - 1)
    }
}

/// Extract a 2D cross-section of an (x, y, z) volume in display orientation.
///
/// Coronal slices count from the far end of the y axis. Returns `None`
/// when `index` is out of range.
pub fn extract_plane(data: &Array3<f32>, orientation: Orientation, index: usize) -> Option<Array2<f32>> {
    let axis = Axis(orientation.axis());
    let total = data.len_of(axis);
    if index >= total {
        return None;
    }
    let index = match orientation {
        Orientation::Coronal => (total - index) % total,
        _ => index,
    };
    Some(reorient_plane(data.index_axis(axis, index)))
}

/// One named quantitative map (T1, T2, PD, ...) and its viewing state
#[derive(Debug, Clone)]
pub struct QuantitativeMap {
    name: String,
    data: Option<Array3<f32>>,
    spacing: (f32, f32, f32),
    format: Option<MapFormat>,
    path: Option<PathBuf>,
    headers: Option<SourceHeaders>,
    cursor: SliceCursor,
    min: f32,
    max: f32,
    pub colormap: Colormap,
    pub inverted: bool,
}

impl QuantitativeMap {
    /// An empty, unloaded map
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: None,
            spacing: (1.0, 1.0, 1.0),
            format: None,
            path: None,
            headers: None,
            cursor: SliceCursor::default(),
            min: 0.0,
            max: 0.0,
            colormap: Colormap::default(),
            inverted: false,
        }
    }

    /// Replace the map contents with a freshly loaded volume
    pub fn assign(&mut self, volume: LoadedVolume) {
        let (min, max) = volume
            .data
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc: Option<(f32, f32)>, &v| match acc {
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
                None => Some((v, v)),
            })
            .unwrap_or((0.0, 0.0));

        self.cursor = SliceCursor::for_dim(volume.data.dim());
        self.min = min;
        self.max = max;
        self.spacing = volume.spacing;
        self.format = Some(volume.format);
        self.path = volume.path;
        self.headers = volume.headers;
        self.data = Some(volume.data);
        log::debug!(
            "Map {} holds {:?} voxels in [{min}, {max}]",
            self.name,
            self.dim()
        );
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    pub fn volume(&self) -> Option<&Array3<f32>> {
        self.data.as_ref()
    }

    /// Get the dimensions of the volume (x, y, z)
    pub fn dim(&self) -> Option<(usize, usize, usize)> {
        self.data.as_ref().map(Array3::dim)
    }

    pub fn spacing(&self) -> (f32, f32, f32) {
        self.spacing
    }

    pub fn format(&self) -> Option<MapFormat> {
        self.format
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn headers(&self) -> Option<&SourceHeaders> {
        self.headers.as_ref()
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn cursor(&self) -> &SliceCursor {
        &self.cursor
    }

    pub fn slice_num(&self, orientation: Orientation) -> usize {
        self.cursor.current(orientation)
    }

    pub fn slice_total(&self, orientation: Orientation) -> usize {
        self.cursor.total(orientation)
    }

    pub fn set_slice_num(&mut self, orientation: Orientation, index: isize) -> usize {
        self.cursor.set(orientation, index)
    }

    pub fn next_slice(&mut self, orientation: Orientation) -> usize {
        self.cursor.next(orientation)
    }

    pub fn previous_slice(&mut self, orientation: Orientation) -> usize {
        self.cursor.previous(orientation)
    }

    /// Current cross-section for `orientation`, or `None` when unloaded
    pub fn slice(&self, orientation: Orientation) -> Option<Array2<f32>> {
        let data = self.data.as_ref()?;
        extract_plane(data, orientation, self.cursor.current(orientation))
    }

    /// Current cross-section as displayed; inverted maps show `10000 / x`
    pub fn display_slice(&self, orientation: Orientation) -> Option<Array2<f32>> {
        let mut slice = self.slice(orientation)?;
        if self.inverted {
            slice.mapv_inplace(|v| {
                let inverted = 10000.0 / v;
                if inverted.is_finite() { inverted } else { 0.0 }
            });
        }
        Some(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ramp(dim: (usize, usize, usize)) -> Array3<f32> {
        Array3::from_shape_fn(dim, |(x, y, z)| (x * 100 + y * 10 + z) as f32)
    }

    fn loaded(dim: (usize, usize, usize)) -> QuantitativeMap {
        let mut map = QuantitativeMap::new("T1");
        map.assign(LoadedVolume::from_array(ramp(dim), (1.0, 1.0, 1.0), MapFormat::Nifti));
        map
    }

    #[test]
    fn unloaded_map_has_no_slice() {
        let map = QuantitativeMap::new("PD");
        assert!(!map.is_loaded());
        assert!(map.slice(Orientation::Axial).is_none());
    }

    #[test]
    fn cursor_starts_mid_volume() {
        let map = loaded((4, 5, 6));
        assert_eq!(map.slice_num(Orientation::Sagittal), 2);
        assert_eq!(map.slice_num(Orientation::Coronal), 2);
        assert_eq!(map.slice_num(Orientation::Axial), 3);
        assert_eq!(map.slice_total(Orientation::Axial), 6);
        assert_eq!((map.min(), map.max()), (0.0, 345.0));
    }

    #[test]
    fn slice_index_wraps_both_ways() {
        let mut map = loaded((3, 3, 4));
        assert_eq!(map.set_slice_num(Orientation::Axial, 4), 0);
        assert_eq!(map.set_slice_num(Orientation::Axial, -1), 3);
        assert_eq!(map.next_slice(Orientation::Axial), 0);
        assert_eq!(map.previous_slice(Orientation::Axial), 3);
    }

    #[test]
    fn extent_ignores_current_position() {
        let mut cursor = SliceCursor::for_dim((4, 4, 8));
        cursor.set(Orientation::Axial, 1);
        assert!(cursor.same_extent(&SliceCursor::for_dim((4, 4, 8))));
        assert!(!cursor.same_extent(&SliceCursor::for_dim((4, 4, 2))));
    }

    #[test]
    fn axial_slice_is_reoriented() {
        let mut map = loaded((2, 3, 2));
        map.set_slice_num(Orientation::Axial, 1);
        let slice = map.slice(Orientation::Axial).unwrap();
        assert_eq!(slice, array![[121.0_f32, 21.0], [111.0, 11.0], [101.0, 1.0]]);
    }

    #[test]
    fn coronal_counts_from_far_end() {
        let data = ramp((2, 3, 2));
        let zero = extract_plane(&data, Orientation::Coronal, 0).unwrap();
        let one = extract_plane(&data, Orientation::Coronal, 1).unwrap();
        assert_eq!(zero, reorient_plane(data.index_axis(Axis(1), 0)));
        assert_eq!(one, reorient_plane(data.index_axis(Axis(1), 2)));
        assert!(extract_plane(&data, Orientation::Coronal, 3).is_none());
    }

    #[test]
    fn inverted_display_zeroes_division_by_zero() {
        let mut map = loaded((1, 1, 2));
        map.inverted = true;
        map.set_slice_num(Orientation::Axial, 0);
        assert_eq!(map.display_slice(Orientation::Axial).unwrap(), array![[0.0_f32]]);
        map.set_slice_num(Orientation::Axial, 1);
        assert_eq!(map.display_slice(Orientation::Axial).unwrap(), array![[10000.0_f32]]);
    }
}
