use crate::enums::MapFormat;

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, ArrayView2, Axis, Ix3, s};
use nifti::{NiftiHeader, NiftiObject, ReaderOptions, volume::ndarray::IntoNdArray};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("No valid DICOM images found in {0}")]
    NoValidImages(PathBuf),

    #[error("Inconsistent image dimensions in {0}")]
    InconsistentDimensions(PathBuf),

    #[error("Missing spacing information in {0}")]
    MissingSpacing(PathBuf),

    #[error("Missing slice location in {0}")]
    MissingSliceLocation(PathBuf),

    #[error("Cannot decode pixel data of {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("Expected a 3D volume in {path}, got shape {shape:?}")]
    NotAVolume { path: PathBuf, shape: Vec<usize> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error in {path}: {source}")]
    Dicom {
        path: PathBuf,
        #[source]
        source: dicom::object::ReadError,
    },

    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),
}

/// Original headers of a loaded map, reused as export templates
#[derive(Debug, Clone)]
pub enum SourceHeaders {
    /// One object per slice, in volume order
    Dicom(Vec<FileDicomObject<InMemDicomObject>>),
    Nifti(Box<NiftiHeader>),
}

/// A volume read from disk (or built in memory), indexed (x, y, z)
#[derive(Debug, Clone)]
pub struct LoadedVolume {
    pub data: Array3<f32>,
    /// In-plane pixel spacing (x, y) and slice spacing
    pub spacing: (f32, f32, f32),
    pub format: MapFormat,
    pub headers: Option<SourceHeaders>,
    pub path: Option<PathBuf>,
}

impl LoadedVolume {
    pub fn from_array(data: Array3<f32>, spacing: (f32, f32, f32), format: MapFormat) -> Self {
        Self {
            data,
            spacing,
            format,
            headers: None,
            path: None,
        }
    }
}

/// Map a raw image plane onto the volume's reading convention: both axes
/// reversed, then transposed. Applying it twice gives back the input.
pub fn reorient_plane(plane: ArrayView2<'_, f32>) -> Array2<f32> {
    plane.slice(s![..;-1, ..;-1]).reversed_axes().to_owned()
}

pub struct MapLoader;

impl MapLoader {
    /// Load a quantitative map from `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Directory of DICOM slices, or a NIfTI file
    /// * `format` - Declared container format of `path`
    ///
    /// # Errors
    ///
    /// Returns error if the files cannot be read or do not form a 3D volume
    pub fn load(path: impl AsRef<Path>, format: MapFormat) -> Result<LoadedVolume, LoadError> {
        match format {
            MapFormat::Dicom => Self::load_from_directory(path),
            MapFormat::Nifti => Self::load_nifti(path),
        }
    }

    /// Load a volume from every file below a directory. Any unreadable file
    /// fails the whole load.
    pub fn load_from_directory(path: impl AsRef<Path>) -> Result<LoadedVolume, LoadError> {
        let path = path.as_ref();
        let mut paths = Vec::new();
        Self::collect_files(path, &mut paths)?;
        if paths.is_empty() {
            return Err(LoadError::NoValidImages(path.to_path_buf()));
        }
        paths.sort();

        let objects = paths
            .iter()
            .map(|file| {
                open_file(file).map_err(|source| LoadError::Dicom {
                    path: file.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::info!("Loading {} DICOM files from {}", objects.len(), path.display());
        let mut volume = Self::load_from_dicom_objects(objects, path)?;
        volume.path = Some(path.to_path_buf());
        Ok(volume)
    }

    /// Load a volume from DICOM objects, ordered by SliceLocation
    pub fn load_from_dicom_objects(
        dicom_objects: Vec<FileDicomObject<InMemDicomObject>>,
        origin: &Path,
    ) -> Result<LoadedVolume, LoadError> {
        if dicom_objects.is_empty() {
            return Err(LoadError::NoValidImages(origin.to_path_buf()));
        }

        let mut slices = dicom_objects
            .into_iter()
            .map(|object| {
                Self::slice_location(&object)
                    .map(|location| (location, object))
                    .ok_or_else(|| LoadError::MissingSliceLocation(origin.to_path_buf()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        slices.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let objects: Vec<_> = slices.into_iter().map(|(_, object)| object).collect();
        let images = objects
            .iter()
            .map(|object| Self::decode_image(object, origin))
            .collect::<Result<Vec<_>, _>>()?;

        Self::validate_dimensions(&images, origin)?;
        let data = Self::build_volume_array(&images);
        let spacing = Self::get_spacing(&objects)
            .ok_or_else(|| LoadError::MissingSpacing(origin.to_path_buf()))?;

        Ok(LoadedVolume {
            data,
            spacing,
            format: MapFormat::Dicom,
            headers: Some(SourceHeaders::Dicom(objects)),
            path: None,
        })
    }

    /// Load a 3D NIfTI file (a trailing singleton 4th dimension is dropped)
    pub fn load_nifti(path: impl AsRef<Path>) -> Result<LoadedVolume, LoadError> {
        let path = path.as_ref();
        log::info!("Loading NIfTI file {}", path.display());

        let object = ReaderOptions::new().read_file(path)?;
        let header = object.header().clone();
        let mut array = object.into_volume().into_ndarray::<f32>()?;
        while array.ndim() > 3 && array.shape()[array.ndim() - 1] == 1 {
            let last = array.ndim() - 1;
            array = array.index_axis_move(Axis(last), 0);
        }

        let shape = array.shape().to_vec();
        let data = array
            .into_dimensionality::<Ix3>()
            .map_err(|_| LoadError::NotAVolume {
                path: path.to_path_buf(),
                shape,
            })?;
        let spacing = (header.pixdim[1], header.pixdim[2], header.pixdim[3]);

        Ok(LoadedVolume {
            data,
            spacing,
            format: MapFormat::Nifti,
            headers: Some(SourceHeaders::Nifti(Box::new(header))),
            path: Some(path.to_path_buf()),
        })
    }

    fn collect_files(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<(), LoadError> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                Self::collect_files(&path, paths)?;
            } else {
                paths.push(path);
            }
        }
        Ok(())
    }

    fn slice_location(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<f32> {
        dicom_object
            .element(tags::SLICE_LOCATION)
            .ok()?
            .to_float32()
            .ok()
    }

    fn decode_image(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        origin: &Path,
    ) -> Result<Array2<f32>, LoadError> {
        let decode_error = |message: String| LoadError::Decode {
            path: origin.to_path_buf(),
            message,
        };
        let pixel_data = dicom_object
            .decode_pixel_data()
            .map_err(|err| decode_error(err.to_string()))?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::Identity);
        let frames = pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .map_err(|err| decode_error(err.to_string()))?;
        Ok(reorient_plane(frames.slice(s![0, .., .., 0])))
    }

    fn validate_dimensions(images: &[Array2<f32>], origin: &Path) -> Result<(), LoadError> {
        let first_dim = images[0].dim();
        if images.iter().any(|img| img.dim() != first_dim) {
            return Err(LoadError::InconsistentDimensions(origin.to_path_buf()));
        }
        Ok(())
    }

    fn build_volume_array(images: &[Array2<f32>]) -> Array3<f32> {
        let (width, height) = images[0].dim();
        let depth = images.len();
        let mut volume = Array3::<f32>::zeros((width, height, depth));

        for (i, image) in images.iter().enumerate() {
            volume.slice_mut(s![.., .., i]).assign(image);
        }

        volume
    }

    fn get_spacing(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
    ) -> Option<(f32, f32, f32)> {
        dicom_objects.iter().find_map(|dicom_object| {
            let pixel_spacing = dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float32()
                .ok()?;

            let slice_thickness = dicom_object
                .element(tags::SLICE_THICKNESS)
                .ok()
                .and_then(|element| element.to_float32().ok())
                .unwrap_or(1.0);

            Some((
                *pixel_spacing.first()?,
                *pixel_spacing.get(1).or(pixel_spacing.first())?,
                slice_thickness,
            ))
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR};
    use dicom::dictionary_std::uids;
    use dicom::object::FileMetaTableBuilder;
    use ndarray::array;

    /// A minimal 16-bit MR slice of `rows` x `columns` pixels
    pub(crate) fn mr_slice(
        rows: u16,
        columns: u16,
        location: f32,
        pixel: impl Fn(usize, usize) -> u16,
    ) -> FileDicomObject<InMemDicomObject> {
        let mut pixels = Vec::with_capacity(rows as usize * columns as usize * 2);
        for r in 0..rows as usize {
            for c in 0..columns as usize {
                pixels.extend_from_slice(&pixel(r, c).to_le_bytes());
            }
        }

        let sop_instance_uid = format!("2.25.{}", location.to_bits());
        let mut object = InMemDicomObject::new_empty();
        object.put(DataElement::new(
            tags::SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(uids::MR_IMAGE_STORAGE),
        ));
        object.put(DataElement::new(
            tags::SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(sop_instance_uid.as_str()),
        ));
        object.put(DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(rows)));
        object.put(DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(columns)));
        object.put(DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)));
        object.put(DataElement::new(
            tags::PHOTOMETRIC_INTERPRETATION,
            VR::CS,
            PrimitiveValue::from("MONOCHROME2"),
        ));
        object.put(DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)));
        object.put(DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16)));
        object.put(DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16)));
        object.put(DataElement::new(
            tags::PIXEL_REPRESENTATION,
            VR::US,
            PrimitiveValue::from(0_u16),
        ));
        object.put(DataElement::new(
            tags::PIXEL_SPACING,
            VR::DS,
            PrimitiveValue::Strs(["0.5", "0.75"].map(String::from).into_iter().collect()),
        ));
        object.put(DataElement::new(
            tags::SLICE_LOCATION,
            VR::DS,
            PrimitiveValue::from(location.to_string()),
        ));
        object.put(DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(pixels)));

        object
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(uids::MR_IMAGE_STORAGE)
                    .media_storage_sop_instance_uid(sop_instance_uid),
            )
            .expect("meta table should build")
    }

    #[test]
    fn reorient_is_an_involution() {
        let plane = array![[1.0_f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let once = reorient_plane(plane.view());
        assert_eq!(once, array![[6.0_f32, 3.0], [5.0, 2.0], [4.0, 1.0]]);
        assert_eq!(reorient_plane(once.view()), plane);
    }

    #[test]
    fn orders_slices_by_location() {
        let objects = vec![
            mr_slice(2, 3, 10.0, |_, _| 30),
            mr_slice(2, 3, -5.0, |_, _| 10),
            mr_slice(2, 3, 2.5, |_, _| 20),
        ];
        let volume = MapLoader::load_from_dicom_objects(objects, Path::new("mem")).unwrap();

        assert_eq!(volume.data.dim(), (3, 2, 3));
        let firsts: Vec<f32> = (0..3).map(|z| volume.data[[0, 0, z]]).collect();
        assert_eq!(firsts, vec![10.0, 20.0, 30.0]);
        assert_eq!(volume.spacing, (0.5, 0.75, 1.0));
        assert_eq!(volume.format, MapFormat::Dicom);
        assert!(matches!(volume.headers, Some(SourceHeaders::Dicom(ref h)) if h.len() == 3));
    }

    #[test]
    fn slice_pixels_follow_reading_convention() {
        let objects = vec![mr_slice(2, 3, 0.0, |r, c| (r * 10 + c) as u16)];
        let volume = MapLoader::load_from_dicom_objects(objects, Path::new("mem")).unwrap();
        let plane = volume.data.index_axis(Axis(2), 0);
        assert_eq!(
            plane,
            array![[12.0_f32, 2.0], [11.0, 1.0], [10.0, 0.0]]
        );
    }

    #[test]
    fn rejects_mixed_dimensions() {
        let objects = vec![
            mr_slice(2, 3, 0.0, |_, _| 1),
            mr_slice(3, 3, 1.0, |_, _| 1),
        ];
        assert!(matches!(
            MapLoader::load_from_dicom_objects(objects, Path::new("mem")),
            Err(LoadError::InconsistentDimensions(_))
        ));
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MapLoader::load(dir.path(), MapFormat::Dicom),
            Err(LoadError::NoValidImages(_))
        ));
    }

    #[test]
    fn unreadable_file_fails_the_load() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"not a dicom file").unwrap();
        assert!(matches!(
            MapLoader::load(dir.path(), MapFormat::Dicom),
            Err(LoadError::Dicom { .. })
        ));
    }

    #[test]
    fn reads_series_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        for (i, location) in [4.0_f32, 0.0, 2.0].into_iter().enumerate() {
            mr_slice(4, 4, location, |r, _| (r as f32 + location) as u16)
                .write_to_file(dir.path().join(format!("slice_{i}.dcm")))
                .unwrap();
        }
        let volume = MapLoader::load(dir.path(), MapFormat::Dicom).unwrap();
        assert_eq!(volume.data.dim(), (4, 4, 3));
        assert_eq!(volume.path.as_deref(), Some(dir.path()));
    }
}
