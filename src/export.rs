use crate::enums::{HeaderField, MapFormat, Orientation};
use crate::map_loader::{SourceHeaders, reorient_plane};
use crate::map_store::MapStore;
use crate::quantitative_map::QuantitativeMap;
use crate::synthesis::{Dims, SynthesisError, SynthesizedImage};
use crate::uid;
use crate::window::WindowLevel;

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use dicom_dictionary_std::{tags, uids};
use ndarray::{Array3, Axis};
use nifti::{NiftiHeader, writer::WriterOptions};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const PLACEHOLDER_PATIENT_NAME: &str = "ANONYMOUS^ANONYMOUS";
pub const PLACEHOLDER_BIRTH_DATE: &str = "19000101";
pub const PLACEHOLDER_STUDY_DESCRIPTION: &str = "Synthesized Image [synthmri]";
pub const PROTOCOL_NAME: &str = "synthmri";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("Nothing synthesized to export")]
    NotSynthesized,

    #[error("Reference map {0} is not loaded")]
    ReferenceNotLoaded(String),

    #[error("No quantitative maps configured")]
    NoReferenceMap,

    #[error("Cannot create output directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot build header of slice {slice}: {message}")]
    Header { slice: usize, message: String },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: dicom::object::WriteError,
    },

    #[error("Failed to write NIfTI file {path}: {source}")]
    Nifti {
        path: PathBuf,
        #[source]
        source: nifti::NiftiError,
    },
}

impl HeaderField {
    pub fn tag(self) -> Tag {
        match self {
            HeaderField::PatientId => tags::PATIENT_ID,
            HeaderField::PatientName => tags::PATIENT_NAME,
            HeaderField::PatientBirthDate => tags::PATIENT_BIRTH_DATE,
            HeaderField::PatientSex => tags::PATIENT_SEX,
            HeaderField::StudyId => tags::STUDY_ID,
            HeaderField::StudyDescription => tags::STUDY_DESCRIPTION,
            HeaderField::StudyDate => tags::STUDY_DATE,
            HeaderField::AccessionNumber => tags::ACCESSION_NUMBER,
            HeaderField::InstitutionName => tags::INSTITUTION_NAME,
            HeaderField::ReferringPhysicianName => tags::REFERRING_PHYSICIAN_NAME,
        }
    }

    pub fn vr(self) -> VR {
        match self {
            HeaderField::PatientId
            | HeaderField::StudyDescription
            | HeaderField::InstitutionName => VR::LO,
            HeaderField::PatientName | HeaderField::ReferringPhysicianName => VR::PN,
            HeaderField::PatientBirthDate | HeaderField::StudyDate => VR::DA,
            HeaderField::PatientSex => VR::CS,
            HeaderField::StudyId | HeaderField::AccessionNumber => VR::SH,
        }
    }
}

/// A fully built DICOM series, ready to be written
#[derive(Debug, Clone)]
pub struct DicomSeries {
    slices: Vec<FileDicomObject<InMemDicomObject>>,
    series_uid: String,
    study_uid: String,
}

impl DicomSeries {
    /// Build one header per axial slice of the synthesized volume
    ///
    /// Headers start from the reference map's own slices when it was read
    /// from DICOM with the same slice count, otherwise from a generic MR
    /// template. Slice positions are centered on the middle of the volume
    /// using the reference map's in-plane spacing.
    ///
    /// # Errors
    ///
    /// Returns error if no volume has been synthesized, the reference map is
    /// missing, or a header cannot be assembled.
    pub fn build(image: &SynthesizedImage, store: &MapStore) -> Result<Self, ExportError> {
        let image_type = image.image_type().ok_or(SynthesisError::NotSelected)?;
        let volume = image.volume().ok_or(ExportError::NotSynthesized)?;
        let reference = store.reference_map().ok_or(ExportError::NoReferenceMap)?;
        if !reference.is_loaded() {
            return Err(ExportError::ReferenceNotLoaded(reference.name().to_string()));
        }

        let depth = volume.len_of(Axis(2));
        let slice_spacing = f64::from(reference.spacing().1);
        let window = image.window().unwrap_or_else(|| {
            WindowLevel::from_data(
                volume,
                image_type.default_window_width(),
                image_type.default_window_center(),
            )
        });
        let templates = templates(reference, volume)?;

        let identifier = |field: HeaderField| {
            image
                .header(field)
                .map(str::to_string)
                .or_else(|| templates.first().and_then(|t| get_str(t, field.tag())))
                .unwrap_or_default()
        };
        let study_uid = uid::from_entropy([
            identifier(HeaderField::PatientId),
            identifier(HeaderField::StudyId),
        ]);
        let series_uid = uid::generate();
        let series_description = image.series_description();
        let today = chrono::Local::now().format("%Y%m%d").to_string();

        let mut slices = Vec::with_capacity(depth);
        for (s, mut object) in templates.into_iter().enumerate() {
            for (field, value) in image.headers() {
                put_str(&mut object, field.tag(), field.vr(), value.as_str());
            }
            if let Some(series_number) = image.series_number() {
                put_str(&mut object, tags::SERIES_NUMBER, VR::IS, series_number.to_string());
            }

            let plane = reorient_plane(volume.index_axis(Axis(2), s));
            let (rows, columns) = plane.dim();
            let pixels: Vec<i16> = plane.iter().map(|&v| v as i16).collect();
            put_pixel_data(&mut object, rows, columns, &pixels, s)?;

            put_str(&mut object, tags::WINDOW_CENTER, VR::DS, ds(window.center()));
            put_str(&mut object, tags::WINDOW_WIDTH, VR::DS, ds(window.width()));
            put_str(&mut object, tags::SERIES_DESCRIPTION, VR::LO, series_description.as_str());

            let relative = s as f64 - depth as f64 / 2.0;
            let location = slice_spacing / 2.0 + relative * slice_spacing;
            put_strs(
                &mut object,
                tags::IMAGE_POSITION_PATIENT,
                VR::DS,
                ["0".to_string(), "0".to_string(), ds(location)],
            );
            put_str(&mut object, tags::SLICE_LOCATION, VR::DS, ds(location));

            for (parameter, tag) in [
                ("TE", tags::ECHO_TIME),
                ("TI", tags::INVERSION_TIME),
                ("TR", tags::REPETITION_TIME),
            ] {
                if let Some(parameter) = image.parameter(parameter) {
                    put_str(&mut object, tag, VR::DS, ds(parameter.value()));
                }
            }

            for (tag, vr, placeholder) in [
                (tags::PATIENT_NAME, VR::PN, PLACEHOLDER_PATIENT_NAME),
                (tags::PATIENT_BIRTH_DATE, VR::DA, PLACEHOLDER_BIRTH_DATE),
                (tags::STUDY_DESCRIPTION, VR::LO, PLACEHOLDER_STUDY_DESCRIPTION),
                (tags::STUDY_DATE, VR::DA, today.as_str()),
            ] {
                if get_str(&object, tag).is_none() {
                    put_str(&mut object, tag, vr, placeholder);
                }
            }

            put_str(&mut object, tags::INSTANCE_NUMBER, VR::IS, (s + 1).to_string());
            put_str(&mut object, tags::PROTOCOL_NAME, VR::LO, PROTOCOL_NAME);

            let instance_uid = uid::generate();
            put_str(&mut object, tags::SOP_INSTANCE_UID, VR::UI, instance_uid.as_str());
            put_str(&mut object, tags::SERIES_INSTANCE_UID, VR::UI, series_uid.as_str());
            put_str(&mut object, tags::STUDY_INSTANCE_UID, VR::UI, study_uid.as_str());

            let sop_class_uid =
                get_str(&object, tags::SOP_CLASS_UID).unwrap_or_else(|| uids::MR_IMAGE_STORAGE.to_string());
            let file = object
                .with_meta(
                    FileMetaTableBuilder::new()
                        .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                        .media_storage_sop_class_uid(sop_class_uid)
                        .media_storage_sop_instance_uid(instance_uid),
                )
                .map_err(|err| ExportError::Header {
                    slice: s,
                    message: err.to_string(),
                })?;
            slices.push(file);
        }

        Ok(Self {
            slices,
            series_uid,
            study_uid,
        })
    }

    pub fn slices(&self) -> &[FileDicomObject<InMemDicomObject>] {
        &self.slices
    }

    pub fn series_uid(&self) -> &str {
        &self.series_uid
    }

    pub fn study_uid(&self) -> &str {
        &self.study_uid
    }

    /// Write `series_<n>.dcm` files into `directory`, creating it if needed.
    /// If any file fails, the files already written are removed.
    pub fn write(&self, directory: impl AsRef<Path>) -> Result<Vec<PathBuf>, ExportError> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory).map_err(|source| ExportError::CreateDirectory {
            path: directory.to_path_buf(),
            source,
        })?;

        let mut written: Vec<PathBuf> = Vec::with_capacity(self.slices.len());
        for (s, slice) in self.slices.iter().enumerate() {
            let path = directory.join(format!("series_{}.dcm", s + 1));
            if let Err(source) = slice.write_to_file(&path) {
                log::error!("Export to {} failed at slice {}: {source}", directory.display(), s + 1);
                for file in &written {
                    if let Err(err) = fs::remove_file(file) {
                        log::warn!("Could not remove partial export {}: {err}", file.display());
                    }
                }
                return Err(ExportError::Write { path, source });
            }
            written.push(path);
        }

        log::info!("Exported {} DICOM slices to {}", written.len(), directory.display());
        Ok(written)
    }
}

/// Synthesize the full volume and write it as a DICOM series
pub fn export_dicom(
    image: &mut SynthesizedImage,
    store: &MapStore,
    directory: impl AsRef<Path>,
) -> Result<Vec<PathBuf>, ExportError> {
    image.recompute(store, Orientation::Axial, Dims::Volume)?;
    DicomSeries::build(image, store)?.write(directory)
}

/// Synthesize the full volume and write it as a single `f32` NIfTI file
pub fn export_nifti(
    image: &mut SynthesizedImage,
    store: &MapStore,
    path: impl AsRef<Path>,
) -> Result<(), ExportError> {
    let path = path.as_ref();
    image.recompute(store, Orientation::Axial, Dims::Volume)?;
    let volume = image.volume().ok_or(ExportError::NotSynthesized)?;

    let mut header = NiftiHeader {
        pixdim: [1.0; 8],
        sform_code: 2,
        srow_x: [1.0, 0.0, 0.0, 0.0],
        srow_y: [0.0, 1.0, 0.0, 0.0],
        srow_z: [0.0, 0.0, 1.0, 0.0],
        ..NiftiHeader::default()
    };
    if let Some(reference) = store.reference_map() {
        if let (Some(MapFormat::Nifti), Some(SourceHeaders::Nifti(source))) =
            (reference.format(), reference.headers())
        {
            header.pixdim = source.pixdim;
        }
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ExportError::CreateDirectory {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(volume)
        .map_err(|source| ExportError::Nifti {
            path: path.to_path_buf(),
            source,
        })?;
    log::info!("Exported NIfTI volume {:?} to {}", volume.dim(), path.display());
    Ok(())
}

/// Per-slice starting headers for an export of `volume`
fn templates(
    reference: &QuantitativeMap,
    volume: &Array3<f32>,
) -> Result<Vec<InMemDicomObject>, ExportError> {
    let depth = volume.len_of(Axis(2));
    match (reference.format(), reference.headers()) {
        (Some(MapFormat::Dicom), Some(SourceHeaders::Dicom(objects))) if objects.len() == depth => {
            Ok(objects
                .iter()
                .map(|object| {
                    let mut object = object.clone().into_inner();
                    object.remove_element(tags::RESCALE_SLOPE);
                    object.remove_element(tags::RESCALE_INTERCEPT);
                    object
                })
                .collect())
        }
        _ => {
            log::debug!("Using generic MR template for {depth} slices");
            let spacing = reference.spacing();
            Ok((0..depth).map(|s| generic_template(spacing, s)).collect())
        }
    }
}

fn generic_template(spacing: (f32, f32, f32), s: usize) -> InMemDicomObject {
    let mut object = InMemDicomObject::new_empty();
    put_str(&mut object, tags::SOP_CLASS_UID, VR::UI, uids::MR_IMAGE_STORAGE);
    put_str(&mut object, tags::MODALITY, VR::CS, "MR");
    put_str(&mut object, tags::PATIENT_ID, VR::LO, "");
    put_str(&mut object, tags::STUDY_ID, VR::SH, "");
    put_str(&mut object, tags::SERIES_NUMBER, VR::IS, "1");
    put_strs(
        &mut object,
        tags::PIXEL_SPACING,
        VR::DS,
        [ds(f64::from(spacing.0)), ds(f64::from(spacing.1))],
    );
    put_str(&mut object, tags::SLICE_THICKNESS, VR::DS, ds(f64::from(spacing.2)));
    put_strs(
        &mut object,
        tags::IMAGE_ORIENTATION_PATIENT,
        VR::DS,
        ["1", "0", "0", "0", "1", "0"].map(String::from),
    );
    object.put(DataElement::new(
        tags::IN_STACK_POSITION_NUMBER,
        VR::UL,
        PrimitiveValue::from((s + 1) as u32),
    ));
    object
}

fn put_pixel_data(
    object: &mut InMemDicomObject,
    rows: usize,
    columns: usize,
    pixels: &[i16],
    slice: usize,
) -> Result<(), ExportError> {
    let too_large = |what: &str| ExportError::Header {
        slice,
        message: format!("{what} does not fit a 16-bit attribute"),
    };
    let rows = u16::try_from(rows).map_err(|_| too_large("Rows"))?;
    let columns = u16::try_from(columns).map_err(|_| too_large("Columns"))?;

    let bytes: Vec<u8> = if cfg!(target_endian = "little") {
        bytemuck::cast_slice(pixels).to_vec()
    } else {
        pixels.iter().flat_map(|v| v.to_le_bytes()).collect()
    };

    object.put(DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(rows)));
    object.put(DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(columns)));
    object.put(DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)));
    put_str(object, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2");
    object.put(DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)));
    object.put(DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16)));
    object.put(DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16)));
    object.put(DataElement::new(
        tags::PIXEL_REPRESENTATION,
        VR::US,
        PrimitiveValue::from(1_u16),
    ));
    object.put(DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(bytes)));
    Ok(())
}

fn put_str(object: &mut InMemDicomObject, tag: Tag, vr: VR, value: impl Into<String>) {
    object.put(DataElement::new(tag, vr, PrimitiveValue::from(value.into())));
}

/// One element holding several values, e.g. the components of PixelSpacing
fn put_strs<I>(object: &mut InMemDicomObject, tag: Tag, vr: VR, values: I)
where
    I: IntoIterator<Item = String>,
{
    object.put(DataElement::new(
        tag,
        vr,
        PrimitiveValue::Strs(values.into_iter().collect()),
    ));
}

/// Trimmed, non-empty string value of `tag`
fn get_str(object: &InMemDicomObject, tag: Tag) -> Option<String> {
    let value = object.element(tag).ok()?.to_str().ok()?;
    let value = value.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    (!value.is_empty()).then(|| value.to_string())
}

/// Decimal string short enough for a DS value
fn ds(value: f64) -> String {
    let text = format!("{value:.6}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    match text {
        "" | "-0" => "0".to_string(),
        text => text.to_string(),
    }
}
