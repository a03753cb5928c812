use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Orientation {
    #[default]
    Axial,
    Coronal,
    Sagittal,
}

impl Orientation {
    pub const ALL: [Orientation; 3] = [
        Orientation::Axial,
        Orientation::Coronal,
        Orientation::Sagittal,
    ];

    /// Axis of an (x, y, z) volume that is walked by the slice index
    pub fn axis(self) -> usize {
        match self {
            Orientation::Axial => 2,
            Orientation::Coronal => 1,
            Orientation::Sagittal => 0,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Orientation::Axial => 0,
            Orientation::Coronal => 1,
            Orientation::Sagittal => 2,
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Axial => write!(f, "Axial"),
            Orientation::Coronal => write!(f, "Coronal"),
            Orientation::Sagittal => write!(f, "Sagittal"),
        }
    }
}

/// Container format a quantitative map was read from, or an export targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapFormat {
    Dicom,
    Nifti,
}

impl fmt::Display for MapFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapFormat::Dicom => write!(f, "DICOM"),
            MapFormat::Nifti => write!(f, "NIfTI"),
        }
    }
}

impl FromStr for MapFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dicom" | "dcm" => Ok(MapFormat::Dicom),
            "nifti" | "niftii" | "nii" => Ok(MapFormat::Nifti),
            other => Err(format!("unknown map format `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    None,
    #[serde(alias = "nn")]
    Nearest,
    #[serde(alias = "linear", alias = "bicubic")]
    Bilinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Colormap {
    #[default]
    Hot,
    Bone,
    Jet,
    Winter,
    Hsv,
}

impl Colormap {
    pub const ALL: [Colormap; 5] = [
        Colormap::Hot,
        Colormap::Bone,
        Colormap::Jet,
        Colormap::Winter,
        Colormap::Hsv,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Colormap::Hot => "HOT",
            Colormap::Bone => "BONE",
            Colormap::Jet => "JET",
            Colormap::Winter => "WINTER",
            Colormap::Hsv => "HSV",
        }
    }
}

/// Mouse-drag direction a scanner parameter can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragAxis {
    Horizontal,
    Vertical,
}

/// Patient and study attributes a synthesized series may override on export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HeaderField {
    PatientId,
    PatientName,
    PatientBirthDate,
    PatientSex,
    StudyId,
    StudyDescription,
    StudyDate,
    AccessionNumber,
    InstitutionName,
    ReferringPhysicianName,
}

impl HeaderField {
    pub const ALL: [HeaderField; 10] = [
        HeaderField::PatientId,
        HeaderField::PatientName,
        HeaderField::PatientBirthDate,
        HeaderField::PatientSex,
        HeaderField::StudyId,
        HeaderField::StudyDescription,
        HeaderField::StudyDate,
        HeaderField::AccessionNumber,
        HeaderField::InstitutionName,
        HeaderField::ReferringPhysicianName,
    ];

    /// DICOM keyword of the attribute
    pub fn keyword(self) -> &'static str {
        match self {
            HeaderField::PatientId => "PatientID",
            HeaderField::PatientName => "PatientName",
            HeaderField::PatientBirthDate => "PatientBirthDate",
            HeaderField::PatientSex => "PatientSex",
            HeaderField::StudyId => "StudyID",
            HeaderField::StudyDescription => "StudyDescription",
            HeaderField::StudyDate => "StudyDate",
            HeaderField::AccessionNumber => "AccessionNumber",
            HeaderField::InstitutionName => "InstitutionName",
            HeaderField::ReferringPhysicianName => "ReferringPhysicianName",
        }
    }
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for HeaderField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HeaderField::ALL
            .into_iter()
            .find(|field| field.keyword().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown header field `{s}`"))
    }
}
