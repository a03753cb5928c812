//! # synthmri
//!
//! This crate synthesizes contrast-weighted MRI images from quantitative
//! relaxometry maps (T1, T2, proton density).
//!
//! A synthetic image is described by a signal equation such as
//! `PD*exp(-TE/T2)` over named quantitative maps and virtual scanner
//! parameters (TE, TR, TI, ...). Equations come from a JSON configuration,
//! are compiled once into a small expression tree and evaluated element-wise
//! over the maps with rayon. Results are masked, rescaled to a 16-bit range,
//! windowed for display and exported either as a DICOM series or as a NIfTI
//! volume.
//!
//! Quantitative maps are read with the dicom-rs ecosystem (one file per
//! slice, ordered by SliceLocation) or from a NIfTI file. Volumes can be
//! sliced in the three medical axes:
//!  - Axial
//!  - Coronal
//!  - Sagittal
//!
//!  Equations only support `+ - * /`, parentheses, the constant `Pi` and the
//!  functions `exp`, `abs`, `sqrt`, `cos`, `sin` and `tan`. Nothing in a
//!  configuration file is ever executed as code.
//!
//! # Roadmap
//!
//!  - Masks from the intersection of all dependency maps
//!  - NIfTI orientation handling from the sform/qform affine
//!  - Compressed DICOM export
//!
//! # Examples
//!
//! ## Synthesizing a FLAIR image
//!
//! Load the configuration and the three maps, select a synthetic image,
//! change a scanner parameter and export the result as DICOM.
//!
//! ```no_run
//! # use synthmri::{MapFormat, Session};
//! let mut session = Session::open("config.json").expect("should have read configuration");
//! for (name, path) in [("T1", "maps/T1.nii"), ("T2", "maps/T2.nii"), ("PD", "maps/PD.nii")] {
//!     session
//!         .load_map(name, path, MapFormat::Nifti)
//!         .expect("should have loaded map");
//! }
//! session.select_type("FLAIR - 3T").expect("should have synthesized image");
//! session.set_parameter("TE", 90.0).expect("should have recomputed image");
//! session
//!     .preview()
//!     .expect("should have rendered slice")
//!     .save("flair.png")
//!     .expect("should have saved preview");
//! session.export_dicom("flair").expect("should have written series");
//! ```

pub mod config;
pub mod enums;
pub mod equation;
pub mod export;
pub mod image_type;
mod interpolator;
pub mod map_loader;
pub mod map_store;
pub mod parameter;
pub mod preview;
pub mod quantitative_map;
pub mod session;
pub mod synthesis;
pub mod uid;
pub mod window;

pub use config::{Catalog, Config};
pub use enums::{Colormap, DragAxis, HeaderField, Interpolation, MapFormat, Orientation};
pub use equation::{CompiledEquation, EquationError};
pub use map_store::MapStore;
pub use session::{Session, SessionError};
pub use synthesis::{Dims, SynthesisError, SynthesizedImage};
