use crate::config::{Catalog, Config, ConfigError};
use crate::enums::{DragAxis, HeaderField, MapFormat, Orientation};
use crate::export::{self, DicomSeries, ExportError};
use crate::map_loader::LoadedVolume;
use crate::map_store::{MapStore, MapStoreError};
use crate::preview::{Preview, render_preview};
use crate::synthesis::{Dims, SynthesisError, SynthesizedImage};
use crate::window::WindowLevel;

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Map(#[from] MapStoreError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("Unknown synthetic image type {0}")]
    UnknownImageType(String),

    #[error("Session has no configuration file")]
    NoConfigPath,

    #[error("Cannot render preview of {0}")]
    Preview(String),
}

/// Caller-owned controller tying the catalog, the map store and the working
/// synthetic image together.
///
/// Every operation that changes an input of the synthesized slice (a map,
/// a parameter, the orientation or the slice index) recomputes it before
/// returning.
#[derive(Debug)]
pub struct Session {
    catalog: Catalog,
    config_path: Option<PathBuf>,
    store: MapStore,
    orientation: Orientation,
    image: SynthesizedImage,
}

impl Session {
    pub fn new(catalog: Catalog) -> Self {
        let store = MapStore::new(catalog.map_names().iter().cloned());
        Self {
            catalog,
            config_path: None,
            store,
            orientation: Orientation::default(),
            image: SynthesizedImage::new(),
        }
    }

    /// Start a session from a configuration file
    pub fn open(config_path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let config_path = config_path.as_ref();
        let mut session = Self::new(Catalog::load(config_path)?);
        session.config_path = Some(config_path.to_path_buf());
        Ok(session)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    pub fn store(&self) -> &MapStore {
        &self.store
    }

    pub fn image(&self) -> &SynthesizedImage {
        &self.image
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Recompile the configuration. The selected type is re-selected by name
    /// when it still exists, and dropped otherwise.
    pub fn reload_config(&mut self) -> Result<(), SessionError> {
        let path = self.config_path.clone().ok_or(SessionError::NoConfigPath)?;
        self.catalog.reload(&path)?;
        self.store.reconfigure(self.catalog.map_names());

        let selected = self.image.image_type().map(|t| t.name().to_string());
        match selected {
            Some(name) if self.catalog.get(&name).is_some() => self.select_type(&name),
            Some(name) => {
                log::warn!("Synthetic image {name} is no longer configured");
                self.image = SynthesizedImage::new();
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Read a quantitative map from disk and refresh the synthesized slice
    /// when all of its inputs are now present.
    ///
    /// Returns the maps the selected type is still missing.
    pub fn load_map(
        &mut self,
        name: &str,
        path: impl AsRef<Path>,
        format: MapFormat,
    ) -> Result<Vec<String>, SessionError> {
        self.store.load(name, path, format)?;
        self.after_map_change()
    }

    /// Install an already decoded volume as map `name`
    pub fn insert_map(
        &mut self,
        name: &str,
        volume: LoadedVolume,
    ) -> Result<Vec<String>, SessionError> {
        self.store.insert(name, volume)?;
        self.after_map_change()
    }

    // A reference map with a new geometry restarts the image at its middle slices.
    fn after_map_change(&mut self) -> Result<Vec<String>, SessionError> {
        if let Some(reference) = self.store.reference_map().filter(|map| map.is_loaded()) {
            if !self.image.cursor().same_extent(reference.cursor()) {
                *self.image.cursor_mut() = *reference.cursor();
            }
        }
        let missing = self.image.missing_maps(&self.store);
        if missing.is_empty() && self.image.image_type().is_some() {
            self.refresh()?;
        }
        Ok(missing)
    }

    pub fn missing_maps(&self) -> Vec<String> {
        self.image.missing_maps(&self.store)
    }

    /// Make `name` the working synthetic image and synthesize its slice.
    ///
    /// The selection sticks even when dependency maps are missing; the
    /// returned [`SynthesisError::NotLoaded`] names them.
    pub fn select_type(&mut self, name: &str) -> Result<(), SessionError> {
        let image_type = self
            .catalog
            .get(name)
            .cloned()
            .ok_or_else(|| SessionError::UnknownImageType(name.to_string()))?;
        let reference = self
            .store
            .reference_map()
            .filter(|map| map.is_loaded())
            .map(|map| map.cursor());
        self.image.select(image_type, reference);
        self.refresh()?;
        self.image.reset_window()?;
        Ok(())
    }

    pub fn set_parameter(&mut self, name: &str, value: f64) -> Result<f64, SessionError> {
        let value = self.image.set_parameter_value(name, value)?;
        self.refresh()?;
        Ok(value)
    }

    pub fn set_default_parameters(&mut self) -> Result<(), SessionError> {
        self.image.set_default_parameters();
        self.refresh()
    }

    pub fn bind_drag(&mut self, parameter: &str, axis: DragAxis) -> Result<(), SessionError> {
        Ok(self.image.bind_drag(parameter, axis)?)
    }

    /// Move the parameter bound to `axis` by `delta`; `None` when unbound
    pub fn drag_parameter(&mut self, axis: DragAxis, delta: f64) -> Result<Option<f64>, SessionError> {
        let Some(current) = self.image.drag_parameter_value(axis) else {
            return Ok(None);
        };
        let value = self.image.set_drag_parameter_value(axis, current + delta);
        self.refresh()?;
        Ok(value)
    }

    pub fn set_orientation(&mut self, orientation: Orientation) -> Result<(), SessionError> {
        self.orientation = orientation;
        self.refresh()
    }

    /// Move to slice `index` of the current orientation, wrapping around
    pub fn set_slice(&mut self, index: isize) -> Result<usize, SessionError> {
        let slice = self.image.cursor_mut().set(self.orientation, index);
        self.sync_map_slices();
        self.refresh()?;
        Ok(slice)
    }

    pub fn next_slice(&mut self) -> Result<usize, SessionError> {
        let slice = self.image.cursor_mut().next(self.orientation);
        self.sync_map_slices();
        self.refresh()?;
        Ok(slice)
    }

    pub fn previous_slice(&mut self) -> Result<usize, SessionError> {
        let slice = self.image.cursor_mut().previous(self.orientation);
        self.sync_map_slices();
        self.refresh()?;
        Ok(slice)
    }

    fn sync_map_slices(&mut self) {
        let orientation = self.orientation;
        let index = self.image.cursor().current(orientation) as isize;
        for map in self.store.maps_mut().filter(|map| map.is_loaded()) {
            map.set_slice_num(orientation, index);
        }
    }

    pub fn reset_window(&mut self) -> Result<WindowLevel, SessionError> {
        Ok(self.image.reset_window()?)
    }

    pub fn add_delta_window_width(&mut self, delta: f64) -> Result<f64, SessionError> {
        Ok(self.image.add_delta_window_width(delta)?)
    }

    pub fn add_delta_window_center(&mut self, delta: f64) -> Result<f64, SessionError> {
        Ok(self.image.add_delta_window_center(delta)?)
    }

    pub fn set_window_width(&mut self, width: f64) -> Result<f64, SessionError> {
        Ok(self.image.set_window_width(width)?)
    }

    pub fn set_window_center(&mut self, center: f64) -> Result<f64, SessionError> {
        Ok(self.image.set_window_center(center)?)
    }

    /// Pointer drag over the image; both deltas are subtracted from the window
    pub fn drag_window(&mut self, dx: f64, dy: f64) -> Result<WindowLevel, SessionError> {
        self.image.add_delta_window_width(-dx)?;
        self.image.add_delta_window_center(-dy)?;
        Ok(self.image.current_window()?)
    }

    /// 16-bit grayscale rendering of the current slice
    pub fn preview(&mut self) -> Result<Preview, SessionError> {
        let window = self.image.current_window()?;
        let slice = self.image.slice().ok_or(SynthesisError::NotSelected)?;
        let interpolation = self.catalog.interpolation();
        render_preview(
            slice.view(),
            &window,
            interpolation.interpolation_type,
            interpolation.scale as f32,
        )
        .ok_or_else(|| SessionError::Preview(self.image.series_description()))
    }

    pub fn set_header(&mut self, field: HeaderField, value: impl Into<String>) {
        self.image.set_header(field, value);
    }

    pub fn set_series_number(&mut self, series_number: u32) {
        self.image.set_series_number(series_number);
    }

    /// Write the current parameter values (and window when `with_window`)
    /// back into the configuration file
    pub fn save_parameters(&self, with_window: bool) -> Result<(), SessionError> {
        let path = self.config_path.as_ref().ok_or(SessionError::NoConfigPath)?;
        let image_type = self.image.image_type().ok_or(SynthesisError::NotSelected)?;
        let window = self
            .image
            .window()
            .filter(|_| with_window)
            .map(|window| (window.width(), window.center()));
        Config::persist_parameters(path, image_type, self.image.parameters(), window)?;
        Ok(())
    }

    pub fn export_dicom(&mut self, directory: impl AsRef<Path>) -> Result<Vec<PathBuf>, SessionError> {
        Ok(export::export_dicom(&mut self.image, &self.store, directory)?)
    }

    /// Build the DICOM headers of the current volume without writing them
    pub fn dicom_series(&mut self) -> Result<DicomSeries, SessionError> {
        self.image.recompute(&self.store, self.orientation, Dims::Volume)?;
        Ok(DicomSeries::build(&self.image, &self.store)?)
    }

    pub fn export_nifti(&mut self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        Ok(export::export_nifti(&mut self.image, &self.store, path)?)
    }

    fn refresh(&mut self) -> Result<(), SessionError> {
        if self.image.image_type().is_none() {
            return Ok(());
        }
        self.image.recompute(&self.store, self.orientation, Dims::Slice)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::CONFIG;
    use ndarray::Array3;

    fn session() -> Session {
        let mut session = Session::new(Catalog::from_config(Config::from_json_str(CONFIG).unwrap()));
        let dim = (6, 5, 4);
        let maps = [
            ("T1", Array3::from_shape_fn(dim, |(x, y, _)| 700.0 + (x * 40 + y * 15) as f32)),
            ("T2", Array3::from_shape_fn(dim, |(x, _, z)| 50.0 + (x + z) as f32)),
            ("PD", Array3::from_shape_fn(dim, |(x, _, _)| if x < 2 { 0.0 } else { 60.0 + x as f32 })),
        ];
        for (name, data) in maps {
            session
                .insert_map(name, LoadedVolume::from_array(data, (1.0, 1.0, 1.0), MapFormat::Nifti))
                .unwrap();
        }
        session
    }

    #[test]
    fn selecting_synthesizes_and_sets_window() {
        let mut session = session();
        session.select_type("FLAIR - 1.5T").unwrap();
        assert!(session.image().slice().is_some());
        let window = session.image().window().unwrap();
        assert_eq!(window.width(), 4000.0);
        assert_eq!(window.center(), 2000.0);
    }

    #[test]
    fn unknown_type_is_reported() {
        let mut session = session();
        assert!(matches!(
            session.select_type("T2W - 9T"),
            Err(SessionError::UnknownImageType(_))
        ));
    }

    #[test]
    fn selection_with_missing_maps_sticks() {
        let mut session = Session::new(Catalog::from_config(Config::from_json_str(CONFIG).unwrap()));
        let err = session.select_type("FSE - 3T").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Synthesis(SynthesisError::NotLoaded { ref missing, .. })
                if missing == &["PD".to_string(), "T2".to_string()]
        ));
        assert_eq!(session.missing_maps(), vec!["PD", "T2"]);
        assert_eq!(session.image().image_type().unwrap().name(), "FSE - 3T");
    }

    #[test]
    fn slice_navigation_wraps_and_recomputes() {
        let mut session = session();
        session.select_type("FSE - 3T").unwrap();
        let before = session.image().slice().cloned();

        assert_eq!(session.set_slice(4).unwrap(), 0);
        assert_eq!(session.previous_slice().unwrap(), 3);
        assert_eq!(session.next_slice().unwrap(), 0);
        assert_ne!(session.image().slice().cloned(), before);
        assert_eq!(session.store().get("T1").unwrap().slice_num(Orientation::Axial), 0);
    }

    #[test]
    fn orientation_change_reslices() {
        let mut session = session();
        session.select_type("FSE - 3T").unwrap();
        session.set_orientation(Orientation::Sagittal).unwrap();
        assert_eq!(session.image().slice().unwrap().dim(), (4, 5));
    }

    #[test]
    fn drag_moves_bound_parameter() {
        let mut session = session();
        session.select_type("FLAIR - 1.5T").unwrap();
        assert_eq!(session.drag_parameter(DragAxis::Horizontal, -10.0).unwrap(), Some(72.0));
        assert_eq!(session.drag_parameter(DragAxis::Vertical, 1e6).unwrap(), Some(3500.0));
    }

    #[test]
    fn preview_uses_configured_scale() {
        let mut session = session();
        session.select_type("FSE - 1.5T").unwrap();
        let preview = session.preview().unwrap();
        assert_eq!(preview.dimensions(), (12, 10));
    }
}
