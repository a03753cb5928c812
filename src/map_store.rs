use crate::enums::{MapFormat, Orientation};
use crate::map_loader::{LoadError, LoadedVolume, MapLoader};
use crate::quantitative_map::QuantitativeMap;

use ndarray::{Array2, Array3};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapStoreError {
    #[error("Unknown quantitative map {0}")]
    UnknownMap(String),

    #[error("Failed to load map {name}: {source}")]
    Load {
        name: String,
        #[source]
        source: LoadError,
    },
}

/// The configured quantitative maps, each either loaded or empty
///
/// The first configured map is the reference map used for export geometry
/// and template headers.
#[derive(Debug, Clone, Default)]
pub struct MapStore {
    maps: Vec<QuantitativeMap>,
}

impl MapStore {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            maps: names.into_iter().map(QuantitativeMap::new).collect(),
        }
    }

    /// Switch to a new list of map names, keeping maps that are still configured
    pub fn reconfigure<S: AsRef<str>>(&mut self, names: &[S]) {
        let mut previous = std::mem::take(&mut self.maps);
        self.maps = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                previous
                    .iter()
                    .position(|map| map.name() == name)
                    .map(|i| previous.swap_remove(i))
                    .unwrap_or_else(|| QuantitativeMap::new(name))
            })
            .collect();
    }

    /// Configured map names, in configuration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.maps.iter().map(QuantitativeMap::name)
    }

    pub fn get(&self, name: &str) -> Option<&QuantitativeMap> {
        self.maps.iter().find(|map| map.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut QuantitativeMap> {
        self.maps.iter_mut().find(|map| map.name() == name)
    }

    pub fn maps(&self) -> &[QuantitativeMap] {
        &self.maps
    }

    pub fn maps_mut(&mut self) -> impl Iterator<Item = &mut QuantitativeMap> {
        self.maps.iter_mut()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.get(name).is_some_and(QuantitativeMap::is_loaded)
    }

    pub fn volume(&self, name: &str) -> Option<&Array3<f32>> {
        self.get(name)?.volume()
    }

    /// Current cross-section of map `name`, or `None` when unknown or unloaded
    pub fn slice(&self, name: &str, orientation: Orientation) -> Option<Array2<f32>> {
        self.get(name)?.slice(orientation)
    }

    pub fn reference_map(&self) -> Option<&QuantitativeMap> {
        self.maps.first()
    }

    /// Names from `required` that are not loaded, in the given order
    pub fn missing<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|name| !self.is_loaded(name))
            .map(String::as_str)
            .collect()
    }

    /// Read map `name` from disk. On failure the map keeps its previous contents.
    pub fn load(
        &mut self,
        name: &str,
        path: impl AsRef<Path>,
        format: MapFormat,
    ) -> Result<&QuantitativeMap, MapStoreError> {
        if self.get(name).is_none() {
            return Err(MapStoreError::UnknownMap(name.to_string()));
        }
        let volume = MapLoader::load(path, format).map_err(|source| {
            log::warn!("Could not load map {name}: {source}");
            MapStoreError::Load {
                name: name.to_string(),
                source,
            }
        })?;
        self.insert(name, volume)
    }

    /// Install an already decoded volume as map `name`
    pub fn insert(
        &mut self,
        name: &str,
        volume: LoadedVolume,
    ) -> Result<&QuantitativeMap, MapStoreError> {
        let map = self
            .get_mut(name)
            .ok_or_else(|| MapStoreError::UnknownMap(name.to_string()))?;
        map.assign(volume);
        log::info!("Loaded map {name} with dimensions {:?}", map.dim());
        Ok(map)
    }
}
