//! JSON configuration: presets, quantitative map names and synthetic image
//! definitions, compiled into a [`Catalog`] of [`SyntheticImageType`]s.

use crate::enums::Interpolation;
use crate::equation::EquationError;
use crate::image_type::{DragBindings, SyntheticImageType};
use crate::parameter::ScannerParameter;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::{fs, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown preset `{0}`")]
    UnknownPreset(String),

    #[error("Unknown synthetic image `{0}`")]
    UnknownImage(String),

    #[error("Parameter {parameter} of {image_type} has no value for preset {preset}")]
    MissingPresetValue {
        image_type: String,
        parameter: String,
        preset: String,
    },

    #[error(transparent)]
    Equation(#[from] EquationError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInterpolation {
    #[serde(default)]
    pub interpolation_type: Interpolation,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl Default for ImageInterpolation {
    fn default() -> Self {
        Self {
            interpolation_type: Interpolation::None,
            scale: default_scale(),
        }
    }
}

/// A parameter value shared by all presets, or one value per preset
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PresetValue {
    Single(f64),
    PerPreset(Vec<f64>),
}

impl PresetValue {
    pub fn for_preset(&self, preset_idx: usize) -> Option<f64> {
        match self {
            PresetValue::Single(value) => Some(*value),
            PresetValue::PerPreset(values) if values.len() == 1 => Some(values[0]),
            PresetValue::PerPreset(values) => values.get(preset_idx).copied(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParameterDefinition {
    #[serde(default)]
    pub label: Option<String>,
    pub min: f64,
    pub max: f64,
    #[serde(default = "default_step")]
    pub step: f64,
    pub value: PresetValue,
}

fn default_step() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyntheticImageDefinition {
    #[serde(default)]
    pub title: String,
    pub equation: String,
    #[serde(default, deserialize_with = "ordered_entries")]
    pub parameters: Vec<(String, ParameterDefinition)>,
    #[serde(default)]
    pub window_width: Option<f64>,
    #[serde(default)]
    pub window_center: Option<f64>,
    #[serde(default)]
    pub mouse_horizontal: Option<String>,
    #[serde(default)]
    pub mouse_vertical: Option<String>,
}

impl SyntheticImageDefinition {
    /// Compile this definition for the preset at `preset_idx`
    pub fn compile(
        &self,
        name: &str,
        preset: &str,
        preset_idx: usize,
        map_names: &[&str],
    ) -> Result<SyntheticImageType, ConfigError> {
        let parameters = self
            .parameters
            .iter()
            .map(|(key, definition)| {
                let value = definition.value.for_preset(preset_idx).ok_or_else(|| {
                    ConfigError::MissingPresetValue {
                        image_type: name.to_string(),
                        parameter: key.clone(),
                        preset: preset.to_string(),
                    }
                })?;
                Ok(ScannerParameter::new(
                    key.as_str(),
                    definition.label.as_deref().unwrap_or(key),
                    definition.min,
                    definition.max,
                    definition.step,
                    value,
                ))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let image_type = SyntheticImageType::compile(
            name,
            preset,
            self.title.as_str(),
            &self.equation,
            parameters,
            map_names,
        )?
        .with_window(self.window_width, self.window_center)
        .with_drag(DragBindings {
            horizontal: self.mouse_horizontal.clone(),
            vertical: self.mouse_vertical.clone(),
        });
        Ok(image_type)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub presets: Vec<String>,
    pub quantitative_maps: Vec<String>,
    #[serde(default)]
    pub image_interpolation: ImageInterpolation,
    #[serde(deserialize_with = "ordered_entries")]
    pub synthetic_images: Vec<(String, SyntheticImageDefinition)>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn preset_index(&self, preset: &str) -> Option<usize> {
        self.presets.iter().position(|p| p == preset)
    }

    /// Name under which a definition is registered for a preset
    pub fn expanded_name(key: &str, preset: &str) -> String {
        format!("{key} - {preset}")
    }

    /// Write current parameter values (and optionally window width/center)
    /// of `image_type` back into the configuration file at `path`.
    ///
    /// The document is edited in place; unrelated content is preserved.
    pub fn persist_parameters(
        path: impl AsRef<Path>,
        image_type: &SyntheticImageType,
        parameters: &[ScannerParameter],
        window: Option<(f64, f64)>,
    ) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let mut document: Value = serde_json::from_str(&fs::read_to_string(path)?)?;

        let preset = image_type.preset();
        let preset_idx = document["presets"]
            .as_array()
            .and_then(|presets| presets.iter().position(|p| p.as_str() == Some(preset)))
            .ok_or_else(|| ConfigError::UnknownPreset(preset.to_string()))?;
        let preset_count = document["presets"].as_array().map_or(0, Vec::len);

        let suffix = format!(" - {preset}");
        let key = image_type
            .name()
            .strip_suffix(&suffix)
            .unwrap_or(image_type.name());
        let entry = document
            .get_mut("synthetic_images")
            .and_then(|images| images.get_mut(key))
            .ok_or_else(|| ConfigError::UnknownImage(key.to_string()))?;

        for parameter in parameters {
            let Some(slot) = entry
                .get_mut("parameters")
                .and_then(|p| p.get_mut(parameter.name()))
                .and_then(|p| p.get_mut("value"))
            else {
                log::warn!(
                    "Parameter {} not found in configuration of {key}",
                    parameter.name()
                );
                continue;
            };
            store_preset_value(slot, preset_idx, preset_count, parameter.value());
        }

        if let Some((width, center)) = window {
            entry["window_width"] = Value::from(width);
            entry["window_center"] = Value::from(center);
        }

        fs::write(path, serde_json::to_string_pretty(&document)?)?;
        log::info!("Saved {} parameters to {}", image_type.name(), path.display());
        Ok(())
    }
}

// Shared values are expanded into one entry per preset before one is changed.
fn store_preset_value(slot: &mut Value, preset_idx: usize, preset_count: usize, value: f64) {
    let shared = match &mut *slot {
        Value::Array(values) if values.len() > preset_idx && values.len() > 1 => {
            values[preset_idx] = Value::from(value);
            return;
        }
        Value::Array(values) => values.first().cloned().unwrap_or(Value::from(value)),
        other => other.clone(),
    };
    let mut values = vec![shared; preset_count.max(preset_idx + 1)];
    values[preset_idx] = Value::from(value);
    *slot = Value::Array(values);
}

/// Deserialize a JSON object into its entries, keeping document order
fn ordered_entries<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct EntriesVisitor<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a JSON object")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some(entry) = access.next_entry()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(EntriesVisitor(PhantomData))
}

/// Compiled synthetic image types for every preset of a configuration
#[derive(Debug)]
pub struct Catalog {
    config: Config,
    types: Vec<SyntheticImageType>,
    rejected: Vec<ConfigError>,
}

impl Catalog {
    /// Compile every definition for every preset.
    ///
    /// A definition that fails to compile is logged and recorded in
    /// [`Catalog::rejected`]; the remaining types stay usable.
    pub fn from_config(config: Config) -> Self {
        let map_names: Vec<&str> = config.quantitative_maps.iter().map(String::as_str).collect();
        let mut types = Vec::new();
        let mut rejected = Vec::new();

        for (preset_idx, preset) in config.presets.iter().enumerate() {
            for (key, definition) in &config.synthetic_images {
                let name = Config::expanded_name(key, preset);
                match definition.compile(&name, preset, preset_idx, &map_names) {
                    Ok(image_type) => types.push(image_type),
                    Err(err) => {
                        log::warn!("Skipping synthetic image {name}: {err}");
                        rejected.push(err);
                    }
                }
            }
        }

        log::info!(
            "Registered {} synthetic image types ({} rejected)",
            types.len(),
            rejected.len()
        );
        Self {
            config,
            types,
            rejected,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Self::from_config(Config::load(path)?))
    }

    /// Re-read and recompile the configuration; on error the current catalog
    /// is kept.
    pub fn reload(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        *self = Self::load(path)?;
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn types(&self) -> &[SyntheticImageType] {
        &self.types
    }

    pub fn get(&self, name: &str) -> Option<&SyntheticImageType> {
        self.types.iter().find(|t| t.name() == name)
    }

    pub fn rejected(&self) -> &[ConfigError] {
        &self.rejected
    }

    pub fn map_names(&self) -> &[String] {
        &self.config.quantitative_maps
    }

    pub fn presets(&self) -> &[String] {
        &self.config.presets
    }

    pub fn interpolation(&self) -> &ImageInterpolation {
        &self.config.image_interpolation
    }

    /// Types registered for one preset
    pub fn types_for_preset<'a>(
        &'a self,
        preset: &'a str,
    ) -> impl Iterator<Item = &'a SyntheticImageType> + 'a {
        self.types.iter().filter(move |t| t.preset() == preset)
    }

    /// Compile and register a user-defined type under `name`, replacing any
    /// type of the same name.
    pub fn add_custom(
        &mut self,
        name: &str,
        definition: &SyntheticImageDefinition,
    ) -> Result<&SyntheticImageType, ConfigError> {
        let map_names: Vec<&str> = self
            .config
            .quantitative_maps
            .iter()
            .map(String::as_str)
            .collect();
        let image_type = definition.compile(name, "", 0, &map_names)?;

        self.types.retain(|t| t.name() != name);
        self.types.push(image_type);
        log::info!("Registered custom synthetic image {name}");
        Ok(&self.types[self.types.len() - 1])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const CONFIG: &str = r#"{
        "presets": ["1.5T", "3T"],
        "quantitative_maps": ["T1", "T2", "PD"],
        "image_interpolation": {"interpolation_type": "linear", "scale": 2},
        "synthetic_images": {
            "FSE": {
                "title": "T2-weighted - Fast Spin Echo",
                "equation": "PD*exp(-TE/T2)",
                "parameters": {
                    "TE": {"label": "TE", "min": 1, "max": 100, "step": 1, "value": [75, 80]}
                }
            },
            "FLAIR": {
                "title": "T2-weighted - Fluid Attenuated Inversion Recovery",
                "equation": "abs(PD)*exp(-T1SAT/T1)*exp(-TE/T2)*(1-2*exp(-TI/T1))",
                "parameters": {
                    "TE": {"label": "TE", "min": 1, "max": 100, "step": 1, "value": [82, 80]},
                    "TI": {"label": "TI", "min": 1000, "max": 3500, "step": 10, "value": [2500, 2075]},
                    "T1SAT": {"label": "T1SAT", "min": 400, "max": 2000, "step": 10, "value": [500]}
                },
                "window_width": 4000,
                "window_center": 2000,
                "mouse_horizontal": "TE",
                "mouse_vertical": "TI"
            },
            "BROKEN": {
                "title": "Unbalanced",
                "equation": "exp(-TE/T2",
                "parameters": {
                    "TE": {"min": 1, "max": 100, "value": 10}
                }
            }
        }
    }"#;

    #[test]
    fn expands_definitions_per_preset() {
        let catalog = Catalog::from_config(Config::from_json_str(CONFIG).unwrap());
        let names: Vec<_> = catalog.types().iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec!["FSE - 1.5T", "FLAIR - 1.5T", "FSE - 3T", "FLAIR - 3T"]
        );
        assert_eq!(catalog.interpolation().interpolation_type, Interpolation::Bilinear);
        assert_eq!(catalog.types_for_preset("3T").count(), 2);
    }

    #[test]
    fn failed_registration_does_not_block_others() {
        let catalog = Catalog::from_config(Config::from_json_str(CONFIG).unwrap());
        assert_eq!(catalog.rejected().len(), 2);
        assert!(catalog.rejected().iter().all(|err| matches!(
            err,
            ConfigError::Equation(EquationError::UnbalancedParentheses { image_type })
                if image_type.starts_with("BROKEN")
        )));
        assert!(catalog.get("BROKEN - 3T").is_none());
    }

    #[test]
    fn picks_parameter_value_for_preset() {
        let catalog = Catalog::from_config(Config::from_json_str(CONFIG).unwrap());
        let flair = catalog.get("FLAIR - 3T").unwrap();
        let values: Vec<_> = flair
            .parameters()
            .iter()
            .map(|p| (p.name(), p.value()))
            .collect();
        assert_eq!(values, vec![("TE", 80.0), ("TI", 2075.0), ("T1SAT", 500.0)]);
        assert_eq!(flair.default_window_width(), Some(4000.0));
        assert_eq!(flair.drag().horizontal.as_deref(), Some("TE"));
        assert_eq!(flair.dependencies(), ["PD", "T1", "T2"]);
    }

    #[test]
    fn missing_preset_value_is_rejected() {
        let definition: SyntheticImageDefinition = serde_json::from_str(
            r#"{"equation": "T1*TE", "parameters": {"TE": {"min": 0, "max": 1, "value": [0.1, 0.2]}}}"#,
        )
        .unwrap();
        let err = definition.compile("X - 7T", "7T", 2, &["T1"]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingPresetValue { parameter, .. } if parameter == "TE"));
    }

    #[test]
    fn custom_types_replace_by_name() {
        let mut catalog = Catalog::from_config(Config::from_json_str(CONFIG).unwrap());
        let definition: SyntheticImageDefinition =
            serde_json::from_str(r#"{"title": "T1 map", "equation": "T1"}"#).unwrap();
        catalog.add_custom("Custom", &definition).unwrap();
        catalog.add_custom("Custom", &definition).unwrap();
        assert_eq!(
            catalog.types().iter().filter(|t| t.name() == "Custom").count(),
            1
        );

        let bad: SyntheticImageDefinition =
            serde_json::from_str(r#"{"equation": "T4"}"#).unwrap();
        assert!(catalog.add_custom("Bad", &bad).is_err());
        assert!(catalog.get("Bad").is_none());
    }

    #[test]
    fn shared_values_split_per_preset() {
        let mut scalar = Value::from(80.0);
        store_preset_value(&mut scalar, 1, 2, 95.0);
        assert_eq!(scalar, serde_json::json!([80.0, 95.0]));

        let mut single = serde_json::json!([80.0]);
        store_preset_value(&mut single, 0, 2, 60.0);
        assert_eq!(single, serde_json::json!([60.0, 80.0]));

        let mut split = serde_json::json!([75.0, 80.0]);
        store_preset_value(&mut split, 1, 2, 85.0);
        assert_eq!(split, serde_json::json!([75.0, 85.0]));
    }

    #[test]
    fn persists_parameters_for_one_preset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, CONFIG).unwrap();

        let mut catalog = Catalog::load(&path).unwrap();
        let flair = catalog.get("FLAIR - 3T").unwrap().clone();
        let mut parameters = flair.parameters().to_vec();
        parameters[0].set_value(90.0);
        parameters[2].set_value(700.0);
        Config::persist_parameters(&path, &flair, &parameters, Some((3000.0, 1500.0))).unwrap();

        catalog.reload(&path).unwrap();
        let reloaded = catalog.get("FLAIR - 3T").unwrap();
        assert_eq!(reloaded.parameters()[0].value(), 90.0);
        assert_eq!(reloaded.parameters()[2].value(), 700.0);
        assert_eq!(reloaded.default_window_width(), Some(3000.0));

        let other_preset = catalog.get("FLAIR - 1.5T").unwrap();
        assert_eq!(other_preset.parameters()[0].value(), 82.0);
        assert_eq!(other_preset.parameters()[2].value(), 500.0);
    }

    #[test]
    fn reload_failure_keeps_catalog() {
        let mut catalog = Catalog::from_config(Config::from_json_str(CONFIG).unwrap());
        assert!(catalog.reload("/nonexistent/config.json").is_err());
        assert_eq!(catalog.types().len(), 4);
    }
}
