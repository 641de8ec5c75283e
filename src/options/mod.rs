//! Rendering properties and transfer-function presets with TOML support.
//!
//! The volume property source and the transfer function serialize to/from
//! TOML presets. Partial files work: every section and field falls back to
//! its documented default.

mod transfer_function;
mod volume;

use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
pub use transfer_function::{
    GpuNode, IntensityRange, NodeRecord, TransferFunction,
    TransferFunctionNode, TransferFunctionPreset,
};
pub use volume::{ShadingType, VolumeProperty};

use crate::error::VoxrayError;

/// Top-level options container. All sub-structs use `#[serde(default)]` so
/// partial TOML files (e.g. only overriding `[volume]`) work correctly.
#[derive(
    Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema,
)]
#[serde(default)]
pub struct Options {
    /// Volume rendering properties.
    pub volume: VolumeProperty,
    /// Transfer function nodes.
    #[schemars(with = "TransferFunctionPreset")]
    pub transfer_function: TransferFunction,
}

impl Options {
    /// Generate JSON Schema describing the UI-exposed options.
    #[must_use]
    pub fn json_schema() -> schemars::Schema {
        schemars::schema_for!(Options)
    }

    /// Parse options from TOML text. Missing fields use defaults.
    ///
    /// # Errors
    ///
    /// Returns [`VoxrayError::OptionsParse`] on malformed TOML.
    pub fn from_toml_str(content: &str) -> Result<Self, VoxrayError> {
        toml::from_str(content)
            .map_err(|e| VoxrayError::OptionsParse(e.to_string()))
    }

    /// Load options from a TOML file. Missing fields use defaults.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, VoxrayError> {
        let content = std::fs::read_to_string(path).map_err(VoxrayError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Save options to a TOML file (pretty-printed).
    ///
    /// # Errors
    ///
    /// Fails if serialization or writing fails.
    pub fn save(&self, path: &Path) -> Result<(), VoxrayError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| VoxrayError::OptionsParse(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(VoxrayError::Io)?;
        }
        std::fs::write(path, content).map_err(VoxrayError::Io)
    }

    /// List available preset names (TOML file stems) in a directory.
    #[must_use]
    pub fn list_presets(dir: &Path) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) =
                        path.file_stem().and_then(|s| s.to_str())
                    {
                        names.push(stem.to_owned());
                    }
                }
            }
        }
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_toml() {
        let opts = Options::default();
        let toml_str = toml::to_string_pretty(&opts).unwrap();
        let parsed = Options::from_toml_str(&toml_str).unwrap();
        assert_eq!(opts, parsed);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_str = r"
[volume]
density_scale = 20.0
shading_type = 'phase'
";
        let opts = Options::from_toml_str(toml_str).unwrap();
        assert_eq!(opts.volume.density_scale, 20.0);
        assert_eq!(opts.volume.shading_type, ShadingType::Phase);
        // Everything else should be default
        assert_eq!(opts.volume.step_size_factor_primary, 3.0);
        assert_eq!(opts.transfer_function, TransferFunction::default());
    }

    #[test]
    fn loaded_nodes_are_clamped_to_their_windows() {
        let toml_str = r"
[transfer_function]
range = { min = 0.0, max = 100.0 }

[[transfer_function.nodes]]
normalized_intensity = 0.05
opacity = 0.0

[[transfer_function.nodes]]
normalized_intensity = 0.4
opacity = 0.7

[[transfer_function.nodes]]
normalized_intensity = 1.0
opacity = 1.5
";
        let opts = Options::from_toml_str(toml_str).unwrap();
        let nodes = &opts.transfer_function.nodes;
        assert_eq!(nodes[0].intensity(), 0.0);
        assert_eq!(nodes[1].intensity_window(), (0.0, 100.0));
        assert_eq!(nodes[1].opacity(), 0.7);
        assert_eq!(nodes[1].roughness, 100.0);
        assert_eq!(nodes[2].opacity(), 1.0);
    }

    #[test]
    fn saved_presets_hold_normalized_intensities() {
        let mut opts = Options::default();
        opts.transfer_function.range = IntensityRange {
            min: 100.0,
            max: 300.0,
        };
        opts.transfer_function.nodes = vec![
            TransferFunctionNode::new(100.0, 0.0),
            TransferFunctionNode::new(150.0, 0.5),
            TransferFunctionNode::new(300.0, 1.0),
        ];
        opts.transfer_function.update_node_ranges();

        let toml_str = toml::to_string_pretty(&opts).unwrap();
        assert!(toml_str.contains("normalized_intensity = 0.25"));
        assert!(!toml_str.contains("\nintensity"));
        let parsed = Options::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.transfer_function.nodes[1].intensity(), 150.0);
        assert_eq!(parsed, opts);
    }

    #[test]
    fn malformed_toml_is_an_options_error() {
        let err = Options::from_toml_str("[volume\n").unwrap_err();
        assert!(matches!(err, VoxrayError::OptionsParse(_)));
    }

    #[test]
    fn save_load_and_list_presets() {
        let dir = std::env::temp_dir()
            .join(format!("voxray-presets-{}", std::process::id()));
        let mut opts = Options::default();
        opts.volume.gradient_factor = 1.5;
        opts.save(&dir.join("soft.toml")).unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        assert_eq!(Options::list_presets(&dir), vec![String::from("soft")]);
        assert_eq!(Options::load(&dir.join("soft.toml")).unwrap(), opts);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn schema_has_expected_properties() {
        let schema_value =
            serde_json::to_value(Options::json_schema()).unwrap();
        let props = schema_value["properties"].as_object().unwrap();
        assert!(props.contains_key("volume"));
        assert!(props.contains_key("transfer_function"));

        let volume = &props["volume"]["properties"];
        assert!(volume.get("density_scale").is_some());
        assert!(volume.get("shading_type").is_some());
    }
}
