use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::gpu::resource_table::DeviceResource;

/// Scalar range a transfer function spans.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct IntensityRange {
    /// Lowest intensity.
    pub min: f32,
    /// Highest intensity.
    pub max: f32,
}

impl IntensityRange {
    /// Width of the range.
    #[must_use]
    pub fn span(&self) -> f32 {
        self.max - self.min
    }

    /// Map an intensity into `[0, 1]`. An empty range maps everything to 0.
    #[must_use]
    pub fn normalize(&self, intensity: f32) -> f32 {
        let span = self.span();
        if span == 0.0 {
            0.0
        } else {
            (intensity - self.min) / span
        }
    }

    /// Map a normalized value back into the range.
    #[must_use]
    pub fn denormalize(&self, normalized: f32) -> f32 {
        self.min + self.span() * normalized
    }
}

impl Default for IntensityRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 255.0,
        }
    }
}

/// A control point of the transfer function.
///
/// Intensity and opacity are kept inside the node's allowed window, which
/// [`TransferFunction::update_node_ranges`] derives from the neighbouring
/// nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferFunctionNode {
    intensity: f32,
    opacity: f32,
    /// Diffuse color, linear RGB in `[0, 1]`.
    pub diffuse: [f32; 3],
    /// Specular color, linear RGB in `[0, 1]`.
    pub specular: [f32; 3],
    /// Emitted color, linear RGB in `[0, 1]`.
    pub emission: [f32; 3],
    /// Microfacet roughness.
    pub roughness: f32,
    min_x: f32,
    max_x: f32,
    min_y: f32,
    max_y: f32,
}

impl Default for TransferFunctionNode {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl TransferFunctionNode {
    /// A white node with an unconstrained opacity window. The intensity
    /// window is empty until the owning function updates node ranges.
    #[must_use]
    pub const fn new(intensity: f32, opacity: f32) -> Self {
        Self {
            intensity,
            opacity,
            diffuse: [1.0; 3],
            specular: [1.0; 3],
            emission: [0.0; 3],
            roughness: 100.0,
            min_x: intensity,
            max_x: intensity,
            min_y: 0.0,
            max_y: 1.0,
        }
    }

    /// Raw intensity.
    #[must_use]
    pub const fn intensity(&self) -> f32 {
        self.intensity
    }

    /// Set the intensity, clamped to the node's intensity window.
    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = intensity.max(self.min_x).min(self.max_x);
    }

    /// Intensity normalized to `range`.
    #[must_use]
    pub fn normalized_intensity(&self, range: &IntensityRange) -> f32 {
        range.normalize(self.intensity)
    }

    /// Set the intensity from a value normalized to `range`.
    pub fn set_normalized_intensity(&mut self, range: &IntensityRange, normalized: f32) {
        self.set_intensity(range.denormalize(normalized));
    }

    /// Opacity.
    #[must_use]
    pub const fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Set the opacity, clamped to the node's opacity window.
    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.max(self.min_y).min(self.max_y);
    }

    /// Allowed intensity window.
    #[must_use]
    pub const fn intensity_window(&self) -> (f32, f32) {
        (self.min_x, self.max_x)
    }

    /// Set the allowed intensity window.
    pub fn set_intensity_window(&mut self, min: f32, max: f32) {
        self.min_x = min;
        self.max_x = max;
    }

    /// Allowed opacity window.
    #[must_use]
    pub const fn opacity_window(&self) -> (f32, f32) {
        (self.min_y, self.max_y)
    }

    /// Set the allowed opacity window.
    pub fn set_opacity_window(&mut self, min: f32, max: f32) {
        self.min_y = min;
        self.max_y = max;
    }

    /// A node built from a persisted record. Windows are left for the
    /// owning function to derive.
    #[must_use]
    pub fn from_record(record: &NodeRecord, range: &IntensityRange) -> Self {
        let mut node = Self::new(range.denormalize(record.normalized_intensity), 0.0);
        node.set_opacity(record.opacity);
        node.diffuse = record.diffuse;
        node.specular = record.specular;
        node.emission = record.emission;
        node.roughness = record.roughness;
        node
    }

    /// Returns `true` if `(intensity, opacity)` lies inside both windows.
    #[must_use]
    pub fn in_range(&self, intensity: f32, opacity: f32) -> bool {
        (self.min_x..=self.max_x).contains(&intensity)
            && (self.min_y..=self.max_y).contains(&opacity)
    }
}

/// Plain property record of one node, as exchanged with editors, saved in
/// presets and uploaded to the device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct NodeRecord {
    /// Intensity normalized to the function's range.
    pub normalized_intensity: f32,
    /// Opacity.
    pub opacity: f32,
    /// Diffuse color.
    pub diffuse: [f32; 3],
    /// Specular color.
    pub specular: [f32; 3],
    /// Emitted color.
    pub emission: [f32; 3],
    /// Microfacet roughness.
    pub roughness: f32,
}

impl Default for NodeRecord {
    fn default() -> Self {
        let node = TransferFunctionNode::default();
        Self {
            normalized_intensity: 0.0,
            opacity: node.opacity,
            diffuse: node.diffuse,
            specular: node.specular,
            emission: node.emission,
            roughness: node.roughness,
        }
    }
}

/// Device layout of a transfer-function node.
///
/// WGSL layout:
///   diffuse: vec3<f32>            (offset 0,  align 16)
///   normalized_intensity: f32     (offset 12)
///   specular: vec3<f32>           (offset 16, align 16)
///   opacity: f32                  (offset 28)
///   emission: vec3<f32>           (offset 32, align 16)
///   roughness: f32                (offset 44)
///   Total: 48 bytes
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuNode {
    /// Diffuse color.
    pub diffuse: [f32; 3],
    /// Intensity normalized to the function's range.
    pub normalized_intensity: f32,
    /// Specular color.
    pub specular: [f32; 3],
    /// Opacity.
    pub opacity: f32,
    /// Emitted color.
    pub emission: [f32; 3],
    /// Microfacet roughness.
    pub roughness: f32,
}

impl DeviceResource for GpuNode {
    type Host = NodeRecord;

    fn from_host(host: &NodeRecord) -> Self {
        Self {
            diffuse: host.diffuse,
            normalized_intensity: host.normalized_intensity,
            specular: host.specular,
            opacity: host.opacity,
            emission: host.emission,
            roughness: host.roughness,
        }
    }
}

/// Piecewise-linear transfer function over an intensity range.
///
/// Persists as a [`TransferFunctionPreset`], so saved node intensities are
/// normalized to the range. Node windows are rederived on load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "TransferFunctionPreset", into = "TransferFunctionPreset")]
pub struct TransferFunction {
    /// Intensity range the nodes live in.
    pub range: IntensityRange,
    /// Control points, ordered by intensity.
    pub nodes: Vec<TransferFunctionNode>,
}

impl Default for TransferFunction {
    fn default() -> Self {
        let range = IntensityRange::default();
        let mut function = Self {
            range,
            nodes: vec![
                TransferFunctionNode::new(range.min, 0.0),
                TransferFunctionNode::new(range.max, 1.0),
            ],
        };
        function.update_node_ranges();
        function
    }
}

/// Saved form of a [`TransferFunction`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Transfer Function", inline)]
#[serde(default)]
pub struct TransferFunctionPreset {
    /// Intensity range the nodes live in.
    pub range: IntensityRange,
    /// Control points, ordered by intensity.
    pub nodes: Vec<NodeRecord>,
}

impl Default for TransferFunctionPreset {
    fn default() -> Self {
        TransferFunction::default().into()
    }
}

impl From<TransferFunction> for TransferFunctionPreset {
    fn from(function: TransferFunction) -> Self {
        Self {
            range: function.range,
            nodes: function.records().collect(),
        }
    }
}

impl From<TransferFunctionPreset> for TransferFunction {
    fn from(preset: TransferFunctionPreset) -> Self {
        let range = preset.range;
        let mut function = Self {
            range,
            nodes: preset
                .nodes
                .iter()
                .map(|record| TransferFunctionNode::from_record(record, &range))
                .collect(),
        };
        function.update_node_ranges();
        function
    }
}

impl TransferFunction {
    /// Insert a node, keeping nodes ordered by intensity, and refresh node
    /// windows. Returns the node's index.
    pub fn add_node(&mut self, node: TransferFunctionNode) -> usize {
        let index = self
            .nodes
            .partition_point(|n| n.intensity() <= node.intensity());
        self.nodes.insert(index, node);
        self.update_node_ranges();
        index
    }

    /// Remove a node and refresh node windows.
    pub fn remove_node(&mut self, index: usize) -> Option<TransferFunctionNode> {
        if index >= self.nodes.len() {
            return None;
        }
        let node = self.nodes.remove(index);
        self.update_node_ranges();
        Some(node)
    }

    /// Derive each node's intensity window from its neighbours. The first
    /// and last nodes are pinned to the ends of the range.
    pub fn update_node_ranges(&mut self) {
        let count = self.nodes.len();
        let mut intensities: Vec<f32> =
            self.nodes.iter().map(TransferFunctionNode::intensity).collect();
        if let Some(last) = intensities.last_mut() {
            *last = self.range.max;
        }
        if let Some(first) = intensities.first_mut() {
            *first = self.range.min;
        }
        for (i, node) in self.nodes.iter_mut().enumerate() {
            let (min, max) = if i == 0 {
                (self.range.min, self.range.min)
            } else if i == count - 1 {
                (self.range.max, self.range.max)
            } else {
                (intensities[i - 1], intensities[i + 1])
            };
            node.set_intensity_window(min, max);
            node.set_opacity_window(0.0, 1.0);
            node.set_intensity(node.intensity());
        }
    }

    /// Property records of every node, in order.
    pub fn records(&self) -> impl Iterator<Item = NodeRecord> + '_ {
        self.nodes.iter().map(|node| NodeRecord {
            normalized_intensity: node.normalized_intensity(&self.range),
            opacity: node.opacity(),
            diffuse: node.diffuse,
            specular: node.specular,
            emission: node.emission,
            roughness: node.roughness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opacity_is_clamped_to_its_window() {
        let mut node = TransferFunctionNode::new(10.0, 0.5);
        node.set_opacity(1.5);
        assert_eq!(node.opacity(), 1.0);
        node.set_opacity_window(0.2, 0.8);
        node.set_opacity(0.0);
        assert_eq!(node.opacity(), 0.2);
    }

    #[test]
    fn intensity_is_clamped_to_its_window() {
        let mut node = TransferFunctionNode::new(10.0, 0.5);
        node.set_intensity_window(5.0, 20.0);
        node.set_intensity(30.0);
        assert_eq!(node.intensity(), 20.0);
        assert!(node.in_range(7.0, 0.5));
        assert!(!node.in_range(4.0, 0.5));
        assert!(!node.in_range(7.0, 1.5));
    }

    #[test]
    fn normalized_intensity_follows_the_range() {
        let range = IntensityRange {
            min: -100.0,
            max: 100.0,
        };
        let mut node = TransferFunctionNode::new(0.0, 0.0);
        node.set_intensity_window(range.min, range.max);
        assert_eq!(node.normalized_intensity(&range), 0.5);
        node.set_normalized_intensity(&range, 0.75);
        assert_eq!(node.intensity(), 50.0);
        assert_eq!(IntensityRange { min: 3.0, max: 3.0 }.normalize(3.0), 0.0);
    }

    #[test]
    fn interior_nodes_move_between_neighbours() {
        let mut function = TransferFunction::default();
        let index = function.add_node(TransferFunctionNode::new(100.0, 0.5));
        assert_eq!(index, 1);
        assert_eq!(function.nodes[0].intensity_window(), (0.0, 0.0));
        assert_eq!(function.nodes[1].intensity_window(), (0.0, 255.0));
        assert_eq!(function.nodes[2].intensity_window(), (255.0, 255.0));

        function.nodes[1].set_intensity(300.0);
        assert_eq!(function.nodes[1].intensity(), 255.0);
    }

    #[test]
    fn removing_a_node_refreshes_windows() {
        let mut function = TransferFunction::default();
        let _ = function.add_node(TransferFunctionNode::new(50.0, 0.2));
        let _ = function.add_node(TransferFunctionNode::new(150.0, 0.8));
        let removed = function.remove_node(1).unwrap();
        assert_eq!(removed.intensity(), 50.0);
        assert_eq!(function.nodes[1].intensity_window(), (0.0, 255.0));
        assert!(function.remove_node(10).is_none());
    }

    #[test]
    fn records_convert_to_the_device_layout() {
        let function = TransferFunction::default();
        let records: Vec<_> = function.records().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].normalized_intensity, 1.0);
        let gpu = GpuNode::from_host(&records[1]);
        assert_eq!(gpu.opacity, 1.0);
        assert_eq!(size_of::<GpuNode>(), 48);
    }

    #[test]
    fn presets_store_normalized_intensities() {
        let mut function = TransferFunction {
            range: IntensityRange {
                min: -1000.0,
                max: 1000.0,
            },
            nodes: vec![
                TransferFunctionNode::new(-1000.0, 0.0),
                TransferFunctionNode::new(1000.0, 1.0),
            ],
        };
        function.update_node_ranges();
        let _ = function.add_node(TransferFunctionNode::new(500.0, 0.4));

        let preset = TransferFunctionPreset::from(function.clone());
        let saved: Vec<f32> = preset.nodes.iter().map(|n| n.normalized_intensity).collect();
        assert_eq!(saved, vec![0.0, 0.75, 1.0]);
        let expected: Vec<f32> = function.records().map(|r| r.normalized_intensity).collect();
        assert_eq!(saved, expected);

        let restored = TransferFunction::from(preset);
        assert_eq!(restored.nodes[1].intensity(), 500.0);
        assert_eq!(restored.nodes[1].intensity_window(), (-1000.0, 1000.0));
        assert_eq!(restored, function);
    }

    #[test]
    fn restored_opacity_is_clamped() {
        let record = NodeRecord {
            opacity: 1.5,
            ..NodeRecord::default()
        };
        let node = TransferFunctionNode::from_record(&record, &IntensityRange::default());
        assert_eq!(node.opacity(), 1.0);
        assert_eq!(node.roughness, 100.0);
    }
}
