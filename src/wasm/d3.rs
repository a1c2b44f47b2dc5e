use super::{get_seed, parse_bounds, to_js};
use crate::bounds::{BoundBox, BoundSphere, BoundingBox};
use crate::config::SpatialConfig;
use crate::device::{Buffer, Device};
use crate::hash::HashMode;
use crate::spatial;
use crate::spatial_tree::{SpatialTree, TreeNode};
use rand::prelude::*;
use rand::rngs::StdRng;
use wasm_bindgen::prelude::*;

/// Tree over boxes, built with compute passes and queried on the host.
#[wasm_bindgen]
pub struct SpatialTree3D {
    device: Device,
    builder: SpatialTree,
    hash_mode: HashMode,
    nodes_buffer: Option<Buffer>,
    nodes: Vec<TreeNode>,
}

#[wasm_bindgen]
impl SpatialTree3D {
    /// Allocates a builder for up to `max_elements` leaves.
    #[wasm_bindgen(constructor)]
    pub fn new(max_elements: usize, group_size: u32) -> Result<SpatialTree3D, JsValue> {
        let device = Device::default();
        let config = SpatialConfig {
            max_elements,
            group_size,
            ..SpatialConfig::default()
        };
        let builder = SpatialTree::from_config(&device, &config).map_err(to_js)?;
        Ok(SpatialTree3D {
            device,
            builder,
            hash_mode: config.hash_mode,
            nodes_buffer: None,
            nodes: Vec::new(),
        })
    }

    #[wasm_bindgen(getter)]
    pub fn count(&self) -> usize {
        self.nodes.len() / 2
    }

    /// Uses 8 instead of 10 bits per axis for the spatial hash.
    pub fn set_coarse_hash(&mut self, coarse: bool) {
        self.hash_mode = if coarse { HashMode::XYZ8 } else { HashMode::XYZ10 };
    }

    /// Rebuilds the tree over leaves given as `[min_x, min_y, min_z, max_x, max_y, max_z]`
    /// records.
    pub fn set_leaves(&mut self, bounds: &[f32]) -> Result<(), JsValue> {
        let bounds = parse_bounds::<3>(bounds)?;
        self.rebuild(&bounds)
    }

    /// Rebuilds the tree over `count` random cubes of half size up to `size` in `[0, extent)^3`.
    pub fn random_leaves(&mut self, count: usize, extent: f32, size: f32) -> Result<(), JsValue> {
        let mut rng = StdRng::seed_from_u64(get_seed());
        let bounds: Vec<BoundingBox<3>> = (0..count)
            .map(|_| {
                let center = [
                    rng.r#gen::<f32>() * extent,
                    rng.r#gen::<f32>() * extent,
                    rng.r#gen::<f32>() * extent,
                ];
                BoundingBox::around(center, rng.r#gen::<f32>() * size)
            })
            .collect();
        self.rebuild(&bounds)
    }

    /// Flat `[left, right, parent, spatial]` records of all nodes.
    pub fn links(&self) -> Vec<u32> {
        self.nodes
            .iter()
            .flat_map(|n| [n.left, n.right, n.parent, n.spatial])
            .collect()
    }

    pub fn intersect_box(&self, min_x: f32, min_y: f32, min_z: f32, max_x: f32, max_y: f32, max_z: f32) -> Vec<u32> {
        self.collect(&BoundBox::new([min_x, min_y, min_z], [max_x, max_y, max_z]))
    }

    pub fn intersect_sphere(&self, x: f32, y: f32, z: f32, radius: f32) -> Vec<u32> {
        self.collect(&BoundSphere::new([x, y, z], radius))
    }

    pub fn closest(&self, x: f32, y: f32, z: f32) -> Option<u32> {
        spatial::closest_intersection(&[x, y, z], &self.nodes)
    }
}

impl SpatialTree3D {
    fn rebuild(&mut self, bounds: &[BoundingBox<3>]) -> Result<(), JsValue> {
        let count = bounds.len();
        self.nodes.clear();
        // Drop the old buffer first so its memory is back in the budget.
        self.nodes_buffer = None;
        if count == 0 {
            return Ok(());
        }

        let nodes_buffer = self
            .device
            .create_buffer(SpatialTree::node_words(count))
            .map_err(to_js)?;
        SpatialTree::write_leaves(&self.device, &nodes_buffer, 0, bounds).map_err(to_js)?;
        let mut compute = self.device.create_compute();
        self.builder
            .dispatch(&mut compute, self.hash_mode, &nodes_buffer, 0, count)
            .map_err(to_js)?;
        self.nodes = SpatialTree::read_nodes(&self.device, &nodes_buffer, 0, count).map_err(to_js)?;
        self.nodes_buffer = Some(nodes_buffer);
        Ok(())
    }

    fn collect(&self, shape: &impl crate::bounds::QueryShape<3>) -> Vec<u32> {
        let mut out = Vec::new();
        spatial::for_each_intersection(shape, &self.nodes, |leaf| {
            out.push(leaf);
            true
        });
        out
    }
}
