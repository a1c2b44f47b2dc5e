use super::{get_seed, parse_bounds, to_js};
use crate::bounds::{BoundCircle, BoundRect, BoundingBox};
use crate::spatial::{self, Node2f};
use rand::prelude::*;
use rand::rngs::StdRng;
use wasm_bindgen::prelude::*;

/// Planar tree built on the host.
#[wasm_bindgen]
#[derive(Default)]
pub struct SpatialTree2D {
    nodes: Vec<Node2f>,
    count: usize,
}

#[wasm_bindgen]
impl SpatialTree2D {
    #[wasm_bindgen(constructor)]
    pub fn new() -> SpatialTree2D {
        SpatialTree2D::default()
    }

    #[wasm_bindgen(getter)]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Rebuilds the tree over leaves given as `[min_x, min_y, max_x, max_y]` records.
    pub fn set_leaves(&mut self, bounds: &[f32]) -> Result<(), JsValue> {
        let bounds = parse_bounds::<2>(bounds)?;
        self.rebuild(&bounds)
    }

    /// Rebuilds the tree over `count` random squares of half size up to `size` in
    /// `[0, extent)^2`.
    pub fn random_leaves(&mut self, count: usize, extent: f32, size: f32) -> Result<(), JsValue> {
        let mut rng = StdRng::seed_from_u64(get_seed());
        let bounds: Vec<BoundingBox<2>> = (0..count)
            .map(|_| {
                let center = [rng.r#gen::<f32>() * extent, rng.r#gen::<f32>() * extent];
                BoundingBox::around(center, rng.r#gen::<f32>() * size)
            })
            .collect();
        self.rebuild(&bounds)
    }

    /// Moves leaf `index` and refits the tree without rebuilding it.
    pub fn move_leaf(&mut self, index: usize, min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Result<(), JsValue> {
        if index >= self.count {
            return Err(JsValue::from_str("leaf index out of range"));
        }
        self.nodes[self.count + index].bound = BoundingBox::new([min_x, min_y], [max_x, max_y]);
        spatial::optimize(&mut self.nodes, self.count).map_err(to_js)
    }

    pub fn intersect_rect(&self, min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Vec<u32> {
        self.collect(&BoundRect::new([min_x, min_y], [max_x, max_y]))
    }

    pub fn intersect_circle(&self, x: f32, y: f32, radius: f32) -> Vec<u32> {
        self.collect(&BoundCircle::new([x, y], radius))
    }

    pub fn closest(&self, x: f32, y: f32) -> Option<u32> {
        spatial::closest_intersection(&[x, y], &self.nodes)
    }
}

impl SpatialTree2D {
    fn rebuild(&mut self, bounds: &[BoundingBox<2>]) -> Result<(), JsValue> {
        let count = bounds.len();
        self.nodes = vec![Node2f::default(); (count * 2).max(1)];
        for (leaf, bound) in self.nodes[count..].iter_mut().zip(bounds) {
            *leaf = Node2f::leaf(*bound);
        }
        self.count = count;
        spatial::create(&mut self.nodes, count).map_err(to_js)
    }

    fn collect<S: crate::bounds::QueryShape<2>>(&self, shape: &S) -> Vec<u32> {
        let mut out = Vec::new();
        spatial::for_each_intersection(shape, &self.nodes, |leaf| {
            out.push(leaf);
            true
        });
        out
    }
}
