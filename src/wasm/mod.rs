//! JavaScript bindings for 2D host trees and 3D device trees.

mod d2;
mod d3;

pub use d2::SpatialTree2D;
pub use d3::SpatialTree3D;

use crate::bounds::BoundingBox;
use crate::error::Error;
use wasm_bindgen::prelude::*;

#[cfg(target_arch = "wasm32")]
use wasm_bindgen_rayon::init_thread_pool;

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn init_threads(n: usize) -> js_sys::Promise {
    init_thread_pool(n)
}

pub(crate) fn to_js(err: Error) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// Splits `[min.., max..]` records of `2 * D` floats into boxes.
pub(crate) fn parse_bounds<const D: usize>(flat: &[f32]) -> Result<Vec<BoundingBox<D>>, JsValue> {
    if flat.len() % (2 * D) != 0 {
        return Err(JsValue::from_str(&format!(
            "leaf bounds need {} floats each, got {} floats",
            2 * D,
            flat.len()
        )));
    }
    Ok(flat
        .chunks_exact(2 * D)
        .map(|c| {
            let mut bound = BoundingBox::empty();
            bound.min.copy_from_slice(&c[..D]);
            bound.max.copy_from_slice(&c[D..]);
            bound
        })
        .collect())
}

pub(crate) fn get_seed() -> u64 {
    #[cfg(target_arch = "wasm32")]
    {
        (js_sys::Math::random() * 4294967296.0) as u64
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        123456789
    }
}
