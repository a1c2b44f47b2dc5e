//! # spatree
//!
//! `spatree` builds linear bounding volume hierarchies (LBVH) the way a GPU does: leaf bounds
//! are hashed onto a Morton curve, the keys are ordered by a radix sort driven by parallel
//! prefix scans, and a binary radix tree is linked over the sorted keys in one parallel pass.
//! The result is a flat node array that answers shape and nearest-leaf queries.
//!
//! ## Features
//!
//! - **Compute building blocks**: [`PrefixScan`] and [`RadixSort`] (single or segmented) run
//!   as passes on a [`Device`], separated by barriers and spread over the rayon pool.
//! - **Device trees**: [`SpatialTree`] builds one tree or a batch of trees from leaf bounds in
//!   a node buffer and refits them after the leaves move.
//! - **Host trees**: the [`spatial`] module builds the same trees single threaded over
//!   `Node<D>` arrays for 2, 3 and 4 dimensions.
//! - **Queries**: intersection with rectangles, boxes, circles and spheres, and closest leaf
//!   search, over host and device trees alike.
//! - **WASM-first**: 2D and 3D trees are exported with `wasm-bindgen`.
//!
//! ## Example
//!
//! ```
//! use spatree::{BoundingBox, Device, HashMode, SpatialConfig, SpatialTree, spatial};
//!
//! let device = Device::default();
//! let tree = SpatialTree::from_config(&device, &SpatialConfig::default()).unwrap();
//!
//! let bounds: Vec<_> = (0..100).map(|i| BoundingBox::around([i as f32, 0.0, 0.0], 0.25)).collect();
//! let nodes_buffer = device.create_buffer(SpatialTree::node_words(bounds.len())).unwrap();
//! SpatialTree::write_leaves(&device, &nodes_buffer, 0, &bounds).unwrap();
//!
//! let mut compute = device.create_compute();
//! tree.dispatch(&mut compute, HashMode::XYZ10, &nodes_buffer, 0, bounds.len()).unwrap();
//!
//! let nodes = SpatialTree::read_nodes(&device, &nodes_buffer, 0, bounds.len()).unwrap();
//! assert_eq!(spatial::closest_intersection(&[41.9, 0.0, 0.0], &nodes), Some(42));
//! ```

pub mod bounds;
pub mod config;
pub mod device;
pub mod error;
pub mod hash;
pub mod prefix_scan;
pub mod radix_sort;
pub mod spatial;
pub mod spatial_tree;
pub mod wasm;

pub use bounds::BoundingBox;
pub use config::SpatialConfig;
pub use device::{Buffer, Compute, Device, DeviceFeatures};
pub use error::{Error, Result};
pub use hash::HashMode;
pub use prefix_scan::{PrefixScan, ScanMode};
pub use radix_sort::{RadixSort, SortMode};
pub use spatial::{Node, Node2f, Node3f, Node4f, SpatialNode};
pub use spatial_tree::{SpatialTree, TreeMode, TreeNode, TreeRange};
