//! Host-side spatial trees over flat node arrays.
//!
//! A tree over `N` leaves lives in `2N` nodes. Slots `[0, N)` hold the internal nodes with the
//! root at `0`, slots `[N, 2N)` hold the leaves in their original order. The caller fills in
//! the leaf bounds and [`create`] links everything else.
//!
//! Every node stores `spatial == N`, so a child index below `spatial` is an internal node and
//! any other child index is the leaf `child - spatial`. With `N >= 2` there are `N - 1` internal
//! nodes and slot `N - 1` stays unused. A single leaf is linked from both sides of the root,
//! and a tree without leaves has a root with `spatial == 0`.
//!
//! ```
//! use spatree::bounds::{BoundCircle, BoundingBox};
//! use spatree::spatial::{self, Node2f};
//!
//! let mut nodes = vec![Node2f::default(); 4];
//! nodes[2] = Node2f::leaf(BoundingBox::new([-1.0, -1.0], [1.0, 1.0]));
//! nodes[3] = Node2f::leaf(BoundingBox::new([5.0, 5.0], [6.0, 6.0]));
//! spatial::create(&mut nodes, 2).unwrap();
//!
//! let mut hits = [0u32; 2];
//! let found = spatial::intersection(&BoundCircle::new([0.0, 0.0], 0.5), &nodes, &mut hits);
//! assert_eq!(&hits[..found], &[0]);
//! assert_eq!(spatial::closest_intersection(&[5.5, 5.0], &nodes), Some(1));
//! ```

pub(crate) mod build;
mod query;

pub use query::{closest_intersection, for_each_intersection, intersection};

use crate::bounds::BoundingBox;
use crate::error::{Error, Result};
use crate::hash::{HashMode, SpatialHash, project};
use crate::radix_sort::sort_pairs;

/// Read access to the fields traversal needs, shared by host and device node layouts.
pub trait SpatialNode<const D: usize> {
    fn bound(&self) -> BoundingBox<D>;
    fn left(&self) -> u32;
    fn right(&self) -> u32;
    fn parent(&self) -> u32;
    /// Leaf count of the tree the node belongs to.
    fn spatial(&self) -> u32;
}

/// Tree node with a `D` dimensional bound.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Node<const D: usize> {
    pub bound: BoundingBox<D>,
    pub left: u32,
    pub right: u32,
    pub parent: u32,
    pub spatial: u32,
}

pub type Node2f = Node<2>;
pub type Node3f = Node<3>;
pub type Node4f = Node<4>;

impl<const D: usize> Default for Node<D> {
    fn default() -> Self {
        Self {
            bound: BoundingBox::empty(),
            left: 0,
            right: 0,
            parent: 0,
            spatial: 0,
        }
    }
}

impl<const D: usize> Node<D> {
    /// A leaf node with the given bound, links are set by [`create`].
    pub fn leaf(bound: BoundingBox<D>) -> Self {
        Self {
            bound,
            ..Self::default()
        }
    }
}

impl<const D: usize> SpatialNode<D> for Node<D> {
    #[inline]
    fn bound(&self) -> BoundingBox<D> {
        self.bound
    }
    #[inline]
    fn left(&self) -> u32 {
        self.left
    }
    #[inline]
    fn right(&self) -> u32 {
        self.right
    }
    #[inline]
    fn parent(&self) -> u32 {
        self.parent
    }
    #[inline]
    fn spatial(&self) -> u32 {
        self.spatial
    }
}

/// Number of internal nodes in a tree over `count` leaves.
pub fn internal_count(count: usize) -> usize {
    count.saturating_sub(1)
}

/// Hash used by [`create`]: 16 bits per axis in the plane, 10 bits over three axes otherwise.
pub fn default_hash_mode<const D: usize>() -> HashMode {
    if D == 2 { HashMode::XY16 } else { HashMode::XYZ10 }
}

/// Builds the tree over the leaf bounds in `nodes[count..2 * count]` and fits all bounds.
pub fn create<const D: usize>(nodes: &mut [Node<D>], count: usize) -> Result<()> {
    create_with(nodes, count, default_hash_mode::<D>())
}

/// Like [`create`] with an explicit spatial hash. Trees with more than three axes are
/// hashed over the first three.
pub fn create_with<const D: usize>(nodes: &mut [Node<D>], count: usize, mode: HashMode) -> Result<()> {
    check_len(nodes.len(), count)?;
    if count == 0 {
        if let Some(root) = nodes.first_mut() {
            *root = Node::default();
        }
        return Ok(());
    }

    let leaves = count..count * 2;
    let hash = SpatialHash::new(mode, &build::centers_bound(nodes[leaves.clone()].iter().map(|n| &n.bound)));
    let keys: Vec<u32> = nodes[leaves.clone()]
        .iter()
        .map(|n| hash.key(&project(&n.bound.center())))
        .collect();
    let indices: Vec<u32> = (0..count as u32).collect();
    let (keys, order) = sort_pairs(&keys, &indices, mode.key_bits());

    let spatial = count as u32;
    for (i, leaf) in nodes[leaves].iter_mut().enumerate() {
        leaf.left = spatial + i as u32;
        leaf.right = leaf.left;
        leaf.spatial = spatial;
    }

    nodes[0].parent = 0;
    for i in 0..internal_count(count).max(1) {
        let links = build::internal_links(&keys, &order, i);
        let node = &mut nodes[i];
        node.left = links.left;
        node.right = links.right;
        node.spatial = spatial;
        nodes[links.left as usize].parent = i as u32;
        nodes[links.right as usize].parent = i as u32;
    }
    if count >= 2 {
        nodes[count - 1] = Node {
            spatial,
            ..Node::default()
        };
    }

    tracing::trace!(count, ?mode, "created spatial tree");
    optimize(nodes, count)
}

/// Refits the bounds of all internal nodes to their children, leaves to root.
///
/// The topology from the last [`create`] is kept, so this is the cheap update after leaf
/// bounds moved.
pub fn optimize<const D: usize>(nodes: &mut [Node<D>], count: usize) -> Result<()> {
    check_len(nodes.len(), count)?;
    if count == 0 {
        return Ok(());
    }

    let spatial = count as u32;
    let end = (count * 2) as u32;
    let mut stack = vec![(0u32, false)];
    while let Some((index, visited)) = stack.pop() {
        let node = nodes[index as usize];
        if node.left >= end || node.right >= end {
            return Err(Error::OutOfBounds {
                offset: index as usize,
                end: node.left.max(node.right) as usize + 1,
                len: end as usize,
            });
        }
        if visited {
            nodes[index as usize].bound = nodes[node.left as usize].bound.union(&nodes[node.right as usize].bound);
            continue;
        }
        stack.push((index, true));
        if node.right < spatial {
            stack.push((node.right, false));
        }
        if node.left < spatial && node.left != node.right {
            stack.push((node.left, false));
        }
    }
    Ok(())
}

fn check_len(len: usize, count: usize) -> Result<()> {
    let end = count.saturating_mul(2);
    if end > u32::MAX as usize {
        return Err(Error::Capacity {
            count,
            capacity: u32::MAX as usize / 2,
        });
    }
    if len < end {
        return Err(Error::OutOfBounds { offset: 0, end, len });
    }
    Ok(())
}
