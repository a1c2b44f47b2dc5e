//! Linear bounding volume hierarchy built in compute passes.
//!
//! # Pipeline
//!
//! The caller stores the leaf bounds of a tree over `N` leaves in nodes `[N, 2N)` of the node
//! buffer (see [`SpatialTree::write_leaves`]) and dispatches the build:
//! 1. `tree_centers` and `tree_centers_reduce` find the bound of all leaf centers.
//! 2. `tree_hash` fits the spatial hash to that bound and writes one key per leaf.
//! 3. the [`RadixSort`] orders the `(key, leaf)` pairs.
//! 4. `tree_topology` links every internal node from the sorted keys.
//! 5. `tree_depth` and one `tree_refit` pass per level fit the bounds, deepest level first.
//!
//! The node layout and the topology are the same as in [`crate::spatial`], so a node buffer read
//! back with [`SpatialTree::read_nodes`] can be queried on the host directly.

use crate::bounds::BoundingBox;
use crate::config::SpatialConfig;
use crate::device::{Buffer, Compute, Device, Pass, group_count};
use crate::error::{Error, Result};
use crate::hash::{HashMode, SpatialHash};
use crate::prefix_scan::check_group_size;
use crate::radix_sort::{RadixSort, SortMode};
use crate::spatial::{SpatialNode, build};
use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Whether a builder makes one tree or a batch of independent trees per dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeMode {
    #[default]
    Single,
    /// Enables [`SpatialTree::dispatch_batch`].
    Multiple,
}

/// Node record of a device tree, 48 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TreeNode {
    pub bound_min: [f32; 3],
    pub left: u32,
    pub bound_max: [f32; 3],
    pub right: u32,
    pub parent: u32,
    pub spatial: u32,
    pub padding: [u32; 2],
}

/// Size of a [`TreeNode`] in buffer words.
pub const NODE_WORDS: usize = size_of::<TreeNode>() / size_of::<u32>();

impl TreeNode {
    pub fn leaf(bound: &BoundingBox<3>) -> Self {
        let mut node = Self::default();
        node.set_bound(bound);
        node
    }

    pub fn bounding_box(&self) -> BoundingBox<3> {
        BoundingBox::new(self.bound_min, self.bound_max)
    }

    pub fn set_bound(&mut self, bound: &BoundingBox<3>) {
        self.bound_min = bound.min;
        self.bound_max = bound.max;
    }
}

impl SpatialNode<3> for TreeNode {
    #[inline]
    fn bound(&self) -> BoundingBox<3> {
        self.bounding_box()
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

/// Location of one tree in a node buffer: `2 * count` nodes starting at node `offset`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeRange {
    pub offset: usize,
    pub count: usize,
}

impl TreeRange {
    pub fn new(offset: usize, count: usize) -> Self {
        Self { offset, count }
    }
}

/// Tree builder with scratch buffers sized for `max_elements` leaves.
#[derive(Debug)]
pub struct SpatialTree {
    mode: TreeMode,
    group_size: u32,
    max_elements: usize,
    max_blocks: usize,
    radix_sort: RadixSort,
    /// Keys in `[0, max_elements)`, leaf indices in `[max_elements, 2 * max_elements)`.
    sort_buffer: Buffer,
    /// Bound of the leaf centers, six words per block.
    block_bounds: Buffer,
    /// Bound of the leaf centers, six words per tree.
    tree_bounds: Buffer,
    /// Depth of every internal node.
    depths: Buffer,
}

#[derive(Clone, Copy, Debug)]
struct Tree {
    /// First word of the tree in the node buffer.
    nodes: usize,
    count: usize,
    /// Position of the tree's leaves in the packed sort layout.
    base: usize,
    first_block: usize,
    blocks: usize,
}

#[derive(Clone, Copy, Debug)]
struct Block {
    tree: usize,
    index: usize,
}

impl SpatialTree {
    /// Allocates the builder on top of `radix_sort`.
    ///
    /// [`TreeMode::Multiple`] needs a sorter in [`SortMode::Multiple`] and the sorter must hold
    /// at least `max_elements` pairs. A batch may hold up to `max_elements` trees of one leaf.
    pub fn create(
        device: &Device,
        mode: TreeMode,
        radix_sort: RadixSort,
        max_elements: usize,
        group_size: u32,
    ) -> Result<Self> {
        check_group_size(device, group_size)?;
        if mode == TreeMode::Multiple && radix_sort.mode() != SortMode::Multiple {
            return Err(Error::Config("batched trees need a segmented radix sort".into()));
        }
        if radix_sort.max_elements() < max_elements {
            return Err(Error::Config(format!(
                "radix sort holds {} elements, the tree needs {max_elements}",
                radix_sort.max_elements()
            )));
        }

        let max_elements = max_elements.max(1);
        let blocks = max_elements.div_ceil(group_size as usize);
        let max_blocks = match mode {
            TreeMode::Single => blocks,
            TreeMode::Multiple => blocks.saturating_add(max_elements),
        };

        let sort_buffer = device.create_buffer(max_elements.saturating_mul(2))?;
        let block_bounds = device.create_buffer(max_blocks.saturating_mul(6))?;
        let tree_bounds = device.create_buffer(max_blocks.saturating_mul(6))?;
        let depths = device.create_buffer(max_elements)?;

        tracing::debug!(?mode, max_elements, group_size, max_blocks, "created spatial tree");
        Ok(Self {
            mode,
            group_size,
            max_elements,
            max_blocks,
            radix_sort,
            sort_buffer,
            block_bounds,
            tree_bounds,
            depths,
        })
    }

    /// Builds the prefix scan, radix sort and tree stack described by `config`.
    pub fn from_config(device: &Device, config: &SpatialConfig) -> Result<Self> {
        config.validate(device.features())?;
        let radix_sort = RadixSort::create(
            device,
            config.sort_mode,
            config.max_elements,
            config.group_size,
            config.key_bits,
        )?;
        Self::create(device, config.tree_mode, radix_sort, config.max_elements, config.group_size)
    }

    pub fn mode(&self) -> TreeMode {
        self.mode
    }

    pub fn group_size(&self) -> u32 {
        self.group_size
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    pub fn radix_sort(&self) -> &RadixSort {
        &self.radix_sort
    }

    /// Words a node buffer needs for a tree over `count` leaves.
    pub fn node_words(count: usize) -> usize {
        count.saturating_mul(2 * NODE_WORDS)
    }

    /// Uploads leaf bounds into nodes `[offset + N, offset + 2N)` for `N = bounds.len()`.
    ///
    /// Only the bound words are written, so the links of an already built tree survive and
    /// [`SpatialTree::optimize`] can refit it.
    pub fn write_leaves(device: &Device, nodes_buffer: &Buffer, offset: usize, bounds: &[BoundingBox<3>]) -> Result<()> {
        let first = offset.saturating_add(bounds.len()).saturating_mul(NODE_WORDS);
        nodes_buffer.range(first, bounds.len().saturating_mul(NODE_WORDS))?;
        for (i, bound) in bounds.iter().enumerate() {
            let node = first + i * NODE_WORDS;
            device.write_buffer(nodes_buffer, node, &bound.min.map(f32::to_bits))?;
            device.write_buffer(nodes_buffer, node + 4, &bound.max.map(f32::to_bits))?;
        }
        Ok(())
    }

    /// Reads the `2 * count` nodes of the tree at node `offset` back to the host.
    pub fn read_nodes(device: &Device, nodes_buffer: &Buffer, offset: usize, count: usize) -> Result<Vec<TreeNode>> {
        let words = device.read_buffer(nodes_buffer, offset.saturating_mul(NODE_WORDS), Self::node_words(count))?;
        Ok(bytemuck::cast_slice::<u32, TreeNode>(&words).to_vec())
    }

    /// Builds the tree over the `count` leaves stored behind node `offset`.
    ///
    /// Nothing is dispatched for `count == 0`.
    pub fn dispatch(
        &self,
        compute: &mut Compute<'_>,
        hash_mode: HashMode,
        nodes_buffer: &Buffer,
        offset: usize,
        count: usize,
    ) -> Result<()> {
        self.build_trees(compute, hash_mode, nodes_buffer, &[TreeRange::new(offset, count)])
    }

    /// Builds every tree of `trees` in one set of passes.
    pub fn dispatch_batch(
        &self,
        compute: &mut Compute<'_>,
        hash_mode: HashMode,
        nodes_buffer: &Buffer,
        trees: &[TreeRange],
    ) -> Result<()> {
        if self.mode == TreeMode::Single {
            return Err(Error::Mode("single"));
        }
        self.build_trees(compute, hash_mode, nodes_buffer, trees)
    }

    /// Refits the internal bounds of an already built tree after its leaves moved.
    pub fn optimize(&self, compute: &mut Compute<'_>, nodes_buffer: &Buffer, offset: usize, count: usize) -> Result<()> {
        let (trees, blocks) = self.plan(nodes_buffer, &[TreeRange::new(offset, count)])?;
        if trees.is_empty() {
            return Ok(());
        }
        self.refit(compute, nodes_buffer, &trees, &blocks, u32::BITS)
    }

    fn build_trees(&self, compute: &mut Compute<'_>, hash_mode: HashMode, nodes_buffer: &Buffer, ranges: &[TreeRange]) -> Result<()> {
        let key_bits = hash_mode.key_bits();
        if key_bits > self.radix_sort.key_bits() {
            return Err(Error::Config(format!(
                "{hash_mode:?} keys have {key_bits} bits, the radix sort orders {}",
                self.radix_sort.key_bits()
            )));
        }

        let (trees, blocks) = self.plan(nodes_buffer, ranges)?;
        if trees.is_empty() {
            return Ok(());
        }
        tracing::trace!(trees = trees.len(), blocks = blocks.len(), ?hash_mode, "building spatial trees");

        self.hash(compute, hash_mode, nodes_buffer, &trees, &blocks)?;

        let max = self.max_elements;
        if trees.len() == 1 {
            let tree = &trees[0];
            self.radix_sort
                .dispatch_bits(compute, &self.sort_buffer, tree.base, max + tree.base, tree.count, key_bits)?;
        } else {
            let keys: Vec<usize> = trees.iter().map(|t| t.base).collect();
            let data: Vec<usize> = trees.iter().map(|t| max + t.base).collect();
            let sizes: Vec<usize> = trees.iter().map(|t| t.count).collect();
            self.radix_sort
                .dispatch_segments_bits(compute, &self.sort_buffer, &keys, &data, &sizes, key_bits)?;
        }

        self.topology(compute, nodes_buffer, &trees, &blocks)?;
        self.refit(compute, nodes_buffer, &trees, &blocks, key_bits)
    }

    /// Checks the tree ranges and splits the non-empty trees into blocks of `group_size` leaves.
    fn plan(&self, nodes_buffer: &Buffer, ranges: &[TreeRange]) -> Result<(Vec<Tree>, Vec<Block>)> {
        let count = ranges.iter().fold(0usize, |sum, r| sum.saturating_add(r.count));
        if count > self.max_elements {
            tracing::warn!(count, max_elements = self.max_elements, "spatial tree over capacity");
            return Err(Error::Capacity {
                count,
                capacity: self.max_elements,
            });
        }

        let mut trees = Vec::with_capacity(ranges.len());
        let mut blocks = Vec::new();
        let mut base = 0;
        for range in ranges.iter().filter(|r| r.count > 0) {
            let words = nodes_buffer.range(range.offset.saturating_mul(NODE_WORDS), Self::node_words(range.count))?;
            let count = group_count(range.count, self.group_size) as usize;
            let tree = trees.len();
            blocks.extend((0..count).map(|index| Block { tree, index }));
            trees.push(Tree {
                nodes: words.start,
                count: range.count,
                base,
                first_block: blocks.len() - count,
                blocks: count,
            });
            base += range.count;
        }

        // Only reachable when a batch plan runs on a single mode builder.
        if blocks.len() > self.max_blocks {
            tracing::warn!(blocks = blocks.len(), max_blocks = self.max_blocks, "spatial tree batch needs too many blocks");
            return Err(Error::Mode("single"));
        }
        Ok((trees, blocks))
    }

    fn hash(&self, compute: &mut Compute<'_>, hash_mode: HashMode, nodes_buffer: &Buffer, trees: &[Tree], blocks: &[Block]) -> Result<()> {
        let group_size = self.group_size as usize;
        let groups = blocks.len() as u32;

        compute.dispatch(Pass::new("tree_centers", groups).read(nodes_buffer).write(&self.block_bounds), |range| {
            let range = range.start as usize..range.end as usize;
            let words = nodes_buffer.read();
            let bounds: Vec<BoundingBox<3>> = blocks[range.clone()]
                .par_iter()
                .map(|block| {
                    let tree = &trees[block.tree];
                    let nodes = tree.view(&words);
                    let mut bound = BoundingBox::empty();
                    for i in block.span(tree, group_size) {
                        bound.expand_point(&nodes[tree.count + i].bounding_box().center());
                    }
                    bound
                })
                .collect();

            let mut out = self.block_bounds.write();
            for (index, bound) in range.zip(bounds) {
                store_bound(&mut out[index * 6..index * 6 + 6], &bound);
            }
        })?;
        compute.barrier(&self.block_bounds);

        compute.dispatch(
            Pass::new("tree_centers_reduce", trees.len() as u32).read(&self.block_bounds).write(&self.tree_bounds),
            |range| {
                let block_bounds = self.block_bounds.read();
                let mut out = self.tree_bounds.write();
                for t in range.start as usize..range.end as usize {
                    let tree = &trees[t];
                    let bound = (tree.first_block..tree.first_block + tree.blocks)
                        .map(|b| load_bound(&block_bounds[b * 6..b * 6 + 6]))
                        .fold(BoundingBox::empty(), |acc, b| acc.union(&b));
                    store_bound(&mut out[t * 6..t * 6 + 6], &bound);
                }
            },
        )?;
        compute.barrier(&self.tree_bounds);

        let max = self.max_elements;
        compute.dispatch(
            Pass::new("tree_hash", groups).read(nodes_buffer).read(&self.tree_bounds).write(&self.sort_buffer),
            |range| {
                let range = range.start as usize..range.end as usize;
                let words = nodes_buffer.read();
                let tree_bounds = self.tree_bounds.read();
                let keys: Vec<Vec<(usize, u32, u32)>> = blocks[range]
                    .par_iter()
                    .map(|block| {
                        let t = block.tree;
                        let tree = &trees[t];
                        let nodes = tree.view(&words);
                        let hash = SpatialHash::new(hash_mode, &load_bound(&tree_bounds[t * 6..t * 6 + 6]));
                        block
                            .span(tree, group_size)
                            .map(|i| {
                                let key = hash.key(&nodes[tree.count + i].bounding_box().center());
                                (tree.base + i, key, i as u32)
                            })
                            .collect()
                    })
                    .collect();

                let mut out = self.sort_buffer.write();
                for (slot, key, leaf) in keys.into_iter().flatten() {
                    out[slot] = key;
                    out[max + slot] = leaf;
                }
            },
        )?;
        compute.barrier(&self.sort_buffer);
        Ok(())
    }

    fn topology(&self, compute: &mut Compute<'_>, nodes_buffer: &Buffer, trees: &[Tree], blocks: &[Block]) -> Result<()> {
        let group_size = self.group_size as usize;
        let max = self.max_elements;

        compute.dispatch(
            Pass::new("tree_topology", blocks.len() as u32)
                .read(&self.sort_buffer)
                .read(nodes_buffer)
                .write(nodes_buffer),
            |range| {
                let range = range.start as usize..range.end as usize;
                let sorted = self.sort_buffer.read();
                let updates: Vec<(usize, Vec<Link>)> = blocks[range]
                    .par_iter()
                    .map(|block| {
                        let tree = &trees[block.tree];
                        let keys = &sorted[tree.base..tree.base + tree.count];
                        let order = &sorted[max + tree.base..max + tree.base + tree.count];
                        let internal = spatial_internal(tree.count);
                        let mut links = Vec::with_capacity(group_size * 2);
                        for i in block.span(tree, group_size) {
                            links.push(Link::Leaf(tree.count + i));
                            if i < internal {
                                links.push(Link::Internal(i, build::internal_links(keys, order, i)));
                            } else if i == tree.count - 1 {
                                links.push(Link::Unused(i));
                            }
                        }
                        (block.tree, links)
                    })
                    .collect();

                let mut words = nodes_buffer.write();
                for (t, links) in updates {
                    let tree = &trees[t];
                    let nodes = tree.view_mut(&mut words);
                    let spatial = tree.count as u32;
                    for link in links {
                        match link {
                            Link::Leaf(slot) => {
                                let node = &mut nodes[slot];
                                node.left = slot as u32;
                                node.right = slot as u32;
                                node.spatial = spatial;
                            }
                            Link::Internal(slot, links) => {
                                let node = &mut nodes[slot];
                                node.left = links.left;
                                node.right = links.right;
                                node.spatial = spatial;
                                if slot == 0 {
                                    node.parent = 0;
                                }
                                nodes[links.left as usize].parent = slot as u32;
                                nodes[links.right as usize].parent = slot as u32;
                            }
                            Link::Unused(slot) => {
                                let mut node = TreeNode::leaf(&BoundingBox::empty());
                                node.spatial = spatial;
                                nodes[slot] = node;
                            }
                        }
                    }
                }
            },
        )?;
        compute.barrier(nodes_buffer);
        Ok(())
    }

    fn refit(
        &self,
        compute: &mut Compute<'_>,
        nodes_buffer: &Buffer,
        trees: &[Tree],
        blocks: &[Block],
        key_bits: u32,
    ) -> Result<()> {
        let group_size = self.group_size as usize;
        let groups = blocks.len() as u32;

        compute.dispatch(Pass::new("tree_depth", groups).read(nodes_buffer).write(&self.depths), |range| {
            let range = range.start as usize..range.end as usize;
            let words = nodes_buffer.read();
            let depths: Vec<Vec<(usize, u32)>> = blocks[range]
                .par_iter()
                .map(|block| {
                    let tree = &trees[block.tree];
                    let nodes = tree.view(&words);
                    let internal = spatial_internal(tree.count);
                    block
                        .span(tree, group_size)
                        .map(|i| {
                            if i >= internal {
                                return (tree.base + i, u32::MAX);
                            }
                            let mut node = i;
                            let mut depth = 0;
                            while node != 0 && depth < tree.count {
                                node = nodes[node].parent as usize;
                                depth += 1;
                            }
                            (tree.base + i, depth as u32)
                        })
                        .collect()
                })
                .collect();

            let mut out = self.depths.write();
            for (slot, depth) in depths.into_iter().flatten() {
                out[slot] = depth;
            }
        })?;
        compute.barrier(&self.depths);

        let levels = trees
            .iter()
            .map(|t| build::max_levels(t.count, key_bits))
            .max()
            .unwrap_or(0);
        for level in (0..levels as u32).rev() {
            compute.dispatch(
                Pass::new("tree_refit", groups).read(&self.depths).read(nodes_buffer).write(nodes_buffer),
                |range| {
                    let range = range.start as usize..range.end as usize;
                    let depths = self.depths.read();
                    let mut words = nodes_buffer.write();
                    let view: &[u32] = &words;
                    let bounds: Vec<(usize, usize, BoundingBox<3>)> = blocks[range]
                        .par_iter()
                        .flat_map_iter(|block| {
                            let tree = &trees[block.tree];
                            let nodes = tree.view(view);
                            block
                                .span(tree, group_size)
                                .filter(|&i| depths[tree.base + i] == level)
                                .map(|i| {
                                    let node = &nodes[i];
                                    let left = nodes[node.left as usize].bounding_box();
                                    let right = nodes[node.right as usize].bounding_box();
                                    (block.tree, i, left.union(&right))
                                })
                                .collect::<Vec<_>>()
                        })
                        .collect();

                    for (t, i, bound) in bounds {
                        trees[t].view_mut(&mut words)[i].set_bound(&bound);
                    }
                },
            )?;
            compute.barrier(nodes_buffer);
        }
        Ok(())
    }
}

/// Writes into the node array of one tree.
#[derive(Clone, Copy, Debug)]
enum Link {
    Leaf(usize),
    Internal(usize, build::Links),
    Unused(usize),
}

/// Internal node slots in use, the root of a single leaf tree included.
fn spatial_internal(count: usize) -> usize {
    count.saturating_sub(1).max(count.min(1))
}

impl Tree {
    fn words(&self) -> Range<usize> {
        self.nodes..self.nodes + SpatialTree::node_words(self.count)
    }

    fn view<'a>(&self, words: &'a [u32]) -> &'a [TreeNode] {
        bytemuck::cast_slice(&words[self.words()])
    }

    fn view_mut<'a>(&self, words: &'a mut [u32]) -> &'a mut [TreeNode] {
        bytemuck::cast_slice_mut(&mut words[self.words()])
    }
}

impl Block {
    fn span(&self, tree: &Tree, group_size: usize) -> Range<usize> {
        let start = self.index * group_size;
        start..(start + group_size).min(tree.count)
    }
}

fn store_bound(out: &mut [u32], bound: &BoundingBox<3>) {
    for i in 0..3 {
        out[i] = bound.min[i].to_bits();
        out[3 + i] = bound.max[i].to_bits();
    }
}

fn load_bound(words: &[u32]) -> BoundingBox<3> {
    let mut bound = BoundingBox::empty();
    for i in 0..3 {
        bound.min[i] = f32::from_bits(words[i]);
        bound.max[i] = f32::from_bits(words[3 + i]);
    }
    bound
}
