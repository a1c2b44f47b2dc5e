use super::SpatialNode;
use crate::bounds::{QueryShape, distance_sq};
use std::cmp::Ordering;

/// Calls `visit` with every leaf whose bound overlaps `shape`, until it returns `false`.
///
/// Subtrees whose bound misses the shape are skipped. Within a node the left side is
/// reported before the right side.
pub fn for_each_intersection<const D: usize, S, N, F>(shape: &S, nodes: &[N], mut visit: F)
where
    S: QueryShape<D>,
    N: SpatialNode<D>,
    F: FnMut(u32) -> bool,
{
    let Some(root) = nodes.first() else {
        return;
    };
    let spatial = root.spatial();
    if spatial == 0 {
        return;
    }

    let mut stack = vec![0u32];
    while let Some(index) = stack.pop() {
        let Some(node) = nodes.get(index as usize) else {
            continue;
        };
        if !shape.overlaps(&node.bound()) {
            continue;
        }

        let (left, right) = (node.left(), node.right());
        let mut internal = [None; 2];
        for (slot, child) in [left, right].into_iter().enumerate() {
            if slot == 1 && child == left {
                break;
            }
            if child < spatial {
                internal[slot] = Some(child);
            } else if let Some(leaf) = nodes.get(child as usize) {
                if shape.overlaps(&leaf.bound()) && !visit(child - spatial) {
                    return;
                }
            }
        }
        stack.extend(internal.into_iter().rev().flatten());
    }
}

/// Writes the leaves overlapping `shape` into `out` and returns how many were written.
///
/// The search stops once `out` is full. Overlap is inclusive and nested bounds all count:
/// a small circle inside two nested boxes reports both leaves, not only the innermost one.
pub fn intersection<const D: usize, S, N>(shape: &S, nodes: &[N], out: &mut [u32]) -> usize
where
    S: QueryShape<D>,
    N: SpatialNode<D>,
{
    if out.is_empty() {
        return 0;
    }
    let mut found = 0;
    for_each_intersection(shape, nodes, |leaf| {
        out[found] = leaf;
        found += 1;
        found < out.len()
    });
    found
}

/// Leaf whose bound center is closest to `point`, `None` for an empty tree.
///
/// Equally distant centers are ranked by the distance from `point` to the leaf bound, then by
/// leaf index. Subtrees are visited nearest first and skipped once their bound is farther away
/// than the best center found so far.
pub fn closest_intersection<const D: usize, N>(point: &[f32; D], nodes: &[N]) -> Option<u32>
where
    N: SpatialNode<D>,
{
    let root = nodes.first()?;
    let spatial = root.spatial();
    if spatial == 0 {
        return None;
    }

    let mut best: Option<Candidate> = None;
    let mut stack = vec![(0u32, root.bound().distance_sq(point))];
    while let Some((index, lower)) = stack.pop() {
        if best.is_some_and(|b| lower > b.center) {
            continue;
        }
        let Some(node) = nodes.get(index as usize) else {
            continue;
        };

        let (left, right) = (node.left(), node.right());
        let mut internal: Vec<(u32, f32)> = Vec::with_capacity(2);
        for (slot, child) in [left, right].into_iter().enumerate() {
            if slot == 1 && child == left {
                break;
            }
            let Some(child_node) = nodes.get(child as usize) else {
                continue;
            };
            let bound = child_node.bound();
            if child < spatial {
                internal.push((child, bound.distance_sq(point)));
                continue;
            }
            let candidate = Candidate {
                center: distance_sq(point, &bound.center()),
                bound: bound.distance_sq(point),
                leaf: child - spatial,
            };
            if best.is_none_or(|b| candidate.cmp(&b) == Ordering::Less) {
                best = Some(candidate);
            }
        }

        // Nearest child on top of the stack.
        internal.sort_by(|a, b| b.1.total_cmp(&a.1));
        stack.extend(internal);
    }
    best.map(|b| b.leaf)
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    center: f32,
    bound: f32,
    leaf: u32,
}

impl Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.center
            .total_cmp(&other.center)
            .then(self.bound.total_cmp(&other.bound))
            .then(self.leaf.cmp(&other.leaf))
    }
}
