//! Binary radix tree topology over sorted spatial keys (Karras 2012).
//!
//! These functions only look at the sorted key array, the sorted-to-original permutation and
//! the position of one internal node. The host builder and the device kernels both call them,
//! which is what keeps the two trees bit-identical.

use crate::bounds::BoundingBox;

/// Child indices of one internal node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Links {
    pub left: u32,
    pub right: u32,
}

/// Length of the common prefix of the keys at sorted positions `i` and `j`.
///
/// Equal keys are told apart by their positions, so every pair of leaves differs somewhere
/// and the tree stays binary. Positions outside the array yield `-1`.
pub(crate) fn delta(keys: &[u32], i: usize, j: isize) -> i32 {
    if j < 0 || j as usize >= keys.len() {
        return -1;
    }
    let j = j as usize;
    let (a, b) = (keys[i], keys[j]);
    if a == b {
        32 + ((i as u32) ^ (j as u32)).leading_zeros() as i32
    } else {
        (a ^ b).leading_zeros() as i32
    }
}

/// Sorted leaf range `(first, last)` covered by internal node `i`.
pub(crate) fn determine_range(keys: &[u32], i: usize) -> (usize, usize) {
    let ii = i as isize;
    let d: isize = if delta(keys, i, ii + 1) >= delta(keys, i, ii - 1) { 1 } else { -1 };

    let delta_min = delta(keys, i, ii - d);
    let mut l_max: isize = 2;
    while delta(keys, i, ii + l_max * d) > delta_min {
        l_max *= 2;
    }

    let mut l = 0;
    let mut t = l_max / 2;
    while t >= 1 {
        if delta(keys, i, ii + (l + t) * d) > delta_min {
            l += t;
        }
        t /= 2;
    }

    let j = (ii + l * d) as usize;
    (i.min(j), i.max(j))
}

/// Position of the last leaf of the left child of the node covering `first..=last`.
pub(crate) fn find_split(keys: &[u32], first: usize, last: usize) -> usize {
    let delta_node = delta(keys, first, last as isize);
    let mut split = first;
    let mut step = last - first;
    loop {
        step = step.div_ceil(2);
        let probe = split + step;
        if probe < last && delta(keys, first, probe as isize) > delta_node {
            split = probe;
        }
        if step <= 1 {
            break;
        }
    }
    split
}

/// Children of internal node `i`.
///
/// `order[p]` is the original index of the leaf at sorted position `p`; leaf nodes live at
/// `count + original index`. A single leaf hangs off both sides of the root.
pub(crate) fn internal_links(keys: &[u32], order: &[u32], i: usize) -> Links {
    let count = keys.len() as u32;
    if count == 1 {
        return Links { left: 1, right: 1 };
    }

    let (first, last) = determine_range(keys, i);
    let split = find_split(keys, first, last);

    let left = if split == first {
        count + order[split]
    } else {
        split as u32
    };
    let right = if split + 1 == last {
        count + order[split + 1]
    } else {
        split as u32 + 1
    };
    Links { left, right }
}

/// Number of refit levels that covers every internal node of a tree over `count` leaves.
///
/// The common prefix length grows strictly from a node to its internal children, and keys
/// of `key_bits` bits plus positions of `index_bits` bits leave that many distinct lengths.
pub(crate) fn max_levels(count: usize, key_bits: u32) -> usize {
    if count <= 1 {
        return count;
    }
    let index_bits = usize::BITS - (count - 1).leading_zeros();
    (count - 1).min((key_bits + index_bits) as usize)
}

/// Bound of the projected centers of `bounds`.
pub(crate) fn centers_bound<'a, const D: usize>(
    bounds: impl Iterator<Item = &'a BoundingBox<D>>,
) -> BoundingBox<3> {
    let mut out = BoundingBox::empty();
    for bound in bounds {
        out.expand_point(&crate::hash::project(&bound.center()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Leaves reachable from the root, sorted.
    fn leaves_of(keys: &[u32]) -> Vec<u32> {
        let n = keys.len() as u32;
        let order: Vec<u32> = (0..n).collect();
        let mut seen = Vec::new();
        let mut stack = vec![0u32];
        while let Some(node) = stack.pop() {
            let links = internal_links(keys, &order, node as usize);
            for child in [links.left, links.right] {
                if child < n {
                    stack.push(child);
                } else {
                    seen.push(child - n);
                }
            }
            assert!(seen.len() <= n as usize);
        }
        seen.sort_unstable();
        seen
    }

    #[test]
    fn test_paper_example() {
        // Keys from figure 3 of the paper.
        let keys = [0b00001, 0b00010, 0b00100, 0b00101, 0b10011, 0b11000, 0b11001, 0b11110];
        let order: Vec<u32> = (0..8).collect();

        assert_eq!(determine_range(&keys, 0), (0, 7));
        assert_eq!(find_split(&keys, 0, 7), 3);
        assert_eq!(internal_links(&keys, &order, 0), Links { left: 3, right: 4 });
        assert_eq!(internal_links(&keys, &order, 3), Links { left: 1, right: 2 });
        assert_eq!(internal_links(&keys, &order, 1), Links { left: 8, right: 9 });
        assert_eq!(internal_links(&keys, &order, 4), Links { left: 12, right: 5 });
        assert_eq!(internal_links(&keys, &order, 5), Links { left: 6, right: 15 });
        assert_eq!(internal_links(&keys, &order, 6), Links { left: 13, right: 14 });
    }

    #[test]
    fn test_duplicate_keys_still_form_a_tree() {
        assert_eq!(leaves_of(&[7; 9]), (0..9).collect::<Vec<_>>());
        assert_eq!(leaves_of(&[1, 1, 2, 2, 2, 3, 9, 9]), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_two_leaves() {
        assert_eq!(internal_links(&[5, 9], &[1, 0], 0), Links { left: 3, right: 2 });
        assert_eq!(internal_links(&[4], &[0], 0), Links { left: 1, right: 1 });
    }

    #[test]
    fn test_max_levels() {
        assert_eq!(max_levels(0, 30), 0);
        assert_eq!(max_levels(1, 30), 1);
        assert_eq!(max_levels(2, 30), 1);
        assert_eq!(max_levels(1 << 20, 30), 50);
    }
}
