use rand::prelude::*;
use rand::rngs::StdRng;
use spatree::spatial::{self, SpatialNode};
use spatree::{
    BoundingBox, Device, Error, HashMode, Node2f, Node3f, Node4f, RadixSort, SortMode, SpatialTree, TreeMode, TreeNode,
    TreeRange,
};

fn random_boxes<const D: usize>(rng: &mut StdRng, count: usize, extent: f32) -> Vec<BoundingBox<D>> {
    (0..count)
        .map(|_| {
            let mut center = [0.0; D];
            for c in center.iter_mut() {
                *c = rng.r#gen::<f32>() * extent;
            }
            BoundingBox::around(center, rng.r#gen::<f32>())
        })
        .collect()
}

fn host_tree<const D: usize>(bounds: &[BoundingBox<D>]) -> Vec<spatree::Node<D>> {
    let count = bounds.len();
    let mut nodes = vec![spatree::Node::<D>::default(); (count * 2).max(1)];
    for (i, b) in bounds.iter().enumerate() {
        nodes[count + i] = spatree::Node::leaf(*b);
    }
    spatial::create(&mut nodes, count).unwrap();
    nodes
}

fn device_tree(device: &Device, tree: &SpatialTree, bounds: &[BoundingBox<3>]) -> Vec<TreeNode> {
    let nodes_buffer = device.create_buffer(SpatialTree::node_words(bounds.len()).max(1)).unwrap();
    SpatialTree::write_leaves(device, &nodes_buffer, 0, bounds).unwrap();
    let mut compute = device.create_compute();
    tree.dispatch(&mut compute, HashMode::XYZ10, &nodes_buffer, 0, bounds.len()).unwrap();
    SpatialTree::read_nodes(device, &nodes_buffer, 0, bounds.len()).unwrap()
}

/// Walks the tree from the root and checks links, parents and bounds on the way.
/// Returns how often every leaf was reached.
fn check_tree<const D: usize, N: SpatialNode<D>>(nodes: &[N], count: usize) -> Vec<usize> {
    let mut reached = vec![0; count];
    if count == 0 {
        return reached;
    }
    let spatial = count as u32;
    let mut internal_seen = 0;
    let mut stack = vec![0u32];
    while let Some(index) = stack.pop() {
        let node = &nodes[index as usize];
        assert_eq!(node.spatial(), spatial);
        internal_seen += 1;
        assert!(internal_seen <= count.saturating_sub(1).max(1), "cycle below node {}", index);

        let bound = node.bound();
        let fitted = nodes[node.left() as usize].bound().union(&nodes[node.right() as usize].bound());
        assert_eq!(bound, fitted, "node {} is not the union of its children", index);
        let children = if node.left() == node.right() {
            vec![node.left()]
        } else {
            vec![node.left(), node.right()]
        };
        for child in children {
            let child_node = &nodes[child as usize];
            assert_eq!(child_node.parent(), index);
            let child_bound = child_node.bound();
            for d in 0..D {
                assert!(bound.min[d] <= child_bound.min[d] && child_bound.max[d] <= bound.max[d]);
            }
            if child < spatial {
                stack.push(child);
            } else {
                reached[(child - spatial) as usize] += 1;
                assert_eq!(child_node.left(), child);
                assert_eq!(child_node.right(), child);
            }
        }
    }
    assert_eq!(internal_seen, count.saturating_sub(1).max(1));
    reached
}

#[test]
fn test_host_tree_reaches_every_leaf_once() {
    let mut rng = StdRng::seed_from_u64(1);
    for &count in &[1usize, 2, 3, 7, 64, 100, 1000] {
        let bounds = random_boxes::<3>(&mut rng, count, 100.0);
        let nodes = host_tree(&bounds);
        assert_eq!(check_tree::<3, _>(&nodes, count), vec![1; count], "count {}", count);
    }
}

#[test]
fn test_device_tree_reaches_every_leaf_once() {
    let device = Device::default();
    let sort = RadixSort::create(&device, SortMode::Single, 2000, 64, 32).unwrap();
    let tree = SpatialTree::create(&device, TreeMode::Single, sort, 2000, 64).unwrap();
    let mut rng = StdRng::seed_from_u64(2);
    for &count in &[1usize, 2, 3, 65, 500, 2000] {
        let bounds = random_boxes::<3>(&mut rng, count, 50.0);
        let nodes = device_tree(&device, &tree, &bounds);
        assert_eq!(check_tree::<3, _>(&nodes, count), vec![1; count], "count {}", count);
    }
}

#[test]
fn test_identical_centers() {
    // All keys collide, the topology falls back to leaf order.
    let bounds = vec![BoundingBox::around([1.0, 1.0, 1.0], 0.5); 33];
    let nodes = host_tree(&bounds);
    assert_eq!(check_tree::<3, _>(&nodes, 33), vec![1; 33]);

    let device = Device::default();
    let sort = RadixSort::create(&device, SortMode::Single, 33, 8, 32).unwrap();
    let tree = SpatialTree::create(&device, TreeMode::Single, sort, 33, 8).unwrap();
    let device_nodes = device_tree(&device, &tree, &bounds);
    assert_eq!(check_tree::<3, _>(&device_nodes, 33), vec![1; 33]);
}

#[test]
fn test_build_is_deterministic() {
    let mut rng = StdRng::seed_from_u64(3);
    let bounds = random_boxes::<3>(&mut rng, 777, 10.0);
    assert_eq!(host_tree(&bounds), host_tree(&bounds));

    let device = Device::default();
    let sort = RadixSort::create(&device, SortMode::Single, 777, 32, 32).unwrap();
    let tree = SpatialTree::create(&device, TreeMode::Single, sort, 777, 32).unwrap();
    let first = device_tree(&device, &tree, &bounds);
    let second = device_tree(&device, &tree, &bounds);
    assert_eq!(raw_words(&first), raw_words(&second));
}

fn raw_words(nodes: &[TreeNode]) -> Vec<u32> {
    nodes
        .iter()
        .flat_map(|n| {
            let mut words = Vec::with_capacity(12);
            words.extend(n.bound_min.map(f32::to_bits));
            words.push(n.left);
            words.extend(n.bound_max.map(f32::to_bits));
            words.extend([n.right, n.parent, n.spatial]);
            words
        })
        .collect()
}

#[test]
fn test_device_matches_host() {
    let device = Device::default();
    let sort = RadixSort::create(&device, SortMode::Single, 1500, 128, 32).unwrap();
    let tree = SpatialTree::create(&device, TreeMode::Single, sort, 1500, 128).unwrap();
    let mut rng = StdRng::seed_from_u64(4);
    let bounds = random_boxes::<3>(&mut rng, 1500, 1000.0);

    let device_nodes = device_tree(&device, &tree, &bounds);
    let host_nodes = host_tree(&bounds);
    for (i, (d, h)) in device_nodes.iter().zip(&host_nodes).enumerate() {
        assert_eq!((d.left, d.right, d.parent, d.spatial), (h.left, h.right, h.parent, h.spatial), "node {}", i);
        assert_eq!(d.bounding_box(), h.bound, "node {}", i);
    }
}

#[test]
fn test_batch_matches_single_builds() {
    let device = Device::default();
    let sizes = [40usize, 0, 1, 17, 300];
    let total: usize = sizes.iter().sum();
    let sort = RadixSort::create(&device, SortMode::Multiple, total, 16, 32).unwrap();
    let batch = SpatialTree::create(&device, TreeMode::Multiple, sort, total, 16).unwrap();
    let mut rng = StdRng::seed_from_u64(5);

    let mut ranges = Vec::new();
    let mut offset = 0;
    let nodes_buffer = device.create_buffer(SpatialTree::node_words(total)).unwrap();
    let mut all_bounds = Vec::new();
    for &count in &sizes {
        let bounds = random_boxes::<3>(&mut rng, count, 20.0);
        SpatialTree::write_leaves(&device, &nodes_buffer, offset, &bounds).unwrap();
        ranges.push(TreeRange::new(offset, count));
        offset += count * 2;
        all_bounds.push(bounds);
    }

    let mut compute = device.create_compute();
    batch.dispatch_batch(&mut compute, HashMode::XYZ10, &nodes_buffer, &ranges).unwrap();

    for (range, bounds) in ranges.iter().zip(&all_bounds) {
        let nodes = SpatialTree::read_nodes(&device, &nodes_buffer, range.offset, range.count).unwrap();
        let host = host_tree(bounds);
        for (d, h) in nodes.iter().zip(&host) {
            assert_eq!((d.left, d.right, d.parent, d.spatial), (h.left, h.right, h.parent, h.spatial));
            assert_eq!(d.bounding_box(), h.bound);
        }
    }
}

#[test]
fn test_optimize_keeps_topology() {
    let device = Device::default();
    let sort = RadixSort::create(&device, SortMode::Single, 200, 32, 32).unwrap();
    let tree = SpatialTree::create(&device, TreeMode::Single, sort, 200, 32).unwrap();
    let mut rng = StdRng::seed_from_u64(6);
    let mut bounds = random_boxes::<3>(&mut rng, 200, 10.0);

    let nodes_buffer = device.create_buffer(SpatialTree::node_words(200)).unwrap();
    SpatialTree::write_leaves(&device, &nodes_buffer, 0, &bounds).unwrap();
    let mut compute = device.create_compute();
    tree.dispatch(&mut compute, HashMode::XYZ10, &nodes_buffer, 0, 200).unwrap();
    let before = SpatialTree::read_nodes(&device, &nodes_buffer, 0, 200).unwrap();

    for b in bounds.iter_mut() {
        *b = BoundingBox::around(b.center().map(|c| c + 50.0), 0.25);
    }
    SpatialTree::write_leaves(&device, &nodes_buffer, 0, &bounds).unwrap();
    tree.optimize(&mut compute, &nodes_buffer, 0, 200).unwrap();
    let after = SpatialTree::read_nodes(&device, &nodes_buffer, 0, 200).unwrap();

    for (b, a) in before.iter().zip(&after) {
        assert_eq!((b.left, b.right, b.parent, b.spatial), (a.left, a.right, a.parent, a.spatial));
    }
    assert_eq!(check_tree::<3, _>(&after, 200), vec![1; 200]);
    let expected = bounds.iter().fold(BoundingBox::empty(), |acc, b| acc.union(b));
    assert_eq!(after[0].bounding_box(), expected);
}

#[test]
fn test_host_optimize_after_move() {
    let mut rng = StdRng::seed_from_u64(7);
    let bounds = random_boxes::<2>(&mut rng, 50, 10.0);
    let mut nodes = host_tree(&bounds);
    nodes[50 + 3].bound = BoundingBox::new([-100.0, -100.0], [-99.0, -99.0]);
    spatial::optimize(&mut nodes, 50).unwrap();
    assert_eq!(nodes[0].bound.min, [-100.0, -100.0]);
    assert_eq!(check_tree::<2, _>(&nodes, 50), vec![1; 50]);
}

#[test]
fn test_all_dimensions() {
    let mut rng = StdRng::seed_from_u64(8);
    let planar: Vec<Node2f> = host_tree(&random_boxes::<2>(&mut rng, 90, 5.0));
    assert_eq!(check_tree::<2, _>(&planar, 90), vec![1; 90]);
    let spatial_nodes: Vec<Node3f> = host_tree(&random_boxes::<3>(&mut rng, 90, 5.0));
    assert_eq!(check_tree::<3, _>(&spatial_nodes, 90), vec![1; 90]);
    let hyper: Vec<Node4f> = host_tree(&random_boxes::<4>(&mut rng, 90, 5.0));
    assert_eq!(check_tree::<4, _>(&hyper, 90), vec![1; 90]);
}

#[test]
fn test_empty_tree() {
    let nodes = host_tree::<3>(&[]);
    assert_eq!(nodes[0].spatial, 0);
    assert_eq!(spatial::closest_intersection(&[0.0, 0.0, 0.0], &nodes), None);
}

#[test]
fn test_builder_errors() {
    let device = Device::default();
    let single_sort = RadixSort::create(&device, SortMode::Single, 64, 16, 32).unwrap();
    assert!(matches!(
        SpatialTree::create(&device, TreeMode::Multiple, single_sort, 64, 16),
        Err(Error::Config(_))
    ));

    let small_sort = RadixSort::create(&device, SortMode::Single, 8, 16, 32).unwrap();
    assert!(matches!(
        SpatialTree::create(&device, TreeMode::Single, small_sort, 64, 16),
        Err(Error::Config(_))
    ));

    let sort = RadixSort::create(&device, SortMode::Single, 64, 16, 32).unwrap();
    let tree = SpatialTree::create(&device, TreeMode::Single, sort, 64, 16).unwrap();
    let nodes_buffer = device.create_buffer(SpatialTree::node_words(65)).unwrap();
    let mut compute = device.create_compute();
    assert_eq!(
        tree.dispatch(&mut compute, HashMode::XYZ10, &nodes_buffer, 0, 65),
        Err(Error::Capacity { count: 65, capacity: 64 })
    );
    assert_eq!(
        tree.dispatch_batch(&mut compute, HashMode::XYZ10, &nodes_buffer, &[TreeRange::new(0, 4)]),
        Err(Error::Mode("single"))
    );
    assert!(matches!(
        tree.dispatch(&mut compute, HashMode::XYZ10, &nodes_buffer, 200, 10),
        Err(Error::OutOfBounds { .. })
    ));
}

#[test]
fn test_batch_of_tiny_trees() {
    let device = Device::default();
    let sort = RadixSort::create(&device, SortMode::Multiple, 64, 8, 32).unwrap();
    let batch = SpatialTree::create(&device, TreeMode::Multiple, sort, 64, 8).unwrap();
    let mut rng = StdRng::seed_from_u64(9);

    for sizes in [vec![1usize; 64], vec![2; 32], (0..43).map(|i| 1 + i % 2).collect()] {
        let total: usize = sizes.iter().sum();
        let nodes_buffer = device.create_buffer(SpatialTree::node_words(total)).unwrap();
        let mut ranges = Vec::new();
        let mut all_bounds = Vec::new();
        let mut offset = 0;
        for &count in &sizes {
            let bounds = random_boxes::<3>(&mut rng, count, 5.0);
            SpatialTree::write_leaves(&device, &nodes_buffer, offset, &bounds).unwrap();
            ranges.push(TreeRange::new(offset, count));
            offset += count * 2;
            all_bounds.push(bounds);
        }

        let mut compute = device.create_compute();
        batch.dispatch_batch(&mut compute, HashMode::XYZ10, &nodes_buffer, &ranges).unwrap();
        for (range, bounds) in ranges.iter().zip(&all_bounds) {
            let nodes = SpatialTree::read_nodes(&device, &nodes_buffer, range.offset, range.count).unwrap();
            assert_eq!(check_tree::<3, _>(&nodes, range.count), vec![1; range.count]);
            for (d, h) in nodes.iter().zip(&host_tree(bounds)) {
                assert_eq!((d.left, d.right, d.parent, d.spatial), (h.left, h.right, h.parent, h.spatial));
                assert_eq!(d.bounding_box(), h.bound);
            }
        }
    }
}

#[test]
fn test_oversized_builders_fail_cleanly() {
    let device = Device::default();
    assert_eq!(SpatialTree::node_words(usize::MAX), usize::MAX);
    let sort = RadixSort::create(&device, SortMode::Single, 16, 8, 32).unwrap();
    assert!(matches!(
        SpatialTree::create(&device, TreeMode::Single, sort, 8, 1),
        Err(Error::GroupSize { .. })
    ));

    let mut nodes = vec![Node3f::default(); 4];
    assert!(matches!(
        spatial::create(&mut nodes, u32::MAX as usize),
        Err(Error::Capacity { .. })
    ));
}
