// bih_build.rs - bulk construction of a BIH over bounded primitives
//
// Longest-axis midpoint splits of the grid box, with the clip planes taken
// from the actual extents of each side. Large empty regions collapse into
// single-child BVH2 nodes.

use std::fmt;

use vmap_common::math::{fuzzy_eq, primary_axis, AaBox};

use crate::bih::{Bih, BihNode, MAX_STACK_SIZE};

/// Leaf histogram buckets: 0, 1, 2, 3, 4 and more than 4 objects.
const LEAF_BUCKETS: usize = 6;

// Leaves address their first object with 29 bits.
const MAX_PRIMITIVES: usize = 1 << 29;

#[derive(Debug, Clone)]
pub struct BuildStats {
    nodes: usize,
    leaves: usize,
    objects_sum: u64,
    objects_min: u32,
    objects_max: u32,
    depth_sum: u64,
    depth_min: u32,
    depth_max: u32,
    leaves_count_n: [usize; LEAF_BUCKETS],
    bvh2_count: usize,
}

impl Default for BuildStats {
    fn default() -> Self {
        Self {
            nodes: 0,
            leaves: 0,
            objects_sum: 0,
            objects_min: u32::MAX,
            objects_max: 0,
            depth_sum: 0,
            depth_min: u32::MAX,
            depth_max: 0,
            leaves_count_n: [0; LEAF_BUCKETS],
            bvh2_count: 0,
        }
    }
}

impl BuildStats {
    /// Every leaf counts, including the empty sides of split nodes that
    /// never got a slot in the tree.
    fn update_leaf(&mut self, depth: u32, objects: u32) {
        self.leaves += 1;
        self.depth_min = self.depth_min.min(depth);
        self.depth_max = self.depth_max.max(depth);
        self.depth_sum += depth as u64;
        self.objects_min = self.objects_min.min(objects);
        self.objects_max = self.objects_max.max(objects);
        self.objects_sum += objects as u64;
        self.leaves_count_n[(objects as usize).min(LEAF_BUCKETS - 1)] += 1;
    }

    pub fn nodes(&self) -> usize {
        self.nodes
    }

    pub fn leaves(&self) -> usize {
        self.leaves
    }

    pub fn bvh2_count(&self) -> usize {
        self.bvh2_count
    }

    pub fn total_objects(&self) -> u64 {
        self.objects_sum
    }

    pub fn max_objects(&self) -> u32 {
        self.objects_max
    }

    pub fn max_depth(&self) -> u32 {
        self.depth_max
    }

    /// Share of leaves holding `n` objects (the last bucket is "more than 4").
    pub fn leaf_percent(&self, n: usize) -> usize {
        if self.leaves == 0 {
            return 0;
        }
        100 * self.leaves_count_n[n.min(LEAF_BUCKETS - 1)] / self.leaves
    }
}

impl fmt::Display for BuildStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let leaves = self.leaves.max(1) as f32;
        let filled = (self.leaves - self.leaves_count_n[0]).max(1) as f32;
        writeln!(f, "Tree stats:")?;
        writeln!(f, "  * Nodes:          {}", self.nodes)?;
        writeln!(f, "  * Leaves:         {}", self.leaves)?;
        writeln!(f, "  * Objects: min    {}", if self.leaves > 0 { self.objects_min } else { 0 })?;
        writeln!(f, "             avg    {:.2}", self.objects_sum as f32 / leaves)?;
        writeln!(f, "           avg(n>0) {:.2}", self.objects_sum as f32 / filled)?;
        writeln!(f, "             max    {}", self.objects_max)?;
        writeln!(f, "  * Depth:   min    {}", if self.leaves > 0 { self.depth_min } else { 0 })?;
        writeln!(f, "             avg    {:.2}", self.depth_sum as f32 / leaves)?;
        writeln!(f, "             max    {}", self.depth_max)?;
        for n in 0..LEAF_BUCKETS {
            let label = if n == LEAF_BUCKETS - 1 { "N>4".to_string() } else { format!("N={}", n) };
            let prefix = if n == 0 { "  * Leaves w/: " } else { "               " };
            writeln!(f, "{}{}  {:3}%", prefix, label, self.leaf_percent(n))?;
        }
        let denom = (self.nodes + self.leaves).saturating_sub(2 * self.bvh2_count).max(1);
        write!(f, "  * BVH2 nodes:     {} ({:3}%)", self.bvh2_count, 100 * self.bvh2_count / denom)
    }
}

/// Scratch state for one build: per-primitive boxes, the index permutation
/// being partitioned and the node array as it grows.
pub struct BihBuilder {
    bounds: Vec<AaBox>,
    indices: Vec<u32>,
    max_prims: u32,
    overall: AaBox,
    tree: Vec<BihNode>,
    stats: BuildStats,
}

impl BihBuilder {
    pub fn new<T, F>(primitives: &[T], bounds_of: F, leaf_size: u32) -> Self
    where
        F: Fn(&T) -> AaBox,
    {
        assert!(primitives.len() < MAX_PRIMITIVES, "too many primitives for a BIH");

        let bounds: Vec<AaBox> = primitives.iter().map(bounds_of).collect();
        let mut overall = bounds.first().copied().unwrap_or_default();
        for b in &bounds {
            overall.merge(b);
        }

        Self {
            indices: (0..bounds.len() as u32).collect(),
            bounds,
            max_prims: leaf_size,
            overall,
            tree: Vec::new(),
            stats: BuildStats::default(),
        }
    }

    pub fn build(self) -> Bih {
        self.build_with_stats().0
    }

    pub fn build_with_stats(mut self) -> (Bih, BuildStats) {
        if self.bounds.is_empty() {
            return (Bih::default(), self.stats);
        }

        // root placeholder, overwritten by subdivide
        self.tree.push(BihNode::EMPTY_LEAF);
        let grid = self.overall;
        let last = self.bounds.len() as isize - 1;
        self.subdivide(0, last, grid, grid, 0, 1);

        let tree = Bih {
            nodes: self.tree,
            objects: self.indices,
            bounds: self.overall,
        };
        (tree, self.stats)
    }

    fn alloc_node(&mut self) -> usize {
        self.tree.push(BihNode::EMPTY_LEAF);
        self.tree.len() - 1
    }

    fn create_leaf(&mut self, node_index: usize, left: isize, right: isize, depth: u32) {
        let count = (right - left + 1) as u32;
        self.stats.update_leaf(depth, count);
        self.tree[node_index] = BihNode::Leaf { first: left as u32, count };
    }

    fn subdivide(
        &mut self,
        left: isize,
        mut right: isize,
        mut grid: AaBox,
        node_box: AaBox,
        mut node_index: usize,
        mut depth: u32,
    ) {
        if (right - left + 1) as u32 <= self.max_prims || depth >= MAX_STACK_SIZE as u32 {
            self.create_leaf(node_index, left, right, depth);
            return;
        }

        let mut prev: Option<(usize, f32)> = None;
        let mut prev_clip: Option<f32> = None;
        let mut was_left = true;

        let (axis, split, clip_left, clip_right, right_orig) = loop {
            let d = grid.extent();
            if d[0] < 0.0 || d[1] < 0.0 || d[2] < 0.0 {
                panic!("negative node extents");
            }
            for i in 0..3 {
                if node_box.hi[i] < grid.lo[i] || node_box.lo[i] > grid.hi[i] {
                    panic!("invalid node overlap");
                }
            }

            let axis = primary_axis(&d);
            let split = 0.5 * (grid.lo[axis] + grid.hi[axis]);

            // partition L/R subsets
            let mut clip_left = f32::NEG_INFINITY;
            let mut clip_right = f32::INFINITY;
            let right_orig = right;
            let mut node_left = f32::INFINITY;
            let mut node_right = f32::NEG_INFINITY;
            let mut i = left;
            while i <= right {
                let obj = self.indices[i as usize] as usize;
                let min_bound = self.bounds[obj].lo[axis];
                let max_bound = self.bounds[obj].hi[axis];
                let center = (min_bound + max_bound) * 0.5;
                if center <= split {
                    i += 1;
                    if clip_left < max_bound {
                        clip_left = max_bound;
                    }
                } else {
                    self.indices.swap(i as usize, right as usize);
                    right -= 1;
                    if clip_right > min_bound {
                        clip_right = min_bound;
                    }
                }
                node_left = node_left.min(min_bound);
                node_right = node_right.max(max_bound);
            }

            // empty space on both sides of the primitives
            if node_left > node_box.lo[axis] && node_right < node_box.hi[axis] {
                let node_box_w = node_box.hi[axis] - node_box.lo[axis];
                let node_new_w = node_right - node_left;
                if 1.3 * node_new_w < node_box_w {
                    self.stats.bvh2_count += 1;
                    self.stats.nodes += 1;
                    let next = self.alloc_node();
                    self.tree[node_index] = BihNode::Bvh2 {
                        axis: axis as u8,
                        child: next as u32,
                        clip: [node_left, node_right],
                    };
                    let mut tight = node_box;
                    tight.lo[axis] = node_left;
                    tight.hi[axis] = node_right;
                    self.subdivide(left, right_orig, grid, tight, next, depth + 1);
                    return;
                }
            }

            let stuck = prev.is_some_and(|(pa, ps)| pa == axis && fuzzy_eq(ps, split));

            if right == right_orig {
                // all left
                if stuck {
                    self.create_leaf(node_index, left, right, depth);
                    return;
                }
                grid.hi[axis] = split;
                if clip_left <= split {
                    prev_clip = Some(clip_left);
                    was_left = true;
                } else {
                    prev_clip = None;
                }
            } else if left > right {
                // all right; restore the range before a stuck leaf so it
                // keeps its objects instead of coming out empty
                right = right_orig;
                if stuck {
                    self.create_leaf(node_index, left, right, depth);
                    return;
                }
                grid.lo[axis] = split;
                if clip_right >= split {
                    prev_clip = Some(clip_right);
                    was_left = false;
                } else {
                    prev_clip = None;
                }
            } else {
                // a real split; an earlier empty split that cut a hole
                // gets its own one-sided node first
                if let (Some((prev_axis, _)), Some(clip)) = (prev, prev_clip) {
                    let next = self.alloc_node();
                    self.stats.nodes += 1;
                    self.tree[node_index] = if was_left {
                        BihNode::Interior {
                            axis: prev_axis as u8,
                            child: next as u32,
                            clip: [clip, f32::INFINITY],
                        }
                    } else {
                        BihNode::Interior {
                            axis: prev_axis as u8,
                            child: next as u32 - 1,
                            clip: [f32::NEG_INFINITY, clip],
                        }
                    };
                    depth += 1;
                    self.stats.update_leaf(depth, 0);
                    node_index = next;
                }
                break (axis, split, clip_left, clip_right, right_orig);
            }

            prev = Some((axis, split));
        };

        // child blocks go right after everything allocated so far
        let mut next = self.tree.len();
        let nl = right - left + 1;
        let nr = right_orig - right;
        if nl > 0 {
            self.alloc_node();
        } else {
            next -= 1;
        }
        if nr > 0 {
            self.alloc_node();
        }

        self.stats.nodes += 1;
        self.tree[node_index] = BihNode::Interior {
            axis: axis as u8,
            child: next as u32,
            clip: [clip_left, clip_right],
        };

        let mut grid_left = grid;
        let mut grid_right = grid;
        grid_left.hi[axis] = split;
        grid_right.lo[axis] = split;
        let mut node_box_left = node_box;
        let mut node_box_right = node_box;
        node_box_left.hi[axis] = clip_left;
        node_box_right.lo[axis] = clip_right;

        if nl > 0 {
            self.subdivide(left, right, grid_left, node_box_left, next, depth + 1);
        } else {
            self.stats.update_leaf(depth + 1, 0);
        }
        if nr > 0 {
            self.subdivide(right + 1, right_orig, grid_right, node_box_right, next + 1, depth + 1);
        } else {
            self.stats.update_leaf(depth + 1, 0);
        }
    }
}

impl Bih {
    /// Build over `primitives`, `bounds_of` giving each one's box.
    pub fn build<T, F>(primitives: &[T], bounds_of: F, leaf_size: u32) -> Bih
    where
        F: Fn(&T) -> AaBox,
    {
        BihBuilder::new(primitives, bounds_of, leaf_size).build()
    }
}
