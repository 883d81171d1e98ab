// bih.rs - bounding interval hierarchy: node layout, traversal and file I/O
//
// The tree is a flat array of nodes addressed by index. A node's children
// live in a contiguous block starting at `child`: the left child at `child`,
// the right child at `child + 1`. On disk every node is three 32-bit words:
//
//   header   axis:2 | bvh2:1 | offset:29      (offset in words)
//   leaf     header axis == 3, offset = first object; word 1 = count
//   inner    words 1, 2 = left and right clip planes as raw float bits

use std::io::{self, Read, Write};

use vmap_common::files::{
    count_u32, read_aabox, read_u32, read_u32_array, write_aabox, write_u32, write_u32_array,
};
use vmap_common::math::{fuzzy_ne, AaBox, Ray, Vec3};
use vmap_common::{VMapError, VMapResult};

/// Traversal stack depth; builds never nest deeper than this.
pub const MAX_STACK_SIZE: usize = 64;

/// Objects per leaf unless the caller asks otherwise.
pub const DEFAULT_LEAF_SIZE: u32 = 3;

const LEAF_AXIS: u32 = 3;
const BVH2_BIT: u32 = 1 << 29;
const OFFSET_MASK: u32 = !(7 << 29);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BihNode {
    /// Run of `count` entries in the object array starting at `first`.
    Leaf { first: u32, count: u32 },
    /// Split on `axis`. `clip[0]` bounds the left child from above,
    /// `clip[1]` bounds the right child from below. An infinite clip marks
    /// an empty side.
    Interior { axis: u8, child: u32, clip: [f32; 2] },
    /// Single child at `child`, everything lies within `clip[0]..=clip[1]`
    /// on `axis`.
    Bvh2 { axis: u8, child: u32, clip: [f32; 2] },
}

impl BihNode {
    pub(crate) const EMPTY_LEAF: BihNode = BihNode::Leaf { first: 0, count: 0 };

    fn encode(&self) -> [u32; 3] {
        match *self {
            BihNode::Leaf { first, count } => [(LEAF_AXIS << 30) | first, count, 0],
            BihNode::Interior { axis, child, clip } => [
                ((axis as u32) << 30) | (child * 3),
                clip[0].to_bits(),
                clip[1].to_bits(),
            ],
            BihNode::Bvh2 { axis, child, clip } => [
                ((axis as u32) << 30) | BVH2_BIT | (child * 3),
                clip[0].to_bits(),
                clip[1].to_bits(),
            ],
        }
    }

    fn decode(index: usize, words: &[u32]) -> VMapResult<Self> {
        let header = words[0];
        let axis = header >> 30;
        let bvh2 = header & BVH2_BIT != 0;
        let offset = header & OFFSET_MASK;

        if axis == LEAF_AXIS {
            if bvh2 {
                return Err(VMapError::CorruptTree(format!("node {}: leaf with BVH2 flag", index)));
            }
            return Ok(BihNode::Leaf { first: offset, count: words[1] });
        }
        if offset % 3 != 0 {
            return Err(VMapError::CorruptTree(format!(
                "node {}: child offset {} is not node aligned",
                index, offset
            )));
        }

        let axis = axis as u8;
        let child = offset / 3;
        let clip = [f32::from_bits(words[1]), f32::from_bits(words[2])];
        Ok(if bvh2 {
            BihNode::Bvh2 { axis, child, clip }
        } else {
            BihNode::Interior { axis, child, clip }
        })
    }
}

#[derive(Clone, Copy, Default)]
struct StackNode {
    node: usize,
    near: f32,
    far: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bih {
    pub(crate) nodes: Vec<BihNode>,
    pub(crate) objects: Vec<u32>,
    pub(crate) bounds: AaBox,
}

impl Bih {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[BihNode] {
        &self.nodes
    }

    /// Primitive indices in leaf order.
    pub fn objects(&self) -> &[u32] {
        &self.objects
    }

    pub fn bounds(&self) -> &AaBox {
        &self.bounds
    }

    pub fn primitive_count(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The packed word form written to disk.
    pub fn tree_words(&self) -> Vec<u32> {
        self.nodes.iter().flat_map(|n| n.encode()).collect()
    }

    // ============================================================
    // Ray traversal
    // ============================================================

    /// Walk every leaf the ray can reach within `max_dist`, handing each
    /// object index to `callback`. The callback shrinks `max_dist` on a
    /// hit; with `stop_at_first_hit` the walk ends as soon as it reports one.
    pub fn intersect_ray<F>(&self, ray: &Ray, mut callback: F, max_dist: &mut f32, stop_at_first_hit: bool)
    where
        F: FnMut(&Ray, u32, &mut f32, bool) -> bool,
    {
        if self.nodes.is_empty() || !ray.is_finite() {
            return;
        }

        let org = &ray.origin;
        let dir = &ray.direction;
        let inv_dir = &ray.inv_direction;

        let mut interval_min = -1.0f32;
        let mut interval_max = -1.0f32;
        for i in 0..3 {
            if fuzzy_ne(dir[i], 0.0) {
                let t1 = (self.bounds.lo[i] - org[i]) * inv_dir[i];
                let t2 = (self.bounds.hi[i] - org[i]) * inv_dir[i];
                let (t1, t2) = if t1 > t2 { (t2, t1) } else { (t1, t2) };
                if t1 > interval_min {
                    interval_min = t1;
                }
                if t2 < interval_max || interval_max < 0.0 {
                    interval_max = t2;
                }
                // intervalMax can only become smaller for other axis,
                // and intervalMin only larger respectively, so stop early
                if interval_max <= 0.0 || interval_min >= *max_dist {
                    return;
                }
            }
        }

        if interval_min > interval_max {
            return;
        }
        interval_min = interval_min.max(0.0);
        interval_max = interval_max.min(*max_dist);

        // near clip index per axis: 0 for positive directions, 1 for negative
        let mut offset_front = [0usize; 3];
        let mut offset_back = [0usize; 3];
        for i in 0..3 {
            offset_front[i] = dir[i].is_sign_negative() as usize;
            offset_back[i] = offset_front[i] ^ 1;
        }

        let mut stack = [StackNode::default(); MAX_STACK_SIZE];
        let mut stack_pos = 0usize;
        let mut node = 0usize;

        loop {
            loop {
                let Some(current) = self.nodes.get(node) else { break };
                match *current {
                    BihNode::Interior { axis, child, clip } => {
                        let axis = axis as usize;
                        let front = (clip[offset_front[axis]] - org[axis]) * inv_dir[axis];
                        let back = (clip[offset_back[axis]] - org[axis]) * inv_dir[axis];
                        // ray passes between the clip zones
                        if front < interval_min && back > interval_max {
                            break;
                        }
                        let back_node = child as usize + offset_back[axis];
                        node = back_node;
                        // ray passes through far node only
                        if front < interval_min {
                            interval_min = back.max(interval_min);
                            continue;
                        }
                        node = child as usize + offset_front[axis];
                        // ray passes through near node only
                        if back > interval_max {
                            interval_max = front.min(interval_max);
                            continue;
                        }
                        // both nodes, near first
                        if stack_pos == MAX_STACK_SIZE {
                            return;
                        }
                        stack[stack_pos] = StackNode {
                            node: back_node,
                            near: back.max(interval_min),
                            far: interval_max,
                        };
                        stack_pos += 1;
                        interval_max = front.min(interval_max);
                    }
                    BihNode::Leaf { first, count } => {
                        let first = first as usize;
                        for &object in &self.objects[first..first + count as usize] {
                            let hit = callback(ray, object, max_dist, stop_at_first_hit);
                            if stop_at_first_hit && hit {
                                return;
                            }
                        }
                        break;
                    }
                    BihNode::Bvh2 { axis, child, clip } => {
                        let axis = axis as usize;
                        let front = (clip[offset_front[axis]] - org[axis]) * inv_dir[axis];
                        let back = (clip[offset_back[axis]] - org[axis]) * inv_dir[axis];
                        node = child as usize;
                        interval_min = front.max(interval_min);
                        interval_max = back.min(interval_max);
                        if interval_min > interval_max {
                            break;
                        }
                    }
                }
            }

            // backtrack
            loop {
                if stack_pos == 0 {
                    return;
                }
                stack_pos -= 1;
                let entry = stack[stack_pos];
                interval_min = entry.near;
                if *max_dist < interval_min {
                    continue;
                }
                node = entry.node;
                interval_max = entry.far;
                break;
            }
        }
    }

    // ============================================================
    // Point traversal
    // ============================================================

    /// Hand every object whose leaf region contains `point` to `callback`.
    pub fn intersect_point<F>(&self, point: &Vec3, mut callback: F)
    where
        F: FnMut(&Vec3, u32),
    {
        if self.nodes.is_empty() || !self.bounds.contains(point) {
            return;
        }

        let mut stack = [0usize; MAX_STACK_SIZE];
        let mut stack_pos = 0usize;
        let mut node = 0usize;

        loop {
            loop {
                let Some(current) = self.nodes.get(node) else { break };
                match *current {
                    BihNode::Interior { axis, child, clip } => {
                        let p = point[axis as usize];
                        let (left, right) = (clip[0], clip[1]);
                        // point lies in neither clip zone
                        if left < p && right > p {
                            break;
                        }
                        let right_node = child as usize + 1;
                        node = right_node;
                        if left < p {
                            continue;
                        }
                        node = child as usize;
                        if right > p {
                            continue;
                        }
                        // inside both zones
                        if stack_pos == MAX_STACK_SIZE {
                            return;
                        }
                        stack[stack_pos] = right_node;
                        stack_pos += 1;
                    }
                    BihNode::Leaf { first, count } => {
                        let first = first as usize;
                        for &object in &self.objects[first..first + count as usize] {
                            callback(point, object);
                        }
                        break;
                    }
                    BihNode::Bvh2 { axis, child, clip } => {
                        let p = point[axis as usize];
                        node = child as usize;
                        if clip[0] > p || clip[1] < p {
                            break;
                        }
                    }
                }
            }

            if stack_pos == 0 {
                return;
            }
            stack_pos -= 1;
            node = stack[stack_pos];
        }
    }

    // ============================================================
    // Serialization
    // ============================================================

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_aabox(w, &self.bounds)?;
        let words = self.tree_words();
        write_u32(w, count_u32(words.len())?)?;
        write_u32_array(w, &words)?;
        write_u32(w, count_u32(self.objects.len())?)?;
        write_u32_array(w, &self.objects)
    }

    pub fn read_from<R: Read>(r: &mut R) -> VMapResult<Self> {
        let bounds = read_aabox(r)?;
        let tree_size = read_u32(r)? as usize;
        if tree_size % 3 != 0 {
            return Err(VMapError::CorruptTree(format!(
                "tree size {} is not a multiple of 3",
                tree_size
            )));
        }
        let words = read_u32_array(r, tree_size)?;
        let count = read_u32(r)? as usize;
        let objects = read_u32_array(r, count)?;

        let nodes = words
            .chunks_exact(3)
            .enumerate()
            .map(|(i, w)| BihNode::decode(i, w))
            .collect::<VMapResult<Vec<_>>>()?;

        let tree = Bih { nodes, objects, bounds };
        tree.validate()?;
        Ok(tree)
    }

    /// Every object entry must index into a primitive array of `limit`
    /// entries; loaders check this before handing the tree to callbacks.
    pub fn check_object_range(&self, limit: usize) -> VMapResult<()> {
        match self.objects.iter().find(|&&o| o as usize >= limit) {
            Some(bad) => Err(VMapError::CorruptTree(format!(
                "object index {} out of range ({} primitives)",
                bad, limit
            ))),
            None => Ok(()),
        }
    }

    /// Leaves must stay inside the object array and reachable children must
    /// point forward, so traversal of a loaded tree always terminates.
    fn validate(&self) -> VMapResult<()> {
        let node_count = self.nodes.len();
        let check_child = |index: usize, child: usize| {
            if child <= index || child >= node_count {
                Err(VMapError::CorruptTree(format!(
                    "node {}: child {} out of range ({} nodes)",
                    index, child, node_count
                )))
            } else {
                Ok(())
            }
        };

        for (index, node) in self.nodes.iter().enumerate() {
            match *node {
                BihNode::Leaf { first, count } => {
                    let end = first as u64 + count as u64;
                    if end > self.objects.len() as u64 {
                        return Err(VMapError::CorruptTree(format!(
                            "node {}: leaf range {}..{} exceeds {} objects",
                            index,
                            first,
                            end,
                            self.objects.len()
                        )));
                    }
                }
                BihNode::Interior { child, clip, .. } => {
                    if clip[0] != f32::NEG_INFINITY {
                        check_child(index, child as usize)?;
                    }
                    if clip[1] != f32::INFINITY {
                        check_child(index, child as usize + 1)?;
                    }
                }
                BihNode::Bvh2 { child, .. } => check_child(index, child as usize)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bih_build::BihBuilder;
    use crate::world_model::intersect_triangle;
    use crate::world_model::MeshTriangle;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeSet;
    use std::io::Cursor;
    use vmap_common::math::{vector_max, vector_min};

    fn triangle_bounds(verts: &[Vec3], tri: &MeshTriangle) -> AaBox {
        let a = verts[tri.idx0 as usize];
        let b = verts[tri.idx1 as usize];
        let c = verts[tri.idx2 as usize];
        AaBox::new(vector_min(&vector_min(&a, &b), &c), vector_max(&vector_max(&a, &b), &c))
    }

    fn build_triangles(verts: &[Vec3], tris: &[MeshTriangle], leaf_size: u32) -> Bih {
        Bih::build(tris, |t| triangle_bounds(verts, t), leaf_size)
    }

    fn cast(tree: &Bih, verts: &[Vec3], tris: &[MeshTriangle], ray: &Ray, max_dist: f32) -> Option<f32> {
        let mut dist = max_dist;
        let mut hit = false;
        tree.intersect_ray(
            ray,
            |r, idx, d, _| {
                if intersect_triangle(&tris[idx as usize], verts, r, d) {
                    hit = true;
                }
                hit
            },
            &mut dist,
            false,
        );
        hit.then_some(dist)
    }

    fn brute_force(verts: &[Vec3], tris: &[MeshTriangle], ray: &Ray, max_dist: f32) -> Option<f32> {
        let mut dist = max_dist;
        let mut hit = false;
        for tri in tris {
            hit |= intersect_triangle(tri, verts, ray, &mut dist);
        }
        hit.then_some(dist)
    }

    /// Walk the tree tracking the region implied by each clip plane and
    /// check that every primitive under a leaf lies inside it.
    fn check_containment(tree: &Bih, boxes: &[AaBox]) {
        let mut pending = vec![(0usize, tree.bounds)];
        let mut seen = 0usize;
        while let Some((node, region)) = pending.pop() {
            match tree.nodes[node] {
                BihNode::Leaf { first, count } => {
                    for &obj in &tree.objects[first as usize..(first + count) as usize] {
                        assert!(
                            region.contains_box(&boxes[obj as usize]),
                            "object {} escapes leaf region {:?}",
                            obj,
                            region
                        );
                        seen += 1;
                    }
                }
                BihNode::Interior { axis, child, clip } => {
                    let axis = axis as usize;
                    if clip[0] != f32::NEG_INFINITY {
                        let mut left = region;
                        left.hi[axis] = left.hi[axis].min(clip[0]);
                        pending.push((child as usize, left));
                    }
                    if clip[1] != f32::INFINITY {
                        let mut right = region;
                        right.lo[axis] = right.lo[axis].max(clip[1]);
                        pending.push((child as usize + 1, right));
                    }
                }
                BihNode::Bvh2 { axis, child, clip } => {
                    let axis = axis as usize;
                    let mut inner = region;
                    inner.lo[axis] = inner.lo[axis].max(clip[0]);
                    inner.hi[axis] = inner.hi[axis].min(clip[1]);
                    pending.push((child as usize, inner));
                }
            }
        }
        assert_eq!(seen, boxes.len());
    }

    fn random_soup(rng: &mut StdRng, count: usize) -> (Vec<Vec3>, Vec<MeshTriangle>) {
        let mut verts = Vec::new();
        let mut tris = Vec::new();
        for i in 0..count {
            let base = [
                rng.gen_range(0.0..100.0f32),
                rng.gen_range(0.0..100.0f32),
                rng.gen_range(0.0..100.0f32),
            ];
            for _ in 0..3 {
                verts.push([
                    base[0] + rng.gen_range(-4.0..4.0f32),
                    base[1] + rng.gen_range(-4.0..4.0f32),
                    base[2] + rng.gen_range(-4.0..4.0f32),
                ]);
            }
            let i = i as u32 * 3;
            tris.push(MeshTriangle::new(i, i + 1, i + 2));
        }
        (verts, tris)
    }

    // ============================================================
    // Single triangle
    // ============================================================

    #[test]
    fn test_single_triangle_leaf() {
        let verts = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]];
        let tris = vec![MeshTriangle::new(0, 1, 2)];
        let tree = build_triangles(&verts, &tris, DEFAULT_LEAF_SIZE);

        assert_eq!(tree.nodes, vec![BihNode::Leaf { first: 0, count: 1 }]);
        assert_eq!(tree.bounds, AaBox::new([0.0, 0.0, 0.0], [1.0, 1.0, 0.0]));

        let down = Ray::new([0.5, 0.5, 5.0], [0.0, 0.0, -1.0]);
        assert_eq!(cast(&tree, &verts, &tris, &down, f32::INFINITY), Some(5.0));

        let miss = Ray::new([2.0, 2.0, 5.0], [0.0, 0.0, -1.0]);
        assert_eq!(cast(&tree, &verts, &tris, &miss, f32::INFINITY), None);

        // box beyond max distance
        assert_eq!(cast(&tree, &verts, &tris, &down, 4.0), None);
    }

    #[test]
    fn test_empty_tree_queries() {
        let tree = Bih::new();
        let mut called = false;
        let mut dist = f32::INFINITY;
        tree.intersect_ray(&Ray::new([0.0; 3], [1.0, 0.0, 0.0]), |_, _, _, _| {
            called = true;
            true
        }, &mut dist, false);
        tree.intersect_point(&[0.0; 3], |_, _| called = true);
        assert!(!called);
    }

    #[test]
    fn test_non_finite_ray_is_ignored() {
        let verts = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]];
        let tris = vec![MeshTriangle::new(0, 1, 2)];
        let tree = build_triangles(&verts, &tris, DEFAULT_LEAF_SIZE);
        let ray = Ray::new([f32::NAN, 0.5, 5.0], [0.0, 0.0, -1.0]);
        assert_eq!(cast(&tree, &verts, &tris, &ray, f32::INFINITY), None);
    }

    // ============================================================
    // Build shape
    // ============================================================

    #[test]
    fn test_bvh2_collapse_uses_tight_extents() {
        let boxes = vec![
            AaBox::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]),
            AaBox::new([99.0, 99.0, 99.0], [100.0, 100.0, 100.0]),
            // cluster in the upper corner region, far from the y floor
            AaBox::new([60.0, 60.0, 60.0], [61.0, 61.0, 61.0]),
            AaBox::new([62.0, 60.0, 60.0], [63.0, 61.0, 61.0]),
        ];
        let tree = Bih::build(&boxes, |b| *b, 1);

        let collapsed = tree.nodes.iter().any(|n| {
            matches!(n, BihNode::Bvh2 { axis: 1, clip, .. } if *clip == [60.0, 61.0])
        });
        assert!(collapsed, "no BVH2 node with the cluster extents: {:?}", tree.nodes);
        check_containment(&tree, &boxes);
    }

    #[test]
    fn test_identical_boxes_terminate() {
        // every split is degenerate, the repeat check has to force leaves
        let boxes = vec![AaBox::new([1.0, 1.0, 1.0], [2.0, 2.0, 2.0]); 20];
        let tree = Bih::build(&boxes, |b| *b, 3);
        check_containment(&tree, &boxes);
        let mut found = BTreeSet::new();
        tree.intersect_point(&[1.5, 1.5, 1.5], |_, idx| {
            found.insert(idx);
        });
        assert_eq!(found.len(), 20);
    }

    #[test]
    fn test_containment_random_boxes() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let boxes: Vec<AaBox> = (0..500)
            .map(|_| {
                let lo = [
                    rng.gen_range(-500.0..500.0f32),
                    rng.gen_range(-500.0..500.0f32),
                    rng.gen_range(-50.0..50.0f32),
                ];
                let size = [rng.gen_range(0.0..30.0f32), rng.gen_range(0.0..30.0f32), rng.gen_range(0.0..5.0f32)];
                AaBox::new(lo, [lo[0] + size[0], lo[1] + size[1], lo[2] + size[2]])
            })
            .collect();
        for leaf_size in [1, 3, 8] {
            let tree = Bih::build(&boxes, |b| *b, leaf_size);
            let mut objects = tree.objects.clone();
            objects.sort_unstable();
            assert_eq!(objects, (0..500).collect::<Vec<u32>>());
            check_containment(&tree, &boxes);
        }
    }

    #[test]
    fn test_build_stats() {
        let boxes: Vec<AaBox> = (0..16)
            .map(|i| {
                let x = (i * 10) as f32;
                AaBox::new([x, 0.0, 0.0], [x + 1.0, 1.0, 1.0])
            })
            .collect();
        let (tree, stats) = BihBuilder::new(&boxes, |b| *b, 3).build_with_stats();
        assert_eq!(stats.nodes() + stats.leaves(), tree.nodes.len());
        assert_eq!(stats.total_objects(), 16);
        assert!(stats.max_objects() <= 3);
        assert!(stats.max_depth() <= MAX_STACK_SIZE as u32);
        let report = stats.to_string();
        assert!(report.contains("Tree stats"));
    }

    // ============================================================
    // Queries vs brute force
    // ============================================================

    #[test]
    fn test_ray_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(1234);
        let (verts, tris) = random_soup(&mut rng, 300);
        let tree = build_triangles(&verts, &tris, DEFAULT_LEAF_SIZE);

        for _ in 0..500 {
            let origin = [
                rng.gen_range(-20.0..120.0f32),
                rng.gen_range(-20.0..120.0f32),
                rng.gen_range(-20.0..120.0f32),
            ];
            let target = [
                rng.gen_range(0.0..100.0f32),
                rng.gen_range(0.0..100.0f32),
                rng.gen_range(0.0..100.0f32),
            ];
            let delta = vmap_common::math::vector_subtract(&target, &origin);
            let len = vmap_common::math::vector_length(&delta);
            if len < 1e-3 {
                continue;
            }
            let ray = Ray::new(origin, vmap_common::math::vector_scale(&delta, 1.0 / len));
            let max_dist = rng.gen_range(10.0..250.0f32);

            let expected = brute_force(&verts, &tris, &ray, max_dist);
            let got = cast(&tree, &verts, &tris, &ray, max_dist);
            match (expected, got) {
                (None, None) => {}
                (Some(e), Some(g)) => assert!((e - g).abs() <= 1e-4 * e.max(1.0), "{} vs {}", e, g),
                other => panic!("mismatch {:?} for {:?}", other, ray),
            }
        }
    }

    #[test]
    fn test_axis_aligned_rays_match_brute_force() {
        let mut rng = StdRng::seed_from_u64(77);
        let (verts, tris) = random_soup(&mut rng, 200);
        let tree = build_triangles(&verts, &tris, DEFAULT_LEAF_SIZE);

        for _ in 0..200 {
            let origin = [rng.gen_range(0.0..100.0f32), rng.gen_range(0.0..100.0f32), 200.0];
            let ray = Ray::new(origin, [0.0, 0.0, -1.0]);
            let expected = brute_force(&verts, &tris, &ray, f32::INFINITY);
            let got = cast(&tree, &verts, &tris, &ray, f32::INFINITY);
            assert_eq!(expected.is_some(), got.is_some());
            if let (Some(e), Some(g)) = (expected, got) {
                assert!((e - g).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn test_stop_at_first_hit() {
        let boxes: Vec<AaBox> = (0..10)
            .map(|i| {
                let z = i as f32 * 5.0;
                AaBox::new([0.0, 0.0, z], [1.0, 1.0, z + 1.0])
            })
            .collect();
        let tree = Bih::build(&boxes, |b| *b, 1);
        let ray = Ray::new([0.5, 0.5, 100.0], [0.0, 0.0, -1.0]);
        let mut calls = 0;
        let mut dist = f32::INFINITY;
        tree.intersect_ray(&ray, |_, _, _, _| {
            calls += 1;
            true
        }, &mut dist, true);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_point_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(99);
        let boxes: Vec<AaBox> = (0..400)
            .map(|_| {
                let lo = [
                    rng.gen_range(0.0..100.0f32),
                    rng.gen_range(0.0..100.0f32),
                    rng.gen_range(0.0..100.0f32),
                ];
                let size = rng.gen_range(1.0..15.0f32);
                AaBox::new(lo, [lo[0] + size, lo[1] + size, lo[2] + size])
            })
            .collect();
        let tree = Bih::build(&boxes, |b| *b, DEFAULT_LEAF_SIZE);

        for _ in 0..500 {
            let p = [
                rng.gen_range(0.0..110.0f32),
                rng.gen_range(0.0..110.0f32),
                rng.gen_range(0.0..110.0f32),
            ];
            let mut found = BTreeSet::new();
            tree.intersect_point(&p, |_, idx| {
                found.insert(idx);
            });
            for (i, b) in boxes.iter().enumerate() {
                if b.contains(&p) {
                    assert!(found.contains(&(i as u32)), "box {} missed for {:?}", i, p);
                }
            }
        }
    }

    // ============================================================
    // File format
    // ============================================================

    #[test]
    fn test_roundtrip() {
        let mut rng = StdRng::seed_from_u64(4242);
        let (verts, tris) = random_soup(&mut rng, 120);
        let tree = build_triangles(&verts, &tris, DEFAULT_LEAF_SIZE);

        let mut buf = Vec::new();
        tree.write_to(&mut buf).unwrap();
        let words = tree.tree_words();
        assert_eq!(buf.len(), 24 + 4 + words.len() * 4 + 4 + tree.objects.len() * 4);

        let loaded = Bih::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(loaded.tree_words(), words);
        assert_eq!(loaded.objects, tree.objects);
        assert_eq!(loaded.bounds, tree.bounds);

        let mut again = Vec::new();
        loaded.write_to(&mut again).unwrap();
        assert_eq!(again, buf);

        for _ in 0..50 {
            let origin = [rng.gen_range(0.0..100.0f32), rng.gen_range(0.0..100.0f32), 150.0];
            let ray = Ray::new(origin, [0.0, 0.0, -1.0]);
            assert_eq!(
                cast(&tree, &verts, &tris, &ray, f32::INFINITY),
                cast(&loaded, &verts, &tris, &ray, f32::INFINITY)
            );
        }
    }

    #[test]
    fn test_leaf_encoding() {
        let node = BihNode::Leaf { first: 5, count: 2 };
        assert_eq!(node.encode(), [(3 << 30) | 5, 2, 0]);
        let node = BihNode::Bvh2 { axis: 1, child: 4, clip: [1.0, 2.0] };
        let words = node.encode();
        assert_eq!(words[0], (1 << 30) | (1 << 29) | 12);
        assert_eq!(BihNode::decode(0, &words).unwrap(), node);
    }

    #[test]
    fn test_truncated_file() {
        let boxes = vec![AaBox::new([0.0; 3], [1.0; 3]); 5];
        let tree = Bih::build(&boxes, |b| *b, 1);
        let mut buf = Vec::new();
        tree.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 2);
        assert!(matches!(Bih::read_from(&mut Cursor::new(&buf)), Err(VMapError::Truncated)));
    }

    #[test]
    fn test_corrupt_leaf_range_rejected() {
        let mut buf = Vec::new();
        write_aabox(&mut buf, &AaBox::default()).unwrap();
        write_u32(&mut buf, 3).unwrap();
        write_u32_array(&mut buf, &[(3 << 30) | 4, 2, 0]).unwrap();
        write_u32(&mut buf, 1).unwrap();
        write_u32(&mut buf, 0).unwrap();
        assert!(matches!(Bih::read_from(&mut Cursor::new(&buf)), Err(VMapError::CorruptTree(_))));
    }

    #[test]
    fn test_backward_child_rejected() {
        let mut buf = Vec::new();
        write_aabox(&mut buf, &AaBox::default()).unwrap();
        write_u32(&mut buf, 3).unwrap();
        // interior node pointing at itself
        write_u32_array(&mut buf, &[0, 1.0f32.to_bits(), 2.0f32.to_bits()]).unwrap();
        write_u32(&mut buf, 0).unwrap();
        assert!(matches!(Bih::read_from(&mut Cursor::new(&buf)), Err(VMapError::CorruptTree(_))));
    }
}
