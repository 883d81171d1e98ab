// world_model.rs - triangle meshes, liquid grids and the models built from them
//
// A WorldModel is a root id plus one or more GroupModels. Every group owns
// its vertices, triangles and a BIH over the triangles; the model owns a
// second BIH over the group bounds. Queries run in model space.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use vmap_common::files::{
    count_u32, read_aabox, read_bytes, read_chunk, read_f32_array, read_u32, read_u32_array, read_vec3,
    read_vec3_array, try_read_chunk, write_aabox, write_chunk, write_f32, write_u32, write_u32_array, write_vec3,
    VMAP_MAGIC,
};
use vmap_common::math::{cross_product, dot_product, vector_ma, vector_max, vector_min, vector_subtract, AaBox, Ray, Vec3};
use vmap_common::{VMapError, VMapResult};

use crate::bih::{Bih, DEFAULT_LEAF_SIZE};

/// Edge length of one liquid tile.
pub const LIQUID_TILE_SIZE: f32 = 533.333 / 128.0;

// Offset above the probe point for downward casts, so a floor exactly at
// the point still registers.
const PROBE_LIFT: f32 = 0.1;

// ============================================================
// Triangles
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeshTriangle {
    pub idx0: u32,
    pub idx1: u32,
    pub idx2: u32,
}

impl MeshTriangle {
    pub fn new(idx0: u32, idx1: u32, idx2: u32) -> Self {
        Self { idx0, idx1, idx2 }
    }

    pub fn bounds(&self, vertices: &[Vec3]) -> AaBox {
        let a = vertices[self.idx0 as usize];
        let b = vertices[self.idx1 as usize];
        let c = vertices[self.idx2 as usize];
        AaBox::new(vector_min(&vector_min(&a, &b), &c), vector_max(&vector_max(&a, &b), &c))
    }
}

/// Moller-Trumbore ray/triangle test. On a hit closer than `distance`,
/// shrinks `distance` and returns true.
pub fn intersect_triangle(tri: &MeshTriangle, vertices: &[Vec3], ray: &Ray, distance: &mut f32) -> bool {
    const EPS: f32 = 1e-5;

    let a = &vertices[tri.idx0 as usize];
    let e1 = vector_subtract(&vertices[tri.idx1 as usize], a);
    let e2 = vector_subtract(&vertices[tri.idx2 as usize], a);
    let p = cross_product(&ray.direction, &e2);
    let det = dot_product(&e1, &p);

    // ray parallel to the triangle plane
    if det.abs() < EPS {
        return false;
    }

    let f = 1.0 / det;
    let s = vector_subtract(&ray.origin, a);
    let u = f * dot_product(&s, &p);
    if !(0.0..=1.0).contains(&u) {
        return false;
    }

    let q = cross_product(&s, &e1);
    let v = f * dot_product(&ray.direction, &q);
    if v < 0.0 || u + v > 1.0 {
        return false;
    }

    let t = f * dot_product(&e2, &q);
    if t > 0.0 && t < *distance {
        *distance = t;
        return true;
    }
    false
}

// ============================================================
// Liquid
// ============================================================

/// Height grid of `tiles_x * tiles_y` liquid tiles. Heights sit on the
/// `(tiles_x + 1) * (tiles_y + 1)` corners, one flag byte per tile.
#[derive(Debug, Clone, PartialEq)]
pub struct WmoLiquid {
    tiles_x: u32,
    tiles_y: u32,
    corner: Vec3,
    liquid_type: u32,
    heights: Vec<f32>,
    flags: Vec<u8>,
}

impl WmoLiquid {
    pub fn new(tiles_x: u32, tiles_y: u32, corner: Vec3, liquid_type: u32) -> Self {
        let corners = (tiles_x as usize + 1) * (tiles_y as usize + 1);
        Self {
            tiles_x,
            tiles_y,
            corner,
            liquid_type,
            heights: vec![0.0; corners],
            flags: vec![0; tiles_x as usize * tiles_y as usize],
        }
    }

    pub fn tiles_x(&self) -> u32 {
        self.tiles_x
    }

    pub fn tiles_y(&self) -> u32 {
        self.tiles_y
    }

    pub fn corner(&self) -> &Vec3 {
        &self.corner
    }

    pub fn liquid_type(&self) -> u32 {
        self.liquid_type
    }

    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    pub fn heights_mut(&mut self) -> &mut [f32] {
        &mut self.heights
    }

    pub fn flags(&self) -> &[u8] {
        &self.flags
    }

    pub fn flags_mut(&mut self) -> &mut [u8] {
        &mut self.flags
    }

    /// Surface height above `pos`, or None outside the grid or over a
    /// disabled tile.
    pub fn liquid_height(&self, pos: &Vec3) -> Option<f32> {
        let tx_f = (pos[0] - self.corner[0]) / LIQUID_TILE_SIZE;
        if tx_f.is_nan() || tx_f < 0.0 {
            return None;
        }
        let tx = tx_f as u32;
        if tx >= self.tiles_x {
            return None;
        }

        let ty_f = (pos[1] - self.corner[1]) / LIQUID_TILE_SIZE;
        if ty_f.is_nan() || ty_f < 0.0 {
            return None;
        }
        let ty = ty_f as u32;
        if ty >= self.tiles_y {
            return None;
        }

        // disabled tiles always have the low nibble set
        if self.flags[tx as usize + ty as usize * self.tiles_x as usize] & 0x0F == 0x0F {
            return None;
        }

        let dx = tx_f - tx as f32;
        let dy = ty_f - ty as f32;

        // Each tile is split along its diagonal:
        //
        //   1 +-----+ (1,1)
        //     | b  /|
        //     |  /  |
        //     |/  a |
        //   0 +-----+
        //     0     1
        let row = self.tiles_x as usize + 1;
        let (tx, ty) = (tx as usize, ty as usize);
        let h = |x: usize, y: usize| self.heights[x + y * row];
        let h00 = h(tx, ty);
        let (sx, sy) = if dx > dy {
            (h(tx + 1, ty) - h00, h(tx + 1, ty + 1) - h(tx + 1, ty))
        } else {
            (h(tx + 1, ty + 1) - h(tx, ty + 1), h(tx, ty + 1) - h00)
        };
        Some(h00 + dx * sx + dy * sy)
    }

    /// Value stored in the LIQU chunk size field. The type word is not
    /// counted; readers never rely on this value.
    pub fn file_size(&self) -> u32 {
        let corners = (self.tiles_x as u64 + 1) * (self.tiles_y as u64 + 1);
        let size = 2 * 4 + 12 + corners * 4 + self.tiles_x as u64 * self.tiles_y as u64;
        size.min(u32::MAX as u64) as u32
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32(w, self.tiles_x)?;
        write_u32(w, self.tiles_y)?;
        write_vec3(w, &self.corner)?;
        write_u32(w, self.liquid_type)?;
        for h in &self.heights {
            write_f32(w, *h)?;
        }
        w.write_all(&self.flags)
    }

    pub fn read_from<R: Read>(r: &mut R) -> VMapResult<Self> {
        let tiles_x = read_u32(r)?;
        let tiles_y = read_u32(r)?;
        let corner = read_vec3(r)?;
        let liquid_type = read_u32(r)?;

        let corners = (tiles_x as usize)
            .checked_add(1)
            .zip((tiles_y as usize).checked_add(1))
            .and_then(|(x, y)| x.checked_mul(y))
            .ok_or_else(|| VMapError::CorruptModel(format!("liquid grid {}x{} too large", tiles_x, tiles_y)))?;
        let heights = read_f32_array(r, corners)?;
        let flags = read_bytes(r, tiles_x as usize * tiles_y as usize)?;

        Ok(Self {
            tiles_x,
            tiles_y,
            corner,
            liquid_type,
            heights,
            flags,
        })
    }
}

// ============================================================
// Group model
// ============================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupModel {
    bounds: AaBox,
    flags: u32,
    group_id: u32,
    vertices: Vec<Vec3>,
    triangles: Vec<MeshTriangle>,
    tree: Bih,
    liquid: Option<WmoLiquid>,
}

impl GroupModel {
    pub fn new(flags: u32, group_id: u32, bounds: AaBox) -> Self {
        Self {
            bounds,
            flags,
            group_id,
            ..Default::default()
        }
    }

    /// Take ownership of the mesh and build the triangle tree over it.
    /// Triangle indices must address `vertices`.
    pub fn set_mesh_data(&mut self, vertices: Vec<Vec3>, triangles: Vec<MeshTriangle>) {
        self.tree = Bih::build(&triangles, |t| t.bounds(&vertices), DEFAULT_LEAF_SIZE);
        self.vertices = vertices;
        self.triangles = triangles;
    }

    pub fn set_liquid_data(&mut self, liquid: Option<WmoLiquid>) {
        self.liquid = liquid;
    }

    pub fn bounds(&self) -> &AaBox {
        &self.bounds
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn group_id(&self) -> u32 {
        self.group_id
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[MeshTriangle] {
        &self.triangles
    }

    pub fn tree(&self) -> &Bih {
        &self.tree
    }

    pub fn liquid(&self) -> Option<&WmoLiquid> {
        self.liquid.as_ref()
    }

    pub fn intersect_ray(&self, ray: &Ray, distance: &mut f32, stop_at_first_hit: bool) -> bool {
        if self.triangles.is_empty() {
            return false;
        }

        let mut hit = false;
        self.tree.intersect_ray(
            ray,
            |r, entry, dist, _| {
                if intersect_triangle(&self.triangles[entry as usize], &self.vertices, r, dist) {
                    hit = true;
                }
                hit
            },
            distance,
            stop_at_first_hit,
        );
        hit
    }

    /// Distance from `pos` down to the nearest triangle along `down`, if
    /// `pos` lies in this group's bounds and anything is below it.
    pub fn is_inside_object(&self, pos: &Vec3, down: &Vec3) -> Option<f32> {
        if self.triangles.is_empty() || !self.bounds.contains(pos) {
            return None;
        }

        let ray = Ray::new(vector_ma(pos, -PROBE_LIFT, down), *down);
        let mut dist = f32::INFINITY;
        self.intersect_ray(&ray, &mut dist, false).then(|| dist - PROBE_LIFT)
    }

    pub fn liquid_level(&self, pos: &Vec3) -> Option<f32> {
        self.liquid.as_ref()?.liquid_height(pos)
    }

    /// Liquid type as a single-bit mask, 0 without liquid.
    pub fn liquid_type(&self) -> u32 {
        self.liquid
            .as_ref()
            .map_or(0, |l| 1u32.checked_shl(l.liquid_type()).unwrap_or(0))
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_aabox(w, &self.bounds)?;
        write_u32(w, self.flags)?;
        write_u32(w, self.group_id)?;

        write_chunk(w, b"VERT")?;
        let count = count_u32(self.vertices.len())?;
        write_u32(w, 4 + 12 * count)?;
        write_u32(w, count)?;
        // groups without collision geometry end here
        if count == 0 {
            return Ok(());
        }
        for v in &self.vertices {
            write_vec3(w, v)?;
        }

        write_chunk(w, b"TRIM")?;
        let count = count_u32(self.triangles.len())?;
        write_u32(w, 4 + 12 * count)?;
        write_u32(w, count)?;
        let indices: Vec<u32> = self.triangles.iter().flat_map(|t| [t.idx0, t.idx1, t.idx2]).collect();
        write_u32_array(w, &indices)?;

        write_chunk(w, b"MBIH")?;
        self.tree.write_to(w)?;

        write_chunk(w, b"LIQU")?;
        match &self.liquid {
            None => write_u32(w, 0),
            Some(liquid) => {
                write_u32(w, liquid.file_size())?;
                liquid.write_to(w)
            }
        }
    }

    pub fn read_from<R: Read>(r: &mut R) -> VMapResult<Self> {
        let mut group = GroupModel::new(0, 0, read_aabox(r)?);
        group.flags = read_u32(r)?;
        group.group_id = read_u32(r)?;

        read_chunk(r, b"VERT")?;
        let _chunk_size = read_u32(r)?;
        let count = read_u32(r)? as usize;
        if count == 0 {
            return Ok(group);
        }
        group.vertices = read_vec3_array(r, count)?;

        read_chunk(r, b"TRIM")?;
        let _chunk_size = read_u32(r)?;
        let count = read_u32(r)? as usize;
        let indices = read_u32_array(r, count.checked_mul(3).ok_or(VMapError::Truncated)?)?;
        let vertex_count = group.vertices.len();
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(VMapError::CorruptModel(format!(
                "group {}: vertex index {} out of range ({} vertices)",
                group.group_id, bad, vertex_count
            )));
        }
        group.triangles = indices.chunks_exact(3).map(|t| MeshTriangle::new(t[0], t[1], t[2])).collect();

        read_chunk(r, b"MBIH")?;
        group.tree = Bih::read_from(r)?;
        group.tree.check_object_range(group.triangles.len())?;

        read_chunk(r, b"LIQU")?;
        if read_u32(r)? > 0 {
            group.liquid = Some(WmoLiquid::read_from(r)?);
        }
        Ok(group)
    }
}

// ============================================================
// World model
// ============================================================

/// Area data of the group found below a probe point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelAreaHit {
    pub root_id: u32,
    pub group_id: u32,
    pub flags: u32,
    /// Model-space distance from the probe point down to the floor.
    pub z_dist: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldModel {
    root_id: u32,
    groups: Vec<GroupModel>,
    group_tree: Bih,
}

impl WorldModel {
    pub fn new(root_id: u32) -> Self {
        Self {
            root_id,
            ..Default::default()
        }
    }

    pub fn root_id(&self) -> u32 {
        self.root_id
    }

    pub fn set_root_id(&mut self, root_id: u32) {
        self.root_id = root_id;
    }

    /// Take ownership of the groups and build the group tree, one group
    /// per leaf.
    pub fn set_group_models(&mut self, groups: Vec<GroupModel>) {
        self.group_tree = Bih::build(&groups, |g| *g.bounds(), 1);
        self.groups = groups;
    }

    pub fn groups(&self) -> &[GroupModel] {
        &self.groups
    }

    pub fn group_tree(&self) -> &Bih {
        &self.group_tree
    }

    pub fn intersect_ray(&self, ray: &Ray, distance: &mut f32, stop_at_first_hit: bool) -> bool {
        // a lone group needs no tree walk
        if let [group] = self.groups.as_slice() {
            return group.intersect_ray(ray, distance, stop_at_first_hit);
        }

        let mut hit = false;
        self.group_tree.intersect_ray(
            ray,
            |r, entry, dist, stop| {
                if self.groups[entry as usize].intersect_ray(r, dist, stop) {
                    hit = true;
                }
                hit
            },
            distance,
            stop_at_first_hit,
        );
        hit
    }

    /// Group whose floor lies closest below `p`, with its distance.
    fn closest_group_below(&self, p: &Vec3, down: &Vec3) -> Option<(usize, f32)> {
        if self.groups.is_empty() {
            return None;
        }

        let mut best: Option<(usize, f32)> = None;
        self.group_tree.intersect_point(p, |point, entry| {
            let entry = entry as usize;
            if let Some(z_dist) = self.groups[entry].is_inside_object(point, down) {
                if best.map_or(true, |(_, d)| z_dist < d) {
                    best = Some((entry, z_dist));
                }
            }
        });
        best
    }

    pub fn intersect_point(&self, p: &Vec3, down: &Vec3) -> Option<ModelAreaHit> {
        let (index, z_dist) = self.closest_group_below(p, down)?;
        let group = &self.groups[index];
        Some(ModelAreaHit {
            root_id: self.root_id,
            group_id: group.group_id(),
            flags: group.flags(),
            z_dist,
        })
    }

    /// Index of the group below `p` and the distance down to it.
    pub fn location_info(&self, p: &Vec3, down: &Vec3) -> Option<(usize, f32)> {
        self.closest_group_below(p, down)
    }

    // ============================================================
    // Files
    // ============================================================

    pub fn write_file(&self, path: &Path) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.write_to(&mut w)?;
        w.flush()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_chunk(w, VMAP_MAGIC)?;
        write_chunk(w, b"WMOD")?;
        write_u32(w, 8)?;
        write_u32(w, self.root_id)?;

        if self.groups.is_empty() {
            return Ok(());
        }
        write_chunk(w, b"GMOD")?;
        write_u32(w, count_u32(self.groups.len())?)?;
        for group in &self.groups {
            group.write_to(w)?;
        }
        write_chunk(w, b"GBIH")?;
        self.group_tree.write_to(w)
    }

    pub fn read_file(path: &Path) -> VMapResult<Self> {
        let mut r = BufReader::new(File::open(path)?);
        Self::read_from(&mut r)
    }

    pub fn read_from<R: Read>(r: &mut R) -> VMapResult<Self> {
        read_chunk(r, VMAP_MAGIC)?;
        read_chunk(r, b"WMOD")?;
        let _chunk_size = read_u32(r)?;
        let mut model = WorldModel::new(read_u32(r)?);

        // models without groups end after the header
        if !try_read_chunk(r, b"GMOD")? {
            return Ok(model);
        }
        let count = read_u32(r)?;
        let mut groups = Vec::new();
        for _ in 0..count {
            groups.push(GroupModel::read_from(r)?);
        }
        read_chunk(r, b"GBIH")?;
        let group_tree = Bih::read_from(r)?;
        group_tree.check_object_range(groups.len())?;

        model.groups = groups;
        model.group_tree = group_tree;
        Ok(model)
    }
}
