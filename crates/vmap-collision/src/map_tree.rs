// map_tree.rs - per-map BIH over model instances with tiled streaming
//
// The tree file holds the BIH over every spawn of the map; tile files list
// which spawns a tile needs and the tree slot each one occupies. Spawns
// shared by several tiles are reference counted per slot, models are
// reference counted per file name in the ModelCache.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use tracing::{debug, error};
use vmap_common::files::{read_chunk, read_u32, read_u8, VMAP_MAGIC};
use vmap_common::math::{vector_length, vector_ma, vector_scale, vector_subtract, Ray, Vec3};
use vmap_common::{VMapError, VMapResult};

use crate::bih::Bih;
use crate::model_cache::ModelCache;
use crate::model_instance::{AreaInfo, LocationInfo, ModelInstance, ModelSpawn};

// Shorter query segments count as "no distance".
const MIN_QUERY_DISTANCE: f32 = 1e-10;

/// `"{map:03}.vmtree"`
pub fn tree_file_name(map_id: u32) -> String {
    format!("{:03}.vmtree", map_id)
}

/// `"{map:03}_{y:02}_{x:02}.vmtile"`
pub fn tile_file_name(map_id: u32, tile_x: u32, tile_y: u32) -> String {
    format!("{:03}_{:02}_{:02}.vmtile", map_id, tile_y, tile_x)
}

pub fn pack_tile_id(tile_x: u32, tile_y: u32) -> u32 {
    (tile_x << 16) | tile_y
}

pub fn unpack_tile_id(id: u32) -> (u32, u32) {
    (id >> 16, id & 0xFFFF)
}

/// True if the tree file for `map_id` is readable and, for tiled maps,
/// the tile file for `(tile_x, tile_y)` is too.
pub fn can_load_map(base_path: &Path, map_id: u32, tile_x: u32, tile_y: u32) -> bool {
    let tiled = match read_tree_header(&base_path.join(tree_file_name(map_id))) {
        Ok(tiled) => tiled,
        Err(_) => return false,
    };
    if !tiled {
        return true;
    }
    File::open(base_path.join(tile_file_name(map_id, tile_x, tile_y)))
        .map_err(VMapError::from)
        .and_then(|mut f| read_chunk(&mut f, VMAP_MAGIC))
        .is_ok()
}

fn read_tree_header(path: &Path) -> VMapResult<bool> {
    let mut r = File::open(path)?;
    read_chunk(&mut r, VMAP_MAGIC)?;
    Ok(read_u8(&mut r)? != 0)
}

pub struct StaticMapTree {
    map_id: u32,
    is_tiled: bool,
    initialized: bool,
    tree: Bih,
    /// One slot per tree object, filled while a tile references it.
    values: Vec<Option<ModelInstance>>,
    /// packed tile id -> tile file exists
    loaded_tiles: HashMap<u32, bool>,
    /// tree slot -> number of loaded tiles referencing it
    loaded_spawns: HashMap<u32, u32>,
    base_path: PathBuf,
}

impl StaticMapTree {
    pub fn new(map_id: u32, base_path: &Path) -> Self {
        Self {
            map_id,
            is_tiled: false,
            initialized: false,
            tree: Bih::new(),
            values: Vec::new(),
            loaded_tiles: HashMap::new(),
            loaded_spawns: HashMap::new(),
            base_path: base_path.to_path_buf(),
        }
    }

    pub fn map_id(&self) -> u32 {
        self.map_id
    }

    pub fn is_tiled(&self) -> bool {
        self.is_tiled
    }

    pub fn tree(&self) -> &Bih {
        &self.tree
    }

    pub fn loaded_tile_count(&self) -> usize {
        self.loaded_tiles.len()
    }

    pub fn has_loaded_tile(&self, tile_x: u32, tile_y: u32) -> bool {
        self.loaded_tiles.contains_key(&pack_tile_id(tile_x, tile_y))
    }

    /// Number of loaded tiles referencing tree slot `slot`.
    pub fn spawn_ref_count(&self, slot: u32) -> u32 {
        self.loaded_spawns.get(&slot).copied().unwrap_or(0)
    }

    pub fn instance(&self, slot: u32) -> Option<&ModelInstance> {
        self.values.get(slot as usize)?.as_ref()
    }

    // ============================================================
    // Loading
    // ============================================================

    /// Read the tree file and, for untiled maps, the single global spawn.
    pub fn init_map(&mut self, cache: &mut ModelCache) -> VMapResult<()> {
        let path = self.base_path.join(tree_file_name(self.map_id));
        debug!("initializing map tree '{}'", path.display());

        let mut r = BufReader::new(File::open(&path)?);
        read_chunk(&mut r, VMAP_MAGIC)?;
        self.is_tiled = read_u8(&mut r)? != 0;

        read_chunk(&mut r, b"NODE")?;
        let tree = Bih::read_from(&mut r)?;
        let count = tree.primitive_count();
        tree.check_object_range(count)?;
        self.tree = tree;
        self.values = vec![None; count];
        self.initialized = true;

        read_chunk(&mut r, b"GOBJ")?;
        if self.is_tiled {
            return Ok(());
        }
        // untiled maps carry at most one global object, always in slot 0
        let Some(spawn) = ModelSpawn::read_from(&mut r)? else {
            return Ok(());
        };
        if self.values.is_empty() {
            return Err(VMapError::InvalidTreeSlot { slot: 0, count: 0 });
        }
        debug!("map {}: loading global model '{}'", self.map_id, spawn.name);
        let model = cache.acquire(&self.base_path, &spawn.name).map_err(|e| {
            error!("map {}: could not acquire global model '{}'", self.map_id, spawn.name);
            e
        })?;
        self.values[0] = Some(ModelInstance::new(spawn, Arc::downgrade(&model)));
        self.loaded_spawns.insert(0, 1);
        Ok(())
    }

    /// Release every model still referenced and forget all tiles.
    pub fn unload_map(&mut self, cache: &mut ModelCache) {
        for (slot, count) in self.loaded_spawns.drain() {
            let Some(instance) = self.values.get_mut(slot as usize).and_then(Option::take) else {
                continue;
            };
            for _ in 0..count {
                cache.release(&instance.spawn().name);
            }
        }
        self.loaded_tiles.clear();
    }

    pub fn load_map_tile(&mut self, tile_x: u32, tile_y: u32, cache: &mut ModelCache) -> VMapResult<()> {
        let tile_id = pack_tile_id(tile_x, tile_y);
        if !self.is_tiled {
            // untiled maps still see tile loads, they only drive unloading
            self.loaded_tiles.insert(tile_id, false);
            return Ok(());
        }
        if !self.initialized {
            error!("map tree {} has not been initialized [{}, {}]", self.map_id, tile_x, tile_y);
            return Err(VMapError::TreeNotInitialized(self.map_id));
        }

        let path = self.base_path.join(tile_file_name(self.map_id, tile_x, tile_y));
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(_) => {
                self.loaded_tiles.insert(tile_id, false);
                return Ok(());
            }
        };

        let res = self.load_tile_spawns(&mut BufReader::new(file), tile_x, tile_y, cache);
        self.loaded_tiles.insert(tile_id, true);
        res
    }

    fn load_tile_spawns<R: Read>(
        &mut self,
        r: &mut R,
        tile_x: u32,
        tile_y: u32,
        cache: &mut ModelCache,
    ) -> VMapResult<()> {
        read_chunk(r, VMAP_MAGIC)?;
        let count = read_u32(r)?;
        for _ in 0..count {
            let spawn = ModelSpawn::read_from(r)?.ok_or(VMapError::Truncated)?;
            let slot = self.read_slot(r)?;

            let model = match cache.acquire(&self.base_path, &spawn.name) {
                Ok(model) => Arc::downgrade(&model),
                Err(_) => {
                    error!("could not acquire model '{}' for tile [{}, {}]", spawn.name, tile_x, tile_y);
                    Weak::new()
                }
            };

            let refs = self.loaded_spawns.entry(slot).or_insert(0);
            if *refs == 0 {
                self.values[slot as usize] = Some(ModelInstance::new(spawn, model));
            }
            *refs += 1;
        }
        Ok(())
    }

    fn read_slot<R: Read>(&self, r: &mut R) -> VMapResult<u32> {
        let slot = read_u32(r)?;
        if slot as usize >= self.values.len() {
            return Err(VMapError::InvalidTreeSlot {
                slot,
                count: self.values.len(),
            });
        }
        Ok(slot)
    }

    pub fn unload_map_tile(&mut self, tile_x: u32, tile_y: u32, cache: &mut ModelCache) {
        let tile_id = pack_tile_id(tile_x, tile_y);
        let Some(&has_file) = self.loaded_tiles.get(&tile_id) else {
            error!(
                "trying to unload non-loaded tile - map: {} x: {} y: {}",
                self.map_id, tile_x, tile_y
            );
            return;
        };

        if has_file {
            let path = self.base_path.join(tile_file_name(self.map_id, tile_x, tile_y));
            let res = File::open(&path)
                .map_err(VMapError::from)
                .and_then(|file| self.unload_tile_spawns(&mut BufReader::new(file), cache));
            if let Err(e) = res {
                error!("error unloading tile '{}': {}", path.display(), e);
            }
        }
        self.loaded_tiles.remove(&tile_id);
    }

    fn unload_tile_spawns<R: Read>(&mut self, r: &mut R, cache: &mut ModelCache) -> VMapResult<()> {
        read_chunk(r, VMAP_MAGIC)?;
        let count = read_u32(r)?;
        for _ in 0..count {
            let spawn = ModelSpawn::read_from(r)?.ok_or(VMapError::Truncated)?;
            let slot = self.read_slot(r)?;
            cache.release(&spawn.name);

            match self.loaded_spawns.get_mut(&slot) {
                None => error!(
                    "trying to unload non-referenced model '{}' (id: {})",
                    spawn.name, spawn.id
                ),
                Some(refs) => {
                    *refs -= 1;
                    if *refs == 0 {
                        self.values[slot as usize] = None;
                        self.loaded_spawns.remove(&slot);
                    }
                }
            }
        }
        Ok(())
    }

    // ============================================================
    // Queries
    // ============================================================

    /// Closest instance hit within `max_dist`, shrinking it on a hit.
    fn intersection_time(&self, ray: &Ray, max_dist: &mut f32, stop_at_first_hit: bool) -> bool {
        let mut distance = *max_dist;
        let mut hit = false;
        self.tree.intersect_ray(
            ray,
            |r, entry, dist, stop| {
                let res = self.values[entry as usize]
                    .as_ref()
                    .is_some_and(|instance| instance.intersect_ray(r, dist, stop));
                hit |= res;
                res
            },
            &mut distance,
            stop_at_first_hit,
        );
        if hit {
            *max_dist = distance;
        }
        hit
    }

    pub fn is_in_los(&self, pos1: &Vec3, pos2: &Vec3) -> bool {
        let delta = vector_subtract(pos2, pos1);
        let mut max_dist = vector_length(&delta);
        if max_dist < MIN_QUERY_DISTANCE {
            return true;
        }
        let ray = Ray::new(*pos1, vector_scale(&delta, 1.0 / max_dist));
        !self.intersection_time(&ray, &mut max_dist, true)
    }

    /// First object hit moving from `pos1` to `pos2`, moved `modify_dist`
    /// along the segment. A pull-back longer than the hit distance stops
    /// at `pos1`.
    pub fn get_object_hit_pos(&self, pos1: &Vec3, pos2: &Vec3, modify_dist: f32) -> Option<Vec3> {
        let delta = vector_subtract(pos2, pos1);
        let max_dist = vector_length(&delta);
        if max_dist < MIN_QUERY_DISTANCE {
            return None;
        }

        let dir = vector_scale(&delta, 1.0 / max_dist);
        let ray = Ray::new(*pos1, dir);
        let mut dist = max_dist;
        if !self.intersection_time(&ray, &mut dist, false) {
            return None;
        }

        let hit_pos = vector_ma(pos1, dist, &dir);
        if modify_dist < 0.0 && vector_length(&vector_subtract(&hit_pos, pos1)) <= -modify_dist {
            return Some(*pos1);
        }
        Some(vector_ma(&hit_pos, modify_dist, &dir))
    }

    /// Height of the first surface below `pos` within `max_dist`, or
    /// `f32::INFINITY`.
    pub fn get_height(&self, pos: &Vec3, max_dist: f32) -> f32 {
        let ray = Ray::new(*pos, [0.0, 0.0, -1.0]);
        let mut dist = max_dist;
        if self.intersection_time(&ray, &mut dist, false) {
            pos[2] - dist
        } else {
            f32::INFINITY
        }
    }

    pub fn get_area_info(&self, pos: &Vec3) -> Option<AreaInfo> {
        let mut info = AreaInfo::default();
        self.tree.intersect_point(pos, |p, entry| {
            if let Some(instance) = &self.values[entry as usize] {
                instance.intersect_point(p, &mut info);
            }
        });
        info.result.then_some(info)
    }

    pub fn get_location_info(&self, pos: &Vec3) -> Option<LocationInfo<'_>> {
        let mut info = LocationInfo::default();
        let mut found = false;
        self.tree.intersect_point(pos, |p, entry| {
            if let Some(instance) = &self.values[entry as usize] {
                found |= instance.location_info(p, &mut info);
            }
        });
        found.then_some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_instance::ModelFlags;
    use crate::tile_assembler::{RawGroup, RawModel, TileAssembler};
    use crate::world_model::MeshTriangle;
    use std::io::Write;
    use vmap_common::files::{write_u32, VMAP_MAGIC};
    use vmap_common::AaBox;

    const FLOOR_BOUNDS: AaBox = AaBox {
        lo: [0.0, 0.0, -1.0],
        hi: [10.0, 10.0, 10.0],
    };

    fn floor_model() -> RawModel {
        RawModel {
            root_id: 500,
            groups: vec![RawGroup {
                flags: 0x8,
                group_id: 2,
                bounds: FLOOR_BOUNDS,
                vertices: vec![[0.0, 0.0, 0.0], [10.0, 0.0, 0.0], [10.0, 10.0, 0.0], [0.0, 10.0, 0.0]],
                triangles: vec![MeshTriangle::new(0, 1, 2), MeshTriangle::new(0, 2, 3)],
                liquid: None,
            }],
        }
    }

    fn floor_spawn(id: u32, x: f32, y: f32) -> ModelSpawn {
        ModelSpawn {
            flags: ModelFlags::HAS_BOUND,
            adt_id: 3,
            id,
            pos: [x, y, 0.0],
            bounds: FLOOR_BOUNDS.translated(&[x, y, 0.0]),
            name: "floor".to_string(),
            ..Default::default()
        }
    }

    /// Map 1: spawn 7 on tiles (1, 1) and (1, 2), spawn 8 on (1, 1) only.
    fn tiled_fixture(dir: &Path) {
        let mut assembler = TileAssembler::new(dir);
        assembler.add_model("floor", floor_model());
        assembler.add_spawn(1, 1, 1, floor_spawn(7, 100.0, 100.0));
        assembler.add_spawn(1, 1, 2, floor_spawn(7, 100.0, 100.0));
        assembler.add_spawn(1, 1, 1, floor_spawn(8, 300.0, 100.0));
        assembler.convert_world().unwrap();
    }

    fn loaded_tree(dir: &Path, cache: &mut ModelCache) -> StaticMapTree {
        let mut tree = StaticMapTree::new(1, dir);
        tree.init_map(cache).unwrap();
        tree
    }

    fn slot_of(tree: &StaticMapTree, id: u32) -> u32 {
        (0..tree.values.len() as u32)
            .find(|&s| tree.instance(s).is_some_and(|i| i.spawn().id == id))
            .unwrap()
    }

    #[test]
    fn test_file_names_and_tile_ids() {
        assert_eq!(tree_file_name(1), "001.vmtree");
        assert_eq!(tile_file_name(530, 3, 45), "530_45_03.vmtile");
        let id = pack_tile_id(31, 65);
        assert_eq!(id, (31 << 16) | 65);
        assert_eq!(unpack_tile_id(id), (31, 65));
    }

    #[test]
    fn test_can_load_map() {
        let dir = tempfile::tempdir().unwrap();
        tiled_fixture(dir.path());
        assert!(can_load_map(dir.path(), 1, 1, 1));
        assert!(!can_load_map(dir.path(), 1, 5, 5));
        assert!(!can_load_map(dir.path(), 2, 1, 1));
    }

    #[test]
    fn test_queries_on_loaded_tile() {
        let dir = tempfile::tempdir().unwrap();
        tiled_fixture(dir.path());
        let mut cache = ModelCache::new();
        let mut tree = loaded_tree(dir.path(), &mut cache);
        assert!(tree.is_tiled());

        // nothing loaded yet
        assert!(tree.is_in_los(&[105.0, 105.0, 5.0], &[105.0, 105.0, -5.0]));

        tree.load_map_tile(1, 1, &mut cache).unwrap();
        assert!(!tree.is_in_los(&[105.0, 105.0, 5.0], &[105.0, 105.0, -5.0]));
        assert!(tree.is_in_los(&[105.0, 105.0, 5.0], &[105.0, 108.0, 5.0]));
        assert!(tree.is_in_los(&[105.0, 105.0, 5.0], &[105.0, 105.0, 5.0]));

        assert!((tree.get_height(&[105.0, 105.0, 5.0], 10.0)).abs() < 1e-3);
        assert_eq!(tree.get_height(&[105.0, 105.0, 5.0], 2.0), f32::INFINITY);
        assert_eq!(tree.get_height(&[200.0, 200.0, 5.0], 10.0), f32::INFINITY);

        let info = tree.get_area_info(&[305.0, 105.0, 5.0]).unwrap();
        assert_eq!(info.root_id, 500);
        assert_eq!(info.group_id, 2);
        assert_eq!(info.adt_id, 3);
        assert!(info.ground_z.abs() < 1e-3);
        assert!(tree.get_area_info(&[200.0, 105.0, 5.0]).is_none());

        let location = tree.get_location_info(&[105.0, 105.0, 5.0]).unwrap();
        assert_eq!(location.hit_instance.map(|i| i.spawn().id), Some(7));
        assert!(location.hit_model.is_some());
    }

    #[test]
    fn test_object_hit_pos() {
        let dir = tempfile::tempdir().unwrap();
        tiled_fixture(dir.path());
        let mut cache = ModelCache::new();
        let mut tree = loaded_tree(dir.path(), &mut cache);
        tree.load_map_tile(1, 1, &mut cache).unwrap();

        let from = [105.0, 105.0, 5.0];
        let to = [105.0, 105.0, -5.0];
        let hit = tree.get_object_hit_pos(&from, &to, 0.0).unwrap();
        assert!(hit[2].abs() < 1e-3);
        let hit = tree.get_object_hit_pos(&from, &to, -1.0).unwrap();
        assert!((hit[2] - 1.0).abs() < 1e-3);
        assert_eq!(tree.get_object_hit_pos(&from, &to, -10.0), Some(from));
        let hit = tree.get_object_hit_pos(&from, &to, 0.5).unwrap();
        assert!((hit[2] + 0.5).abs() < 1e-3);

        assert_eq!(tree.get_object_hit_pos(&from, &[105.0, 108.0, 5.0], 0.0), None);
        assert_eq!(tree.get_object_hit_pos(&from, &from, 0.0), None);
    }

    #[test]
    fn test_shared_spawn_unload_order() {
        for unload_first in [(1, 1), (1, 2)] {
            let dir = tempfile::tempdir().unwrap();
            tiled_fixture(dir.path());
            let mut cache = ModelCache::new();
            let mut tree = loaded_tree(dir.path(), &mut cache);

            tree.load_map_tile(1, 1, &mut cache).unwrap();
            tree.load_map_tile(1, 2, &mut cache).unwrap();
            let slot7 = slot_of(&tree, 7);
            assert_eq!(tree.spawn_ref_count(slot7), 2);
            assert_eq!(cache.ref_count("floor"), 3);

            tree.unload_map_tile(unload_first.0, unload_first.1, &mut cache);
            assert_eq!(tree.spawn_ref_count(slot7), 1);
            assert!(tree.instance(slot7).is_some_and(|i| i.is_loaded()));
            assert!(!tree.is_in_los(&[105.0, 105.0, 5.0], &[105.0, 105.0, -5.0]));

            let other = if unload_first == (1, 1) { (1, 2) } else { (1, 1) };
            tree.unload_map_tile(other.0, other.1, &mut cache);
            assert_eq!(tree.spawn_ref_count(slot7), 0);
            assert!(tree.instance(slot7).is_none());
            assert_eq!(tree.loaded_tile_count(), 0);
            assert!(cache.is_empty());
            assert!(tree.is_in_los(&[105.0, 105.0, 5.0], &[105.0, 105.0, -5.0]));
        }
    }

    #[test]
    fn test_ref_counting_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut assembler = TileAssembler::new(dir.path());
        assembler.add_model("floor", floor_model());
        for x in 0..6 {
            assembler.add_spawn(1, x, 0, floor_spawn(7, 100.0, 100.0));
        }
        assembler.convert_world().unwrap();

        let mut cache = ModelCache::new();
        let mut tree = loaded_tree(dir.path(), &mut cache);
        for _ in 0..3 {
            for x in 0..6 {
                tree.load_map_tile(x, 0, &mut cache).unwrap();
            }
            assert_eq!(tree.spawn_ref_count(0), 6);
            assert_eq!(cache.ref_count("floor"), 6);
            for x in (0..6).rev() {
                tree.unload_map_tile(x, 0, &mut cache);
            }
            assert_eq!(tree.spawn_ref_count(0), 0);
            assert!(cache.is_empty());
        }
    }

    #[test]
    fn test_missing_tile_and_unknown_unload() {
        let dir = tempfile::tempdir().unwrap();
        tiled_fixture(dir.path());
        let mut cache = ModelCache::new();
        let mut tree = loaded_tree(dir.path(), &mut cache);

        tree.load_map_tile(9, 9, &mut cache).unwrap();
        assert!(tree.has_loaded_tile(9, 9));
        tree.unload_map_tile(9, 9, &mut cache);
        assert!(!tree.has_loaded_tile(9, 9));

        // only logged
        tree.unload_map_tile(4, 4, &mut cache);
        assert_eq!(tree.loaded_tile_count(), 0);
    }

    #[test]
    fn test_uninitialized_tree() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ModelCache::new();
        let mut tree = StaticMapTree::new(1, dir.path());
        tree.is_tiled = true;
        assert!(matches!(
            tree.load_map_tile(1, 1, &mut cache),
            Err(VMapError::TreeNotInitialized(1))
        ));
        assert!(tree.init_map(&mut cache).is_err());
    }

    #[test]
    fn test_tile_with_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        tiled_fixture(dir.path());
        std::fs::remove_file(dir.path().join("floor.vmo")).unwrap();

        let mut cache = ModelCache::new();
        let mut tree = loaded_tree(dir.path(), &mut cache);
        tree.load_map_tile(1, 1, &mut cache).unwrap();

        // the slot is referenced but its instance has nothing to query
        let slot7 = slot_of(&tree, 7);
        assert_eq!(tree.spawn_ref_count(slot7), 1);
        assert!(tree.instance(slot7).is_some_and(|i| !i.is_loaded()));
        assert!(cache.is_empty());
        assert!(tree.is_in_los(&[105.0, 105.0, 5.0], &[105.0, 105.0, -5.0]));
        assert_eq!(tree.get_height(&[105.0, 105.0, 5.0], 10.0), f32::INFINITY);

        tree.unload_map_tile(1, 1, &mut cache);
        assert_eq!(tree.loaded_tile_count(), 0);
        assert_eq!(tree.spawn_ref_count(slot7), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_slot_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        tiled_fixture(dir.path());
        let mut f = File::create(dir.path().join(tile_file_name(1, 3, 3))).unwrap();
        f.write_all(VMAP_MAGIC).unwrap();
        write_u32(&mut f, 1).unwrap();
        floor_spawn(9, 0.0, 0.0).write_to(&mut f).unwrap();
        write_u32(&mut f, 99).unwrap();
        drop(f);

        let mut cache = ModelCache::new();
        let mut tree = loaded_tree(dir.path(), &mut cache);
        assert!(matches!(
            tree.load_map_tile(3, 3, &mut cache),
            Err(VMapError::InvalidTreeSlot { slot: 99, .. })
        ));
        assert!(tree.has_loaded_tile(3, 3));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_untiled_map_global_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let mut assembler = TileAssembler::new(dir.path());
        assembler.add_model("floor", floor_model());
        let offset = 533.33333 * 32.0;
        let spawn = ModelSpawn {
            flags: ModelFlags::WORLD_SPAWN | ModelFlags::HAS_BOUND,
            id: 1,
            pos: [offset, offset, 0.0],
            bounds: FLOOR_BOUNDS,
            name: "floor".to_string(),
            ..Default::default()
        };
        assembler.add_spawn(1, 65, 65, spawn);
        assembler.convert_world().unwrap();
        assert!(!dir.path().join(tile_file_name(1, 65, 65)).exists());

        let mut cache = ModelCache::new();
        let mut tree = loaded_tree(dir.path(), &mut cache);
        assert!(!tree.is_tiled());
        assert_eq!(tree.spawn_ref_count(0), 1);
        assert_eq!(cache.ref_count("floor"), 1);

        tree.load_map_tile(30, 30, &mut cache).unwrap();
        tree.load_map_tile(31, 30, &mut cache).unwrap();
        assert_eq!(tree.loaded_tile_count(), 2);

        let above = [offset + 5.0, offset + 5.0, 5.0];
        let below = [offset + 5.0, offset + 5.0, -5.0];
        assert!(!tree.is_in_los(&above, &below));

        tree.unload_map(&mut cache);
        assert_eq!(tree.loaded_tile_count(), 0);
        assert!(cache.is_empty());
        assert!(tree.is_in_los(&above, &below));
    }
}
