// manager.rs - map-level query interface over all loaded map trees
//
// Callers work in world coordinates; the trees are built in a mirrored
// frame, `convert_position` maps between the two. The manager owns every
// StaticMapTree and the shared ModelCache.

use std::collections::HashMap;
use std::path::Path;

use bitflags::bitflags;
use tracing::{debug, error};
use vmap_common::math::Vec3;

use crate::config::VMapConfig;
use crate::map_tree::{can_load_map, tile_file_name, StaticMapTree};
use crate::model_cache::ModelCache;
use crate::model_instance::AreaInfo;

/// Heights below this are "no height".
pub const VMAP_INVALID_HEIGHT: f32 = -100000.0;
/// Value returned when no height is available.
pub const VMAP_INVALID_HEIGHT_VALUE: f32 = -200000.0;

const MAP_HALF_EXTENT: f32 = 0.5 * 64.0 * 533.33333;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VMapLoadResult {
    Error,
    Ok,
    /// Both LoS and height are disabled, nothing was loaded.
    Ignored,
}

bitflags! {
    /// Per-map switches for individual query kinds.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DisableFlags: u32 {
        const AREA_FLAG     = 0x1;
        const HEIGHT        = 0x2;
        const LOS           = 0x4;
        const LIQUID_STATUS = 0x8;
    }
}

/// Liquid found at a position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidLevel {
    pub level: f32,
    pub floor: f32,
    /// Single-bit liquid type mask.
    pub liquid_type: u32,
}

/// World coordinates to tree coordinates and back; the mapping is its own
/// inverse.
pub fn convert_position(x: f32, y: f32, z: f32) -> Vec3 {
    [MAP_HALF_EXTENT - x, MAP_HALF_EXTENT - y, z]
}

/// What gameplay code needs from the collision system.
pub trait VMapQuery {
    fn load_map(&mut self, base_path: &Path, map_id: u32, tile_x: u32, tile_y: u32) -> VMapLoadResult;
    fn exists_map(&self, base_path: &Path, map_id: u32, tile_x: u32, tile_y: u32) -> bool;
    fn unload_map_tile(&mut self, map_id: u32, tile_x: u32, tile_y: u32);
    fn unload_map(&mut self, map_id: u32);

    fn is_in_los(&self, map_id: u32, pos1: &Vec3, pos2: &Vec3) -> bool;
    fn get_height(&self, map_id: u32, pos: &Vec3, max_dist: f32) -> f32;
    /// Hit position (or `pos2` when nothing is hit) and whether anything
    /// was hit.
    fn get_object_hit_pos(&self, map_id: u32, pos1: &Vec3, pos2: &Vec3, modify_dist: f32) -> (Vec3, bool);
    /// Area data under `(x, y, z)`; `z` is moved to the floor on success.
    fn get_area_info(&self, map_id: u32, x: f32, y: f32, z: &mut f32) -> Option<AreaInfo>;
    fn get_liquid_level(&self, map_id: u32, x: f32, y: f32, z: f32, req_liquid_type: u8) -> Option<LiquidLevel>;

    fn get_file_name(&self, map_id: u32, tile_x: u32, tile_y: u32) -> String {
        tile_file_name(map_id, tile_x, tile_y)
    }
}

pub struct VMapManager {
    instance_trees: HashMap<u32, StaticMapTree>,
    models: ModelCache,
    disabled_maps: HashMap<u32, DisableFlags>,
    enable_los: bool,
    enable_height: bool,
}

impl Default for VMapManager {
    fn default() -> Self {
        Self {
            instance_trees: HashMap::new(),
            models: ModelCache::new(),
            disabled_maps: HashMap::new(),
            enable_los: true,
            enable_height: true,
        }
    }
}

impl VMapManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &VMapConfig) -> Self {
        let mut manager = Self::new();
        manager.set_enable_los(config.enable_los);
        manager.set_enable_height(config.enable_height);
        manager
    }

    /// Takes effect for maps loaded afterwards.
    pub fn set_enable_los(&mut self, value: bool) {
        self.enable_los = value;
    }

    pub fn set_enable_height(&mut self, value: bool) {
        self.enable_height = value;
    }

    pub fn is_enabled_los(&self) -> bool {
        self.enable_los
    }

    pub fn is_enabled_height(&self) -> bool {
        self.enable_height
    }

    pub fn is_map_loading_enabled(&self) -> bool {
        self.enable_los || self.enable_height
    }

    pub fn set_disable_flags(&mut self, map_id: u32, flags: DisableFlags) {
        if flags.is_empty() {
            self.disabled_maps.remove(&map_id);
        } else {
            self.disabled_maps.insert(map_id, flags);
        }
    }

    pub fn is_disabled_for(&self, map_id: u32, flag: DisableFlags) -> bool {
        self.disabled_maps.get(&map_id).is_some_and(|f| f.intersects(flag))
    }

    pub fn map_tree(&self, map_id: u32) -> Option<&StaticMapTree> {
        self.instance_trees.get(&map_id)
    }

    pub fn model_cache(&self) -> &ModelCache {
        &self.models
    }

    fn load_map_tile(&mut self, base_path: &Path, map_id: u32, tile_x: u32, tile_y: u32) -> bool {
        if !self.instance_trees.contains_key(&map_id) {
            let mut tree = StaticMapTree::new(map_id, base_path);
            if let Err(e) = tree.init_map(&mut self.models) {
                error!("could not initialize map {}: {}", map_id, e);
                // release whatever the failed init managed to reference
                tree.unload_map(&mut self.models);
                return false;
            }
            debug!("map {} initialized (tiled: {})", map_id, tree.is_tiled());
            self.instance_trees.insert(map_id, tree);
        }

        let Some(tree) = self.instance_trees.get_mut(&map_id) else {
            return false;
        };
        match tree.load_map_tile(tile_x, tile_y, &mut self.models) {
            Ok(()) => true,
            Err(e) => {
                error!("could not load map {} tile [{}, {}]: {}", map_id, tile_x, tile_y, e);
                false
            }
        }
    }

    /// Drop the tree of `map_id` once no tile references it.
    fn drop_tree_if_unused(&mut self, map_id: u32) {
        if self
            .instance_trees
            .get(&map_id)
            .is_some_and(|tree| tree.loaded_tile_count() == 0)
        {
            debug!("map {} has no tiles left, dropping tree", map_id);
            if let Some(mut tree) = self.instance_trees.remove(&map_id) {
                // untiled maps still hold their global model
                tree.unload_map(&mut self.models);
            }
        }
    }
}

impl VMapQuery for VMapManager {
    fn load_map(&mut self, base_path: &Path, map_id: u32, tile_x: u32, tile_y: u32) -> VMapLoadResult {
        if !self.is_map_loading_enabled() {
            return VMapLoadResult::Ignored;
        }
        if self.load_map_tile(base_path, map_id, tile_x, tile_y) {
            VMapLoadResult::Ok
        } else {
            VMapLoadResult::Error
        }
    }

    fn exists_map(&self, base_path: &Path, map_id: u32, tile_x: u32, tile_y: u32) -> bool {
        can_load_map(base_path, map_id, tile_x, tile_y)
    }

    fn unload_map_tile(&mut self, map_id: u32, tile_x: u32, tile_y: u32) {
        if let Some(tree) = self.instance_trees.get_mut(&map_id) {
            tree.unload_map_tile(tile_x, tile_y, &mut self.models);
            self.drop_tree_if_unused(map_id);
        }
    }

    fn unload_map(&mut self, map_id: u32) {
        if let Some(tree) = self.instance_trees.get_mut(&map_id) {
            tree.unload_map(&mut self.models);
            self.drop_tree_if_unused(map_id);
        }
    }

    fn is_in_los(&self, map_id: u32, pos1: &Vec3, pos2: &Vec3) -> bool {
        if !self.enable_los || self.is_disabled_for(map_id, DisableFlags::LOS) {
            return true;
        }
        let Some(tree) = self.instance_trees.get(&map_id) else {
            return true;
        };
        let p1 = convert_position(pos1[0], pos1[1], pos1[2]);
        let p2 = convert_position(pos2[0], pos2[1], pos2[2]);
        if p1 == p2 {
            return true;
        }
        tree.is_in_los(&p1, &p2)
    }

    fn get_height(&self, map_id: u32, pos: &Vec3, max_dist: f32) -> f32 {
        if !self.enable_height || self.is_disabled_for(map_id, DisableFlags::HEIGHT) {
            return VMAP_INVALID_HEIGHT_VALUE;
        }
        let Some(tree) = self.instance_trees.get(&map_id) else {
            return VMAP_INVALID_HEIGHT_VALUE;
        };
        let height = tree.get_height(&convert_position(pos[0], pos[1], pos[2]), max_dist);
        if height < f32::INFINITY {
            height
        } else {
            VMAP_INVALID_HEIGHT_VALUE
        }
    }

    fn get_object_hit_pos(&self, map_id: u32, pos1: &Vec3, pos2: &Vec3, modify_dist: f32) -> (Vec3, bool) {
        if !self.enable_los || self.is_disabled_for(map_id, DisableFlags::LOS) {
            return (*pos2, false);
        }
        let Some(tree) = self.instance_trees.get(&map_id) else {
            return (*pos2, false);
        };
        let p1 = convert_position(pos1[0], pos1[1], pos1[2]);
        let p2 = convert_position(pos2[0], pos2[1], pos2[2]);
        match tree.get_object_hit_pos(&p1, &p2, modify_dist) {
            Some(hit) => (convert_position(hit[0], hit[1], hit[2]), true),
            None => (*pos2, false),
        }
    }

    fn get_area_info(&self, map_id: u32, x: f32, y: f32, z: &mut f32) -> Option<AreaInfo> {
        if self.is_disabled_for(map_id, DisableFlags::AREA_FLAG) {
            return None;
        }
        let tree = self.instance_trees.get(&map_id)?;
        let info = tree.get_area_info(&convert_position(x, y, *z))?;
        *z = info.ground_z;
        Some(info)
    }

    fn get_liquid_level(&self, map_id: u32, x: f32, y: f32, z: f32, req_liquid_type: u8) -> Option<LiquidLevel> {
        if self.is_disabled_for(map_id, DisableFlags::LIQUID_STATUS) {
            return None;
        }
        let tree = self.instance_trees.get(&map_id)?;
        let pos = convert_position(x, y, z);
        let info = tree.get_location_info(&pos)?;
        let (instance, group) = (info.hit_instance?, info.hit_model.as_ref()?);

        let liquid_type = group.group().liquid_type();
        if req_liquid_type != 0 && liquid_type & req_liquid_type as u32 == 0 {
            return None;
        }
        let level = instance.liquid_level(&pos, group.group())?;
        Some(LiquidLevel {
            level,
            floor: info.ground_z,
            liquid_type,
        })
    }
}
