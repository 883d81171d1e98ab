// tile_assembler.rs - writes map trees, tile files and model files
//
// Spawns are collected per map and tile, models by file name. convert_world
// writes everything the loaders read: one .vmtree per map, one .vmtile per
// tile and one .vmo per spawned model.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use rayon::prelude::*;
use tracing::{debug, info};
use vmap_common::files::{count_u32, write_chunk, write_u32, write_u8, VMAP_MAGIC};
use vmap_common::math::{vector_scale, Matrix3, Vec3};
use vmap_common::{AaBox, VMapError, VMapResult};

use crate::bih::DEFAULT_LEAF_SIZE;
use crate::bih_build::BihBuilder;
use crate::map_tree::{pack_tile_id, tile_file_name, tree_file_name, unpack_tile_id};
use crate::model_cache::model_file_path;
use crate::model_instance::{ModelFlags, ModelSpawn};
use crate::world_model::{GroupModel, MeshTriangle, WmoLiquid, WorldModel};

/// Tile holding the global spawn of maps without terrain.
const GLOBAL_TILE: (u32, u32) = (65, 65);

/// World spawns are placed relative to the map corner, tiles to its center.
const WORLD_SPAWN_OFFSET: f32 = 533.33333 * 32.0;

/// Raw geometry of one group before its triangle tree is built.
#[derive(Debug, Clone, Default)]
pub struct RawGroup {
    pub flags: u32,
    pub group_id: u32,
    pub bounds: AaBox,
    pub vertices: Vec<Vec3>,
    pub triangles: Vec<MeshTriangle>,
    pub liquid: Option<WmoLiquid>,
}

#[derive(Debug, Clone, Default)]
pub struct RawModel {
    pub root_id: u32,
    pub groups: Vec<RawGroup>,
}

impl RawModel {
    fn into_world_model(self) -> WorldModel {
        let build = |raw: RawGroup| {
            let mut group = GroupModel::new(raw.flags, raw.group_id, raw.bounds);
            group.set_mesh_data(raw.vertices, raw.triangles);
            group.set_liquid_data(raw.liquid);
            group
        };
        let groups: Vec<GroupModel> = if self.groups.len() >= TileAssembler::PARALLEL_GROUP_THRESHOLD {
            self.groups.into_par_iter().map(build).collect()
        } else {
            self.groups.into_iter().map(build).collect()
        };

        let mut model = WorldModel::new(self.root_id);
        model.set_group_models(groups);
        model
    }
}

#[derive(Default)]
struct MapSpawns {
    /// spawn id -> spawn
    entries: BTreeMap<u32, ModelSpawn>,
    /// packed tile id -> spawn ids on that tile
    tiles: BTreeMap<u32, Vec<u32>>,
}

pub struct TileAssembler {
    dest_dir: PathBuf,
    map_data: BTreeMap<u32, MapSpawns>,
    models: HashMap<String, RawModel>,
}

impl TileAssembler {
    /// Models with at least this many groups build their group trees in
    /// parallel.
    const PARALLEL_GROUP_THRESHOLD: usize = 16;

    pub fn new(dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            dest_dir: dest_dir.into(),
            map_data: BTreeMap::new(),
            models: HashMap::new(),
        }
    }

    /// Place `spawn` on a tile. A spawn id seen before on the same map
    /// keeps its first placement data.
    pub fn add_spawn(&mut self, map_id: u32, tile_x: u32, tile_y: u32, spawn: ModelSpawn) {
        let map = self.map_data.entry(map_id).or_insert_with(|| {
            debug!("spawning map {}", map_id);
            MapSpawns::default()
        });
        let id = spawn.id;
        map.entries.entry(id).or_insert(spawn);
        let tile = map.tiles.entry(pack_tile_id(tile_x, tile_y)).or_default();
        if !tile.contains(&id) {
            tile.push(id);
        }
    }

    pub fn add_model(&mut self, name: &str, model: RawModel) {
        self.models.insert(name.to_string(), model);
    }

    pub fn convert_world(&mut self) -> VMapResult<()> {
        let mut spawned_models = BTreeSet::new();

        for (&map_id, map) in self.map_data.iter_mut() {
            debug!("calculating model bounds for map {}", map_id);
            for spawn in map.entries.values_mut() {
                if spawn.flags.contains(ModelFlags::M2) || !spawn.flags.contains(ModelFlags::HAS_BOUND) {
                    let model = self
                        .models
                        .get(&spawn.name)
                        .ok_or_else(|| VMapError::ModelNotLoaded(spawn.name.clone()))?;
                    calculate_transformed_bounds(spawn, model)?;
                } else if spawn.flags.contains(ModelFlags::WORLD_SPAWN) {
                    spawn.bounds = spawn
                        .bounds
                        .translated(&[WORLD_SPAWN_OFFSET, WORLD_SPAWN_OFFSET, 0.0]);
                }
                spawned_models.insert(spawn.name.clone());
            }

            info!("creating map tree for map {}", map_id);
            write_map(&self.dest_dir, map_id, map)?;
        }

        info!("converting {} model files", spawned_models.len());
        for name in &spawned_models {
            let raw = self
                .models
                .get(name)
                .cloned()
                .ok_or_else(|| VMapError::ModelNotLoaded(name.clone()))?;
            debug!("converting '{}'", name);
            raw.into_world_model()
                .write_file(&model_file_path(&self.dest_dir, name))?;
        }
        Ok(())
    }
}

/// Bounds of `model` placed by `spawn`, for spawns that carry none.
fn calculate_transformed_bounds(spawn: &mut ModelSpawn, model: &RawModel) -> VMapResult<()> {
    let rotation = Matrix3::from_spawn_rotation(&spawn.rotation);
    let mut bounds: Option<AaBox> = None;
    for v in model.groups.iter().flat_map(|g| g.vertices.iter()) {
        let v = rotation.mul_vec(&vector_scale(v, spawn.scale));
        match bounds.as_mut() {
            Some(b) => b.merge_point(&v),
            None => bounds = Some(AaBox::from_point(v)),
        }
    }
    let bounds = bounds.ok_or_else(|| VMapError::CorruptModel(format!("model '{}' has no geometry", spawn.name)))?;

    spawn.bounds = bounds.translated(&spawn.pos);
    spawn.flags |= ModelFlags::HAS_BOUND;
    Ok(())
}

fn write_map(dest_dir: &std::path::Path, map_id: u32, map: &MapSpawns) -> VMapResult<()> {
    let spawns: Vec<&ModelSpawn> = map.entries.values().collect();
    let (tree, stats) = BihBuilder::new(&spawns, |s| s.bounds, DEFAULT_LEAF_SIZE).build_with_stats();
    debug!("map {}: {}", map_id, stats);

    let slots: HashMap<u32, u32> = spawns
        .iter()
        .enumerate()
        .map(|(slot, s)| (s.id, slot as u32))
        .collect();

    // maps without terrain carry their one global spawn in the tree file
    let global = map.tiles.get(&pack_tile_id(GLOBAL_TILE.0, GLOBAL_TILE.1));

    let mut w = BufWriter::new(File::create(dest_dir.join(tree_file_name(map_id)))?);
    w.write_all(VMAP_MAGIC)?;
    write_u8(&mut w, global.is_none() as u8)?;
    write_chunk(&mut w, b"NODE")?;
    tree.write_to(&mut w)?;
    write_chunk(&mut w, b"GOBJ")?;
    for id in global.into_iter().flatten() {
        map.entries[id].write_to(&mut w)?;
    }
    w.flush()?;

    for (&tile_id, ids) in &map.tiles {
        let tile_spawns: Vec<&ModelSpawn> = ids
            .iter()
            .map(|id| &map.entries[id])
            .filter(|s| !s.flags.contains(ModelFlags::WORLD_SPAWN))
            .collect();
        if tile_spawns.is_empty() {
            continue;
        }

        let (tile_x, tile_y) = unpack_tile_id(tile_id);
        let mut w = BufWriter::new(File::create(dest_dir.join(tile_file_name(map_id, tile_x, tile_y)))?);
        w.write_all(VMAP_MAGIC)?;
        write_u32(&mut w, count_u32(tile_spawns.len())?)?;
        for spawn in tile_spawns {
            spawn.write_to(&mut w)?;
            write_u32(&mut w, slots[&spawn.id])?;
        }
        w.flush()?;
    }
    Ok(())
}
