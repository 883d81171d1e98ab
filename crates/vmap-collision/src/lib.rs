#![allow(clippy::too_many_arguments, clippy::needless_range_loop, clippy::float_cmp)]

pub mod bih;
pub mod bih_build;
pub mod config;
pub mod factory;
pub mod manager;
pub mod map_tree;
pub mod model_cache;
pub mod model_instance;
pub mod tile_assembler;
pub mod world_model;

pub use bih::{Bih, BihNode};
pub use bih_build::{BihBuilder, BuildStats};
pub use config::VMapConfig;
pub use factory::VMapFactory;
pub use manager::{
    convert_position, DisableFlags, LiquidLevel, VMapLoadResult, VMapManager, VMapQuery, VMAP_INVALID_HEIGHT,
    VMAP_INVALID_HEIGHT_VALUE,
};
pub use map_tree::StaticMapTree;
pub use model_cache::ModelCache;
pub use model_instance::{AreaInfo, LocationInfo, ModelFlags, ModelInstance, ModelSpawn};
pub use tile_assembler::{RawGroup, RawModel, TileAssembler};
pub use world_model::{GroupModel, MeshTriangle, WmoLiquid, WorldModel};
