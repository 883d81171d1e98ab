// model_instance.rs - placed copies of shared world models
//
// A ModelSpawn is the on-disk placement record. A ModelInstance is a spawn
// bound to a loaded WorldModel: it moves queries from map space into model
// space and the results back out again.

use std::io::{self, Read, Write};
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use vmap_common::files::{
    count_u32, read_aabox, read_bytes, read_f32, read_u16, read_u32, read_vec3, try_read_u32, write_aabox,
    write_f32, write_u16, write_u32, write_vec3,
};
use vmap_common::math::{vector_add, vector_ma, vector_scale, vector_subtract, AaBox, Matrix3, Ray, Vec3};
use vmap_common::{VMapError, VMapResult};

use crate::world_model::{GroupModel, WorldModel};

/// Longest model file name a spawn record may carry.
pub const MAX_NAME_LENGTH: u32 = 500;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ModelFlags: u32 {
        /// Doodad model, carries no area information.
        const M2          = 0x1;
        /// Map-wide object stored in the tree file instead of a tile.
        const WORLD_SPAWN = 0x2;
        /// Bounds are present in the record.
        const HAS_BOUND   = 0x4;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpawn {
    pub flags: ModelFlags,
    pub adt_id: u16,
    pub id: u32,
    pub pos: Vec3,
    /// Euler angles in degrees.
    pub rotation: Vec3,
    pub scale: f32,
    /// Map-space bounds; only meaningful with `HAS_BOUND`.
    pub bounds: AaBox,
    pub name: String,
}

impl Default for ModelSpawn {
    fn default() -> Self {
        Self {
            flags: ModelFlags::empty(),
            adt_id: 0,
            id: 0,
            pos: [0.0; 3],
            rotation: [0.0; 3],
            scale: 1.0,
            bounds: AaBox::default(),
            name: String::new(),
        }
    }
}

impl ModelSpawn {
    /// Read one record. A clean end of file before the record yields
    /// `None`.
    pub fn read_from<R: Read>(r: &mut R) -> VMapResult<Option<Self>> {
        let Some(flags) = try_read_u32(r)? else {
            return Ok(None);
        };
        let flags = ModelFlags::from_bits_retain(flags);
        let adt_id = read_u16(r)?;
        let id = read_u32(r)?;
        let pos = read_vec3(r)?;
        let rotation = read_vec3(r)?;
        let scale = read_f32(r)?;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(VMapError::CorruptModel(format!("spawn {} has invalid scale {}", id, scale)));
        }
        let bounds = if flags.contains(ModelFlags::HAS_BOUND) {
            read_aabox(r)?
        } else {
            AaBox::default()
        };

        let name_len = read_u32(r)?;
        if name_len > MAX_NAME_LENGTH {
            return Err(VMapError::NameTooLong(name_len));
        }
        let name = String::from_utf8_lossy(&read_bytes(r, name_len as usize)?).into_owned();

        Ok(Some(Self {
            flags,
            adt_id,
            id,
            pos,
            rotation,
            scale,
            bounds,
            name,
        }))
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let name_len = count_u32(self.name.len())?;
        if name_len > MAX_NAME_LENGTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("model name '{}' too long", self.name),
            ));
        }

        write_u32(w, self.flags.bits())?;
        write_u16(w, self.adt_id)?;
        write_u32(w, self.id)?;
        write_vec3(w, &self.pos)?;
        write_vec3(w, &self.rotation)?;
        write_f32(w, self.scale)?;
        if self.flags.contains(ModelFlags::HAS_BOUND) {
            write_aabox(w, &self.bounds)?;
        }
        write_u32(w, name_len)?;
        w.write_all(self.name.as_bytes())
    }
}

// ============================================================
// Query results
// ============================================================

/// Area data under a point; the highest floor over all instances wins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaInfo {
    pub result: bool,
    pub ground_z: f32,
    pub flags: u32,
    pub adt_id: i32,
    pub root_id: i32,
    pub group_id: i32,
}

impl Default for AreaInfo {
    fn default() -> Self {
        Self {
            result: false,
            ground_z: f32::NEG_INFINITY,
            flags: 0,
            adt_id: 0,
            root_id: 0,
            group_id: 0,
        }
    }
}

/// A group inside a loaded model. Holds the model alive while in use.
#[derive(Debug, Clone)]
pub struct GroupRef {
    model: Arc<WorldModel>,
    index: usize,
}

impl GroupRef {
    pub fn model(&self) -> &Arc<WorldModel> {
        &self.model
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn group(&self) -> &GroupModel {
        &self.model.groups()[self.index]
    }
}

/// Instance and group under a point, for liquid lookups.
#[derive(Debug, Clone)]
pub struct LocationInfo<'a> {
    pub hit_instance: Option<&'a ModelInstance>,
    pub hit_model: Option<GroupRef>,
    pub ground_z: f32,
}

impl Default for LocationInfo<'_> {
    fn default() -> Self {
        Self {
            hit_instance: None,
            hit_model: None,
            ground_z: f32::NEG_INFINITY,
        }
    }
}

// ============================================================
// Instance
// ============================================================

#[derive(Debug, Clone)]
pub struct ModelInstance {
    spawn: ModelSpawn,
    inv_rotation: Matrix3,
    inv_scale: f32,
    model: Weak<WorldModel>,
}

impl ModelInstance {
    pub fn new(spawn: ModelSpawn, model: Weak<WorldModel>) -> Self {
        // rotation matrices are orthonormal, the transpose is the inverse
        let inv_rotation = Matrix3::from_spawn_rotation(&spawn.rotation).transpose();
        let inv_scale = 1.0 / spawn.scale;
        Self {
            spawn,
            inv_rotation,
            inv_scale,
            model,
        }
    }

    pub fn spawn(&self) -> &ModelSpawn {
        &self.spawn
    }

    pub fn is_loaded(&self) -> bool {
        self.model.strong_count() > 0
    }

    pub fn set_unloaded(&mut self) {
        self.model = Weak::new();
    }

    fn to_model_space(&self, p: &Vec3) -> Vec3 {
        vector_scale(&self.inv_rotation.mul_vec(&vector_subtract(p, &self.spawn.pos)), self.inv_scale)
    }

    /// World height of the model-space point `z_dist` below `pos_model`.
    fn world_ground_z(&self, pos_model: &Vec3, z_dist: f32, z_dir: &Vec3) -> f32 {
        let ground = vector_ma(pos_model, z_dist, z_dir);
        let world = vector_add(
            &vector_scale(&self.inv_rotation.transpose_mul_vec(&ground), self.spawn.scale),
            &self.spawn.pos,
        );
        world[2]
    }

    pub fn intersect_ray(&self, ray: &Ray, max_dist: &mut f32, stop_at_first_hit: bool) -> bool {
        let Some(model) = self.model.upgrade() else {
            return false;
        };
        if ray.intersection_time(&self.spawn.bounds) == f32::INFINITY {
            return false;
        }

        let model_ray = Ray::new(self.to_model_space(&ray.origin), self.inv_rotation.mul_vec(&ray.direction));
        let mut distance = *max_dist * self.inv_scale;
        let hit = model.intersect_ray(&model_ray, &mut distance, stop_at_first_hit);
        if hit {
            *max_dist = distance * self.spawn.scale;
        }
        hit
    }

    /// Fold this instance's floor below `p` into `info` if it is higher
    /// than what `info` holds.
    pub fn intersect_point(&self, p: &Vec3, info: &mut AreaInfo) {
        let Some(model) = self.model.upgrade() else {
            return;
        };
        // doodads carry no area information
        if self.spawn.flags.contains(ModelFlags::M2) || !self.spawn.bounds.contains(p) {
            return;
        }

        let pos_model = self.to_model_space(p);
        let z_dir = self.inv_rotation.mul_vec(&[0.0, 0.0, -1.0]);
        let Some(hit) = model.intersect_point(&pos_model, &z_dir) else {
            return;
        };
        let world_z = self.world_ground_z(&pos_model, hit.z_dist, &z_dir);
        if info.ground_z < world_z {
            *info = AreaInfo {
                result: true,
                ground_z: world_z,
                flags: hit.flags,
                adt_id: self.spawn.adt_id as i32,
                root_id: hit.root_id as i32,
                group_id: hit.group_id as i32,
            };
        }
    }

    pub fn location_info<'a>(&'a self, p: &Vec3, info: &mut LocationInfo<'a>) -> bool {
        let Some(model) = self.model.upgrade() else {
            return false;
        };
        if self.spawn.flags.contains(ModelFlags::M2) || !self.spawn.bounds.contains(p) {
            return false;
        }

        let pos_model = self.to_model_space(p);
        let z_dir = self.inv_rotation.mul_vec(&[0.0, 0.0, -1.0]);
        let Some((index, z_dist)) = model.location_info(&pos_model, &z_dir) else {
            return false;
        };
        let world_z = self.world_ground_z(&pos_model, z_dist, &z_dir);
        if info.ground_z < world_z {
            info.ground_z = world_z;
            info.hit_instance = Some(self);
            info.hit_model = Some(GroupRef { model, index });
            return true;
        }
        false
    }

    /// Liquid surface of `group` above `p`, in map space. Models are
    /// assumed untilted.
    pub fn liquid_level(&self, p: &Vec3, group: &GroupModel) -> Option<f32> {
        let pos_model = self.to_model_space(p);
        let level = group.liquid_level(&pos_model)?;
        Some(level * self.spawn.scale + self.spawn.pos[2])
    }
}
