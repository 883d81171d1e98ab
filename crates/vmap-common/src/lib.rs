#![allow(clippy::too_many_arguments, clippy::needless_range_loop, clippy::float_cmp)]

pub mod cvar;
pub mod error;
pub mod files;
pub mod math;

pub use error::{VMapError, VMapResult};
pub use math::{AaBox, Matrix3, Ray, Vec3};
