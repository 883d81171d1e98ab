// math.rs - vector, box, ray and rotation helpers shared by the collision code

pub type Vec3 = [f32; 3];

pub const VEC3_ORIGIN: Vec3 = [0.0, 0.0, 0.0];

// ============================================================
// Vector operations
// ============================================================

#[inline]
pub fn dot_product(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn vector_subtract(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vector_add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn vector_scale(v: &Vec3, scale: f32) -> Vec3 {
    [v[0] * scale, v[1] * scale, v[2] * scale]
}

/// veca + scale * vecb
#[inline]
pub fn vector_ma(veca: &Vec3, scale: f32, vecb: &Vec3) -> Vec3 {
    [
        veca[0] + scale * vecb[0],
        veca[1] + scale * vecb[1],
        veca[2] + scale * vecb[2],
    ]
}

pub fn vector_length(v: &Vec3) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

pub fn cross_product(v1: &Vec3, v2: &Vec3) -> Vec3 {
    [
        v1[1] * v2[2] - v1[2] * v2[1],
        v1[2] * v2[0] - v1[0] * v2[2],
        v1[0] * v2[1] - v1[1] * v2[0],
    ]
}

pub fn vector_min(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])]
}

pub fn vector_max(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0].max(b[0]), a[1].max(b[1]), a[2].max(b[2])]
}

pub fn vector_is_finite(v: &Vec3) -> bool {
    v.iter().all(|c| c.is_finite())
}

/// Index of the component with the largest magnitude. Ties resolve
/// towards the later axis: x only wins when strictly larger than y,
/// otherwise y must be strictly larger than z.
pub fn primary_axis(v: &Vec3) -> usize {
    let nx = v[0].abs();
    let ny = v[1].abs();
    let nz = v[2].abs();

    if nx > ny {
        if nx > nz { 0 } else { 2 }
    } else if ny > nz {
        1
    } else {
        2
    }
}

const FUZZY_EPSILON: f32 = 0.00001;

/// Relative float comparison, tolerance grows with the magnitude of `a`.
pub fn fuzzy_eq(a: f32, b: f32) -> bool {
    if a == b {
        return true;
    }
    let aa = a.abs() + 1.0;
    let eps = if aa.is_infinite() { FUZZY_EPSILON } else { FUZZY_EPSILON * aa };
    (a - b).abs() <= eps
}

#[inline]
pub fn fuzzy_ne(a: f32, b: f32) -> bool {
    !fuzzy_eq(a, b)
}

// ============================================================
// Axis aligned box
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AaBox {
    pub lo: Vec3,
    pub hi: Vec3,
}

impl AaBox {
    pub fn new(lo: Vec3, hi: Vec3) -> Self {
        Self { lo, hi }
    }

    pub fn from_point(p: Vec3) -> Self {
        Self { lo: p, hi: p }
    }

    /// Grow to include `p`.
    pub fn merge_point(&mut self, p: &Vec3) {
        self.lo = vector_min(&self.lo, p);
        self.hi = vector_max(&self.hi, p);
    }

    pub fn merge(&mut self, other: &AaBox) {
        self.lo = vector_min(&self.lo, &other.lo);
        self.hi = vector_max(&self.hi, &other.hi);
    }

    /// Inclusive on both faces.
    pub fn contains(&self, p: &Vec3) -> bool {
        (0..3).all(|i| p[i] >= self.lo[i] && p[i] <= self.hi[i])
    }

    pub fn contains_box(&self, other: &AaBox) -> bool {
        (0..3).all(|i| other.lo[i] >= self.lo[i] && other.hi[i] <= self.hi[i])
    }

    pub fn extent(&self) -> Vec3 {
        vector_subtract(&self.hi, &self.lo)
    }

    pub fn center(&self) -> Vec3 {
        [
            (self.lo[0] + self.hi[0]) * 0.5,
            (self.lo[1] + self.hi[1]) * 0.5,
            (self.lo[2] + self.hi[2]) * 0.5,
        ]
    }

    pub fn translated(&self, offset: &Vec3) -> AaBox {
        AaBox {
            lo: vector_add(&self.lo, offset),
            hi: vector_add(&self.hi, offset),
        }
    }
}

// ============================================================
// Ray
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    /// Component-wise reciprocal of `direction`, infinite on zero axes.
    pub inv_direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            inv_direction: [1.0 / direction[0], 1.0 / direction[1], 1.0 / direction[2]],
        }
    }

    pub fn point_at(&self, t: f32) -> Vec3 {
        vector_ma(&self.origin, t, &self.direction)
    }

    pub fn is_finite(&self) -> bool {
        vector_is_finite(&self.origin) && vector_is_finite(&self.direction)
    }

    /// Distance along the ray at which it enters `bounds`. Zero when the
    /// origin is already inside, `f32::INFINITY` when the ray misses or the
    /// box lies behind the origin.
    pub fn intersection_time(&self, bounds: &AaBox) -> f32 {
        let mut t_near = f32::NEG_INFINITY;
        let mut t_far = f32::INFINITY;

        for i in 0..3 {
            if self.direction[i] == 0.0 {
                if self.origin[i] < bounds.lo[i] || self.origin[i] > bounds.hi[i] {
                    return f32::INFINITY;
                }
                continue;
            }
            let t1 = (bounds.lo[i] - self.origin[i]) * self.inv_direction[i];
            let t2 = (bounds.hi[i] - self.origin[i]) * self.inv_direction[i];
            let (t_min, t_max) = if t1 < t2 { (t1, t2) } else { (t2, t1) };
            if t_min > t_near {
                t_near = t_min;
            }
            if t_max < t_far {
                t_far = t_max;
            }
            if t_near > t_far {
                return f32::INFINITY;
            }
        }

        if t_far < 0.0 {
            return f32::INFINITY;
        }
        t_near.max(0.0)
    }
}

// ============================================================
// Rotation matrix
// ============================================================

/// Row-major 3x3 matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix3 {
    pub m: [[f32; 3]; 3],
}

impl Default for Matrix3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix3 {
    pub const IDENTITY: Matrix3 = Matrix3 {
        m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
    };

    /// Rz(yaw) * Ry(pitch) * Rx(roll), angles in radians.
    pub fn from_euler_angles_zyx(yaw: f32, pitch: f32, roll: f32) -> Self {
        let (s, c) = yaw.sin_cos();
        let z = Matrix3 { m: [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]] };
        let (s, c) = pitch.sin_cos();
        let y = Matrix3 { m: [[c, 0.0, s], [0.0, 1.0, 0.0], [-s, 0.0, c]] };
        let (s, c) = roll.sin_cos();
        let x = Matrix3 { m: [[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]] };
        z.mul(&y.mul(&x))
    }

    /// Rotation used for spawn placement: degrees in, (y, x, z) fed to
    /// the ZYX composition.
    pub fn from_spawn_rotation(rotation: &Vec3) -> Self {
        let to_rad = std::f32::consts::PI / 180.0;
        Self::from_euler_angles_zyx(rotation[1] * to_rad, rotation[0] * to_rad, rotation[2] * to_rad)
    }

    pub fn mul(&self, other: &Matrix3) -> Matrix3 {
        let mut out = [[0.0f32; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                out[i][j] = self.m[i][0] * other.m[0][j]
                    + self.m[i][1] * other.m[1][j]
                    + self.m[i][2] * other.m[2][j];
            }
        }
        Matrix3 { m: out }
    }

    pub fn transpose(&self) -> Matrix3 {
        let m = &self.m;
        Matrix3 {
            m: [
                [m[0][0], m[1][0], m[2][0]],
                [m[0][1], m[1][1], m[2][1]],
                [m[0][2], m[1][2], m[2][2]],
            ],
        }
    }

    /// M * v
    pub fn mul_vec(&self, v: &Vec3) -> Vec3 {
        [
            dot_product(&self.m[0], v),
            dot_product(&self.m[1], v),
            dot_product(&self.m[2], v),
        ]
    }

    /// v * M, i.e. transpose(M) * v
    pub fn transpose_mul_vec(&self, v: &Vec3) -> Vec3 {
        let m = &self.m;
        [
            v[0] * m[0][0] + v[1] * m[1][0] + v[2] * m[2][0],
            v[0] * m[0][1] + v[1] * m[1][1] + v[2] * m[2][1],
            v[0] * m[0][2] + v[1] * m[1][2] + v[2] * m[2][2],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_vec_near(a: Vec3, b: Vec3) {
        for i in 0..3 {
            assert!((a[i] - b[i]).abs() < 1e-5, "{:?} != {:?}", a, b);
        }
    }

    #[test]
    fn test_primary_axis_ties() {
        assert_eq!(primary_axis(&[3.0, 1.0, 1.0]), 0);
        assert_eq!(primary_axis(&[1.0, 3.0, 1.0]), 1);
        assert_eq!(primary_axis(&[1.0, 1.0, 3.0]), 2);
        // equal extents favour z, then y over z only when strictly larger
        assert_eq!(primary_axis(&[2.0, 2.0, 2.0]), 2);
        assert_eq!(primary_axis(&[2.0, 2.0, 1.0]), 1);
        assert_eq!(primary_axis(&[-5.0, 1.0, 1.0]), 0);
    }

    #[test]
    fn test_fuzzy_eq() {
        assert!(fuzzy_eq(1.0, 1.0));
        assert!(fuzzy_eq(1000.0, 1000.001));
        assert!(!fuzzy_eq(1.0, 1.1));
        assert!(!fuzzy_eq(f32::NAN, 1.0));
        assert!(fuzzy_ne(0.0, 0.01));
    }

    #[test]
    fn test_box_contains_inclusive() {
        let b = AaBox::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        assert!(b.contains(&[0.0, 1.0, 0.5]));
        assert!(!b.contains(&[1.01, 0.5, 0.5]));
        assert!(b.contains_box(&AaBox::new([0.2, 0.2, 0.2], [1.0, 1.0, 1.0])));
    }

    #[test]
    fn test_ray_intersection_time() {
        let b = AaBox::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let ray = Ray::new([0.5, 0.5, 5.0], [0.0, 0.0, -1.0]);
        assert!((ray.intersection_time(&b) - 4.0).abs() < 1e-6);

        let inside = Ray::new([0.5, 0.5, 0.5], [1.0, 0.0, 0.0]);
        assert_eq!(inside.intersection_time(&b), 0.0);

        let behind = Ray::new([0.5, 0.5, 5.0], [0.0, 0.0, 1.0]);
        assert_eq!(behind.intersection_time(&b), f32::INFINITY);

        let beside = Ray::new([2.0, 2.0, 5.0], [0.0, 0.0, -1.0]);
        assert_eq!(beside.intersection_time(&b), f32::INFINITY);
    }

    #[test]
    fn test_rotation_roundtrip() {
        let rot = Matrix3::from_spawn_rotation(&[10.0, 90.0, -35.0]);
        let inv = rot.transpose();
        let v = [1.0, 2.0, 3.0];
        assert_vec_near(inv.mul_vec(&rot.mul_vec(&v)), v);
        // v * inv == rot * v
        assert_vec_near(inv.transpose_mul_vec(&v), rot.mul_vec(&v));
    }

    #[test]
    fn test_yaw_rotation() {
        // 90 degrees around z: x axis maps onto y
        let rot = Matrix3::from_spawn_rotation(&[0.0, 90.0, 0.0]);
        assert_vec_near(rot.mul_vec(&[1.0, 0.0, 0.0]), [0.0, 1.0, 0.0]);
    }
}
