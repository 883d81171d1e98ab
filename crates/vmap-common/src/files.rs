// files.rs - little-endian binary reading/writing for vmap files
//
// Every on-disk structure is packed little-endian with 4-byte chunk tags
// in front of each section. Short reads surface as VMapError::Truncated.

use std::io::{self, Read, Write};

use crate::error::{VMapError, VMapResult};
use crate::math::{AaBox, Vec3};

/// Leading 8 bytes of every tree, tile and model file.
pub const VMAP_MAGIC: &[u8; 8] = b"VMAP_4.0";

// Upper bound on how much a single array read preallocates; larger arrays
// still load, they just grow as the bytes arrive.
const MAX_PREALLOC: usize = 1 << 20;

// ============================================================
// Reading
// ============================================================

fn fill<R: Read>(r: &mut R, buf: &mut [u8]) -> VMapResult<()> {
    r.read_exact(buf).map_err(VMapError::from_read)
}

pub fn read_u8<R: Read>(r: &mut R) -> VMapResult<u8> {
    let mut b = [0u8; 1];
    fill(r, &mut b)?;
    Ok(b[0])
}

pub fn read_u16<R: Read>(r: &mut R) -> VMapResult<u16> {
    let mut b = [0u8; 2];
    fill(r, &mut b)?;
    Ok(u16::from_le_bytes(b))
}

pub fn read_u32<R: Read>(r: &mut R) -> VMapResult<u32> {
    let mut b = [0u8; 4];
    fill(r, &mut b)?;
    Ok(u32::from_le_bytes(b))
}

/// Fill `buf` completely. A clean end of file before the first byte
/// yields `false`, a partial read is `Truncated`.
fn try_fill<R: Read>(r: &mut R, buf: &mut [u8]) -> VMapResult<bool> {
    let mut got = 0;
    while got < buf.len() {
        match r.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(VMapError::Io(e)),
        }
    }
    match got {
        0 => Ok(false),
        n if n == buf.len() => Ok(true),
        _ => Err(VMapError::Truncated),
    }
}

/// Like `read_u32`, but end of file before the first byte yields `None`.
pub fn try_read_u32<R: Read>(r: &mut R) -> VMapResult<Option<u32>> {
    let mut b = [0u8; 4];
    Ok(try_fill(r, &mut b)?.then(|| u32::from_le_bytes(b)))
}

pub fn read_f32<R: Read>(r: &mut R) -> VMapResult<f32> {
    Ok(f32::from_bits(read_u32(r)?))
}

pub fn read_vec3<R: Read>(r: &mut R) -> VMapResult<Vec3> {
    Ok([read_f32(r)?, read_f32(r)?, read_f32(r)?])
}

pub fn read_aabox<R: Read>(r: &mut R) -> VMapResult<AaBox> {
    let lo = read_vec3(r)?;
    let hi = read_vec3(r)?;
    Ok(AaBox::new(lo, hi))
}

/// Read exactly `len` raw bytes without trusting `len` for allocation.
pub fn read_bytes<R: Read>(r: &mut R, len: usize) -> VMapResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(len.min(MAX_PREALLOC));
    r.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(VMapError::Truncated);
    }
    Ok(buf)
}

pub fn read_u32_array<R: Read>(r: &mut R, count: usize) -> VMapResult<Vec<u32>> {
    let bytes = read_bytes(r, count.checked_mul(4).ok_or(VMapError::Truncated)?)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn read_f32_array<R: Read>(r: &mut R, count: usize) -> VMapResult<Vec<f32>> {
    Ok(read_u32_array(r, count)?.into_iter().map(f32::from_bits).collect())
}

pub fn read_vec3_array<R: Read>(r: &mut R, count: usize) -> VMapResult<Vec<Vec3>> {
    let flat = read_f32_array(r, count.checked_mul(3).ok_or(VMapError::Truncated)?)?;
    Ok(flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect())
}

/// Read a fixed-size tag and compare it with `expected`.
pub fn read_chunk<R: Read>(r: &mut R, expected: &[u8]) -> VMapResult<()> {
    let mut tag = vec![0u8; expected.len()];
    fill(r, &mut tag)?;
    if tag != expected {
        return Err(VMapError::ChunkMismatch {
            expected: String::from_utf8_lossy(expected).into_owned(),
            found: String::from_utf8_lossy(&tag).into_owned(),
        });
    }
    Ok(())
}

/// Optional trailing section: `Ok(false)` at end of file, a mismatching
/// tag is still an error.
pub fn try_read_chunk<R: Read>(r: &mut R, expected: &[u8]) -> VMapResult<bool> {
    let mut tag = vec![0u8; expected.len()];
    if !try_fill(r, &mut tag)? {
        return Ok(false);
    }
    if tag != expected {
        return Err(VMapError::ChunkMismatch {
            expected: String::from_utf8_lossy(expected).into_owned(),
            found: String::from_utf8_lossy(&tag).into_owned(),
        });
    }
    Ok(true)
}

// ============================================================
// Writing
// ============================================================

pub fn write_u8<W: Write>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

pub fn write_u16<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_f32<W: Write>(w: &mut W, v: f32) -> io::Result<()> {
    w.write_all(&v.to_bits().to_le_bytes())
}

pub fn write_vec3<W: Write>(w: &mut W, v: &Vec3) -> io::Result<()> {
    for c in v {
        write_f32(w, *c)?;
    }
    Ok(())
}

pub fn write_aabox<W: Write>(w: &mut W, b: &AaBox) -> io::Result<()> {
    write_vec3(w, &b.lo)?;
    write_vec3(w, &b.hi)
}

pub fn write_u32_array<W: Write>(w: &mut W, values: &[u32]) -> io::Result<()> {
    let mut buf = Vec::with_capacity(values.len() * 4);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    w.write_all(&buf)
}

pub fn write_chunk<W: Write>(w: &mut W, tag: &[u8]) -> io::Result<()> {
    w.write_all(tag)
}

/// Length prefix for an in-file array, failing instead of truncating.
pub fn count_u32(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "array too large for file format"))
}
