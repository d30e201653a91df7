/// FNV-1a (64-bit) hasher used for stable frame checksums.
#[derive(Clone, Copy, Debug)]
pub struct Fnv1a64(u64);

impl Fnv1a64 {
    /// Standard FNV-1a offset basis.
    pub const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01B3;

    /// Start from the standard offset basis.
    pub fn new_default() -> Self {
        Self(Self::OFFSET_BASIS)
    }

    /// Mix raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let mut h = self.0;
        for &b in bytes {
            h ^= u64::from(b);
            h = h.wrapping_mul(Self::PRIME);
        }
        self.0 = h;
    }

    /// Final hash value.
    pub fn finish(self) -> u64 {
        self.0
    }
}

/// Checksum of the visible pixels of a strided raster (row padding excluded).
pub fn raster_checksum(data: &[u8], row_bytes: usize, stride: usize, rows: usize) -> u64 {
    let mut h = Fnv1a64::new_default();
    if stride == 0 {
        return h.finish();
    }
    for row in data.chunks(stride).take(rows) {
        h.write_bytes(&row[..row_bytes.min(row.len())]);
    }
    h.finish()
}

/// Alpha reached after `step` of `steps` equal increments towards opaque.
pub fn ramp_alpha(step: u32, steps: u32) -> u8 {
    if steps == 0 || step >= steps {
        return 255;
    }
    ((255 * u64::from(step) + u64::from(steps) / 2) / u64::from(steps)) as u8
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/math.rs"]
mod tests;
