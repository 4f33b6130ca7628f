//! Fixed, little-endian wire types for exchange and gather paths.

use bytemuck::{Pod, Zeroable};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Decode a received byte buffer into owned records.
///
/// Copies through `pod_read_unaligned` because receive buffers carry no
/// alignment guarantee.
pub fn decode_records<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, String> {
    let size = std::mem::size_of::<T>();
    if size == 0 || bytes.len() % size != 0 {
        return Err(format!(
            "payload of {} bytes is not a whole number of {size}-byte records",
            bytes.len()
        ));
    }
    Ok(bytes
        .chunks_exact(size)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

// All multi-byte values in these structs are **little-endian** on the wire.
// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32, // count of following records
}
impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// A floating-point value carried as its IEEE-754 bit pattern.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireScalar {
    pub bits_le: u64,
}
impl WireScalar {
    pub fn of(value: f64) -> Self {
        Self {
            bits_le: value.to_bits().to_le(),
        }
    }
    pub fn get(&self) -> f64 {
        f64::from_bits(u64::from_le(self.bits_le))
    }
}

/// A 64-bit unsigned value (global node ids, counts).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireU64 {
    pub id_le: u64,
}
impl WireU64 {
    pub fn of(id: u64) -> Self {
        Self { id_le: id.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.id_le)
    }
}

/// A refinement flag tagged with the global element it belongs to.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireFlag {
    pub element_le: u64,
    pub flag_le: u32,
    pub reserved_le: u32, // keep zero
}
impl WireFlag {
    pub fn new(element: u64, flag: bool) -> Self {
        Self {
            element_le: element.to_le(),
            flag_le: u32::from(flag).to_le(),
            reserved_le: 0,
        }
    }
    pub fn element(&self) -> u64 {
        u64::from_le(self.element_le)
    }
    pub fn flag(&self) -> bool {
        u32::from_le(self.flag_le) != 0
    }
}

/// Pack nodal blocks into wire scalars.
pub fn encode_scalars(values: impl IntoIterator<Item = f64>) -> Vec<WireScalar> {
    values.into_iter().map(WireScalar::of).collect()
}

#[cfg(test)]
mod layout_tests {
    use super::*;
    use static_assertions::assert_eq_size;

    assert_eq_size!(WireCount, u32);
    assert_eq_size!(WireScalar, u64);
    assert_eq_size!(WireU64, u64);
    assert_eq_size!(WireFlag, [u64; 2]);

    #[test]
    fn flag_record_survives_byte_copy() {
        let recs = [WireFlag::new(17, true), WireFlag::new(3, false)];
        let bytes = cast_slice(&recs).to_vec();
        let back: Vec<WireFlag> = decode_records(&bytes).unwrap();
        assert_eq!(back[0].element(), 17);
        assert!(back[0].flag());
        assert_eq!(back[1].element(), 3);
        assert!(!back[1].flag());
    }

    #[test]
    fn ragged_payload_is_rejected() {
        assert!(decode_records::<WireScalar>(&[0u8; 12]).is_err());
    }
}
