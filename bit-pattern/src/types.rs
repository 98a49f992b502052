//! The modeled type kinds and the interning table.

use std::collections::HashMap;

use crate::mask::{bits_for, low_mask};
use crate::UninhabitedType;

/// A cheap copyable handle to an interned type.
///
/// Comparing two ids is O(1); equal ids always name the same [`TypeKind`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TypeId(u32);

impl TypeId {
    /// Raw index, for debugging and stable map keys.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// A primitive or opaque representation modeled by this crate.
///
/// The set is closed: aggregates are composed out of these by the layout
/// layer, which records its own descriptors and summaries.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TypeKind {
    /// A type with zero valid bit patterns. Zero-sized and unreachable.
    Uninhabited,
    /// One byte of storage; only the patterns `0` and `1` are valid.
    Bool,
    /// An unsigned integer. Every bit pattern is valid.
    Uint {
        /// Storage size in bytes, 1 to 16.
        bytes: u32,
    },
    /// A signed two's-complement integer. Every bit pattern is valid.
    Int {
        /// Storage size in bytes, 1 to 16.
        bytes: u32,
    },
    /// A non-null pointer to storage aligned to `align` bytes.
    ///
    /// Valid patterns are the nonzero multiples of `align`; null and the
    /// misaligned low-bit patterns are free for discriminant use.
    Pointer {
        /// Storage size in bytes, 1 to 16.
        bytes: u32,
        /// Pointee alignment in bytes. Must be a power of two.
        align: u32,
    },
    /// An opaque byte blob. Every bit pattern is valid; blobs wider than 16
    /// bytes are never bit-compressed and move bytewise.
    Bytes {
        /// Length in bytes.
        len: u32,
    },
    /// A value restricted to `0..valid_count` in its storage bytes.
    ///
    /// Models restricted discriminants and summaries of enum-like values.
    Range {
        /// Storage size in bytes, 1 to 16.
        bytes: u32,
        /// Number of valid values, starting from zero.
        valid_count: u128,
    },
}

/// The number of valid bit patterns of a type.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Inhabitants {
    /// No valid patterns at all.
    Empty,
    /// Exactly this many valid patterns.
    Finite(u128),
    /// More than `u128::MAX` valid patterns (wide blobs).
    Saturated,
}

impl Inhabitants {
    /// Returns true for [`Inhabitants::Empty`].
    pub fn is_empty(self) -> bool {
        matches!(self, Inhabitants::Empty)
    }
}

/// Interning table for type representation facts.
///
/// Facts are computed from the [`TypeKind`] alone, so interning the same
/// kind twice yields the same id and the cached answers never change.
#[derive(Debug, Default)]
pub struct TypeTable {
    kinds: Vec<TypeKind>,
    ids: HashMap<TypeKind, TypeId>,
}

impl TypeTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a kind, returning its id. Re-interning is idempotent.
    ///
    /// # Panics
    ///
    /// Panics if the kind is malformed: a zero or over-16-byte scalar size,
    /// a pointer alignment that is not a power of two, or a `Range` whose
    /// valid count does not fit its storage.
    pub fn intern(&mut self, kind: TypeKind) -> TypeId {
        check_kind(&kind);
        if let Some(&id) = self.ids.get(&kind) {
            return id;
        }
        let id = TypeId(self.kinds.len() as u32);
        self.kinds.push(kind);
        self.ids.insert(kind, id);
        id
    }

    /// Returns the kind behind an id.
    pub fn kind(&self, id: TypeId) -> TypeKind {
        self.kinds[id.0 as usize]
    }

    /// Storage size in bytes.
    pub fn size_bytes(&self, id: TypeId) -> u32 {
        match self.kind(id) {
            TypeKind::Uninhabited => 0,
            TypeKind::Bool => 1,
            TypeKind::Uint { bytes } | TypeKind::Int { bytes } => bytes,
            TypeKind::Pointer { bytes, .. } => bytes,
            TypeKind::Bytes { len } => len,
            TypeKind::Range { bytes, .. } => bytes,
        }
    }

    /// Natural storage alignment in bytes.
    pub fn align_bytes(&self, id: TypeId) -> u32 {
        match self.kind(id) {
            TypeKind::Uninhabited | TypeKind::Bool | TypeKind::Bytes { .. } => 1,
            TypeKind::Uint { bytes } | TypeKind::Int { bytes } => bytes,
            TypeKind::Pointer { bytes, .. } => bytes,
            TypeKind::Range { bytes, .. } => bytes,
        }
    }

    /// Counts the valid bit patterns.
    pub fn inhabitants(&self, id: TypeId) -> Inhabitants {
        match self.kind(id) {
            TypeKind::Uninhabited => Inhabitants::Empty,
            TypeKind::Bool => Inhabitants::Finite(2),
            TypeKind::Uint { bytes } | TypeKind::Int { bytes } => full_range(bytes * 8),
            TypeKind::Pointer { bytes, align } => {
                let width = bytes * 8 - align.trailing_zeros();
                match full_range(width) {
                    Inhabitants::Finite(n) => Inhabitants::Finite(n - 1),
                    other => other,
                }
            }
            TypeKind::Bytes { len } => full_range(len.saturating_mul(8)),
            TypeKind::Range { valid_count, .. } => {
                if valid_count == 0 {
                    Inhabitants::Empty
                } else {
                    Inhabitants::Finite(valid_count)
                }
            }
        }
    }

    /// Minimum number of bits sufficient to distinguish all valid values.
    ///
    /// May be smaller than the storage width (`Bool` stores 8 bits but is
    /// representable in 1). Errs for uninhabited types; placement code
    /// special-cases those as zero-width.
    pub fn representable_bit_width(&self, id: TypeId) -> Result<u32, UninhabitedType> {
        match self.kind(id) {
            TypeKind::Uninhabited => Err(UninhabitedType(())),
            TypeKind::Bool => Ok(1),
            TypeKind::Uint { bytes } | TypeKind::Int { bytes } => Ok(bytes * 8),
            TypeKind::Pointer { bytes, align } => Ok(bytes * 8 - align.trailing_zeros()),
            TypeKind::Bytes { len } => Ok(len.saturating_mul(8)),
            TypeKind::Range { valid_count, .. } => {
                if valid_count == 0 {
                    Err(UninhabitedType(()))
                } else {
                    Ok(bits_for(valid_count))
                }
            }
        }
    }

    /// Decides whether `bits` is a valid value of the type.
    ///
    /// Total over all bit patterns of the stated size: a slice of the wrong
    /// length is never valid.
    pub fn is_valid_bit_pattern(&self, id: TypeId, bits: &[u8]) -> bool {
        if bits.len() != self.size_bytes(id) as usize {
            return false;
        }
        match self.kind(id) {
            TypeKind::Uninhabited => false,
            TypeKind::Uint { .. } | TypeKind::Int { .. } | TypeKind::Bytes { .. } => true,
            TypeKind::Bool => bits[0] <= 1,
            TypeKind::Pointer { align, .. } => {
                let v = read_le(bits);
                v != 0 && v % align as u128 == 0
            }
            TypeKind::Range { valid_count, .. } => read_le(bits) < valid_count,
        }
    }

    /// Converts a valid natural-representation value to its canonical
    /// compact form, `representable_bit_width` bits wide.
    ///
    /// Returns `None` if `value` is not a valid bit pattern of the type.
    ///
    /// # Panics
    ///
    /// Panics for types wider than 16 bytes; those never compress and move
    /// bytewise instead.
    pub fn compress(&self, id: TypeId, value: u128) -> Option<u128> {
        let size = self.size_bytes(id);
        assert!(size <= 16, "compress of a {size}-byte type");
        if value & !low_mask::<u128>(size * 8) != 0 {
            return None;
        }
        match self.kind(id) {
            TypeKind::Uninhabited => None,
            TypeKind::Bool => (value <= 1).then_some(value),
            TypeKind::Uint { .. } | TypeKind::Int { .. } | TypeKind::Bytes { .. } => Some(value),
            TypeKind::Pointer { align, .. } => {
                (value != 0 && value % align as u128 == 0)
                    .then(|| value >> align.trailing_zeros())
            }
            TypeKind::Range { valid_count, .. } => (value < valid_count).then_some(value),
        }
    }

    /// Converts a compact value back to its natural representation.
    ///
    /// Left inverse of [`compress`](Self::compress): for every valid value
    /// `x`, `expand(compress(x)) == x`. Compact patterns that no valid value
    /// compresses to are unreachable; this does not branch on them.
    ///
    /// # Panics
    ///
    /// Panics for types wider than 16 bytes.
    pub fn expand(&self, id: TypeId, compact: u128) -> u128 {
        let size = self.size_bytes(id);
        assert!(size <= 16, "expand of a {size}-byte type");
        let width = self.representable_bit_width(id).unwrap_or(0);
        let compact = compact & low_mask::<u128>(width);
        match self.kind(id) {
            TypeKind::Pointer { align, .. } => compact << align.trailing_zeros(),
            _ => compact,
        }
    }

    /// Number of in-storage bit patterns that are not valid values,
    /// contiguous starting at [`niche_base`](Self::niche_base).
    ///
    /// These patterns are free for discriminant use by a layout planner.
    pub fn niche_count(&self, id: TypeId) -> u128 {
        match self.kind(id) {
            TypeKind::Uninhabited
            | TypeKind::Uint { .. }
            | TypeKind::Int { .. }
            | TypeKind::Bytes { .. } => 0,
            TypeKind::Bool => 254,
            TypeKind::Pointer { align, .. } => align as u128,
            TypeKind::Range { bytes, valid_count } => match full_range(bytes * 8) {
                Inhabitants::Finite(n) => n - valid_count,
                _ => u128::MAX - valid_count + 1,
            },
        }
    }

    /// First storage value of the niche pattern run.
    ///
    /// The k-th niche pattern is `niche_base + k` for `k <
    /// niche_count`. For pointers the run starts at zero (null, then the
    /// misaligned low-bit patterns); for other types it follows the last
    /// valid value.
    pub fn niche_base(&self, id: TypeId) -> u128 {
        match self.kind(id) {
            TypeKind::Pointer { .. } => 0,
            TypeKind::Bool => 2,
            TypeKind::Range { valid_count, .. } => valid_count,
            _ => 0,
        }
    }
}

fn check_kind(kind: &TypeKind) {
    match *kind {
        TypeKind::Uninhabited | TypeKind::Bool | TypeKind::Bytes { .. } => {}
        TypeKind::Uint { bytes } | TypeKind::Int { bytes } => {
            assert!((1..=16).contains(&bytes), "scalar size of {bytes} bytes");
        }
        TypeKind::Pointer { bytes, align } => {
            assert!((1..=16).contains(&bytes), "pointer size of {bytes} bytes");
            assert!(
                align.is_power_of_two() && align.trailing_zeros() < bytes * 8,
                "pointer alignment of {align} bytes",
            );
        }
        TypeKind::Range { bytes, valid_count } => {
            assert!((1..=16).contains(&bytes), "range size of {bytes} bytes");
            if let Inhabitants::Finite(n) = full_range(bytes * 8) {
                assert!(valid_count <= n, "range count {valid_count} overflows storage");
            }
        }
    }
}

fn full_range(bits: u32) -> Inhabitants {
    if bits >= 128 {
        Inhabitants::Saturated
    } else {
        Inhabitants::Finite(1u128 << bits)
    }
}

fn read_le(bits: &[u8]) -> u128 {
    let mut v = 0u128;
    for (i, &b) in bits.iter().enumerate().take(16) {
        v |= (b as u128) << (8 * i);
    }
    v
}

#[cfg(test)]
mod tests {
    use quickcheck::{quickcheck, Arbitrary, Gen};

    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let mut types = TypeTable::new();
        let a = types.intern(TypeKind::Bool);
        let b = types.intern(TypeKind::Bool);
        let c = types.intern(TypeKind::Uint { bytes: 4 });
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(types.kind(c), TypeKind::Uint { bytes: 4 });
    }

    #[test]
    fn representable_widths() {
        let mut types = TypeTable::new();
        let bool_ = types.intern(TypeKind::Bool);
        let u32_ = types.intern(TypeKind::Uint { bytes: 4 });
        let ptr = types.intern(TypeKind::Pointer { bytes: 8, align: 8 });
        let tag3 = types.intern(TypeKind::Range { bytes: 1, valid_count: 3 });
        let unit = types.intern(TypeKind::Range { bytes: 1, valid_count: 1 });
        let never = types.intern(TypeKind::Uninhabited);

        assert_eq!(types.representable_bit_width(bool_), Ok(1));
        assert_eq!(types.representable_bit_width(u32_), Ok(32));
        assert_eq!(types.representable_bit_width(ptr), Ok(61));
        assert_eq!(types.representable_bit_width(tag3), Ok(2));
        assert_eq!(types.representable_bit_width(unit), Ok(0));
        assert!(types.representable_bit_width(never).is_err());
    }

    #[test]
    fn bool_patterns() {
        let mut types = TypeTable::new();
        let bool_ = types.intern(TypeKind::Bool);
        assert!(types.is_valid_bit_pattern(bool_, &[0]));
        assert!(types.is_valid_bit_pattern(bool_, &[1]));
        assert!(!types.is_valid_bit_pattern(bool_, &[2]));
        assert!(!types.is_valid_bit_pattern(bool_, &[0, 0]));
    }

    #[test]
    fn pointer_patterns_and_niche() {
        let mut types = TypeTable::new();
        let ptr = types.intern(TypeKind::Pointer { bytes: 8, align: 8 });
        assert!(!types.is_valid_bit_pattern(ptr, &[0; 8]));
        assert!(types.is_valid_bit_pattern(ptr, &[8, 0, 0, 0, 0, 0, 0, 0]));
        assert!(!types.is_valid_bit_pattern(ptr, &[4, 0, 0, 0, 0, 0, 0, 0]));
        assert_eq!(types.niche_base(ptr), 0);
        assert_eq!(types.niche_count(ptr), 8);
        assert_eq!(types.compress(ptr, 0x100), Some(0x20));
        assert_eq!(types.expand(ptr, 0x20), 0x100);
        assert_eq!(types.compress(ptr, 0), None);
        assert_eq!(types.compress(ptr, 3), None);
    }

    #[test]
    fn uninhabited_is_never_valid() {
        let mut types = TypeTable::new();
        let never = types.intern(TypeKind::Uninhabited);
        assert_eq!(types.size_bytes(never), 0);
        assert!(!types.is_valid_bit_pattern(never, &[]));
        assert!(types.inhabitants(never).is_empty());
    }

    #[derive(Clone, Debug)]
    struct AnyKind(TypeKind);

    impl Arbitrary for AnyKind {
        fn arbitrary(g: &mut Gen) -> Self {
            let bytes = *g.choose(&[1u32, 2, 4, 8, 16]).unwrap();
            let kind = match u32::arbitrary(g) % 6 {
                0 => TypeKind::Bool,
                1 => TypeKind::Uint { bytes },
                2 => TypeKind::Int { bytes },
                3 => TypeKind::Pointer {
                    bytes: 8,
                    align: *g.choose(&[1u32, 2, 4, 8, 16]).unwrap(),
                },
                4 => TypeKind::Bytes { len: bytes },
                _ => TypeKind::Range {
                    bytes,
                    valid_count: u128::from(u16::arbitrary(g)) % (1u128 << (bytes * 8).min(16)) + 1,
                },
            };
            AnyKind(kind)
        }
    }

    quickcheck! {
        fn compress_round_trips(kind: AnyKind, value: u128) -> bool {
            let mut types = TypeTable::new();
            let id = types.intern(kind.0);
            let value = value & crate::low_mask::<u128>(types.size_bytes(id) * 8);
            match types.compress(id, value) {
                Some(compact) => {
                    let width = types.representable_bit_width(id).unwrap();
                    compact & !crate::low_mask::<u128>(width) == 0
                        && types.expand(id, compact) == value
                }
                // Invalid patterns are allowed to be rejected, never mangled.
                None => {
                    let bytes = value.to_le_bytes();
                    !types.is_valid_bit_pattern(id, &bytes[..types.size_bytes(id) as usize])
                }
            }
        }
    }
}
