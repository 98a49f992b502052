use num_traits::PrimInt;

/// Returns a value with the low `bits` bits set.
///
/// `bits` may range from zero to the full width of `T` inclusive.
pub fn low_mask<T: PrimInt>(bits: u32) -> T {
    let width = T::zero().count_zeros();
    assert!(bits <= width, "mask of {bits} bits in a {width}-bit type");
    if bits == 0 {
        T::zero()
    } else if bits == width {
        !T::zero()
    } else {
        (T::one() << bits as usize) - T::one()
    }
}

/// Returns the minimum number of bits that can distinguish `count` values.
///
/// One value needs zero bits. `count` must be nonzero; an empty value set
/// has no meaningful width.
pub fn bits_for(count: u128) -> u32 {
    assert!(count > 0, "bits_for of an empty value set");
    128 - (count - 1).leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_mask_edges() {
        assert_eq!(low_mask::<u8>(0), 0);
        assert_eq!(low_mask::<u8>(1), 0b1);
        assert_eq!(low_mask::<u8>(7), 0x7f);
        assert_eq!(low_mask::<u8>(8), 0xff);
        assert_eq!(low_mask::<u128>(128), u128::MAX);
    }

    #[test]
    fn bits_for_powers() {
        assert_eq!(bits_for(1), 0);
        assert_eq!(bits_for(2), 1);
        assert_eq!(bits_for(3), 2);
        assert_eq!(bits_for(4), 2);
        assert_eq!(bits_for(5), 3);
        assert_eq!(bits_for(256), 8);
        assert_eq!(bits_for(257), 9);
        assert_eq!(bits_for(u128::MAX), 128);
    }
}
