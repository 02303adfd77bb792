/// Generate `align_down_$suffix`, `align_up_$suffix` and `is_aligned_$suffix`
/// for a given integer type.
///
/// `alignment` must be a power of two; zero is treated as "no alignment" and
/// returns `value` unchanged. `align_up` saturates instead of wrapping.
macro_rules! impl_align_fns {
    ($ty:ty, $suffix:ident) => {
        paste::paste! {
            #[inline(always)]
            pub const fn [<align_down_ $suffix>](value: $ty, alignment: $ty) -> $ty {
                if alignment == 0 {
                    return value;
                }
                value & !(alignment - 1)
            }

            #[inline(always)]
            pub const fn [<align_up_ $suffix>](value: $ty, alignment: $ty) -> $ty {
                if alignment == 0 {
                    return value;
                }
                value.saturating_add(alignment - 1) & !(alignment - 1)
            }

            #[inline(always)]
            pub const fn [<is_aligned_ $suffix>](value: $ty, alignment: $ty) -> bool {
                alignment == 0 || value & (alignment - 1) == 0
            }
        }
    };
}

impl_align_fns!(u64, u64);
