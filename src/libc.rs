//! Libc fragments user-space stubs link against (§1)
//!
//! Only the handful of small, pure functions named in scope; libc
//! conformance itself is explicitly out of scope (§"Non-goals"), so
//! this is glue for user-mode code, not an attempt at a real C library.

/// `div_t` equivalent: quotient and remainder from a single division.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct DivResult {
    pub quot: i32,
    pub rem: i32,
}

#[no_mangle]
pub extern "C" fn abs(n: i32) -> i32 {
    n.wrapping_abs()
}

#[no_mangle]
pub extern "C" fn imaxabs(n: i64) -> i64 {
    n.wrapping_abs()
}

#[no_mangle]
pub extern "C" fn div(numer: i32, denom: i32) -> DivResult {
    DivResult {
        quot: numer / denom,
        rem: numer % denom,
    }
}

/// Binary search over a byte-addressed array, mirroring the standard
/// `bsearch(3)` signature: `compar` returns negative/zero/positive the
/// way `memcmp` does. Returns a pointer to a matching element, or null.
///
/// # Safety
/// `base` must point to `nmemb` contiguous elements of `size` bytes
/// each, and `compar` must be a valid comparator for that layout.
#[no_mangle]
pub unsafe extern "C" fn bsearch(
    key: *const u8,
    base: *const u8,
    nmemb: usize,
    size: usize,
    compar: extern "C" fn(*const u8, *const u8) -> i32,
) -> *const u8 {
    if nmemb == 0 || size == 0 {
        return core::ptr::null();
    }

    let mut lo = 0usize;
    let mut hi = nmemb;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let elem = base.add(mid * size);
        match compar(key, elem) {
            0 => return elem,
            c if c < 0 => hi = mid,
            _ => lo = mid + 1,
        }
    }
    core::ptr::null()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abs_and_imaxabs_negate_negative_inputs() {
        assert_eq!(abs(-5), 5);
        assert_eq!(abs(5), 5);
        assert_eq!(imaxabs(-9_000_000_000), 9_000_000_000);
    }

    #[test]
    fn div_matches_truncating_c_semantics() {
        let r = div(-7, 2);
        assert_eq!(r, DivResult { quot: -3, rem: -1 });
    }

    extern "C" fn cmp_i32(a: *const u8, b: *const u8) -> i32 {
        unsafe {
            let a = *(a as *const i32);
            let b = *(b as *const i32);
            a - b
        }
    }

    #[test]
    fn bsearch_finds_present_elements_and_misses_absent_ones() {
        let sorted: [i32; 6] = [1, 3, 5, 7, 9, 11];
        let key = 7i32;
        let found = unsafe {
            bsearch(
                &key as *const i32 as *const u8,
                sorted.as_ptr() as *const u8,
                sorted.len(),
                core::mem::size_of::<i32>(),
                cmp_i32,
            )
        };
        assert!(!found.is_null());
        assert_eq!(unsafe { *(found as *const i32) }, 7);

        let missing = 4i32;
        let not_found = unsafe {
            bsearch(
                &missing as *const i32 as *const u8,
                sorted.as_ptr() as *const u8,
                sorted.len(),
                core::mem::size_of::<i32>(),
                cmp_i32,
            )
        };
        assert!(not_found.is_null());
    }
}
