//! Seeded pseudo-random numbers for the lab scheduler.
//!
//! The same seed always yields the same sequence, so a schedule picked by
//! the lab runtime can be replayed by rerunning with the seed it reported.

/// A seeded xorshift64* generator. Not cryptographically secure.
#[derive(Debug, Clone)]
pub struct DetRng {
    state: u64,
}

impl DetRng {
    /// Creates a generator. Seeds are scrambled with splitmix64 first so
    /// nearby seeds (and zero) give unrelated sequences.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        Self {
            state: if z == 0 { 1 } else { z },
        }
    }

    /// The next 64 random bits.
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// A uniformly chosen index below `len`, or `None` for an empty range.
    #[allow(clippy::cast_possible_truncation)]
    pub fn next_index(&mut self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let wide = u128::from(self.next_u64()) * len as u128;
        Some((wide >> 64) as usize)
    }
}
