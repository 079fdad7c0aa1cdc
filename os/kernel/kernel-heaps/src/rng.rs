//! Placement randomness for address-space layout randomization.
//!
//! A xorshift64* stream per heap, seeded from a global splitmix64 sequence.
//! Not suitable for anything cryptographic.

use core::sync::atomic::{AtomicU64, Ordering};

static SEED: AtomicU64 = AtomicU64::new(0x9e37_79b9_7f4a_7c15);

/// Mix platform entropy (TSC, RDRAND, boot time) into future heap seeds.
pub fn seed_aslr(entropy: u64) {
    SEED.fetch_xor(splitmix64(entropy), Ordering::Relaxed);
}

const fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[derive(Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    pub fn from_global() -> Self {
        let s = SEED.fetch_add(0x9e37_79b9_7f4a_7c15, Ordering::Relaxed);
        let state = splitmix64(s);
        // Zero is a fixed point.
        Self {
            state: if state == 0 { 1 } else { state },
        }
    }

    pub const fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Value in `[0, bound)`; `bound` must be non-zero.
    pub const fn below(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }
}
