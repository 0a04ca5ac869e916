//! Per-frame random values fed to noise and dither effects as `u_random`.

use std::time::{SystemTime, UNIX_EPOCH};

pub trait FrameRandom: Send {
    /// Two values in [0, 1).
    fn next_pair(&mut self) -> [f32; 2];
}

/// Counter-based generator: each draw hashes `seed ^ counter`.
#[derive(Debug, Clone)]
pub struct HashRandom {
    seed: u64,
    counter: u64,
}

impl HashRandom {
    pub fn seeded(seed: u64) -> Self {
        Self { seed, counter: 0 }
    }

    /// Seeded from the clock; sequences differ between runs.
    pub fn from_clock() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x5EED);
        Self::seeded(hash_u64(nanos))
    }

    fn next_unit(&mut self) -> f32 {
        self.counter = self.counter.wrapping_add(1);
        unit_from_hash(hash_u64(self.seed ^ self.counter.wrapping_mul(0x9E37_79B9_7F4A_7C15)))
    }
}

impl FrameRandom for HashRandom {
    fn next_pair(&mut self) -> [f32; 2] {
        [self.next_unit(), self.next_unit()]
    }
}

/// Always returns the same pair.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub [f32; 2]);

impl FrameRandom for FixedRandom {
    fn next_pair(&mut self) -> [f32; 2] {
        self.0
    }
}

fn hash_u64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

fn unit_from_hash(h: u64) -> f32 {
    // 24 high bits keep the result strictly below 1.0 in f32.
    (h >> 40) as f32 / (1u64 << 24) as f32
}
