use sha2::{Digest, Sha512};

const DOMAIN: &[u8] = b"kestrel-core/drbg: v1";

/// Deterministic random byte generator.
///
/// The stream is a pure function of `(entropy, personalization, context)`;
/// every replica constructs it identically. SHA-512 in counter mode over a
/// domain-separated seed.
pub struct Drbg {
    seed: [u8; 64],
    counter: u64,
    buffer: Vec<u8>,
    position: usize,
}

impl Drbg {
    pub fn new(entropy: &[u8], personalization: &[u8], context: &[u8]) -> Self {
        let mut hasher = Sha512::new();
        hasher.update(DOMAIN);
        for part in [entropy, personalization, context] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self {
            seed: hasher.finalize().into(),
            counter: 0,
            buffer: Vec::new(),
            position: 0,
        }
    }

    fn refill(&mut self) {
        let mut hasher = Sha512::new();
        hasher.update(self.seed);
        hasher.update(self.counter.to_le_bytes());
        self.counter += 1;
        self.buffer = hasher.finalize().to_vec();
        self.position = 0;
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        for byte in bytes.iter_mut() {
            if self.position >= self.buffer.len() {
                self.refill();
            }
            *byte = self.buffer[self.position];
            self.position += 1;
        }
        u64::from_le_bytes(bytes)
    }

    /// Uniform value in `[0, bound)`, rejection-resampled to avoid modulo
    /// bias.
    pub fn uniform(&mut self, bound: u64) -> u64 {
        debug_assert!(bound > 0);
        let threshold = bound.wrapping_neg() % bound;
        loop {
            let value = self.next_u64();
            if value >= threshold {
                return value % bound;
            }
        }
    }

    /// In-place Fisher-Yates shuffle.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.uniform(i as u64 + 1) as usize;
            items.swap(i, j);
        }
    }

    /// A permutation of `[0, n)`.
    pub fn perm(&mut self, n: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..n).collect();
        self.shuffle(&mut indices);
        indices
    }
}
