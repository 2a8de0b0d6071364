//! Adler-32 checksum over decoded framebuffer bytes.
//!
//! The running sums start at zero rather than zlib's initial value of 1, so
//! an all-zero buffer sums to 0. Since 0 marks "no checksum" in the frame
//! table, [`frame_checksum`] reports such a buffer as `0xFFFFFFFF`.

const MOD_ADLER: u32 = 65521;

/// Largest n such that 255n(n+1)/2 + (n+1)(MOD_ADLER-1) fits in a u32.
const NMAX: usize = 5552;

/// Value stored in place of a true checksum of 0.
pub const ZERO_SENTINEL: u32 = 0xFFFF_FFFF;

/// Rolling Adler-32 state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Adler32 {
    a: u32,
    b: u32,
}

impl Adler32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        for chunk in data.chunks(NMAX) {
            for &byte in chunk {
                self.a += byte as u32;
                self.b += self.a;
            }
            self.a %= MOD_ADLER;
            self.b %= MOD_ADLER;
        }
    }

    /// Raw checksum value, which may be 0.
    pub fn sum(&self) -> u32 {
        (self.b << 16) | self.a
    }
}

/// Checksum of `data` with the zero sentinel applied. Never returns 0.
pub fn frame_checksum(data: &[u8]) -> u32 {
    let mut adler = Adler32::new();
    adler.update(data);
    match adler.sum() {
        0 => ZERO_SENTINEL,
        sum => sum,
    }
}
