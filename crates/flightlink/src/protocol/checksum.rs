//! Frame checksum.
//!
//! Both ends of the link run the same rolling function over the same byte
//! range: magic, identifier, length and payload, in wire order. For each
//! byte `b` the accumulator becomes `(c + b) << 1`. Only the low 16 bits
//! are ever compared, so the accumulator is kept as a wrapping `u16`.

/// Rolling checksum accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checksum(u16);

impl Checksum {
    /// A fresh accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self(0)
    }

    /// Fold one byte into the checksum.
    pub fn update(&mut self, byte: u8) {
        self.0 = self.0.wrapping_add(u16::from(byte)) << 1;
    }

    /// Fold a run of bytes into the checksum.
    pub fn update_all(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.update(byte);
        }
    }

    /// The current checksum value.
    #[must_use]
    pub fn value(self) -> u16 {
        self.0
    }

    /// Checksum of a complete byte run.
    #[must_use]
    pub fn of(bytes: &[u8]) -> u16 {
        let mut checksum = Self::new();
        checksum.update_all(bytes);
        checksum.value()
    }
}
