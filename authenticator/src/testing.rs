use rand_core::{impls, CryptoRng, Error, RngCore};

/// Deterministic byte source: every byte is one more than the previous.
pub(crate) struct CounterRng {
    next: u8,
}

impl CounterRng {
    pub(crate) fn new(start: u8) -> Self {
        Self { next: start }
    }
}

impl RngCore for CounterRng {
    fn next_u32(&mut self) -> u32 {
        impls::next_u32_via_fill(self)
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_fill(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for byte in dest {
            *byte = self.next;
            self.next = self.next.wrapping_add(1);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for CounterRng {}
