/// Source of forced store conditional failures.
///
/// A successful reservation check can still be failed on purpose to
/// break livelocks between processors retrying LL/SC sequences on the
/// same line. This is an approximate fairness mechanism: it makes
/// starvation unlikely but does not rule it out.
pub trait ScFailure: std::fmt::Debug + Send + Sync + 'static {
    /// Whether the store conditional being checked fails.
    fn fail(&mut self) -> bool;
}

/// 32 bit Galois LFSR failing roughly one SC in 64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lfsr {
    state: u32,
}

const TAPS: u32 = 0xd000_0001;

impl Default for Lfsr {
    fn default() -> Self {
        Self { state: u32::MAX }
    }
}

impl Lfsr {
    /// A zero seed would lock the register, so it selects the reset state.
    #[must_use]
    pub fn new(seed: u32) -> Self {
        if seed == 0 {
            Self::default()
        } else {
            Self { state: seed }
        }
    }

    #[must_use]
    pub fn state(&self) -> u32 {
        self.state
    }

    fn step(&mut self) {
        let lsb = self.state & 1;
        self.state = (self.state >> 1) ^ (lsb.wrapping_neg() & TAPS);
    }
}

impl ScFailure for Lfsr {
    fn fail(&mut self) -> bool {
        let fail = self.state % 64 == 0;
        self.step();
        fail
    }
}

/// Never forces a failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverFail;

impl ScFailure for NeverFail {
    fn fail(&mut self) -> bool {
        false
    }
}

/// Forces every store conditional to fail.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysFail;

impl ScFailure for AlwaysFail {
    fn fail(&mut self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{Lfsr, ScFailure};

    #[test]
    fn test_lfsr_is_deterministic() {
        let mut a = Lfsr::new(0x1234_5678);
        let mut b = Lfsr::new(0x1234_5678);
        let a: Vec<bool> = (0..1000).map(|_| a.fail()).collect();
        let b: Vec<bool> = (0..1000).map(|_| b.fail()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_lfsr_fails_about_one_in_64() {
        let mut lfsr = Lfsr::default();
        let n = 64 * 1000;
        let failures = (0..n).filter(|_| lfsr.fail()).count();
        assert!((500..1500).contains(&failures), "{failures} failures");
    }

    #[test]
    fn test_zero_seed_uses_reset_state() {
        assert_eq!(Lfsr::new(0), Lfsr::default());
        let mut lfsr = Lfsr::new(0);
        for _ in 0..100 {
            lfsr.fail();
            assert_ne!(lfsr.state(), 0);
        }
    }

    #[test]
    fn test_first_sample_of_reset_state_succeeds() {
        // all ones is not a multiple of 64
        let mut lfsr = Lfsr::default();
        assert!(!lfsr.fail());
    }
}
