//! Seeded deterministic randomness for actions.
//!
//! [`SeededRandom`] is Knuth's subtractive generator as used by the .NET legacy
//! `System.Random`, so the draws an action makes match those of the chain being
//! replayed. The seed is retained so an equivalent generator can be rebuilt.

use rand::RngCore;
use thiserror::Error as ThisError;

const MBIG: i32 = i32::MAX;
const MSEED: i32 = 161_803_398;
const TABLE_LEN: usize = 56;

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum RandomError {
    #[error("upper bound must not be negative (got {0})")]
    NegativeBound(i32),
    #[error("lower bound {min} exceeds upper bound {max}")]
    InvalidRange { min: i32, max: i32 },
}

#[derive(Clone)]
pub struct SeededRandom {
    seed: i32,
    table: [i32; TABLE_LEN],
    next: usize,
    next_p: usize,
}

impl std::fmt::Debug for SeededRandom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededRandom")
            .field("seed", &self.seed)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

impl SeededRandom {
    pub fn new(seed: i32) -> Self {
        let mut table = [0i32; TABLE_LEN];
        let subtraction = if seed == i32::MIN {
            i32::MAX
        } else {
            seed.abs()
        };
        let mut mj = MSEED - subtraction;
        table[55] = mj;
        let mut mk = 1i32;
        for i in 1..55 {
            let ii = (21 * i) % 55;
            table[ii] = mk;
            mk = mj - mk;
            if mk < 0 {
                mk += MBIG;
            }
            mj = table[ii];
        }
        for _ in 1..5 {
            for i in 1..TABLE_LEN {
                table[i] -= table[1 + (i + 30) % 55];
                if table[i] < 0 {
                    table[i] += MBIG;
                }
            }
        }
        Self {
            seed,
            table,
            next: 0,
            next_p: 21,
        }
    }

    /// The seed this generator was built from.
    pub fn seed(&self) -> i32 {
        self.seed
    }

    fn internal_sample(&mut self) -> i32 {
        let mut next = self.next + 1;
        if next >= TABLE_LEN {
            next = 1;
        }
        let mut next_p = self.next_p + 1;
        if next_p >= TABLE_LEN {
            next_p = 1;
        }
        let mut value = self.table[next] - self.table[next_p];
        if value == MBIG {
            value -= 1;
        }
        if value < 0 {
            value += MBIG;
        }
        self.table[next] = value;
        self.next = next;
        self.next_p = next_p;
        value
    }

    fn sample(&mut self) -> f64 {
        f64::from(self.internal_sample()) * (1.0 / f64::from(MBIG))
    }

    fn sample_for_large_range(&mut self) -> f64 {
        let mut result = self.internal_sample();
        if self.internal_sample() % 2 == 0 {
            result = -result;
        }
        let mut d = f64::from(result);
        d += f64::from(i32::MAX - 1);
        d /= f64::from(2 * (i32::MAX as u32) - 1);
        d
    }

    /// A non-negative value below `i32::MAX`.
    pub fn next_i32(&mut self) -> i32 {
        self.internal_sample()
    }

    /// A value in `0..max` (or `0` when `max` is `0`).
    pub fn next_below(&mut self, max: i32) -> Result<i32, RandomError> {
        if max < 0 {
            return Err(RandomError::NegativeBound(max));
        }
        Ok((self.sample() * f64::from(max)) as i32)
    }

    /// A value in `min..max` (or `min` when they are equal).
    pub fn next_range(&mut self, min: i32, max: i32) -> Result<i32, RandomError> {
        if min > max {
            return Err(RandomError::InvalidRange { min, max });
        }
        let range = i64::from(max) - i64::from(min);
        if range <= i64::from(i32::MAX) {
            return Ok((self.sample() * range as f64) as i32 + min);
        }
        Ok(((self.sample_for_large_range() * range as f64) as i64 + i64::from(min)) as i32)
    }

    /// A value in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.sample()
    }

    /// Fills `dest` with one draw per byte.
    pub fn fill_bytes(&mut self, dest: &mut [u8]) {
        for byte in dest.iter_mut() {
            *byte = (self.internal_sample() % 256) as u8;
        }
    }
}

impl RngCore for SeededRandom {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        SeededRandom::fill_bytes(self, &mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let low = u64::from(self.next_u32());
        let high = u64::from(self.next_u32());
        (high << 32) | low
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        SeededRandom::fill_bytes(self, dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        SeededRandom::fill_bytes(self, dest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn same_seed_same_stream() {
        let mut a = SeededRandom::new(42);
        let mut b = SeededRandom::new(42);
        let xs: Vec<i32> = (0..64).map(|_| a.next_i32()).collect();
        let ys: Vec<i32> = (0..64).map(|_| b.next_i32()).collect();
        assert_eq!(xs, ys);

        let mut c = SeededRandom::new(43);
        let zs: Vec<i32> = (0..64).map(|_| c.next_i32()).collect();
        assert_ne!(xs, zs);
    }

    #[test]
    fn sign_of_seed_is_ignored() {
        let mut positive = SeededRandom::new(7);
        let mut negative = SeededRandom::new(-7);
        for _ in 0..16 {
            assert_eq!(positive.next_i32(), negative.next_i32());
        }
        assert_eq!(negative.seed(), -7);

        let mut min = SeededRandom::new(i32::MIN);
        let mut max = SeededRandom::new(i32::MAX);
        assert_eq!(min.next_i32(), max.next_i32());
    }

    #[test]
    fn matches_reference_stream() {
        // First draws of `new System.Random(0)`.
        let mut random = SeededRandom::new(0);
        assert_eq!(random.next_i32(), 1_559_595_546);
        assert_eq!(random.next_i32(), 1_755_192_844);
        assert_eq!(random.next_i32(), 1_649_316_166);
    }

    #[test]
    fn bounded_draws_stay_in_range() {
        let mut random = SeededRandom::new(1234);
        for _ in 0..1_000 {
            let below = random.next_below(10).unwrap();
            assert!((0..10).contains(&below));
            let ranged = random.next_range(-5, 5).unwrap();
            assert!((-5..5).contains(&ranged));
            let wide = random.next_range(i32::MIN, i32::MAX).unwrap();
            assert!(wide < i32::MAX);
            let unit = random.next_f64();
            assert!((0.0..1.0).contains(&unit));
        }
        assert_eq!(random.next_below(0).unwrap(), 0);
        assert_eq!(random.next_range(3, 3).unwrap(), 3);
    }

    #[test]
    fn invalid_bounds_are_errors() {
        let mut random = SeededRandom::new(1);
        assert_eq!(random.next_below(-1), Err(RandomError::NegativeBound(-1)));
        assert_eq!(
            random.next_range(2, 1),
            Err(RandomError::InvalidRange { min: 2, max: 1 })
        );
    }

    #[test]
    fn rng_core_draws_from_byte_stream() {
        let mut bytes = SeededRandom::new(99);
        let mut buf = [0u8; 4];
        bytes.fill_bytes(&mut buf);

        let mut rng = SeededRandom::new(99);
        assert_eq!(rng.next_u32(), u32::from_le_bytes(buf));

        let mut rng = SeededRandom::new(99);
        let roll: u8 = rng.gen_range(1..=6);
        assert!((1..=6).contains(&roll));
    }
}
