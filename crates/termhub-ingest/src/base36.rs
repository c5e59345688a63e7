//! Restartable Base36 id sequence
//!
//! Values are kept as little-endian digits over `0-9A-Z`. A freshly opened
//! digit position starts at `1`, so no issued value has a leading zero and
//! the mapping integer → string stays a bijection whose length never shrinks.

const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Sequence generator for `oid` keys
///
/// ```
/// use termhub_ingest::base36::Base36Gen;
///
/// let mut ids = Base36Gen::new(35);
/// assert_eq!(ids.next(), "Z");
/// assert_eq!(ids.next(), "10");
/// assert_eq!(ids.last(), Some("10"));
/// ```
#[derive(Debug, Clone)]
pub struct Base36Gen {
    /// Little-endian digit values of the next id to issue
    digits: Vec<u8>,
    last: Option<String>,
}

impl Base36Gen {
    /// Generator whose first `next()` returns the encoding of `start`
    pub fn new(start: u64) -> Self {
        let mut digits = Vec::new();
        let mut n = start;
        loop {
            digits.push((n % 36) as u8);
            n /= 36;
            if n == 0 {
                break;
            }
        }
        Self { digits, last: None }
    }

    /// Issue the current id and advance
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> String {
        let current = self.render();
        self.increment();
        self.last = Some(current.clone());
        current
    }

    /// Most recently issued id, without advancing
    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }

    fn render(&self) -> String {
        self.digits
            .iter()
            .rev()
            .map(|&d| ALPHABET[d as usize] as char)
            .collect()
    }

    fn increment(&mut self) {
        for digit in self.digits.iter_mut() {
            if *digit < 35 {
                *digit += 1;
                return;
            }
            *digit = 0;
        }
        self.digits.push(1);
    }
}

impl Default for Base36Gen {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Encode a single integer
pub fn encode(n: u64) -> String {
    Base36Gen::new(n).render()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sequence_start() {
        let mut ids = Base36Gen::default();
        assert_eq!(ids.last(), None);
        let first: Vec<String> = (0..12).map(|_| ids.next()).collect();
        assert_eq!(first, ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9", "A", "B"]);
        assert_eq!(ids.last(), Some("B"));
        assert_eq!(ids.last(), Some("B"));
    }

    #[test]
    fn test_carry_opens_digit_at_one() {
        let mut ids = Base36Gen::new(35);
        assert_eq!(ids.next(), "Z");
        assert_eq!(ids.next(), "10");
        let mut ids = Base36Gen::new(36 * 36 - 1);
        assert_eq!(ids.next(), "ZZ");
        assert_eq!(ids.next(), "100");
    }

    #[test]
    fn test_restart_matches_continuous_run() {
        let mut continuous = Base36Gen::default();
        for _ in 0..5000 {
            continuous.next();
        }
        let mut restarted = Base36Gen::new(5000);
        for _ in 0..100 {
            assert_eq!(continuous.next(), restarted.next());
        }
    }

    proptest! {
        #[test]
        fn prop_round_trip(n in 0u64..u64::MAX / 2) {
            let s = encode(n);
            prop_assert_eq!(u64::from_str_radix(&s, 36).unwrap(), n);
        }

        #[test]
        fn prop_order_preserved(a in 0u64..10_000_000, b in 0u64..10_000_000) {
            prop_assume!(a < b);
            let (sa, sb) = (encode(a), encode(b));
            prop_assert!(sa.len() <= sb.len());
            let width = sb.len();
            prop_assert!(format!("{:0>width$}", sa) < format!("{:0>width$}", sb));
        }

        #[test]
        fn prop_no_leading_zero(n in 1u64..u64::MAX / 2) {
            prop_assert!(!encode(n).starts_with('0'));
        }
    }
}
