use std::fmt;
use std::ops::Mul;

/// Values the Viterbi recurrence maximises over.
///
/// `Mul` combines a rule weight with the weights of its children, and the
/// derivation with the larger weight wins.
pub trait Weight: Copy + PartialOrd + fmt::Debug + Mul<Output = Self> {
    fn zero() -> Self;

    fn one() -> Self;

    fn from_probability(p: f64) -> Self;

    fn probability(self) -> f64;

    fn is_zero(self) -> bool;
}

/// A plain probability, combined by multiplication.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
pub struct Probability(pub f64);

impl Weight for Probability {
    fn zero() -> Self {
        Probability(0.0)
    }

    fn one() -> Self {
        Probability(1.0)
    }

    fn from_probability(p: f64) -> Self {
        Probability(p)
    }

    fn probability(self) -> f64 {
        self.0
    }

    fn is_zero(self) -> bool {
        self.0 == 0.0
    }
}

impl Mul for Probability {
    type Output = Self;

    fn mul(self, other: Self) -> Self {
        Probability(self.0 * other.0)
    }
}

/// The natural logarithm of a probability. Zero is represented by negative
/// infinity, so the logarithm of zero is never taken.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct LogProbability(pub f64);

impl LogProbability {
    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for LogProbability {
    fn default() -> Self {
        Self::zero()
    }
}

impl Weight for LogProbability {
    fn zero() -> Self {
        LogProbability(f64::NEG_INFINITY)
    }

    fn one() -> Self {
        LogProbability(0.0)
    }

    fn from_probability(p: f64) -> Self {
        if p > 0.0 {
            LogProbability(p.ln())
        } else {
            Self::zero()
        }
    }

    fn probability(self) -> f64 {
        self.0.exp()
    }

    fn is_zero(self) -> bool {
        self.0 == f64::NEG_INFINITY
    }
}

impl Mul for LogProbability {
    type Output = Self;

    fn mul(self, other: Self) -> Self {
        LogProbability(self.0 + other.0)
    }
}

impl fmt::Display for LogProbability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn log_of_zero_is_sentinel() {
        let zero = LogProbability::from_probability(0.0);
        assert!(zero.is_zero());
        assert_eq!(zero.probability(), 0.0);
        assert!((zero * LogProbability::from_probability(0.5)).is_zero());
        assert!(zero < LogProbability::from_probability(1e-300));
    }

    #[test]
    fn multiplication_agrees() {
        let (a, b) = (0.25, 0.125);
        let linear = Probability::from_probability(a) * Probability::from_probability(b);
        let log = LogProbability::from_probability(a) * LogProbability::from_probability(b);

        assert_relative_eq!(linear.probability(), a * b);
        assert_relative_eq!(log.probability(), a * b);
        assert_eq!(Probability::one() * linear, linear);
        assert_eq!(LogProbability::one() * log, log);
    }
}
