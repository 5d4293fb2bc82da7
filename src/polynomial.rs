//! Secret polynomials over `Z_q`. Each member samples two of these per
//! session (the sharing polynomial and its blinding companion); shares are
//! evaluations at the recipients' identifiers.

use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::group::{Scalar, SchnorrGroup};

/// A polynomial of fixed degree with coefficients in `Z_q`.
///
/// Coefficients are secret for as long as the polynomial is alive and are
/// zeroised when it is dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Polynomial {
    coefficients: Vec<Scalar>,
}

impl Polynomial {
    /// Sample a uniformly random polynomial of the given degree. The
    /// resulting polynomial has `degree + 1` coefficients, the first of
    /// which (`a_0`) is this member's contribution to the group secret.
    pub fn random<R>(rng: &mut R, group: &SchnorrGroup, degree: usize) -> Self
    where
        R: RngCore + CryptoRng,
    {
        let coefficients = (0..=degree).map(|_| group.sample_scalar(rng)).collect();
        Polynomial { coefficients }
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }

    pub fn coefficients(&self) -> impl Iterator<Item = &Scalar> {
        self.coefficients.iter()
    }

    /// The constant term `a_0`, i.e. the evaluation at zero.
    pub fn constant_term(&self) -> &Scalar {
        &self.coefficients[0]
    }

    /// Evaluate the polynomial at `z` using Horner's rule,
    /// `f(z) = a_0 + z(a_1 + z(a_2 + ...))` with all arithmetic mod `q`.
    ///
    /// The protocol never evaluates at zero (identifier 0 is forbidden);
    /// doing so would hand out the constant term as a share.
    pub fn evaluate(&self, group: &SchnorrGroup, z: &Scalar) -> Scalar {
        debug_assert!(!z.is_zero(), "evaluation point must be non-zero");

        let mut result = Scalar::zero();
        for coefficient in self.coefficients.iter().rev() {
            result = group.scalar_add(&group.scalar_mul(&result, z), coefficient);
        }
        result
    }
}

impl Zeroize for Polynomial {
    fn zeroize(&mut self) {
        for coefficient in self.coefficients.iter_mut() {
            coefficient.zeroize();
        }
    }
}

impl Drop for Polynomial {
    fn drop(&mut self) {
        self.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::tests::toy_group;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn sampled_length_matches_degree() {
        let group = toy_group();
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let poly = Polynomial::random(&mut rng, &group, 2);
        assert_eq!(poly.degree(), 2);
        assert_eq!(poly.coefficients().count(), 3);
    }

    #[test]
    fn horner_evaluation() {
        let group = toy_group();
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let poly = Polynomial::random(&mut rng, &group, 3);

        let z = group.scalar_from_u64(4);
        let mut expected = Scalar::zero();
        for (k, coefficient) in poly.coefficients().enumerate() {
            let mut term = coefficient.clone();
            for _ in 0..k {
                term = group.scalar_mul(&term, &z);
            }
            expected = group.scalar_add(&expected, &term);
        }

        assert_eq!(poly.evaluate(&group, &z), expected);
    }

    #[test]
    fn evaluation_at_one_sums_coefficients() {
        let group = toy_group();
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let poly = Polynomial::random(&mut rng, &group, 2);

        let mut sum = Scalar::zero();
        for coefficient in poly.coefficients() {
            sum = group.scalar_add(&sum, coefficient);
        }
        assert_eq!(poly.evaluate(&group, &group.scalar_from_u64(1)), sum);
        assert_eq!(poly.coefficients().next(), Some(poly.constant_term()));
    }

    #[test]
    fn zeroize_clears_coefficients() {
        let group = toy_group();
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let mut poly = Polynomial::random(&mut rng, &group, 2);
        poly.zeroize();
        assert!(poly.coefficients().all(Scalar::is_zero));
    }
}
