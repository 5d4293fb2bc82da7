//! Arithmetic over the order-`q` subgroup of `Z_p^*`, parameterised at
//! runtime by the protocol configuration `{p, q, g, h}`. All group elements
//! live in `[1, p)` and all exponents in `[0, q)`; the [`SchnorrGroup`]
//! context is the only place where modular reduction happens, so values
//! constructed through it always satisfy the reduction invariants.
//!
//! Two generators are carried: `g`, the base of all public values, and `h`,
//! the Pedersen blinding base. The discrete logarithm `log_g h` must be
//! unknown to every participant, which is a property of the parameter
//! ceremony and cannot be checked here.

use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::errors::DkgError;

/// An exponent reduced modulo the subgroup order `q`.
///
/// Scalars are only constructed through a [`SchnorrGroup`], which guarantees
/// the `[0, q)` range. Byte parsing of peer-supplied scalars rejects values
/// out of range instead of reducing them, so a malformed message cannot
/// silently alias a valid share.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Scalar(BigUint);

impl Scalar {
    /// The additive identity. Valid in any group.
    pub fn zero() -> Self {
        Scalar(BigUint::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Big-endian byte representation, minimal length.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes_be()
    }
}

impl Zeroize for Scalar {
    fn zeroize(&mut self) {
        self.0 = BigUint::zero();
    }
}

/// An element of `[1, p)`.
///
/// Membership in the order-`q` subgroup is a separate, more expensive check
/// ([`SchnorrGroup::is_subgroup_element`]) which the protocol applies to
/// every peer-supplied element before using it in a verification equation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupElement(BigUint);

impl GroupElement {
    /// Big-endian byte representation, minimal length.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes_be()
    }
}

/// A multiplicative subgroup of `Z_p^*` of prime order `q`, together with
/// the two generators used by the protocol.
///
/// Primality of `p` and `q` is the responsibility of the parameter ceremony;
/// the constructor verifies every structural property that can be checked
/// cheaply: `q | (p - 1)`, both generators in range and of order dividing
/// `q`, and the generators distinct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchnorrGroup {
    p: BigUint,
    q: BigUint,
    g: GroupElement,
    h: GroupElement,
}

impl SchnorrGroup {
    pub fn new(p: BigUint, q: BigUint, g: BigUint, h: BigUint) -> Result<Self, DkgError> {
        let one = BigUint::one();
        if p <= BigUint::from(3u32) || (&p % 2u32).is_zero() {
            return Err(DkgError::InvalidConfiguration(
                "modulus p must be an odd number greater than 3".to_string(),
            ));
        }
        if q <= one || (&q % 2u32).is_zero() {
            return Err(DkgError::InvalidConfiguration(
                "subgroup order q must be an odd number greater than 1".to_string(),
            ));
        }
        if (&p - &one) % &q != BigUint::zero() {
            return Err(DkgError::InvalidConfiguration(
                "q does not divide p - 1".to_string(),
            ));
        }
        for (name, base) in &[("g", &g), ("h", &h)] {
            if **base <= one || **base >= p {
                return Err(DkgError::InvalidConfiguration(format!(
                    "generator {} outside [2, p)",
                    name
                )));
            }
            if !base.modpow(&q, &p).is_one() {
                return Err(DkgError::InvalidConfiguration(format!(
                    "generator {} is not of order dividing q",
                    name
                )));
            }
        }
        if g == h {
            return Err(DkgError::InvalidConfiguration(
                "generators g and h must be distinct".to_string(),
            ));
        }

        Ok(SchnorrGroup {
            p,
            q,
            g: GroupElement(g),
            h: GroupElement(h),
        })
    }

    /// The subgroup order `q`.
    pub fn order(&self) -> &BigUint {
        &self.q
    }

    pub fn generator(&self) -> &GroupElement {
        &self.g
    }

    /// The Pedersen blinding base `h`.
    pub fn blinding_base(&self) -> &GroupElement {
        &self.h
    }

    pub fn identity(&self) -> GroupElement {
        GroupElement(BigUint::one())
    }

    /// Uniform scalar in `[0, q)`. The underlying generator performs
    /// rejection sampling, so the output is unbiased.
    pub fn sample_scalar<R>(&self, rng: &mut R) -> Scalar
    where
        R: RngCore + CryptoRng,
    {
        Scalar(rng.gen_biguint_below(&self.q))
    }

    pub fn scalar_from_u64(&self, value: u64) -> Scalar {
        Scalar(BigUint::from(value) % &self.q)
    }

    /// Parse a scalar from big-endian bytes, rejecting values `>= q`.
    pub fn scalar_from_bytes(&self, bytes: &[u8]) -> Option<Scalar> {
        let value = BigUint::from_bytes_be(bytes);
        if value < self.q {
            Some(Scalar(value))
        } else {
            None
        }
    }

    /// Parse a group element from big-endian bytes, rejecting values
    /// outside `[1, p)`. Subgroup membership is not checked here.
    pub fn element_from_bytes(&self, bytes: &[u8]) -> Option<GroupElement> {
        let value = BigUint::from_bytes_be(bytes);
        if !value.is_zero() && value < self.p {
            Some(GroupElement(value))
        } else {
            None
        }
    }

    /// Whether `e` lies in the order-`q` subgroup, i.e. `e^q = 1 mod p`.
    pub fn is_subgroup_element(&self, e: &GroupElement) -> bool {
        e.0 < self.p && !e.0.is_zero() && e.0.modpow(&self.q, &self.p).is_one()
    }

    pub fn scalar_add(&self, a: &Scalar, b: &Scalar) -> Scalar {
        Scalar((&a.0 + &b.0) % &self.q)
    }

    pub fn scalar_sub(&self, a: &Scalar, b: &Scalar) -> Scalar {
        Scalar((&a.0 + &self.q - &b.0) % &self.q)
    }

    pub fn scalar_mul(&self, a: &Scalar, b: &Scalar) -> Scalar {
        Scalar((&a.0 * &b.0) % &self.q)
    }

    /// `base^exponent mod p`.
    pub fn exp(&self, base: &GroupElement, exponent: &Scalar) -> GroupElement {
        GroupElement(base.0.modpow(&exponent.0, &self.p))
    }

    /// `g^exponent mod p`.
    pub fn exp_g(&self, exponent: &Scalar) -> GroupElement {
        GroupElement(self.g.0.modpow(&exponent.0, &self.p))
    }

    /// `h^exponent mod p`.
    pub fn exp_h(&self, exponent: &Scalar) -> GroupElement {
        GroupElement(self.h.0.modpow(&exponent.0, &self.p))
    }

    /// Group operation, `a * b mod p`.
    pub fn mul(&self, a: &GroupElement, b: &GroupElement) -> GroupElement {
        GroupElement((&a.0 * &b.0) % &self.p)
    }

    /// `prod points[k]^{z^k} mod p`, the right-hand side of the share
    /// verification equations. Variable time; all inputs are public.
    pub fn power_product(&self, points: &[GroupElement], z: &Scalar) -> GroupElement {
        let mut result = self.identity();
        for (point, power) in points.iter().zip(self.scalar_powers(z)) {
            result = self.mul(&result, &self.exp(point, &power));
        }
        result
    }

    /// Iterator over the powers `1, z, z^2, ...` reduced modulo `q`.
    pub fn scalar_powers<'a>(&'a self, z: &Scalar) -> ScalarPowers<'a> {
        ScalarPowers {
            group: self,
            z: z.clone(),
            next: Scalar(BigUint::one()),
        }
    }
}

/// Provides an iterator over the powers of a [`Scalar`].
///
/// This struct is created by [`SchnorrGroup::scalar_powers`].
pub struct ScalarPowers<'a> {
    group: &'a SchnorrGroup,
    z: Scalar,
    next: Scalar,
}

impl<'a> Iterator for ScalarPowers<'a> {
    type Item = Scalar;

    fn next(&mut self) -> Option<Scalar> {
        let current = self.next.clone();
        self.next = self.group.scalar_mul(&current, &self.z);
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (usize::MAX, None)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    /// `p = 23`, `q = 11`, with `g = 4` and `h = 9` generating the subgroup
    /// of quadratic residues.
    pub(crate) fn toy_group() -> SchnorrGroup {
        SchnorrGroup::new(
            BigUint::from(23u32),
            BigUint::from(11u32),
            BigUint::from(4u32),
            BigUint::from(9u32),
        )
        .unwrap()
    }

    #[test]
    fn accepts_toy_parameters() {
        let group = toy_group();
        assert_eq!(group.order(), &BigUint::from(11u32));
    }

    #[test]
    fn rejects_order_not_dividing() {
        // 7 does not divide 22.
        let result = SchnorrGroup::new(
            BigUint::from(23u32),
            BigUint::from(7u32),
            BigUint::from(4u32),
            BigUint::from(9u32),
        );
        assert!(matches!(result, Err(DkgError::InvalidConfiguration(_))));
    }

    #[test]
    fn rejects_generator_outside_subgroup() {
        // 5 is not a quadratic residue mod 23, so 5^11 != 1.
        let result = SchnorrGroup::new(
            BigUint::from(23u32),
            BigUint::from(11u32),
            BigUint::from(5u32),
            BigUint::from(9u32),
        );
        assert!(matches!(result, Err(DkgError::InvalidConfiguration(_))));
    }

    #[test]
    fn rejects_equal_generators() {
        let result = SchnorrGroup::new(
            BigUint::from(23u32),
            BigUint::from(11u32),
            BigUint::from(4u32),
            BigUint::from(4u32),
        );
        assert!(matches!(result, Err(DkgError::InvalidConfiguration(_))));
    }

    #[test]
    fn exponentiation_in_toy_group() {
        let group = toy_group();
        // 4^2 = 16, 4^11 = 1 mod 23.
        let two = group.scalar_from_u64(2);
        assert_eq!(
            group.exp_g(&two),
            group.element_from_bytes(&[16]).unwrap()
        );
        let zero = Scalar::zero();
        assert_eq!(group.exp_g(&zero), group.identity());
    }

    #[test]
    fn sampled_scalars_in_range() {
        let group = toy_group();
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        for _ in 0..100 {
            let s = group.sample_scalar(&mut rng);
            assert!(s.0 < BigUint::from(11u32));
        }
    }

    #[test]
    fn scalar_parsing_rejects_out_of_range() {
        let group = toy_group();
        assert!(group.scalar_from_bytes(&[10]).is_some());
        assert!(group.scalar_from_bytes(&[11]).is_none());
        assert!(group.scalar_from_bytes(&[255]).is_none());
    }

    #[test]
    fn element_parsing_rejects_out_of_range() {
        let group = toy_group();
        assert!(group.element_from_bytes(&[22]).is_some());
        assert!(group.element_from_bytes(&[0]).is_none());
        assert!(group.element_from_bytes(&[23]).is_none());
    }

    #[test]
    fn subgroup_membership() {
        let group = toy_group();
        // 2 and 3 are quadratic residues mod 23, 5 is not.
        assert!(group.is_subgroup_element(&group.element_from_bytes(&[2]).unwrap()));
        assert!(group.is_subgroup_element(&group.element_from_bytes(&[3]).unwrap()));
        assert!(!group.is_subgroup_element(&group.element_from_bytes(&[5]).unwrap()));
        assert!(group.is_subgroup_element(group.generator()));
        assert!(group.is_subgroup_element(group.blinding_base()));
    }

    #[test]
    fn scalar_powers_iterate() {
        let group = toy_group();
        let three = group.scalar_from_u64(3);
        let powers: Vec<Scalar> = group.scalar_powers(&three).take(4).collect();
        // 1, 3, 9, 27 mod 11 = 5.
        assert_eq!(powers[0], group.scalar_from_u64(1));
        assert_eq!(powers[1], group.scalar_from_u64(3));
        assert_eq!(powers[2], group.scalar_from_u64(9));
        assert_eq!(powers[3], group.scalar_from_u64(5));
    }

    #[test]
    fn power_product_matches_naive() {
        let group = toy_group();
        let points = vec![
            group.exp_g(&group.scalar_from_u64(2)),
            group.exp_g(&group.scalar_from_u64(5)),
            group.exp_g(&group.scalar_from_u64(7)),
        ];
        let z = group.scalar_from_u64(3);
        // g^(2 + 5*3 + 7*9) = g^80 = g^(80 mod 11) = g^3.
        assert_eq!(
            group.power_product(&points, &z),
            group.exp_g(&group.scalar_from_u64(3))
        );
    }

    #[test]
    fn scalar_arithmetic_wraps() {
        let group = toy_group();
        let a = group.scalar_from_u64(9);
        let b = group.scalar_from_u64(5);
        assert_eq!(group.scalar_add(&a, &b), group.scalar_from_u64(3));
        assert_eq!(group.scalar_sub(&b, &a), group.scalar_from_u64(7));
        assert_eq!(group.scalar_mul(&a, &b), group.scalar_from_u64(1));
    }

    #[test]
    fn zeroize_clears_scalar() {
        let group = toy_group();
        let mut s = group.scalar_from_u64(9);
        s.zeroize();
        assert!(s.is_zero());
    }
}
