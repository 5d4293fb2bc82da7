//! Pedersen commitments over the protocol subgroup. A commitment to `a`
//! with blinding `b` is `g^a * h^b mod p`; it is binding under the discrete
//! logarithm assumption and perfectly hiding as long as `log_g h` is
//! unknown.

use crate::group::{GroupElement, Scalar, SchnorrGroup};

/// Pedersen commitment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Commitment {
    c: GroupElement,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid,
}

impl Commitment {
    /// Commit to `a` with blinding `b`, i.e. `g^a * h^b mod p`.
    pub fn new(group: &SchnorrGroup, a: &Scalar, b: &Scalar) -> Self {
        Commitment {
            c: group.mul(&group.exp_g(a), &group.exp_h(b)),
        }
    }

    /// Verify that the opening `(a, b)` corresponds to this commitment.
    pub fn verify(&self, group: &SchnorrGroup, a: &Scalar, b: &Scalar) -> Validity {
        if *self == Commitment::new(group, a, b) {
            Validity::Valid
        } else {
            Validity::Invalid
        }
    }

    /// Evaluate a coefficient commitment vector at the point `z`, i.e.
    /// `prod commitments[k]^{z^k} mod p`. This is the right-hand side of
    /// the share verification equation: for an honest dealer it equals the
    /// commitment to `(f(z), f'(z))`.
    pub fn evaluate_at(
        group: &SchnorrGroup,
        commitments: &[Commitment],
        z: &Scalar,
    ) -> GroupElement {
        let points: Vec<GroupElement> = commitments.iter().map(|c| c.c.clone()).collect();
        group.power_product(&points, z)
    }

    /// Whether the committed element lies in the order-`q` subgroup.
    pub fn is_in_subgroup(&self, group: &SchnorrGroup) -> bool {
        group.is_subgroup_element(&self.c)
    }

    pub fn as_element(&self) -> &GroupElement {
        &self.c
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.c.to_bytes()
    }

    /// Parse a commitment from bytes, rejecting values outside `[1, p)`.
    /// Subgroup membership is checked separately by the verifying phase.
    pub fn from_bytes(group: &SchnorrGroup, bytes: &[u8]) -> Option<Self> {
        Some(Commitment {
            c: group.element_from_bytes(bytes)?,
        })
    }
}

impl From<GroupElement> for Commitment {
    fn from(c: GroupElement) -> Self {
        Commitment { c }
    }
}
