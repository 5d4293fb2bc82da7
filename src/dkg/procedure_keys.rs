use crate::cryptography::elgamal::{HybridCiphertext, PublicKey, SecretKey};
use crate::group::{GroupElement, Scalar, SchnorrGroup};
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroize;

/// Committee member communication private key. This differs from the secret
/// share, as the members need a pre-existing keypair to confidentially
/// receive their shares from the other members.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberCommunicationKey(pub(crate) SecretKey);

/// Committee member communication public key. Peer shares addressed to this
/// member are encrypted under this key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberCommunicationPublicKey(pub(crate) PublicKey);

/// This member's share of the jointly generated secret, produced by summing
/// the valid received shares over the qualified set. `share` is the signing
/// share `x_i`; `blinding` is the companion share `x'_i` of the blinding
/// polynomial sum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberSecretShare {
    pub(crate) share: Scalar,
    pub(crate) blinding: Scalar,
}

/// The group public key `Y = prod_{j in QUAL} g^{a_{j,0}} mod p`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupPublicKey(pub(crate) GroupElement);

impl MemberCommunicationKey {
    pub fn new<R: RngCore + CryptoRng>(rng: &mut R, group: &SchnorrGroup) -> Self {
        MemberCommunicationKey(SecretKey::generate(rng, group))
    }

    pub fn to_public(&self, group: &SchnorrGroup) -> MemberCommunicationPublicKey {
        MemberCommunicationPublicKey(self.0.to_public(group))
    }

    pub fn hybrid_decrypt(&self, group: &SchnorrGroup, ciphertext: &HybridCiphertext) -> Vec<u8> {
        self.0.hybrid_decrypt(group, ciphertext)
    }

    /// Decrypt a share ciphertext into a scalar. Returns `None` when the
    /// plaintext is not a canonical encoding of a value in `[0, q)`, which
    /// the verifying phase treats as grounds for accusation.
    pub(crate) fn decrypt_share(
        &self,
        group: &SchnorrGroup,
        ciphertext: &HybridCiphertext,
    ) -> Option<Scalar> {
        group.scalar_from_bytes(&self.hybrid_decrypt(group, ciphertext))
    }
}

impl Zeroize for MemberCommunicationKey {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl MemberCommunicationPublicKey {
    pub fn hybrid_encrypt<R>(
        &self,
        group: &SchnorrGroup,
        message: &[u8],
        rng: &mut R,
    ) -> HybridCiphertext
    where
        R: RngCore + CryptoRng,
    {
        self.0.hybrid_encrypt(group, message, rng)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    pub fn from_bytes(group: &SchnorrGroup, bytes: &[u8]) -> Option<Self> {
        Some(MemberCommunicationPublicKey(PublicKey::from_bytes(
            group, bytes,
        )?))
    }
}

impl From<PublicKey> for MemberCommunicationPublicKey {
    fn from(pk: PublicKey) -> Self {
        MemberCommunicationPublicKey(pk)
    }
}

impl MemberSecretShare {
    /// The signing share `x_i`.
    pub fn share(&self) -> &Scalar {
        &self.share
    }

    /// The public counterpart `g^{x_i}` of this share.
    pub fn to_public(&self, group: &SchnorrGroup) -> GroupElement {
        group.exp_g(&self.share)
    }
}

impl Zeroize for MemberSecretShare {
    fn zeroize(&mut self) {
        self.share.zeroize();
        self.blinding.zeroize();
    }
}

impl Drop for MemberSecretShare {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl GroupPublicKey {
    pub fn as_element(&self) -> &GroupElement {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    pub fn from_bytes(group: &SchnorrGroup, bytes: &[u8]) -> Option<Self> {
        Some(GroupPublicKey(group.element_from_bytes(bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::tests::toy_group;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn share_encryption_round_trip() {
        let group = toy_group();
        let mut rng = ChaCha20Rng::seed_from_u64(21);
        let key = MemberCommunicationKey::new(&mut rng, &group);
        let public = key.to_public(&group);

        let share = group.scalar_from_u64(7);
        let ciphertext = public.hybrid_encrypt(&group, &share.to_bytes(), &mut rng);

        assert_eq!(key.decrypt_share(&group, &ciphertext), Some(share));
    }

    #[test]
    fn out_of_range_share_rejected() {
        let group = toy_group();
        let mut rng = ChaCha20Rng::seed_from_u64(22);
        let key = MemberCommunicationKey::new(&mut rng, &group);
        let public = key.to_public(&group);

        // 13 >= q = 11 is not a valid share encoding.
        let ciphertext = public.hybrid_encrypt(&group, &[13u8], &mut rng);
        assert_eq!(key.decrypt_share(&group, &ciphertext), None);
    }

    #[test]
    fn communication_public_key_round_trip() {
        let group = toy_group();
        let mut rng = ChaCha20Rng::seed_from_u64(23);
        let public = MemberCommunicationKey::new(&mut rng, &group).to_public(&group);
        assert_eq!(
            MemberCommunicationPublicKey::from_bytes(&group, &public.to_bytes()),
            Some(public)
        );
    }

    #[test]
    fn group_public_key_round_trip() {
        let group = toy_group();
        let key = GroupPublicKey(group.exp_g(&group.scalar_from_u64(6)));
        assert_eq!(
            GroupPublicKey::from_bytes(&group, &key.to_bytes()),
            Some(key)
        );
    }
}
