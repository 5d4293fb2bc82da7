//! Hybrid encryption for peer shares. Key encapsulation is ElGamal over the
//! protocol subgroup; the shared group element is hashed with Blake2b into a
//! ChaCha20 key which encrypts the payload. A fresh ephemeral exponent is
//! drawn per message, so the stream cipher nonce can stay fixed.

use blake2::{Blake2b, Digest};
use chacha20::cipher::{NewCipher, StreamCipher};
use chacha20::{ChaCha20, Nonce};
use generic_array::typenum::U32;
use generic_array::GenericArray;
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::group::{GroupElement, Scalar, SchnorrGroup};

/// ElGamal secret key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretKey {
    pub(crate) sk: Scalar,
}

/// ElGamal public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    pub(crate) pk: GroupElement,
}

/// ElGamal keypair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keypair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

/// The symmetric key used to encrypt the payload, in its group
/// representation `pk^r = e1^sk`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymmetricKey {
    pub(crate) group_repr: GroupElement,
}

/// Hybrid ciphertext: the ElGamal encapsulation `e1 = g^r` plus the
/// ChaCha20-encrypted payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HybridCiphertext {
    pub(crate) e1: GroupElement,
    pub(crate) e2: Vec<u8>,
}

impl SecretKey {
    pub fn generate<R>(rng: &mut R, group: &SchnorrGroup) -> Self
    where
        R: RngCore + CryptoRng,
    {
        SecretKey {
            sk: sample_nonzero(rng, group),
        }
    }

    pub fn to_public(&self, group: &SchnorrGroup) -> PublicKey {
        PublicKey {
            pk: group.exp_g(&self.sk),
        }
    }

    /// Recompute the symmetric key from the encapsulation, `e1^sk`.
    pub fn recover_symmetric_key(
        &self,
        group: &SchnorrGroup,
        ciphertext: &HybridCiphertext,
    ) -> SymmetricKey {
        SymmetricKey {
            group_repr: group.exp(&ciphertext.e1, &self.sk),
        }
    }

    pub fn hybrid_decrypt(&self, group: &SchnorrGroup, ciphertext: &HybridCiphertext) -> Vec<u8> {
        self.recover_symmetric_key(group, ciphertext)
            .process(&ciphertext.e2)
    }
}

impl Zeroize for SecretKey {
    fn zeroize(&mut self) {
        self.sk.zeroize();
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl PublicKey {
    pub fn hybrid_encrypt<R>(
        &self,
        group: &SchnorrGroup,
        message: &[u8],
        rng: &mut R,
    ) -> HybridCiphertext
    where
        R: RngCore + CryptoRng,
    {
        let r = sample_nonzero(rng, group);
        let e1 = group.exp_g(&r);
        let key = SymmetricKey {
            group_repr: group.exp(&self.pk, &r),
        };
        HybridCiphertext {
            e1,
            e2: key.process(message),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.pk.to_bytes()
    }

    pub fn from_bytes(group: &SchnorrGroup, bytes: &[u8]) -> Option<Self> {
        Some(PublicKey {
            pk: group.element_from_bytes(bytes)?,
        })
    }
}

impl Keypair {
    pub fn generate<R>(rng: &mut R, group: &SchnorrGroup) -> Self
    where
        R: RngCore + CryptoRng,
    {
        let secret_key = SecretKey::generate(rng, group);
        let public_key = secret_key.to_public(group);
        Keypair {
            secret_key,
            public_key,
        }
    }
}

impl SymmetricKey {
    /// Apply the ChaCha20 keystream derived from this key. Encryption and
    /// decryption are the same operation.
    pub fn process(&self, input: &[u8]) -> Vec<u8> {
        let key = self.stream_key();
        let mut cipher = ChaCha20::new(&key, &Nonce::default());
        let mut output = input.to_vec();
        cipher.apply_keystream(&mut output);
        output
    }

    fn stream_key(&self) -> GenericArray<u8, U32> {
        let mut hasher = Blake2b::new();
        hasher.update(self.group_repr.to_bytes());
        let digest = hasher.finalize();
        GenericArray::clone_from_slice(&digest[..32])
    }
}

impl HybridCiphertext {
    pub fn to_bytes(&self) -> Vec<u8> {
        let e1 = self.e1.to_bytes();
        let mut bytes = Vec::with_capacity(4 + e1.len() + self.e2.len());
        bytes.extend_from_slice(&(e1.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&e1);
        bytes.extend_from_slice(&self.e2);
        bytes
    }

    pub fn from_bytes(group: &SchnorrGroup, bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        let mut len = [0u8; 4];
        len.copy_from_slice(&bytes[..4]);
        let e1_len = u32::from_be_bytes(len) as usize;
        if bytes.len() < 4 + e1_len {
            return None;
        }
        Some(HybridCiphertext {
            e1: group.element_from_bytes(&bytes[4..4 + e1_len])?,
            e2: bytes[4 + e1_len..].to_vec(),
        })
    }
}

/// Sample a non-zero scalar. A zero exponent would make the encapsulation
/// (or the public key) the identity element.
fn sample_nonzero<R>(rng: &mut R, group: &SchnorrGroup) -> Scalar
where
    R: RngCore + CryptoRng,
{
    loop {
        let scalar = group.sample_scalar(rng);
        if !scalar.is_zero() {
            return scalar;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::tests::toy_group;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let group = toy_group();
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let keypair = Keypair::generate(&mut rng, &group);

        let plaintext = [10u8; 43];
        let ciphertext = keypair
            .public_key
            .hybrid_encrypt(&group, &plaintext, &mut rng);

        assert_eq!(
            keypair.secret_key.hybrid_decrypt(&group, &ciphertext),
            plaintext.to_vec()
        );
    }

    #[test]
    fn decryption_with_wrong_key_garbles() {
        let group = toy_group();
        let mut rng = ChaCha20Rng::seed_from_u64(12);
        let secret_key = SecretKey {
            sk: group.scalar_from_u64(3),
        };
        let other = SecretKey {
            sk: group.scalar_from_u64(5),
        };

        let plaintext = b"share payload".to_vec();
        let ciphertext =
            secret_key
                .to_public(&group)
                .hybrid_encrypt(&group, &plaintext, &mut rng);

        assert_eq!(secret_key.hybrid_decrypt(&group, &ciphertext), plaintext);
        // e1 = g^r with r non-zero, so e1^3 != e1^5 and the derived
        // keystreams differ.
        assert_ne!(other.hybrid_decrypt(&group, &ciphertext), plaintext);
    }

    #[test]
    fn ciphertext_bytes_round_trip() {
        let group = toy_group();
        let mut rng = ChaCha20Rng::seed_from_u64(13);
        let keypair = Keypair::generate(&mut rng, &group);
        let ciphertext = keypair.public_key.hybrid_encrypt(&group, b"st", &mut rng);

        let parsed = HybridCiphertext::from_bytes(&group, &ciphertext.to_bytes()).unwrap();
        assert_eq!(ciphertext, parsed);
    }
}
