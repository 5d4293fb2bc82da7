//! Implementation of the distributed key generation (DKG)
//! procedure presented by [Gennaro], Jarecki, Krawczyk and Rabin in
//! "Secure distributed key generation for discrete-log based cryptosystems",
//! over a runtime-configured Schnorr subgroup of `Z_p^*` with Pedersen
//! commitments. The distinction with the original protocol write-up lies in
//! the use of hybrid encryption for the peer shares.
//!
//! We implement the procedure using the [typestate] pattern, which enforces
//! at API level the correct ordering of the protocol phases. A structure
//! `Phase` stores the member `state` and a phantom data type binds it to
//! one phase, so each phase exposes only its own operations and every
//! transition consumes the previous phase. Transitions that emit broadcast
//! data return it alongside the next phase; transitions that adjudicate
//! return a `Result`, since too many exclusions make the session fail
//! unrecoverably.
//!
//! # Overview
//!
//! ## Committing
//! Every member samples two random polynomials of degree `T`, one carrying
//! its contribution to the group secret and one blinding it. It broadcasts
//! Pedersen commitments to the coefficient pairs and sends every other
//! member an encrypted evaluation of both polynomials at that member's
//! identifier.
//!
//! ## Verifying and first accusations
//! Each member decrypts its shares and checks them against the broadcast
//! commitments. Senders whose messages are missing, malformed or fail the
//! check are named in a broadcast accusation list. Accused members reveal
//! the shares they recorded as sent; every member re-runs the check and
//! either the accused or the accuser is disqualified. The surviving
//! members form the qualified set; fewer than `T + 1` of them is a fatal
//! failure.
//!
//! ## Share combination and public key share points
//! Qualified members sum their received shares into a share of the group
//! secret, then broadcast the `h`-less commitments `g^{a_k}` to their
//! coefficients. These are verified against the already-accepted shares,
//! with a second accusation round of the same shape as the first.
//!
//! ## Combining
//! The group public key is the product of the first public coefficients of
//! all qualified members. Each member ends with the key, its private
//! share, and the identifiers of every disqualified member.
//!
//! # Example
//!
//! ```rust
//! use gjkr_dkg::dkg::member::{DistributedKeyGeneration, Environment};
//! use gjkr_dkg::dkg::procedure_keys::MemberCommunicationKey;
//! use gjkr_dkg::group::SchnorrGroup;
//! # use gjkr_dkg::errors::DkgError;
//! use num_bigint::BigUint;
//! use rand_core::OsRng;
//!
//! # fn full_run() -> Result<(), DkgError> {
//! let mut rng = OsRng;
//!
//! // Toy parameters: the subgroup of order 11 in Z_23*.
//! let group = SchnorrGroup::new(
//!     BigUint::from(23u32),
//!     BigUint::from(11u32),
//!     BigUint::from(4u32),
//!     BigUint::from(9u32),
//! )?;
//!
//! let sk1 = MemberCommunicationKey::new(&mut rng, &group);
//! let sk2 = MemberCommunicationKey::new(&mut rng, &group);
//! let sk3 = MemberCommunicationKey::new(&mut rng, &group);
//! let roster = [
//!     (1, sk1.to_public(&group)),
//!     (2, sk2.to_public(&group)),
//!     (3, sk3.to_public(&group)),
//! ];
//! let environment = Environment::init(group, 1, &roster)?;
//!
//! let m1 = DistributedKeyGeneration::init(&mut rng, &environment, &sk1, 1)?;
//! let m2 = DistributedKeyGeneration::init(&mut rng, &environment, &sk2, 2)?;
//! let m3 = DistributedKeyGeneration::init(&mut rng, &environment, &sk3, 3)?;
//!
//! // Phase 3: everyone deals shares and broadcasts commitments.
//! let (m1, shares_1, commitments_1) = m1.calculate_shares_and_commitments(&mut rng);
//! let (m2, shares_2, commitments_2) = m2.calculate_shares_and_commitments(&mut rng);
//! let (m3, shares_3, commitments_3) = m3.calculate_shares_and_commitments(&mut rng);
//! let shares: Vec<_> = shares_1.into_iter().chain(shares_2).chain(shares_3).collect();
//! let commitments = [commitments_1, commitments_2, commitments_3];
//!
//! // Phase 4: verify and (here, vacuously) accuse.
//! let (m1, accusations_1) = m1.verify_shares_and_commitments(&shares, &commitments);
//! let (m2, accusations_2) = m2.verify_shares_and_commitments(&shares, &commitments);
//! let (m3, accusations_3) = m3.verify_shares_and_commitments(&shares, &commitments);
//! let accusations = [accusations_1, accusations_2, accusations_3];
//!
//! // Phase 5: reveal and resolve, then combine the member shares.
//! let (m1, reveal_1) = m1.reveal_accused_shares(&accusations);
//! let (m2, reveal_2) = m2.reveal_accused_shares(&accusations);
//! let (m3, reveal_3) = m3.reveal_accused_shares(&accusations);
//! let reveals = [reveal_1, reveal_2, reveal_3];
//! let m1 = m1.resolve_accusations(&reveals)?.combine_member_shares()?;
//! let m2 = m2.resolve_accusations(&reveals)?.combine_member_shares()?;
//! let m3 = m3.resolve_accusations(&reveals)?.combine_member_shares()?;
//!
//! // Phases 7-8: broadcast and verify the public key share points.
//! let (m1, points_1) = m1.calculate_public_key_share_points();
//! let (m2, points_2) = m2.calculate_public_key_share_points();
//! let (m3, points_3) = m3.calculate_public_key_share_points();
//! let points = [points_1, points_2, points_3];
//! let (m1, second_accusations_1) = m1.verify_public_key_share_points(&points);
//! let (m2, second_accusations_2) = m2.verify_public_key_share_points(&points);
//! let (m3, second_accusations_3) = m3.verify_public_key_share_points(&points);
//! let second_accusations = [second_accusations_1, second_accusations_2, second_accusations_3];
//! let (m1, second_reveal_1) = m1.reveal_misbehaved_shares(&second_accusations);
//! let (m2, second_reveal_2) = m2.reveal_misbehaved_shares(&second_accusations);
//! let (m3, second_reveal_3) = m3.reveal_misbehaved_shares(&second_accusations);
//! let second_reveals = [second_reveal_1, second_reveal_2, second_reveal_3];
//!
//! // Phase 9: combine the group public key. All members agree on it.
//! let result_1 = m1.resolve_point_accusations(&second_reveals)?.combine_group_public_key()?;
//! let result_2 = m2.resolve_point_accusations(&second_reveals)?.combine_group_public_key()?;
//! let result_3 = m3.resolve_point_accusations(&second_reveals)?.combine_group_public_key()?;
//!
//! assert_eq!(result_1.group_public_key, result_2.group_public_key);
//! assert_eq!(result_2.group_public_key, result_3.group_public_key);
//! assert!(result_1.misbehaved.is_empty());
//! # Ok(())
//! # }
//! # fn main() { assert!(full_run().is_ok()); }
//! ```
//!
//! [Gennaro]: https://link.springer.com/article/10.1007/s00145-006-0347-3
//! [typestate]: http://cliffle.com/blog/rust-typestate/

#![warn(unused, future_incompatible, nonstandard_style, rust_2018_idioms)]

pub mod cryptography;
pub mod dkg;
pub mod errors;
pub mod group;
pub mod polynomial;
pub mod session;
