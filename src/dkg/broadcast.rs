//! Broadcast and unicast messages exchanged during the protocol, together
//! with their byte codecs. Group elements and scalars have variable-length
//! big-endian encodings, so every element on the wire is length-prefixed.
//!
//! Parsing is strict: any truncation, trailing data, out-of-range scalar or
//! group element makes `from_bytes` return `None`. The verifying phases
//! treat an unparseable message exactly like a missing one.

use crate::cryptography::commitment::Commitment;
use crate::cryptography::elgamal::HybridCiphertext;
use crate::dkg::MemberId;
use crate::group::{GroupElement, Scalar, SchnorrGroup};

/// Identifies the protocol phase a message belongs to. The broadcast
/// channel hands out one phase's messages at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseTag {
    PeerShares,
    Commitments,
    FirstAccusations,
    FirstReveals,
    PublicKeySharePoints,
    SecondAccusations,
    SecondReveals,
}

/// Encrypted shares `(s_{i->j}, t_{i->j})` unicast from dealer `sender` to
/// `receiver`. Only the receiver can decrypt; everyone else at most learns
/// that shares were sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerSharesMessage {
    pub sender: MemberId,
    pub receiver: MemberId,
    pub(crate) encrypted_share: HybridCiphertext,
    pub(crate) encrypted_blinding: HybridCiphertext,
}

/// The dealer's Pedersen commitments `C_k = g^{a_k} h^{b_k}` to its
/// polynomial coefficients, broadcast in cleartext.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberCommitmentsMessage {
    pub sender: MemberId,
    pub commitments: Vec<Commitment>,
}

/// First-round accusations: ids of the senders whose shares failed
/// verification (or never arrived). Possibly empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirstAccusationsMessage {
    pub sender: MemberId,
    pub accused: Vec<MemberId>,
}

/// A share revealed in cleartext by an accused member: the values it
/// recorded as sent to `accuser`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevealedShare {
    pub accuser: MemberId,
    pub share: Scalar,
    pub blinding: Scalar,
}

/// First-round response of an accused member: one reveal per accuser.
/// Possibly empty when this member was not accused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccusedSharesRevealMessage {
    pub sender: MemberId,
    pub reveals: Vec<RevealedShare>,
}

/// The qualified member's public key share points `A_k = g^{a_k}`,
/// broadcast in cleartext.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKeySharePointsMessage {
    pub sender: MemberId,
    pub points: Vec<GroupElement>,
}

/// Second-round accusations, over the public key share points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecondAccusationsMessage {
    pub sender: MemberId,
    pub accused: Vec<MemberId>,
}

/// Second-round response of an accused member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MisbehavedSharesRevealMessage {
    pub sender: MemberId,
    pub reveals: Vec<RevealedShare>,
}

/// The tagged union of every message on the wire, keyed by phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DkgMessage {
    PeerShares(PeerSharesMessage),
    Commitments(MemberCommitmentsMessage),
    FirstAccusations(FirstAccusationsMessage),
    FirstReveals(AccusedSharesRevealMessage),
    PublicKeySharePoints(PublicKeySharePointsMessage),
    SecondAccusations(SecondAccusationsMessage),
    SecondReveals(MisbehavedSharesRevealMessage),
}

const TAG_PEER_SHARES: u8 = 1;
const TAG_COMMITMENTS: u8 = 2;
const TAG_FIRST_ACCUSATIONS: u8 = 3;
const TAG_FIRST_REVEALS: u8 = 4;
const TAG_POINTS: u8 = 5;
const TAG_SECOND_ACCUSATIONS: u8 = 6;
const TAG_SECOND_REVEALS: u8 = 7;

impl DkgMessage {
    pub fn phase(&self) -> PhaseTag {
        match self {
            DkgMessage::PeerShares(_) => PhaseTag::PeerShares,
            DkgMessage::Commitments(_) => PhaseTag::Commitments,
            DkgMessage::FirstAccusations(_) => PhaseTag::FirstAccusations,
            DkgMessage::FirstReveals(_) => PhaseTag::FirstReveals,
            DkgMessage::PublicKeySharePoints(_) => PhaseTag::PublicKeySharePoints,
            DkgMessage::SecondAccusations(_) => PhaseTag::SecondAccusations,
            DkgMessage::SecondReveals(_) => PhaseTag::SecondReveals,
        }
    }

    pub fn sender(&self) -> MemberId {
        match self {
            DkgMessage::PeerShares(m) => m.sender,
            DkgMessage::Commitments(m) => m.sender,
            DkgMessage::FirstAccusations(m) => m.sender,
            DkgMessage::FirstReveals(m) => m.sender,
            DkgMessage::PublicKeySharePoints(m) => m.sender,
            DkgMessage::SecondAccusations(m) => m.sender,
            DkgMessage::SecondReveals(m) => m.sender,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let (tag, payload) = match self {
            DkgMessage::PeerShares(m) => (TAG_PEER_SHARES, m.to_bytes()),
            DkgMessage::Commitments(m) => (TAG_COMMITMENTS, m.to_bytes()),
            DkgMessage::FirstAccusations(m) => (TAG_FIRST_ACCUSATIONS, m.to_bytes()),
            DkgMessage::FirstReveals(m) => (TAG_FIRST_REVEALS, m.to_bytes()),
            DkgMessage::PublicKeySharePoints(m) => (TAG_POINTS, m.to_bytes()),
            DkgMessage::SecondAccusations(m) => (TAG_SECOND_ACCUSATIONS, m.to_bytes()),
            DkgMessage::SecondReveals(m) => (TAG_SECOND_REVEALS, m.to_bytes()),
        };
        let mut bytes = Vec::with_capacity(1 + payload.len());
        bytes.push(tag);
        bytes.extend_from_slice(&payload);
        bytes
    }

    pub fn from_bytes(group: &SchnorrGroup, bytes: &[u8]) -> Option<Self> {
        let (&tag, payload) = bytes.split_first()?;
        match tag {
            TAG_PEER_SHARES => PeerSharesMessage::from_bytes(group, payload).map(DkgMessage::PeerShares),
            TAG_COMMITMENTS => {
                MemberCommitmentsMessage::from_bytes(group, payload).map(DkgMessage::Commitments)
            }
            TAG_FIRST_ACCUSATIONS => {
                FirstAccusationsMessage::from_bytes(payload).map(DkgMessage::FirstAccusations)
            }
            TAG_FIRST_REVEALS => {
                AccusedSharesRevealMessage::from_bytes(group, payload).map(DkgMessage::FirstReveals)
            }
            TAG_POINTS => PublicKeySharePointsMessage::from_bytes(group, payload)
                .map(DkgMessage::PublicKeySharePoints),
            TAG_SECOND_ACCUSATIONS => {
                SecondAccusationsMessage::from_bytes(payload).map(DkgMessage::SecondAccusations)
            }
            TAG_SECOND_REVEALS => MisbehavedSharesRevealMessage::from_bytes(group, payload)
                .map(DkgMessage::SecondReveals),
            _ => None,
        }
    }
}

impl PeerSharesMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.sender.to_be_bytes());
        bytes.extend_from_slice(&self.receiver.to_be_bytes());
        write_chunk(&mut bytes, &self.encrypted_share.to_bytes());
        write_chunk(&mut bytes, &self.encrypted_blinding.to_bytes());
        bytes
    }

    pub fn from_bytes(group: &SchnorrGroup, bytes: &[u8]) -> Option<Self> {
        let mut reader = Reader::new(bytes);
        let message = PeerSharesMessage {
            sender: reader.read_u32()?,
            receiver: reader.read_u32()?,
            encrypted_share: HybridCiphertext::from_bytes(group, reader.read_chunk()?)?,
            encrypted_blinding: HybridCiphertext::from_bytes(group, reader.read_chunk()?)?,
        };
        reader.finish().then(|| message)
    }
}

impl MemberCommitmentsMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.sender.to_be_bytes());
        bytes.extend_from_slice(&(self.commitments.len() as u32).to_be_bytes());
        for commitment in &self.commitments {
            write_chunk(&mut bytes, &commitment.to_bytes());
        }
        bytes
    }

    pub fn from_bytes(group: &SchnorrGroup, bytes: &[u8]) -> Option<Self> {
        let mut reader = Reader::new(bytes);
        let sender = reader.read_u32()?;
        let count = reader.read_u32()? as usize;
        let mut commitments = Vec::with_capacity(count);
        for _ in 0..count {
            commitments.push(Commitment::from_bytes(group, reader.read_chunk()?)?);
        }
        let message = MemberCommitmentsMessage {
            sender,
            commitments,
        };
        reader.finish().then(|| message)
    }
}

impl FirstAccusationsMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        accusations_to_bytes(self.sender, &self.accused)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (sender, accused) = accusations_from_bytes(bytes)?;
        Some(FirstAccusationsMessage { sender, accused })
    }
}

impl SecondAccusationsMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        accusations_to_bytes(self.sender, &self.accused)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (sender, accused) = accusations_from_bytes(bytes)?;
        Some(SecondAccusationsMessage { sender, accused })
    }
}

impl AccusedSharesRevealMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        reveals_to_bytes(self.sender, &self.reveals)
    }

    pub fn from_bytes(group: &SchnorrGroup, bytes: &[u8]) -> Option<Self> {
        let (sender, reveals) = reveals_from_bytes(group, bytes)?;
        Some(AccusedSharesRevealMessage { sender, reveals })
    }
}

impl MisbehavedSharesRevealMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        reveals_to_bytes(self.sender, &self.reveals)
    }

    pub fn from_bytes(group: &SchnorrGroup, bytes: &[u8]) -> Option<Self> {
        let (sender, reveals) = reveals_from_bytes(group, bytes)?;
        Some(MisbehavedSharesRevealMessage { sender, reveals })
    }
}

impl PublicKeySharePointsMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.sender.to_be_bytes());
        bytes.extend_from_slice(&(self.points.len() as u32).to_be_bytes());
        for point in &self.points {
            write_chunk(&mut bytes, &point.to_bytes());
        }
        bytes
    }

    pub fn from_bytes(group: &SchnorrGroup, bytes: &[u8]) -> Option<Self> {
        let mut reader = Reader::new(bytes);
        let sender = reader.read_u32()?;
        let count = reader.read_u32()? as usize;
        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            points.push(group.element_from_bytes(reader.read_chunk()?)?);
        }
        let message = PublicKeySharePointsMessage { sender, points };
        reader.finish().then(|| message)
    }
}

fn accusations_to_bytes(sender: MemberId, accused: &[MemberId]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&sender.to_be_bytes());
    bytes.extend_from_slice(&(accused.len() as u32).to_be_bytes());
    for id in accused {
        bytes.extend_from_slice(&id.to_be_bytes());
    }
    bytes
}

fn accusations_from_bytes(bytes: &[u8]) -> Option<(MemberId, Vec<MemberId>)> {
    let mut reader = Reader::new(bytes);
    let sender = reader.read_u32()?;
    let count = reader.read_u32()? as usize;
    let mut accused = Vec::with_capacity(count);
    for _ in 0..count {
        accused.push(reader.read_u32()?);
    }
    reader.finish().then(|| (sender, accused))
}

fn reveals_to_bytes(sender: MemberId, reveals: &[RevealedShare]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&sender.to_be_bytes());
    bytes.extend_from_slice(&(reveals.len() as u32).to_be_bytes());
    for reveal in reveals {
        bytes.extend_from_slice(&reveal.accuser.to_be_bytes());
        write_chunk(&mut bytes, &reveal.share.to_bytes());
        write_chunk(&mut bytes, &reveal.blinding.to_bytes());
    }
    bytes
}

fn reveals_from_bytes(
    group: &SchnorrGroup,
    bytes: &[u8],
) -> Option<(MemberId, Vec<RevealedShare>)> {
    let mut reader = Reader::new(bytes);
    let sender = reader.read_u32()?;
    let count = reader.read_u32()? as usize;
    let mut reveals = Vec::with_capacity(count);
    for _ in 0..count {
        reveals.push(RevealedShare {
            accuser: reader.read_u32()?,
            share: group.scalar_from_bytes(reader.read_chunk()?)?,
            blinding: group.scalar_from_bytes(reader.read_chunk()?)?,
        });
    }
    reader.finish().then(|| (sender, reveals))
}

fn write_chunk(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes }
    }

    fn read_u32(&mut self) -> Option<u32> {
        if self.bytes.len() < 4 {
            return None;
        }
        let (head, rest) = self.bytes.split_at(4);
        self.bytes = rest;
        let mut buffer = [0u8; 4];
        buffer.copy_from_slice(head);
        Some(u32::from_be_bytes(buffer))
    }

    fn read_chunk(&mut self) -> Option<&'a [u8]> {
        let length = self.read_u32()? as usize;
        if self.bytes.len() < length {
            return None;
        }
        let (chunk, rest) = self.bytes.split_at(length);
        self.bytes = rest;
        Some(chunk)
    }

    /// True when the input was consumed exactly.
    fn finish(self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::tests::toy_group;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn sample_peer_shares(group: &SchnorrGroup) -> PeerSharesMessage {
        let mut rng = ChaCha20Rng::seed_from_u64(31);
        let key = crate::cryptography::elgamal::Keypair::generate(&mut rng, group);
        PeerSharesMessage {
            sender: 1,
            receiver: 2,
            encrypted_share: key.public_key.hybrid_encrypt(group, &[7], &mut rng),
            encrypted_blinding: key.public_key.hybrid_encrypt(group, &[4], &mut rng),
        }
    }

    #[test]
    fn peer_shares_round_trip() {
        let group = toy_group();
        let message = sample_peer_shares(&group);
        let envelope = DkgMessage::PeerShares(message.clone());
        assert_eq!(
            DkgMessage::from_bytes(&group, &envelope.to_bytes()),
            Some(envelope.clone())
        );
        assert_eq!(envelope.phase(), PhaseTag::PeerShares);
        assert_eq!(envelope.sender(), message.sender);
    }

    #[test]
    fn commitments_round_trip() {
        let group = toy_group();
        let commitments = vec![
            Commitment::new(&group, &group.scalar_from_u64(2), &group.scalar_from_u64(3)),
            Commitment::new(&group, &group.scalar_from_u64(5), &group.scalar_from_u64(1)),
        ];
        let envelope = DkgMessage::Commitments(MemberCommitmentsMessage {
            sender: 4,
            commitments,
        });
        assert_eq!(
            DkgMessage::from_bytes(&group, &envelope.to_bytes()),
            Some(envelope)
        );
    }

    #[test]
    fn accusations_round_trip() {
        let group = toy_group();
        for accused in [vec![], vec![3], vec![2, 5]] {
            let first = DkgMessage::FirstAccusations(FirstAccusationsMessage {
                sender: 1,
                accused: accused.clone(),
            });
            assert_eq!(
                DkgMessage::from_bytes(&group, &first.to_bytes()),
                Some(first)
            );
            let second = DkgMessage::SecondAccusations(SecondAccusationsMessage {
                sender: 1,
                accused,
            });
            assert_eq!(
                DkgMessage::from_bytes(&group, &second.to_bytes()),
                Some(second)
            );
        }
    }

    #[test]
    fn reveals_round_trip() {
        let group = toy_group();
        let reveals = vec![
            RevealedShare {
                accuser: 2,
                share: group.scalar_from_u64(9),
                blinding: group.scalar_from_u64(0),
            },
            RevealedShare {
                accuser: 5,
                share: group.scalar_from_u64(1),
                blinding: group.scalar_from_u64(10),
            },
        ];
        let envelope = DkgMessage::FirstReveals(AccusedSharesRevealMessage { sender: 3, reveals });
        assert_eq!(
            DkgMessage::from_bytes(&group, &envelope.to_bytes()),
            Some(envelope)
        );
    }

    #[test]
    fn points_round_trip() {
        let group = toy_group();
        let points = vec![
            group.exp_g(&group.scalar_from_u64(2)),
            group.exp_g(&group.scalar_from_u64(7)),
            group.exp_g(&group.scalar_from_u64(1)),
        ];
        let envelope =
            DkgMessage::PublicKeySharePoints(PublicKeySharePointsMessage { sender: 2, points });
        assert_eq!(
            DkgMessage::from_bytes(&group, &envelope.to_bytes()),
            Some(envelope)
        );
    }

    #[test]
    fn malformed_bytes_rejected() {
        let group = toy_group();
        let message = DkgMessage::Commitments(MemberCommitmentsMessage {
            sender: 4,
            commitments: vec![Commitment::new(
                &group,
                &group.scalar_from_u64(2),
                &group.scalar_from_u64(3),
            )],
        });
        let bytes = message.to_bytes();

        // Truncation.
        assert_eq!(DkgMessage::from_bytes(&group, &bytes[..bytes.len() - 1]), None);
        // Trailing garbage.
        let mut extended = bytes.clone();
        extended.push(0);
        assert_eq!(DkgMessage::from_bytes(&group, &extended), None);
        // Unknown tag.
        let mut retagged = bytes;
        retagged[0] = 200;
        assert_eq!(DkgMessage::from_bytes(&group, &retagged), None);
    }

    #[test]
    fn out_of_range_reveal_rejected() {
        let group = toy_group();
        let reveal = DkgMessage::FirstReveals(AccusedSharesRevealMessage {
            sender: 3,
            reveals: vec![RevealedShare {
                accuser: 2,
                share: group.scalar_from_u64(9),
                blinding: group.scalar_from_u64(3),
            }],
        });
        let mut bytes = reveal.to_bytes();
        // The share byte sits after tag, sender, count and accuser plus the
        // chunk length; patch it to a value >= q.
        let position = bytes.len() - 6;
        assert_eq!(bytes[position], 9);
        bytes[position] = 12;
        assert_eq!(DkgMessage::from_bytes(&group, &bytes), None);
    }
}
