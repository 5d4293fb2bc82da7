//! The per-member protocol state machine, implemented with the [typestate]
//! pattern: a `Phase` structure stores the member `state` and a phantom
//! marker binds it to one protocol phase, so only the operations of the
//! current phase are callable and every transition consumes the previous
//! phase. Misuse (calling a phase operation out of order) is therefore a
//! compile error rather than a runtime one.
//!
//! Phase progression:
//!
//! `Initialized -> Committing -> Verifying -> FirstAccusing ->
//! FirstResolving -> Qualified -> Sharing -> PointVerifying ->
//! SecondAccusing -> SecondResolving -> Combining`
//!
//! The terminal states are the return values of the last transition: a
//! [`DkgResult`] on success, a fatal [`DkgError`] otherwise. Peer
//! misbehaviour never terminates the protocol early; it accumulates in the
//! disqualified set and surfaces in the result.
//!
//! [typestate]: http://cliffle.com/blog/rust-typestate/

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::mem;

use rand_core::{CryptoRng, RngCore};
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::cryptography::commitment::Commitment;
use crate::dkg::broadcast::{
    AccusedSharesRevealMessage, FirstAccusationsMessage, MemberCommitmentsMessage,
    MisbehavedSharesRevealMessage, PeerSharesMessage, PublicKeySharePointsMessage, RevealedShare,
    SecondAccusationsMessage,
};
use crate::dkg::procedure_keys::{
    GroupPublicKey, MemberCommunicationKey, MemberCommunicationPublicKey, MemberSecretShare,
};
use crate::dkg::MemberId;
use crate::errors::DkgError;
use crate::group::{GroupElement, Scalar, SchnorrGroup};
use crate::polynomial::Polynomial;

/// Environment parameters of the distributed key generation procedure:
/// the validated subgroup, the disqualification threshold, and the member
/// roster with the communication public keys agreed out of band.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Environment {
    group: SchnorrGroup,
    threshold: usize,
    members: BTreeMap<MemberId, MemberCommunicationPublicKey>,
}

impl Environment {
    /// Validate and freeze the session parameters. The group size must be
    /// at least `2 * threshold + 1` for the accusation mechanism to
    /// tolerate `threshold` corrupted members.
    pub fn init(
        group: SchnorrGroup,
        threshold: usize,
        members: &[(MemberId, MemberCommunicationPublicKey)],
    ) -> Result<Self, DkgError> {
        if threshold == 0 {
            return Err(DkgError::InvalidConfiguration(
                "threshold must be positive".to_string(),
            ));
        }

        let mut roster = BTreeMap::new();
        let mut evaluation_points = BTreeSet::new();
        for (id, key) in members {
            if *id == 0 {
                return Err(DkgError::InvalidConfiguration(
                    "member identifier 0 is forbidden".to_string(),
                ));
            }
            let point = group.scalar_from_u64(u64::from(*id));
            if point.is_zero() {
                return Err(DkgError::InvalidConfiguration(format!(
                    "member identifier {} is congruent to 0 mod q",
                    id
                )));
            }
            if !evaluation_points.insert(point.to_bytes()) {
                return Err(DkgError::InvalidConfiguration(
                    "two member identifiers share an evaluation point".to_string(),
                ));
            }
            if roster.insert(*id, key.clone()).is_some() {
                return Err(DkgError::InvalidConfiguration(format!(
                    "duplicate member identifier {}",
                    id
                )));
            }
        }

        if roster.len() < 2 * threshold + 1 {
            return Err(DkgError::InvalidConfiguration(format!(
                "group of {} members cannot tolerate {} misbehaving ones",
                roster.len(),
                threshold
            )));
        }

        Ok(Environment {
            group,
            threshold,
            members: roster,
        })
    }

    pub fn group(&self) -> &SchnorrGroup {
        &self.group
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn nr_members(&self) -> usize {
        self.members.len()
    }

    /// Member identifiers in ascending order.
    pub fn member_ids(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.members.keys().copied()
    }

    pub fn contains(&self, id: MemberId) -> bool {
        self.members.contains_key(&id)
    }

    fn member_key(&self, id: MemberId) -> Option<&MemberCommunicationPublicKey> {
        self.members.get(&id)
    }
}

/// Private state, accumulated over the protocol phases.
#[derive(Clone, Debug, PartialEq)]
pub struct MemberState {
    id: MemberId,
    environment: Environment,
    communication_sk: MemberCommunicationKey,
    sharing_polynomial: Option<Polynomial>,
    blinding_polynomial: Option<Polynomial>,
    public_coefficients: Vec<GroupElement>,
    sent_shares: BTreeMap<MemberId, (Scalar, Scalar)>,
    received_shares: BTreeMap<MemberId, (Scalar, Scalar)>,
    peer_commitments: BTreeMap<MemberId, Vec<Commitment>>,
    peer_points: BTreeMap<MemberId, Vec<GroupElement>>,
    first_accusations: BTreeMap<MemberId, BTreeSet<MemberId>>,
    second_accusations: BTreeMap<MemberId, BTreeSet<MemberId>>,
    qualified: BTreeSet<MemberId>,
    misbehaved: BTreeSet<MemberId>,
    share: Option<(Scalar, Scalar)>,
}

impl Drop for MemberState {
    fn drop(&mut self) {
        self.communication_sk.zeroize();
        for (share, blinding) in self.sent_shares.values_mut() {
            share.zeroize();
            blinding.zeroize();
        }
        for (share, blinding) in self.received_shares.values_mut() {
            share.zeroize();
            blinding.zeroize();
        }
        if let Some((share, blinding)) = self.share.as_mut() {
            share.zeroize();
            blinding.zeroize();
        }
    }
}

/// Definition of a phase
pub struct Phase<P> {
    state: Box<MemberState>,
    phase: PhantomData<P>,
}

impl<P> Debug for Phase<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase").field("state", &self.state).finish()
    }
}

impl<P> PartialEq for Phase<P> {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state
    }
}

pub struct Initialized {}
pub struct Committing {}
pub struct Verifying {}
pub struct FirstAccusing {}
pub struct FirstResolving {}
pub struct Qualified {}
pub struct Sharing {}
pub struct PointVerifying {}
pub struct SecondAccusing {}
pub struct SecondResolving {}
pub struct Combining {}

pub type DistributedKeyGeneration = Phase<Initialized>;

/// The terminal output of a successful session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DkgResult {
    /// The jointly generated group public key `Y`.
    pub group_public_key: GroupPublicKey,
    /// Members excluded in either accusation round, ascending. This is the
    /// set submitted alongside the key for on-chain accountability.
    pub misbehaved: Vec<MemberId>,
    /// This member's share of the group secret.
    pub private_share: MemberSecretShare,
}

impl<P> Phase<P> {
    pub fn member_id(&self) -> MemberId {
        self.state.id
    }

    fn advance<N>(self) -> Phase<N> {
        Phase {
            state: self.state,
            phase: PhantomData,
        }
    }
}

impl Phase<Initialized> {
    /// Start a session for member `me`. Samples the two secret polynomials
    /// of degree `threshold`; their coefficients stay inside the state
    /// until they are zeroised after share combination.
    pub fn init<R>(
        rng: &mut R,
        environment: &Environment,
        communication_sk: &MemberCommunicationKey,
        me: MemberId,
    ) -> Result<Phase<Committing>, DkgError>
    where
        R: RngCore + CryptoRng,
    {
        let group = environment.group();
        let roster_key = environment.member_key(me).ok_or_else(|| {
            DkgError::InvalidConfiguration(format!("member {} is not part of the roster", me))
        })?;
        if &communication_sk.to_public(group) != roster_key {
            return Err(DkgError::InvalidConfiguration(
                "communication key does not match the roster entry".to_string(),
            ));
        }

        let sharing_polynomial = Polynomial::random(rng, group, environment.threshold());
        let blinding_polynomial = Polynomial::random(rng, group, environment.threshold());

        debug!(member = me, "dkg member initialised");

        Ok(Phase {
            state: Box::new(MemberState {
                id: me,
                environment: environment.clone(),
                communication_sk: communication_sk.clone(),
                sharing_polynomial: Some(sharing_polynomial),
                blinding_polynomial: Some(blinding_polynomial),
                public_coefficients: Vec::new(),
                sent_shares: BTreeMap::new(),
                received_shares: BTreeMap::new(),
                peer_commitments: BTreeMap::new(),
                peer_points: BTreeMap::new(),
                first_accusations: BTreeMap::new(),
                second_accusations: BTreeMap::new(),
                qualified: environment.member_ids().collect(),
                misbehaved: BTreeSet::new(),
                share: None,
            }),
            phase: PhantomData,
        })
    }
}

impl Phase<Committing> {
    /// Evaluate both polynomials at every member's identifier and produce
    /// the encrypted peer share messages plus the coefficient commitments
    /// broadcast. The self-shares are retained, never transmitted.
    pub fn calculate_shares_and_commitments<R>(
        mut self,
        rng: &mut R,
    ) -> (
        Phase<Verifying>,
        Vec<PeerSharesMessage>,
        MemberCommitmentsMessage,
    )
    where
        R: RngCore + CryptoRng,
    {
        let state = &mut *self.state;
        let group = state.environment.group().clone();
        let me = state.id;

        let sharing = state
            .sharing_polynomial
            .as_ref()
            .expect("polynomials are sampled at initialisation");
        let blinding = state
            .blinding_polynomial
            .as_ref()
            .expect("polynomials are sampled at initialisation");

        let commitments: Vec<Commitment> = sharing
            .coefficients()
            .zip(blinding.coefficients())
            .map(|(a, b)| Commitment::new(&group, a, b))
            .collect();
        // The h-less coefficients are public later anyway; computing them
        // now lets the secret coefficients be discarded right after share
        // combination.
        let public_coefficients: Vec<GroupElement> =
            sharing.coefficients().map(|a| group.exp_g(a)).collect();

        let mut peer_messages = Vec::new();
        let mut sent_shares = BTreeMap::new();
        let mut self_shares = None;
        for id in state.environment.member_ids() {
            let z = group.scalar_from_u64(u64::from(id));
            let share = sharing.evaluate(&group, &z);
            let blinding_share = blinding.evaluate(&group, &z);
            if id == me {
                self_shares = Some((share.clone(), blinding_share.clone()));
            } else {
                let key = state
                    .environment
                    .member_key(id)
                    .expect("roster ids come from the roster itself");
                peer_messages.push(PeerSharesMessage {
                    sender: me,
                    receiver: id,
                    encrypted_share: key.hybrid_encrypt(&group, &share.to_bytes(), rng),
                    encrypted_blinding: key.hybrid_encrypt(
                        &group,
                        &blinding_share.to_bytes(),
                        rng,
                    ),
                });
            }
            sent_shares.insert(id, (share, blinding_share));
        }

        state.sent_shares = sent_shares;
        if let Some(shares) = self_shares {
            state.received_shares.insert(me, shares);
        }
        state.public_coefficients = public_coefficients;
        state.peer_commitments.insert(me, commitments.clone());

        debug!(member = me, "shares and commitments calculated");

        let commitments_message = MemberCommitmentsMessage {
            sender: me,
            commitments,
        };
        (self.advance(), peer_messages, commitments_message)
    }
}

impl Phase<Verifying> {
    /// Verify every peer's shares against its broadcast commitments and
    /// produce the (possibly empty) first-round accusation list.
    ///
    /// A sender is accused when its commitments message is missing,
    /// conflicting, of the wrong length or outside the subgroup; when its
    /// share message is missing, conflicting or undecryptable; or when the
    /// Pedersen verification equation fails.
    pub fn verify_shares_and_commitments(
        mut self,
        shares: &[PeerSharesMessage],
        commitments: &[MemberCommitmentsMessage],
    ) -> (Phase<FirstAccusing>, FirstAccusationsMessage) {
        let state = &mut *self.state;
        let group = state.environment.group().clone();
        let threshold = state.environment.threshold();
        let me = state.id;
        let z = group.scalar_from_u64(u64::from(me));

        let (commitments_by_sender, commitment_conflicts) =
            collate_by_sender(commitments.iter(), |m| m.sender);
        let (shares_by_sender, share_conflicts) =
            collate_by_sender(shares.iter().filter(|m| m.receiver == me), |m| m.sender);

        let mut accused = BTreeSet::new();
        for id in state.environment.member_ids() {
            if id == me {
                continue;
            }
            if commitment_conflicts.contains(&id) || share_conflicts.contains(&id) {
                accused.insert(id);
                continue;
            }

            let peer_commitments = match commitments_by_sender.get(&id) {
                Some(message) => &message.commitments,
                None => {
                    accused.insert(id);
                    continue;
                }
            };
            if peer_commitments.len() != threshold + 1
                || peer_commitments.iter().any(|c| !c.is_in_subgroup(&group))
            {
                accused.insert(id);
                continue;
            }
            // Keep valid commitments around: accusation resolution verifies
            // reveals against them, and they are public material anyway.
            state.peer_commitments.insert(id, peer_commitments.clone());

            let message = match shares_by_sender.get(&id) {
                Some(message) => message,
                None => {
                    accused.insert(id);
                    continue;
                }
            };
            let share = state
                .communication_sk
                .decrypt_share(&group, &message.encrypted_share);
            let blinding = state
                .communication_sk
                .decrypt_share(&group, &message.encrypted_blinding);
            let (share, blinding) = match (share, blinding) {
                (Some(share), Some(blinding)) => (share, blinding),
                _ => {
                    accused.insert(id);
                    continue;
                }
            };

            let lhs = Commitment::new(&group, &share, &blinding);
            let rhs = Commitment::evaluate_at(&group, peer_commitments, &z);
            if lhs.as_element() != &rhs {
                accused.insert(id);
                continue;
            }
            state.received_shares.insert(id, (share, blinding));
        }

        if !accused.is_empty() {
            warn!(member = me, accused = ?accused, "share verification raised accusations");
        }

        let message = FirstAccusationsMessage {
            sender: me,
            accused: accused.into_iter().collect(),
        };
        (self.advance(), message)
    }
}

impl Phase<FirstAccusing> {
    /// Canonicalise the accusation log and, if this member was accused,
    /// reveal the shares it recorded as sent to each accuser. Entries
    /// naming unknown members, self-accusations and duplicates are dropped;
    /// a member broadcasting conflicting accusation lists is excluded and
    /// its accusations are disregarded.
    pub fn reveal_accused_shares(
        mut self,
        accusations: &[FirstAccusationsMessage],
    ) -> (Phase<FirstResolving>, AccusedSharesRevealMessage) {
        let state = &mut *self.state;
        let me = state.id;

        let (by_sender, conflicting) = collate_by_sender(accusations.iter(), |m| m.sender);
        let environment = &state.environment;
        state
            .misbehaved
            .extend(conflicting.iter().copied().filter(|id| environment.contains(*id)));

        let mut log: BTreeMap<MemberId, BTreeSet<MemberId>> = BTreeMap::new();
        for (accuser, message) in &by_sender {
            if !state.environment.contains(*accuser) {
                continue;
            }
            let accused: BTreeSet<MemberId> = message
                .accused
                .iter()
                .copied()
                .filter(|id| *id != *accuser && state.environment.contains(*id))
                .collect();
            if !accused.is_empty() {
                log.insert(*accuser, accused);
            }
        }

        let mut reveals = Vec::new();
        for (accuser, accused) in &log {
            if accused.contains(&me) {
                if let Some((share, blinding)) = state.sent_shares.get(accuser) {
                    reveals.push(RevealedShare {
                        accuser: *accuser,
                        share: share.clone(),
                        blinding: blinding.clone(),
                    });
                }
            }
        }
        state.first_accusations = log;

        let message = AccusedSharesRevealMessage {
            sender: me,
            reveals,
        };
        (self.advance(), message)
    }
}

impl Phase<FirstResolving> {
    /// Adjudicate every accusation against the revealed shares and compute
    /// the qualified set. Every honest member, given the same message log,
    /// computes the identical set: the log is iterated in ascending member
    /// order and all checks depend only on broadcast material.
    pub fn resolve_accusations(
        mut self,
        reveals: &[AccusedSharesRevealMessage],
    ) -> Result<Phase<Qualified>, DkgError> {
        let state = &mut *self.state;
        let group = state.environment.group().clone();
        let threshold = state.environment.threshold();
        let me = state.id;

        let (reveals_by_sender, reveal_conflicts) = collate_by_sender(reveals.iter(), |m| m.sender);

        let mut excluded = BTreeSet::new();
        let log = mem::take(&mut state.first_accusations);
        for (accuser, accused_set) in &log {
            // Accusing more than `threshold` peers is a denial-of-service
            // attempt in itself.
            if accused_set.len() > threshold {
                excluded.insert(*accuser);
            }
            for accused in accused_set {
                let reveal = if reveal_conflicts.contains(accused) {
                    None
                } else {
                    reveals_by_sender
                        .get(accused)
                        .and_then(|m| m.reveals.iter().find(|r| r.accuser == *accuser))
                };
                let commitments = state.peer_commitments.get(accused);
                match (commitments, reveal) {
                    (Some(commitments), Some(reveal)) => {
                        let z = group.scalar_from_u64(u64::from(*accuser));
                        let lhs = Commitment::new(&group, &reveal.share, &reveal.blinding);
                        if lhs.as_element() == &Commitment::evaluate_at(&group, commitments, &z) {
                            // The revealed share is consistent, so the
                            // accusation was unjustified.
                            excluded.insert(*accuser);
                            if *accuser == me {
                                state
                                    .received_shares
                                    .insert(*accused, (reveal.share.clone(), reveal.blinding.clone()));
                            }
                        } else {
                            excluded.insert(*accused);
                        }
                    }
                    // No commitments to verify against, or no reveal: the
                    // accused cannot be vindicated.
                    _ => {
                        excluded.insert(*accused);
                    }
                }
            }
        }

        state.misbehaved.extend(excluded.iter().copied());
        let misbehaved = &state.misbehaved;
        state.qualified = state
            .environment
            .member_ids()
            .filter(|id| !misbehaved.contains(id))
            .collect();

        debug!(member = me, qualified = ?state.qualified, "first accusation round resolved");

        if state.qualified.len() < threshold + 1 {
            return Err(DkgError::QualThresholdNotMet);
        }
        Ok(self.advance())
    }
}

impl Phase<Qualified> {
    /// Sum the valid received shares over the qualified set into this
    /// member's share of the group secret. The secret polynomial
    /// coefficients are zeroised here; the public coefficients computed in
    /// the committing phase carry forward.
    pub fn combine_member_shares(mut self) -> Result<Phase<Sharing>, DkgError> {
        let state = &mut *self.state;
        let group = state.environment.group().clone();
        let me = state.id;

        if !state.qualified.contains(&me) {
            return Err(DkgError::NotQualified(me));
        }

        let mut share = Scalar::zero();
        let mut blinding = Scalar::zero();
        for id in &state.qualified {
            let (s, t) = state
                .received_shares
                .get(id)
                .expect("a qualified member always has a recorded share");
            share = group.scalar_add(&share, s);
            blinding = group.scalar_add(&blinding, t);
        }
        state.share = Some((share, blinding));

        // The secret coefficients have served their purpose.
        if let Some(mut polynomial) = state.sharing_polynomial.take() {
            polynomial.zeroize();
        }
        if let Some(mut polynomial) = state.blinding_polynomial.take() {
            polynomial.zeroize();
        }

        debug!(member = me, "member shares combined");
        Ok(self.advance())
    }
}

impl Phase<Sharing> {
    /// Broadcast the `h`-less public coefficients `A_k = g^{a_k}`.
    pub fn calculate_public_key_share_points(
        mut self,
    ) -> (Phase<PointVerifying>, PublicKeySharePointsMessage) {
        let state = &mut *self.state;
        let me = state.id;
        let points = state.public_coefficients.clone();
        state.peer_points.insert(me, points.clone());

        let message = PublicKeySharePointsMessage { sender: me, points };
        (self.advance(), message)
    }
}

impl Phase<PointVerifying> {
    /// Verify every qualified peer's public key share points against the
    /// already accepted secret share, `g^{s_{j->i}} = prod A_{j,k}^{i^k}`,
    /// and produce the (possibly empty) second-round accusation list.
    pub fn verify_public_key_share_points(
        mut self,
        messages: &[PublicKeySharePointsMessage],
    ) -> (Phase<SecondAccusing>, SecondAccusationsMessage) {
        let state = &mut *self.state;
        let group = state.environment.group().clone();
        let threshold = state.environment.threshold();
        let me = state.id;
        let z = group.scalar_from_u64(u64::from(me));

        let (by_sender, conflicting) = collate_by_sender(messages.iter(), |m| m.sender);

        let mut accused = BTreeSet::new();
        let qualified: Vec<MemberId> = state.qualified.iter().copied().collect();
        for id in qualified {
            if id == me {
                continue;
            }
            if conflicting.contains(&id) {
                accused.insert(id);
                continue;
            }
            let message = match by_sender.get(&id) {
                Some(message) => message,
                None => {
                    accused.insert(id);
                    continue;
                }
            };
            if message.points.len() != threshold + 1
                || message
                    .points
                    .iter()
                    .any(|point| !group.is_subgroup_element(point))
            {
                accused.insert(id);
                continue;
            }
            // Structurally valid points are recorded even when the check
            // below fails; resolution verifies reveals against them.
            state.peer_points.insert(id, message.points.clone());

            let (share, _) = state
                .received_shares
                .get(&id)
                .expect("a qualified member always has a recorded share");
            if group.exp_g(share) != group.power_product(&message.points, &z) {
                accused.insert(id);
            }
        }

        if !accused.is_empty() {
            warn!(member = me, accused = ?accused, "public key share points raised accusations");
        }

        let message = SecondAccusationsMessage {
            sender: me,
            accused: accused.into_iter().collect(),
        };
        (self.advance(), message)
    }
}

impl Phase<SecondAccusing> {
    /// Canonicalise the second-round accusation log, restricted to the
    /// qualified set, and reveal this member's recorded sends if accused.
    pub fn reveal_misbehaved_shares(
        mut self,
        accusations: &[SecondAccusationsMessage],
    ) -> (Phase<SecondResolving>, MisbehavedSharesRevealMessage) {
        let state = &mut *self.state;
        let me = state.id;

        let (by_sender, conflicting) = collate_by_sender(accusations.iter(), |m| m.sender);
        let qualified = &state.qualified;
        state
            .misbehaved
            .extend(conflicting.iter().copied().filter(|id| qualified.contains(id)));

        let mut log: BTreeMap<MemberId, BTreeSet<MemberId>> = BTreeMap::new();
        for (accuser, message) in &by_sender {
            if !state.qualified.contains(accuser) {
                continue;
            }
            let accused: BTreeSet<MemberId> = message
                .accused
                .iter()
                .copied()
                .filter(|id| *id != *accuser && state.qualified.contains(id))
                .collect();
            if !accused.is_empty() {
                log.insert(*accuser, accused);
            }
        }

        let mut reveals = Vec::new();
        for (accuser, accused) in &log {
            if accused.contains(&me) {
                if let Some((share, blinding)) = state.sent_shares.get(accuser) {
                    reveals.push(RevealedShare {
                        accuser: *accuser,
                        share: share.clone(),
                        blinding: blinding.clone(),
                    });
                }
            }
        }
        state.second_accusations = log;

        let message = MisbehavedSharesRevealMessage {
            sender: me,
            reveals,
        };
        (self.advance(), message)
    }
}

impl Phase<SecondResolving> {
    /// Adjudicate the second-round accusations. A reveal must verify
    /// against the committing-phase Pedersen commitments first; if it does
    /// but disagrees with the broadcast points, the accused published
    /// inconsistent public coefficients and is disqualified. Contributions
    /// of freshly disqualified members are removed from the combined share
    /// so the final key pair stays consistent.
    pub fn resolve_point_accusations(
        mut self,
        reveals: &[MisbehavedSharesRevealMessage],
    ) -> Result<Phase<Combining>, DkgError> {
        let state = &mut *self.state;
        let group = state.environment.group().clone();
        let threshold = state.environment.threshold();
        let me = state.id;

        let (reveals_by_sender, reveal_conflicts) = collate_by_sender(reveals.iter(), |m| m.sender);

        let mut excluded = BTreeSet::new();
        let log = mem::take(&mut state.second_accusations);
        for (accuser, accused_set) in &log {
            if accused_set.len() > threshold {
                excluded.insert(*accuser);
            }
            for accused in accused_set {
                let reveal = if reveal_conflicts.contains(accused) {
                    None
                } else {
                    reveals_by_sender
                        .get(accused)
                        .and_then(|m| m.reveals.iter().find(|r| r.accuser == *accuser))
                };
                let reveal = match reveal {
                    Some(reveal) => reveal,
                    None => {
                        excluded.insert(*accused);
                        continue;
                    }
                };
                let z = group.scalar_from_u64(u64::from(*accuser));
                let pedersen_holds = state
                    .peer_commitments
                    .get(accused)
                    .map(|commitments| {
                        Commitment::new(&group, &reveal.share, &reveal.blinding).as_element()
                            == &Commitment::evaluate_at(&group, commitments, &z)
                    })
                    .unwrap_or(false);
                if !pedersen_holds {
                    excluded.insert(*accused);
                    continue;
                }
                let points_hold = state
                    .peer_points
                    .get(accused)
                    .map(|points| group.exp_g(&reveal.share) == group.power_product(points, &z))
                    .unwrap_or(false);
                if points_hold {
                    excluded.insert(*accuser);
                } else {
                    excluded.insert(*accused);
                }
            }
        }

        // A member disqualified this late has already contributed to the
        // combined share; subtract its contribution so `g^{x_i}` stays on
        // the polynomial defined by the final qualified set.
        if let Some((mut share, mut blinding)) = state.share.take() {
            for id in &excluded {
                if let Some((s, t)) = state.received_shares.get(id) {
                    share = group.scalar_sub(&share, s);
                    blinding = group.scalar_sub(&blinding, t);
                }
            }
            state.share = Some((share, blinding));
        }

        state.misbehaved.extend(excluded.iter().copied());
        let misbehaved = &state.misbehaved;
        state.qualified.retain(|id| !misbehaved.contains(id));

        debug!(member = me, qualified = ?state.qualified, "second accusation round resolved");

        if state.qualified.len() < threshold + 1 {
            return Err(DkgError::QualThresholdNotMet);
        }
        Ok(self.advance())
    }
}

impl Phase<Combining> {
    /// Combine the first public key share points of the qualified members
    /// into the group public key `Y = prod_{j in QUAL} A_{j,0} mod p` and
    /// terminate the session.
    pub fn combine_group_public_key(self) -> Result<DkgResult, DkgError> {
        let state = &self.state;
        let group = state.environment.group();
        let me = state.id;

        if !state.qualified.contains(&me) {
            return Err(DkgError::NotQualified(me));
        }

        let mut key = group.identity();
        for id in &state.qualified {
            let points = state
                .peer_points
                .get(id)
                .expect("a qualified member always has recorded points");
            key = group.mul(&key, &points[0]);
        }

        let (share, blinding) = state
            .share
            .clone()
            .expect("the share is combined in the qualified phase");

        debug!(member = me, misbehaved = ?state.misbehaved, "dkg session completed");

        Ok(DkgResult {
            group_public_key: GroupPublicKey(key),
            misbehaved: state.misbehaved.iter().copied().collect(),
            private_share: MemberSecretShare { share, blinding },
        })
    }
}

/// Canonicalise a batch of messages by sender id. Identical duplicates
/// collapse into one; a sender with conflicting duplicates is dropped from
/// the collated map and reported separately.
fn collate_by_sender<'a, M, I, F>(
    messages: I,
    sender_of: F,
) -> (BTreeMap<MemberId, &'a M>, BTreeSet<MemberId>)
where
    M: PartialEq + 'a,
    I: IntoIterator<Item = &'a M>,
    F: Fn(&M) -> MemberId,
{
    let mut collated: BTreeMap<MemberId, &'a M> = BTreeMap::new();
    let mut conflicting: BTreeSet<MemberId> = BTreeSet::new();
    for message in messages {
        let sender = sender_of(message);
        match collated.get(&sender) {
            None => {
                collated.insert(sender, message);
            }
            Some(existing) if *existing == message => {}
            Some(_) => {
                conflicting.insert(sender);
            }
        }
    }
    for sender in &conflicting {
        collated.remove(sender);
    }
    (collated, conflicting)
}
