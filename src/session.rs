//! Session driver: runs the full phase progression for one member over a
//! broadcast channel. The channel is an external collaborator; the driver
//! only assumes it authenticates senders, delivers the same per-phase view
//! to every honest member, and applies the per-phase deadline. A node may
//! host several concurrent sessions; each owns its state exclusively.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand_core::{CryptoRng, RngCore};
use tracing::debug;

use crate::dkg::broadcast::{DkgMessage, PhaseTag};
use crate::dkg::member::{DistributedKeyGeneration, DkgResult, Environment};
use crate::dkg::procedure_keys::MemberCommunicationKey;
use crate::dkg::MemberId;
use crate::errors::DkgError;

/// The transport consumed by a session.
///
/// `receive` is the per-phase suspension point: it blocks until the phase
/// deadline and returns whatever arrived by then. Missing messages are not
/// an error here; the protocol turns them into accusations or exclusions.
/// Implementations must authenticate senders and, for peer shares, deliver
/// unicast messages only to their receiver.
pub trait BroadcastChannel {
    fn broadcast(&mut self, message: DkgMessage) -> Result<(), DkgError>;

    fn unicast(&mut self, receiver: MemberId, message: DkgMessage) -> Result<(), DkgError>;

    fn receive(&mut self, phase: PhaseTag) -> Result<Vec<DkgMessage>, DkgError>;
}

/// Cloneable cancellation flag. Cancelling aborts the session at its next
/// suspension point; all secret state is zeroised when the session state is
/// released.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A single member's run of the protocol.
pub struct Session<C> {
    environment: Environment,
    me: MemberId,
    channel: C,
    cancellation: CancellationToken,
}

impl<C: BroadcastChannel> Session<C> {
    pub fn new(environment: Environment, me: MemberId, channel: C) -> Self {
        Session {
            environment,
            me,
            channel,
            cancellation: CancellationToken::new(),
        }
    }

    /// A handle with which the caller can abort this session.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Drive the member through every phase until the group public key is
    /// produced or a fatal error occurs. Own broadcasts are folded into the
    /// per-phase message sets so that all members adjudicate the same log.
    pub fn run<R>(
        mut self,
        communication_sk: &MemberCommunicationKey,
        rng: &mut R,
    ) -> Result<DkgResult, DkgError>
    where
        R: RngCore + CryptoRng,
    {
        debug!(member = self.me, "dkg session starting");

        let member =
            DistributedKeyGeneration::init(rng, &self.environment, communication_sk, self.me)?;

        let (member, peer_shares, own_commitments) = member.calculate_shares_and_commitments(rng);
        for message in peer_shares {
            let receiver = message.receiver;
            self.channel
                .unicast(receiver, DkgMessage::PeerShares(message))?;
        }
        self.channel
            .broadcast(DkgMessage::Commitments(own_commitments.clone()))?;

        let shares = self.collect(PhaseTag::PeerShares, |message| match message {
            DkgMessage::PeerShares(inner) => Some(inner),
            _ => None,
        })?;
        let mut commitments = self.collect(PhaseTag::Commitments, |message| match message {
            DkgMessage::Commitments(inner) => Some(inner),
            _ => None,
        })?;
        commitments.push(own_commitments);

        let (member, own_accusations) = member.verify_shares_and_commitments(&shares, &commitments);
        self.channel
            .broadcast(DkgMessage::FirstAccusations(own_accusations.clone()))?;
        let mut accusations = self.collect(PhaseTag::FirstAccusations, |message| match message {
            DkgMessage::FirstAccusations(inner) => Some(inner),
            _ => None,
        })?;
        accusations.push(own_accusations);

        let (member, own_reveal) = member.reveal_accused_shares(&accusations);
        self.channel
            .broadcast(DkgMessage::FirstReveals(own_reveal.clone()))?;
        let mut reveals = self.collect(PhaseTag::FirstReveals, |message| match message {
            DkgMessage::FirstReveals(inner) => Some(inner),
            _ => None,
        })?;
        reveals.push(own_reveal);

        let member = member.resolve_accusations(&reveals)?;
        let member = member.combine_member_shares()?;

        let (member, own_points) = member.calculate_public_key_share_points();
        self.channel
            .broadcast(DkgMessage::PublicKeySharePoints(own_points.clone()))?;
        let mut points = self.collect(PhaseTag::PublicKeySharePoints, |message| match message {
            DkgMessage::PublicKeySharePoints(inner) => Some(inner),
            _ => None,
        })?;
        points.push(own_points);

        let (member, own_second_accusations) = member.verify_public_key_share_points(&points);
        self.channel.broadcast(DkgMessage::SecondAccusations(
            own_second_accusations.clone(),
        ))?;
        let mut second_accusations =
            self.collect(PhaseTag::SecondAccusations, |message| match message {
                DkgMessage::SecondAccusations(inner) => Some(inner),
                _ => None,
            })?;
        second_accusations.push(own_second_accusations);

        let (member, own_second_reveal) = member.reveal_misbehaved_shares(&second_accusations);
        self.channel
            .broadcast(DkgMessage::SecondReveals(own_second_reveal.clone()))?;
        let mut second_reveals = self.collect(PhaseTag::SecondReveals, |message| match message {
            DkgMessage::SecondReveals(inner) => Some(inner),
            _ => None,
        })?;
        second_reveals.push(own_second_reveal);

        let member = member.resolve_point_accusations(&second_reveals)?;
        member.combine_group_public_key()
    }

    /// Suspend until the phase deadline and extract the matching payloads.
    /// Payloads of the wrong shape for the phase are dropped.
    fn collect<M>(
        &mut self,
        phase: PhaseTag,
        extract: impl Fn(DkgMessage) -> Option<M>,
    ) -> Result<Vec<M>, DkgError> {
        if self.cancellation.is_cancelled() {
            return Err(DkgError::Cancelled);
        }
        let messages = self.channel.receive(phase)?;
        Ok(messages.into_iter().filter_map(extract).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dkg::member::Environment;
    use crate::dkg::procedure_keys::MemberCommunicationKey;
    use crate::group::tests::toy_group;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Condvar, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    /// Same-view broadcast bus shared by all test members.
    struct Bus {
        inboxes: Mutex<HashMap<MemberId, Vec<DkgMessage>>>,
        delivered: Condvar,
        members: Vec<MemberId>,
    }

    impl Bus {
        fn new(members: Vec<MemberId>) -> Arc<Self> {
            let inboxes = members.iter().map(|id| (*id, Vec::new())).collect();
            Arc::new(Bus {
                inboxes: Mutex::new(inboxes),
                delivered: Condvar::new(),
                members,
            })
        }

        fn deliver(&self, receiver: MemberId, message: DkgMessage) {
            let mut inboxes = self.inboxes.lock().unwrap();
            inboxes.get_mut(&receiver).unwrap().push(message);
            self.delivered.notify_all();
        }
    }

    struct InMemoryChannel {
        bus: Arc<Bus>,
        me: MemberId,
        expected_peers: usize,
        deadline: Duration,
    }

    impl BroadcastChannel for InMemoryChannel {
        fn broadcast(&mut self, message: DkgMessage) -> Result<(), DkgError> {
            for id in &self.bus.members {
                if *id != self.me {
                    self.bus.deliver(*id, message.clone());
                }
            }
            Ok(())
        }

        fn unicast(&mut self, receiver: MemberId, message: DkgMessage) -> Result<(), DkgError> {
            self.bus.deliver(receiver, message);
            Ok(())
        }

        fn receive(&mut self, phase: PhaseTag) -> Result<Vec<DkgMessage>, DkgError> {
            let start = Instant::now();
            let mut inboxes = self.bus.inboxes.lock().unwrap();
            loop {
                let arrived = inboxes[&self.me]
                    .iter()
                    .filter(|message| message.phase() == phase)
                    .count();
                if arrived >= self.expected_peers {
                    break;
                }
                let elapsed = start.elapsed();
                if elapsed >= self.deadline {
                    break;
                }
                let (guard, _) = self
                    .bus
                    .delivered
                    .wait_timeout(inboxes, self.deadline - elapsed)
                    .unwrap();
                inboxes = guard;
            }
            let inbox = inboxes.get_mut(&self.me).unwrap();
            let mut matching = Vec::new();
            let mut rest = Vec::new();
            for message in inbox.drain(..) {
                if message.phase() == phase {
                    matching.push(message);
                } else {
                    rest.push(message);
                }
            }
            *inbox = rest;
            Ok(matching)
        }
    }

    fn setup(
        seed: u64,
        threshold: usize,
        nr_members: u32,
    ) -> (Environment, BTreeMap<MemberId, MemberCommunicationKey>) {
        let group = toy_group();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut keys = BTreeMap::new();
        let mut roster = Vec::new();
        for id in 1..=nr_members {
            let key = MemberCommunicationKey::new(&mut rng, &group);
            roster.push((id, key.to_public(&group)));
            keys.insert(id, key);
        }
        let environment = Environment::init(group, threshold, &roster).unwrap();
        (environment, keys)
    }

    #[test]
    fn sessions_converge_over_a_channel() {
        let (environment, keys) = setup(42, 2, 5);
        let ids: Vec<MemberId> = environment.member_ids().collect();
        let bus = Bus::new(ids.clone());

        let mut handles = Vec::new();
        for id in ids {
            let environment = environment.clone();
            let key = keys[&id].clone();
            let channel = InMemoryChannel {
                bus: bus.clone(),
                me: id,
                expected_peers: environment.nr_members() - 1,
                deadline: Duration::from_secs(5),
            };
            handles.push(thread::spawn(move || {
                let mut rng = ChaCha20Rng::seed_from_u64(1000 + u64::from(id));
                Session::new(environment, id, channel).run(&key, &mut rng)
            }));
        }

        let results: Vec<DkgResult> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap().unwrap())
            .collect();

        for result in &results {
            assert_eq!(result.group_public_key, results[0].group_public_key);
            assert!(result.misbehaved.is_empty());
        }
    }

    #[test]
    fn cancelled_session_aborts() {
        let (environment, keys) = setup(43, 1, 3);
        let bus = Bus::new(environment.member_ids().collect());
        let channel = InMemoryChannel {
            bus,
            me: 1,
            expected_peers: 2,
            deadline: Duration::from_millis(10),
        };

        let session = Session::new(environment, 1, channel);
        session.cancellation_token().cancel();

        let mut rng = ChaCha20Rng::seed_from_u64(7);
        assert_eq!(
            session.run(&keys[&1], &mut rng).unwrap_err(),
            DkgError::Cancelled
        );
    }

    #[test]
    fn channel_failure_is_fatal() {
        struct BrokenChannel;
        impl BroadcastChannel for BrokenChannel {
            fn broadcast(&mut self, _message: DkgMessage) -> Result<(), DkgError> {
                Err(DkgError::ChannelFailure("connection lost".to_string()))
            }
            fn unicast(
                &mut self,
                _receiver: MemberId,
                _message: DkgMessage,
            ) -> Result<(), DkgError> {
                Err(DkgError::ChannelFailure("connection lost".to_string()))
            }
            fn receive(&mut self, _phase: PhaseTag) -> Result<Vec<DkgMessage>, DkgError> {
                Err(DkgError::ChannelFailure("connection lost".to_string()))
            }
        }

        let (environment, keys) = setup(44, 1, 3);
        let session = Session::new(environment, 1, BrokenChannel);
        let mut rng = ChaCha20Rng::seed_from_u64(8);
        assert!(matches!(
            session.run(&keys[&1], &mut rng),
            Err(DkgError::ChannelFailure(_))
        ));
    }
}
