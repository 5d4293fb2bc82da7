//! Error types of the distributed key generation procedure.
//!
//! Peer misbehaviour (malformed messages, failed share checks, unjustified
//! accusations) is never surfaced through these types. It is absorbed by the
//! protocol, reflected in the disqualified set of the final result, and only
//! the conditions that make a session unable to continue are reported as
//! errors.

use thiserror::Error;

use crate::dkg::MemberId;

/// Represents an error in the Distributed Key Generation protocol.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum DkgError {
    /// The protocol parameters failed the sanity checks: composite subgroup
    /// setup, generators outside the order-`q` subgroup, too small a group
    /// for the requested threshold, or an invalid member roster.
    #[error("Invalid protocol configuration: {0}")]
    InvalidConfiguration(String),
    /// A byte-array supposed to represent a scalar parses to a value out of
    /// the `[0, q)` range.
    #[error("Scalar out of bounds.")]
    ScalarOutOfBounds,
    /// A byte-array supposed to represent a group element parses to a value
    /// out of the `[1, p)` range, or to an element outside the order-`q`
    /// subgroup.
    #[error("Group element out of bounds.")]
    ElementOutOfBounds,
    /// Fetched state does not correspond to this member or this phase.
    #[error("Fetched data is not addressed to this member.")]
    FetchedInvalidData,
    /// Fewer than `threshold + 1` members survived the accusation rounds, so
    /// no group key can be produced.
    #[error("Qualified members below threshold.")]
    QualThresholdNotMet,
    /// A transition was fed state from a member which never entered the
    /// qualified set. Indicates driver misuse, not peer misbehaviour.
    #[error("Member {0} is not part of the qualified set.")]
    NotQualified(MemberId),
    /// The broadcast channel reported an unrecoverable failure.
    #[error("Broadcast channel failure: {0}")]
    ChannelFailure(String),
    /// The session was cancelled by the caller.
    #[error("Session cancelled.")]
    Cancelled,
}
