pub mod broadcast;
pub mod member;
pub mod procedure_keys;

/// Protocol member identifier, agreed out of band (e.g. a ticket index).
/// Identifier 0 is forbidden: shares are polynomial evaluations at the
/// member's identifier, and evaluating at zero would expose the constant
/// term.
pub type MemberId = u32;
