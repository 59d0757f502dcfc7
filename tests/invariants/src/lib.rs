//! Shardline Property-Based Invariant Tests
//!
//! Uses proptest to verify system invariants across:
//! - Wire framing: packets survive any split of the byte stream
//! - Vote tally: the winner depends only on the multiset of votes
//! - Election ordering: pending events stay ordered by proof age

pub mod election_invariants;
pub mod framing_invariants;
