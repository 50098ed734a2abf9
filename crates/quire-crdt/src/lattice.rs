//! Join-semilattice trait - the mathematical foundation of the content CRDT
//!
//! A join-semilattice (S, ⊔) satisfies:
//! - Commutativity: a ⊔ b = b ⊔ a
//! - Associativity: (a ⊔ b) ⊔ c = a ⊔ (b ⊔ c)
//! - Idempotence:  a ⊔ a = a
//!
//! These properties are what let remote updates arrive in any order
//! without a central sequencer.

use std::cmp::Ordering;

/// The core CRDT trait. Every replicated piece of document content implements it.
pub trait Lattice: Clone + PartialEq {
    /// The bottom element (identity for join)
    fn bottom() -> Self;

    /// Join operation (least upper bound)
    fn join(&self, other: &Self) -> Self;

    /// Partial order derived from join: a ≤ b iff a ⊔ b = b
    fn partial_cmp_lattice(&self, other: &Self) -> Option<Ordering> {
        let joined = self.join(other);
        if &joined == self && &joined == other {
            Some(Ordering::Equal)
        } else if &joined == other {
            Some(Ordering::Less)
        } else if &joined == self {
            Some(Ordering::Greater)
        } else {
            None
        }
    }

    /// Check if self ≤ other in the lattice order
    fn leq(&self, other: &Self) -> bool {
        matches!(
            self.partial_cmp_lattice(other),
            Some(Ordering::Less) | Some(Ordering::Equal)
        )
    }

    /// Join-assign: self = self ⊔ other
    fn join_assign(&mut self, other: &Self) {
        *self = self.join(other);
    }
}

/// CRDTs that replicate through deltas rather than full state.
pub trait DeltaCRDT: Lattice {
    /// The delta type shipped between replicas.
    type Delta;

    /// Split off pending deltas, resetting the internal buffer.
    fn split_delta(&mut self) -> Option<Self::Delta>;

    /// A delta carrying the whole state, for peers that may have missed updates.
    fn full_delta(&self) -> Self::Delta;

    /// Apply a delta to the state. Must be idempotent.
    fn apply_delta(&mut self, delta: &Self::Delta);
}
