//! Core types for the trust-flow graph.

use alloy_primitives::Address;
use std::fmt;

use crate::amount::Amount;
use crate::error::{CoreError, Result};

/// Unique key of an edge: at most one edge per ordered pair per token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    /// Account forwarding the token.
    pub from: Address,
    /// Account receiving the token.
    pub to: Address,
    /// Token, identified by the account that issued it.
    pub token: Address,
}

impl EdgeKey {
    /// Create a new edge key.
    pub const fn new(from: Address, to: Address, token: Address) -> Self {
        Self { from, to, token }
    }

    /// Whether both endpoints are the same account.
    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} [{}]", self.from, self.to, self.token)
    }
}

/// A directed, token-scoped, capacity-bounded edge.
///
/// `from` can forward up to `capacity` units of `token` to `to`, where
/// `token` is the address of the account that issued the token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Account forwarding the token.
    pub from: Address,
    /// Account receiving the token.
    pub to: Address,
    /// Token owner address.
    pub token: Address,
    /// Maximum transferable amount.
    pub capacity: Amount,
}

impl Edge {
    /// Create an edge, rejecting self-loops.
    pub fn new(from: Address, to: Address, token: Address, capacity: Amount) -> Result<Self> {
        if from == to {
            return Err(CoreError::SelfLoop(from.to_checksum(None)));
        }
        Ok(Self {
            from,
            to,
            token,
            capacity,
        })
    }

    /// The unique key of this edge.
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.from, self.to, self.token)
    }

    /// Whether this edge carries no capacity (and thus does not exist).
    pub fn is_empty(&self) -> bool {
        self.capacity.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_rejects_self_loop() {
        let a = Address::repeat_byte(0x0a);
        let result = Edge::new(a, a, a, Amount::from(5u64));
        assert!(matches!(result, Err(CoreError::SelfLoop(_))));
    }

    #[test]
    fn test_edge_key() {
        let a = Address::repeat_byte(0x0a);
        let b = Address::repeat_byte(0x0b);
        let edge = Edge::new(a, b, a, Amount::from(5u64)).unwrap();
        assert_eq!(edge.key(), EdgeKey::new(a, b, a));
        assert!(!edge.key().is_self_loop());
        assert!(!edge.is_empty());
        assert!(Edge::new(a, b, a, Amount::zero()).unwrap().is_empty());
    }
}
