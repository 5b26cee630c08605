//! Input records for a derivation pass.

use circles_core::{Address, Amount};

/// A directed trust relation as reported by the indexer.
///
/// `can_send_to_address` accepts up to `limit` units of the token issued by
/// `user_address`, so `user_address` can send its token to
/// `can_send_to_address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustConnection {
    /// Account whose token is accepted (sending side).
    pub user_address: Address,
    /// Account accepting the token (receiving side).
    pub can_send_to_address: Address,
    /// Stated limit, absent when the indexer has none.
    pub limit: Option<Amount>,
}

/// Balance of one token held by an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalance {
    /// Token contract address.
    pub token_address: Address,
    /// Account that issued the token.
    pub token_owner_address: Address,
    /// Held amount.
    pub balance: Amount,
}

/// One account (safe) with its trust connections and balances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Safe address.
    pub address: Address,
    /// Trust connections the account takes part in.
    pub trust_connections: Vec<TrustConnection>,
    /// Tokens held by the account.
    pub token_balances: Vec<TokenBalance>,
}

impl Account {
    /// Create an account with no connections or balances.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            trust_connections: Vec::new(),
            token_balances: Vec::new(),
        }
    }

    /// Add a trust connection.
    pub fn with_connection(
        mut self,
        user_address: Address,
        can_send_to_address: Address,
        limit: Option<Amount>,
    ) -> Self {
        self.trust_connections.push(TrustConnection {
            user_address,
            can_send_to_address,
            limit,
        });
        self
    }

    /// Add a token balance.
    pub fn with_balance(
        mut self,
        token_address: Address,
        token_owner_address: Address,
        balance: Amount,
    ) -> Self {
        self.token_balances.push(TokenBalance {
            token_address,
            token_owner_address,
            balance,
        });
        self
    }
}
