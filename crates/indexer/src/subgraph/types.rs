//! Wire types of the subgraph GraphQL API.

use anyhow::{anyhow, Context, Result};
use circles_core::{parse_address, Address, Amount};
use circles_graph::Account;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// GraphQL request body.
#[derive(Debug, Serialize)]
pub struct GraphQlRequest<'a, V: Serialize> {
    pub query: &'a str,
    pub variables: V,
}

/// GraphQL response envelope.
#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

impl<T> GraphQlResponse<T> {
    /// Unwrap the payload, treating any reported error as a failure.
    pub fn into_data(self) -> Result<T> {
        if !self.errors.is_empty() {
            let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(anyhow!("Subgraph returned errors: {}", messages.join("; ")));
        }
        self.data
            .ok_or_else(|| anyhow!("Subgraph response carried no data"))
    }
}

/// One page of the `safes` query.
#[derive(Debug, Deserialize)]
pub struct SafesPage {
    pub safes: Vec<SafeRecord>,
}

/// Result of the single-safe query used for fan-out lookups.
#[derive(Debug, Deserialize)]
pub struct SafeLookup {
    pub safe: Option<SafeRecord>,
}

/// Result of the `_meta` health probe.
#[derive(Debug, Deserialize)]
pub struct MetaResponse {
    #[serde(rename = "_meta")]
    pub meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
pub struct Meta {
    pub block: MetaBlock,
    #[serde(rename = "hasIndexingErrors", default)]
    pub has_indexing_errors: bool,
}

#[derive(Debug, Deserialize)]
pub struct MetaBlock {
    pub number: u64,
}

/// A safe as returned by the subgraph.
#[derive(Debug, Clone, Deserialize)]
pub struct SafeRecord {
    pub id: String,
    #[serde(default)]
    pub outgoing: Vec<TrustRecord>,
    #[serde(default)]
    pub incoming: Vec<TrustRecord>,
    #[serde(default)]
    pub balances: Vec<BalanceRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustRecord {
    pub user_address: String,
    pub can_send_to_address: String,
    #[serde(default)]
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceRecord {
    pub amount: String,
    pub token: TokenRecord,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenRecord {
    pub id: String,
    pub owner: OwnerRecord,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwnerRecord {
    pub id: String,
}

impl SafeRecord {
    /// Convert into a derivation input record.
    ///
    /// Connections are `outgoing` followed by `incoming`, de-duplicated on
    /// `(userAddress, canSendToAddress)`; balances are de-duplicated on the
    /// token address. The first occurrence wins in both cases.
    pub fn into_account(self) -> Result<Account> {
        let address = parse_address(&self.id)
            .with_context(|| format!("Invalid safe id {}", self.id))?;
        let mut account = Account::new(address);

        let mut seen_pairs: HashSet<(Address, Address)> = HashSet::new();
        for trust in self.outgoing.into_iter().chain(self.incoming) {
            let user = parse_address(&trust.user_address)?;
            let can_send_to = parse_address(&trust.can_send_to_address)?;
            if !seen_pairs.insert((user, can_send_to)) {
                continue;
            }
            let limit = trust
                .limit
                .map(Amount::new)
                .transpose()
                .with_context(|| format!("Invalid trust limit on safe {}", self.id))?;
            account = account.with_connection(user, can_send_to, limit);
        }

        let mut seen_tokens: HashSet<Address> = HashSet::new();
        for balance in self.balances {
            let token = parse_address(&balance.token.id)?;
            if !seen_tokens.insert(token) {
                continue;
            }
            let owner = parse_address(&balance.token.owner.id)?;
            let amount = Amount::new(balance.amount)
                .with_context(|| format!("Invalid balance on safe {}", self.id))?;
            account = account.with_balance(token, owner, amount);
        }

        Ok(account)
    }

    /// Accounts accepting this safe's token, excluding the safe itself.
    pub fn trusters(&self) -> Result<Vec<Address>> {
        let owner = parse_address(&self.id)?;
        let mut seen = HashSet::new();
        let mut trusters = Vec::new();

        for trust in self.outgoing.iter().chain(self.incoming.iter()) {
            let user = parse_address(&trust.user_address)?;
            if user != owner {
                continue;
            }
            let receiver = parse_address(&trust.can_send_to_address)?;
            if receiver != owner && seen.insert(receiver) {
                trusters.push(receiver);
            }
        }

        Ok(trusters)
    }
}
