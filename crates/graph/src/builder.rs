//! Builder for deriving the capacitated trust-flow graph.

use circles_core::{Address, Amount, Edge, EdgeKey};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::input::Account;

/// Counts describing the raw input of a derivation pass.
///
/// These are taken before any de-duplication and are meant for logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphStatistics {
    /// Number of input account records.
    pub safes: usize,
    /// Number of input trust connections, summed over all accounts.
    pub connections: usize,
    /// Number of distinct token addresses seen in balances.
    pub tokens: usize,
}

/// Result of a derivation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedGraph {
    /// Unique edges in emission order.
    pub edges: Vec<Edge>,
    /// Raw input counts.
    pub statistics: GraphStatistics,
}

/// Derives edges from a set of accounts.
///
/// The builder collects accounts and, on `build()`, indexes tokens, accounts
/// and trust connections by address before emitting edges. Every index keeps
/// the first record seen for a key; later duplicates are ignored.
///
/// # Examples
///
/// ```
/// use circles_core::{Address, Amount};
/// use circles_graph::{Account, GraphBuilder};
///
/// let alice = Address::repeat_byte(0x0a);
/// let bob = Address::repeat_byte(0x0b);
/// let token = Address::repeat_byte(0xaa);
///
/// let mut builder = GraphBuilder::new();
/// builder.add_account(
///     Account::new(alice)
///         .with_connection(alice, bob, Some(Amount::from(100u64)))
///         .with_balance(token, alice, Amount::from(50u64)),
/// );
/// let graph = builder.build();
/// assert_eq!(graph.edges.len(), 1);
/// assert_eq!(graph.edges[0].capacity.as_str(), "50");
/// ```
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    accounts: Vec<Account>,
}

/// Lookup tables built once per pass.
struct Indices<'a> {
    /// Token address -> owner address.
    token_owners: HashMap<Address, Address>,
    /// Distinct accounts in first-seen order.
    accounts: Vec<&'a Account>,
    /// Account address -> account.
    accounts_by_address: HashMap<Address, &'a Account>,
    /// (sender, receiver) -> limit.
    connections: HashMap<(Address, Address), Option<&'a Amount>>,
    /// Distinct connections in first-seen order.
    connection_order: Vec<(Address, Address)>,
    /// sender -> receivers, in first-seen order.
    receivers_by_sender: HashMap<Address, Vec<Address>>,
}

impl<'a> Indices<'a> {
    fn new(accounts: &'a [Account]) -> Self {
        let mut token_owners = HashMap::new();
        let mut accounts_by_address = HashMap::new();
        let mut distinct_accounts = Vec::new();
        let mut connections = HashMap::new();
        let mut connection_order = Vec::new();
        let mut receivers_by_sender: HashMap<Address, Vec<Address>> = HashMap::new();

        for account in accounts {
            if accounts_by_address.contains_key(&account.address) {
                continue;
            }
            accounts_by_address.insert(account.address, account);
            distinct_accounts.push(account);

            for balance in &account.token_balances {
                token_owners
                    .entry(balance.token_address)
                    .or_insert(balance.token_owner_address);
            }

            for connection in &account.trust_connections {
                let pair = (connection.user_address, connection.can_send_to_address);
                if connections.contains_key(&pair) {
                    continue;
                }
                connections.insert(pair, connection.limit.as_ref());
                connection_order.push(pair);
                receivers_by_sender
                    .entry(pair.0)
                    .or_default()
                    .push(pair.1);
            }
        }

        Self {
            token_owners,
            accounts: distinct_accounts,
            accounts_by_address,
            connections,
            connection_order,
            receivers_by_sender,
        }
    }

    /// Limit of the connection through which `receiver` accepts `sender`'s token.
    ///
    /// `None` if there is no such connection or it carries no limit.
    fn limit(&self, sender: Address, receiver: Address) -> Option<&'a Amount> {
        self.connections.get(&(sender, receiver)).copied().flatten()
    }

    fn has_connection(&self, sender: Address, receiver: Address) -> bool {
        self.connections.contains_key(&(sender, receiver))
    }
}

/// Collects unique edges, dropping self-loops and empty capacities.
#[derive(Default)]
struct EdgeSink {
    edges: Vec<Edge>,
    keys: HashSet<EdgeKey>,
    self_loops: usize,
    duplicates: usize,
}

impl EdgeSink {
    fn emit(&mut self, from: Address, to: Address, token: Address, capacity: Amount) {
        if from == to {
            self.self_loops += 1;
            return;
        }
        if capacity.is_zero() {
            return;
        }

        let key = EdgeKey::new(from, to, token);
        if !self.keys.insert(key) {
            self.duplicates += 1;
            return;
        }

        self.edges.push(Edge {
            from,
            to,
            token,
            capacity,
        });
    }
}

impl GraphBuilder {
    /// Create a new empty builder.
    pub fn new() -> Self {
        Self {
            accounts: Vec::new(),
        }
    }

    /// Add an account record.
    pub fn add_account(&mut self, account: Account) -> &mut Self {
        self.accounts.push(account);
        self
    }

    /// Add several account records.
    pub fn extend(&mut self, accounts: impl IntoIterator<Item = Account>) -> &mut Self {
        self.accounts.extend(accounts);
        self
    }

    /// Number of collected account records.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Check if no accounts were added.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Derive the edge set.
    pub fn build(self) -> DerivedGraph {
        derive_edges(&self.accounts)
    }
}

/// Derive capacitated edges from account records.
///
/// Capacity of every edge is `min(limit, balance)` where `limit` is the limit
/// of the connection through which the receiver accepts the token owner's
/// token and `balance` is what the sender holds of that token. Connections
/// without a limit never produce an edge.
pub fn derive_edges(accounts: &[Account]) -> DerivedGraph {
    let statistics = statistics(accounts);
    let indices = Indices::new(accounts);
    let mut sink = EdgeSink::default();

    // Direct pass: a sender forwards any token it holds to a receiver it is
    // connected to, provided the receiver accepts that token's owner.
    for &(sender, receiver) in &indices.connection_order {
        let Some(sender_account) = indices.accounts_by_address.get(&sender) else {
            continue;
        };

        for balance in &sender_account.token_balances {
            let Some(&token_owner) = indices.token_owners.get(&balance.token_address) else {
                continue;
            };
            let Some(limit) = indices.limit(token_owner, receiver) else {
                continue;
            };
            let capacity = limit.clone().min(balance.balance.clone());
            sink.emit(sender, receiver, token_owner, capacity);
        }
    }

    // Holder pass: tokens held by accounts without a connection of their own
    // to the receiver (organizations, plain holders) can still be sent to
    // anyone accepting the token owner.
    for holder in &indices.accounts {
        for balance in &holder.token_balances {
            let Some(&token_owner) = indices.token_owners.get(&balance.token_address) else {
                continue;
            };
            let Some(receivers) = indices.receivers_by_sender.get(&token_owner) else {
                continue;
            };

            for &receiver in receivers {
                if indices.has_connection(holder.address, receiver) {
                    continue;
                }
                let Some(limit) = indices.limit(token_owner, receiver) else {
                    continue;
                };
                let capacity = limit.clone().min(balance.balance.clone());
                sink.emit(holder.address, receiver, token_owner, capacity);
            }
        }
    }

    debug!(
        "Derived {} edges ({} self-loops dropped, {} duplicates ignored)",
        sink.edges.len(),
        sink.self_loops,
        sink.duplicates
    );

    DerivedGraph {
        edges: sink.edges,
        statistics,
    }
}

fn statistics(accounts: &[Account]) -> GraphStatistics {
    let tokens: HashSet<Address> = accounts
        .iter()
        .flat_map(|account| account.token_balances.iter().map(|b| b.token_address))
        .collect();

    GraphStatistics {
        safes: accounts.len(),
        connections: accounts
            .iter()
            .map(|account| account.trust_connections.len())
            .sum(),
        tokens: tokens.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn amount(value: u64) -> Amount {
        Amount::from(value)
    }

    #[test]
    fn test_empty_builder() {
        let builder = GraphBuilder::new();
        assert!(builder.is_empty());
        let graph = builder.build();
        assert!(graph.edges.is_empty());
        assert_eq!(graph.statistics, GraphStatistics::default());
    }

    #[test]
    fn test_capacity_capped_by_limit() {
        let (a, b, token_a) = (addr(0x0a), addr(0x0b), addr(0xaa));
        let graph = derive_edges(&[Account::new(a)
            .with_connection(a, b, Some(amount(30)))
            .with_balance(token_a, a, amount(50))]);

        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].key(), EdgeKey::new(a, b, a));
        assert_eq!(graph.edges[0].capacity, amount(30));
    }

    #[test]
    fn test_missing_limit_produces_no_edge() {
        let (a, b, token_a) = (addr(0x0a), addr(0x0b), addr(0xaa));
        let graph = derive_edges(&[Account::new(a)
            .with_connection(a, b, None)
            .with_balance(token_a, a, amount(50))]);

        assert!(graph.edges.is_empty());
        assert_eq!(graph.statistics.connections, 1);
    }

    #[test]
    fn test_zero_capacity_is_dropped() {
        let (a, b, token_a) = (addr(0x0a), addr(0x0b), addr(0xaa));
        let graph = derive_edges(&[Account::new(a)
            .with_connection(a, b, Some(amount(100)))
            .with_balance(token_a, a, Amount::zero())]);
        assert!(graph.edges.is_empty());

        let graph = derive_edges(&[Account::new(a)
            .with_connection(a, b, Some(Amount::zero()))
            .with_balance(token_a, a, amount(10))]);
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn test_self_trust_never_becomes_edge() {
        let (a, token_a) = (addr(0x0a), addr(0xaa));
        let graph = derive_edges(&[Account::new(a)
            .with_connection(a, a, Some(amount(100)))
            .with_balance(token_a, a, amount(50))]);
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn test_duplicate_connection_first_wins() {
        let (a, b, token_a) = (addr(0x0a), addr(0x0b), addr(0xaa));
        let graph = derive_edges(&[
            Account::new(a)
                .with_connection(a, b, Some(amount(20)))
                .with_balance(token_a, a, amount(50)),
            Account::new(b).with_connection(a, b, Some(amount(40))),
        ]);

        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].capacity, amount(20));
        assert_eq!(graph.statistics.connections, 2);
    }

    #[test]
    fn test_duplicate_account_first_wins() {
        let (a, b, token_a) = (addr(0x0a), addr(0x0b), addr(0xaa));
        let graph = derive_edges(&[
            Account::new(a)
                .with_connection(a, b, Some(amount(100)))
                .with_balance(token_a, a, amount(50)),
            Account::new(a).with_balance(token_a, a, amount(90)),
        ]);

        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].capacity, amount(50));
        assert_eq!(graph.statistics.safes, 2);
        assert_eq!(graph.statistics.tokens, 1);
    }

    #[test]
    fn test_receiver_must_accept_token_owner() {
        // b holds c's token but a only accepts b's token.
        let (a, b, c, token_c) = (addr(0x0a), addr(0x0b), addr(0x0c), addr(0xcc));
        let graph = derive_edges(&[Account::new(b)
            .with_connection(b, a, Some(amount(100)))
            .with_balance(token_c, c, amount(50))]);
        assert!(graph.edges.is_empty());
    }
}
