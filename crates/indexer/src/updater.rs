//! Event-driven refresh of individual edges from live contract state.
//!
//! Each event touches a narrow slice of the graph: the edges that move one
//! token owner's token in or out of the accounts named by the event. Their
//! capacities are re-read from the hub and token contracts, never from the
//! subgraph. Writes carry the event position so an older event cannot
//! overwrite a newer one for the same key.

use anyhow::Result;
use circles_core::{Address, Edge, EdgeKey};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::contracts::ContractReader;
use crate::listener::ChainEvent;
use crate::rebuild_service::RebuildService;
use crate::storage::{EdgeWrite, EventPosition, Storage};
use crate::subgraph::TrustLookup;

/// Result of refreshing one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeUpdate {
    /// The store accepted or rejected the positioned write.
    Applied(EdgeWrite),

    /// A contract read failed and the edge was removed.
    FailedClosed,

    /// `from == to`; nothing was written.
    SelfLoop,
}

/// Per-event counts, for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub written: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub stale: usize,
    pub failed_closed: usize,
    pub errors: usize,
}

impl UpdateSummary {
    fn record(&mut self, update: EdgeUpdate) {
        match update {
            EdgeUpdate::Applied(EdgeWrite::Written) => self.written += 1,
            EdgeUpdate::Applied(EdgeWrite::Deleted) => self.deleted += 1,
            EdgeUpdate::Applied(EdgeWrite::Unchanged) => self.unchanged += 1,
            EdgeUpdate::Applied(EdgeWrite::Stale) => self.stale += 1,
            EdgeUpdate::FailedClosed => self.failed_closed += 1,
            EdgeUpdate::SelfLoop => {}
        }
    }

    /// Number of edges the event touched in the store.
    pub fn touched(&self) -> usize {
        self.written + self.deleted + self.failed_closed
    }
}

/// Applies chain events to the edge store.
#[derive(Clone)]
pub struct IncrementalUpdater {
    storage: Storage,
    contracts: Arc<dyn ContractReader>,
    trust: Arc<dyn TrustLookup>,
    max_concurrency: usize,
    rebuild: Option<RebuildService>,
}

impl IncrementalUpdater {
    /// Create an updater running at most `max_concurrency` edge refreshes
    /// at once per event.
    pub fn new(
        storage: Storage,
        contracts: Arc<dyn ContractReader>,
        trust: Arc<dyn TrustLookup>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            storage,
            contracts,
            trust,
            max_concurrency: max_concurrency.max(1),
            rebuild: None,
        }
    }

    /// Request a full rebuild from `rebuild` whenever a fan-out lookup
    /// fails, so the edges it skipped are restored.
    pub fn with_rebuild(mut self, rebuild: RebuildService) -> Self {
        self.rebuild = Some(rebuild);
        self
    }

    /// Read events until the channel closes.
    pub async fn consume(&self, mut events: mpsc::Receiver<ChainEvent>) {
        info!("Incremental updater consuming events");

        while let Some(event) = events.recv().await {
            match self.handle_event(&event).await {
                Ok(summary) => {
                    if summary.touched() > 0 || summary.errors > 0 {
                        debug!("Applied {:?}: {:?}", event.position(), summary);
                    }
                }
                Err(e) => {
                    warn!("Failed to apply event at {:?}: {:#}", event.position(), e);
                }
            }
        }

        info!("Event channel closed, incremental updater stopping");
    }

    /// Apply one event.
    ///
    /// Fails only when the event itself cannot be resolved (registry read
    /// error); per-edge failures are logged and counted.
    pub async fn handle_event(&self, event: &ChainEvent) -> Result<UpdateSummary> {
        match *event {
            ChainEvent::Transfer {
                sender,
                recipient,
                token_address,
                position,
            } => {
                self.handle_transfer(sender, recipient, token_address, position)
                    .await
            }
            ChainEvent::Trust {
                truster,
                token_owner,
                limit,
                position,
            } => {
                debug!(
                    "Trust {} -> {} with limit {} at {:?}",
                    truster, token_owner, limit, position
                );
                self.handle_trust(truster, token_owner, position).await
            }
        }
    }

    async fn handle_transfer(
        &self,
        sender: Address,
        recipient: Address,
        token_address: Address,
        position: EventPosition,
    ) -> Result<UpdateSummary> {
        let token_owner = self.contracts.token_to_user(token_address).await?;
        if token_owner.is_zero() {
            debug!("Ignoring transfer of unregistered token {}", token_address);
            return Ok(UpdateSummary::default());
        }

        let mut keys = KeySet::default();
        let trusters = self.trusters_or_empty(token_owner).await;

        if sender.is_zero() {
            // Mint: the owner's outgoing edges and the recipient's.
            keys.push(recipient, token_owner, token_owner);
            for &truster in &trusters {
                keys.push(token_owner, truster, token_owner);
                keys.push(recipient, truster, token_owner);
            }
        } else {
            keys.push(sender, token_owner, token_owner);
            keys.push(recipient, token_owner, token_owner);
            for &truster in &trusters {
                keys.push(sender, truster, token_owner);
                keys.push(recipient, truster, token_owner);
            }
        }

        Ok(self.update_edges(keys.into_vec(), token_address, position).await)
    }

    async fn handle_trust(
        &self,
        truster: Address,
        token_owner: Address,
        position: EventPosition,
    ) -> Result<UpdateSummary> {
        let token_address = self.contracts.user_to_token(token_owner).await?;
        if token_address.is_zero() {
            debug!("Ignoring trust in unregistered user {}", token_owner);
            return Ok(UpdateSummary::default());
        }

        let mut keys = KeySet::default();
        keys.push(token_owner, truster, token_owner);
        for other in self.trusters_or_empty(token_owner).await {
            if other != truster {
                keys.push(truster, other, token_owner);
            }
        }

        Ok(self.update_edges(keys.into_vec(), token_address, position).await)
    }

    async fn trusters_or_empty(&self, owner: Address) -> Vec<Address> {
        match self.trust.trusters_of(owner).await {
            Ok(trusters) => trusters,
            Err(e) => {
                warn!("Trust lookup for {} failed, skipping fan-out: {:#}", owner, e);
                if let Some(rebuild) = &self.rebuild {
                    rebuild.trigger();
                }
                Vec::new()
            }
        }
    }

    /// Refresh `keys` concurrently, bounded by `max_concurrency`.
    async fn update_edges(
        &self,
        keys: Vec<EdgeKey>,
        token_address: Address,
        position: EventPosition,
    ) -> UpdateSummary {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for key in keys {
            let updater = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = updater.update_edge(key, token_address, position).await;
                (key, result)
            });
        }

        let mut summary = UpdateSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(update))) => summary.record(update),
                Ok((key, Err(e))) => {
                    warn!("Failed to update edge {}: {:#}", key, e);
                    summary.errors += 1;
                }
                Err(e) => {
                    error!("Edge update task failed: {}", e);
                    summary.errors += 1;
                }
            }
        }
        summary
    }

    /// Re-read limit and balance for one edge and store the result.
    ///
    /// If either read fails the edge is deleted unconditionally.
    pub async fn update_edge(
        &self,
        key: EdgeKey,
        token_address: Address,
        position: EventPosition,
    ) -> Result<EdgeUpdate> {
        if key.is_self_loop() {
            return Ok(EdgeUpdate::SelfLoop);
        }

        let (limit, balance) = tokio::join!(
            self.contracts.check_send_limit(key.token, key.from, key.to),
            self.contracts.balance_of(token_address, key.from)
        );

        match (limit, balance) {
            (Ok(limit), Ok(balance)) => {
                let edge = Edge {
                    from: key.from,
                    to: key.to,
                    token: key.token,
                    capacity: limit.min(balance),
                };
                let write = self.storage.upsert_edge_at(&edge, position).await?;
                Ok(EdgeUpdate::Applied(write))
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Contract read for {} failed, removing edge: {:#}", key, e);
                self.storage.delete_edge(&key).await?;
                Ok(EdgeUpdate::FailedClosed)
            }
        }
    }
}

/// Edge keys in insertion order without duplicates.
#[derive(Default)]
struct KeySet {
    keys: Vec<EdgeKey>,
    seen: HashSet<EdgeKey>,
}

impl KeySet {
    fn push(&mut self, from: Address, to: Address, token: Address) {
        let key = EdgeKey::new(from, to, token);
        if self.seen.insert(key) {
            self.keys.push(key);
        }
    }

    fn into_vec(self) -> Vec<EdgeKey> {
        self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use crate::subgraph::SafeSource;
    use circles_core::Amount;
    use circles_graph::Account;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[derive(Default)]
    struct MockContracts {
        token_owners: HashMap<Address, Address>,
        limits: HashMap<(Address, Address, Address), u64>,
        balances: HashMap<(Address, Address), u64>,
        failing_limits: HashSet<(Address, Address, Address)>,
        registry_down: bool,
        reads: AtomicUsize,
    }

    impl MockContracts {
        fn register(mut self, owner: Address, token: Address) -> Self {
            self.token_owners.insert(token, owner);
            self
        }

        fn limit(mut self, owner: Address, from: Address, to: Address, value: u64) -> Self {
            self.limits.insert((owner, from, to), value);
            self
        }

        fn balance(mut self, token: Address, holder: Address, value: u64) -> Self {
            self.balances.insert((token, holder), value);
            self
        }

        fn failing(mut self, owner: Address, from: Address, to: Address) -> Self {
            self.failing_limits.insert((owner, from, to));
            self
        }
    }

    #[async_trait]
    impl ContractReader for MockContracts {
        async fn check_send_limit(
            &self,
            token_owner: Address,
            src: Address,
            dest: Address,
        ) -> Result<Amount> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.failing_limits.contains(&(token_owner, src, dest)) {
                return Err(anyhow!("execution reverted"));
            }
            let value = self.limits.get(&(token_owner, src, dest)).copied().unwrap_or(0);
            Ok(Amount::from(value))
        }

        async fn balance_of(&self, token: Address, holder: Address) -> Result<Amount> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let value = self.balances.get(&(token, holder)).copied().unwrap_or(0);
            Ok(Amount::from(value))
        }

        async fn token_to_user(&self, token: Address) -> Result<Address> {
            if self.registry_down {
                return Err(anyhow!("registry unavailable"));
            }
            Ok(self.token_owners.get(&token).copied().unwrap_or(Address::ZERO))
        }

        async fn user_to_token(&self, user: Address) -> Result<Address> {
            if self.registry_down {
                return Err(anyhow!("registry unavailable"));
            }
            Ok(self
                .token_owners
                .iter()
                .find(|(_, owner)| **owner == user)
                .map(|(token, _)| *token)
                .unwrap_or(Address::ZERO))
        }
    }

    #[derive(Default)]
    struct MockTrust {
        trusters: HashMap<Address, Vec<Address>>,
        down: bool,
    }

    #[async_trait]
    impl TrustLookup for MockTrust {
        async fn trusters_of(&self, owner: Address) -> Result<Vec<Address>> {
            if self.down {
                return Err(anyhow!("subgraph unreachable"));
            }
            Ok(self.trusters.get(&owner).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SafeSource for CountingSource {
        async fn fetch_accounts(&self) -> Result<Vec<Account>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    async fn wait_for_calls(source: &CountingSource, calls: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while source.calls.load(Ordering::SeqCst) < calls {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn setup(
        contracts: MockContracts,
        trust: MockTrust,
    ) -> (IncrementalUpdater, Arc<MockContracts>, Storage, NamedTempFile) {
        let temp_db = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp_db.path(), None, None)
            .await
            .unwrap();
        storage.run_migrations().await.unwrap();

        let contracts = Arc::new(contracts);
        let updater =
            IncrementalUpdater::new(storage.clone(), contracts.clone(), Arc::new(trust), 4);
        (updater, contracts, storage, temp_db)
    }

    fn capacity(edges: &[Edge], from: Address, to: Address) -> Option<String> {
        edges
            .iter()
            .find(|e| e.from == from && e.to == to)
            .map(|e| e.capacity.to_string())
    }

    #[tokio::test]
    async fn test_unregistered_token_is_ignored() {
        let (a, b, token) = (addr(0x0a), addr(0x0b), addr(0xee));
        let (updater, contracts, storage, _temp_db) =
            setup(MockContracts::default(), MockTrust::default()).await;

        let existing = Edge::new(a, b, a, Amount::from(5u64)).unwrap();
        storage.upsert_edge(&existing).await.unwrap();

        let event = ChainEvent::Transfer {
            sender: a,
            recipient: b,
            token_address: token,
            position: EventPosition::new(10, 0),
        };
        let summary = updater.handle_event(&event).await.unwrap();

        assert_eq!(summary, UpdateSummary::default());
        assert_eq!(contracts.reads.load(Ordering::SeqCst), 0);
        assert_eq!(storage.all_edges().await.unwrap(), vec![existing]);
    }

    #[tokio::test]
    async fn test_trust_for_unregistered_user_is_ignored() {
        let (a, b) = (addr(0x0a), addr(0x0b));
        let (updater, contracts, storage, _temp_db) =
            setup(MockContracts::default(), MockTrust::default()).await;

        let existing = Edge::new(a, b, a, Amount::from(5u64)).unwrap();
        storage.upsert_edge(&existing).await.unwrap();

        let event = ChainEvent::Trust {
            truster: b,
            token_owner: a,
            limit: alloy::primitives::U256::from(100u64),
            position: EventPosition::new(10, 0),
        };
        let summary = updater.handle_event(&event).await.unwrap();

        assert_eq!(summary, UpdateSummary::default());
        assert_eq!(contracts.reads.load(Ordering::SeqCst), 0);
        assert_eq!(storage.all_edges().await.unwrap(), vec![existing]);
    }

    #[tokio::test]
    async fn test_registry_error_leaves_store_untouched() {
        let (a, b, token_a) = (addr(0x0a), addr(0x0b), addr(0xaa));
        let contracts = MockContracts {
            registry_down: true,
            ..MockContracts::default()
        }
        .register(a, token_a)
        .limit(a, a, b, 50)
        .balance(token_a, a, 100);
        let (updater, contracts, storage, _temp_db) =
            setup(contracts, MockTrust::default()).await;

        let existing = Edge::new(a, b, a, Amount::from(5u64)).unwrap();
        storage
            .upsert_edge_at(&existing, EventPosition::new(1, 0))
            .await
            .unwrap();

        let trust = ChainEvent::Trust {
            truster: b,
            token_owner: a,
            limit: alloy::primitives::U256::from(50u64),
            position: EventPosition::new(10, 0),
        };
        let transfer = ChainEvent::Transfer {
            sender: a,
            recipient: b,
            token_address: token_a,
            position: EventPosition::new(10, 1),
        };
        assert!(updater.handle_event(&trust).await.is_err());
        assert!(updater.handle_event(&transfer).await.is_err());

        assert_eq!(contracts.reads.load(Ordering::SeqCst), 0);
        let stored = storage.get_edge(&existing.key()).await.unwrap().unwrap();
        assert_eq!(stored.edge, existing);
        assert_eq!(stored.position, Some(EventPosition::new(1, 0)));
    }

    #[tokio::test]
    async fn test_failed_lookup_requests_rebuild() {
        let (a, b, token_a) = (addr(0x0a), addr(0x0b), addr(0xaa));
        let contracts = MockContracts::default()
            .register(a, token_a)
            .limit(a, a, b, 50)
            .balance(token_a, a, 100);
        let trust = MockTrust {
            down: true,
            ..Default::default()
        };
        let (updater, _contracts, storage, _temp_db) = setup(contracts, trust).await;

        let source = Arc::new(CountingSource::default());
        let rebuild =
            RebuildService::new(storage.clone(), source.clone(), Duration::from_secs(3600));
        let updater = updater.with_rebuild(rebuild.clone());
        let running = tokio::spawn(async move { rebuild.run().await });

        // The first interval tick rebuilds at startup.
        wait_for_calls(&source, 1).await;

        let event = ChainEvent::Trust {
            truster: b,
            token_owner: a,
            limit: alloy::primitives::U256::from(50u64),
            position: EventPosition::new(10, 0),
        };
        let summary = updater.handle_event(&event).await.unwrap();

        // The direct edge is still refreshed; the skipped fan-out is left to
        // the requested rebuild.
        assert_eq!(summary.written, 1);
        wait_for_calls(&source, 2).await;

        running.abort();
    }

    #[tokio::test]
    async fn test_read_failure_deletes_edge() {
        let (a, b, token_a) = (addr(0x0a), addr(0x0b), addr(0xaa));
        let contracts = MockContracts::default()
            .register(a, token_a)
            .failing(a, a, b)
            .balance(token_a, a, 100);
        let (updater, _contracts, storage, _temp_db) =
            setup(contracts, MockTrust::default()).await;

        let stale = Edge::new(a, b, a, Amount::from(100u64)).unwrap();
        storage
            .upsert_edge_at(&stale, EventPosition::new(500, 0))
            .await
            .unwrap();

        // Even an older event removes the edge when it cannot be verified.
        let event = ChainEvent::Trust {
            truster: b,
            token_owner: a,
            limit: alloy::primitives::U256::from(100u64),
            position: EventPosition::new(10, 0),
        };
        let summary = updater.handle_event(&event).await.unwrap();

        assert_eq!(summary.failed_closed, 1);
        assert!(storage.get_edge(&stale.key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transfer_refreshes_sender_and_recipient() {
        let (a, b, c, token_a) = (addr(0x0a), addr(0x0b), addr(0x0c), addr(0xaa));
        let contracts = MockContracts::default()
            .register(a, token_a)
            .limit(a, b, a, 1_000)
            .limit(a, c, a, 1_000)
            .limit(a, b, c, 30)
            .limit(a, c, b, 80)
            .balance(token_a, b, 20)
            .balance(token_a, c, 60);
        let trust = MockTrust {
            trusters: HashMap::from([(a, vec![b, c])]),
            ..Default::default()
        };
        let (updater, _contracts, storage, _temp_db) = setup(contracts, trust).await;

        let event = ChainEvent::Transfer {
            sender: b,
            recipient: c,
            token_address: token_a,
            position: EventPosition::new(10, 1),
        };
        let summary = updater.handle_event(&event).await.unwrap();
        assert_eq!(summary.written, 4);

        let edges = storage.all_edges().await.unwrap();
        assert_eq!(edges.len(), 4);
        assert!(edges.iter().all(|e| e.token == a && e.from != e.to));
        assert_eq!(capacity(&edges, b, a).as_deref(), Some("20"));
        assert_eq!(capacity(&edges, c, a).as_deref(), Some("60"));
        assert_eq!(capacity(&edges, b, c).as_deref(), Some("20"));
        assert_eq!(capacity(&edges, c, b).as_deref(), Some("60"));
    }

    #[tokio::test]
    async fn test_mint_refreshes_owner_edges() {
        let (a, b, token_a) = (addr(0x0a), addr(0x0b), addr(0xaa));
        let contracts = MockContracts::default()
            .register(a, token_a)
            .limit(a, a, b, 40)
            .balance(token_a, a, 100);
        let trust = MockTrust {
            trusters: HashMap::from([(a, vec![b])]),
            ..Default::default()
        };
        let (updater, _contracts, storage, _temp_db) = setup(contracts, trust).await;

        let event = ChainEvent::Transfer {
            sender: Address::ZERO,
            recipient: a,
            token_address: token_a,
            position: EventPosition::new(10, 0),
        };
        updater.handle_event(&event).await.unwrap();

        let edges = storage.all_edges().await.unwrap();
        assert_eq!(edges, vec![Edge::new(a, b, a, Amount::from(40u64)).unwrap()]);
    }

    #[tokio::test]
    async fn test_trust_fans_out_to_other_trusters() {
        let (a, b, c, token_a) = (addr(0x0a), addr(0x0b), addr(0x0c), addr(0xaa));
        let contracts = MockContracts::default()
            .register(a, token_a)
            .limit(a, a, b, 50)
            .limit(a, b, c, 70)
            .balance(token_a, a, 90)
            .balance(token_a, b, 10);
        let trust = MockTrust {
            trusters: HashMap::from([(a, vec![b, c])]),
            ..Default::default()
        };
        let (updater, _contracts, storage, _temp_db) = setup(contracts, trust).await;

        let event = ChainEvent::Trust {
            truster: b,
            token_owner: a,
            limit: alloy::primitives::U256::from(50u64),
            position: EventPosition::new(10, 0),
        };
        let summary = updater.handle_event(&event).await.unwrap();
        assert_eq!(summary.written, 2);

        let edges = storage.all_edges().await.unwrap();
        assert_eq!(capacity(&edges, a, b).as_deref(), Some("50"));
        assert_eq!(capacity(&edges, b, c).as_deref(), Some("10"));
    }

    #[tokio::test]
    async fn test_zero_capacity_removes_edge() {
        let (a, b, token_a) = (addr(0x0a), addr(0x0b), addr(0xaa));
        let contracts = MockContracts::default()
            .register(a, token_a)
            .limit(a, a, b, 0)
            .balance(token_a, a, 100);
        let (updater, _contracts, storage, _temp_db) =
            setup(contracts, MockTrust::default()).await;

        storage
            .upsert_edge(&Edge::new(a, b, a, Amount::from(7u64)).unwrap())
            .await
            .unwrap();

        let update = updater
            .update_edge(EdgeKey::new(a, b, a), token_a, EventPosition::new(3, 0))
            .await
            .unwrap();
        assert_eq!(update, EdgeUpdate::Applied(EdgeWrite::Deleted));
        assert_eq!(storage.count_edges().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_older_event_does_not_overwrite() {
        let (a, b, token_a) = (addr(0x0a), addr(0x0b), addr(0xaa));
        let contracts = MockContracts::default()
            .register(a, token_a)
            .limit(a, a, b, 10)
            .balance(token_a, a, 100);
        let (updater, _contracts, storage, _temp_db) =
            setup(contracts, MockTrust::default()).await;

        let newer = Edge::new(a, b, a, Amount::from(90u64)).unwrap();
        storage
            .upsert_edge_at(&newer, EventPosition::new(100, 5))
            .await
            .unwrap();

        let update = updater
            .update_edge(newer.key(), token_a, EventPosition::new(100, 1))
            .await
            .unwrap();
        assert_eq!(update, EdgeUpdate::Applied(EdgeWrite::Stale));

        let stored = storage.get_edge(&newer.key()).await.unwrap().unwrap();
        assert_eq!(stored.edge.capacity, Amount::from(90u64));
    }

    #[tokio::test]
    async fn test_self_loop_skipped_without_reads() {
        let a = addr(0x0a);
        let (updater, contracts, storage, _temp_db) =
            setup(MockContracts::default(), MockTrust::default()).await;

        let update = updater
            .update_edge(EdgeKey::new(a, a, a), addr(0xaa), EventPosition::new(1, 0))
            .await
            .unwrap();

        assert_eq!(update, EdgeUpdate::SelfLoop);
        assert_eq!(contracts.reads.load(Ordering::SeqCst), 0);
        assert_eq!(storage.count_edges().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_consume_until_channel_closes() {
        let (a, b, token_a) = (addr(0x0a), addr(0x0b), addr(0xaa));
        let contracts = MockContracts::default()
            .register(a, token_a)
            .limit(a, a, b, 25)
            .balance(token_a, a, 100);
        let (updater, _contracts, storage, _temp_db) =
            setup(contracts, MockTrust::default()).await;

        let (tx, rx) = mpsc::channel(4);
        tx.send(ChainEvent::Trust {
            truster: b,
            token_owner: a,
            limit: alloy::primitives::U256::from(25u64),
            position: EventPosition::new(1, 0),
        })
        .await
        .unwrap();
        drop(tx);

        updater.consume(rx).await;

        let edges = storage.all_edges().await.unwrap();
        assert_eq!(edges, vec![Edge::new(a, b, a, Amount::from(25u64)).unwrap()]);
    }
}
