//! RPC provider wrapper for Gnosis Chain / Ethereum communication.

use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockNumberOrTag, BlockTransactionsKind, Filter, Log};
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use anyhow::{Context, Result};
use tracing::debug;

use super::events::{ChainEvent, Transfer, Trust};

/// HTTP provider type shared by the listener and the contract reader.
pub type HttpProvider = RootProvider<Http<Client>>;

/// HTTP RPC provider for polling hub and token events.
#[derive(Clone)]
pub struct RpcProvider {
    provider: HttpProvider,
    hub_address: Address,
}

impl RpcProvider {
    /// Create a new RPC provider.
    pub fn new(rpc_url: &str, hub_address: Address) -> Result<Self> {
        let url = rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC URL: {}", rpc_url))?;

        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self {
            provider,
            hub_address,
        })
    }

    /// The underlying alloy provider.
    pub fn inner(&self) -> &HttpProvider {
        &self.provider
    }

    /// Get the chain id reported by the node.
    pub async fn get_chain_id(&self) -> Result<u64> {
        self.provider
            .get_chain_id()
            .await
            .context("Failed to get chain id")
    }

    /// Get the latest block number.
    pub async fn get_block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .context("Failed to get block number")
    }

    /// Get a block hash, `None` if the node does not know the block.
    pub async fn get_block_hash(&self, block_number: u64) -> Result<Option<B256>> {
        let block = self
            .provider
            .get_block_by_number(
                BlockNumberOrTag::Number(block_number),
                BlockTransactionsKind::Hashes,
            )
            .await
            .with_context(|| format!("Failed to fetch block {}", block_number))?;

        Ok(block.map(|block| block.header.hash))
    }

    /// Get tracked events for a block range, ordered by position.
    pub async fn get_events(&self, from_block: u64, to_block: u64) -> Result<Vec<ChainEvent>> {
        let trust_filter = Filter::new()
            .address(self.hub_address)
            .event_signature(Trust::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        let transfer_filter = Filter::new()
            .event_signature(Transfer::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        let (trust_logs, transfer_logs) = tokio::try_join!(
            self.fetch_logs(&trust_filter),
            self.fetch_logs(&transfer_filter)
        )?;

        let mut events = Vec::with_capacity(trust_logs.len() + transfer_logs.len());
        for log in trust_logs.iter().chain(transfer_logs.iter()) {
            match ChainEvent::from_log(log, self.hub_address) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    // Tokens outside the hub may emit malformed transfers.
                    debug!("Skipping undecodable log: {:#}", e);
                }
            }
        }

        events.sort_by_key(ChainEvent::position);
        Ok(events)
    }

    async fn fetch_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        self.provider
            .get_logs(filter)
            .await
            .context("Failed to fetch logs from RPC")
    }
}
