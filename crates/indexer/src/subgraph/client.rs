//! HTTP client for the Circles subgraph.

use super::types::{
    GraphQlRequest, GraphQlResponse, MetaResponse, SafeLookup, SafeRecord, SafesPage,
};
use super::{EndpointProbe, EndpointService, SafeSource, TrustLookup};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use circles_core::Address;
use circles_graph::Account;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Page size of the lists nested under a safe (`outgoing`, `incoming`,
/// `balances`). A full page means more entries may follow.
const NESTED_PAGE_SIZE: usize = 1000;

const TRUST_FIELDS: &str = "userAddress canSendToAddress limit";
const BALANCE_FIELDS: &str = "amount token { id owner { id } }";

const SAFES_QUERY: &str = r#"
query Safes($first: Int!, $lastId: ID!) {
  safes(first: $first, orderBy: id, orderDirection: asc, where: { id_gt: $lastId }) {
    id
    outgoing(first: 1000, orderBy: id) { userAddress canSendToAddress limit }
    incoming(first: 1000, orderBy: id) { userAddress canSendToAddress limit }
    balances(first: 1000, orderBy: id) { amount token { id owner { id } } }
  }
}
"#;

const SAFE_QUERY: &str = r#"
query Safe($id: ID!) {
  safe(id: $id) {
    id
    outgoing(first: 1000, orderBy: id) { userAddress canSendToAddress limit }
  }
}
"#;

/// Query for one further page of a single nested list of a safe.
fn nested_query(field: &str, selection: &str) -> String {
    format!(
        "query Nested($id: ID!, $first: Int!, $skip: Int!) {{ safe(id: $id) {{ id {field}(first: $first, skip: $skip, orderBy: id) {{ {selection} }} }} }}"
    )
}

const META_QUERY: &str = "{ _meta { block { number } hasIndexingErrors } }";

/// Subgraph client with cursor pagination and endpoint failover.
#[derive(Debug, Clone)]
pub struct SubgraphClient {
    http: Client,
    endpoints: EndpointService,
    page_size: usize,
}

impl SubgraphClient {
    /// Build a client over the shared endpoint service.
    pub fn new(endpoints: EndpointService, page_size: usize, timeout_secs: u64) -> Result<Self> {
        if page_size == 0 {
            bail!("Subgraph page size must be greater than 0");
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("circles-indexer/subgraph")
            .build()
            .context("Failed to build subgraph HTTP client")?;

        Ok(Self {
            http,
            endpoints,
            page_size,
        })
    }

    /// The endpoint service this client reads from.
    pub fn endpoints(&self) -> &EndpointService {
        &self.endpoints
    }

    /// Fetch every safe, one page at a time in id order.
    pub async fn fetch_all_safes(&self) -> Result<Vec<SafeRecord>> {
        let mut safes = Vec::new();
        let mut last_id = String::new();

        loop {
            let variables = json!({ "first": self.page_size, "lastId": last_id });
            let page: SafesPage = self
                .query_with_failover(SAFES_QUERY, &variables)
                .await
                .with_context(|| format!("Failed to fetch safes after id {:?}", last_id))?;

            let count = page.safes.len();
            debug!("Fetched page of {} safes after {:?}", count, last_id);

            if let Some(last) = page.safes.last() {
                last_id = last.id.clone();
            }
            for mut safe in page.safes {
                self.complete_nested(&mut safe).await?;
                safes.push(safe);
            }

            if count < self.page_size {
                break;
            }
        }

        info!("Fetched {} safes from subgraph", safes.len());
        Ok(safes)
    }

    /// Fetch the remainder of every nested list that came back full.
    async fn complete_nested(&self, safe: &mut SafeRecord) -> Result<()> {
        if safe.outgoing.len() >= NESTED_PAGE_SIZE {
            let rest = self
                .fetch_nested(&safe.id, "outgoing", TRUST_FIELDS, safe.outgoing.len(), |s| {
                    s.outgoing
                })
                .await?;
            safe.outgoing.extend(rest);
        }
        if safe.incoming.len() >= NESTED_PAGE_SIZE {
            let rest = self
                .fetch_nested(&safe.id, "incoming", TRUST_FIELDS, safe.incoming.len(), |s| {
                    s.incoming
                })
                .await?;
            safe.incoming.extend(rest);
        }
        if safe.balances.len() >= NESTED_PAGE_SIZE {
            let rest = self
                .fetch_nested(&safe.id, "balances", BALANCE_FIELDS, safe.balances.len(), |s| {
                    s.balances
                })
                .await?;
            safe.balances.extend(rest);
        }
        Ok(())
    }

    /// Page through one nested list of `id`, starting after `skip` entries.
    async fn fetch_nested<T, F>(
        &self,
        id: &str,
        field: &str,
        selection: &str,
        mut skip: usize,
        take: F,
    ) -> Result<Vec<T>>
    where
        F: Fn(SafeRecord) -> Vec<T>,
    {
        let query = nested_query(field, selection);
        let mut rest = Vec::new();

        loop {
            let variables = json!({ "id": id, "first": NESTED_PAGE_SIZE, "skip": skip });
            let lookup: SafeLookup = self
                .query_with_failover(&query, &variables)
                .await
                .with_context(|| format!("Failed to fetch {} of safe {} after {}", field, id, skip))?;

            let page = lookup.safe.map(&take).unwrap_or_default();
            let count = page.len();
            skip += count;
            rest.extend(page);

            if count < NESTED_PAGE_SIZE {
                break;
            }
        }

        debug!("Fetched {} more {} entries of safe {}", rest.len(), field, id);
        Ok(rest)
    }

    /// Run a query against the current endpoint, failing over through every
    /// configured endpoint before giving up.
    async fn query_with_failover<V, T>(&self, query: &str, variables: &V) -> Result<T>
    where
        V: Serialize,
        T: DeserializeOwned,
    {
        let attempts = self.endpoints.endpoints().len();
        let mut last_error = None;

        for attempt in 0..attempts {
            let endpoint = self.endpoints.current_endpoint().await;
            match self.query(&endpoint, query, variables).await {
                Ok(data) => return Ok(data),
                Err(e) => {
                    warn!(
                        "Subgraph query failed on {} (attempt {}/{}): {:#}",
                        endpoint,
                        attempt + 1,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                    if attempt + 1 < attempts {
                        self.endpoints.failover().await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("No subgraph endpoint configured")))
    }

    async fn query<V, T>(&self, endpoint: &str, query: &str, variables: &V) -> Result<T>
    where
        V: Serialize,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(endpoint)
            .json(&GraphQlRequest { query, variables })
            .send()
            .await
            .context("Subgraph request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("Subgraph responded with HTTP {}", status);
        }

        let body: GraphQlResponse<T> = response
            .json()
            .await
            .context("Invalid subgraph response")?;
        body.into_data()
    }
}

#[async_trait]
impl SafeSource for SubgraphClient {
    async fn fetch_accounts(&self) -> Result<Vec<Account>> {
        self.fetch_all_safes()
            .await?
            .into_iter()
            .map(SafeRecord::into_account)
            .collect()
    }
}

#[async_trait]
impl TrustLookup for SubgraphClient {
    async fn trusters_of(&self, owner: Address) -> Result<Vec<Address>> {
        let id = owner.to_string().to_lowercase();
        let lookup: SafeLookup = self
            .query_with_failover(SAFE_QUERY, &json!({ "id": id }))
            .await
            .with_context(|| format!("Failed to look up trusters of {}", owner))?;

        match lookup.safe {
            Some(mut safe) => {
                self.complete_nested(&mut safe).await?;
                safe.trusters()
            }
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl EndpointProbe for SubgraphClient {
    async fn probe(&self, endpoint: &str) -> Result<()> {
        let response: MetaResponse = self.query(endpoint, META_QUERY, &json!({})).await?;
        let meta = response
            .meta
            .ok_or_else(|| anyhow!("Subgraph returned no _meta"))?;

        if meta.has_indexing_errors {
            bail!("Subgraph has indexing errors at block {}", meta.block.number);
        }
        Ok(())
    }
}
