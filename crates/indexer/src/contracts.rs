//! Live contract reads used to refresh single edges.

use alloy::primitives::Address;
use alloy::sol;
use alloy::transports::http::{Client, Http};
use anyhow::{Context, Result};
use async_trait::async_trait;
use circles_core::Amount;

use crate::listener::provider::HttpProvider;

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract Hub {
        function checkSendLimit(address tokenOwner, address src, address dest) external view returns (uint256);
        function tokenToUser(address token) external view returns (address);
        function userToToken(address user) external view returns (address);
    }

    #[allow(missing_docs)]
    #[sol(rpc)]
    contract Token {
        function balanceOf(address account) external view returns (uint256);
    }
}

/// Read access to hub and token state.
///
/// Unregistered tokens and users resolve to the zero address.
#[async_trait]
pub trait ContractReader: Send + Sync {
    /// How much of `token_owner`'s token `src` may currently send to `dest`.
    async fn check_send_limit(
        &self,
        token_owner: Address,
        src: Address,
        dest: Address,
    ) -> Result<Amount>;

    /// Balance of `holder` in the token contract at `token`.
    async fn balance_of(&self, token: Address, holder: Address) -> Result<Amount>;

    /// Owner of a token contract.
    async fn token_to_user(&self, token: Address) -> Result<Address>;

    /// Token contract of a user.
    async fn user_to_token(&self, user: Address) -> Result<Address>;
}

/// [`ContractReader`] backed by an HTTP provider.
#[derive(Clone)]
pub struct HubContractReader {
    hub: Hub::HubInstance<Http<Client>, HttpProvider>,
    provider: HttpProvider,
}

impl HubContractReader {
    /// Bind to the hub at `hub_address`.
    pub fn new(provider: HttpProvider, hub_address: Address) -> Self {
        let hub = Hub::new(hub_address, provider.clone());
        Self { hub, provider }
    }
}

#[async_trait]
impl ContractReader for HubContractReader {
    async fn check_send_limit(
        &self,
        token_owner: Address,
        src: Address,
        dest: Address,
    ) -> Result<Amount> {
        let limit = self
            .hub
            .checkSendLimit(token_owner, src, dest)
            .call()
            .await
            .context("checkSendLimit call failed")?
            ._0;
        Ok(Amount::from(limit))
    }

    async fn balance_of(&self, token: Address, holder: Address) -> Result<Amount> {
        let balance = Token::new(token, self.provider.clone())
            .balanceOf(holder)
            .call()
            .await
            .context("balanceOf call failed")?
            ._0;
        Ok(Amount::from(balance))
    }

    async fn token_to_user(&self, token: Address) -> Result<Address> {
        Ok(self
            .hub
            .tokenToUser(token)
            .call()
            .await
            .context("tokenToUser call failed")?
            ._0)
    }

    async fn user_to_token(&self, user: Address) -> Result<Address> {
        Ok(self
            .hub
            .userToToken(user)
            .call()
            .await
            .context("userToToken call failed")?
            ._0)
    }
}
