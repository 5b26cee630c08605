//! Chain events that can change edge capacities.

use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};

use crate::storage::EventPosition;

sol! {
    /// Hub trust update: `canSendTo` accepts up to `limit` of `user`'s token.
    #[derive(Debug, PartialEq, Eq)]
    event Trust(address indexed canSendTo, address indexed user, uint256 limit);

    /// ERC-20 transfer of a personal token.
    #[derive(Debug, PartialEq, Eq)]
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// Decoded event handed to the incremental updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// Tokens moved between accounts; `sender` is zero for mints.
    Transfer {
        sender: Address,
        recipient: Address,
        token_address: Address,
        position: EventPosition,
    },

    /// `truster` changed how much of `token_owner`'s token it accepts.
    Trust {
        truster: Address,
        token_owner: Address,
        limit: U256,
        position: EventPosition,
    },
}

impl ChainEvent {
    /// Position of the originating log.
    pub fn position(&self) -> EventPosition {
        match self {
            ChainEvent::Transfer { position, .. } | ChainEvent::Trust { position, .. } => *position,
        }
    }

    /// Decode a log, returning `None` for logs that are not tracked events.
    ///
    /// `Trust` is only accepted from the hub; `Transfer` from any emitter,
    /// since every personal token is its own contract.
    pub fn from_log(log: &Log, hub: Address) -> Result<Option<Self>> {
        let Some(topic0) = log.topic0() else {
            return Ok(None);
        };

        let block_number = log.block_number.context("Log missing block_number")?;
        let log_index = log.log_index.context("Log missing log_index")?;
        let position = EventPosition::new(block_number, log_index);

        if *topic0 == Trust::SIGNATURE_HASH && log.address() == hub {
            let event = Trust::decode_log(log.as_ref(), true).context("Failed to decode Trust event")?;
            return Ok(Some(ChainEvent::Trust {
                truster: event.canSendTo,
                token_owner: event.user,
                limit: event.limit,
                position,
            }));
        }

        if *topic0 == Transfer::SIGNATURE_HASH {
            // ERC-721 transfers share the signature but index the token id.
            if log.topics().len() != 3 {
                return Ok(None);
            }
            let event =
                Transfer::decode_log(log.as_ref(), true).context("Failed to decode Transfer event")?;
            return Ok(Some(ChainEvent::Transfer {
                sender: event.from,
                recipient: event.to,
                token_address: log.address(),
                position,
            }));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Log as PrimitiveLog, LogData};

    fn rpc_log(address: Address, data: LogData, block_number: u64, log_index: u64) -> Log {
        Log {
            inner: PrimitiveLog { address, data },
            block_number: Some(block_number),
            log_index: Some(log_index),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_trust() {
        let hub = Address::repeat_byte(0x42);
        let event = Trust {
            canSendTo: Address::repeat_byte(0x0a),
            user: Address::repeat_byte(0x0b),
            limit: U256::from(50u64),
        };
        let log = rpc_log(hub, event.encode_log_data(), 100, 3);

        let decoded = ChainEvent::from_log(&log, hub).unwrap().unwrap();
        assert_eq!(
            decoded,
            ChainEvent::Trust {
                truster: Address::repeat_byte(0x0a),
                token_owner: Address::repeat_byte(0x0b),
                limit: U256::from(50u64),
                position: EventPosition::new(100, 3),
            }
        );
    }

    #[test]
    fn test_trust_from_other_contract_ignored() {
        let event = Trust {
            canSendTo: Address::repeat_byte(0x0a),
            user: Address::repeat_byte(0x0b),
            limit: U256::from(50u64),
        };
        let log = rpc_log(Address::repeat_byte(0x99), event.encode_log_data(), 100, 3);

        assert!(ChainEvent::from_log(&log, Address::repeat_byte(0x42))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_decode_transfer() {
        let token = Address::repeat_byte(0xaa);
        let event = Transfer {
            from: Address::ZERO,
            to: Address::repeat_byte(0x0b),
            value: U256::from(7u64),
        };
        let log = rpc_log(token, event.encode_log_data(), 7, 0);

        let decoded = ChainEvent::from_log(&log, Address::repeat_byte(0x42))
            .unwrap()
            .unwrap();
        assert_eq!(
            decoded,
            ChainEvent::Transfer {
                sender: Address::ZERO,
                recipient: Address::repeat_byte(0x0b),
                token_address: token,
                position: EventPosition::new(7, 0),
            }
        );
        assert_eq!(decoded.position(), EventPosition::new(7, 0));
    }
}
