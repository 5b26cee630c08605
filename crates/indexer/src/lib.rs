//! Edge-graph backend for the Circles trust network.
//!
//! This crate provides:
//! - SQLite edge store keyed by `(from, to, token)`
//! - Subgraph client with endpoint failover
//! - Chain listener for hub `Trust` and token `Transfer` events
//! - Incremental edge updates from on-chain send limits and balances
//! - Periodic full rebuilds from the subgraph
//! - Solver snapshot export and transfer-step resolution
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐          ┌──────────────────┐
//! │   Subgraph   │          │   Gnosis RPC     │
//! │  (GraphQL)   │          │ Trust + Transfer │
//! └──────┬───────┘          └────────┬─────────┘
//!        │ all safes                 │ logs
//! ┌──────▼─────────┐        ┌────────▼─────────┐
//! │ RebuildService │        │    SyncEngine    │
//! │ derive + bulk  │        └────────┬─────────┘
//! │ replace        │                 │ mpsc<ChainEvent>
//! └──────┬─────────┘        ┌────────▼───────────┐
//!        │                  │ IncrementalUpdater │ ← checkSendLimit,
//!        │                  └────────┬───────────┘   balanceOf
//!        │     ┌─────────┐           │
//!        └────►│ Storage │◄──────────┘
//!              │ (edges) │
//!              └────┬────┘
//!                   │ dirty
//!           ┌───────▼────────┐     ┌──────────────────────┐
//!           │ ExportScheduler│────►│ edges.json ─► solver │
//!           └────────────────┘     └──────────────────────┘
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod contracts;
pub mod export;
pub mod listener;
pub mod pathfinder;
pub mod rebuild_service;
pub mod storage;
pub mod subgraph;
pub mod updater;

pub use circles_core::{Address, Amount, Edge, EdgeKey, U256};
