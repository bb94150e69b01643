//! # Profile Vault
//!
//! Safe ingestion, analysis, and retention of professional-network data
//! export archives.
//!
//! A user submits a zip export. Profile Vault validates it under strict
//! resource bounds, finds the entity files it knows, parses and normalizes
//! them into canonical records, aggregates statistics, and produces a
//! tiered insight report. Each submission is tracked as a backup record
//! with an auditable `pending → processing → ready | error` lifecycle and
//! time-based retention of its raw and derived artifacts.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │ CLI/HTTP │──▶│ Lifecycle │──▶│ Guard → Locate → Parse → │──▶│  SQLite  │
//! │ (pvault) │   │  Manager  │   │ Normalize → Aggregate →  │   │ + object │
//! └──────────┘   └───────────┘   │ Insight (enriched?)      │   │  store   │
//!                                └──────────────────────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pvault init
//! pvault submit ./Basic_Export.zip --user alice
//! pvault process <backup-id>
//! pvault report <backup-id>
//! pvault sweep
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`archive`] | Archive safety validation and bounded reads |
//! | [`locate`] | Entity file location and format detection |
//! | [`pipeline`] | One synchronous analysis run |
//! | [`enrich`] | External AI enrichment with fallback |
//! | [`lifecycle`] | Backup state machine |
//! | [`retention`] | Expiry sweep |
//! | [`sqlite_store`] | SQLite document store |
//! | [`object_store`] | Filesystem object store |
//! | [`server`] | HTTP server |
//! | [`commands`] | CLI command implementations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod archive;
pub mod commands;
pub mod config;
pub mod db;
pub mod enrich;
pub mod lifecycle;
pub mod locate;
pub mod migrate;
pub mod object_store;
pub mod pipeline;
pub mod retention;
pub mod server;
pub mod sqlite_store;
