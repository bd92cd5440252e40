//! # docsync
//!
//! Document indexing and deduplication engine that keeps a local ledger of
//! indexed files consistent with a content (vector) store.
//!
//! Every file offered to the system is checked against the store before it
//! is chunked, fingerprinted, and inserted. A JSON ledger remembers which
//! paths were indexed at which modification time so scans can skip
//! unchanged files, and it is rebuilt from the store whenever the two
//! disagree.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ ScanCoord.  │──▶│ IndexingEng. │──▶│ ContentStore  │
//! │ walk+extract│   │ probe+chunk  │   │ sqlite/chroma │
//! └──────┬──────┘   └──────────────┘   └───────┬───────┘
//!        │                                     │ listing
//!        ▼                                     ▼
//!   ┌──────────┐      repair           ┌──────────────┐
//!   │  Ledger  │◀───────────────────── │ SyncReconc.  │
//!   │  (JSON)  │                       └──────────────┘
//!   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docsync scan                       # reconcile, then index new files
//! docsync index ./inbox/report.pdf   # index one file
//! docsync check report.pdf           # is it in the store / the ledger?
//! docsync status                     # documents and chunk count
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`hash`] | Document fingerprints |
//! | [`chunk`] | Overlapping text chunking |
//! | [`ledger`] | Persistent ledger of indexed paths |
//! | [`store`] | Content store trait and backends |
//! | [`probe`] | Existence checks against the store |
//! | [`locks`] | Per-document locks |
//! | [`engine`] | Indexing engine |
//! | [`reconcile`] | Ledger repair from the store listing |
//! | [`scan`] | Directory scan |
//! | [`service`] | Application entry points |
//! | [`extract`] | Text extraction |
//! | [`progress`] | Scan progress reporting |
//! | [`error`] | Typed errors |

pub mod chunk;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod hash;
pub mod ledger;
pub mod locks;
pub mod models;
pub mod probe;
pub mod progress;
pub mod reconcile;
pub mod scan;
pub mod service;
pub mod store;
