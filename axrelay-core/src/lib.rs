//! # axrelay core
//!
//! Dispatch, tracking and verdict reconciliation for a pool of malware
//! analysis appliances.
//!
//! ## Overview
//!
//! A run of the [`engine::Engine`] walks through these steps:
//!
//! - **Sessions**: log in to every configured appliance; those that refuse
//!   are left out of the run ([`session`]).
//! - **Poll**: ask each appliance about its pending submissions and reconcile
//!   finished ones ([`poller`], [`reconciler`]).
//! - **Dispatch**: assign newly dropped files to appliances round-robin,
//!   guarded against duplicate and premature re-analysis ([`dispatcher`],
//!   [`throttle`], [`submission`]).
//! - **Teardown**: log out everywhere.
//!
//! All state that outlives a run lives in the [`ledger`] and in the directory
//! a file sits in ([`layout`]).
//!
//! ## Architecture
//!
//! Remote appliances and the ledger sit behind traits
//! ([`appliance::ApplianceApi`], [`ledger::SubmissionLedger`]) so the engine
//! can be driven by in-memory fakes. The shipped adapters are
//! [`appliance::HttpApplianceClient`] and [`ledger::SqliteSubmissionLedger`].
//! Everything is handed to components through one [`context::EngineContext`].

pub mod appliance;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod hashing;
pub mod layout;
pub mod ledger;
pub mod poller;
pub mod reconciler;
pub mod session;
pub mod submission;
pub mod throttle;
pub mod types;

pub use error::{Result, RunError};

/// Embedded ledger schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
