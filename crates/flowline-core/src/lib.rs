// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flowline Core - Deployment Orchestration
//!
//! This crate ties the Flowline pipeline together: it transforms process
//! documents with their task configurations (flowline-bpmn), synchronizes
//! identities, deploys to the execution engine (flowline-engine), and keeps
//! a durable record of definitions, images, configurations and instances.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Callers (API, CLI)                          │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           Orchestrator                              │
//! │     deploy / start_process / work items / instance reconciliation   │
//! └─────────────────────────────────────────────────────────────────────┘
//!       │                    │                      │
//!       ▼                    ▼                      ▼
//! ┌──────────────┐   ┌────────────────┐   ┌──────────────────────┐
//! │ flowline-bpmn│   │ IdentityService│   │   flowline-engine    │
//! │  (transform) │   │  (id mapping)  │   │  (ProcessEngine API) │
//! └──────────────┘   └────────────────┘   └──────────────────────┘
//!                            │
//!                            ▼
//!                  ┌──────────────────┐
//!                  │ Store (SQLite /  │
//!                  │    PostgreSQL)   │
//!                  └──────────────────┘
//! ```
//!
//! # Persistence
//!
//! The [`store::Store`] trait has SQLite and PostgreSQL backends with
//! embedded migrations (see [`migrations`]). SQLite is the default for
//! single-node setups; PostgreSQL for shared deployments.

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod identity;
pub mod migrations;
pub mod notify;
pub mod orchestrator;
pub mod store;

pub use config::{Config, ConfigError};
pub use error::CoreError;
pub use identity::{IdentityService, ResolvedIdentities};
pub use notify::{LogNotifier, Notifier};
pub use orchestrator::{DeployRequest, Orchestrator, ProcessMetadata, WorkItem};
pub use store::{PostgresStore, SqliteStore, Store};
