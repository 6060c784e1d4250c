// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flowline BPMN - Graph Extraction and Pre-Deployment Transformation
//!
//! This crate turns externally-authored BPMN 2.0 XML into a navigable domain
//! graph and repairs/annotates the document before it is handed to the
//! process-execution engine.
//!
//! # Pipeline
//!
//! ```text
//!     ┌─────────────┐      ┌──────────────┐      ┌──────────────┐
//!     │  BPMN 2.0   │      │ ProcessGraph │      │  Repaired    │
//!     │    XML      │─────▶│  (extract)   │      │  BPMN XML    │
//!     └─────────────┘      └──────────────┘      └──────────────┘
//!           │                                          ▲
//!           │              ┌──────────────┐            │
//!           └─────────────▶│ Transformer  │────────────┘
//!                          │ (plan+apply) │
//!                          └──────────────┘
//! ```
//!
//! Extraction is a pure function over the document: every element keeps its
//! document-assigned id, sub-processes nest recursively, and unrecognized
//! vendor elements map to explicit unknown/none sentinels instead of failing.
//!
//! Transformation repairs structural defects (sub-processes without a start
//! event, exclusive gateways with ambiguous unconditioned branches), forces
//! the executability flag, and injects per-task operational configuration
//! (assignment, priority, due dates) resolved through an [`IdentityResolver`].
//! Untouched document content is preserved byte-for-byte where possible.
//!
//! # Modules
//!
//! - [`model`]: the process graph aggregate and its closed kind enumerations
//! - [`extract`]: BPMN XML → [`model::ProcessGraph`]
//! - [`task_config`]: per-task configuration overlay applied at deploy time
//! - [`transform`]: structural repair + configuration injection

#![deny(missing_docs)]

pub mod extract;
pub mod model;
pub mod task_config;
pub mod transform;

pub use extract::{ExtractError, extract, process_key, process_name};
pub use model::ProcessGraph;
pub use task_config::{AssigneeType, TaskConfiguration};
pub use transform::{IdentityResolver, TransformError, Transformer};
