//! Anvil - API-driven bare-metal provisioning and DHCP control plane.
//!
//! Anvil issues DHCP leases, renders boot-time artifacts (PXE/iPXE
//! configurations, kernel boot parameters) per machine, and keeps all
//! operational state in a layered content store with cross-object
//! validation. One binary; the HTTP API, TFTP transport, and DHCP wire
//! midlayer are collaborators that take handles from the runtime.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Collaborator servers                           │
//! │     HTTP API     │   DHCP midlayer    │    TFTP / static HTTP   │
//! └─────────────────────────────────────────────────────────────────┘
//!            │                 │                      │
//! ┌──────────┴─────────────────┴──────────┐  ┌────────┴────────────┐
//! │              Data tracker             │  │  Virtual filesystem │
//! │  per-prefix caches │ locks │ hooks    │  │  (rendered content) │
//! └───────────────────────────────────────┘  └─────────────────────┘
//!            │                    │                    ▲
//! ┌──────────┴──────────┐  ┌──────┴──────────┐  ┌──────┴────────────┐
//! │   Layered content   │  │ Event publisher │  │ Template renderer │
//! │  stack (one writable│  │   (fan-out)     │  │  + param chains   │
//! │  layer + content)   │  └─────────────────┘  └───────────────────┘
//! └─────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - [`core`] - configuration, errors, TLS bootstrap, runtime
//! - [`storage`] - content store implementations and the layered stack
//! - [`tracker`] - per-prefix caches, indexes, locks, CRUD
//! - [`models`] - entity types, validation hooks, lock tables
//! - [`dhcp`] - the lease engine
//! - [`render`] - templates, render data, the virtual filesystem
//! - [`events`] - event fan-out to subscribers
//! - [`auth`] - password hashing and bearer tokens
//! - [`cli`] - the `anvil` command surface

pub mod auth;
pub mod cli;
pub mod core;
pub mod dhcp;
pub mod events;
pub mod models;
pub mod render;
pub mod storage;
pub mod tracker;
