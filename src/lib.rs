//! # docmark
//!
//! A document-to-markdown conversion service with a content-addressed cache
//! and an LLM question-answering mode over uploaded files.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌─────────────────┐   ┌──────────┐
//! │   HTTP   │──▶│ Batch         │──▶│ Conversion      │──▶│ SQLite   │
//! │ (axum)   │   │ orchestrator  │   │ cache           │   │ cache +  │
//! └──────────┘   └──────┬────────┘   └───────┬─────────┘   │ history  │
//!                       │                    ▼             └──────────┘
//!                       │            ┌──────────────┐
//!                       └───────────▶│ Converter /  │
//!                                    │ LLM client   │
//!                                    └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docmark init                        # create database
//! docmark convert ./report.pdf        # convert through the cache
//! docmark serve                       # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite cache and history store |
//! | [`extract`] | Format-specific markdown extraction |
//! | [`convert`] | Converter backends |
//! | [`llm`] | Language model clients |
//! | [`cache`] | Cache controller |
//! | [`history`] | Best-effort session history |
//! | [`batch`] | Batch orchestration and agent modes |
//! | [`auth`] | Bearer token verification |
//! | [`context`] | Component wiring |
//! | [`server`] | HTTP server |
//!
//! Domain types, the storage traits, and the capability traits live in the
//! `docmark-core` crate.

pub mod auth;
pub mod batch;
pub mod cache;
pub mod config;
pub mod context;
pub mod convert;
pub mod db;
pub mod extract;
pub mod history;
pub mod llm;
pub mod migrate;
pub mod server;
pub mod sqlite_store;
