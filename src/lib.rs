//! # NeWarp Harness
//!
//! Query tools over an internal HR/organization system, plus a chat relay
//! that puts a language model in front of them.
//!
//! The upstream system is reachable only through an authenticated,
//! cookie-session web API. The harness logs in on demand, persists the raw
//! master tables (division, department, group, user) and the per-period
//! evaluation sheets in a file cache, and answers lookups by joining those
//! tables into denormalized views.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────────────┐
//! │ Upstream │──▶│  Cache   │──▶│ Engine            │
//! │ (HTTP)   │   │ (files)  │   │ org/users/eval    │
//! └──────────┘   └──────────┘   └────────┬──────────┘
//!                                        ▼
//!                                 ┌─────────────┐
//!                                 │ Query layer │
//!                                 └──────┬──────┘
//!                     ┌──────────────────┼─────────────┐
//!                     ▼                  ▼             ▼
//!                ┌─────────┐      ┌────────────┐  ┌─────────┐
//!                │   CLI   │      │ HTTP + MCP │  │  Chat   │
//!                │(newarp) │      │  (server)  │  │ relay   │
//!                └─────────┘      └────────────┘  └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! newarp query get_company_organization_master
//! newarp query get_user_evaluation 山田
//! newarp serve tools            # HTTP + MCP tool server
//! newarp serve chat             # chat relay
//! newarp cache status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`upstream`] | Login and dataset fetches |
//! | [`cache`] | Cache trait and backends |
//! | [`models`] | Raw master records |
//! | [`engine`] | Cache-or-fetch plumbing |
//! | [`org`] | Organization join |
//! | [`users`] | User master view |
//! | [`evaluation`] | Evaluation history |
//! | [`query`] | Filters and response envelopes |
//! | [`tools`] | Tool trait and registry |
//! | [`server`] | Tool HTTP server |
//! | [`mcp`] | MCP bridge |
//! | [`chat`] | Chat relay |

pub mod cache;
pub mod chat;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod mcp;
pub mod models;
pub mod org;
pub mod query;
pub mod server;
pub mod tools;
pub mod upstream;
pub mod users;
