//! # PDF Explainer
//!
//! A validation-and-resilient-dispatch pipeline that takes text extracted
//! from a PDF page, forwards it to an LLM provider (OpenRouter by default),
//! and returns a plain-language explanation wrapped in a normalized JSON
//! envelope.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────────────────────────────────┐   ┌────────────┐
//! │ axum host │──▶│               Pipeline                │──▶│  Provider  │
//! │ (+ CORS)  │   │ method · rate limit · config          │   │ OpenRouter │
//! │ / CLI     │◀──│ content type · body · payload · retry │◀──│  (reqwest) │
//! └───────────┘   └───────────────────────────────────────┘   └────────────┘
//!                         │
//!                         ▼
//!                 ResponseEnvelope (always exactly one)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENROUTER_API_KEY=sk-or-...
//! explainer serve                     # POST /api/explain-pdf
//! explainer check                     # validate configuration
//! explainer explain --file page.txt --page 3
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + environment configuration |
//! | [`models`] | Request-scoped data types |
//! | [`error`] | Error taxonomy and status mapping |
//! | [`envelope`] | Response envelope and error ids |
//! | [`cors`] | CORS layer for the HTTP host |
//! | [`rate_limit`] | Bounded per-client rate limiting |
//! | [`retry`] | Retry policy with backoff and timeouts |
//! | [`validate`] | Inbound validation |
//! | [`payload`] | Provider payload construction |
//! | [`provider`] | Provider trait and OpenRouter client |
//! | [`pipeline`] | Stage sequencing |
//! | [`server`] | axum HTTP host |
//! | [`logging`] | tracing setup |

pub mod config;
pub mod cors;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod models;
pub mod payload;
pub mod pipeline;
pub mod provider;
pub mod rate_limit;
pub mod retry;
pub mod server;
pub mod validate;
