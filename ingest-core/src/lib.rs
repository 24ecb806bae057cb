// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The service layer built on top of `ingest-ipc`'s wire primitives: session
//! tracking for chunked uploads, the content-handler registry, the exchange
//! orchestrator's three shared-memory operations, and the ingestion router
//! that classifies and dispatches inbound HTTP requests across all of it.

pub mod config;
pub mod error;
pub mod handler;
pub mod metadata;
pub mod orchestrator;
pub mod router;
pub mod session;

pub use config::Config;
pub use error::CoreError;
pub use handler::{HandlerKind, HandlerRegistry};
pub use metadata::Metadata;
pub use orchestrator::ExchangeOrchestrator;
pub use router::{AsyncBody, BufferedBody, HttpResponse, IncomingRequest, Method, Router};
pub use session::SessionManager;
