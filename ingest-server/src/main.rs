// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Binds a hyper server on top of [`ingest_core::Router`], translating
//! hyper's request/response types to and from the router's own
//! `IncomingRequest`/`HttpResponse` adapter structs.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use futures_util::TryStreamExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use ingest_core::{Config, ExchangeOrchestrator, HandlerRegistry, IncomingRequest, Method, Router, SessionManager};
use ingest_ipc::RegionRegistry;
use tokio::net::TcpListener;
use tokio_util::io::StreamReader;
use tracing::{error, info, warn};

/// Explicit CLI configuration; the core never reads environment variables.
#[derive(Parser, Debug)]
#[command(name = "ingest-server", about = "Multi-modal data-ingestion server")]
struct Args {
    /// Address to bind the HTTP listener on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Directory completed non-chunked/chunked/stream uploads are written under.
    #[arg(long, default_value = "uploads")]
    upload_dir: PathBuf,

    /// Directory temporary spool files for `/upload/stream` are created under.
    #[arg(long)]
    spool_dir: Option<PathBuf>,

    /// Maximum accepted request body size, in bytes.
    #[arg(long, default_value_t = ingest_core::config::DEFAULT_MAX_BODY_SIZE)]
    max_body_size: u64,
}

async fn serve(router: Arc<Router>, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = match *req.method() {
        hyper::Method::GET => Method::Get,
        hyper::Method::POST => Method::Post,
        ref other => {
            warn!(method = %other, "rejecting unsupported HTTP method");
            return Ok(json_response(405, &serde_json::json!({"status": "error", "message": "unsupported method"})));
        }
    };

    let path = req.uri().path().to_owned();
    let query = req.uri().query().map(parse_query).unwrap_or_default();
    let headers: HashMap<String, String> = req
        .headers()
        .iter()
        .map(|(name, value)| (name.as_str().to_ascii_lowercase(), value.to_str().unwrap_or_default().to_owned()))
        .collect();
    let content_length = headers.get("content-length").and_then(|v| v.parse().ok());

    let body_stream = req
        .into_body()
        .into_data_stream()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err));
    let body = StreamReader::new(body_stream);

    let incoming = IncomingRequest {
        method,
        path,
        query,
        headers,
        content_length,
        body: Box::new(body),
    };

    let response = router.handle(incoming).await;
    Ok(json_response(response.status, &response.body))
}

fn json_response(status: u16, body: &serde_json::Value) -> Response<Full<Bytes>> {
    let payload = serde_json::to_vec(body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(payload)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default();
            (key.to_owned(), value.to_owned())
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config_builder = Config::builder().upload_dir(args.upload_dir).max_body_size(args.max_body_size);
    if let Some(spool_dir) = args.spool_dir {
        config_builder = config_builder.spool_dir(spool_dir);
    }
    let config = Arc::new(config_builder.build());

    let registry = Arc::new(RegionRegistry::new());
    let sessions = Arc::new(SessionManager::new());
    let handlers = Arc::new(HandlerRegistry::with_defaults());
    let orchestrator = Arc::new(ExchangeOrchestrator::new(registry.clone(), handlers.clone(), config.clone()));
    let router = Arc::new(Router::new(registry, sessions, handlers, orchestrator, config));

    let listener = TcpListener::bind(args.bind).await?;
    info!(bind = %args.bind, "ingestion server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let router = router.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| serve(router.clone(), req));
            if let Err(err) = auto::Builder::new(TokioExecutor::new()).serve_connection(io, service).await {
                error!(%peer, %err, "connection error");
            }
        });
    }
}
