//! The namespace-list API server.
//!
//! Serves `GET /api/v1/namespaces`: authenticates the request, resolves the
//! identity to its subjects, and returns the deduplicated union of the
//! namespaces the access cache holds for them, wrapped in the
//! `NamespaceList` envelope Kubernetes clients expect.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use futures::future;
use hyper::{header, Body, Method, Request, Response, StatusCode};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time;
use tracing::{debug, info, warn};

use crate::{authn::Authenticator, cache::AccessCache, core::Subject};

#[derive(Clone, Debug)]
pub(crate) struct Metrics {
    requests: Family<CodeLabels, Counter>,
    durations: Histogram,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CodeLabels {
    code: String,
}

// === impl Metrics ===

impl Metrics {
    pub(crate) fn register(reg: &mut Registry) -> Self {
        let requests = Family::default();
        reg.register(
            "requests",
            "HTTP requests processed, by response code",
            requests.clone(),
        );

        let durations = Histogram::new([0.001, 0.005, 0.025, 0.1, 0.5, 1.0, 5.0].into_iter());
        reg.register_with_unit(
            "request_duration",
            "HTTP request processing time",
            Unit::Seconds,
            durations.clone(),
        );

        Self {
            requests,
            durations,
        }
    }

    fn observe(&self, status: StatusCode, elapsed: time::Duration) {
        self.requests
            .get_or_create(&CodeLabels {
                code: status.as_u16().to_string(),
            })
            .inc();
        self.durations.observe(elapsed.as_secs_f64());
    }
}

pub(crate) async fn serve(
    addr: SocketAddr,
    cache: Arc<AccessCache>,
    authenticator: Authenticator,
    metrics: Metrics,
    drain: drain::Watch,
) -> Result<()> {
    let server =
        hyper::server::Server::try_bind(&addr)?.serve(hyper::service::make_service_fn(
            move |_conn| {
                let cache = cache.clone();
                let authenticator = authenticator.clone();
                let metrics = metrics.clone();
                future::ok::<_, hyper::Error>(hyper::service::service_fn(
                    move |req: Request<Body>| {
                        let cache = cache.clone();
                        let authenticator = authenticator.clone();
                        let metrics = metrics.clone();
                        async move {
                            let start = time::Instant::now();
                            let rsp = handle(req, &cache, &authenticator).await;
                            metrics.observe(rsp.status(), start.elapsed());
                            Ok::<_, hyper::Error>(rsp)
                        }
                    },
                ))
            },
        ));

    info!(%addr, "namespace API server listening");
    server
        .with_graceful_shutdown(async move {
            let _ = drain.signaled().await;
        })
        .await?;
    Ok(())
}

async fn handle(
    req: Request<Body>,
    cache: &AccessCache,
    authenticator: &Authenticator,
) -> Response<Body> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/api/v1/namespaces") => list_namespaces(req, cache, authenticator).await,
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::default())
            .unwrap(),
    }
}

async fn list_namespaces(
    req: Request<Body>,
    cache: &AccessCache,
    authenticator: &Authenticator,
) -> Response<Body> {
    let identity = match authenticator.authenticate(&req).await {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            return Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body(Body::default())
                .unwrap();
        }
        Err(error) => {
            warn!(%error, "failed to authenticate request");
            return Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body(Body::default())
                .unwrap();
        }
    };

    let subjects = Subject::from_identity(
        &identity.username,
        identity.groups.iter().map(String::as_str),
    );
    let items = cache.list_all(&subjects);
    debug!(
        user = %identity.username,
        namespaces = items.len(),
        "request processed",
    );

    // Clients expect the apiserver's plain list envelope, which is
    // `kind: NamespaceList` even though pretty-printed output shows `List`.
    let body = serde_json::json!({
        "kind": "NamespaceList",
        "apiVersion": "v1",
        "items": items,
    });
    match serde_json::to_vec(&body) {
        Ok(buf) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(buf))
            .unwrap(),
        Err(error) => {
            warn!(%error, "failed to encode namespace list");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::default())
                .unwrap()
        }
    }
}
