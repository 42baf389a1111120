use std::future::ready;
use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::metrics_consts::{HTTP_REQUESTS, HTTP_REQUEST_DURATION};

const UNMATCHED_ROUTE: &str = "unmatched";

// Seconds, cycle durations of slow steps run into minutes
const BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
];

pub async fn index() -> &'static str {
    "step worker"
}

/// Health and metrics routes. Installs the global Prometheus recorder, so
/// call it once per process.
pub fn router() -> Result<Router, BuildError> {
    let recorder_handle = setup_metrics_recorder()?;

    Ok(Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(index))
        .route(
            "/metrics",
            get(move || ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_requests)))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

/// Bind a `TcpListener` on `bind` and serve `router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Counts every request to the health and metrics routes by route and
/// status. Paths outside the router are folded into one label.
async fn track_requests(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or(UNMATCHED_ROUTE, MatchedPath::as_str)
        .to_owned();

    let response = next.run(req).await;

    let labels = [
        ("route", route),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!(HTTP_REQUESTS, &labels).increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION, &labels).record(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_requests_are_counted_per_route() {
        let app = router().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        assert!(http_get(addr, "/_liveness").await.starts_with("HTTP/1.1 200"));
        assert!(http_get(addr, "/nowhere").await.starts_with("HTTP/1.1 404"));

        let exposition = http_get(addr, "/metrics").await;
        let liveness = exposition
            .lines()
            .find(|l| l.starts_with(HTTP_REQUESTS) && l.contains(r#"route="/_liveness""#))
            .unwrap();
        assert!(liveness.ends_with(" 1"));
        assert!(exposition.contains(&format!(r#"route="{UNMATCHED_ROUTE}""#)));
    }
}
