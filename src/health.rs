//! Liveness endpoint for hosts that require a bound port.
//!
//! Enabled by setting `PORT`. Every request, on any path or method, gets
//! `200 pong`.

use crate::shutdown::ShutdownSignal;
use axum::Router;
use std::net::SocketAddr;
use tracing::info;

/// Environment variable that enables the endpoint.
pub const PORT_VAR: &str = "PORT";

pub const PONG: &str = "pong";

pub fn app() -> Router {
    Router::new().fallback(|| async { PONG })
}

/// Port from `PORT`, if set to a valid number.
pub fn port_from_env() -> Option<u16> {
    std::env::var(PORT_VAR).ok()?.trim().parse().ok()
}

/// Serve [`app`] on `0.0.0.0:port` until shutdown.
pub async fn serve(port: u16, shutdown: ShutdownSignal) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(%addr, "Liveness endpoint listening");

    let mut stop = shutdown.subscribe();
    axum::serve(listener, app())
        .with_graceful_shutdown(async move {
            let _ = stop.recv().await;
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use tower::ServiceExt;

    async fn call(method: Method, uri: &str) -> (StatusCode, String) {
        let response = app()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_root_replies_pong() {
        assert_eq!(call(Method::GET, "/").await, (StatusCode::OK, PONG.to_string()));
    }

    #[tokio::test]
    async fn test_any_path_and_method_replies_pong() {
        assert_eq!(
            call(Method::POST, "/some/where?x=1").await,
            (StatusCode::OK, PONG.to_string())
        );
        assert_eq!(call(Method::HEAD, "/health").await.0, StatusCode::OK);
    }
}
