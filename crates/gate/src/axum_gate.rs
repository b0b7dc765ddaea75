//! Axum glue: run the gate in front of a `WebSocketUpgrade`.
//!
//! The host owns the route and extractors; this module turns HTTP parts
//! into an [`UpgradeRequest`], refuses with the right status code, and
//! only upgrades approved connections.

use std::future::Future;
use std::net::IpAddr;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::gate::{GateApproval, GateRejection, SecurityGate, UpgradeRequest};

/// Build an [`UpgradeRequest`] from HTTP parts.  `secure` comes from the
/// host, which knows whether TLS terminated in front of it.
pub fn upgrade_request_from_parts(
    headers: &HeaderMap,
    client_addr: IpAddr,
    secure: bool,
) -> UpgradeRequest {
    let origin = headers
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let bearer_token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned);
    UpgradeRequest {
        secure,
        tls_version: None,
        origin,
        client_addr,
        bearer_token,
    }
}

/// Map a rejection to the response status the protocol prescribes.
pub fn rejection_status(rejection: &GateRejection) -> StatusCode {
    StatusCode::from_u16(rejection.status_code()).unwrap_or(StatusCode::FORBIDDEN)
}

/// Check the gate, then upgrade.  The socket handler receives the
/// [`GateApproval`]; keeping it alive keeps the connection slot held.
///
/// ```rust,no_run
/// use std::net::SocketAddr;
/// use std::sync::Arc;
/// use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
/// use axum::http::HeaderMap;
/// use agui_gate::{axum_gate, SecurityGate};
///
/// async fn ws_route(
///     ws: WebSocketUpgrade,
///     State(gate): State<Arc<SecurityGate>>,
///     ConnectInfo(addr): ConnectInfo<SocketAddr>,
///     headers: HeaderMap,
/// ) -> axum::response::Response {
///     axum_gate::gated_upgrade(&gate, ws, &headers, addr.ip(), true, |socket, approval| async move {
///         let _hold = approval;
///         // ... serve the socket ...
///         drop(socket);
///     })
///     .await
/// }
/// ```
pub async fn gated_upgrade<F, Fut>(
    gate: &SecurityGate,
    ws: WebSocketUpgrade,
    headers: &HeaderMap,
    client_addr: IpAddr,
    secure: bool,
    handle: F,
) -> Response
where
    F: FnOnce(WebSocket, GateApproval) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let request = upgrade_request_from_parts(headers, client_addr, secure);
    match gate.check(&request) {
        Ok(approval) => ws
            .on_upgrade(move |socket| handle(socket, approval))
            .into_response(),
        Err(rejection) => (rejection_status(&rejection), rejection.to_string()).into_response(),
    }
}
