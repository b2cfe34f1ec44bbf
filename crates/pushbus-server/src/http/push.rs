//! Subscribe and publish handlers for topic paths.

use std::convert::Infallible;
use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use pushbus_core::ConnectionId;
use pushbus_core::topic::{self, TOPICS_HEADER};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::broadcast::{CACHE_HEADER, ClientConnection, OutboundFrame, ResumePolicy, TransportKind};
use crate::context::{ConnectionGuard, DispatchOutcome};
use crate::errors::Result;
use crate::request::{
    CONNECTION_ATTRIBUTE, InboundRequest, OriginRequest, RequestBody, TRANSPORT_ATTRIBUTE,
};
use crate::server::AppState;
use crate::websocket::run_ws_session;

/// `GET <base>/<topic path>`: suspend a subscriber.
///
/// The transport comes from `x-push-transport`. Requested topics come from
/// the `topics` header; the topic named by the path must already have a
/// broadcaster or the request is refused with `403`.
pub async fn subscribe(State(state): State<AppState>, request: Request) -> Response {
    let ctx = state.ctx;
    let (mut parts, _body) = request.into_parts();
    let path_info = ctx.config.path_info(parts.uri.path()).to_owned();
    let transport = TransportKind::from_headers(&parts.headers);

    let upgrade = if transport == TransportKind::WebSocket {
        match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(ws) => Some(ws),
            Err(rejection) => return rejection.into_response(),
        }
    } else {
        None
    };

    let id = ConnectionId::new();
    let origin = OriginRequest::from_parts(&parts, &path_info)
        .with_attribute(TRANSPORT_ATTRIBUTE, transport.as_str())
        .with_attribute(CONNECTION_ATTRIBUTE, id.as_str());
    let (tx, rx) = mpsc::channel(ctx.config.send_queue_capacity);
    let conn = Arc::new(ClientConnection::new(id, transport, tx, origin));

    let guard = match ctx.admit(Arc::clone(&conn)) {
        Ok(guard) => guard,
        Err(e) => return e.into_response(),
    };

    let requested = requested_topics(&parts.headers);
    let primary = topic::from_path(&path_info);
    let binding = match ctx.binder.bind(
        &conn,
        primary.as_deref(),
        &requested,
        replay_cursor(&parts.headers),
    ) {
        Ok(binding) => binding,
        Err(e) => return e.into_response(),
    };

    info!(
        conn_id = %conn.id,
        transport = transport.as_str(),
        primary = %binding.primary.topic(),
        attached = binding.attached.len(),
        replayed = binding.replayed,
        "client subscribed"
    );

    let cancel = ctx.shutdown_token();
    match (binding.resume, upgrade) {
        (ResumePolicy::AfterFirstBroadcast, _) => long_poll(rx, guard, cancel).await,
        (ResumePolicy::StayOpen, Some(ws)) => ws
            .max_message_size(ctx.config.max_message_size)
            .on_upgrade(move |socket| run_ws_session(socket, ctx, guard, rx)),
        (ResumePolicy::StayOpen, None) => stream(rx, guard, cancel),
    }
}

/// `POST <base>/<topic path>`: publish the JSON body.
pub async fn publish(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<DispatchOutcome>> {
    let ctx = state.ctx;
    let (parts, body) = request.into_parts();
    let path_info = ctx.config.path_info(parts.uri.path()).to_owned();
    let reader = StreamReader::new(body.into_data_stream().map_err(io::Error::other));
    let request = InboundRequest::from_http(&parts, &path_info, RequestBody::Reader(Box::pin(reader)));
    let outcome = ctx.dispatch(request).await?;
    Ok(Json(outcome))
}

/// Missing header means no extra topics.
fn requested_topics(headers: &HeaderMap) -> Vec<String> {
    headers
        .get(TOPICS_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(topic::parse_list)
        .unwrap_or_default()
}

fn replay_cursor(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CACHE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Wait for one frame, then complete. Shutdown completes with `204`.
async fn long_poll(
    mut rx: mpsc::Receiver<OutboundFrame>,
    guard: ConnectionGuard,
    cancel: CancellationToken,
) -> Response {
    let frame = tokio::select! {
        frame = rx.recv() => frame,
        () = cancel.cancelled() => None,
    };
    drop(guard);

    let Some(frame) = frame else {
        return StatusCode::NO_CONTENT.into_response();
    };
    let mut response = String::clone(&frame.payload).into_response();
    let headers = response.headers_mut();
    let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let _ = headers.insert(HeaderName::from_static(CACHE_HEADER), HeaderValue::from(frame.seq));
    response
}

/// Chunked response, one envelope per line, until the client leaves or the
/// server shuts down.
fn stream(
    rx: mpsc::Receiver<OutboundFrame>,
    guard: ConnectionGuard,
    cancel: CancellationToken,
) -> Response {
    let lines = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let frame = rx.recv().await?;
        let mut line = String::with_capacity(frame.payload.len() + 1);
        line.push_str(&frame.payload);
        line.push('\n');
        Some((Ok::<_, Infallible>(Bytes::from(line)), (rx, guard)))
    })
    .take_until(cancel.cancelled_owned());

    let mut response = Body::from_stream(lines).into_response();
    let headers = response.headers_mut();
    let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
    let _ = headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}
