//! Bootstrap server: HTTP for the bootstrap page and static assets, and
//! the WebSocket endpoint update events go out on.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::error::Error as StdError;
use std::future::Future;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};
use tracing::{debug, error, info, warn};

use super::session::DevSession;
use crate::client::SOCKET_PATH;
use crate::compiler::{CommandTransform, Passthrough, SourceTransform};
use crate::config::DevConfig;
use crate::error::{HotpackError, Result};
use crate::graph::{FsRegenerator, Snapshot};
use crate::watcher::start_watching;

#[derive(Clone)]
struct AppState {
    session: Arc<DevSession>,
    port: u16,
    public_root: Arc<PathBuf>,
}

/// Bind the dev server socket before anything is served.
///
/// Tries `preferred` first and falls back to an ephemeral port when it is
/// taken. `0` always picks an ephemeral port. The bind is synchronous so the
/// port is known before the first bootstrap page is rendered.
pub fn bind_port(preferred: u16) -> Result<StdTcpListener> {
    let addr = |port| SocketAddr::from((Ipv4Addr::LOCALHOST, port));

    let listener = match StdTcpListener::bind(addr(preferred)) {
        Ok(listener) => listener,
        Err(e) if preferred != 0 => {
            warn!(port = preferred, error = %e, "preferred port unavailable, using a free one");
            StdTcpListener::bind(addr(0))?
        }
        Err(e) => return Err(e.into()),
    };
    debug!(port = listener.local_addr()?.port(), "port bound");
    Ok(listener)
}

/// Routes for one dev session.
pub fn router(session: Arc<DevSession>, port: u16, public_root: PathBuf) -> Router {
    let state = AppState {
        session,
        port,
        public_root: Arc::new(public_root),
    };

    Router::new()
        .route("/", get(bootstrap_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .route(SOCKET_PATH, get(ws_upgrade_handler))
        .fallback(static_asset_handler)
        .with_state(state)
}

/// Serve `session` on an already bound listener until `shutdown` resolves.
pub async fn serve(
    listener: StdTcpListener,
    session: Arc<DevSession>,
    public_root: PathBuf,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let port = listener.local_addr()?.port();
    listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(listener)?;

    let app = router(session, port, public_root);
    info!(port, "dev server listening on http://localhost:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Run a full dev session: bind, watch, serve, and stop on Ctrl-C or a fatal
/// socket error.
pub async fn start_dev_server(cwd: PathBuf, config: DevConfig, snapshot: Snapshot) -> Result<()> {
    let public_root = config.resolve_public_path(&cwd)?;
    let transform: Arc<dyn SourceTransform> = match &config.transformer.command {
        Some(command) => Arc::new(CommandTransform::parse(command)?),
        None => Arc::new(Passthrough),
    };
    let regenerator = Arc::new(FsRegenerator::new(&snapshot.modules)?);

    let session = Arc::new(DevSession::create(
        cwd.clone(),
        config.clone(),
        snapshot,
        regenerator,
        transform,
    )?);

    let listener = bind_port(config.dev_server_port)?;

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let _watcher = if config.watch_files {
        Some(start_watching(
            &config.watch_root(&cwd),
            config.exclude_pattern()?,
            config.stability_window(),
            Arc::clone(session.cache()),
            event_tx,
        )?)
    } else {
        info!("file watching disabled");
        drop(event_tx);
        None
    };

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve(
        listener,
        Arc::clone(&session),
        public_root,
        async move {
            let _ = stop_rx.await;
        },
    ));

    let outcome = Arc::clone(&session)
        .run(event_rx, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    session.dispose().await;
    let _ = stop_tx.send(());
    match server.await {
        Ok(Err(e)) => error!(error = %e, "server stopped with an error"),
        Err(e) => error!(error = %e, "server task failed"),
        Ok(Ok(())) => debug!("server stopped"),
    }

    outcome
}

async fn bootstrap_handler(State(state): State<AppState>) -> Response {
    match state.session.bootstrap_html(state.port) {
        Ok(html) => ([(header::CACHE_CONTROL, "no-store")], Html(html)).into_response(),
        Err(e) => {
            error!(error = %e, "failed to render bootstrap page");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn ws_upgrade_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.session))
}

/// One browser connection: frames queued by the broadcaster are written by
/// a dedicated task; the read side only watches for close and errors.
async fn handle_socket(socket: WebSocket, session: Arc<DevSession>) {
    let broadcaster = Arc::clone(session.broadcaster());
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();

    let conn = broadcaster.on_connect(client_tx).await;
    let conn_id = conn.conn_id;
    info!(conn_id, "client connected");

    let write_handle = tokio::spawn(async move {
        while let Some(frame) = client_rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                debug!(conn_id, "write loop closed");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) if is_abrupt_close(&e) => {
                debug!(conn_id, "client went away without a close frame");
                break;
            }
            Err(e) => {
                broadcaster.on_error(&conn, &e.to_string());
                write_handle.abort();
                return;
            }
        }
    }

    broadcaster.on_disconnect(&conn);
    write_handle.abort();
    info!(conn_id, "client disconnected");
}

/// A tab closed or a page reloaded mid-connection. Not a transport fault.
///
/// Walks the source chain, since axum wraps the underlying socket error.
fn is_abrupt_close(error: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(ws) = err.downcast_ref::<WsError>() {
            return match ws {
                WsError::ConnectionClosed
                | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
                WsError::Io(io) => is_reset(io.kind()),
                _ => false,
            };
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return is_reset(io.kind());
        }
        current = err.source();
    }
    false
}

fn is_reset(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
    )
}

/// Serve files under the public root. A directory maps to its
/// `index.html`; anything missing answers an empty 404.
async fn static_asset_handler(State(state): State<AppState>, uri: Uri) -> Response {
    let Some(path) = asset_path(&state.public_root, uri.path()) else {
        debug!(path = uri.path(), "rejected asset path");
        return StatusCode::NOT_FOUND.into_response();
    };

    let path = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_dir() => path.join("index.html"),
        _ => path,
    };

    match tokio::fs::read(&path).await {
        Ok(body) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.to_string())], body).into_response()
        }
        Err(source) => {
            let err = HotpackError::BootstrapIo { path, source };
            debug!(error = %err, "static asset unavailable");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Join a request path onto `root`, refusing anything that would climb out.
fn asset_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = Path::new(request_path.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(relative))
}
