//! HTTP server and method router.
//!
//! Standard WebDAV methods are delegated to the embedded `dav-server`
//! handler bound to the working tree; the four VC extension methods are
//! routed to the [`VcHandler`]. Both share one filesystem and one lock
//! system.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use dav_server::body::Body;
use dav_server::localfs::LocalFs;
use dav_server::ls::DavLockSystem;
use dav_server::memls::MemLs;
use dav_server::DavHandler;
use davvc_engine::VcStore;
use http::uri::{PathAndQuery, Uri};
use http::{Request, Response, StatusCode};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use log::{debug, error, info};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::config::{Config, DEFAULT_FS_PREFIX, DEFAULT_VC_PREFIX};
use crate::handler::{is_vc_method, VcHandler, VcOutcome};
use crate::logging;

/// Routes requests between the WebDAV engine and the VC handlers.
#[derive(Clone)]
struct Router {
    dav: DavHandler,
    vc: VcHandler,
}

impl Router {
    fn new(config: &Config) -> io::Result<Router> {
        let store = VcStore::open(
            &config.file_system_root,
            DEFAULT_FS_PREFIX,
            DEFAULT_VC_PREFIX,
            config.cache_size,
        )
        .map_err(io::Error::other)?;

        let fs = LocalFs::new(store.fs_root(), false, false, false);
        let locks: Box<dyn DavLockSystem> = MemLs::new();

        // The working tree is full of symlinks into the history tree by
        // design, so the WebDAV engine must follow them.
        let dav = DavHandler::builder()
            .filesystem(fs.clone())
            .locksystem(locks.clone())
            .hide_symlinks(false)
            .build_handler();

        let vc = VcHandler::new(store, fs, locks, "/".to_string());
        Ok(Router { dav, vc })
    }

    async fn route(&self, req: Request<hyper::body::Incoming>) -> Response<Body> {
        let req = strip_trailing_slash(req);
        let request_id = logging::next_request_id();
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let response = if is_vc_method(&method) {
            let outcome = self.vc.handle(&method, &path, req.headers()).await;
            logging::log_vc_outcome(request_id, &method, &path, outcome.error.as_ref());
            vc_response(outcome)
        } else {
            self.dav.handle(req).await
        };

        logging::log_request(
            request_id,
            &method,
            &path,
            response.status().as_u16(),
            started.elapsed(),
        );
        response
    }
}

/// Build the HTTP response for a VC outcome: status, headers, and the
/// status text as body (except for 204).
fn vc_response(outcome: VcOutcome) -> Response<Body> {
    let mut builder = Response::builder().status(outcome.status);
    if let Some(headers) = builder.headers_mut() {
        headers.extend(outcome.headers);
    }
    let body = if outcome.status == StatusCode::NO_CONTENT {
        Body::from(String::new())
    } else {
        Body::from(status_text(outcome.status).to_string())
    };
    builder
        .body(body)
        .unwrap_or_else(|_| Response::new(Body::from(String::new())))
}

fn status_text(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("")
}

/// Collapse trailing slashes in the request path before routing.
fn strip_trailing_slash<B>(req: Request<B>) -> Request<B> {
    let path = req.uri().path();
    if path.len() <= 1 || !path.ends_with('/') {
        return req;
    }

    let trimmed = path.trim_end_matches('/');
    let new_path = if trimmed.is_empty() { "/" } else { trimmed };
    let path_and_query = match req.uri().query() {
        Some(query) => format!("{new_path}?{query}"),
        None => new_path.to_string(),
    };
    let Ok(path_and_query) = path_and_query.parse::<PathAndQuery>() else {
        return req;
    };

    let mut uri_parts = req.uri().clone().into_parts();
    uri_parts.path_and_query = Some(path_and_query);
    let Ok(uri) = Uri::from_parts(uri_parts) else {
        return req;
    };

    let (mut parts, body) = req.into_parts();
    parts.uri = uri;
    Request::from_parts(parts, body)
}

fn spawn_connection(router: Router, stream: TcpStream, read_timeout: Duration) {
    let io = TokioIo::new(stream);
    tokio::spawn(async move {
        if let Err(err) = http1::Builder::new()
            .timer(TokioTimer::new())
            .header_read_timeout(read_timeout)
            .serve_connection(
                io,
                service_fn(move |req| {
                    let router = router.clone();
                    async move { Ok::<_, Infallible>(router.route(req).await) }
                }),
            )
            .await
        {
            error!("Connection error: {:?}", err);
        }
    });
}

/// Running background server handle.
pub struct DavVcServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl DavVcServer {
    /// The server's listen address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL clients can mount.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Shut down the server.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Start the server and block until ctrl-c.
pub async fn serve(config: Config) -> io::Result<()> {
    let router = Router::new(&config)?;
    let read_timeout = Duration::from_secs(config.read_timeout_seconds);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!("WebDAV server listening on http://{}", local_addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, remote_addr)) => {
                        debug!("Connection from {}", remote_addr);
                        spawn_connection(router.clone(), stream, read_timeout);
                    }
                    Err(err) => {
                        error!("Accept error: {:?}", err);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("WebDAV server shutting down");
                return Ok(());
            }
        }
    }
}

/// Start the server in the background on the loopback interface.
///
/// Returns a handle exposing the bound address; pass port 0 to let the
/// kernel pick one.
pub async fn serve_background(config: Config) -> io::Result<DavVcServer> {
    let router = Router::new(&config)?;
    let read_timeout = Duration::from_secs(config.read_timeout_seconds);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    info!("WebDAV server started on http://{}", local_addr);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote_addr)) => {
                            debug!("Connection from {}", remote_addr);
                            spawn_connection(router.clone(), stream, read_timeout);
                        }
                        Err(err) => {
                            error!("Accept error: {:?}", err);
                        }
                    }
                }
                _ = &mut shutdown_rx => {
                    info!("WebDAV server shutting down");
                    break;
                }
            }
        }
    });

    Ok(DavVcServer {
        addr: local_addr,
        shutdown_tx: Some(shutdown_tx),
    })
}
