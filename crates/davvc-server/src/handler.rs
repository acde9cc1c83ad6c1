//! VC method handlers.
//!
//! Every handler runs the gatekeeper first: strip the server prefix, stat
//! the target through the WebDAV filesystem, reject collections, record the
//! ETag. Mutating methods then take a per-path lock from the WebDAV lock
//! system for the span of the repository operation.

use std::time::UNIX_EPOCH;

use dav_server::davpath::DavPath;
use dav_server::fs::{DavFileSystem, FsError};
use dav_server::ls::DavLockSystem;
use davvc_engine::{VcError, VcStore};
use http::header::{HeaderMap, HeaderName, HeaderValue, ALLOW, ETAG};
use http::{Method, StatusCode};
use thiserror::Error;

pub const METHOD_VERSION_CONTROL: &str = "VERSION-CONTROL";
pub const METHOD_CHECKOUT: &str = "CHECKOUT";
pub const METHOD_CHECKIN: &str = "CHECKIN";
pub const METHOD_UNCHECKOUT: &str = "UNCHECKOUT";

const CHECKIN_ALLOW: &str = "GET, UNCHECKOUT, VERSION-CONTROL";

/// True for the four version control extension methods.
pub fn is_vc_method(method: &Method) -> bool {
    matches!(
        method.as_str(),
        METHOD_VERSION_CONTROL | METHOD_CHECKOUT | METHOD_CHECKIN | METHOD_UNCHECKOUT
    )
}

/// Internal error behind a VC response. Logged through the outcome
/// callback, never echoed to the client.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("prefix mismatch")]
    PrefixMismatch,

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("method not allowed for collection")]
    Collection,

    #[error("filesystem metadata error: {0:?}")]
    Metadata(FsError),

    #[error(transparent)]
    Vc(#[from] VcError),
}

/// Result of a VC method: the response status, its headers, and the
/// internal error if the handler failed.
pub struct VcOutcome {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub error: Option<HandlerError>,
}

impl VcOutcome {
    fn ok(status: StatusCode, headers: HeaderMap) -> VcOutcome {
        VcOutcome {
            status,
            headers,
            error: None,
        }
    }

    fn fail(status: StatusCode, headers: HeaderMap, error: HandlerError) -> VcOutcome {
        VcOutcome {
            status,
            headers,
            error: Some(error),
        }
    }
}

/// Handler state for the four VC methods.
///
/// The filesystem and lock system are the same instances the embedded
/// WebDAV engine uses, so VC locks and client LOCK/UNLOCK contend on one
/// registry.
#[derive(Clone)]
pub struct VcHandler {
    store: VcStore,
    fs: Box<dyn DavFileSystem>,
    locks: Box<dyn DavLockSystem>,
    prefix: String,
}

impl VcHandler {
    pub fn new(
        store: VcStore,
        fs: Box<dyn DavFileSystem>,
        locks: Box<dyn DavLockSystem>,
        prefix: String,
    ) -> VcHandler {
        VcHandler {
            store,
            fs,
            locks,
            prefix,
        }
    }

    /// Dispatch a VC method against a request URL path.
    pub async fn handle(
        &self,
        method: &Method,
        uri_path: &str,
        request_headers: &HeaderMap,
    ) -> VcOutcome {
        match method.as_str() {
            METHOD_VERSION_CONTROL => self.version_control(uri_path).await,
            METHOD_CHECKOUT => self.checkout(uri_path, request_headers).await,
            METHOD_CHECKIN => self.checkin(uri_path).await,
            METHOD_UNCHECKOUT => self.uncheckout(uri_path).await,
            _ => VcOutcome::ok(StatusCode::BAD_REQUEST, HeaderMap::new()),
        }
    }

    async fn version_control(&self, uri_path: &str) -> VcOutcome {
        let mut headers = HeaderMap::new();
        let (rel, _) = match self.check_file(uri_path, &mut headers).await {
            Ok(resolved) => resolved,
            Err((status, error)) => return VcOutcome::fail(status, headers, error),
        };

        // No per-path lock here: provisioning races resolve through the
        // first-writer-wins directory creation in the store.
        match self.store.version_control(&rel) {
            Ok(version) => {
                set_version_header(&mut headers, &version);
                VcOutcome::ok(StatusCode::OK, headers)
            }
            Err(err) => {
                VcOutcome::fail(StatusCode::INTERNAL_SERVER_ERROR, headers, err.into())
            }
        }
    }

    async fn checkout(&self, uri_path: &str, request_headers: &HeaderMap) -> VcOutcome {
        let mut headers = HeaderMap::new();
        let (rel, dav_path) = match self.check_file(uri_path, &mut headers).await {
            Ok(resolved) => resolved,
            Err((status, error)) => return VcOutcome::fail(status, headers, error),
        };
        let _guard = match self.lock_path(&dav_path) {
            Ok(guard) => guard,
            Err(status) => return VcOutcome::ok(status, headers),
        };

        let version = request_headers
            .get("version")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        match self.store.checkout(&rel, version) {
            Ok(()) => VcOutcome::ok(StatusCode::OK, headers),
            Err(VcError::UnknownVersion(_)) => {
                VcOutcome::ok(StatusCode::NOT_ACCEPTABLE, headers)
            }
            Err(err) => {
                VcOutcome::fail(StatusCode::INTERNAL_SERVER_ERROR, headers, err.into())
            }
        }
    }

    async fn checkin(&self, uri_path: &str) -> VcOutcome {
        let mut headers = HeaderMap::new();
        let (rel, dav_path) = match self.check_file(uri_path, &mut headers).await {
            Ok(resolved) => resolved,
            Err((status, error)) => return VcOutcome::fail(status, headers, error),
        };
        let _guard = match self.lock_path(&dav_path) {
            Ok(guard) => guard,
            Err(status) => return VcOutcome::ok(status, headers),
        };

        match self.store.checkin(&rel) {
            Ok(version) => {
                set_version_header(&mut headers, &version);
                VcOutcome::ok(StatusCode::CREATED, headers)
            }
            Err(VcError::CheckedOut) => {
                headers.insert(ALLOW, HeaderValue::from_static(CHECKIN_ALLOW));
                VcOutcome::ok(StatusCode::METHOD_NOT_ALLOWED, headers)
            }
            Err(err) => {
                VcOutcome::fail(StatusCode::INTERNAL_SERVER_ERROR, headers, err.into())
            }
        }
    }

    async fn uncheckout(&self, uri_path: &str) -> VcOutcome {
        let mut headers = HeaderMap::new();
        let (rel, dav_path) = match self.check_file(uri_path, &mut headers).await {
            Ok(resolved) => resolved,
            Err((status, error)) => return VcOutcome::fail(status, headers, error),
        };
        let _guard = match self.lock_path(&dav_path) {
            Ok(guard) => guard,
            Err(status) => return VcOutcome::ok(status, headers),
        };

        match self.store.uncheckout(&rel) {
            Ok(()) => VcOutcome::ok(StatusCode::OK, headers),
            Err(err) => {
                VcOutcome::fail(StatusCode::INTERNAL_SERVER_ERROR, headers, err.into())
            }
        }
    }

    /// Gatekeeper: resolve the request URL to a `/`-rooted working-tree
    /// path. Stats the target through the WebDAV filesystem abstraction,
    /// never writes, and holds nothing open past its return.
    async fn check_file(
        &self,
        uri_path: &str,
        headers: &mut HeaderMap,
    ) -> Result<(String, DavPath), (StatusCode, HandlerError)> {
        let stripped = self
            .strip_prefix(uri_path)
            .ok_or((StatusCode::NOT_FOUND, HandlerError::PrefixMismatch))?;

        let dav_path = DavPath::new(&stripped).map_err(|_| {
            (
                StatusCode::NOT_FOUND,
                HandlerError::NotFound(stripped.clone()),
            )
        })?;

        let meta = self.fs.metadata(&dav_path).await.map_err(|_| {
            (
                StatusCode::NOT_FOUND,
                HandlerError::NotFound(stripped.clone()),
            )
        })?;
        if meta.is_dir() {
            return Err((StatusCode::METHOD_NOT_ALLOWED, HandlerError::Collection));
        }

        let etag = match meta.etag() {
            Some(tag) => format!("\"{}\"", tag.trim_matches('"')),
            None => {
                // Fall through to a fingerprint derived from mtime and size.
                let modified = meta.modified().map_err(|err| {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        HandlerError::Metadata(err),
                    )
                })?;
                let nanos = modified
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_nanos();
                format!("\"{:x}{:x}\"", nanos, meta.len())
            }
        };
        if let Ok(value) = HeaderValue::from_str(&etag) {
            headers.insert(ETAG, value);
        }

        // The decoded `/`-rooted form is what the VC store keys on.
        let rel = format!(
            "/{}",
            dav_path
                .as_rel_ospath()
                .to_string_lossy()
                .trim_start_matches('/')
        );
        Ok((rel, dav_path))
    }

    /// Strip the configured server prefix, keeping the result `/`-rooted.
    fn strip_prefix(&self, uri_path: &str) -> Option<String> {
        if self.prefix.is_empty() || self.prefix == "/" {
            return Some(uri_path.to_string());
        }
        let rest = uri_path.strip_prefix(&self.prefix)?;
        if rest.starts_with('/') {
            Some(rest.to_string())
        } else {
            Some(format!("/{rest}"))
        }
    }

    /// Take an exclusive, infinite-duration, zero-depth lock on the request
    /// path. The returned guard releases on drop, so every handler exit
    /// path unlocks. A conflicting lock maps to 423.
    fn lock_path(&self, dav_path: &DavPath) -> Result<PathLock, StatusCode> {
        match self.locks.lock(dav_path, None, None, None, false, false) {
            Ok(lock) => Ok(PathLock {
                locks: self.locks.clone(),
                path: dav_path.clone(),
                token: lock.token,
            }),
            Err(_conflict) => Err(StatusCode::LOCKED),
        }
    }
}

/// RAII per-path lock held for the span of a VC mutation.
struct PathLock {
    locks: Box<dyn DavLockSystem>,
    path: DavPath,
    token: String,
}

impl Drop for PathLock {
    fn drop(&mut self) {
        let _ = self.locks.unlock(&self.path, &self.token);
    }
}

fn set_version_header(headers: &mut HeaderMap, version: &str) {
    if let Ok(value) = HeaderValue::from_str(version) {
        headers.insert(HeaderName::from_static("version"), value);
    }
}
