// packages/tracker/src/recording/uploader.rs
//! Batch upload to the remote collector
//!
//! One flush is one `POST` of a `{"events": [...]}` document with an
//! explicit `Content-Length`. The writer bounds each round trip with a
//! timeout; the uploader itself only reports what the transport and the
//! collector said.

use crate::utils::errors::{Result, TrackerError};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::fmt;
use std::future::Future;
use tracing::debug;

/// Outcome of a completed round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// HTTP status reported by the collector
    pub status: u16,

    /// Size of the response body (bytes)
    pub response_bytes: usize,
}

/// Delivers one serialized batch
pub trait Uploader: Send + Sync + 'static {
    /// Send `body` and wait for the round trip to complete
    fn upload(&self, body: Bytes) -> impl Future<Output = Result<UploadReceipt>> + Send;
}

/// Collector URI, fixed at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    uri: Uri,
}

impl Endpoint {
    /// Parse `base` and, if given, replace its path with `mount_path`
    ///
    /// Only plain `http` is supported by the bundled connector.
    pub fn derive(base: &str, mount_path: Option<&str>) -> Result<Self> {
        let uri: Uri = base
            .parse()
            .map_err(|e| TrackerError::InvalidEndpoint(format!("{}: {}", base, e)))?;

        match uri.scheme_str() {
            Some("http") => {}
            Some(other) => {
                return Err(TrackerError::InvalidEndpoint(format!(
                    "unsupported scheme \"{}\" in {}",
                    other, base
                )))
            }
            None => {
                return Err(TrackerError::InvalidEndpoint(format!("missing scheme in {}", base)))
            }
        }

        if uri.authority().is_none() {
            return Err(TrackerError::InvalidEndpoint(format!("missing host in {}", base)));
        }

        let uri = match mount_path {
            None => uri,
            Some(path) => {
                let path = if path.starts_with('/') {
                    path.to_string()
                } else {
                    format!("/{}", path)
                };
                let mut parts = uri.into_parts();
                parts.path_and_query = Some(path.parse().map_err(|e| {
                    TrackerError::InvalidEndpoint(format!("mount path {}: {}", path, e))
                })?);
                Uri::from_parts(parts)
                    .map_err(|e| TrackerError::InvalidEndpoint(format!("{}: {}", base, e)))?
            }
        };

        Ok(Self { uri })
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}

/// HTTP uploader
pub struct HttpUploader {
    endpoint: Endpoint,
    http_client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpUploader {
    /// Create a new HTTP uploader
    pub fn new(endpoint: Endpoint) -> Self {
        let http_client = Client::builder(TokioExecutor::new()).build_http();

        Self {
            endpoint,
            http_client,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn post(&self, body: Bytes) -> Result<UploadReceipt> {
        let body_len = body.len();
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.uri().clone())
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, body_len)
            .body(Full::new(body))
            .map_err(|e| TrackerError::UploadFailed(format!("Request build error: {}", e)))?;

        let response = self
            .http_client
            .request(request)
            .await
            .map_err(|e| TrackerError::UploadFailed(format!("Request error: {}", e)))?;

        let status = response.status();
        let response_body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TrackerError::UploadFailed(format!("Response body error: {}", e)))?
            .to_bytes();

        debug!(
            "Upload of {} bytes to {} answered {}",
            body_len, self.endpoint, status
        );

        if !status.is_success() {
            return Err(TrackerError::UploadRejected {
                status: status.as_u16(),
            });
        }

        Ok(UploadReceipt {
            status: status.as_u16(),
            response_bytes: response_body.len(),
        })
    }
}

impl Uploader for HttpUploader {
    fn upload(&self, body: Bytes) -> impl Future<Output = Result<UploadReceipt>> + Send {
        self.post(body)
    }
}
