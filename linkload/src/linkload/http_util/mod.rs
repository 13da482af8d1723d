//! Thin layer over the hyper client. Redirects are never followed: hyper's client doesn't
//! follow them, so a 3xx is what the caller gets back.

use std::time::{Duration, Instant};

use http::{HeaderMap, Request, StatusCode};
use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_tls::HttpsConnector;
use log::trace;
use thiserror::Error;
use tokio::time::timeout;

pub type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Client shared by setup and every iteration; clones share the connection pool.
pub fn client() -> HttpClient {
    Client::builder().build(HttpsConnector::new())
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request failed - {0}")]
    Transport(#[from] hyper::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl HttpError {
    /// Code used when tallying failures that never got a response.
    pub fn code(&self) -> &'static str {
        match self {
            HttpError::Transport(_) => "NETWORK_ERROR",
            HttpError::Timeout(_) => "TIMEOUT",
        }
    }
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A request and what came of it.
#[derive(Debug)]
pub struct Exchange {
    /// Time until the whole response was received, or until the request failed
    pub elapsed: Duration,
    pub response: Result<HttpResponse, HttpError>,
}

impl Exchange {
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().ok().map(|r| r.status.as_u16())
    }
}

/// Sends `request`, giving it `request_timeout` to produce a response.
pub async fn send(
    client: &HttpClient,
    request: Request<Body>,
    request_timeout: Duration,
) -> Exchange {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();
    let response = match timeout(request_timeout, client.request(request)).await {
        Ok(Ok(response)) => {
            let (parts, body) = response.into_parts();
            let remaining = request_timeout.saturating_sub(start.elapsed());
            //an unreadable body doesn't change the outcome, the status is already known
            let body = match timeout(remaining, hyper::body::to_bytes(body)).await {
                Ok(Ok(bytes)) => bytes,
                _ => Bytes::new(),
            };
            Ok(HttpResponse {
                status: parts.status,
                headers: parts.headers,
                body,
            })
        }
        Ok(Err(e)) => Err(HttpError::Transport(e)),
        Err(_) => Err(HttpError::Timeout(request_timeout)),
    };
    let elapsed = start.elapsed();
    trace!(
        "[send] - {} {} - status: {:?}, elapsed: {:?}",
        &method,
        &uri,
        response.as_ref().map(|r| r.status),
        &elapsed
    );
    Exchange { elapsed, response }
}
