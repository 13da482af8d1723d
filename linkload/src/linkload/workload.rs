use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common_types::{Phase, ResponseSample};
use http::{Method, Request};
use hyper::Body;
use linkload_http::lookup_url;
use linkload_metrics::RunStats;
use load_executor::Iteration;
use log::{debug, trace};
use response_assert::StatusCheck;
use tokio::time::sleep;

use crate::http_util::{send, HttpClient};
use crate::provisioner::LinkPool;

/// One lookup of a random pooled code per iteration. A 3xx or a 429 passes the check; anything
/// else fails it, but never the iteration.
pub struct RedirectProbe {
    client: HttpClient,
    base_url: String,
    pool: Arc<LinkPool>,
    check: StatusCheck,
    stats: Arc<RunStats>,
    request_timeout: Duration,
    pause: Duration,
}

impl RedirectProbe {
    /// `pool` must not be empty.
    pub fn new(
        client: HttpClient,
        base_url: &str,
        pool: Arc<LinkPool>,
        stats: Arc<RunStats>,
        request_timeout: Duration,
        pause: Duration,
    ) -> Self {
        RedirectProbe {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            pool,
            check: StatusCheck::redirect_or_rate_limited(),
            stats,
            request_timeout,
            pause,
        }
    }

    /// A code drawn uniformly at random from the pool.
    pub fn pick(&self) -> Option<&str> {
        if self.pool.is_empty() {
            return None;
        }
        self.pool
            .get(fastrand::usize(..self.pool.len()))
            .map(String::as_str)
    }

    async fn probe(&self, nth: u64, code: &str) {
        let request = match Request::builder()
            .method(Method::GET)
            .uri(lookup_url(&self.base_url, code))
            .body(Body::empty())
        {
            Ok(request) => request,
            Err(e) => {
                debug!("[RedirectProbe] - iteration {} - invalid lookup of '{}' - {}", nth, code, e);
                if let Err(e) = self.check.record(self.stats.as_ref(), None) {
                    trace!("[RedirectProbe] - iteration {} - {}", nth, e);
                }
                return;
            }
        };
        let exchange = send(&self.client, request, self.request_timeout).await;
        let status = exchange.status();
        self.stats
            .record_request(&ResponseSample::new(Phase::Iteration, status, exchange.elapsed));
        if let Err(e) = self.check.record(self.stats.as_ref(), status) {
            trace!("[RedirectProbe] - iteration {} - /{} - {}", nth, code, e);
        }
    }
}

#[async_trait]
impl Iteration for RedirectProbe {
    async fn run(&self, nth: u64) {
        if let Some(code) = self.pick() {
            self.probe(nth, code).await;
        }
        sleep(self.pause).await;
    }
}
