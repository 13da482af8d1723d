//! Setup phase: create the pool of short links every iteration draws from.

use std::collections::BTreeMap;

use common_env::{Config, ConfigError, ENV_NAME_API_KEY};
use common_types::{Phase, ResponseSample};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, Request};
use hyper::Body;
use linkload_http::{
    create_link_url, ApiError, CreateLinkRequest, CreatedLink, CONTENT_TYPE_JSON, HEADER_API_KEY,
    HEADER_RATE_LIMIT_REMAINING,
};
use linkload_metrics::RunStats;
use log::{debug, info, warn};
use response_assert::StatusCheck;

use crate::http_util::{send, HttpClient, HttpResponse};
use crate::Error;

const CODE_INVALID_BODY: &str = "INVALID_BODY";

/// Short codes, in creation order. Read-only once provisioning returns.
pub type LinkPool = Vec<String>;

/// Creates up to `config.pool_size` links, one after another, with no retries.
///
/// A failed creation is recorded and skipped. Fails without sending anything if the API key is
/// missing, and with [`Error::ProvisioningExhausted`] if not a single link was created.
pub async fn provision(
    client: &HttpClient,
    config: &Config,
    stats: &RunStats,
) -> Result<LinkPool, Error> {
    let api_key = HeaderValue::from_str(config.api_key()?).map_err(|e| ConfigError::Invalid {
        name: ENV_NAME_API_KEY,
        value: "[REDACTED]".to_string(),
        reason: e.to_string(),
    })?;
    let url = create_link_url(&config.base_url);
    let check = StatusCheck::created_or_ok();
    let mut pool = Vec::with_capacity(config.pool_size);
    let mut failures: BTreeMap<String, u32> = BTreeMap::new();

    info!(
        "[provision] - creating {} links at {}",
        config.pool_size, &url
    );
    for seed in 0..config.pool_size {
        let request = create_request(&url, &api_key, seed)?;
        let exchange = send(client, request, config.request_timeout).await;
        let status = exchange.status();
        stats.record_request(&ResponseSample::new(Phase::Setup, status, exchange.elapsed));

        let outcome = match (&exchange.response, check.record(stats, status)) {
            (Ok(response), Ok(())) => extract_code(response),
            (Ok(response), Err(e)) => {
                debug!("[provision] - link {} - {}", seed, e);
                Err(rejected(seed, response))
            }
            (Err(e), _) => {
                debug!("[provision] - link {} - {}", seed, e);
                Err(e.code().to_string())
            }
        };
        match outcome {
            Ok(code) => pool.push(code),
            Err(code) => *failures.entry(code).or_default() += 1,
        }
    }

    if pool.len() < config.pool_size {
        warn!(
            "[provision] - created {} of {} requested links, failures: {:?}",
            pool.len(),
            config.pool_size,
            &failures
        );
    }
    if pool.is_empty() {
        return Err(Error::ProvisioningExhausted {
            requested: config.pool_size,
        });
    }
    info!("[provision] - link pool ready with {} codes", pool.len());
    Ok(pool)
}

fn create_request(url: &str, api_key: &HeaderValue, seed: usize) -> Result<Request<Body>, Error> {
    let body = serde_json::to_vec(&CreateLinkRequest::seeded(seed))?;
    Request::builder()
        .method(Method::POST)
        .uri(url)
        .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
        .header(HEADER_API_KEY, api_key.clone())
        .body(Body::from(body))
        .map_err(|e| {
            Error::Configuration(ConfigError::Invalid {
                name: common_env::ENV_NAME_BASE_URL,
                value: url.to_string(),
                reason: e.to_string(),
            })
        })
}

/// The created link's code, or the failure code if the body has no usable `code`.
fn extract_code(response: &HttpResponse) -> Result<String, String> {
    match serde_json::from_slice::<CreatedLink>(&response.body) {
        Ok(link) if !link.code.is_empty() => Ok(link.code),
        Ok(_) => Err(CODE_INVALID_BODY.to_string()),
        Err(e) => {
            debug!("[provision] - unusable creation response - {}", e);
            Err(CODE_INVALID_BODY.to_string())
        }
    }
}

fn rejected(seed: usize, response: &HttpResponse) -> String {
    let status = response.status.as_u16();
    let error = ApiError::from_response(status, &response.body);
    match response
        .headers
        .get(HEADER_RATE_LIMIT_REMAINING)
        .and_then(|v| v.to_str().ok())
    {
        Some(remaining) => debug!(
            "[provision] - link {} - status: {}, error: {}, rate limit remaining: {}",
            seed, status, &error, remaining
        ),
        None => debug!(
            "[provision] - link {} - status: {}, error: {}",
            seed, status, &error
        ),
    }
    error.code
}
