#[cfg(test)]
mod tests {
    use common_env::Config;
    use env_logger::Env;
    use httpmock::prelude::*;
    use httpmock::MockServer;
    use linkload::scenario::run;
    use linkload::Error;
    use linkload_metrics::RunStats;
    use load_executor::TokioRunner;
    use log::info;
    use response_assert::{CHECK_CREATE_SUCCEEDED, CHECK_REDIRECT_RETURNED};
    use rstest::rstest;
    use secrecy::SecretString;
    use serde_json::json;
    use std::sync::{Arc, Once};
    use std::time::Duration;

    pub static CREATE_PATH: &str = "/api/v1/links";

    static ONCE: Once = Once::new();
    fn init_logger() {
        ONCE.call_once(|| {
            env_logger::Builder::from_env(Env::default().default_filter_or("info"))
                .format_timestamp_millis()
                .init();
        });
    }

    fn config(server: &MockServer, pool_size: usize, iterations: u64) -> Config {
        Config {
            base_url: server.base_url(),
            api_key: Some(SecretString::from("integration-key".to_string())),
            pool_size,
            iterations: Some(iterations),
            pre_allocated_workers: 4,
            max_workers: 4,
            iteration_pause: Duration::from_millis(1),
            request_timeout: Duration::from_secs(5),
            max_p95: Duration::from_secs(2),
            ..Config::default()
        }
    }

    /// One creation mock per seed, answering with `codes[seed]`
    async fn mock_creations<'a>(server: &'a MockServer, codes: &[&str]) -> Vec<httpmock::Mock<'a>> {
        let mut mocks = vec![];
        for (seed, code) in codes.iter().enumerate() {
            let mock = server
                .mock_async(|when, then| {
                    when.method(POST)
                        .path(CREATE_PATH)
                        .header("X-API-Key", "integration-key")
                        .json_body(json!({ "url": format!("https://example.com/?seed={}", seed) }));
                    then.status(201).json_body(json!({
                        "code": code,
                        "short_url": format!("{}/{}", server.base_url(), code),
                        "long_url": format!("https://example.com/?seed={}", seed),
                        "is_active": true
                    }));
                })
                .await;
            mocks.push(mock);
        }
        mocks
    }

    #[rstest]
    #[case(1)]
    #[case(5)]
    #[case(20)]
    #[tokio::test(flavor = "multi_thread")]
    async fn provisions_n_distinct_codes(#[case] pool_size: usize) {
        init_logger();
        let server = MockServer::start_async().await;
        let codes = (0..pool_size)
            .map(|i| format!("code{:03}", i))
            .collect::<Vec<_>>();
        let code_refs = codes.iter().map(String::as_str).collect::<Vec<_>>();
        let creations = mock_creations(&server, &code_refs).await;
        let lookups = server
            .mock_async(|when, then| {
                when.method(GET).path_contains("/code");
                then.status(302).header("Location", "https://example.com/");
            })
            .await;

        let stats = Arc::new(RunStats::new("redirects").unwrap());
        let outcome = run(
            &TokioRunner::new(stats.clone()),
            &config(&server, pool_size, 30),
            stats.clone(),
        )
        .await
        .unwrap();

        for mock in creations {
            mock.assert_async().await;
        }
        lookups.assert_hits_async(30).await;
        assert_eq!(stats.check_counts(CHECK_CREATE_SUCCEEDED), (pool_size as u64, 0));
        assert_eq!(stats.check_counts(CHECK_REDIRECT_RETURNED), (30, 0));
        assert!(outcome.summary.thresholds_passed());
    }

    /// Single pooled code, the target always redirects.
    #[tokio::test(flavor = "multi_thread")]
    async fn scenario_a_single_code_always_redirected() {
        init_logger();
        let server = MockServer::start_async().await;
        mock_creations(&server, &["abc123"]).await;
        let landing = server
            .mock_async(|when, then| {
                when.method(GET).path("/landing");
                then.status(200);
            })
            .await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(GET).path("/abc123");
                then.status(302).header("Location", server.url("/landing"));
            })
            .await;

        let stats = Arc::new(RunStats::new("redirects").unwrap());
        let outcome = run(
            &TokioRunner::new(stats.clone()),
            &config(&server, 1, 50),
            stats.clone(),
        )
        .await
        .unwrap();
        info!("summary:\n{}", &outcome.summary);

        lookup.assert_hits_async(50).await;
        landing.assert_hits_async(0).await;
        let check = outcome
            .summary
            .checks
            .iter()
            .find(|c| c.name == CHECK_REDIRECT_RETURNED)
            .unwrap();
        assert_eq!((check.passes, check.fails), (50, 0));
        assert_eq!(outcome.summary.http_req_failed.hits, 0);
        assert!(outcome.summary.thresholds_passed());
    }

    /// Rate limited lookups pass the check but count as failed requests.
    #[tokio::test(flavor = "multi_thread")]
    async fn scenario_b_rate_limited_lookups() {
        init_logger();
        let server = MockServer::start_async().await;
        mock_creations(&server, &["a1", "b2"]).await;
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(429)
                    .header("Retry-After", "1")
                    .delay(Duration::from_millis(30));
            })
            .await;

        let stats = Arc::new(RunStats::new("redirects").unwrap());
        let mut config = config(&server, 2, 20);
        config.max_p95 = Duration::from_millis(10);
        let outcome = run(&TokioRunner::new(stats.clone()), &config, stats.clone())
            .await
            .unwrap();
        info!("summary:\n{}", &outcome.summary);

        assert_eq!(stats.check_counts(CHECK_REDIRECT_RETURNED), (20, 0));
        assert_eq!(outcome.summary.http_req_failed.hits, 20);
        assert_eq!(outcome.summary.http_req_failed.total, 22);
        let mut failed = outcome
            .summary
            .failed_thresholds()
            .map(|t| t.metric.as_str())
            .collect::<Vec<_>>();
        failed.sort_unstable();
        assert_eq!(failed, vec!["http_req_duration", "http_req_failed"]);
    }

    /// A 200 on lookup is a successful request, yet not the redirect the check wants.
    #[tokio::test(flavor = "multi_thread")]
    async fn ok_lookups_fail_check_only() {
        init_logger();
        let server = MockServer::start_async().await;
        mock_creations(&server, &["p1", "p2"]).await;
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(200).body("<html>landing</html>");
            })
            .await;

        let stats = Arc::new(RunStats::new("redirects").unwrap());
        let outcome = run(
            &TokioRunner::new(stats.clone()),
            &config(&server, 2, 20),
            stats.clone(),
        )
        .await
        .unwrap();

        assert_eq!(stats.check_counts(CHECK_REDIRECT_RETURNED), (0, 20));
        assert_eq!(outcome.summary.http_req_failed.hits, 0);
        assert!(outcome.summary.thresholds_passed());
    }

    /// 404s fail the check and push the failure rate over its threshold.
    #[tokio::test(flavor = "multi_thread")]
    async fn scenario_c_not_found_lookups() {
        init_logger();
        let server = MockServer::start_async().await;
        mock_creations(&server, &["live", "dead"]).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/live");
                then.status(301).header("Location", "https://example.com/");
            })
            .await;
        let dead = server
            .mock_async(|when, then| {
                when.method(GET).path("/dead");
                then.status(404)
                    .json_body(json!({ "error": { "code": "NOT_FOUND", "message": "no such link" } }));
            })
            .await;

        let stats = Arc::new(RunStats::new("redirects").unwrap());
        let outcome = run(
            &TokioRunner::new(stats.clone()),
            &config(&server, 2, 200),
            stats.clone(),
        )
        .await
        .unwrap();
        info!("summary:\n{}", &outcome.summary);

        let not_found = dead.hits_async().await as u64;
        assert!(not_found > 0);
        let (passes, fails) = stats.check_counts(CHECK_REDIRECT_RETURNED);
        assert_eq!(fails, not_found);
        assert_eq!(passes + fails, 200);
        assert_eq!(outcome.summary.http_req_failed.hits, not_found);
        assert_eq!(outcome.summary.http_req_failed.total, 202);
        assert!(!outcome.summary.thresholds_passed());
        assert!(outcome
            .summary
            .failed_thresholds()
            .any(|t| t.metric == "http_req_failed"));
    }

    /// Nothing to provision aborts the run before any lookup.
    #[tokio::test(flavor = "multi_thread")]
    async fn scenario_d_empty_pool_aborts() {
        init_logger();
        let server = MockServer::start_async().await;
        let any = server
            .mock_async(|when, then| {
                when.path_contains("/");
                then.status(302);
            })
            .await;

        let stats = Arc::new(RunStats::new("redirects").unwrap());
        let result = run(
            &TokioRunner::new(stats.clone()),
            &config(&server, 0, 10),
            stats.clone(),
        )
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, Error::ProvisioningExhausted { requested: 0 }));
        assert_eq!(err.exit_code(), linkload::EXIT_SETUP_FAILED);
        any.assert_hits_async(0).await;
        assert_eq!(stats.metrics().iteration_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_api_key_sends_nothing() {
        init_logger();
        let server = MockServer::start_async().await;
        let any = server
            .mock_async(|when, then| {
                when.path_contains("/");
                then.status(201).json_body(json!({ "code": "x" }));
            })
            .await;
        let mut config = config(&server, 3, 10);
        config.api_key = None;

        let stats = Arc::new(RunStats::new("redirects").unwrap());
        let err = run(&TokioRunner::new(stats.clone()), &config, stats)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), linkload::EXIT_INVALID_CONFIG);
        any.assert_hits_async(0).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn every_creation_failing_skips_workload() {
        init_logger();
        let server = MockServer::start_async().await;
        let creations = server
            .mock_async(|when, then| {
                when.method(POST).path(CREATE_PATH);
                then.status(503);
            })
            .await;
        let lookups = server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(302);
            })
            .await;

        let stats = Arc::new(RunStats::new("redirects").unwrap());
        let err = run(
            &TokioRunner::new(stats.clone()),
            &config(&server, 5, 10),
            stats.clone(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ProvisioningExhausted { requested: 5 }));
        creations.assert_hits_async(5).await;
        lookups.assert_hits_async(0).await;
        assert_eq!(stats.check_counts(CHECK_CREATE_SUCCEEDED), (0, 5));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn arrival_rate_run() {
        init_logger();
        let server = MockServer::start_async().await;
        mock_creations(&server, &["x1", "x2", "x3"]).await;
        let lookups = server
            .mock_async(|when, then| {
                when.method(GET).path_contains("/x");
                then.status(307).header("Location", "https://example.com/");
            })
            .await;

        let mut config = config(&server, 3, 0);
        config.iterations = None;
        config.rate = 40;
        config.pre_allocated_workers = 10;
        config.max_workers = 20;
        config.duration = Duration::from_secs(2);
        config.graceful_stop = Duration::from_secs(5);

        let stats = Arc::new(RunStats::new("redirects").unwrap());
        let outcome = run(&TokioRunner::new(stats.clone()), &config, stats.clone())
            .await
            .unwrap();
        info!("summary:\n{}", &outcome.summary);

        assert_eq!(outcome.summary.executor, "constant-arrival-rate");
        assert_eq!(outcome.report.started, 80);
        assert_eq!(outcome.report.dropped, 0);
        lookups.assert_hits_async(80).await;
        assert!(outcome.summary.thresholds_passed());
    }
}
