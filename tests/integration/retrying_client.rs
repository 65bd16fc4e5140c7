//! Retry behavior of the HTTP client against a mock server

use pretty_assertions::assert_eq;
use reqwest::Method;
use std::time::{Duration, Instant};
use test_log::test;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::fixtures::{retrying_client, test_config};
use crate::common::logging::{init_test_logging, log_test_step};
use crate::common::raw_server::{json_head, serve_once};
use bronze_ingest::api::{RetryPolicy, RetryingHttpClient};

#[test(tokio::test)]
async fn test_retries_until_success() {
    init_test_logging();
    log_test_step("[503, 503, 200] ends with the 200");

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let client = retrying_client(3);
    let response = client
        .execute(Method::GET, &format!("{}/query", server.uri()), &[])
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[test(tokio::test)]
async fn test_returns_last_retriable_response_when_budget_is_spent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&server)
        .await;

    let client = retrying_client(3);
    let response = client.execute(Method::GET, &server.uri(), &[]).await.unwrap();

    assert_eq!(response.status().as_u16(), 503);
}

#[test(tokio::test)]
async fn test_non_retriable_status_is_returned_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let response = retrying_client(3).execute(Method::GET, &server.uri(), &[]).await.unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[test(tokio::test)]
async fn test_query_params_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("function", "SYMBOL_SEARCH"))
        .and(query_param("keywords", "tesco"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let response = retrying_client(0)
        .execute(
            Method::GET,
            &server.uri(),
            &[("function", "SYMBOL_SEARCH"), ("keywords", "tesco")],
        )
        .await
        .unwrap();
    assert!(response.status().is_success());
}

#[test(tokio::test)]
async fn test_transport_error_after_all_attempts() {
    // Bind then drop so nothing listens on the port.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = RetryingHttpClient::new(
        reqwest::Client::new(),
        RetryPolicy::new(2, Duration::from_millis(20), Duration::ZERO),
    );

    let started = Instant::now();
    let err = client
        .execute(Method::GET, &format!("http://{addr}/query"), &[("apikey", "secret")])
        .await
        .unwrap_err();

    // Two sleeps between three attempts.
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert!(err.url().is_none());
    assert!(!err.to_string().contains("secret"));
}

#[test(tokio::test)]
async fn test_refused_connection_then_success() {
    log_test_step("First attempt is refused, a later one gets a 200");

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    // Comes up while the client sleeps before its second attempt.
    let server = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        serve_once(listener, json_head(2), vec!["{}"], Duration::ZERO).await;
    });

    let client = RetryingHttpClient::new(
        reqwest::Client::new(),
        RetryPolicy::new(3, Duration::from_millis(300), Duration::ZERO),
    );

    let started = Instant::now();
    let response = client
        .execute(Method::GET, &format!("http://{addr}/query"), &[])
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "{}");
    // At least one retry sleep happened.
    assert!(started.elapsed() >= Duration::from_millis(300));
    server.await.unwrap();
}

#[test(tokio::test)]
async fn test_read_gap_longer_than_read_timeout_fails() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_once(
        listener,
        json_head(4),
        vec!["{\"a", "\"}"],
        Duration::from_millis(2500),
    ));

    let mut config = test_config(&format!("http://{addr}"), std::env::temp_dir());
    config.read_timeout_secs = 1;
    config.http_retries = 0;
    let client = RetryingHttpClient::from_config(&config).unwrap();

    let response = client
        .execute(Method::GET, &format!("http://{addr}/query"), &[])
        .await
        .unwrap();
    assert!(response.bytes().await.is_err());
}
