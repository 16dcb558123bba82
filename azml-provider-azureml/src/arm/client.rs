//! HTTP client for Azure Resource Manager
//!
//! Every request carries a bearer token and the `api-version` query
//! parameter. Writes that answer with an `Azure-AsyncOperation` or `Location`
//! header are long-running operations and are polled to completion.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use tokio::time::{Instant, sleep};

use super::auth::TokenCredential;
use super::error::ArmError;

/// Public cloud Resource Manager endpoint
pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";

const AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";
const LOCATION: &str = "location";

/// Throttled requests are retried this many times
const MAX_THROTTLE_RETRIES: u32 = 3;

/// Client for ARM REST calls
#[derive(Clone)]
pub struct ArmClient {
    http: reqwest::Client,
    endpoint: String,
    credential: Arc<dyn TokenCredential>,
    poll_interval: Duration,
}

/// How a long-running operation reports progress
#[derive(Debug, Clone, PartialEq)]
enum Lro {
    AsyncOperation(String),
    Location(String),
}

impl ArmClient {
    pub fn new(endpoint: impl Into<String>, credential: Arc<dyn TokenCredential>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            credential,
            poll_interval: Duration::from_secs(10),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.endpoint, path)
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, ArmError> {
        let mut attempt = 0;
        loop {
            let token = self.credential.token().await?;
            let mut request = self
                .http
                .request(method.clone(), url)
                .bearer_auth(token)
                .query(query);
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!("{} {}", method, url);
            let response = request.send().await?;
            if response.status() == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_THROTTLE_RETRIES
            {
                attempt += 1;
                let wait = retry_after(response.headers()).unwrap_or(self.poll_interval);
                warn!("Request throttled, retrying in {:?}", wait);
                sleep(wait).await;
                continue;
            }
            return Ok(response);
        }
    }

    async fn error_from(response: reqwest::Response) -> ArmError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ArmError::from_response(status, &body)
    }

    async fn json_body(response: reqwest::Response) -> Result<serde_json::Value, ArmError> {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ArmError::InvalidResponse(e.to_string()))
    }

    /// GET a resource; `None` when it does not exist
    pub async fn get(
        &self,
        path: &str,
        api_version: &str,
    ) -> Result<Option<serde_json::Value>, ArmError> {
        let response = self
            .send(
                Method::GET,
                &self.url(path),
                &[("api-version", api_version)],
                None,
            )
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(Self::json_body(response).await?)),
            _ => Err(Self::error_from(response).await),
        }
    }

    /// PUT a resource and wait for it to be provisioned; returns the final resource body
    pub async fn put(
        &self,
        path: &str,
        api_version: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, ArmError> {
        self.write(Method::PUT, path, api_version, body, timeout)
            .await
    }

    /// PATCH a resource and wait for it to be provisioned; returns the final resource body
    pub async fn patch(
        &self,
        path: &str,
        api_version: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, ArmError> {
        self.write(Method::PATCH, path, api_version, body, timeout)
            .await
    }

    async fn write(
        &self,
        method: Method,
        path: &str,
        api_version: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, ArmError> {
        let response = self
            .send(
                method,
                &self.url(path),
                &[("api-version", api_version)],
                Some(body),
            )
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        match lro_of(response.status(), response.headers()) {
            Some(lro) => {
                let first_wait = retry_after(response.headers());
                self.wait_for_lro(lro, first_wait, timeout).await?;
                self.get(path, api_version).await?.ok_or_else(|| {
                    ArmError::InvalidResponse(format!("{} not found after the operation", path))
                })
            }
            None => match Self::json_body(response).await? {
                serde_json::Value::Null => self.get(path, api_version).await?.ok_or_else(|| {
                    ArmError::InvalidResponse(format!("{} not found after the operation", path))
                }),
                body => Ok(body),
            },
        }
    }

    /// DELETE a resource and wait for it to be gone; a missing resource is not an error
    pub async fn delete(
        &self,
        path: &str,
        api_version: &str,
        extra_query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<(), ArmError> {
        let mut query = vec![("api-version", api_version)];
        query.extend_from_slice(extra_query);

        let response = self
            .send(Method::DELETE, &self.url(path), &query, None)
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(()),
            s if s.is_success() => match lro_of(s, response.headers()) {
                Some(lro) => {
                    let first_wait = retry_after(response.headers());
                    self.wait_for_lro(lro, first_wait, timeout).await
                }
                None => Ok(()),
            },
            _ => Err(Self::error_from(response).await),
        }
    }

    async fn wait_for_lro(
        &self,
        lro: Lro,
        first_wait: Option<Duration>,
        timeout: Duration,
    ) -> Result<(), ArmError> {
        let deadline = Instant::now() + timeout;
        let mut wait = first_wait.unwrap_or(self.poll_interval);

        loop {
            if Instant::now() + wait > deadline {
                return Err(ArmError::Timeout(timeout, "long-running operation".to_string()));
            }
            sleep(wait).await;

            match &lro {
                Lro::AsyncOperation(url) => {
                    let response = self.send(Method::GET, url, &[], None).await?;
                    if !response.status().is_success() {
                        return Err(Self::error_from(response).await);
                    }
                    let next = retry_after(response.headers());
                    let body = Self::json_body(response).await?;
                    let status = body
                        .get("status")
                        .and_then(|s| s.as_str())
                        .unwrap_or("InProgress");
                    debug!("Operation status: {}", status);

                    if status.eq_ignore_ascii_case("Succeeded") {
                        return Ok(());
                    }
                    if status.eq_ignore_ascii_case("Failed")
                        || status.eq_ignore_ascii_case("Canceled")
                    {
                        let message = body
                            .pointer("/error/message")
                            .and_then(|m| m.as_str())
                            .unwrap_or("no error details")
                            .to_string();
                        return Err(ArmError::OperationFailed {
                            status: status.to_string(),
                            message,
                        });
                    }
                    wait = next.unwrap_or(self.poll_interval);
                }
                Lro::Location(url) => {
                    let response = self.send(Method::GET, url, &[], None).await?;
                    match response.status() {
                        StatusCode::ACCEPTED => {
                            wait = retry_after(response.headers()).unwrap_or(self.poll_interval);
                        }
                        s if s.is_success() || s == StatusCode::NOT_FOUND => return Ok(()),
                        _ => return Err(Self::error_from(response).await),
                    }
                }
            }
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn lro_of(status: StatusCode, headers: &HeaderMap) -> Option<Lro> {
    if let Some(url) = header_str(headers, AZURE_ASYNC_OPERATION) {
        return Some(Lro::AsyncOperation(url.to_string()));
    }
    if status == StatusCode::ACCEPTED
        && let Some(url) = header_str(headers, LOCATION)
    {
        return Some(Lro::Location(url.to_string()));
    }
    None
}

/// `Retry-After` in seconds
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::auth::StaticTokenCredential;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const API: &str = "2024-04-01";
    const WS: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.MachineLearningServices/workspaces/ws";

    fn client(server: &MockServer) -> ArmClient {
        ArmClient::new(server.uri(), Arc::new(StaticTokenCredential::new("t")))
            .with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn get_returns_none_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(WS))
            .and(query_param("api-version", API))
            .and(header("authorization", "Bearer t"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": { "code": "ResourceNotFound", "message": "not found" }
            })))
            .mount(&server)
            .await;

        assert_eq!(client(&server).get(WS, API).await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_surfaces_error_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": { "code": "AuthorizationFailed", "message": "denied" }
            })))
            .mount(&server)
            .await;

        match client(&server).get(WS, API).await {
            Err(ArmError::Api { status, code, .. }) => {
                assert_eq!(status, 403);
                assert_eq!(code, "AuthorizationFailed");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn put_polls_async_operation_then_reads_resource() {
        let server = MockServer::start().await;
        let operation = format!("{}/operations/op1", server.uri());

        Mock::given(method("PUT"))
            .and(path(WS))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Azure-AsyncOperation", operation.as_str())
                    .set_body_json(json!({ "name": "ws" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/op1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "InProgress" })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/op1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "Succeeded" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(WS))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "ws",
                "properties": { "provisioningState": "Succeeded" }
            })))
            .mount(&server)
            .await;

        let body = client(&server)
            .put(WS, API, &json!({ "location": "westeurope" }), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(body["properties"]["provisioningState"], "Succeeded");
    }

    #[tokio::test]
    async fn put_follows_location_then_reads_resource() {
        let server = MockServer::start().await;
        let location = format!("{}/operationResults/op3", server.uri());

        Mock::given(method("PUT"))
            .and(path(WS))
            .respond_with(ResponseTemplate::new(202).insert_header("Location", location.as_str()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operationResults/op3"))
            .respond_with(ResponseTemplate::new(202).insert_header("Location", location.as_str()))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operationResults/op3"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(WS))
            .and(query_param("api-version", API))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "ws",
                "properties": { "provisioningState": "Succeeded", "description": "new" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let body = client(&server)
            .put(WS, API, &json!({ "location": "westeurope" }), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(body["properties"]["description"], "new");
    }

    #[tokio::test]
    async fn retry_after_on_accepted_write_delays_first_poll() {
        let server = MockServer::start().await;
        let operation = format!("{}/operations/slow", server.uri());

        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Azure-AsyncOperation", operation.as_str())
                    .insert_header("Retry-After", "1"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/slow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "Succeeded" })))
            .expect(0)
            .mount(&server)
            .await;

        // The poll interval alone would fit in the timeout; Retry-After does not.
        let result = client(&server)
            .put(WS, API, &json!({}), Duration::from_millis(300))
            .await;
        assert!(matches!(result, Err(ArmError::Timeout(..))));
    }

    #[tokio::test]
    async fn retry_after_on_operation_status_is_honoured() {
        let server = MockServer::start().await;
        let operation = format!("{}/operations/op4", server.uri());

        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(201).insert_header("Azure-AsyncOperation", operation.as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/op4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Retry-After", "1")
                    .set_body_json(json!({ "status": "InProgress" })),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/op4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "Succeeded" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(WS))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "ws" })))
            .mount(&server)
            .await;

        let started = Instant::now();
        client(&server)
            .put(WS, API, &json!({}), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn failed_operation_is_an_error() {
        let server = MockServer::start().await;
        let operation = format!("{}/operations/op2", server.uri());

        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(201).insert_header("Azure-AsyncOperation", operation.as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/op2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "Failed",
                "error": { "code": "BadRequest", "message": "quota exceeded" }
            })))
            .mount(&server)
            .await;

        match client(&server)
            .put(WS, API, &json!({}), Duration::from_secs(5))
            .await
        {
            Err(ArmError::OperationFailed { status, message }) => {
                assert_eq!(status, "Failed");
                assert_eq!(message, "quota exceeded");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn delete_polls_location_header() {
        let server = MockServer::start().await;
        let location = format!("{}/locations/op3", server.uri());

        Mock::given(method("DELETE"))
            .and(path(WS))
            .and(query_param("forceToPurge", "true"))
            .respond_with(ResponseTemplate::new(202).insert_header("Location", location.as_str()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/locations/op3"))
            .respond_with(ResponseTemplate::new(202))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/locations/op3"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .delete(WS, API, &[("forceToPurge", "true")], Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_of_missing_resource_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        client(&server)
            .delete(WS, API, &[], Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lro_times_out() {
        let server = MockServer::start().await;
        let operation = format!("{}/operations/slow", server.uri());

        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(201).insert_header("Azure-AsyncOperation", operation.as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/slow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "Running" })))
            .mount(&server)
            .await;

        let result = client(&server)
            .put(WS, API, &json!({}), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(ArmError::Timeout(..))));
    }

    #[tokio::test]
    async fn throttled_request_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(WS))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(WS))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "ws" })))
            .mount(&server)
            .await;

        let body = client(&server).get(WS, API).await.unwrap().unwrap();
        assert_eq!(body["name"], "ws");
    }

    #[test]
    fn lro_detection() {
        let mut headers = HeaderMap::new();
        assert_eq!(lro_of(StatusCode::OK, &headers), None);

        headers.insert("location", "https://example/op".parse().unwrap());
        assert_eq!(lro_of(StatusCode::OK, &headers), None);
        assert_eq!(
            lro_of(StatusCode::ACCEPTED, &headers),
            Some(Lro::Location("https://example/op".to_string()))
        );

        headers.insert("azure-asyncoperation", "https://example/async".parse().unwrap());
        assert_eq!(
            lro_of(StatusCode::CREATED, &headers),
            Some(Lro::AsyncOperation("https://example/async".to_string()))
        );
    }
}
