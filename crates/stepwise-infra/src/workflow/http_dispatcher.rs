//! HTTP action dispatcher.
//!
//! An action `Subject.predicate(args)` becomes `POST {base_url}/{predicate}`
//! with `args` as the JSON body, where `base_url` (plus any extra headers)
//! comes from the `[subjects.<Subject>]` table of `config.toml`.
//!
//! Outcomes:
//! - 2xx with a JSON body -> that JSON value
//! - 2xx with an empty body -> `null`
//! - 2xx with a non-JSON body -> the body as a string
//! - non-2xx, connection errors, timeouts -> `DispatchError`

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Map, Value};
use stepwise_core::workflow::dispatcher::{ActionDispatcher, DispatchError};
use stepwise_types::config::{GlobalConfig, SubjectEndpoint};

use crate::config::dispatch_timeout;

/// Dispatches actions to HTTP endpoints configured per subject.
pub struct HttpDispatcher {
    client: reqwest::Client,
    subjects: BTreeMap<String, SubjectEndpoint>,
    timeout: Option<Duration>,
}

impl HttpDispatcher {
    pub fn new(subjects: BTreeMap<String, SubjectEndpoint>, timeout: Option<Duration>) -> Self {
        Self {
            client: reqwest::Client::new(),
            subjects,
            timeout,
        }
    }

    /// Endpoints from `subjects`; a `dispatch_timeout_secs` of `0` disables
    /// the per-request timeout.
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(config.subjects.clone(), dispatch_timeout(config))
    }

    /// Configured subject names, sorted.
    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.subjects.keys().map(String::as_str)
    }

    fn url(endpoint: &SubjectEndpoint, predicate: &str) -> String {
        format!("{}/{}", endpoint.base_url.trim_end_matches('/'), predicate)
    }
}

impl ActionDispatcher for HttpDispatcher {
    async fn dispatch(
        &self,
        subject: &str,
        predicate: &str,
        args: Map<String, Value>,
    ) -> Result<Value, DispatchError> {
        let action = format!("{subject}.{predicate}");
        let endpoint = self
            .subjects
            .get(subject)
            .ok_or_else(|| DispatchError::UnknownAction(action.clone()))?;
        let url = Self::url(endpoint, predicate);

        let mut request = self.client.post(&url).json(&args);
        for (name, value) in &endpoint.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        tracing::debug!(action = action.as_str(), url = url.as_str(), "dispatching over HTTP");

        let response = request.send().await.map_err(|e| match self.timeout {
            Some(timeout) if e.is_timeout() => DispatchError::Timeout {
                action: action.clone(),
                timeout,
            },
            _ => DispatchError::failed(subject, predicate, format!("HTTP request failed: {e}")),
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DispatchError::failed(subject, predicate, format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(DispatchError::failed(subject, predicate, format!("HTTP {status}: {body}")));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

impl std::fmt::Debug for HttpDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Header values may carry credentials and are left out.
        let subjects: Vec<(&str, &str)> = self
            .subjects
            .iter()
            .map(|(name, endpoint)| (name.as_str(), endpoint.base_url.as_str()))
            .collect();
        f.debug_struct("HttpDispatcher")
            .field("subjects", &subjects)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dispatcher(server: &MockServer, timeout: Option<Duration>) -> HttpDispatcher {
        let mut subjects = BTreeMap::new();
        subjects.insert(
            "Inventory".to_string(),
            SubjectEndpoint {
                base_url: format!("{}/inventory/", server.uri()),
                headers: BTreeMap::from([("x-api-key".to_string(), "secret".to_string())]),
            },
        );
        HttpDispatcher::new(subjects, timeout)
    }

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn posts_args_and_returns_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/inventory/check"))
            .and(header("x-api-key", "secret"))
            .and(body_json(json!({ "sku": "x-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let out = dispatcher(&server, None)
            .dispatch("Inventory", "check", args(json!({ "sku": "x-1" })))
            .await
            .unwrap();
        assert_eq!(out, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn empty_and_plain_bodies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/inventory/reserve"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/inventory/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .mount(&server)
            .await;

        let dispatcher = dispatcher(&server, None);
        assert_eq!(
            dispatcher.dispatch("Inventory", "reserve", Map::new()).await.unwrap(),
            Value::Null
        );
        assert_eq!(
            dispatcher.dispatch("Inventory", "ping", Map::new()).await.unwrap(),
            json!("pong")
        );
    }

    #[tokio::test]
    async fn non_success_status_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/inventory/check"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let err = dispatcher(&server, None)
            .dispatch("Inventory", "check", Map::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "action Inventory.check failed: HTTP 503 Service Unavailable: down"
        );
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let err = dispatcher(&server, Some(Duration::from_millis(50)))
            .dispatch("Inventory", "check", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn unconfigured_subject_is_unknown_action() {
        let dispatcher = HttpDispatcher::new(BTreeMap::new(), None);
        let err = dispatcher.dispatch("Payment", "charge", Map::new()).await.unwrap_err();
        assert_eq!(err, DispatchError::UnknownAction("Payment.charge".to_string()));
    }

    #[test]
    fn from_config_reads_timeout() {
        let mut config = GlobalConfig::default();
        assert_eq!(HttpDispatcher::from_config(&config).timeout, Some(Duration::from_secs(30)));
        config.dispatch_timeout_secs = 0;
        assert_eq!(HttpDispatcher::from_config(&config).timeout, None);
    }
}
