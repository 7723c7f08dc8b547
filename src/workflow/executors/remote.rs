//! HTTP executor for `rest-api` services

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

use crate::runtime::{
    is_template, ExecutionCall, Executor, ExecutorKind, FlowError, Result, TemplateRenderer,
};

static SHARED_CLIENT: Lazy<Client> = Lazy::new(Client::new);

/// Calls a remote service: `method base_url + path` with rendered headers
pub struct RemoteCallExecutor {
    client: Client,
    method: Method,
    base_url: String,
    path: String,
    headers: BTreeMap<String, String>,
    renderer: Arc<dyn TemplateRenderer>,
}

impl RemoteCallExecutor {
    pub fn new(
        method: Option<&str>,
        base_url: &str,
        path: Option<&str>,
        headers: BTreeMap<String, String>,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Result<Self> {
        let method = match method {
            Some(m) => Method::from_bytes(m.to_uppercase().as_bytes())
                .map_err(|_| FlowError::config(format!("Invalid HTTP method: {}", m)))?,
            None => Method::POST,
        };
        Ok(Self {
            client: SHARED_CLIENT.clone(),
            method,
            base_url: base_url.to_string(),
            path: path.unwrap_or_default().to_string(),
            headers,
            renderer,
        })
    }

    /// Use a specific client (e.g. one with a configured timeout)
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Full request URL, with templates rendered against env/asset values
    pub fn url(&self, call: &ExecutionCall) -> Result<Url> {
        let variables = template_variables(call);
        let base = self.render(&self.base_url, &variables)?;
        let path = self.render(&self.path, &variables)?;

        let joined = match (base.ends_with('/'), path.starts_with('/')) {
            (true, true) => format!("{}{}", base, &path[1..]),
            (false, false) if !path.is_empty() => format!("{}/{}", base, path),
            _ => format!("{}{}", base, path),
        };
        let mut url = Url::parse(&joined)?;

        if self.method == Method::GET && !call.input_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &call.input_params {
                match value {
                    Value::String(s) => pairs.append_pair(key, s),
                    other => pairs.append_pair(key, &other.to_string()),
                };
            }
        }
        Ok(url)
    }

    fn render(&self, text: &str, variables: &Map<String, Value>) -> Result<String> {
        if is_template(text) {
            self.renderer.render(text, variables)
        } else {
            Ok(text.to_string())
        }
    }
}

// Assets shadow env entries of the same name
fn template_variables(call: &ExecutionCall) -> Map<String, Value> {
    let mut variables = call.env_params.clone();
    variables.extend(call.asset_params.iter().map(|(k, v)| (k.clone(), v.clone())));
    variables
}

#[async_trait]
impl Executor for RemoteCallExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::RemoteCall
    }

    async fn execute(&self, call: &ExecutionCall) -> Result<Value> {
        let url = self.url(call)?;
        let variables = template_variables(call);
        log::debug!("{} {} {}", call.service_key, self.method, url);

        let mut req = self
            .client
            .request(self.method.clone(), url)
            .header("Accept", "application/json");
        for (name, value) in &self.headers {
            req = req.header(name.as_str(), self.render(value, &variables)?);
        }
        if self.method != Method::GET {
            req = req.json(&call.input_params);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(FlowError::executor(
                &call.service_key,
                format!("HTTP {}: {}", status, text),
            ));
        }

        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::BraceRenderer;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    fn call(inputs: Value, env: Value) -> ExecutionCall {
        ExecutionCall {
            service_key: "api.fetch".to_string(),
            input_params: inputs.as_object().cloned().unwrap(),
            env_params: env.as_object().cloned().unwrap(),
            asset_params: Map::new(),
        }
    }

    fn executor(method: Option<&str>, base: &str, path: &str) -> RemoteCallExecutor {
        RemoteCallExecutor::new(
            method,
            base,
            Some(path),
            BTreeMap::new(),
            Arc::new(BraceRenderer::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_default_method_is_post() {
        let exec = executor(None, "http://localhost:8080", "/run");
        assert_eq!(exec.method, Method::POST);
        let url = exec.url(&call(json!({"q": "x"}), json!({}))).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/run");
    }

    #[test]
    fn test_get_sends_query_string() {
        let exec = executor(Some("get"), "http://localhost:8080/", "/search");
        let url = exec
            .url(&call(json!({"q": "rust lang", "limit": 5}), json!({})))
            .unwrap();
        assert_eq!(url.path(), "/search");
        assert_eq!(url.query(), Some("limit=5&q=rust+lang"));
    }

    #[test]
    fn test_url_templates_rendered_from_env() {
        let exec = executor(None, "http://{{ host }}", "v1/{{ version }}/items");
        let url = exec
            .url(&call(json!({}), json!({"host": "svc.local", "version": 2})))
            .unwrap();
        assert_eq!(url.as_str(), "http://svc.local/v1/2/items");
    }

    #[test]
    fn test_invalid_method_rejected() {
        let result = RemoteCallExecutor::new(
            Some("NOT A METHOD"),
            "http://localhost",
            None,
            BTreeMap::new(),
            Arc::new(BraceRenderer::new()),
        );
        assert!(matches!(result, Err(FlowError::Config(_))));
    }

    #[test]
    fn test_invalid_url_is_error() {
        let exec = executor(None, "not a url", "");
        assert!(matches!(
            exec.url(&call(json!({}), json!({}))),
            Err(FlowError::Url(_))
        ));
    }

    /// Accept one connection, answer it, and hand back the raw request
    async fn serve_once(status: &str, content_type: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            content_type,
            body.len(),
            body
        );
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            request
        });
        (format!("http://{}", addr), handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).into_owned();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn remote(method: Option<&str>, base: &str, path: &str, headers: &[(&str, &str)]) -> RemoteCallExecutor {
        let headers = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RemoteCallExecutor::new(method, base, Some(path), headers, Arc::new(BraceRenderer::new()))
            .unwrap()
            .with_client(Client::builder().no_proxy().build().unwrap())
    }

    #[tokio::test]
    async fn test_post_sends_json_body_and_rendered_headers() {
        let (base, server) = serve_once("200 OK", "application/json", r#"{"total": 7}"#).await;
        let exec = remote(None, &base, "/run", &[("Authorization", "Bearer {{ token }}")]);

        let result = exec
            .execute(&call(json!({"n": 3}), json!({"token": "abc"})))
            .await
            .unwrap();
        assert_eq!(result, json!({"total": 7}));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /run HTTP/1.1"), "{}", request);
        assert!(request.to_lowercase().contains("authorization: bearer abc"));
        assert!(request.to_lowercase().contains("content-type: application/json"));
        assert!(request.ends_with(r#"{"n":3}"#), "{}", request);
    }

    #[tokio::test]
    async fn test_get_sends_no_body() {
        let (base, server) = serve_once("200 OK", "application/json", "[1, 2]").await;
        let exec = remote(Some("GET"), &base, "/search", &[]);

        let result = exec.execute(&call(json!({"q": "x"}), json!({}))).await.unwrap();
        assert_eq!(result, json!([1, 2]));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /search?q=x HTTP/1.1"), "{}", request);
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_non_json_body_returned_as_string() {
        let (base, server) = serve_once("200 OK", "text/plain", "all good").await;
        let exec = remote(None, &base, "/ping", &[]);

        let result = exec.execute(&call(json!({}), json!({}))).await.unwrap();
        assert_eq!(result, json!("all good"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_retryable_executor_error() {
        let (base, server) = serve_once("503 Service Unavailable", "text/plain", "down").await;
        let exec = remote(None, &base, "/run", &[]);

        let err = exec.execute(&call(json!({}), json!({}))).await.unwrap_err();
        assert!(matches!(err, FlowError::Executor { ref service, .. } if service == "api.fetch"));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("down"));
        server.await.unwrap();
    }
}
