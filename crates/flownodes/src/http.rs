use async_trait::async_trait;
use flowcore::{
    param_str, parse_duration, require_str, Action, NodeError, NodeExecutor, NodeInput, Params,
    SharedState, ValueExt,
};
use flowruntime::{NodeFactory, NodeMetadata, ParamDefinition};
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Header used for API keys when `key_name` is not given
const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Credentials attached to a request
#[derive(Debug, Clone, PartialEq)]
pub enum HttpAuth {
    Bearer(String),
    ApiKey { header: String, key: String },
    Basic { username: String, password: String },
}

impl HttpAuth {
    /// Collect auth from `bearer_token`, `api_key` (+ `key_name`),
    /// `username` + `password` or an `auth` object with the same fields,
    /// in that order of preference.
    pub fn from_params(params: &Params) -> Option<Self> {
        let nested = params.get("auth").and_then(Value::as_object);
        let field = |name: &str| {
            param_str(params, name).or_else(|| nested.and_then(|m| m.get(name)).and_then(Value::as_str))
        };

        if let Some(token) = field("bearer_token").or_else(|| field("token")) {
            return Some(Self::Bearer(token.to_string()));
        }
        if let Some(key) = field("api_key") {
            let header = field("key_name").unwrap_or(DEFAULT_API_KEY_HEADER);
            return Some(Self::ApiKey {
                header: header.to_string(),
                key: key.to_string(),
            });
        }
        match (field("username"), field("password")) {
            (Some(username), Some(password)) => Some(Self::Basic {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => None,
        }
    }

    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Bearer(token) => request.bearer_auth(token),
            Self::ApiKey { header, key } => request.header(header.as_str(), key.as_str()),
            Self::Basic { username, password } => request.basic_auth(username, Some(password)),
        }
    }
}

/// Request body after content-type inference
#[derive(Debug, Clone, PartialEq)]
pub enum HttpBody {
    Json(Vec<u8>),
    Text(String),
    Form(Vec<(String, String)>),
}

/// Everything needed to send one request, derived from node parameters
#[derive(Debug, Clone)]
pub struct RequestPlan {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<HttpBody>,
    pub timeout: Duration,
    pub auth: Option<HttpAuth>,
    pub follow_redirects: bool,
}

impl RequestPlan {
    pub fn from_params(params: &Params, default_timeout: Duration) -> Result<Self, NodeError> {
        let url = require_str(params, "url")?.to_string();

        let method = param_str(params, "method")
            .filter(|m| !m.is_empty())
            .unwrap_or("GET")
            .to_ascii_uppercase();
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| NodeError::configuration(format!("Unsupported method: {}", method)))?;

        let mut headers: Vec<(String, String)> = params
            .get("headers")
            .and_then(Value::as_object)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.to_display_string())).collect())
            .unwrap_or_default();
        let explicit_type = headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));

        let mut body = params.get("body").map(|body| {
            let (content_type, body) = infer_body(body);
            if let Some(content_type) = content_type.filter(|_| !explicit_type) {
                headers.push((CONTENT_TYPE.to_string(), content_type.to_string()));
            }
            body
        });

        if let Some(form) = params.get("form_data").and_then(Value::as_object) {
            let pairs = form
                .iter()
                .map(|(k, v)| (k.clone(), v.to_display_string()))
                .collect();
            body = Some(HttpBody::Form(pairs));
        }

        if params.contains_key("file") {
            tracing::warn!(url = %url, "File uploads are not supported, ignoring 'file' parameter");
        }

        let timeout = match params.get("timeout") {
            Some(Value::String(s)) => parse_duration(s)?,
            Some(Value::Number(n)) => n
                .as_f64()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| NodeError::configuration(format!("invalid timeout: {}", n)))?,
            _ => default_timeout,
        };

        Ok(Self {
            method,
            url,
            headers,
            body,
            timeout,
            auth: HttpAuth::from_params(params),
            follow_redirects: params
                .get("follow_redirects")
                .and_then(Value::as_bool)
                .unwrap_or(true),
        })
    }
}

/// Structured bodies and strings that look like JSON are sent as JSON,
/// other strings as plain text.
fn infer_body(body: &Value) -> (Option<&'static str>, HttpBody) {
    match body {
        Value::Object(_) | Value::Array(_) => (
            Some("application/json"),
            HttpBody::Json(body.to_string().into_bytes()),
        ),
        Value::String(s) if s.starts_with('{') || s.starts_with('[') => {
            (Some("application/json"), HttpBody::Json(s.clone().into_bytes()))
        }
        Value::String(s) => (Some("text/plain"), HttpBody::Text(s.clone())),
        other => (None, HttpBody::Text(other.to_display_string())),
    }
}

/// HTTP request node
pub struct HttpRequestNode {
    client: reqwest::Client,
    no_redirect_client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpRequestNode {
    pub fn new(default_timeout: Duration) -> Result<Self, NodeError> {
        let build_error = |e: reqwest::Error| NodeError::configuration(format!("HTTP client: {}", e));
        Ok(Self {
            client: reqwest::Client::builder().build().map_err(build_error)?,
            no_redirect_client: reqwest::Client::builder()
                .redirect(Policy::none())
                .build()
                .map_err(build_error)?,
            default_timeout,
        })
    }

    async fn send(&self, plan: RequestPlan) -> Result<Value, NodeError> {
        let client = if plan.follow_redirects {
            &self.client
        } else {
            &self.no_redirect_client
        };

        let mut request = client
            .request(plan.method.clone(), &plan.url)
            .timeout(plan.timeout);
        for (name, value) in &plan.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(auth) = &plan.auth {
            request = auth.apply(request);
        }
        request = match plan.body {
            Some(HttpBody::Json(bytes)) => request.body(bytes),
            Some(HttpBody::Text(text)) => request.body(text),
            Some(HttpBody::Form(pairs)) => request.form(&pairs),
            None => request,
        };

        let timeout_ms = plan.timeout.as_millis() as u64;
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                NodeError::Timeout { millis: timeout_ms }
            } else {
                NodeError::execution(format!("HTTP request failed: {}", e))
            }
        };

        let started = Instant::now();
        let response = request.send().await.map_err(classify)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let mut headers = Map::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            match headers.get_mut(name.as_str()) {
                Some(Value::String(existing)) => {
                    existing.push_str(", ");
                    existing.push_str(&value);
                }
                _ => {
                    headers.insert(name.to_string(), Value::String(value));
                }
            }
        }

        let raw_body = response.text().await.map_err(classify)?;
        let elapsed = started.elapsed();
        let body: Value = serde_json::from_str(&raw_body).unwrap_or_else(|_| Value::String(raw_body.clone()));

        tracing::debug!(url = %plan.url, status, elapsed_ms = elapsed.as_millis() as u64, "HTTP response");

        Ok(json!({
            "status_code": status,
            "headers": headers,
            "body": body,
            "raw_body": raw_body,
            "metadata": {
                "url": final_url,
                "method": plan.method.as_str(),
                "content_length": raw_body.len(),
            },
            "success": (200..300).contains(&status),
            "timing_ms": elapsed.as_millis() as u64,
        }))
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestNode {
    fn node_type(&self) -> &str {
        "http"
    }

    async fn execute(&self, input: NodeInput) -> Result<Value, NodeError> {
        let plan = RequestPlan::from_params(&input.params, self.default_timeout)?;
        tracing::info!("{} {}", plan.method, plan.url);

        tokio::select! {
            _ = input.cancellation.cancelled() => Err(NodeError::Cancelled),
            result = self.send(plan) => result,
        }
    }

    fn route(&self, _shared: &SharedState, _params: &Params, result: &Value) -> Option<Action> {
        let status = result.get("status_code")?.as_u64()?;
        let action = match status {
            200..=299 => "success",
            400..=499 => "client_error",
            500.. => "server_error",
            _ => return None,
        };
        Some(action.to_string())
    }
}

pub struct HttpRequestNodeFactory {
    default_timeout: Duration,
}

impl HttpRequestNodeFactory {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl NodeFactory for HttpRequestNodeFactory {
    fn create(&self, _params: &Params) -> Result<Arc<dyn NodeExecutor>, NodeError> {
        Ok(Arc::new(HttpRequestNode::new(self.default_timeout)?))
    }

    fn node_type(&self) -> &str {
        "http.request"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            params: vec![
                ParamDefinition::required("url", "Request URL"),
                ParamDefinition::optional("method", "HTTP method, GET by default"),
                ParamDefinition::optional("headers", "Header map; values are sent as strings"),
                ParamDefinition::optional("body", "Request body; objects are sent as JSON"),
                ParamDefinition::optional("form_data", "Fields sent url-encoded"),
                ParamDefinition::optional("timeout", "Duration string or seconds"),
                ParamDefinition::optional("follow_redirects", "Follow redirects, true by default"),
            ],
        }
    }
}
