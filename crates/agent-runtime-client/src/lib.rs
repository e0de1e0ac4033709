use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use agent_runtime_control_plane::{
    CONFLICT_ERROR_CODE, ControlPlaneError, CreatedRuntime, NetworkMode, ResourceControlApi,
    RuntimeRecord, RuntimeSpec,
};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

pub const ENDPOINT_ENV: &str = "AGENT_RUNTIME_CONTROL_ENDPOINT";
pub const TOKEN_ENV: &str = "AGENT_RUNTIME_CONTROL_TOKEN";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_TYPE_HEADER: &str = "x-amzn-errortype";

#[derive(Debug, Clone)]
pub struct RuntimeControlClient {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRuntimeRequest<'a> {
    agent_runtime_name: &'a str,
    agent_runtime_artifact: RuntimeArtifact<'a>,
    network_configuration: NetworkConfiguration,
    role_arn: &'a str,
    environment_variables: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeArtifact<'a> {
    container_configuration: ContainerConfiguration<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerConfiguration<'a> {
    container_uri: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NetworkConfiguration {
    network_mode: NetworkMode,
}

impl<'a> From<&'a RuntimeSpec> for CreateRuntimeRequest<'a> {
    fn from(spec: &'a RuntimeSpec) -> Self {
        Self {
            agent_runtime_name: spec.name(),
            agent_runtime_artifact: RuntimeArtifact {
                container_configuration: ContainerConfiguration {
                    container_uri: spec.container_uri(),
                },
            },
            network_configuration: NetworkConfiguration {
                network_mode: spec.network_mode(),
            },
            role_arn: spec.role_arn(),
            environment_variables: spec.environment(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListRuntimesPage {
    #[serde(default)]
    agent_runtimes: Vec<RuntimeRecord>,
    #[serde(default)]
    next_token: Option<String>,
}

impl RuntimeControlClient {
    /// Reads the endpoint and bearer token from the environment, falling back
    /// to the regional control-plane endpoint.
    pub fn from_env(region: &str) -> anyhow::Result<Self> {
        let base_url =
            optional_non_empty_env(ENDPOINT_ENV).unwrap_or_else(|| default_endpoint(region));
        let api_token = optional_non_empty_env(TOKEN_ENV);
        Self::new(base_url, api_token)
    }

    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> anyhow::Result<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            anyhow::bail!("control plane base URL cannot be empty");
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build control plane http client")?;
        Ok(Self {
            client,
            base_url,
            api_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        operation: &str,
    ) -> Result<reqwest::Response, ControlPlaneError> {
        let resp = self
            .request(builder)
            .send()
            .await
            .map_err(|err| transport(operation, err))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let error_type = resp
            .headers()
            .get(ERROR_TYPE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.unwrap_or_default();
        Err(classify_failure(
            operation,
            status,
            error_type.as_deref(),
            &body,
        ))
    }

    async fn decode<T: DeserializeOwned>(
        resp: reqwest::Response,
        operation: &str,
    ) -> Result<T, ControlPlaneError> {
        resp.json::<T>()
            .await
            .map_err(|err| transport(&format!("decode {operation} response"), err))
    }

    async fn list_page(
        &self,
        next_token: Option<&str>,
    ) -> Result<ListRuntimesPage, ControlPlaneError> {
        let url = format!("{}/runtimes", self.base_url);
        let mut builder = self.client.get(&url);
        if let Some(token) = next_token {
            builder = builder.query(&[("nextToken", token)]);
        }
        let resp = self.send(builder, "list agent runtimes").await?;
        Self::decode(resp, "list agent runtimes").await
    }
}

#[async_trait]
impl ResourceControlApi for RuntimeControlClient {
    async fn create_runtime(
        &self,
        spec: &RuntimeSpec,
    ) -> Result<CreatedRuntime, ControlPlaneError> {
        let url = format!("{}/runtimes", self.base_url);
        let body = CreateRuntimeRequest::from(spec);
        let resp = self
            .send(self.client.post(&url).json(&body), "create agent runtime")
            .await?;
        Self::decode(resp, "create agent runtime").await
    }

    async fn list_runtimes(&self) -> Result<Vec<RuntimeRecord>, ControlPlaneError> {
        let mut runtimes = Vec::new();
        let mut seen_tokens = HashSet::new();
        let mut next_token: Option<String> = None;
        loop {
            let page = self.list_page(next_token.as_deref()).await?;
            runtimes.extend(page.agent_runtimes);
            let Some(token) = page.next_token.filter(|token| !token.is_empty()) else {
                break;
            };
            if !seen_tokens.insert(token.clone()) {
                warn!(token = %token, "runtime list pagination token repeated, stopping");
                break;
            }
            debug!(fetched = runtimes.len(), "following runtime list pagination");
            next_token = Some(token);
        }
        Ok(runtimes)
    }

    async fn delete_runtime(&self, runtime_id: &str) -> Result<(), ControlPlaneError> {
        let url = format!("{}/runtimes/{runtime_id}", self.base_url);
        self.send(self.client.delete(&url), "delete agent runtime")
            .await?;
        Ok(())
    }
}

pub fn default_endpoint(region: &str) -> String {
    format!("https://bedrock-agentcore-control.{region}.amazonaws.com")
}

fn transport(operation: &str, err: reqwest::Error) -> ControlPlaneError {
    ControlPlaneError::Transport {
        operation: operation.to_string(),
        detail: err.to_string(),
    }
}

fn classify_failure(
    operation: &str,
    status: StatusCode,
    error_type: Option<&str>,
    body: &str,
) -> ControlPlaneError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let field = |names: &[&str]| {
        names
            .iter()
            .find_map(|name| parsed.get(*name).and_then(Value::as_str))
            .filter(|value| !value.trim().is_empty())
    };
    // The error-type header wins over any code carried in the body.
    let code = error_type
        .filter(|value| !value.trim().is_empty())
        .or_else(|| field(&["code", "__type", "Code"]))
        .map(normalize_error_code);
    let message = field(&["message", "Message"])
        .map(|message| message.to_string())
        .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
        .unwrap_or_else(|| status.to_string());

    if status == StatusCode::CONFLICT || code == Some(CONFLICT_ERROR_CODE) {
        return ControlPlaneError::NameConflict { message };
    }
    ControlPlaneError::Api {
        operation: operation.to_string(),
        status: Some(status.as_u16()),
        code: code.unwrap_or(status.as_str()).to_string(),
        message,
    }
}

// Some services qualify the code with a namespace, e.g. `com.amazon.x#ConflictException`.
fn normalize_error_code(raw: &str) -> &str {
    let code = raw.rsplit('#').next().unwrap_or(raw);
    code.split(':').next().unwrap_or(code).trim()
}

fn optional_non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runtime_test_utils::{MockResponse, spawn_one_shot_server, spawn_scripted_server};

    fn test_client(base_url: String) -> RuntimeControlClient {
        RuntimeControlClient::new(base_url, Some("control-token".to_string()))
            .expect("build client")
    }

    fn test_spec() -> RuntimeSpec {
        let mut env = BTreeMap::new();
        env.insert("GATEWAY_ACCESS_TOKEN".to_string(), "gw-token".to_string());
        env.insert("LLM_PROVIDER".to_string(), "bedrock".to_string());
        RuntimeSpec::new(
            "sre-agent",
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/sre-agent:latest",
            "arn:aws:iam::123456789012:role/agent-runtime",
            env,
        )
        .expect("valid spec")
    }

    #[test]
    fn new_trims_trailing_slashes_and_rejects_empty() {
        let client = RuntimeControlClient::new("http://127.0.0.1:9000///", None).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:9000");
        assert!(RuntimeControlClient::new("  ", None).is_err());
    }

    #[test]
    fn default_endpoint_is_regional() {
        assert_eq!(
            default_endpoint("us-west-2"),
            "https://bedrock-agentcore-control.us-west-2.amazonaws.com"
        );
    }

    #[test]
    fn error_codes_are_normalized() {
        assert_eq!(
            normalize_error_code("com.amazonaws.agentcore#ConflictException"),
            "ConflictException"
        );
        assert_eq!(
            normalize_error_code("ConflictException:http://internal"),
            "ConflictException"
        );
        assert_eq!(normalize_error_code("ValidationException"), "ValidationException");
    }

    #[tokio::test]
    async fn create_runtime_contract_request_shape() {
        let (base_url, rx) = spawn_one_shot_server(
            "201 Created",
            r#"{"agentRuntimeId":"rt-1","agentRuntimeArn":"arn:aws:bedrock-agentcore:us-east-1:1:runtime/rt-1","status":"CREATING"}"#,
        );
        let client = test_client(base_url);

        let created = client
            .create_runtime(&test_spec())
            .await
            .expect("create runtime succeeds");
        assert_eq!(created.id, "rt-1");
        assert_eq!(
            created.handle,
            "arn:aws:bedrock-agentcore:us-east-1:1:runtime/rt-1"
        );
        assert_eq!(created.status, "CREATING");

        let req = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("captured request");
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/runtimes");
        assert_eq!(
            req.headers.get("authorization").map(String::as_str),
            Some("Bearer control-token")
        );

        let json: Value = serde_json::from_str(&req.body).expect("parse json body");
        assert_eq!(json["agentRuntimeName"], "sre-agent");
        assert_eq!(
            json["agentRuntimeArtifact"]["containerConfiguration"]["containerUri"],
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/sre-agent:latest"
        );
        assert_eq!(json["networkConfiguration"]["networkMode"], "PUBLIC");
        assert_eq!(json["roleArn"], "arn:aws:iam::123456789012:role/agent-runtime");
        assert_eq!(json["environmentVariables"]["GATEWAY_ACCESS_TOKEN"], "gw-token");
        assert_eq!(json["environmentVariables"]["LLM_PROVIDER"], "bedrock");
    }

    #[tokio::test]
    async fn create_runtime_maps_http_409_to_name_conflict() {
        let (base_url, _rx) = spawn_one_shot_server(
            "409 Conflict",
            r#"{"message":"An agent runtime named sre-agent already exists"}"#,
        );
        let client = test_client(base_url);

        let err = client
            .create_runtime(&test_spec())
            .await
            .expect_err("expected conflict");
        assert_eq!(
            err,
            ControlPlaneError::NameConflict {
                message: "An agent runtime named sre-agent already exists".to_string()
            }
        );
    }

    #[tokio::test]
    async fn create_runtime_maps_conflict_code_regardless_of_status() {
        let (base_url, _rx) = spawn_one_shot_server(
            "400 Bad Request",
            r#"{"__type":"com.amazonaws.agentcore#ConflictException","Message":"name taken"}"#,
        );
        let client = test_client(base_url);

        let err = client
            .create_runtime(&test_spec())
            .await
            .expect_err("expected conflict");
        assert!(err.is_name_conflict());
    }

    #[tokio::test]
    async fn error_body_with_several_code_fields_still_classifies() {
        let (base_url, _rx) = spawn_one_shot_server(
            "400 Bad Request",
            r#"{"code":"ConflictException","__type":"com.amazonaws.agentcore#ConflictException","message":"name taken"}"#,
        );
        let client = test_client(base_url);

        let err = client
            .create_runtime(&test_spec())
            .await
            .expect_err("expected conflict");
        assert_eq!(
            err,
            ControlPlaneError::NameConflict {
                message: "name taken".to_string()
            }
        );
    }

    #[tokio::test]
    async fn error_type_header_identifies_conflict() {
        let (base_url, _rx) = spawn_scripted_server(vec![
            MockResponse::new("400 Bad Request", "request rejected").with_header(
                "x-amzn-ErrorType",
                "ConflictException:http://internal.amazon.com/coral/",
            ),
        ]);
        let client = test_client(base_url);

        let err = client
            .create_runtime(&test_spec())
            .await
            .expect_err("expected conflict");
        assert_eq!(
            err,
            ControlPlaneError::NameConflict {
                message: "request rejected".to_string()
            }
        );
    }

    #[tokio::test]
    async fn error_type_header_sets_api_error_code() {
        let (base_url, _rx) = spawn_scripted_server(vec![
            MockResponse::new("400 Bad Request", r#"{"message":"bad role"}"#)
                .with_header("x-amzn-ErrorType", "ValidationException"),
        ]);
        let client = test_client(base_url);

        let err = client
            .create_runtime(&test_spec())
            .await
            .expect_err("expected validation error");
        assert_eq!(err.code(), "ValidationException");
        assert!(err.to_string().contains("bad role"));
    }

    #[tokio::test]
    async fn create_runtime_surfaces_other_api_errors() {
        let (base_url, _rx) = spawn_one_shot_server(
            "403 Forbidden",
            r#"{"code":"AccessDeniedException","message":"role cannot be assumed"}"#,
        );
        let client = test_client(base_url);

        let err = client
            .create_runtime(&test_spec())
            .await
            .expect_err("expected access denied");
        assert_eq!(
            err,
            ControlPlaneError::Api {
                operation: "create agent runtime".to_string(),
                status: Some(403),
                code: "AccessDeniedException".to_string(),
                message: "role cannot be assumed".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn non_json_error_body_is_kept_as_message() {
        let (base_url, _rx) = spawn_one_shot_server("500 Internal Server Error", "no quota");
        let client = test_client(base_url);

        let err = client
            .create_runtime(&test_spec())
            .await
            .expect_err("expected server error");
        let msg = err.to_string();
        assert!(msg.contains("create agent runtime failed"));
        assert!(msg.contains("500"));
        assert!(msg.contains("no quota"));
    }

    #[tokio::test]
    async fn list_runtimes_follows_next_token() {
        let (base_url, rx) = spawn_scripted_server(vec![
            MockResponse::new(
                "200 OK",
                r#"{"agentRuntimes":[{"agentRuntimeId":"rt-1","agentRuntimeName":"other-agent","agentRuntimeArn":"arn:1","status":"READY"}],"nextToken":"page-2"}"#,
            ),
            MockResponse::new(
                "200 OK",
                r#"{"agentRuntimes":[{"agentRuntimeId":"rt-2","agentRuntimeName":"sre-agent","agentRuntimeArn":"arn:2","status":"READY"}]}"#,
            ),
        ]);
        let client = test_client(base_url);

        let runtimes = client.list_runtimes().await.expect("list succeeds");
        let names: Vec<&str> = runtimes.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["other-agent", "sre-agent"]);

        let first = rx.recv_timeout(Duration::from_secs(2)).expect("first page");
        assert_eq!(first.method, "GET");
        assert_eq!(first.path, "/runtimes");
        let second = rx.recv_timeout(Duration::from_secs(2)).expect("second page");
        assert_eq!(second.path, "/runtimes?nextToken=page-2");
    }

    #[tokio::test]
    async fn list_runtimes_stops_when_a_token_comes_back() {
        let (base_url, rx) = spawn_scripted_server(vec![
            MockResponse::new(
                "200 OK",
                r#"{"agentRuntimes":[{"agentRuntimeId":"rt-1","agentRuntimeName":"a","status":"READY"}],"nextToken":"A"}"#,
            ),
            MockResponse::new(
                "200 OK",
                r#"{"agentRuntimes":[{"agentRuntimeId":"rt-2","agentRuntimeName":"b","status":"READY"}],"nextToken":"B"}"#,
            ),
            MockResponse::new(
                "200 OK",
                r#"{"agentRuntimes":[{"agentRuntimeId":"rt-3","agentRuntimeName":"c","status":"READY"}],"nextToken":"A"}"#,
            ),
        ]);
        let client = test_client(base_url);

        // A fourth request would be refused once the script is exhausted.
        let runtimes = client.list_runtimes().await.expect("list terminates");
        let ids: Vec<&str> = runtimes.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["rt-1", "rt-2", "rt-3"]);

        let paths: Vec<String> = rx.try_iter().map(|req| req.path).collect();
        assert_eq!(
            paths,
            vec!["/runtimes", "/runtimes?nextToken=A", "/runtimes?nextToken=B"]
        );
    }

    #[tokio::test]
    async fn list_runtimes_accepts_empty_body_fields() {
        let (base_url, _rx) = spawn_one_shot_server("200 OK", "{}");
        let client = test_client(base_url);
        let runtimes = client.list_runtimes().await.expect("list succeeds");
        assert!(runtimes.is_empty());
    }

    #[tokio::test]
    async fn delete_runtime_contract_request_shape() {
        let (base_url, rx) = spawn_one_shot_server("202 Accepted", r#"{"status":"DELETING"}"#);
        let client = test_client(base_url);

        client
            .delete_runtime("rt-9")
            .await
            .expect("delete succeeds");

        let req = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("captured request");
        assert_eq!(req.method, "DELETE");
        assert_eq!(req.path, "/runtimes/rt-9");
    }

    #[tokio::test]
    async fn delete_runtime_not_found_is_api_error() {
        let (base_url, _rx) = spawn_one_shot_server(
            "404 Not Found",
            r#"{"code":"ResourceNotFoundException","message":"no such runtime"}"#,
        );
        let client = test_client(base_url);

        let err = client
            .delete_runtime("rt-9")
            .await
            .expect_err("expected not found");
        assert!(!err.is_name_conflict());
        assert_eq!(err.code(), "ResourceNotFoundException");
    }
}
