// Datamodel transport binding
//
// `DatamodelService` is the contract the proxy layer consumes: one method
// per RPC, no caching, no retries, errors surfaced unmodified. The HTTP
// implementation wraps `reqwest::Client` with solver-specific URL
// construction and error-envelope parsing; tests substitute in-process
// mocks behind the same trait.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;
use crate::wire::{
    DeleteObjectRequest, ExecuteCommandRequest, ExecuteCommandResponse, GetAttributeValueRequest,
    GetAttributeValueResponse, GetSpecsRequest, GetStateRequest, GetStateResponse,
    InitializeDatamodelRequest, SetStateRequest, SpecsResponse, Variant,
};

/// Unary RPC surface of the StateEngine datamodel service.
///
/// A pure transport shim: each method issues exactly one call against a
/// pre-built (rules, wire-path) pair and hands the raw response back for
/// the proxy layer to interpret.
#[async_trait]
pub trait DatamodelService: Send + Sync {
    /// Initialize the datamodel for a rules namespace.
    async fn initialize_datamodel(&self, rules: &str) -> Result<(), Error>;

    /// Fetch the schema description for a path.
    async fn get_specs(&self, rules: &str, path: &str) -> Result<SpecsResponse, Error>;

    /// Read the state at a path.
    async fn get_state(&self, rules: &str, path: &str) -> Result<Variant, Error>;

    /// Write the state at a path.
    ///
    /// Setting state on a not-yet-existing named-object path implicitly
    /// creates the instance — a contract the server provides, not one the
    /// client enforces. If the server rejects such a call it surfaces here
    /// as a solver error.
    async fn set_state(&self, rules: &str, path: &str, state: Variant) -> Result<(), Error>;

    /// Delete the named-object instance at a path.
    async fn delete_object(&self, rules: &str, path: &str) -> Result<(), Error>;

    /// Execute a command at a path.
    async fn execute_command(
        &self,
        rules: &str,
        path: &str,
        command: &str,
        args: Variant,
    ) -> Result<Variant, Error>;

    /// Read a single attribute of a node. The attribute name is passed
    /// verbatim — attributes are not schema-namespaced.
    async fn get_attribute_value(
        &self,
        rules: &str,
        path: &str,
        attribute: &str,
    ) -> Result<Variant, Error>;
}

// ── HTTP implementation ──────────────────────────────────────────────

/// HTTP client for the solver's datamodel endpoints.
///
/// Each RPC maps to `POST {base}/datamodel/v1/{op}` with a JSON body.
/// Error responses carry a `{ code, message }` body which is surfaced as
/// [`Error::Solver`]; this layer never interprets the code.
pub struct DatamodelClient {
    http: reqwest::Client,
    base_url: Url,
}

/// Error body the solver returns on non-2xx responses.
#[derive(Debug, serde::Deserialize)]
struct SolverErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl DatamodelClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// `base_url` is the solver service root (e.g. `https://solver-host:63084`).
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The solver base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build the URL for a datamodel operation.
    fn op_url(&self, op: &str) -> Result<Url, Error> {
        let full = format!(
            "{}/datamodel/v1/{op}",
            self.base_url.as_str().trim_end_matches('/')
        );
        Ok(Url::parse(&full)?)
    }

    /// Send one RPC and parse the typed response.
    async fn call<T: DeserializeOwned>(
        &self,
        op: &str,
        body: &impl Serialize,
    ) -> Result<T, Error> {
        let url = self.op_url(op)?;
        debug!("POST {url}");

        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        Self::parse_response(resp).await
    }

    /// Send one RPC whose success response carries no payload.
    async fn call_unit(&self, op: &str, body: &impl Serialize) -> Result<(), Error> {
        let url = self.op_url(op)?;
        debug!("POST {url}");

        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        if resp.status().is_success() {
            return Ok(());
        }
        Err(Self::error_from(resp).await)
    }

    async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    /// Turn a non-2xx response into an `Error`, preserving the solver's
    /// error body when it parses.
    async fn error_from(resp: reqwest::Response) -> Error {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Error::Authentication {
                message: "session token rejected or expired".into(),
            };
        }

        let parsed: SolverErrorBody = serde_json::from_str(&body).unwrap_or(SolverErrorBody {
            code: None,
            message: None,
        });

        Error::Solver {
            message: parsed
                .message
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            code: parsed.code,
            status: status.as_u16(),
        }
    }
}

#[async_trait]
impl DatamodelService for DatamodelClient {
    async fn initialize_datamodel(&self, rules: &str) -> Result<(), Error> {
        let req = InitializeDatamodelRequest { rules: rules.to_owned() };
        self.call_unit("initialize-datamodel", &req).await
    }

    async fn get_specs(&self, rules: &str, path: &str) -> Result<SpecsResponse, Error> {
        let req = GetSpecsRequest {
            rules: rules.to_owned(),
            path: path.to_owned(),
        };
        self.call("get-specs", &req).await
    }

    async fn get_state(&self, rules: &str, path: &str) -> Result<Variant, Error> {
        let req = GetStateRequest {
            rules: rules.to_owned(),
            path: path.to_owned(),
        };
        let resp: GetStateResponse = self.call("get-state", &req).await?;
        Ok(resp.state)
    }

    async fn set_state(&self, rules: &str, path: &str, state: Variant) -> Result<(), Error> {
        let req = SetStateRequest {
            rules: rules.to_owned(),
            path: path.to_owned(),
            state,
        };
        self.call_unit("set-state", &req).await
    }

    async fn delete_object(&self, rules: &str, path: &str) -> Result<(), Error> {
        let req = DeleteObjectRequest {
            rules: rules.to_owned(),
            path: path.to_owned(),
        };
        self.call_unit("delete-object", &req).await
    }

    async fn execute_command(
        &self,
        rules: &str,
        path: &str,
        command: &str,
        args: Variant,
    ) -> Result<Variant, Error> {
        let req = ExecuteCommandRequest {
            rules: rules.to_owned(),
            path: path.to_owned(),
            command: command.to_owned(),
            args,
        };
        let resp: ExecuteCommandResponse = self.call("execute-command", &req).await?;
        Ok(resp.result)
    }

    async fn get_attribute_value(
        &self,
        rules: &str,
        path: &str,
        attribute: &str,
    ) -> Result<Variant, Error> {
        let req = GetAttributeValueRequest {
            rules: rules.to_owned(),
            path: path.to_owned(),
            attribute: attribute.to_owned(),
        };
        let resp: GetAttributeValueResponse = self.call("get-attribute-value", &req).await?;
        Ok(resp.result)
    }
}
