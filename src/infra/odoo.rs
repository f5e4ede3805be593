use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::config::AppConfig;
use crate::domain::session::Session;
use crate::infra::gateway::{
    Authenticator, Domain, GatewayError, Identity, QueryOptions, RecordGateway,
};

/// JSON-RPC client for the ERP's `/jsonrpc` endpoint.
#[derive(Clone)]
pub struct OdooClient {
    http: reqwest::Client,
    endpoint: Url,
    database: String,
    manager_group: String,
    next_id: Arc<AtomicU64>,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<RpcFaultData>,
}

#[derive(Debug, Deserialize)]
struct RpcFaultData {
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
}

impl OdooClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let endpoint = jsonrpc_endpoint(&config.odoo_url)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.odoo_timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            endpoint,
            database: config.odoo_db.clone(),
            manager_group: config.manager_group.clone(),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub async fn call(
        &self,
        service: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, GatewayError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": {
                "service": service,
                "method": method,
                "args": args,
            },
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });

        let response: RpcResponse = self
            .http
            .post(self.endpoint.clone())
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(fault) = response.error {
            return Err(fault_to_error(fault));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Returns the uid, or `None` when the server answers `false`.
    pub async fn login(&self, login: &str, password: &str) -> Result<Option<i64>, GatewayError> {
        let result = self
            .call("common", "login", json!([self.database, login, password]))
            .await?;
        match result {
            Value::Number(uid) => uid
                .as_i64()
                .map(Some)
                .ok_or_else(|| GatewayError::UnexpectedResponse(format!("uid {}", uid))),
            Value::Bool(false) | Value::Null => Ok(None),
            other => Err(GatewayError::UnexpectedResponse(format!(
                "login returned {}",
                other
            ))),
        }
    }

    pub async fn execute_kw(
        &self,
        uid: i64,
        secret: &str,
        model: &str,
        method: &str,
        args: Value,
        kwargs: Value,
    ) -> Result<Value, GatewayError> {
        debug!(model, method, uid, "execute_kw");
        let result = self
            .call(
                "object",
                "execute_kw",
                json!([self.database, uid, secret, model, method, args, kwargs]),
            )
            .await;

        result.map_err(|err| match err {
            GatewayError::Remote { message } if is_missing_model(&message, model) => {
                GatewayError::MissingCollection(model.to_string())
            }
            other => other,
        })
    }

    pub async fn has_group(
        &self,
        uid: i64,
        secret: &str,
        group: &str,
    ) -> Result<bool, GatewayError> {
        let result = self
            .execute_kw(uid, secret, "res.users", "has_group", json!([[uid], group]), json!({}))
            .await?;
        Ok(result.as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl RecordGateway for OdooClient {
    async fn search_read(
        &self,
        session: &Session,
        collection: &str,
        domain: &Domain,
        options: &QueryOptions,
    ) -> Result<Vec<Value>, GatewayError> {
        let mut kwargs = Map::new();
        kwargs.insert("fields".to_string(), json!(options.fields));
        if let Some(order) = &options.order {
            kwargs.insert("order".to_string(), json!(order));
        }
        if let Some(limit) = options.limit {
            kwargs.insert("limit".to_string(), json!(limit));
        }

        let result = self
            .execute_kw(
                session.uid,
                &session.secret,
                collection,
                "search_read",
                json!([domain]),
                Value::Object(kwargs),
            )
            .await?;

        match result {
            Value::Array(rows) => Ok(rows),
            other => Err(GatewayError::UnexpectedResponse(format!(
                "search_read on {} returned {}",
                collection, other
            ))),
        }
    }
}

#[async_trait]
impl Authenticator for OdooClient {
    async fn authenticate(
        &self,
        login: &str,
        password: &str,
    ) -> Result<Option<Identity>, GatewayError> {
        let Some(uid) = self.login(login, password).await? else {
            return Ok(None);
        };

        let is_admin = match self.has_group(uid, password, &self.manager_group).await {
            Ok(is_admin) => is_admin,
            Err(err) => {
                warn!(
                    error = %err,
                    uid,
                    group = %self.manager_group,
                    "group check failed, treating as standard user"
                );
                false
            }
        };

        Ok(Some(Identity { uid, is_admin }))
    }
}

fn jsonrpc_endpoint(base: &str) -> Result<Url> {
    let mut base = base.trim_end_matches('/').to_string();
    base.push('/');
    let base = Url::parse(&base).map_err(|err| anyhow!("invalid ODOO_URL: {}", err))?;
    Ok(base.join("jsonrpc")?)
}

fn fault_to_error(fault: RpcFault) -> GatewayError {
    let message = match fault.data {
        // The server raises KeyError('<model>') for unknown models.
        Some(data) if data.name.contains("KeyError") => {
            return GatewayError::MissingCollection(data.message.trim_matches('\'').to_string());
        }
        Some(data) if !data.message.is_empty() => data.message,
        _ => fault.message,
    };
    GatewayError::Remote { message }
}

fn is_missing_model(message: &str, model: &str) -> bool {
    message.contains(&format!("Object {} doesn't exist", model))
        || (message.contains(&format!("'{}'", model)) && message.contains("KeyError"))
}
