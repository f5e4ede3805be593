//! Contract between the aggregator and the remote system of record.

use async_trait::async_trait;
use serde::ser::{SerializeTuple, Serializer};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::records::RemoteRecord;
use crate::domain::session::Session;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote error: {message}")]
    Remote { message: String },
    #[error("collection not available: {0}")]
    MissingCollection(String),
    #[error("failed to decode {collection} record: {source}")]
    Decode {
        collection: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl GatewayError {
    pub fn is_missing_collection(&self) -> bool {
        matches!(self, Self::MissingCollection(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
        }
    }
}

/// One `[field, operator, value]` filter triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.field)?;
        tuple.serialize_element(self.operator.as_str())?;
        tuple.serialize_element(&self.value)?;
        tuple.end()
    }
}

/// Conjunction of conditions, serialized as the ERP's domain list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Domain(Vec<Condition>);

impl Domain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, operator: Operator, value: impl Into<Value>) -> Self {
        self.0.push(Condition {
            field: field.to_string(),
            operator,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Operator::Eq, value)
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub fields: Vec<String>,
    pub order: Option<String>,
    pub limit: Option<u32>,
}

impl QueryOptions {
    pub fn for_record<T: RemoteRecord>() -> Self {
        Self {
            fields: T::FIELDS.iter().map(|field| field.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn order(mut self, order: &str) -> Self {
        self.order = Some(order.to_string());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait RecordGateway: Send + Sync {
    async fn search_read(
        &self,
        session: &Session,
        collection: &str,
        domain: &Domain,
        options: &QueryOptions,
    ) -> Result<Vec<Value>, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: i64,
    pub is_admin: bool,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns `None` when the credentials are rejected.
    async fn authenticate(
        &self,
        login: &str,
        password: &str,
    ) -> Result<Option<Identity>, GatewayError>;
}

/// Runs a filtered read against `T`'s collection and decodes every row.
pub async fn query<T: RemoteRecord>(
    gateway: &dyn RecordGateway,
    session: &Session,
    domain: &Domain,
    options: &QueryOptions,
) -> Result<Vec<T>, GatewayError> {
    let rows = gateway
        .search_read(session, T::COLLECTION, domain, options)
        .await?;
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row).map_err(|source| GatewayError::Decode {
                collection: T::COLLECTION,
                source,
            })
        })
        .collect()
}
