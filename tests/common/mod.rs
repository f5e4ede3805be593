#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use time::{Duration, OffsetDateTime, UtcOffset};
use tower::ServiceExt;

use dayflow::app::notifications::NotificationSettings;
use dayflow::app::read_state::ReadStateStore;
use dayflow::domain::records::datetime_to_string;
use dayflow::domain::session::Session;
use dayflow::infra::gateway::{
    Authenticator, Domain, GatewayError, Identity, QueryOptions, RecordGateway,
};
use dayflow::infra::kv::{KeyValueStore, MemoryStore};
use dayflow::AppState;

// "0123456789abcdef0123456789abcdef" (32 bytes)
const TEST_SESSION_KEY: [u8; 32] = *b"0123456789abcdef0123456789abcdef";
pub const READ_STATE_NAMESPACE: &str = "dayflow_read_notifications";
pub const DATABASE: &str = "dayflow_test";

pub const MANAGER_LOGIN: &str = "admin";
pub const MANAGER_PASSWORD: &str = "admin-pass";
pub const MANAGER_UID: i64 = 2;
pub const EMPLOYEE_LOGIN: &str = "pal";
pub const EMPLOYEE_PASSWORD: &str = "pal-pass";
pub const EMPLOYEE_UID: i64 = 7;
/// Signs in successfully but has no linked employee profile.
pub const ORPHAN_LOGIN: &str = "orphan";
pub const ORPHAN_PASSWORD: &str = "orphan-pass";
/// The fake ERP answers this login with a transport-level failure.
pub const UNREACHABLE_LOGIN: &str = "unreachable";

// ---------------------------------------------------------------------------
// Fake ERP
// ---------------------------------------------------------------------------

/// In-memory stand-in for the ERP. Honors `=` and `in` conditions; range
/// conditions are ignored, so fixtures use recent timestamps.
#[derive(Default)]
pub struct FakeErp {
    records: Mutex<HashMap<String, Vec<Value>>>,
    missing: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeErp {
    pub fn set_records(&self, collection: &str, records: Vec<Value>) {
        self.records
            .lock()
            .unwrap()
            .insert(collection.to_string(), records);
    }

    /// Makes `collection` behave as if its module were not installed.
    pub fn remove_collection(&self, collection: &str) {
        self.missing.lock().unwrap().insert(collection.to_string());
    }

    pub fn fail_collection(&self, collection: &str) {
        self.failing.lock().unwrap().insert(collection.to_string());
    }
}

fn field_matches(record: &Value, field: &str, operator: &str, expected: &Value) -> bool {
    let actual = match record.get(field) {
        Some(Value::Array(pair)) => pair.first().cloned().unwrap_or(Value::Null),
        Some(value) => value.clone(),
        None => Value::Null,
    };
    match operator {
        "=" => &actual == expected,
        "in" => expected
            .as_array()
            .map_or(false, |values| values.contains(&actual)),
        _ => true,
    }
}

#[async_trait]
impl RecordGateway for FakeErp {
    async fn search_read(
        &self,
        _session: &Session,
        collection: &str,
        domain: &Domain,
        options: &QueryOptions,
    ) -> Result<Vec<Value>, GatewayError> {
        if self.missing.lock().unwrap().contains(collection) {
            return Err(GatewayError::MissingCollection(collection.to_string()));
        }
        if self.failing.lock().unwrap().contains(collection) {
            return Err(GatewayError::Remote {
                message: format!("{} is unavailable", collection),
            });
        }

        let conditions = serde_json::to_value(domain).unwrap();
        let conditions = conditions.as_array().cloned().unwrap_or_default();
        let records = self
            .records
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default();

        let mut rows: Vec<Value> = records
            .into_iter()
            .filter(|record| {
                conditions.iter().all(|condition| {
                    let field = condition[0].as_str().unwrap_or_default();
                    let operator = condition[1].as_str().unwrap_or_default();
                    field_matches(record, field, operator, &condition[2])
                })
            })
            .collect();
        if let Some(limit) = options.limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }
}

#[async_trait]
impl Authenticator for FakeErp {
    async fn authenticate(
        &self,
        login: &str,
        password: &str,
    ) -> Result<Option<Identity>, GatewayError> {
        let identity = match (login, password) {
            (MANAGER_LOGIN, MANAGER_PASSWORD) => Identity {
                uid: MANAGER_UID,
                is_admin: true,
            },
            (EMPLOYEE_LOGIN, EMPLOYEE_PASSWORD) => Identity {
                uid: EMPLOYEE_UID,
                is_admin: false,
            },
            (ORPHAN_LOGIN, ORPHAN_PASSWORD) => Identity {
                uid: 99,
                is_admin: false,
            },
            (UNREACHABLE_LOGIN, _) => {
                return Err(GatewayError::UnexpectedResponse(
                    "connection reset".to_string(),
                ))
            }
            _ => return Ok(None),
        };
        Ok(Some(identity))
    }
}

/// Formats `now - ago` the way the ERP serializes datetimes.
pub fn erp_datetime(ago: Duration) -> String {
    datetime_to_string(OffsetDateTime::now_utc() - ago)
}

pub fn seed_defaults(erp: &FakeErp) {
    erp.set_records(
        "hr.employee",
        vec![
            json!({
                "id": 1,
                "name": "Mitchell Admin",
                "user_id": [MANAGER_UID, "Mitchell Admin"]
            }),
            json!({ "id": 3, "name": "Pal Gandhi", "user_id": [EMPLOYEE_UID, "Pal Gandhi"] }),
        ],
    );
    erp.set_records(
        "hr.leave",
        vec![
            json!({
                "id": 41,
                "employee_id": [3, "Pal Gandhi"],
                "holiday_status_id": [1, "Paid Time Off"],
                "state": "confirm",
                "date_from": "2030-05-06 09:00:00",
                "date_to": "2030-05-07 17:00:00",
                "create_date": erp_datetime(Duration::hours(2)),
                "write_date": erp_datetime(Duration::hours(2))
            }),
            json!({
                "id": 42,
                "employee_id": [3, "Pal Gandhi"],
                "holiday_status_id": [2, "Sick Time Off"],
                "state": "validate",
                "date_from": "2030-04-01 09:00:00",
                "date_to": "2030-04-01 17:00:00",
                "create_date": erp_datetime(Duration::days(3)),
                "write_date": erp_datetime(Duration::hours(5))
            }),
        ],
    );
    erp.set_records(
        "hr.performance.review",
        vec![json!({
            "id": 9,
            "employee_id": [3, "Pal Gandhi"],
            "state": "ongoing",
            "end_date": "2020-01-31"
        })],
    );
    erp.set_records("hr.attendance", Vec::new());
}

// ---------------------------------------------------------------------------
// TestApp
// ---------------------------------------------------------------------------

pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub erp: Arc<FakeErp>,
    pub kv: Arc<MemoryStore>,
}

pub struct TestResponse {
    pub status: StatusCode,
    body_bytes: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap_or("").to_string()
    }
}

/// Builds a fresh app per test; all state lives in memory.
pub fn app() -> TestApp {
    TestApp::with_settings(NotificationSettings {
        // An empty window keeps the clock-dependent attendance reminder out.
        reminder_start_hour: 0,
        reminder_end_hour: 0,
        local_offset: UtcOffset::UTC,
    })
}

impl TestApp {
    pub fn with_settings(notification_settings: NotificationSettings) -> Self {
        let erp = Arc::new(FakeErp::default());
        seed_defaults(&erp);
        let kv = Arc::new(MemoryStore::new());

        let state = AppState {
            gateway: erp.clone(),
            authenticator: erp.clone(),
            kv: kv.clone(),
            read_state: ReadStateStore::new(kv.clone(), READ_STATE_NAMESPACE, DATABASE),
            notification_settings,
            session_key: TEST_SESSION_KEY,
            session_ttl_minutes: 60,
        };
        let router = dayflow::http::router(state.clone());

        TestApp {
            router,
            state,
            erp,
            kv,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot failed");
        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to read body")
            .to_bytes();

        TestResponse { status, body_bytes }
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::GET, path, None, token).await
    }

    pub async fn post(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::POST, path, None, token).await
    }

    pub async fn post_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        self.request(Method::POST, path, Some(body), token).await
    }

    /// Signs in through the API and returns the bearer token.
    pub async fn login(&self, login: &str, password: &str) -> String {
        let resp = self
            .post_json(
                "/auth/login",
                json!({ "login": login, "password": password }),
                None,
            )
            .await;
        assert_eq!(resp.status, StatusCode::OK, "login failed: {:?}", resp.json());
        resp.json()["access_token"]
            .as_str()
            .expect("missing access_token")
            .to_string()
    }

    pub async fn stored_read_ids(&self, uid: i64) -> Vec<String> {
        let key = format!("{}:{}:{}", READ_STATE_NAMESPACE, DATABASE, uid);
        match self.kv.get(&key).await.unwrap() {
            Some(raw) => serde_json::from_str(&raw).unwrap(),
            None => Vec::new(),
        }
    }
}

pub fn ids(body: &Value) -> Vec<String> {
    body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_str().unwrap().to_string())
        .collect()
}
