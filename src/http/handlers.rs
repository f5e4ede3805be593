use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::app::auth::AuthService;
use crate::app::notifications::{unread_count, NotificationService};
use crate::domain::notification::{NavigationTarget, Notification};
use crate::http::{AppError, AuthUser};
use crate::AppState;

const MAX_NOTIFICATION_ID_LEN: usize = 128;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = match state.kv.ping().await {
        Ok(()) => "ok",
        Err(err) => {
            tracing::warn!(error = ?err, "read-state store ping failed");
            "degraded"
        }
    };

    Json(HealthResponse { status })
}

fn notification_service(state: &AppState) -> NotificationService {
    NotificationService::new(
        state.gateway.clone(),
        state.read_state.clone(),
        state.notification_settings,
    )
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub uid: i64,
    pub is_admin: bool,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    const MAX_CREDENTIAL_LEN: usize = 128;

    if payload.login.trim().is_empty() || payload.password.is_empty() {
        return Err(AppError::bad_request("login and password are required"));
    }
    if payload.login.len() > MAX_CREDENTIAL_LEN || payload.password.len() > MAX_CREDENTIAL_LEN {
        return Err(AppError::bad_request(
            "login and password must be at most 128 characters",
        ));
    }

    let service = AuthService::new(
        state.authenticator.clone(),
        state.session_key,
        state.session_ttl_minutes,
    );
    let issued = service
        .login(payload.login.trim(), &payload.password)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to login");
            AppError::bad_gateway("failed to reach ERP")
        })?
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    Ok(Json(LoginResponse {
        access_token: issued.token,
        expires_at: issued.expires_at,
        uid: issued.session.uid,
        is_admin: issued.session.is_admin,
    }))
}

#[derive(Serialize)]
pub struct MeResponse {
    pub uid: i64,
    pub login: String,
    pub is_admin: bool,
}

pub async fn me(auth: AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        uid: auth.session.uid,
        login: auth.session.login,
        is_admin: auth.session.is_admin,
    })
}

#[derive(Serialize)]
pub struct NotificationListResponse {
    pub items: Vec<Notification>,
    pub unread_count: usize,
}

impl From<Vec<Notification>> for NotificationListResponse {
    fn from(items: Vec<Notification>) -> Self {
        let unread_count = unread_count(&items);
        Self {
            items,
            unread_count,
        }
    }
}

pub async fn list_notifications(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Json<NotificationListResponse> {
    let service = notification_service(&state);
    let notifications = service.fetch(&auth.session).await;
    Json(notifications.into())
}

fn validate_notification_id(id: &str) -> Result<(), AppError> {
    if id.is_empty() || id.len() > MAX_NOTIFICATION_ID_LEN {
        return Err(AppError::bad_request(
            "notification id must be between 1 and 128 characters",
        ));
    }
    Ok(())
}

pub async fn mark_notification_read(
    auth: AuthUser,
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    validate_notification_id(&id)?;

    state.read_state.mark_read(&auth.session, &id).await;
    tracing::debug!(uid = auth.session.uid, notification_id = %id, "notification marked read");

    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_notifications_read(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Json<NotificationListResponse> {
    let service = notification_service(&state);
    let notifications = service.fetch(&auth.session).await;
    let notifications = service.mark_all_read(&auth.session, notifications).await;
    Json(notifications.into())
}

#[derive(Serialize)]
pub struct OpenNotificationResponse {
    pub notification: Notification,
    pub target: NavigationTarget,
}

pub async fn open_notification(
    auth: AuthUser,
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<OpenNotificationResponse>, AppError> {
    validate_notification_id(&id)?;

    let service = notification_service(&state);
    let notifications = service.fetch(&auth.session).await;
    let (notifications, target) = service
        .open(&auth.session, &id, notifications)
        .await
        .ok_or_else(|| AppError::not_found("notification not found"))?;

    let notification = notifications
        .into_iter()
        .find(|n| n.id == id)
        .ok_or_else(|| AppError::internal("notification vanished"))?;

    Ok(Json(OpenNotificationResponse {
        notification,
        target,
    }))
}
