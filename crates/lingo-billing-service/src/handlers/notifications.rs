//! In-app notification handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use lingo_billing_core::{Notification, NotificationId, NotificationKind};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Notification list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    /// Only return unread notifications.
    #[serde(default)]
    pub unread_only: bool,
    /// Maximum number of notifications to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Notification response.
#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    /// Notification ID.
    pub id: String,
    /// Category.
    pub kind: NotificationKind,
    /// Title.
    pub title: String,
    /// Body.
    pub body: String,
    /// Structured context.
    pub data: serde_json::Value,
    /// Read flag.
    pub read: bool,
    /// Deep link.
    pub action_url: Option<String>,
    /// Timestamp.
    pub created_at: String,
}

impl From<&Notification> for NotificationResponse {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id.to_string(),
            kind: n.kind,
            title: n.title.clone(),
            body: n.body.clone(),
            data: n.data.clone(),
            read: n.read,
            action_url: n.action_url.clone(),
            created_at: n.created_at.to_rfc3339(),
        }
    }
}

/// List notifications response.
#[derive(Debug, Serialize)]
pub struct ListNotificationsResponse {
    /// Notifications (newest first).
    pub notifications: Vec<NotificationResponse>,
}

/// List the caller's notifications.
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<Json<ListNotificationsResponse>, ApiError> {
    let limit = query.limit.min(100);
    let notifications = state
        .store
        .list_notifications(&auth.user_id, query.unread_only, limit)?;

    Ok(Json(ListNotificationsResponse {
        notifications: notifications.iter().map(NotificationResponse::from).collect(),
    }))
}

/// Mark one of the caller's notifications as read.
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<NotificationResponse>, ApiError> {
    let id: NotificationId = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid notification id: {id}")))?;

    let notification = state
        .store
        .set_notification_read(&auth.user_id, &id, true)
        .map_err(|e| match e {
            lingo_billing_store::StoreError::NotFound => {
                ApiError::NotFound("Notification not found".into())
            }
            other => other.into(),
        })?;

    Ok(Json(NotificationResponse::from(&notification)))
}
