use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::domain::records::date_to_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    LeaveRequest,
    LeaveApproved,
    LeaveRejected,
    ReviewDue,
    AttendanceAlert,
    System,
}

impl NotificationKind {
    /// Dashboard view a client should open when the notification is clicked.
    pub fn view(self) -> View {
        match self {
            Self::LeaveRequest | Self::LeaveApproved | Self::LeaveRejected => View::Leave,
            Self::ReviewDue => View::Performance,
            Self::AttendanceAlert => View::Attendance,
            Self::System => View::Dashboard,
        }
    }
}

/// Declaration order is the display order: high sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    Dashboard,
    Leave,
    Performance,
    Attendance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationTarget {
    pub view: View,
    pub related_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub read: bool,
    pub related_id: Option<i64>,
    pub priority: Priority,
}

impl Notification {
    pub fn target(&self) -> NavigationTarget {
        NavigationTarget {
            view: self.kind.view(),
            related_id: self.related_id,
        }
    }
}

pub fn leave_request_id(leave_id: i64) -> String {
    format!("leave-{}", leave_id)
}

pub fn leave_status_id(leave_id: i64) -> String {
    format!("leave-status-{}", leave_id)
}

pub fn review_id(review_id: i64) -> String {
    format!("review-{}", review_id)
}

pub const ATTENDANCE_MISSING_PREFIX: &str = "attendance-missing-";

pub fn attendance_missing_id(day: Date) -> String {
    format!("{}{}", ATTENDANCE_MISSING_PREFIX, date_to_string(day))
}

/// Orders by priority, then newest first. The sort is stable so equal
/// entries keep their query order.
pub fn sort_notifications(notifications: &mut [Notification]) {
    notifications.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
    });
}
