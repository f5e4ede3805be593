use std::sync::Arc;

use serde_json::json;
use time::{Duration, OffsetDateTime, UtcOffset};
use tracing::{debug, warn};

use crate::app::read_state::ReadStateStore;
use crate::domain::notification::{
    attendance_missing_id, leave_request_id, leave_status_id, review_id, sort_notifications,
    NavigationTarget, Notification, NotificationKind, Priority,
};
use crate::domain::records::{
    date_to_string, datetime_to_string, AttendanceRecord, EmployeeRecord, LeaveRecord,
    LeaveState, ReviewRecord,
};
use crate::domain::session::Session;
use crate::infra::gateway::{query, Domain, GatewayError, Operator, QueryOptions, RecordGateway};

const PENDING_LEAVE_LIMIT: u32 = 10;
const OVERDUE_REVIEW_LIMIT: u32 = 5;
const DECIDED_LEAVE_LIMIT: u32 = 5;
const RECENT_REQUEST_WINDOW: Duration = Duration::hours(24);
const DECISION_WINDOW: Duration = Duration::hours(48);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationSettings {
    /// First local hour (inclusive) at which a missing check-in is reported.
    pub reminder_start_hour: u8,
    /// Local hour (exclusive) after which the reminder stops.
    pub reminder_end_hour: u8,
    pub local_offset: UtcOffset,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            reminder_start_hour: 10,
            reminder_end_hour: 18,
            local_offset: UtcOffset::UTC,
        }
    }
}

/// Builds the notification list for a session from several remote
/// collections.
#[derive(Clone)]
pub struct NotificationService {
    gateway: Arc<dyn RecordGateway>,
    read_state: ReadStateStore,
    settings: NotificationSettings,
}

impl NotificationService {
    pub fn new(
        gateway: Arc<dyn RecordGateway>,
        read_state: ReadStateStore,
        settings: NotificationSettings,
    ) -> Self {
        Self {
            gateway,
            read_state,
            settings,
        }
    }

    pub fn read_state(&self) -> &ReadStateStore {
        &self.read_state
    }

    pub async fn fetch(&self, session: &Session) -> Vec<Notification> {
        self.fetch_at(session, OffsetDateTime::now_utc()).await
    }

    /// Never fails: every query error degrades to fewer notifications.
    pub async fn fetch_at(&self, session: &Session, now: OffsetDateTime) -> Vec<Notification> {
        let employee = match self.find_employee(session).await {
            Ok(Some(employee)) => employee,
            Ok(None) => {
                debug!(uid = session.uid, "no employee linked to user");
                return Vec::new();
            }
            Err(err) => {
                warn!(error = %err, uid = session.uid, "failed to resolve employee");
                return Vec::new();
            }
        };

        let read_ids = self.read_state.read_ids(session).await;

        let (pending, reviews, decided, attendance) = tokio::join!(
            self.pending_leaves(session, now),
            self.overdue_reviews(session, now),
            self.decided_leaves(session, employee.id, now),
            self.attendance_reminder(session, employee.id, now),
        );

        let mut notifications = reviews;
        for (source, result) in [
            ("pending_leaves", pending),
            ("decided_leaves", decided),
            ("attendance", attendance),
        ] {
            match result {
                Ok(items) => notifications.extend(items),
                Err(err) => {
                    warn!(error = %err, uid = session.uid, source, "notification query failed")
                }
            }
        }

        for notification in &mut notifications {
            notification.read = read_ids.contains(&notification.id);
        }
        sort_notifications(&mut notifications);

        debug!(
            uid = session.uid,
            total = notifications.len(),
            unread = unread_count(&notifications),
            "fetched notifications"
        );
        notifications
    }

    pub async fn mark_read(
        &self,
        session: &Session,
        id: &str,
        mut notifications: Vec<Notification>,
    ) -> Vec<Notification> {
        self.read_state.mark_read(session, id).await;
        for notification in notifications.iter_mut().filter(|n| n.id == id) {
            notification.read = true;
        }
        notifications
    }

    pub async fn mark_all_read(
        &self,
        session: &Session,
        mut notifications: Vec<Notification>,
    ) -> Vec<Notification> {
        self.read_state
            .mark_all_read(session, notifications.iter().map(|n| n.id.clone()))
            .await;
        for notification in &mut notifications {
            notification.read = true;
        }
        notifications
    }

    /// Marks the notification read (if needed) and resolves where the
    /// client should navigate. `None` if `id` is not in the list.
    pub async fn open(
        &self,
        session: &Session,
        id: &str,
        notifications: Vec<Notification>,
    ) -> Option<(Vec<Notification>, NavigationTarget)> {
        let (was_read, target) = notifications
            .iter()
            .find(|n| n.id == id)
            .map(|n| (n.read, n.target()))?;

        let notifications = if was_read {
            notifications
        } else {
            self.mark_read(session, id, notifications).await
        };
        Some((notifications, target))
    }

    async fn find_employee(
        &self,
        session: &Session,
    ) -> Result<Option<EmployeeRecord>, GatewayError> {
        let domain = Domain::new().eq("user_id", session.uid);
        let options = QueryOptions::for_record::<EmployeeRecord>().limit(1);
        let employees: Vec<EmployeeRecord> =
            query(self.gateway.as_ref(), session, &domain, &options).await?;
        Ok(employees.into_iter().next())
    }

    async fn pending_leaves(
        &self,
        session: &Session,
        now: OffsetDateTime,
    ) -> Result<Vec<Notification>, GatewayError> {
        if !session.is_admin {
            return Ok(Vec::new());
        }

        let domain = Domain::new().eq("state", LeaveState::Confirm.as_str());
        let options = QueryOptions::for_record::<LeaveRecord>()
            .order("create_date desc")
            .limit(PENDING_LEAVE_LIMIT);
        let leaves: Vec<LeaveRecord> =
            query(self.gateway.as_ref(), session, &domain, &options).await?;

        Ok(leaves
            .iter()
            .map(|leave| {
                let created = leave.create_date.unwrap_or(now);
                let priority = if now - created < RECENT_REQUEST_WINDOW {
                    Priority::High
                } else {
                    Priority::Medium
                };
                Notification {
                    id: leave_request_id(leave.id),
                    kind: NotificationKind::LeaveRequest,
                    title: "New Leave Request".to_string(),
                    message: format!(
                        "{} requested {} from {}",
                        leave.employee_name(),
                        leave.leave_type_name(),
                        self.local_date_label(leave.date_from)
                    ),
                    timestamp: created,
                    read: false,
                    related_id: Some(leave.id),
                    priority,
                }
            })
            .collect())
    }

    /// The review module is optional on the server, so any failure here
    /// counts as "no overdue reviews".
    async fn overdue_reviews(&self, session: &Session, now: OffsetDateTime) -> Vec<Notification> {
        if !session.is_admin {
            return Vec::new();
        }

        let offset = self.settings.local_offset;
        let local_now = now.to_offset(offset);
        let domain = Domain::new().eq("state", "ongoing").with(
            "end_date",
            Operator::Lt,
            date_to_string(local_now.date()),
        );
        let options = QueryOptions::for_record::<ReviewRecord>().limit(OVERDUE_REVIEW_LIMIT);

        let reviews: Vec<ReviewRecord> =
            match query(self.gateway.as_ref(), session, &domain, &options).await {
                Ok(reviews) => reviews,
                Err(err) if err.is_missing_collection() => {
                    debug!(error = %err, "performance reviews not available");
                    return Vec::new();
                }
                Err(err) => {
                    warn!(error = %err, uid = session.uid, "failed to load overdue reviews");
                    return Vec::new();
                }
            };

        reviews
            .iter()
            .map(|review| {
                let employee = review
                    .employee
                    .as_ref()
                    .map(|employee| employee.name.as_str())
                    .unwrap_or("an employee");
                let due = review
                    .end_date
                    .map(date_to_string)
                    .unwrap_or_else(|| "an unspecified date".to_string());
                Notification {
                    id: review_id(review.id),
                    kind: NotificationKind::ReviewDue,
                    title: "Performance Review Overdue".to_string(),
                    message: format!("Review for {} was due on {}", employee, due),
                    timestamp: review
                        .end_date
                        .map(|day| day.midnight().assume_offset(offset))
                        .unwrap_or(local_now),
                    read: false,
                    related_id: Some(review.id),
                    priority: Priority::High,
                }
            })
            .collect()
    }

    async fn decided_leaves(
        &self,
        session: &Session,
        employee_id: i64,
        now: OffsetDateTime,
    ) -> Result<Vec<Notification>, GatewayError> {
        let cutoff = now - DECISION_WINDOW;
        let domain = Domain::new()
            .eq("employee_id", employee_id)
            .with(
                "state",
                Operator::In,
                json!([LeaveState::Validate.as_str(), LeaveState::Refuse.as_str()]),
            )
            .with("write_date", Operator::Ge, datetime_to_string(cutoff));
        let options = QueryOptions::for_record::<LeaveRecord>()
            .order("write_date desc")
            .limit(DECIDED_LEAVE_LIMIT);
        let leaves: Vec<LeaveRecord> =
            query(self.gateway.as_ref(), session, &domain, &options).await?;

        Ok(leaves
            .iter()
            .filter_map(|leave| {
                let updated = leave.write_date?;
                if now - updated >= DECISION_WINDOW {
                    return None;
                }
                let (kind, title, verb, priority) = match leave.state {
                    LeaveState::Validate => (
                        NotificationKind::LeaveApproved,
                        "Leave Approved",
                        "approved",
                        Priority::Medium,
                    ),
                    LeaveState::Refuse => (
                        NotificationKind::LeaveRejected,
                        "Leave Rejected",
                        "rejected",
                        Priority::High,
                    ),
                    _ => return None,
                };
                Some(Notification {
                    id: leave_status_id(leave.id),
                    kind,
                    title: title.to_string(),
                    message: format!(
                        "Your {} request for {} was {}",
                        leave.leave_type_name(),
                        self.local_date_label(leave.date_from),
                        verb
                    ),
                    timestamp: updated,
                    read: false,
                    related_id: Some(leave.id),
                    priority,
                })
            })
            .collect())
    }

    async fn attendance_reminder(
        &self,
        session: &Session,
        employee_id: i64,
        now: OffsetDateTime,
    ) -> Result<Vec<Notification>, GatewayError> {
        let offset = self.settings.local_offset;
        let local_now = now.to_offset(offset);
        let hour = local_now.hour();
        if hour < self.settings.reminder_start_hour || hour >= self.settings.reminder_end_hour {
            return Ok(Vec::new());
        }

        let today = local_now.date();
        let day_start = today.midnight().assume_offset(offset);
        let day_end = day_start + Duration::days(1) - Duration::seconds(1);
        let domain = Domain::new()
            .eq("employee_id", employee_id)
            .with("check_in", Operator::Ge, datetime_to_string(day_start))
            .with("check_in", Operator::Le, datetime_to_string(day_end));
        let options = QueryOptions::for_record::<AttendanceRecord>().limit(1);
        let records: Vec<AttendanceRecord> =
            query(self.gateway.as_ref(), session, &domain, &options).await?;

        if !records.is_empty() {
            return Ok(Vec::new());
        }

        Ok(vec![Notification {
            id: attendance_missing_id(today),
            kind: NotificationKind::AttendanceAlert,
            title: "Attendance Reminder".to_string(),
            message: "You haven't checked in today. Don't forget to mark your attendance!"
                .to_string(),
            timestamp: now,
            read: false,
            related_id: None,
            priority: Priority::Medium,
        }])
    }

    fn local_date_label(&self, value: Option<OffsetDateTime>) -> String {
        value
            .map(|value| date_to_string(value.to_offset(self.settings.local_offset).date()))
            .unwrap_or_else(|| "an unspecified date".to_string())
    }
}

pub fn unread_count(notifications: &[Notification]) -> usize {
    notifications.iter().filter(|n| !n.read).count()
}
