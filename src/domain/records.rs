//! Typed views of the ERP collections the aggregator reads.
//!
//! The ERP encodes empty fields as `false`, many2one references as
//! `[id, "display name"]` and datetimes as naive UTC strings. Everything is
//! decoded here so the aggregator only ever sees known shapes.

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

const DATETIME_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
);
const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");
const FILTER_DATETIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// A record type stored in one named remote collection.
pub trait RemoteRecord: DeserializeOwned + Send {
    const COLLECTION: &'static str;
    const FIELDS: &'static [&'static str];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Many2One {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmployeeRecord {
    pub id: i64,
    #[serde(default, deserialize_with = "odoo_format::string")]
    pub name: String,
}

impl RemoteRecord for EmployeeRecord {
    const COLLECTION: &'static str = "hr.employee";
    const FIELDS: &'static [&'static str] = &["id", "name"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveState {
    Draft,
    Confirm,
    Validate1,
    Validate,
    Refuse,
    Cancel,
    #[serde(other)]
    Unknown,
}

impl LeaveState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Confirm => "confirm",
            Self::Validate1 => "validate1",
            Self::Validate => "validate",
            Self::Refuse => "refuse",
            Self::Cancel => "cancel",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaveRecord {
    pub id: i64,
    #[serde(rename = "employee_id", default, deserialize_with = "odoo_format::many2one")]
    pub employee: Option<Many2One>,
    #[serde(
        rename = "holiday_status_id",
        default,
        deserialize_with = "odoo_format::many2one"
    )]
    pub leave_type: Option<Many2One>,
    pub state: LeaveState,
    #[serde(default, deserialize_with = "odoo_format::datetime")]
    pub date_from: Option<OffsetDateTime>,
    #[serde(default, deserialize_with = "odoo_format::datetime")]
    pub date_to: Option<OffsetDateTime>,
    #[serde(default, deserialize_with = "odoo_format::datetime")]
    pub create_date: Option<OffsetDateTime>,
    #[serde(default, deserialize_with = "odoo_format::datetime")]
    pub write_date: Option<OffsetDateTime>,
}

impl LeaveRecord {
    pub fn employee_name(&self) -> &str {
        self.employee
            .as_ref()
            .map(|employee| employee.name.as_str())
            .unwrap_or("An employee")
    }

    pub fn leave_type_name(&self) -> &str {
        self.leave_type
            .as_ref()
            .map(|leave_type| leave_type.name.as_str())
            .unwrap_or("leave")
    }
}

impl RemoteRecord for LeaveRecord {
    const COLLECTION: &'static str = "hr.leave";
    const FIELDS: &'static [&'static str] = &[
        "id",
        "employee_id",
        "holiday_status_id",
        "state",
        "date_from",
        "date_to",
        "create_date",
        "write_date",
    ];
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewRecord {
    pub id: i64,
    #[serde(rename = "employee_id", default, deserialize_with = "odoo_format::many2one")]
    pub employee: Option<Many2One>,
    #[serde(default, deserialize_with = "odoo_format::date")]
    pub end_date: Option<Date>,
}

impl RemoteRecord for ReviewRecord {
    const COLLECTION: &'static str = "hr.performance.review";
    const FIELDS: &'static [&'static str] = &["id", "employee_id", "end_date"];
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttendanceRecord {
    pub id: i64,
    #[serde(default, deserialize_with = "odoo_format::datetime")]
    pub check_in: Option<OffsetDateTime>,
    #[serde(default, deserialize_with = "odoo_format::datetime")]
    pub check_out: Option<OffsetDateTime>,
}

impl RemoteRecord for AttendanceRecord {
    const COLLECTION: &'static str = "hr.attendance";
    const FIELDS: &'static [&'static str] = &["id", "check_in", "check_out"];
}

pub fn parse_datetime(value: &str) -> Result<OffsetDateTime, time::error::Parse> {
    Ok(PrimitiveDateTime::parse(value, DATETIME_FORMAT)?.assume_utc())
}

pub fn parse_date(value: &str) -> Result<Date, time::error::Parse> {
    Date::parse(value, DATE_FORMAT)
}

// Both descriptions only name components a complete date or time carries,
// so formatting cannot fail.
pub fn date_to_string(date: Date) -> String {
    date.format(DATE_FORMAT).unwrap_or_default()
}

/// Formats an instant the way the ERP expects datetimes in filters: naive UTC.
pub fn datetime_to_string(value: OffsetDateTime) -> String {
    value
        .to_offset(time::UtcOffset::UTC)
        .format(FILTER_DATETIME_FORMAT)
        .unwrap_or_default()
}

mod odoo_format {
    use super::*;

    /// `false` (and `null`) mean "no value" on the ERP wire.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Field<T> {
        Value(T),
        Empty(bool),
    }

    fn optional<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        match Option::<Field<T>>::deserialize(deserializer)? {
            Some(Field::Value(value)) => Ok(Some(value)),
            Some(Field::Empty(_)) | None => Ok(None),
        }
    }

    pub fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(optional::<D, String>(deserializer)?.unwrap_or_default())
    }

    pub fn many2one<'de, D>(deserializer: D) -> Result<Option<Many2One>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(optional::<D, (i64, String)>(deserializer)?.map(|(id, name)| Many2One { id, name }))
    }

    pub fn datetime<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        optional::<D, String>(deserializer)?
            .map(|value| parse_datetime(&value).map_err(serde::de::Error::custom))
            .transpose()
    }

    pub fn date<'de, D>(deserializer: D) -> Result<Option<Date>, D::Error>
    where
        D: Deserializer<'de>,
    {
        optional::<D, String>(deserializer)?
            .map(|value| parse_date(&value).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::{date, datetime};

    #[test]
    fn decodes_leave_with_many2one_and_datetimes() {
        let leave: LeaveRecord = serde_json::from_value(json!({
            "id": 42,
            "employee_id": [3, "Pal Gandhi"],
            "holiday_status_id": [1, "Paid Time Off"],
            "state": "confirm",
            "date_from": "2024-05-06 09:00:00",
            "date_to": "2024-05-07 18:00:00",
            "create_date": "2024-05-01 08:15:30.123456",
            "write_date": false
        }))
        .unwrap();

        assert_eq!(leave.employee_name(), "Pal Gandhi");
        assert_eq!(leave.leave_type_name(), "Paid Time Off");
        assert_eq!(leave.state, LeaveState::Confirm);
        assert_eq!(leave.date_from, Some(datetime!(2024-05-06 09:00 UTC)));
        assert_eq!(
            leave.create_date.map(|value| value.unix_timestamp()),
            Some(datetime!(2024-05-01 08:15:30 UTC).unix_timestamp())
        );
        assert_eq!(leave.write_date, None);
    }

    #[test]
    fn false_many2one_falls_back_to_placeholders() {
        let leave: LeaveRecord = serde_json::from_value(json!({
            "id": 1,
            "employee_id": false,
            "holiday_status_id": false,
            "state": "validate"
        }))
        .unwrap();

        assert_eq!(leave.employee_name(), "An employee");
        assert_eq!(leave.leave_type_name(), "leave");
        assert_eq!(leave.date_from, None);
    }

    #[test]
    fn unknown_leave_state_does_not_fail_decoding() {
        let leave: LeaveRecord =
            serde_json::from_value(json!({ "id": 1, "state": "archived" })).unwrap();
        assert_eq!(leave.state, LeaveState::Unknown);
    }

    #[test]
    fn decodes_review_end_date() {
        let review: ReviewRecord = serde_json::from_value(json!({
            "id": 7,
            "employee_id": [3, "Pal Gandhi"],
            "end_date": "2024-04-30"
        }))
        .unwrap();
        assert_eq!(review.end_date, Some(date!(2024 - 04 - 30)));
    }

    #[test]
    fn rejects_malformed_datetime() {
        let result: Result<AttendanceRecord, _> =
            serde_json::from_value(json!({ "id": 1, "check_in": "yesterday" }));
        assert!(result.is_err());
    }

    #[test]
    fn formats_filter_values_in_utc() {
        let value = datetime!(2024-05-01 01:30 +05:30);
        assert_eq!(datetime_to_string(value), "2024-04-30 20:00:00");
        assert_eq!(date_to_string(date!(2024 - 01 - 09)), "2024-01-09");
    }

    #[test]
    fn filter_values_drop_subseconds() {
        let value = datetime!(2024-05-01 08:00:00.75 UTC);
        assert_eq!(datetime_to_string(value), "2024-05-01 08:00:00");
        assert_eq!(
            parse_datetime("2024-05-01 08:00:00").unwrap(),
            datetime!(2024-05-01 08:00 UTC)
        );
    }
}
