use serde::Serialize;
use serde_json::{json, Value};

/// Day names indexed by `dayOfWeek` (0 = Sunday).
pub const DAY_LABELS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

pub fn is_valid_day(day: i64) -> bool {
    (0..=6).contains(&day)
}

pub fn day_label(day: u8) -> &'static str {
    DAY_LABELS.get(day as usize).copied().unwrap_or("")
}

#[derive(Debug, Clone, Serialize)]
pub struct TimetableError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl TimetableError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn no_linkage(message: impl Into<String>) -> Self {
        Self::new("no_linkage", message)
    }

    pub fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Term {
    pub id: String,
    pub number: i64,
    pub label: String,
    pub year: i64,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub id: String,
    pub term_id: String,
    pub name: String,
    pub start_time: String,
    pub end_time: String,
    pub sort_order: i64,
    pub is_break: bool,
}

/// One weekly assignment. Display names are filled by the store join and are
/// never used for conflict detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: String,
    pub term_id: String,
    pub day_of_week: u8,
    pub period_id: String,
    pub class_id: String,
    pub teacher_id: String,
    pub room_id: String,
    pub subject: String,
    pub class_name: String,
    pub teacher_name: String,
    pub room_name: String,
}

/// Workspace-level timetable settings (`setup.timetable`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimetableSettings {
    pub working_days: Vec<u8>,
    pub lunch_after_period: Option<u32>,
    pub rtl: bool,
    pub show_breaks: bool,
}

impl Default for TimetableSettings {
    fn default() -> Self {
        Self {
            working_days: vec![0, 1, 2, 3, 4],
            lunch_after_period: Some(4),
            rtl: false,
            show_breaks: false,
        }
    }
}

impl TimetableSettings {
    pub fn to_json(&self) -> Value {
        json!({
            "workingDays": self.working_days,
            "lunchAfterPeriod": self.lunch_after_period,
            "rtl": self.rtl,
            "showBreaks": self.show_breaks,
        })
    }

    /// Reads an already-validated section object. Fields that are missing or
    /// of the wrong shape keep their defaults.
    pub fn from_json(section: &Value) -> Self {
        let mut out = Self::default();
        if let Some(days) = section.get("workingDays").and_then(|v| v.as_array()) {
            let parsed: Vec<u8> = days
                .iter()
                .filter_map(|d| d.as_i64())
                .filter(|d| is_valid_day(*d))
                .map(|d| d as u8)
                .collect();
            if !parsed.is_empty() {
                out.working_days = parsed;
            }
        }
        match section.get("lunchAfterPeriod") {
            Some(Value::Null) => out.lunch_after_period = None,
            Some(v) => {
                if let Some(n) = v.as_u64() {
                    out.lunch_after_period = Some(n as u32);
                }
            }
            None => {}
        }
        if let Some(b) = section.get("rtl").and_then(|v| v.as_bool()) {
            out.rtl = b;
        }
        if let Some(b) = section.get("showBreaks").and_then(|v| v.as_bool()) {
            out.show_breaks = b;
        }
        out
    }
}

#[cfg(test)]
pub(crate) fn slot(id: &str, day: u8, period: &str, teacher: &str, class: &str, room: &str) -> Slot {
    Slot {
        id: id.to_string(),
        term_id: "term".to_string(),
        day_of_week: day,
        period_id: period.to_string(),
        class_id: class.to_string(),
        teacher_id: teacher.to_string(),
        room_id: room.to_string(),
        subject: format!("Subject {}", id),
        class_name: class.to_string(),
        teacher_name: teacher.to_string(),
        room_name: room.to_string(),
    }
}

#[cfg(test)]
pub(crate) fn period(id: &str, sort_order: i64, is_break: bool) -> Period {
    Period {
        id: id.to_string(),
        term_id: "term".to_string(),
        name: id.to_string(),
        start_time: format!("{:02}:00", 7 + sort_order),
        end_time: format!("{:02}:45", 7 + sort_order),
        sort_order,
        is_break,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip_through_section_json() {
        let s = TimetableSettings {
            working_days: vec![1, 2, 3],
            lunch_after_period: None,
            rtl: true,
            show_breaks: false,
        };
        assert_eq!(TimetableSettings::from_json(&s.to_json()), s);
    }

    #[test]
    fn settings_ignore_out_of_range_days() {
        let s = TimetableSettings::from_json(&json!({ "workingDays": [9, -1] }));
        assert_eq!(s.working_days, vec![0, 1, 2, 3, 4]);
    }
}
