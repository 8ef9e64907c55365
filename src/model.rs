use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ingest bounds for an activity's `maxScore`. Re-applied every time a sheet
/// is read back from the store, not only when it is authored.
pub const MAX_SCORE_FLOOR: f64 = 1.0;
pub const MAX_SCORE_CEIL: f64 = 5.0;

pub const UNTITLED_ACTIVITY: &str = "Untitled activity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Exam,
    Quiz,
    Homework,
    Project,
    Participation,
    SelfEvaluation,
    Presentation,
    Lab,
    Essay,
}

impl Default for ActivityKind {
    fn default() -> Self {
        ActivityKind::Homework
    }
}

/// One evaluable unit of work within a grade sheet. `kind` is descriptive
/// only and never affects scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_max_score")]
    pub max_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(rename = "type", default)]
    pub kind: ActivityKind,
}

fn default_max_score() -> f64 {
    MAX_SCORE_CEIL
}

impl Activity {
    /// Substitute defaults for missing fields and re-clamp `max_score`.
    /// Partial documents are common while a sheet is being authored, so
    /// malformed values fall back rather than fail.
    pub fn normalize(&mut self) {
        if self.name.trim().is_empty() {
            self.name = UNTITLED_ACTIVITY.to_string();
        }
        if !self.max_score.is_finite() || self.max_score <= 0.0 {
            self.max_score = MAX_SCORE_CEIL;
        }
        self.max_score = self.max_score.clamp(MAX_SCORE_FLOOR, MAX_SCORE_CEIL);
        if let Some(w) = self.weight {
            if !w.is_finite() || w <= 0.0 {
                self.weight = None;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingPeriod {
    FirstTerm,
    SecondTerm,
    Final,
}

impl GradingPeriod {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "first_term" => Some(GradingPeriod::FirstTerm),
            "second_term" => Some(GradingPeriod::SecondTerm),
            "final" => Some(GradingPeriod::Final),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GradingPeriod::FirstTerm => "first_term",
            GradingPeriod::SecondTerm => "second_term",
            GradingPeriod::Final => "final",
        }
    }
}

/// Derived per-sheet grading state. Never persisted as editable state; both
/// the mutation path and the load path re-derive it from the cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeStatus {
    Pending,
    Completed,
    Incomplete,
}

impl Default for GradeStatus {
    fn default() -> Self {
        GradeStatus::Pending
    }
}

impl GradeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GradeStatus::Pending => "pending",
            GradeStatus::Completed => "completed",
            GradeStatus::Incomplete => "incomplete",
        }
    }
}

/// One grade cell. `value: None` means "ungraded", which is distinct from a
/// scored zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeCell {
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl GradeCell {
    pub fn ungraded() -> Self {
        GradeCell::default()
    }

    pub fn is_graded(&self) -> bool {
        self.value.is_some()
    }
}

/// A student's record within one grade sheet. `total` (0-5) and `status` are
/// derived from `grades` and the sheet's activity list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGrade {
    pub student_id: String,
    pub student_name: String,
    #[serde(default)]
    pub grades: HashMap<String, GradeCell>,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub status: GradeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graded_by: Option<String>,
}

impl StudentGrade {
    pub fn new(student_id: impl Into<String>, student_name: impl Into<String>) -> Self {
        StudentGrade {
            student_id: student_id.into(),
            student_name: student_name.into(),
            grades: HashMap::new(),
            total: 0.0,
            status: GradeStatus::Pending,
            graded_by: None,
        }
    }
}

/// Per-course, per-period container of activities and student scores.
/// Persisted as one whole document so a save replaces the activity list and
/// every student row atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSheet {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub grading_period: GradingPeriod,
    pub is_published: bool,
    pub activities: Vec<Activity>,
    pub students: Vec<StudentGrade>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl GradeSheet {
    pub fn student(&self, student_id: &str) -> Option<&StudentGrade> {
        self.students.iter().find(|s| s.student_id == student_id)
    }
}

/// Case-insensitive name order, student id as a deterministic tie-break.
/// Re-applied after every mutation so export and display order stay stable.
pub fn sort_students(students: &mut [StudentGrade]) {
    students.sort_by(|a, b| {
        a.student_name
            .to_lowercase()
            .cmp(&b.student_name.to_lowercase())
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
}

/// Timestamps arrive from the shell in whatever shape its store hands back:
/// an RFC 3339 string, epoch milliseconds, or a `{ seconds, nanoseconds }`
/// server-timestamp wrapper. Anything else is treated as absent.
pub fn coerce_timestamp(raw: Option<&serde_json::Value>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    if let Some(s) = raw.as_str() {
        return DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc));
    }
    if let Some(ms) = raw.as_i64() {
        return Utc.timestamp_millis_opt(ms).single();
    }
    if let Some(obj) = raw.as_object() {
        let secs = obj.get("seconds").and_then(|v| v.as_i64())?;
        let nanos = obj
            .get("nanoseconds")
            .or_else(|| obj.get("nanos"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        return Utc.timestamp_opt(secs, nanos as u32).single();
    }
    None
}
