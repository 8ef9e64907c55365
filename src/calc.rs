use crate::model::{sort_students, Activity, GradeCell, GradeSheet, GradeStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Legacy-compatible 1-decimal rounding used everywhere a grade is shown or
/// classified: `Int(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Rescale a raw score onto the common 0-5 scale. This runs exactly once per
/// raw value; raw scores from activities with different `maxScore` are never
/// averaged directly.
pub fn normalize_score(raw: f64, max_score: f64) -> f64 {
    if max_score > 0.0 {
        (raw / max_score) * 5.0
    } else {
        0.0
    }
}

/// Fallback weight share for activities without an explicit weight.
pub fn equal_share_weight(activity_count: usize) -> f64 {
    if activity_count == 0 {
        0.0
    } else {
        100.0 / activity_count as f64
    }
}

/// Unweighted arithmetic mean of normalized per-activity scores, 0.0 when
/// nothing is graded. Activity weights are deliberately ignored here; the
/// weighted formula lives in the course progress calculator.
pub fn compute_total(grades: &HashMap<String, GradeCell>, activities: &[Activity]) -> f64 {
    let mut sum = 0.0_f64;
    let mut graded = 0_usize;
    for a in activities {
        let Some(v) = grades.get(&a.id).and_then(|c| c.value) else {
            continue;
        };
        sum += normalize_score(v, a.max_score);
        graded += 1;
    }
    if graded > 0 {
        sum / graded as f64
    } else {
        0.0
    }
}

pub fn compute_status(grades: &HashMap<String, GradeCell>, activities: &[Activity]) -> GradeStatus {
    if activities.is_empty() {
        return GradeStatus::Pending;
    }
    let graded = activities
        .iter()
        .filter(|a| grades.get(&a.id).map(GradeCell::is_graded).unwrap_or(false))
        .count();
    if graded == 0 {
        GradeStatus::Pending
    } else if graded == activities.len() {
        GradeStatus::Completed
    } else {
        GradeStatus::Incomplete
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        CalcError {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Re-derive `total` and `status` for every student and restore name order.
/// Runs after every sheet mutation and after every load from the store.
pub fn recompute_sheet(sheet: &mut GradeSheet) {
    for s in &mut sheet.students {
        s.total = compute_total(&s.grades, &sheet.activities);
        s.status = compute_status(&s.grades, &sheet.activities);
    }
    sort_students(&mut sheet.students);
}

/// Full ingest normalization: activity defaults/clamps, an ungraded cell for
/// every (student, activity) pair, derived fields rebuilt. The store never
/// gets to be the source of truth for `total`/`status`.
pub fn normalize_sheet(sheet: &mut GradeSheet) {
    for a in &mut sheet.activities {
        a.normalize();
    }
    for s in &mut sheet.students {
        for a in &sheet.activities {
            s.grades
                .entry(a.id.clone())
                .or_insert_with(GradeCell::ungraded);
        }
    }
    recompute_sheet(sheet);
}

/// Append an activity and seed an ungraded cell for every student. Existing
/// cells are untouched; totals are numerically unchanged but a previously
/// completed student drops back to incomplete.
pub fn add_activity(sheet: &mut GradeSheet, mut activity: Activity) {
    activity.normalize();
    for s in &mut sheet.students {
        s.grades
            .entry(activity.id.clone())
            .or_insert_with(GradeCell::ungraded);
    }
    sheet.activities.push(activity);
    recompute_sheet(sheet);
}

/// Drop an activity and every student's cell for it, then recompute against
/// the reduced activity set. Destructive for all students at once; the IPC
/// layer demands an explicit confirmation before calling this.
pub fn remove_activity(sheet: &mut GradeSheet, activity_id: &str) -> bool {
    let before = sheet.activities.len();
    sheet.activities.retain(|a| a.id != activity_id);
    if sheet.activities.len() == before {
        return false;
    }
    for s in &mut sheet.students {
        s.grades.remove(activity_id);
    }
    recompute_sheet(sheet);
    true
}

/// Upsert one grade cell. `value: None` clears the cell back to ungraded.
/// A scored value must lie in `[0, maxScore]` for the activity.
pub fn set_grade(
    sheet: &mut GradeSheet,
    student_id: &str,
    activity_id: &str,
    value: Option<f64>,
    comment: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
    graded_by: Option<String>,
) -> Result<(), CalcError> {
    let Some(activity) = sheet.activities.iter().find(|a| a.id == activity_id) else {
        return Err(CalcError::new("not_found", "activity not found")
            .with_details(serde_json::json!({ "activityId": activity_id })));
    };
    if let Some(v) = value {
        if !v.is_finite() || v < 0.0 || v > activity.max_score {
            return Err(CalcError::new(
                "bad_params",
                format!("value must be within [0, {}]", activity.max_score),
            )
            .with_details(serde_json::json!({ "value": v })));
        }
    }

    let Some(student) = sheet
        .students
        .iter_mut()
        .find(|s| s.student_id == student_id)
    else {
        return Err(CalcError::new("not_found", "student not found in sheet")
            .with_details(serde_json::json!({ "studentId": student_id })));
    };

    let cell = student
        .grades
        .entry(activity_id.to_string())
        .or_insert_with(GradeCell::ungraded);
    cell.value = value;
    if let Some(c) = comment {
        cell.comment = c;
    }
    cell.submitted_at = submitted_at;
    student.graded_by = graded_by;

    recompute_sheet(sheet);
    Ok(())
}

/// Class-level rollup for sheet summaries and dashboards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetStats {
    pub student_count: usize,
    pub activity_count: usize,
    pub graded_cell_count: usize,
    pub class_average: f64,
}

pub fn sheet_stats(sheet: &GradeSheet) -> SheetStats {
    let graded_cell_count = sheet
        .students
        .iter()
        .map(|s| {
            sheet
                .activities
                .iter()
                .filter(|a| s.grades.get(&a.id).map(GradeCell::is_graded).unwrap_or(false))
                .count()
        })
        .sum();
    let class_average = if sheet.students.is_empty() {
        0.0
    } else {
        round_off_1_decimal(
            sheet.students.iter().map(|s| s.total).sum::<f64>() / sheet.students.len() as f64,
        )
    };
    SheetStats {
        student_count: sheet.students.len(),
        activity_count: sheet.activities.len(),
        graded_cell_count,
        class_average,
    }
}

/// One row per student in sheet order, plus a fixed header. Values and totals
/// are formatted to one decimal, ungraded cells are blank. Comma-joining and
/// file mechanics belong to the caller.
pub fn export_rows(sheet: &GradeSheet) -> Vec<Vec<String>> {
    let mut rows = Vec::with_capacity(sheet.students.len() + 1);

    let mut header = vec!["Student".to_string(), "ID".to_string()];
    header.extend(sheet.activities.iter().map(|a| a.name.clone()));
    header.push("Total (0-5)".to_string());
    header.push("Status".to_string());
    rows.push(header);

    for s in &sheet.students {
        let mut row = vec![s.student_name.clone(), s.student_id.clone()];
        for a in &sheet.activities {
            match s.grades.get(&a.id).and_then(|c| c.value) {
                Some(v) => row.push(format!("{:.1}", v)),
                None => row.push(String::new()),
            }
        }
        row.push(format!("{:.1}", round_off_1_decimal(s.total)));
        row.push(s.status.as_str().to_string());
        rows.push(row);
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActivityKind, GradingPeriod, StudentGrade};
    use chrono::Utc;

    fn activity(id: &str, max_score: f64) -> Activity {
        Activity {
            id: id.to_string(),
            name: format!("Activity {}", id),
            max_score,
            weight: None,
            kind: ActivityKind::Quiz,
        }
    }

    fn graded(value: f64) -> GradeCell {
        GradeCell {
            value: Some(value),
            comment: String::new(),
            submitted_at: None,
        }
    }

    fn empty_sheet() -> GradeSheet {
        let now = Utc::now();
        GradeSheet {
            id: "sheet-1".into(),
            course_id: "course-1".into(),
            title: "Term work".into(),
            grading_period: GradingPeriod::FirstTerm,
            is_published: false,
            activities: Vec::new(),
            students: Vec::new(),
            created_at: now,
            updated_at: now,
            published_at: None,
        }
    }

    #[test]
    fn round_off_matches_legacy_rule() {
        assert_eq!(round_off_1_decimal(0.0), 0.0);
        assert_eq!(round_off_1_decimal(3.54), 3.5);
        assert_eq!(round_off_1_decimal(3.55), 3.6);
        assert_eq!(round_off_1_decimal(3.875), 3.9);
    }

    #[test]
    fn normalize_score_stays_on_five_point_scale() {
        assert_eq!(normalize_score(4.0, 5.0), 4.0);
        assert_eq!(normalize_score(6.0, 10.0), 3.0);
        assert_eq!(normalize_score(0.0, 5.0), 0.0);
        assert_eq!(normalize_score(5.0, 5.0), 5.0);
        assert_eq!(normalize_score(3.0, 0.0), 0.0);
    }

    #[test]
    fn compute_total_is_unweighted_mean_of_normalized_scores() {
        let mut activities = vec![activity("a1", 5.0), activity("a2", 4.0)];
        activities[0].weight = Some(90.0);
        activities[1].weight = Some(10.0);

        let mut grades = HashMap::new();
        grades.insert("a1".to_string(), graded(5.0));
        grades.insert("a2".to_string(), graded(2.0));

        // (5.0 + 2.5) / 2, weights ignored on the sheet-level path.
        assert!((compute_total(&grades, &activities) - 3.75).abs() < 1e-9);
    }

    #[test]
    fn compute_total_skips_ungraded_and_handles_empty() {
        let activities = vec![activity("a1", 5.0), activity("a2", 5.0)];
        let mut grades = HashMap::new();
        grades.insert("a1".to_string(), graded(4.0));
        grades.insert("a2".to_string(), GradeCell::ungraded());

        assert_eq!(compute_total(&grades, &activities), 4.0);
        assert_eq!(compute_total(&HashMap::new(), &activities), 0.0);
        assert_eq!(compute_total(&grades, &[]), 0.0);
    }

    #[test]
    fn compute_total_is_order_independent() {
        let mut activities = vec![activity("a1", 5.0), activity("a2", 4.0), activity("a3", 2.0)];
        let mut grades = HashMap::new();
        grades.insert("a1".to_string(), graded(3.0));
        grades.insert("a2".to_string(), graded(4.0));
        grades.insert("a3".to_string(), graded(1.0));

        let forward = compute_total(&grades, &activities);
        activities.reverse();
        let reversed = compute_total(&grades, &activities);
        assert!((forward - reversed).abs() < 1e-12);
    }

    #[test]
    fn scored_zero_counts_as_graded() {
        let activities = vec![activity("a1", 5.0)];
        let mut grades = HashMap::new();
        grades.insert("a1".to_string(), graded(0.0));

        assert_eq!(compute_total(&grades, &activities), 0.0);
        assert_eq!(compute_status(&grades, &activities), GradeStatus::Completed);
    }

    #[test]
    fn status_moves_forward_as_cells_are_graded() {
        let activities = vec![activity("a1", 5.0), activity("a2", 5.0)];
        let mut grades: HashMap<String, GradeCell> = HashMap::new();
        assert_eq!(compute_status(&grades, &activities), GradeStatus::Pending);

        grades.insert("a1".to_string(), graded(3.0));
        assert_eq!(compute_status(&grades, &activities), GradeStatus::Incomplete);

        grades.insert("a2".to_string(), graded(4.0));
        assert_eq!(compute_status(&grades, &activities), GradeStatus::Completed);
    }

    #[test]
    fn empty_activity_list_is_pending() {
        assert_eq!(compute_status(&HashMap::new(), &[]), GradeStatus::Pending);
    }

    #[test]
    fn add_activity_seeds_ungraded_cells_and_reopens_status() {
        let mut sheet = empty_sheet();
        sheet.activities.push(activity("a1", 5.0));
        sheet.students.push(StudentGrade::new("s1", "Ng, Lily"));
        set_grade(&mut sheet, "s1", "a1", Some(4.0), None, None, None).expect("grade");
        assert_eq!(sheet.students[0].status, GradeStatus::Completed);
        let total_before = sheet.students[0].total;

        add_activity(&mut sheet, activity("a2", 5.0));
        let s = &sheet.students[0];
        assert_eq!(s.status, GradeStatus::Incomplete);
        assert_eq!(s.total, total_before);
        assert!(s.grades.get("a2").is_some_and(|c| !c.is_graded()));
    }

    #[test]
    fn remove_activity_drops_cells_and_recomputes() {
        let mut sheet = empty_sheet();
        sheet.activities.push(activity("a1", 5.0));
        sheet.activities.push(activity("a2", 5.0));
        sheet.students.push(StudentGrade::new("s1", "Ng, Lily"));
        set_grade(&mut sheet, "s1", "a1", Some(5.0), None, None, None).expect("grade");
        set_grade(&mut sheet, "s1", "a2", Some(1.0), None, None, None).expect("grade");
        assert_eq!(sheet.students[0].total, 3.0);

        assert!(remove_activity(&mut sheet, "a2"));
        let s = &sheet.students[0];
        assert_eq!(s.total, 5.0);
        assert_eq!(s.status, GradeStatus::Completed);
        assert!(s.grades.get("a2").is_none());

        assert!(!remove_activity(&mut sheet, "missing"));
    }

    #[test]
    fn set_grade_rejects_out_of_range_values() {
        let mut sheet = empty_sheet();
        sheet.activities.push(activity("a1", 4.0));
        sheet.students.push(StudentGrade::new("s1", "Ng, Lily"));

        let err =
            set_grade(&mut sheet, "s1", "a1", Some(4.5), None, None, None).expect_err("over max");
        assert_eq!(err.code, "bad_params");
        let err =
            set_grade(&mut sheet, "s1", "a1", Some(-1.0), None, None, None).expect_err("negative");
        assert_eq!(err.code, "bad_params");
        let err = set_grade(&mut sheet, "s1", "missing", Some(1.0), None, None, None)
            .expect_err("unknown activity");
        assert_eq!(err.code, "not_found");
        let err = set_grade(&mut sheet, "ghost", "a1", Some(1.0), None, None, None)
            .expect_err("unknown student");
        assert_eq!(err.code, "not_found");
    }

    #[test]
    fn set_grade_null_clears_back_to_ungraded() {
        let mut sheet = empty_sheet();
        sheet.activities.push(activity("a1", 5.0));
        sheet.students.push(StudentGrade::new("s1", "Ng, Lily"));

        set_grade(
            &mut sheet,
            "s1",
            "a1",
            Some(3.0),
            Some("late".into()),
            None,
            None,
        )
        .expect("grade");
        assert_eq!(sheet.students[0].status, GradeStatus::Completed);

        set_grade(&mut sheet, "s1", "a1", None, None, None, None).expect("clear");
        let s = &sheet.students[0];
        assert_eq!(s.status, GradeStatus::Pending);
        assert_eq!(s.total, 0.0);
        // Clearing the value keeps the comment trail.
        assert_eq!(s.grades["a1"].comment, "late");
    }

    #[test]
    fn normalize_sheet_backfills_cells_and_derived_fields() {
        let mut sheet = empty_sheet();
        sheet.activities.push(activity("a1", 5.0));
        let mut row = StudentGrade::new("s1", "Ng, Lily");
        row.grades.insert("a1".to_string(), graded(4.0));
        // Stale persisted values must be overwritten by the recompute.
        row.total = 1.2;
        row.status = GradeStatus::Pending;
        sheet.students.push(row);
        let mut other = StudentGrade::new("s2", "Ochoa, Ben");
        other.grades.clear();
        sheet.students.push(other);

        normalize_sheet(&mut sheet);
        assert_eq!(sheet.students[0].total, 4.0);
        assert_eq!(sheet.students[0].status, GradeStatus::Completed);
        assert!(sheet.students[1].grades.contains_key("a1"));
        assert_eq!(sheet.students[1].status, GradeStatus::Pending);
    }

    #[test]
    fn export_rows_header_order_and_formatting() {
        let mut sheet = empty_sheet();
        sheet.activities.push(Activity {
            id: "a1".into(),
            name: "Quiz 1".into(),
            max_score: 5.0,
            weight: None,
            kind: ActivityKind::Quiz,
        });
        sheet.activities.push(Activity {
            id: "a2".into(),
            name: "Essay".into(),
            max_score: 4.0,
            weight: None,
            kind: ActivityKind::Essay,
        });
        sheet.students.push(StudentGrade::new("s2", "Zhou, Mei"));
        sheet.students.push(StudentGrade::new("s1", "adams, Rae"));
        set_grade(&mut sheet, "s2", "a1", Some(4.0), None, None, None).expect("grade");

        let rows = export_rows(&sheet);
        assert_eq!(
            rows[0],
            vec!["Student", "ID", "Quiz 1", "Essay", "Total (0-5)", "Status"]
        );
        // Name order is case-insensitive: adams before Zhou.
        assert_eq!(rows[1][0], "adams, Rae");
        assert_eq!(rows[1][2], "");
        assert_eq!(rows[1][4], "0.0");
        assert_eq!(rows[1][5], "pending");
        assert_eq!(rows[2][0], "Zhou, Mei");
        assert_eq!(rows[2][2], "4.0");
        assert_eq!(rows[2][3], "");
        assert_eq!(rows[2][4], "4.0");
        assert_eq!(rows[2][5], "incomplete");
    }

    #[test]
    fn sheet_stats_rolls_up_class_average() {
        let mut sheet = empty_sheet();
        sheet.activities.push(activity("a1", 5.0));
        sheet.students.push(StudentGrade::new("s1", "Ng, Lily"));
        sheet.students.push(StudentGrade::new("s2", "Ochoa, Ben"));
        set_grade(&mut sheet, "s1", "a1", Some(5.0), None, None, None).expect("grade");
        set_grade(&mut sheet, "s2", "a1", Some(2.0), None, None, None).expect("grade");

        let stats = sheet_stats(&sheet);
        assert_eq!(stats.student_count, 2);
        assert_eq!(stats.activity_count, 1);
        assert_eq!(stats.graded_cell_count, 2);
        assert_eq!(stats.class_average, 3.5);
    }
}
