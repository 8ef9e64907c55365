use crate::calc;
use crate::model::GradeSheet;
use serde::Serialize;

/// Classification thresholds on the 0-5 scale.
pub const PASSING_THRESHOLD: f64 = 3.5;
pub const AT_RISK_THRESHOLD: f64 = 2.5;

/// Target used by the minimum-grade-to-pass projection. Deliberately not the
/// same constant as `PASSING_THRESHOLD`; the product defines them apart.
pub const PASSING_BAR: f64 = 3.0;

pub const MIN_GRADE_FLOOR: f64 = 2.5;
pub const MIN_GRADE_CEIL: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStatus {
    Passing,
    AtRisk,
    Failing,
}

impl ProgressStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStatus::Passing => "passing",
            ProgressStatus::AtRisk => "at-risk",
            ProgressStatus::Failing => "failing",
        }
    }
}

/// A student's aggregate standing across every published sheet of a course.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgress {
    pub course_id: String,
    pub student_id: String,
    pub current_grade: f64,
    pub evaluated_percentage: f64,
    pub remaining_percentage: f64,
    pub status: ProgressStatus,
    pub min_grade_to_pass: f64,
    pub total_activities: usize,
    pub evaluated_activities: usize,
}

pub fn classify(current_grade: f64) -> ProgressStatus {
    if current_grade >= PASSING_THRESHOLD {
        ProgressStatus::Passing
    } else if current_grade >= AT_RISK_THRESHOLD {
        ProgressStatus::AtRisk
    } else {
        ProgressStatus::Failing
    }
}

/// Average needed on remaining work to reach the 3.0 bar, clamped to
/// [2.5, 5.0]. 0.0 means "not applicable / already secured". A clamped 5.0
/// encodes "impossible on remaining work alone" without raising.
pub fn min_grade_to_pass(
    current_grade: f64,
    total_activities: usize,
    evaluated_activities: usize,
    evaluated_percentage: f64,
) -> f64 {
    if current_grade >= PASSING_BAR || evaluated_percentage >= 100.0 {
        return 0.0;
    }
    let remaining = total_activities.saturating_sub(evaluated_activities);
    if remaining == 0 {
        return 0.0;
    }
    let needed_total_points = PASSING_BAR * total_activities as f64;
    let current_points = current_grade * evaluated_activities as f64;
    ((needed_total_points - current_points) / remaining as f64).clamp(MIN_GRADE_FLOOR, MIN_GRADE_CEIL)
}

/// Weighted aggregate over every published sheet the student appears in.
/// `None` when the student appears in no published sheet ("no progress
/// data"), which callers must keep distinct from an all-zero record.
///
/// Pure over the snapshot it is handed: no mutation, same input, same output.
pub fn calculate_progress(
    student_id: &str,
    course_id: &str,
    sheets: &[GradeSheet],
) -> Option<StudentProgress> {
    let mut total_activities = 0_usize;
    let mut evaluated_activities = 0_usize;
    let mut total_weighted_grade = 0.0_f64;
    let mut total_weight = 0.0_f64;
    let mut fallback_total: Option<f64> = None;
    let mut seen = false;

    for sheet in sheets.iter().filter(|s| s.is_published) {
        let Some(row) = sheet.student(student_id) else {
            continue;
        };
        seen = true;
        if fallback_total.is_none() {
            fallback_total = Some(row.total);
        }

        let share = calc::equal_share_weight(sheet.activities.len());
        for a in &sheet.activities {
            total_activities += 1;
            let Some(v) = row.grades.get(&a.id).and_then(|c| c.value) else {
                continue;
            };
            evaluated_activities += 1;
            let normalized = calc::normalize_score(v, a.max_score);
            let weight = a.weight.unwrap_or(share);
            total_weighted_grade += normalized * (weight / 100.0);
            total_weight += weight / 100.0;
        }
    }

    if !seen {
        return None;
    }

    // A sheet may carry a per-sheet total even when no weight accumulated;
    // that total is the defined fallback, not a special case to erase.
    let raw_grade = if total_weight > 0.0 {
        total_weighted_grade / total_weight
    } else {
        fallback_total.unwrap_or(0.0)
    };
    let current_grade = calc::round_off_1_decimal(raw_grade);

    let evaluated_percentage = if total_activities > 0 {
        (100.0 * evaluated_activities as f64 / total_activities as f64).round()
    } else {
        0.0
    };
    let remaining_percentage = 100.0 - evaluated_percentage;

    Some(StudentProgress {
        course_id: course_id.to_string(),
        student_id: student_id.to_string(),
        current_grade,
        evaluated_percentage,
        remaining_percentage,
        status: classify(current_grade),
        min_grade_to_pass: min_grade_to_pass(
            current_grade,
            total_activities,
            evaluated_activities,
            evaluated_percentage,
        ),
        total_activities,
        evaluated_activities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Activity, ActivityKind, GradeCell, GradeSheet, GradingPeriod, StudentGrade};
    use chrono::Utc;

    fn activity(id: &str, max_score: f64, weight: Option<f64>) -> Activity {
        Activity {
            id: id.to_string(),
            name: format!("Activity {}", id),
            max_score,
            weight,
            kind: ActivityKind::Exam,
        }
    }

    fn sheet(published: bool, activities: Vec<Activity>, rows: Vec<StudentGrade>) -> GradeSheet {
        let now = Utc::now();
        GradeSheet {
            id: "sheet-1".into(),
            course_id: "course-1".into(),
            title: "Term work".into(),
            grading_period: GradingPeriod::FirstTerm,
            is_published: published,
            activities,
            students: rows,
            created_at: now,
            updated_at: now,
            published_at: if published { Some(now) } else { None },
        }
    }

    fn row_with(student_id: &str, grades: &[(&str, Option<f64>)]) -> StudentGrade {
        let mut row = StudentGrade::new(student_id, "Ng, Lily");
        for (aid, v) in grades {
            row.grades.insert(
                aid.to_string(),
                GradeCell {
                    value: *v,
                    comment: String::new(),
                    submitted_at: None,
                },
            );
        }
        row
    }

    #[test]
    fn classify_boundaries_are_exact() {
        assert_eq!(classify(3.5), ProgressStatus::Passing);
        assert_eq!(classify(3.499), ProgressStatus::AtRisk);
        assert_eq!(classify(2.5), ProgressStatus::AtRisk);
        assert_eq!(classify(2.499), ProgressStatus::Failing);
    }

    #[test]
    fn fully_evaluated_weighted_sheet() {
        // A1: 4/5 -> 4.0, A2: 6/10 -> 3.0, both weight 50 -> 3.5 exactly.
        let activities = vec![
            activity("a1", 5.0, Some(50.0)),
            activity("a2", 10.0, Some(50.0)),
        ];
        let rows = vec![row_with("s1", &[("a1", Some(4.0)), ("a2", Some(6.0))])];
        let sheets = vec![sheet(true, activities, rows)];

        let p = calculate_progress("s1", "course-1", &sheets).expect("progress");
        assert_eq!(p.current_grade, 3.5);
        assert_eq!(p.status, ProgressStatus::Passing);
        assert_eq!(p.evaluated_percentage, 100.0);
        assert_eq!(p.remaining_percentage, 0.0);
        assert_eq!(p.min_grade_to_pass, 0.0);
        assert_eq!(p.total_activities, 2);
        assert_eq!(p.evaluated_activities, 2);
    }

    #[test]
    fn partially_evaluated_sheet_projects_needed_average() {
        // Only A1 graded: 2/5 -> 2.0, weight 0.5 -> 1.0/0.5 = 2.0 -> failing.
        let activities = vec![
            activity("a1", 5.0, Some(50.0)),
            activity("a2", 10.0, Some(50.0)),
        ];
        let rows = vec![row_with("s1", &[("a1", Some(2.0)), ("a2", None)])];
        let sheets = vec![sheet(true, activities, rows)];

        let p = calculate_progress("s1", "course-1", &sheets).expect("progress");
        assert_eq!(p.current_grade, 2.0);
        assert_eq!(p.status, ProgressStatus::Failing);
        assert_eq!(p.evaluated_percentage, 50.0);
        assert_eq!(p.remaining_percentage, 50.0);
        // (3.0*2 - 2.0*1) / 1 = 4.0, inside the clamp.
        assert_eq!(p.min_grade_to_pass, 4.0);
    }

    #[test]
    fn min_grade_ceiling_encodes_impossible_as_five() {
        // 0.0 over 9 of 10 evaluated: (30 - 0)/1 = 30 -> clamped to 5.0.
        assert_eq!(min_grade_to_pass(0.0, 10, 9, 90.0), 5.0);
        // 2.9 over 1 of 10: (30 - 2.9)/9 = 3.011.. stays inside the clamp.
        let mid = min_grade_to_pass(2.9, 10, 1, 10.0);
        assert!((mid - 3.011).abs() < 0.01);
        // With a current grade below the 3.0 bar the needed average is always
        // above 3.0, so the 2.5 floor never moves a gated result; assert it is
        // in place anyway for direct callers.
        assert!(min_grade_to_pass(2.99, 100, 50, 50.0) >= MIN_GRADE_FLOOR);
    }

    #[test]
    fn min_grade_not_applicable_cases() {
        assert_eq!(min_grade_to_pass(3.0, 10, 5, 50.0), 0.0);
        assert_eq!(min_grade_to_pass(4.2, 10, 5, 50.0), 0.0);
        assert_eq!(min_grade_to_pass(2.0, 10, 10, 100.0), 0.0);
    }

    #[test]
    fn unpublished_sheets_contribute_nothing() {
        let graded = vec![activity("a1", 5.0, Some(100.0))];
        let rows = vec![row_with("s1", &[("a1", Some(5.0))])];
        let hidden = sheet(false, graded, rows);

        assert_eq!(calculate_progress("s1", "course-1", &[hidden.clone()]), None);

        // Alongside a published sheet, the unpublished one still adds zero
        // activities and zero weight.
        let activities = vec![activity("b1", 5.0, None)];
        let visible = {
            let mut s = sheet(true, activities, vec![row_with("s1", &[("b1", Some(3.0))])]);
            s.id = "sheet-2".into();
            s
        };
        let p = calculate_progress("s1", "course-1", &[hidden, visible]).expect("progress");
        assert_eq!(p.total_activities, 1);
        assert_eq!(p.current_grade, 3.0);
    }

    #[test]
    fn absent_student_yields_no_data() {
        let activities = vec![activity("a1", 5.0, None)];
        let rows = vec![row_with("s1", &[("a1", Some(4.0))])];
        let sheets = vec![sheet(true, activities, rows)];
        assert_eq!(calculate_progress("ghost", "course-1", &sheets), None);
    }

    #[test]
    fn equal_share_weight_used_when_weights_absent() {
        // Two unweighted activities -> 50 each; one of three -> 100/3.
        let activities = vec![activity("a1", 5.0, None), activity("a2", 5.0, None)];
        let rows = vec![row_with("s1", &[("a1", Some(5.0)), ("a2", Some(0.0))])];
        let sheets = vec![sheet(true, activities, rows)];
        let p = calculate_progress("s1", "course-1", &sheets).expect("progress");
        assert_eq!(p.current_grade, 2.5);
        assert_eq!(p.status, ProgressStatus::AtRisk);
    }

    #[test]
    fn falls_back_to_first_sheet_total_when_no_weight_accumulates() {
        // All cells ungraded, but the sheet row carries a precomputed total.
        let activities = vec![activity("a1", 5.0, None)];
        let mut row = row_with("s1", &[("a1", None)]);
        row.total = 4.2;
        let sheets = vec![sheet(true, activities, vec![row])];

        let p = calculate_progress("s1", "course-1", &sheets).expect("progress");
        assert_eq!(p.current_grade, 4.2);
        assert_eq!(p.evaluated_activities, 0);
        assert_eq!(p.evaluated_percentage, 0.0);
        assert_eq!(p.status, ProgressStatus::Passing);
    }

    #[test]
    fn aggregates_across_multiple_published_sheets() {
        let first = sheet(
            true,
            vec![activity("a1", 5.0, Some(100.0))],
            vec![row_with("s1", &[("a1", Some(5.0))])],
        );
        let mut second = sheet(
            true,
            vec![activity("b1", 5.0, Some(100.0))],
            vec![row_with("s1", &[("b1", Some(2.0))])],
        );
        second.id = "sheet-2".into();

        let p = calculate_progress("s1", "course-1", &[first, second]).expect("progress");
        // (5.0*1.0 + 2.0*1.0) / 2.0 = 3.5
        assert_eq!(p.current_grade, 3.5);
        assert_eq!(p.total_activities, 2);
        assert_eq!(p.evaluated_activities, 2);
    }

    #[test]
    fn calculation_is_idempotent_over_a_snapshot() {
        let activities = vec![
            activity("a1", 5.0, Some(30.0)),
            activity("a2", 4.0, Some(70.0)),
        ];
        let rows = vec![row_with("s1", &[("a1", Some(3.0)), ("a2", None)])];
        let sheets = vec![sheet(true, activities, rows)];

        let first = calculate_progress("s1", "course-1", &sheets);
        let second = calculate_progress("s1", "course-1", &sheets);
        assert_eq!(first, second);
    }
}
