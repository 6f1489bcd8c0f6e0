use serde::{Deserialize, Serialize};

use crate::{CourseId, StudentId};

/// A student row. `average_grade` and `course_count` are derived from the
/// grade facts and are only ever written by aggregate maintenance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub email: String,
    pub average_grade: f64,
    pub course_count: i64,
}

/// A course row. `enrolled_count` is derived from the grade facts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub name: String,
    pub enrolled_count: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStudent {
    pub name: String,
    pub email: String,
}

impl NewStudent {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCourse {
    pub name: String,
}

impl NewCourse {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradeFact {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub grade: f64,
}

/// Joined projection of a grade fact with the names of both dimensions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradeRow {
    pub student_id: StudentId,
    pub student_name: String,
    pub course_id: CourseId,
    pub course_name: String,
    pub grade: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseEnrollment {
    pub course_id: CourseId,
    pub course_name: String,
    pub enrolled_count: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StudentAggregates {
    pub student_id: StudentId,
    pub average_grade: f64,
    pub course_count: i64,
}

impl StudentAggregates {
    pub fn empty(student_id: StudentId) -> Self {
        Self {
            student_id,
            average_grade: 0.0,
            course_count: 0,
        }
    }
}

/// Rounds a mean to two decimal places, half away from zero.
pub fn round_grade(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum AggregateTarget {
    CourseEnrolledCount { course_id: CourseId },
    StudentCourseCount { student_id: StudentId },
    StudentAverageGrade { student_id: StudentId },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateDrift {
    pub target: AggregateTarget,
    pub stored: f64,
    pub expected: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateAudit {
    pub students_checked: u64,
    pub courses_checked: u64,
    pub drifts: Vec<AggregateDrift>,
}

impl AggregateAudit {
    pub fn is_consistent(&self) -> bool {
        self.drifts.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub students: u64,
    pub courses: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedReport {
    pub students: u64,
    pub courses: u64,
    pub grades: u64,
}

#[cfg(test)]
mod tests {
    use super::{AggregateTarget, StudentAggregates, round_grade};
    use crate::{CourseId, StudentId};

    #[test]
    fn round_grade_keeps_two_decimals() {
        assert_eq!(round_grade(80.0), 80.0);
        assert_eq!(round_grade(76.666_666), 76.67);
        assert_eq!(round_grade(70.125), 70.13);
        assert_eq!(round_grade(59.994), 59.99);
    }

    #[test]
    fn empty_student_aggregates_default_to_zero() {
        let aggregates = StudentAggregates::empty(StudentId(9));
        assert_eq!(aggregates.average_grade, 0.0);
        assert_eq!(aggregates.course_count, 0);
    }

    #[test]
    fn aggregate_target_serializes_with_field_tag() {
        let target = AggregateTarget::CourseEnrolledCount {
            course_id: CourseId(2),
        };
        let value = serde_json::to_value(target).expect("encode");
        assert_eq!(
            value,
            serde_json::json!({ "field": "course_enrolled_count", "course_id": 2 })
        );
    }
}
