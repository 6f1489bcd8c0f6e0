use async_trait::async_trait;

use crate::{
    AggregateAudit, Course, CourseEnrollment, CourseId, GradeFact, GradeRow, GradebookResult,
    NewCourse, NewStudent, RebuildReport, Student, StudentAggregates, StudentId,
};

#[async_trait]
pub trait DirectoryApi {
    async fn create_student(&self, input: NewStudent) -> GradebookResult<StudentId>;
    async fn create_course(&self, input: NewCourse) -> GradebookResult<CourseId>;
    async fn get_student(&self, student_id: StudentId) -> GradebookResult<Option<Student>>;
    async fn get_course(&self, course_id: CourseId) -> GradebookResult<Option<Course>>;
    async fn list_students(&self) -> GradebookResult<Vec<Student>>;
    async fn list_courses(&self) -> GradebookResult<Vec<Course>>;
}

/// Mutations of the grade fact relation. Each call is one transaction that
/// also carries the resulting aggregate maintenance.
#[async_trait]
pub trait GradeWriteApi {
    async fn add_grade(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        grade: f64,
    ) -> GradebookResult<()>;

    async fn remove_grade(&self, student_id: StudentId, course_id: CourseId)
    -> GradebookResult<()>;

    async fn update_grade(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        grade: f64,
    ) -> GradebookResult<()>;
}

#[async_trait]
pub trait GradeReadApi {
    async fn get_grade(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> GradebookResult<Option<GradeFact>>;

    async fn list_grades_for_student(&self, student_id: StudentId)
    -> GradebookResult<Vec<GradeFact>>;

    async fn list_grades_for_course(&self, course_id: CourseId) -> GradebookResult<Vec<GradeFact>>;
}

#[async_trait]
pub trait AggregateReadApi {
    async fn get_course_enrollment(&self, course_id: CourseId) -> GradebookResult<i64>;
    async fn get_student_average(&self, student_id: StudentId) -> GradebookResult<f64>;
    async fn get_student_course_count(&self, student_id: StudentId) -> GradebookResult<i64>;
}

#[async_trait]
pub trait MaintenanceApi {
    /// Recomputes and stores `enrolled_count` for one course.
    async fn recompute_course(&self, course_id: CourseId) -> GradebookResult<i64>;
    /// Recomputes and stores the derived fields of one student.
    async fn recompute_student(&self, student_id: StudentId) -> GradebookResult<StudentAggregates>;
    async fn rebuild_aggregates(&self) -> GradebookResult<RebuildReport>;
    async fn audit_aggregates(&self) -> GradebookResult<AggregateAudit>;
}

#[async_trait]
pub trait ReportingApi {
    async fn all_grades(&self) -> GradebookResult<Vec<GradeRow>>;
    async fn high_grades(&self) -> GradebookResult<Vec<GradeRow>>;
    async fn course_with_most_students(&self) -> GradebookResult<Option<CourseEnrollment>>;
    async fn top_grade(&self) -> GradebookResult<Option<GradeRow>>;
}
