use async_trait::async_trait;
use sea_orm::QueryResult;
use sea_orm::sea_query::{Alias, Expr, ExprTrait, Order, Query, SelectStatement};

use gradebook_core::{
    CourseEnrollment, CourseId, GradeRow, GradebookResult, ReportingApi, StudentId,
};

use crate::GradebookStore;
use crate::db::*;
use crate::store::{col_name, query_all, query_one};

const HIGH_GRADE_THRESHOLD: f64 = 80.0;

#[async_trait]
impl ReportingApi for GradebookStore {
    async fn all_grades(&self) -> GradebookResult<Vec<GradeRow>> {
        let select = grade_rows_select()
            .order_by((Grades::Table, Grades::StudentId), Order::Asc)
            .order_by((Grades::Table, Grades::CourseId), Order::Asc)
            .to_owned();
        query_all(self.connection(), &select)
            .await?
            .iter()
            .map(read_grade_row)
            .collect()
    }

    async fn high_grades(&self) -> GradebookResult<Vec<GradeRow>> {
        let select = grade_rows_select()
            .and_where(Expr::col((Grades::Table, Grades::Grade)).gt(HIGH_GRADE_THRESHOLD))
            .order_by((Grades::Table, Grades::StudentId), Order::Asc)
            .order_by((Grades::Table, Grades::CourseId), Order::Asc)
            .to_owned();
        query_all(self.connection(), &select)
            .await?
            .iter()
            .map(read_grade_row)
            .collect()
    }

    /// Ties on `enrolled_count` resolve to the lowest course id.
    async fn course_with_most_students(&self) -> GradebookResult<Option<CourseEnrollment>> {
        let select = Query::select()
            .from(Courses::Table)
            .columns([Courses::CourseId, Courses::CourseName, Courses::EnrolledCount])
            .order_by(Courses::EnrolledCount, Order::Desc)
            .order_by(Courses::CourseId, Order::Asc)
            .limit(1)
            .to_owned();
        let Some(row) = query_one(self.connection(), &select).await? else {
            return Ok(None);
        };
        Ok(Some(CourseEnrollment {
            course_id: CourseId(row.try_get("", &col_name(Courses::CourseId))?),
            course_name: row.try_get("", &col_name(Courses::CourseName))?,
            enrolled_count: row.try_get("", &col_name(Courses::EnrolledCount))?,
        }))
    }

    /// Ties on the grade resolve to the lowest (student id, course id).
    async fn top_grade(&self) -> GradebookResult<Option<GradeRow>> {
        let select = grade_rows_select()
            .order_by((Grades::Table, Grades::Grade), Order::Desc)
            .order_by((Grades::Table, Grades::StudentId), Order::Asc)
            .order_by((Grades::Table, Grades::CourseId), Order::Asc)
            .limit(1)
            .to_owned();
        query_one(self.connection(), &select)
            .await?
            .map(|row| read_grade_row(&row))
            .transpose()
    }
}

fn grade_rows_select() -> SelectStatement {
    Query::select()
        .from(Grades::Table)
        .inner_join(
            Students::Table,
            Expr::col((Students::Table, Students::StudentId))
                .equals((Grades::Table, Grades::StudentId)),
        )
        .inner_join(
            Courses::Table,
            Expr::col((Courses::Table, Courses::CourseId))
                .equals((Grades::Table, Grades::CourseId)),
        )
        .expr_as(
            Expr::col((Grades::Table, Grades::StudentId)),
            Alias::new("student_id"),
        )
        .expr_as(
            Expr::col((Students::Table, Students::Name)),
            Alias::new("student_name"),
        )
        .expr_as(
            Expr::col((Grades::Table, Grades::CourseId)),
            Alias::new("course_id"),
        )
        .expr_as(
            Expr::col((Courses::Table, Courses::CourseName)),
            Alias::new("course_name"),
        )
        .expr_as(Expr::col((Grades::Table, Grades::Grade)), Alias::new("grade"))
        .to_owned()
}

fn read_grade_row(row: &QueryResult) -> GradebookResult<GradeRow> {
    Ok(GradeRow {
        student_id: StudentId(row.try_get("", "student_id")?),
        student_name: row.try_get("", "student_name")?,
        course_id: CourseId(row.try_get("", "course_id")?),
        course_name: row.try_get("", "course_name")?,
        grade: row.try_get("", "grade")?,
    })
}
