//! Aggregate maintenance for the derived columns of `students` and `courses`.
//!
//! Every grade mutation emits a [`FactChanged`] event inside its transaction.
//! [`AggregateMaintenance`] reacts by recomputing the derived fields of the
//! affected course and student only, so each reaction costs O(facts for that
//! key). The full rebuild is used once by the bulk load and on operator
//! request; it is never triggered by an event.

use std::collections::HashMap;

use async_trait::async_trait;
use sea_orm::sea_query::{Alias, Expr, ExprTrait, Func, LockType, Query};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseTransaction};

use gradebook_core::{
    AggregateAudit, AggregateDrift, AggregateTarget, CourseId, FactChanged, GradebookError,
    GradebookResult, RebuildReport, StudentAggregates, StudentId, round_grade,
};

use crate::config::StudentAggregatePolicy;
use crate::db::*;
use crate::failpoints::{BULK_RECOMPUTE, COURSE_RECOMPUTE, Failpoints, STUDENT_RECOMPUTE};
use crate::store::{col_name, exec, query_all, query_one};

const AVERAGE_TOLERANCE: f64 = 1e-6;

/// Reaction invoked synchronously by the fact store within the mutating
/// transaction. An error aborts the whole mutation.
#[async_trait]
pub trait FactChangeHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_fact_changed(
        &self,
        tx: &DatabaseTransaction,
        event: &FactChanged,
    ) -> GradebookResult<()>;
}

#[derive(Clone, Debug)]
pub struct AggregateMaintenance {
    backend: DatabaseBackend,
    student_policy: StudentAggregatePolicy,
    failpoints: Failpoints,
}

impl AggregateMaintenance {
    pub(crate) fn new(
        backend: DatabaseBackend,
        student_policy: StudentAggregatePolicy,
        failpoints: Failpoints,
    ) -> Self {
        Self {
            backend,
            student_policy,
            failpoints,
        }
    }

    pub fn student_policy(&self) -> StudentAggregatePolicy {
        self.student_policy
    }

    /// Overwrites `enrolled_count` of one course with the number of distinct
    /// students that currently hold a grade in it.
    pub(crate) async fn recompute_course<C: ConnectionTrait>(
        &self,
        conn: &C,
        course_id: CourseId,
    ) -> GradebookResult<i64> {
        self.lock_course(conn, course_id).await?;
        self.failpoints.check(COURSE_RECOMPUTE)?;
        let select = Query::select()
            .from(Grades::Table)
            .expr_as(
                Func::count_distinct(Expr::col(Grades::StudentId)),
                Alias::new("cnt"),
            )
            .and_where(Expr::col(Grades::CourseId).eq(course_id.0))
            .to_owned();
        let enrolled = match query_one(conn, &select).await? {
            Some(row) => row.try_get::<i64>("", "cnt")?,
            None => 0,
        };
        let update = Query::update()
            .table(Courses::Table)
            .value(Courses::EnrolledCount, enrolled)
            .and_where(Expr::col(Courses::CourseId).eq(course_id.0))
            .to_owned();
        exec(conn, &update).await?;
        log::debug!("course {course_id} enrolled_count={enrolled}");
        Ok(enrolled)
    }

    /// Overwrites `average_grade` and `course_count` of one student. A student
    /// without grades goes back to the column defaults.
    pub(crate) async fn recompute_student<C: ConnectionTrait>(
        &self,
        conn: &C,
        student_id: StudentId,
    ) -> GradebookResult<StudentAggregates> {
        self.lock_student(conn, student_id).await?;
        self.failpoints.check(STUDENT_RECOMPUTE)?;
        let select = Query::select()
            .from(Grades::Table)
            .expr_as(Func::avg(Expr::col(Grades::Grade)), Alias::new("avg_grade"))
            .expr_as(Func::count(Expr::col(Grades::CourseId)), Alias::new("cnt"))
            .and_where(Expr::col(Grades::StudentId).eq(student_id.0))
            .to_owned();
        let aggregates = match query_one(conn, &select).await? {
            Some(row) => {
                let average: Option<f64> = row.try_get("", "avg_grade")?;
                let count: i64 = row.try_get("", "cnt")?;
                StudentAggregates {
                    student_id,
                    average_grade: average.map(round_grade).unwrap_or(0.0),
                    course_count: count,
                }
            }
            None => StudentAggregates::empty(student_id),
        };
        self.write_student(conn, &aggregates).await?;
        log::debug!(
            "student {student_id} average_grade={} course_count={}",
            aggregates.average_grade,
            aggregates.course_count
        );
        Ok(aggregates)
    }

    /// Recomputes every derived field from one grouped scan of `grades`.
    /// Rows without facts are reset to their defaults first.
    pub(crate) async fn rebuild_all<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> GradebookResult<RebuildReport> {
        self.failpoints.check(BULK_RECOMPUTE)?;
        let reset_students = Query::update()
            .table(Students::Table)
            .value(Students::AverageGrade, 0.0f64)
            .value(Students::CourseCount, 0i64)
            .to_owned();
        exec(conn, &reset_students).await?;
        let reset_courses = Query::update()
            .table(Courses::Table)
            .value(Courses::EnrolledCount, 0i64)
            .to_owned();
        exec(conn, &reset_courses).await?;

        let student_totals = expected_student_aggregates(conn).await?;
        for aggregates in student_totals.values() {
            self.write_student(conn, aggregates).await?;
        }
        let course_totals = expected_course_enrollment(conn).await?;
        for (course_id, enrolled) in &course_totals {
            let update = Query::update()
                .table(Courses::Table)
                .value(Courses::EnrolledCount, *enrolled)
                .and_where(Expr::col(Courses::CourseId).eq(course_id.0))
                .to_owned();
            exec(conn, &update).await?;
        }

        let report = RebuildReport {
            students: count_rows(conn, Students::Table, Students::StudentId).await?,
            courses: count_rows(conn, Courses::Table, Courses::CourseId).await?,
        };
        log::info!(
            "rebuilt aggregates for {} students and {} courses",
            report.students,
            report.courses
        );
        Ok(report)
    }

    /// Compares every stored derived field with a full recomputation.
    pub(crate) async fn audit<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> GradebookResult<AggregateAudit> {
        let expected_students = expected_student_aggregates(conn).await?;
        let expected_courses = expected_course_enrollment(conn).await?;
        let mut audit = AggregateAudit::default();

        let select = Query::select()
            .from(Students::Table)
            .columns([
                Students::StudentId,
                Students::AverageGrade,
                Students::CourseCount,
            ])
            .to_owned();
        for row in query_all(conn, &select).await? {
            let student_id = StudentId(row.try_get("", &col_name(Students::StudentId))?);
            let stored_average: f64 = row.try_get("", &col_name(Students::AverageGrade))?;
            let stored_count: i64 = row.try_get("", &col_name(Students::CourseCount))?;
            let expected = expected_students
                .get(&student_id)
                .copied()
                .unwrap_or_else(|| StudentAggregates::empty(student_id));
            audit.students_checked += 1;
            if stored_count != expected.course_count {
                audit.drifts.push(AggregateDrift {
                    target: AggregateTarget::StudentCourseCount { student_id },
                    stored: stored_count as f64,
                    expected: expected.course_count as f64,
                });
            }
            if (stored_average - expected.average_grade).abs() > AVERAGE_TOLERANCE {
                audit.drifts.push(AggregateDrift {
                    target: AggregateTarget::StudentAverageGrade { student_id },
                    stored: stored_average,
                    expected: expected.average_grade,
                });
            }
        }

        let select = Query::select()
            .from(Courses::Table)
            .columns([Courses::CourseId, Courses::EnrolledCount])
            .to_owned();
        for row in query_all(conn, &select).await? {
            let course_id = CourseId(row.try_get("", &col_name(Courses::CourseId))?);
            let stored: i64 = row.try_get("", &col_name(Courses::EnrolledCount))?;
            let expected = expected_courses.get(&course_id).copied().unwrap_or(0);
            audit.courses_checked += 1;
            if stored != expected {
                audit.drifts.push(AggregateDrift {
                    target: AggregateTarget::CourseEnrolledCount { course_id },
                    stored: stored as f64,
                    expected: expected as f64,
                });
            }
        }

        for drift in &audit.drifts {
            log::warn!(
                "aggregate drift on {:?}: stored={} expected={}",
                drift.target,
                drift.stored,
                drift.expected
            );
        }
        Ok(audit)
    }

    async fn write_student<C: ConnectionTrait>(
        &self,
        conn: &C,
        aggregates: &StudentAggregates,
    ) -> GradebookResult<()> {
        let update = Query::update()
            .table(Students::Table)
            .value(Students::AverageGrade, aggregates.average_grade)
            .value(Students::CourseCount, aggregates.course_count)
            .and_where(Expr::col(Students::StudentId).eq(aggregates.student_id.0))
            .to_owned();
        exec(conn, &update).await
    }

    async fn lock_course<C: ConnectionTrait>(
        &self,
        conn: &C,
        course_id: CourseId,
    ) -> GradebookResult<()> {
        let mut select = Query::select();
        select
            .from(Courses::Table)
            .column(Courses::CourseId)
            .and_where(Expr::col(Courses::CourseId).eq(course_id.0));
        // SQLite has no row locks; its writer lock already serialises recomputes.
        if self.backend != DatabaseBackend::Sqlite {
            select.lock(LockType::Update);
        }
        if query_one(conn, &select).await?.is_none() {
            return Err(GradebookError::not_found(format!("course {course_id}")));
        }
        Ok(())
    }

    async fn lock_student<C: ConnectionTrait>(
        &self,
        conn: &C,
        student_id: StudentId,
    ) -> GradebookResult<()> {
        let mut select = Query::select();
        select
            .from(Students::Table)
            .column(Students::StudentId)
            .and_where(Expr::col(Students::StudentId).eq(student_id.0));
        if self.backend != DatabaseBackend::Sqlite {
            select.lock(LockType::Update);
        }
        if query_one(conn, &select).await?.is_none() {
            return Err(GradebookError::not_found(format!("student {student_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl FactChangeHandler for AggregateMaintenance {
    fn name(&self) -> &'static str {
        "aggregate_maintenance"
    }

    async fn on_fact_changed(
        &self,
        tx: &DatabaseTransaction,
        event: &FactChanged,
    ) -> GradebookResult<()> {
        self.recompute_course(tx, event.course_id)
            .await
            .map_err(|err| recompute_failure("course", event.course_id.0, err))?;
        if self.student_policy == StudentAggregatePolicy::Incremental {
            self.recompute_student(tx, event.student_id)
                .await
                .map_err(|err| recompute_failure("student", event.student_id.0, err))?;
        }
        Ok(())
    }
}

fn recompute_failure(kind: &str, id: i64, err: GradebookError) -> GradebookError {
    match err {
        GradebookError::AggregateRecompute { .. } => err,
        other => GradebookError::aggregate_recompute(format!("{kind} {id}: {other}")),
    }
}

async fn expected_student_aggregates<C: ConnectionTrait>(
    conn: &C,
) -> GradebookResult<HashMap<StudentId, StudentAggregates>> {
    let select = Query::select()
        .from(Grades::Table)
        .column(Grades::StudentId)
        .expr_as(Func::avg(Expr::col(Grades::Grade)), Alias::new("avg_grade"))
        .expr_as(Func::count(Expr::col(Grades::CourseId)), Alias::new("cnt"))
        .group_by_col(Grades::StudentId)
        .to_owned();
    let mut totals = HashMap::new();
    for row in query_all(conn, &select).await? {
        let student_id = StudentId(row.try_get("", &col_name(Grades::StudentId))?);
        let average: Option<f64> = row.try_get("", "avg_grade")?;
        let count: i64 = row.try_get("", "cnt")?;
        totals.insert(
            student_id,
            StudentAggregates {
                student_id,
                average_grade: average.map(round_grade).unwrap_or(0.0),
                course_count: count,
            },
        );
    }
    Ok(totals)
}

async fn expected_course_enrollment<C: ConnectionTrait>(
    conn: &C,
) -> GradebookResult<HashMap<CourseId, i64>> {
    let select = Query::select()
        .from(Grades::Table)
        .column(Grades::CourseId)
        .expr_as(
            Func::count_distinct(Expr::col(Grades::StudentId)),
            Alias::new("cnt"),
        )
        .group_by_col(Grades::CourseId)
        .to_owned();
    let mut totals = HashMap::new();
    for row in query_all(conn, &select).await? {
        let course_id = CourseId(row.try_get("", &col_name(Grades::CourseId))?);
        let count: i64 = row.try_get("", "cnt")?;
        totals.insert(course_id, count);
    }
    Ok(totals)
}

async fn count_rows<C, T, K>(conn: &C, table: T, key: K) -> GradebookResult<u64>
where
    C: ConnectionTrait,
    T: sea_orm::sea_query::Iden + 'static,
    K: sea_orm::sea_query::Iden + 'static,
{
    let select = Query::select()
        .from(table)
        .expr_as(Func::count(Expr::col(key)), Alias::new("cnt"))
        .to_owned();
    let count = match query_one(conn, &select).await? {
        Some(row) => row.try_get::<i64>("", "cnt")?,
        None => 0,
    };
    Ok(u64::try_from(count).unwrap_or(0))
}
