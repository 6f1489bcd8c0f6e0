//! One-shot bulk initializer.
//!
//! Populates an empty store with students, courses and random grades, then
//! runs a single full aggregate rebuild. Grade inserts made here bypass the
//! per-event maintenance; the closing rebuild is what makes the derived
//! fields consistent.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use sea_orm::sea_query::{Expr, Query};
use sea_orm::{ConnectionTrait, TransactionTrait};

use gradebook_core::{CourseId, GradeFact, GradebookError, GradebookResult, SeedReport, StudentId};

use crate::GradebookStore;
use crate::config::SeedConfig;
use crate::db::*;
use crate::store::{exec, insert_returning_id, query_one};

const GRADE_INSERT_BATCH: usize = 500;

#[async_trait]
pub trait BulkLoadApi {
    /// Seeds an empty store. Fails with `Conflict` when any row exists.
    async fn bulk_load(&self, config: &SeedConfig) -> GradebookResult<SeedReport>;

    /// Seeds with the configuration carried by `GradebookConfig::seed`, or
    /// the reference data set when none was configured.
    async fn bulk_load_default(&self) -> GradebookResult<SeedReport>;
}

#[async_trait]
impl BulkLoadApi for GradebookStore {
    async fn bulk_load(&self, config: &SeedConfig) -> GradebookResult<SeedReport> {
        config.validate()?;
        let tx = self.connection().begin().await?;
        if table_has_rows(&tx, Students::Table).await?
            || table_has_rows(&tx, Courses::Table).await?
            || table_has_rows(&tx, Grades::Table).await?
        {
            return Err(GradebookError::conflict("bulk load requires an empty store"));
        }

        let mut student_ids = Vec::with_capacity(config.students.len());
        for student in &config.students {
            let insert = Query::insert()
                .into_table(Students::Table)
                .columns([Students::Name, Students::Email])
                .values_panic([student.name.clone().into(), student.email.clone().into()])
                .to_owned();
            let id = insert_returning_id(&tx, insert, Students::StudentId).await?;
            student_ids.push(StudentId(id));
        }

        let mut course_ids = Vec::with_capacity(config.courses.len());
        for name in &config.courses {
            let insert = Query::insert()
                .into_table(Courses::Table)
                .columns([Courses::CourseName])
                .values_panic([name.clone().into()])
                .to_owned();
            let id = insert_returning_id(&tx, insert, Courses::CourseId).await?;
            course_ids.push(CourseId(id));
        }

        let mut rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let grades = plan_grades(config, &student_ids, &course_ids, &mut rng);
        for chunk in grades.chunks(GRADE_INSERT_BATCH) {
            let mut insert = Query::insert();
            insert
                .into_table(Grades::Table)
                .columns([Grades::StudentId, Grades::CourseId, Grades::Grade]);
            for fact in chunk {
                insert.values_panic([
                    fact.student_id.0.into(),
                    fact.course_id.0.into(),
                    fact.grade.into(),
                ]);
            }
            exec(&tx, &insert).await?;
        }

        self.maintenance()
            .rebuild_all(&tx)
            .await
            .map_err(|err| GradebookError::aggregate_recompute(format!("bulk load: {err}")))?;
        tx.commit().await?;

        let report = SeedReport {
            students: student_ids.len() as u64,
            courses: course_ids.len() as u64,
            grades: grades.len() as u64,
        };
        log::info!(
            "bulk load seeded {} students, {} courses, {} grades",
            report.students,
            report.courses,
            report.grades
        );
        Ok(report)
    }

    async fn bulk_load_default(&self) -> GradebookResult<SeedReport> {
        let config = self.default_seed().clone();
        self.bulk_load(&config).await
    }
}

async fn table_has_rows<C, T>(conn: &C, table: T) -> GradebookResult<bool>
where
    C: ConnectionTrait,
    T: sea_orm::sea_query::Iden + 'static,
{
    let select = Query::select()
        .expr(Expr::val(1))
        .from(table)
        .limit(1)
        .to_owned();
    Ok(query_one(conn, &select).await?.is_some())
}

/// Picks between `min_courses_per_student` and `max_courses_per_student`
/// distinct courses per student, capped by the number of courses, each with
/// an integer grade in `[grade_min, grade_max]`.
pub fn plan_grades<R: Rng>(
    config: &SeedConfig,
    students: &[StudentId],
    courses: &[CourseId],
    rng: &mut R,
) -> Vec<GradeFact> {
    let mut facts = Vec::new();
    if courses.is_empty() {
        return facts;
    }
    for student_id in students {
        let wanted = rng.gen_range(config.min_courses_per_student..=config.max_courses_per_student);
        let take = wanted.min(courses.len());
        let mut picked: Vec<CourseId> = courses.choose_multiple(rng, take).copied().collect();
        picked.sort();
        for course_id in picked {
            let grade = rng.gen_range(config.grade_min..=config.grade_max);
            facts.push(GradeFact {
                student_id: *student_id,
                course_id,
                grade: grade as f64,
            });
        }
    }
    facts
}
