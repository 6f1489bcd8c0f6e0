use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::sea_query::{
    Expr, ExprTrait, MysqlQueryBuilder, Order, PostgresQueryBuilder, Query, QueryStatementWriter,
    SqliteQueryBuilder,
};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection,
    DatabaseTransaction, QueryResult, Statement, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;

use gradebook_core::{
    AggregateAudit, AggregateReadApi, Course, CourseId, DirectoryApi, FactChanged, GradeFact,
    GradeReadApi, GradeWriteApi, GradebookError, GradebookResult, MaintenanceApi, NewCourse,
    NewStudent, RebuildReport, Student, StudentAggregates, StudentId,
};

use crate::GradebookConfig;
use crate::config::{SeedConfig, StudentAggregatePolicy};
use crate::db::*;
use crate::failpoints::{AFTER_FACT_DELETE, AFTER_FACT_INSERT, Failpoints};
use crate::maintenance::{AggregateMaintenance, FactChangeHandler};
use crate::migration::Migrator;

/// Transactional store for the grade facts and their dimension tables.
///
/// Derived fields are never accepted as input: every grade mutation runs the
/// registered [`FactChangeHandler`]s inside its own transaction, and the only
/// registered handler is the aggregate maintenance engine.
#[derive(Clone)]
pub struct GradebookStore {
    conn: DatabaseConnection,
    backend: DatabaseBackend,
    maintenance: AggregateMaintenance,
    handlers: Vec<Arc<dyn FactChangeHandler>>,
    failpoints: Failpoints,
    seed: SeedConfig,
}

impl GradebookStore {
    pub async fn connect(config: &GradebookConfig, base_dir: &Path) -> GradebookResult<Self> {
        let url = build_connection_url(config, base_dir)?;
        let mut options = ConnectOptions::new(url);
        options.sqlx_logging(false);
        if let Some(pool) = &config.pool {
            if let Some(max) = pool.max_connections {
                options.max_connections(max);
            }
            if let Some(min) = pool.min_connections {
                options.min_connections(min);
            }
            if let Some(timeout_ms) = pool.connect_timeout_ms {
                options.connect_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.acquire_timeout_ms {
                options.acquire_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.idle_timeout_ms {
                options.idle_timeout(Duration::from_millis(timeout_ms));
            }
        }
        let conn = Database::connect(options)
            .await
            .map_err(GradebookError::from)?;
        let backend = conn.get_database_backend();
        let failpoints = Failpoints::from_config(config.failpoints.as_deref());
        if !failpoints.is_empty() {
            log::warn!("failpoints armed: {:?}", config.failpoints);
        }
        let student_policy = config.student_policy();
        let maintenance = AggregateMaintenance::new(backend, student_policy, failpoints.clone());
        let handlers: Vec<Arc<dyn FactChangeHandler>> = vec![Arc::new(maintenance.clone())];
        let store = Self {
            conn,
            backend,
            maintenance,
            handlers,
            failpoints,
            seed: config.seed.clone().unwrap_or_default(),
        };
        Migrator::up(&store.conn, None)
            .await
            .map_err(GradebookError::from)?;
        log::info!(
            "gradebook store ready backend={} student_aggregates={:?}",
            config.backend_name(),
            student_policy
        );
        Ok(store)
    }

    pub async fn connect_sqlite(path: &Path) -> GradebookResult<Self> {
        let config = GradebookConfig::default_sqlite(path.to_string_lossy());
        Self::connect(&config, path.parent().unwrap_or_else(|| Path::new("."))).await
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.backend
    }

    pub fn student_policy(&self) -> StudentAggregatePolicy {
        self.maintenance.student_policy()
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|handler| handler.name()).collect()
    }

    pub(crate) fn maintenance(&self) -> &AggregateMaintenance {
        &self.maintenance
    }

    pub(crate) fn default_seed(&self) -> &SeedConfig {
        &self.seed
    }

    async fn dispatch(&self, tx: &DatabaseTransaction, event: FactChanged) -> GradebookResult<()> {
        for handler in &self.handlers {
            handler.on_fact_changed(tx, &event).await?;
        }
        Ok(())
    }

    async fn ensure_fact_keys<C: ConnectionTrait>(
        &self,
        conn: &C,
        student_id: StudentId,
        course_id: CourseId,
    ) -> GradebookResult<()> {
        if fetch_student(conn, student_id).await?.is_none() {
            return Err(GradebookError::constraint(format!(
                "student {student_id} does not exist"
            )));
        }
        if fetch_course(conn, course_id).await?.is_none() {
            return Err(GradebookError::constraint(format!(
                "course {course_id} does not exist"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryApi for GradebookStore {
    async fn create_student(&self, input: NewStudent) -> GradebookResult<StudentId> {
        let insert = Query::insert()
            .into_table(Students::Table)
            .columns([Students::Name, Students::Email])
            .values_panic([input.name.into(), input.email.into()])
            .to_owned();
        let id = insert_returning_id(&self.conn, insert, Students::StudentId).await?;
        Ok(StudentId(id))
    }

    async fn create_course(&self, input: NewCourse) -> GradebookResult<CourseId> {
        let insert = Query::insert()
            .into_table(Courses::Table)
            .columns([Courses::CourseName])
            .values_panic([input.name.into()])
            .to_owned();
        let id = insert_returning_id(&self.conn, insert, Courses::CourseId).await?;
        Ok(CourseId(id))
    }

    async fn get_student(&self, student_id: StudentId) -> GradebookResult<Option<Student>> {
        fetch_student(&self.conn, student_id).await
    }

    async fn get_course(&self, course_id: CourseId) -> GradebookResult<Option<Course>> {
        fetch_course(&self.conn, course_id).await
    }

    async fn list_students(&self) -> GradebookResult<Vec<Student>> {
        let select = student_select()
            .order_by(Students::StudentId, Order::Asc)
            .to_owned();
        query_all(&self.conn, &select)
            .await?
            .iter()
            .map(read_student)
            .collect()
    }

    async fn list_courses(&self) -> GradebookResult<Vec<Course>> {
        let select = course_select()
            .order_by(Courses::CourseId, Order::Asc)
            .to_owned();
        query_all(&self.conn, &select)
            .await?
            .iter()
            .map(read_course)
            .collect()
    }
}

#[async_trait]
impl GradeWriteApi for GradebookStore {
    async fn add_grade(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        grade: f64,
    ) -> GradebookResult<()> {
        validate_grade(grade)?;
        let tx = self.conn.begin().await?;
        self.ensure_fact_keys(&tx, student_id, course_id).await?;
        if fetch_grade(&tx, student_id, course_id).await?.is_some() {
            return Err(GradebookError::constraint(format!(
                "grade for student {student_id} in course {course_id} already exists"
            )));
        }
        let insert = Query::insert()
            .into_table(Grades::Table)
            .columns([Grades::StudentId, Grades::CourseId, Grades::Grade])
            .values_panic([student_id.0.into(), course_id.0.into(), grade.into()])
            .to_owned();
        exec(&tx, &insert).await?;
        self.failpoints.check(AFTER_FACT_INSERT)?;
        self.dispatch(&tx, FactChanged::inserted(student_id, course_id))
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn remove_grade(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> GradebookResult<()> {
        let tx = self.conn.begin().await?;
        if fetch_grade(&tx, student_id, course_id).await?.is_none() {
            return Err(GradebookError::not_found(format!(
                "grade for student {student_id} in course {course_id}"
            )));
        }
        let delete = Query::delete()
            .from_table(Grades::Table)
            .and_where(Expr::col(Grades::StudentId).eq(student_id.0))
            .and_where(Expr::col(Grades::CourseId).eq(course_id.0))
            .to_owned();
        exec(&tx, &delete).await?;
        self.failpoints.check(AFTER_FACT_DELETE)?;
        self.dispatch(&tx, FactChanged::deleted(student_id, course_id))
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_grade(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        grade: f64,
    ) -> GradebookResult<()> {
        validate_grade(grade)?;
        let tx = self.conn.begin().await?;
        if fetch_grade(&tx, student_id, course_id).await?.is_none() {
            return Err(GradebookError::not_found(format!(
                "grade for student {student_id} in course {course_id}"
            )));
        }
        let update = Query::update()
            .table(Grades::Table)
            .value(Grades::Grade, grade)
            .and_where(Expr::col(Grades::StudentId).eq(student_id.0))
            .and_where(Expr::col(Grades::CourseId).eq(course_id.0))
            .to_owned();
        exec(&tx, &update).await?;
        self.dispatch(&tx, FactChanged::updated(student_id, course_id))
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl GradeReadApi for GradebookStore {
    async fn get_grade(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> GradebookResult<Option<GradeFact>> {
        fetch_grade(&self.conn, student_id, course_id).await
    }

    async fn list_grades_for_student(
        &self,
        student_id: StudentId,
    ) -> GradebookResult<Vec<GradeFact>> {
        if fetch_student(&self.conn, student_id).await?.is_none() {
            return Err(GradebookError::not_found(format!("student {student_id}")));
        }
        let select = grade_select()
            .and_where(Expr::col(Grades::StudentId).eq(student_id.0))
            .order_by(Grades::CourseId, Order::Asc)
            .to_owned();
        query_all(&self.conn, &select)
            .await?
            .iter()
            .map(read_grade)
            .collect()
    }

    async fn list_grades_for_course(&self, course_id: CourseId) -> GradebookResult<Vec<GradeFact>> {
        if fetch_course(&self.conn, course_id).await?.is_none() {
            return Err(GradebookError::not_found(format!("course {course_id}")));
        }
        let select = grade_select()
            .and_where(Expr::col(Grades::CourseId).eq(course_id.0))
            .order_by(Grades::StudentId, Order::Asc)
            .to_owned();
        query_all(&self.conn, &select)
            .await?
            .iter()
            .map(read_grade)
            .collect()
    }
}

#[async_trait]
impl AggregateReadApi for GradebookStore {
    async fn get_course_enrollment(&self, course_id: CourseId) -> GradebookResult<i64> {
        let course = fetch_course(&self.conn, course_id)
            .await?
            .ok_or_else(|| GradebookError::not_found(format!("course {course_id}")))?;
        Ok(course.enrolled_count)
    }

    async fn get_student_average(&self, student_id: StudentId) -> GradebookResult<f64> {
        let student = fetch_student(&self.conn, student_id)
            .await?
            .ok_or_else(|| GradebookError::not_found(format!("student {student_id}")))?;
        Ok(student.average_grade)
    }

    async fn get_student_course_count(&self, student_id: StudentId) -> GradebookResult<i64> {
        let student = fetch_student(&self.conn, student_id)
            .await?
            .ok_or_else(|| GradebookError::not_found(format!("student {student_id}")))?;
        Ok(student.course_count)
    }
}

#[async_trait]
impl MaintenanceApi for GradebookStore {
    async fn recompute_course(&self, course_id: CourseId) -> GradebookResult<i64> {
        let tx = self.conn.begin().await?;
        let enrolled = self.maintenance.recompute_course(&tx, course_id).await?;
        tx.commit().await?;
        Ok(enrolled)
    }

    async fn recompute_student(&self, student_id: StudentId) -> GradebookResult<StudentAggregates> {
        let tx = self.conn.begin().await?;
        let aggregates = self.maintenance.recompute_student(&tx, student_id).await?;
        tx.commit().await?;
        Ok(aggregates)
    }

    async fn rebuild_aggregates(&self) -> GradebookResult<RebuildReport> {
        let tx = self.conn.begin().await?;
        let report = self
            .maintenance
            .rebuild_all(&tx)
            .await
            .map_err(|err| GradebookError::aggregate_recompute(format!("rebuild: {err}")))?;
        tx.commit().await?;
        Ok(report)
    }

    /// Reads every table inside one transaction so the comparison sees a
    /// single snapshot of facts and derived fields.
    async fn audit_aggregates(&self) -> GradebookResult<AggregateAudit> {
        let tx = self.conn.begin().await?;
        let audit = self.maintenance.audit(&tx).await?;
        tx.commit().await?;
        Ok(audit)
    }
}

fn validate_grade(grade: f64) -> GradebookResult<()> {
    if grade.is_finite() {
        Ok(())
    } else {
        Err(GradebookError::validation(format!(
            "grade must be a finite number, got {grade}"
        )))
    }
}

fn student_select() -> sea_orm::sea_query::SelectStatement {
    Query::select()
        .from(Students::Table)
        .columns([
            Students::StudentId,
            Students::Name,
            Students::Email,
            Students::AverageGrade,
            Students::CourseCount,
        ])
        .to_owned()
}

fn course_select() -> sea_orm::sea_query::SelectStatement {
    Query::select()
        .from(Courses::Table)
        .columns([Courses::CourseId, Courses::CourseName, Courses::EnrolledCount])
        .to_owned()
}

fn grade_select() -> sea_orm::sea_query::SelectStatement {
    Query::select()
        .from(Grades::Table)
        .columns([Grades::StudentId, Grades::CourseId, Grades::Grade])
        .to_owned()
}

pub(crate) async fn fetch_student<C: ConnectionTrait>(
    conn: &C,
    student_id: StudentId,
) -> GradebookResult<Option<Student>> {
    let select = student_select()
        .and_where(Expr::col(Students::StudentId).eq(student_id.0))
        .limit(1)
        .to_owned();
    query_one(conn, &select)
        .await?
        .map(|row| read_student(&row))
        .transpose()
}

pub(crate) async fn fetch_course<C: ConnectionTrait>(
    conn: &C,
    course_id: CourseId,
) -> GradebookResult<Option<Course>> {
    let select = course_select()
        .and_where(Expr::col(Courses::CourseId).eq(course_id.0))
        .limit(1)
        .to_owned();
    query_one(conn, &select)
        .await?
        .map(|row| read_course(&row))
        .transpose()
}

pub(crate) async fn fetch_grade<C: ConnectionTrait>(
    conn: &C,
    student_id: StudentId,
    course_id: CourseId,
) -> GradebookResult<Option<GradeFact>> {
    let select = grade_select()
        .and_where(Expr::col(Grades::StudentId).eq(student_id.0))
        .and_where(Expr::col(Grades::CourseId).eq(course_id.0))
        .limit(1)
        .to_owned();
    query_one(conn, &select)
        .await?
        .map(|row| read_grade(&row))
        .transpose()
}

fn read_student(row: &QueryResult) -> GradebookResult<Student> {
    Ok(Student {
        id: StudentId(row.try_get("", &col_name(Students::StudentId))?),
        name: row.try_get("", &col_name(Students::Name))?,
        email: row.try_get("", &col_name(Students::Email))?,
        average_grade: row.try_get("", &col_name(Students::AverageGrade))?,
        course_count: row.try_get("", &col_name(Students::CourseCount))?,
    })
}

fn read_course(row: &QueryResult) -> GradebookResult<Course> {
    Ok(Course {
        id: CourseId(row.try_get("", &col_name(Courses::CourseId))?),
        name: row.try_get("", &col_name(Courses::CourseName))?,
        enrolled_count: row.try_get("", &col_name(Courses::EnrolledCount))?,
    })
}

fn read_grade(row: &QueryResult) -> GradebookResult<GradeFact> {
    Ok(GradeFact {
        student_id: StudentId(row.try_get("", &col_name(Grades::StudentId))?),
        course_id: CourseId(row.try_get("", &col_name(Grades::CourseId))?),
        grade: row.try_get("", &col_name(Grades::Grade))?,
    })
}

/// Inserts one row and returns its generated integer key. MySQL has no
/// `RETURNING`, so it falls back to the driver's last insert id.
pub(crate) async fn insert_returning_id<C, K>(
    conn: &C,
    mut insert: sea_orm::sea_query::InsertStatement,
    key: K,
) -> GradebookResult<i64>
where
    C: ConnectionTrait,
    K: sea_orm::sea_query::Iden + Copy + 'static,
{
    let backend = conn.get_database_backend();
    if backend == DatabaseBackend::MySql {
        let (sql, values) = build_stmt(backend, &insert);
        let result = conn
            .execute_raw(Statement::from_sql_and_values(backend, sql, values))
            .await?;
        return Ok(result.last_insert_id() as i64);
    }
    insert.returning_col(key);
    let row = query_one(conn, &insert)
        .await?
        .ok_or_else(|| GradebookError::storage("insert returned no key"))?;
    Ok(row.try_get("", &col_name(key))?)
}

pub(crate) fn col_name(column: impl sea_orm::sea_query::Iden) -> String {
    column.to_string()
}

fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_orm::sea_query::Values) {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

pub(crate) async fn exec<C, S>(conn: &C, stmt: &S) -> GradebookResult<()>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    conn.execute_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(())
}

pub(crate) async fn query_all<C, S>(conn: &C, stmt: &S) -> GradebookResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let rows = conn
        .query_all_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(rows)
}

pub(crate) async fn query_one<C, S>(conn: &C, stmt: &S) -> GradebookResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let row = conn
        .query_one_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(row)
}

fn build_connection_url(config: &GradebookConfig, base_dir: &Path) -> GradebookResult<String> {
    match &config.database {
        crate::DatabaseConfig::Sqlite { .. } => {
            let path = config.sqlite_path(base_dir)?;
            Ok(format!("sqlite://{}?mode=rwc", path.display()))
        }
        crate::DatabaseConfig::Postgres { url } => Ok(url.clone()),
        crate::DatabaseConfig::Mysql { url } => Ok(url.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn grades_must_be_finite() {
        assert!(validate_grade(87.5).is_ok());
        assert!(matches!(
            validate_grade(f64::NAN),
            Err(GradebookError::Validation { .. })
        ));
        assert!(validate_grade(f64::INFINITY).is_err());
    }

    #[test]
    fn sqlite_url_resolves_relative_to_base_dir() -> GradebookResult<()> {
        let base = Path::new("/tmp/gradebook");
        let config = GradebookConfig::default_sqlite("data.sqlite");
        let url = build_connection_url(&config, base)?;
        assert_eq!(url, "sqlite:///tmp/gradebook/data.sqlite?mode=rwc");
        Ok(())
    }

    #[tokio::test]
    async fn registers_maintenance_handler_on_connect() -> GradebookResult<()> {
        let dir = tempdir().expect("tempdir");
        let store = GradebookStore::connect_sqlite(&dir.path().join("handlers.sqlite")).await?;
        assert_eq!(store.handler_names(), vec!["aggregate_maintenance"]);
        assert_eq!(store.backend(), DatabaseBackend::Sqlite);
        Ok(())
    }

    #[tokio::test]
    async fn insert_returning_id_yields_sequential_keys() -> GradebookResult<()> {
        let dir = tempdir().expect("tempdir");
        let store = GradebookStore::connect_sqlite(&dir.path().join("ids.sqlite")).await?;
        let first = store.create_course(NewCourse::new("Mathematics")).await?;
        let second = store.create_course(NewCourse::new("Physics")).await?;
        assert_eq!(second.0, first.0 + 1);
        Ok(())
    }
}
