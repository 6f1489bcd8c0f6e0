use gradebook_store::failpoints::{
    AFTER_FACT_DELETE, AFTER_FACT_INSERT, BULK_RECOMPUTE, COURSE_RECOMPUTE, STUDENT_RECOMPUTE,
};
use gradebook_store::{
    AggregateReadApi, BulkLoadApi, CourseId, DirectoryApi, GradeReadApi, GradeWriteApi,
    GradebookConfig, GradebookError, GradebookResult, GradebookStore, MaintenanceApi, NewCourse,
    NewStudent, SeedConfig, StudentId,
};
use tempfile::{TempDir, tempdir};

/// Builds one populated store, then reopens it with the given failpoints armed.
async fn armed_store(failpoints: &[&str]) -> GradebookResult<(TempDir, GradebookStore)> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let path = base.join("gradebook.sqlite");
    {
        let config = GradebookConfig::default_sqlite(path.to_string_lossy());
        let store = GradebookStore::connect(&config, base).await?;
        store
            .create_student(NewStudent::new("Alice", "alice@example.com"))
            .await?;
        store
            .create_student(NewStudent::new("Bob", "bob@example.com"))
            .await?;
        store.create_course(NewCourse::new("Mathematics")).await?;
        store.add_grade(StudentId(1), CourseId(1), 90.0).await?;
    }
    let config = GradebookConfig::default_sqlite(path.to_string_lossy())
        .with_failpoints(failpoints.iter().copied());
    let store = GradebookStore::connect(&config, base).await?;
    Ok((dir, store))
}

#[tokio::test]
async fn failed_course_recompute_rolls_back_insert() -> GradebookResult<()> {
    let (_dir, store) = armed_store(&[COURSE_RECOMPUTE]).await?;
    let err = store
        .add_grade(StudentId(2), CourseId(1), 70.0)
        .await
        .expect_err("failpoint");
    assert!(
        matches!(err, GradebookError::AggregateRecompute { .. }),
        "unexpected error {err:?}"
    );
    assert!(store.get_grade(StudentId(2), CourseId(1)).await?.is_none());
    assert_eq!(store.get_course_enrollment(CourseId(1)).await?, 1);
    assert_eq!(store.get_student_course_count(StudentId(2)).await?, 0);
    assert!(store.audit_aggregates().await?.is_consistent());
    Ok(())
}

#[tokio::test]
async fn failed_course_recompute_rolls_back_delete() -> GradebookResult<()> {
    let (_dir, store) = armed_store(&[COURSE_RECOMPUTE]).await?;
    let err = store
        .remove_grade(StudentId(1), CourseId(1))
        .await
        .expect_err("failpoint");
    assert!(matches!(err, GradebookError::AggregateRecompute { .. }));
    assert!(store.get_grade(StudentId(1), CourseId(1)).await?.is_some());
    assert_eq!(store.get_course_enrollment(CourseId(1)).await?, 1);
    Ok(())
}

#[tokio::test]
async fn failed_student_recompute_rolls_back_course_change() -> GradebookResult<()> {
    let (_dir, store) = armed_store(&[STUDENT_RECOMPUTE]).await?;
    let err = store
        .add_grade(StudentId(2), CourseId(1), 70.0)
        .await
        .expect_err("failpoint");
    assert!(matches!(err, GradebookError::AggregateRecompute { .. }));
    assert!(store.get_grade(StudentId(2), CourseId(1)).await?.is_none());
    assert_eq!(store.get_course_enrollment(CourseId(1)).await?, 1);

    let err = store
        .update_grade(StudentId(1), CourseId(1), 10.0)
        .await
        .expect_err("failpoint");
    assert!(matches!(err, GradebookError::AggregateRecompute { .. }));
    let fact = store
        .get_grade(StudentId(1), CourseId(1))
        .await?
        .expect("fact");
    assert_eq!(fact.grade, 90.0);
    Ok(())
}

#[tokio::test]
async fn failure_before_maintenance_discards_fact() -> GradebookResult<()> {
    let (_dir, store) = armed_store(&[AFTER_FACT_INSERT, AFTER_FACT_DELETE]).await?;
    let err = store
        .add_grade(StudentId(2), CourseId(1), 70.0)
        .await
        .expect_err("failpoint");
    assert!(matches!(err, GradebookError::Storage { .. }));
    assert!(store.get_grade(StudentId(2), CourseId(1)).await?.is_none());

    let err = store
        .remove_grade(StudentId(1), CourseId(1))
        .await
        .expect_err("failpoint");
    assert!(matches!(err, GradebookError::Storage { .. }));
    assert!(err.is_retryable());
    assert!(store.get_grade(StudentId(1), CourseId(1)).await?.is_some());
    assert_eq!(store.get_course_enrollment(CourseId(1)).await?, 1);
    Ok(())
}

#[tokio::test]
async fn failed_bulk_recompute_leaves_store_empty() -> GradebookResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = GradebookConfig::default_sqlite(base.join("gradebook.sqlite").to_string_lossy())
        .with_failpoints([BULK_RECOMPUTE]);
    let store = GradebookStore::connect(&config, base).await?;

    let err = store
        .bulk_load(&SeedConfig::with_defaults())
        .await
        .expect_err("failpoint");
    assert!(matches!(err, GradebookError::AggregateRecompute { .. }));
    assert!(store.list_students().await?.is_empty());
    assert!(store.list_courses().await?.is_empty());

    let err = store.rebuild_aggregates().await.expect_err("failpoint");
    assert!(matches!(err, GradebookError::AggregateRecompute { .. }));
    Ok(())
}
