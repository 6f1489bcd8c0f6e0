use std::collections::HashMap;

use gradebook_store::{
    BulkLoadApi, DirectoryApi, GradeReadApi, GradebookConfig, GradebookError, GradebookResult,
    GradebookStore, MaintenanceApi, NewCourse, ReportingApi, SeedConfig, SeedStudent, round_grade,
};
use tempfile::{TempDir, tempdir};

async fn open_store() -> GradebookResult<(TempDir, GradebookStore)> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = GradebookConfig::default_sqlite(base.join("gradebook.sqlite").to_string_lossy());
    let store = GradebookStore::connect(&config, base).await?;
    Ok((dir, store))
}

fn seeded_defaults(seed: u64) -> SeedConfig {
    SeedConfig {
        rng_seed: Some(seed),
        ..SeedConfig::with_defaults()
    }
}

#[tokio::test]
async fn bulk_load_produces_consistent_aggregates() -> GradebookResult<()> {
    let (_dir, store) = open_store().await?;
    let report = store.bulk_load(&seeded_defaults(11)).await?;
    assert_eq!(report.students, 29);
    assert_eq!(report.courses, 8);
    assert!((29 * 3..=29 * 8).contains(&report.grades));

    let audit = store.audit_aggregates().await?;
    assert!(audit.is_consistent(), "drifts: {:?}", audit.drifts);
    assert_eq!(audit.students_checked, 29);
    assert_eq!(audit.courses_checked, 8);

    let rows = store.all_grades().await?;
    assert_eq!(rows.len() as u64, report.grades);
    let mut per_course: HashMap<i64, i64> = HashMap::new();
    for row in &rows {
        *per_course.entry(row.course_id.0).or_default() += 1;
        assert!((55.0..=100.0).contains(&row.grade));
    }
    for course in store.list_courses().await? {
        let expected = per_course.get(&course.id.0).copied().unwrap_or(0);
        assert_eq!(course.enrolled_count, expected, "course {}", course.name);
    }
    for student in store.list_students().await? {
        let grades = store.list_grades_for_student(student.id).await?;
        assert!((3..=8).contains(&grades.len()));
        assert_eq!(student.course_count, grades.len() as i64);
        let mean = grades.iter().map(|fact| fact.grade).sum::<f64>() / grades.len() as f64;
        assert_eq!(student.average_grade, round_grade(mean));
    }
    Ok(())
}

#[tokio::test]
async fn bulk_load_is_deterministic_for_a_seed() -> GradebookResult<()> {
    let (_first_dir, first) = open_store().await?;
    let (_second_dir, second) = open_store().await?;
    first.bulk_load(&seeded_defaults(5)).await?;
    second.bulk_load(&seeded_defaults(5)).await?;
    assert_eq!(first.all_grades().await?, second.all_grades().await?);
    Ok(())
}

#[tokio::test]
async fn bulk_load_refuses_populated_store() -> GradebookResult<()> {
    let (_dir, store) = open_store().await?;
    store.bulk_load(&seeded_defaults(3)).await?;
    let before = store.all_grades().await?;

    let err = store
        .bulk_load(&seeded_defaults(4))
        .await
        .expect_err("store already populated");
    assert!(matches!(err, GradebookError::Conflict { .. }));
    assert_eq!(store.all_grades().await?, before);
    assert_eq!(store.list_students().await?.len(), 29);
    Ok(())
}

#[tokio::test]
async fn bulk_load_refuses_store_with_only_courses() -> GradebookResult<()> {
    let (_dir, store) = open_store().await?;
    store.create_course(NewCourse::new("Astronomy")).await?;
    let err = store
        .bulk_load_default()
        .await
        .expect_err("course row exists");
    assert!(matches!(err, GradebookError::Conflict { .. }));
    Ok(())
}

#[tokio::test]
async fn bulk_load_validates_configuration() -> GradebookResult<()> {
    let (_dir, store) = open_store().await?;
    let config = SeedConfig {
        students: vec![SeedStudent {
            name: "Solo".to_string(),
            email: "solo@example.com".to_string(),
        }],
        grade_min: 90,
        grade_max: 10,
        ..SeedConfig::with_defaults()
    };
    let err = store.bulk_load(&config).await.expect_err("inverted range");
    assert!(matches!(err, GradebookError::Validation { .. }));
    assert!(store.list_students().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn bulk_load_default_uses_configured_seed() -> GradebookResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let mut config =
        GradebookConfig::default_sqlite(base.join("gradebook.sqlite").to_string_lossy());
    config.seed = Some(SeedConfig {
        students: vec![
            SeedStudent {
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
            },
            SeedStudent {
                name: "Grace".to_string(),
                email: "grace@example.com".to_string(),
            },
        ],
        courses: vec!["Logic".to_string(), "Compilers".to_string()],
        min_courses_per_student: 1,
        max_courses_per_student: 2,
        grade_min: 60,
        grade_max: 61,
        rng_seed: Some(9),
    });
    let store = GradebookStore::connect(&config, base).await?;
    let report = store.bulk_load_default().await?;
    assert_eq!(report.students, 2);
    assert_eq!(report.courses, 2);
    assert!((2..=4).contains(&report.grades));
    assert!(store.audit_aggregates().await?.is_consistent());
    Ok(())
}
