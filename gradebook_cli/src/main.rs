use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use gradebook_store::{
    AggregateReadApi, BulkLoadApi, CourseId, DirectoryApi, GradeWriteApi, GradebookStore,
    MaintenanceApi, ReportingApi, StudentId, open_store,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();
    let store = open_store(&cli.datastore)
        .await
        .with_context(|| format!("open datastore {}", cli.datastore.display()))?;
    log::debug!("opened datastore {}", cli.datastore.display());
    run(&store, cli.command).await
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("install log subscriber: {err}"))
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Operator commands for a gradebook datastore"
)]
struct Cli {
    /// Directory holding `gradebook.json` and the default SQLite file.
    #[arg(long, global = true, default_value = ".gradebook")]
    datastore: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Populate an empty datastore with the configured seed data set.
    Seed,
    /// Record a grade for a student in a course.
    AddGrade(GradeArgs),
    /// Delete the grade a student holds in a course.
    RemoveGrade(FactKeyArgs),
    /// Change the value of an existing grade.
    UpdateGrade(GradeArgs),
    /// Show the maintained enrollment count of a course.
    Enrollment {
        #[arg(long)]
        course: i64,
    },
    /// Show a student row with its derived fields.
    Student {
        #[arg(long)]
        student: i64,
    },
    /// Print one of the read-only report views.
    Report {
        #[command(subcommand)]
        view: ReportView,
    },
    /// Recompute every derived field from the grade facts.
    Rebuild,
    /// Compare stored derived fields with a full recomputation.
    Audit,
}

#[derive(Args)]
struct FactKeyArgs {
    #[arg(long)]
    student: i64,
    #[arg(long)]
    course: i64,
}

#[derive(Args)]
struct GradeArgs {
    #[command(flatten)]
    key: FactKeyArgs,
    #[arg(long)]
    grade: f64,
}

#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
enum ReportView {
    /// Every grade joined with student and course names.
    All,
    /// Grades strictly above 80.
    High,
    /// The course with the highest enrollment count.
    TopCourse,
    /// The single highest grade.
    TopGrade,
}

#[derive(Serialize)]
struct Enrollment {
    course_id: CourseId,
    enrolled_count: i64,
}

#[derive(Serialize)]
struct Applied {
    action: &'static str,
    student_id: StudentId,
    course_id: CourseId,
}

async fn run(store: &GradebookStore, command: Command) -> Result<()> {
    match command {
        Command::Seed => {
            let report = store.bulk_load_default().await.context("seed datastore")?;
            print_json(&report)
        }
        Command::AddGrade(args) => {
            let (student_id, course_id) = fact_key(&args.key);
            store
                .add_grade(student_id, course_id, args.grade)
                .await
                .with_context(|| {
                    format!("add grade for student {student_id} in course {course_id}")
                })?;
            print_json(&Applied {
                action: "added",
                student_id,
                course_id,
            })
        }
        Command::RemoveGrade(args) => {
            let (student_id, course_id) = fact_key(&args);
            store
                .remove_grade(student_id, course_id)
                .await
                .with_context(|| {
                    format!("remove grade for student {student_id} in course {course_id}")
                })?;
            print_json(&Applied {
                action: "removed",
                student_id,
                course_id,
            })
        }
        Command::UpdateGrade(args) => {
            let (student_id, course_id) = fact_key(&args.key);
            store
                .update_grade(student_id, course_id, args.grade)
                .await
                .with_context(|| {
                    format!("update grade for student {student_id} in course {course_id}")
                })?;
            print_json(&Applied {
                action: "updated",
                student_id,
                course_id,
            })
        }
        Command::Enrollment { course } => {
            let course_id = CourseId(course);
            let enrolled_count = store
                .get_course_enrollment(course_id)
                .await
                .with_context(|| format!("read enrollment of course {course_id}"))?;
            print_json(&Enrollment {
                course_id,
                enrolled_count,
            })
        }
        Command::Student { student } => {
            let student_id = StudentId(student);
            let row = store
                .get_student(student_id)
                .await
                .with_context(|| format!("read student {student_id}"))?
                .ok_or_else(|| anyhow!("student {student_id} not found"))?;
            print_json(&row)
        }
        Command::Report { view } => report(store, view).await,
        Command::Rebuild => {
            let report = store
                .rebuild_aggregates()
                .await
                .context("rebuild aggregates")?;
            print_json(&report)
        }
        Command::Audit => {
            let audit = store.audit_aggregates().await.context("audit aggregates")?;
            print_json(&audit)?;
            if !audit.is_consistent() {
                bail!("{} derived fields drifted from the grade facts", audit.drifts.len());
            }
            Ok(())
        }
    }
}

async fn report(store: &GradebookStore, view: ReportView) -> Result<()> {
    match view {
        ReportView::All => print_json(&store.all_grades().await.context("all grades")?),
        ReportView::High => print_json(&store.high_grades().await.context("high grades")?),
        ReportView::TopCourse => print_json(
            &store
                .course_with_most_students()
                .await
                .context("course with most students")?,
        ),
        ReportView::TopGrade => print_json(&store.top_grade().await.context("top grade")?),
    }
}

fn fact_key(args: &FactKeyArgs) -> (StudentId, CourseId) {
    (StudentId(args.student), CourseId(args.course))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{payload}");
    Ok(())
}
