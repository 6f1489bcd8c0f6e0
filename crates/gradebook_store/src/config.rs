use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use gradebook_core::{GradebookError, GradebookResult};

const DEFAULT_CONFIG_NAME: &str = "gradebook.json";
const DEFAULT_DB_FILE: &str = "gradebook.sqlite";

const DEFAULT_STUDENTS: [&str; 29] = [
    "Alice", "Bob", "Charlie", "David", "Eve", "Frank", "Grace", "Hank", "Ivy", "Jack", "Kevin",
    "Laura", "Michael", "Nancy", "Oscar", "Pam", "Quinn", "Rick", "Steve", "Tina", "Uma",
    "Victor", "Wendy", "Xander", "Yvonne", "Zach", "Amber", "Bruce", "Clara",
];

const DEFAULT_COURSES: [&str; 8] = [
    "Mathematics",
    "Physics",
    "Chemistry",
    "Biology",
    "History",
    "Geography",
    "Literature",
    "Computer Science",
];

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Postgres { url: String },
    Mysql { url: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

/// How the student-side derived fields react to fact mutations.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StudentAggregatePolicy {
    /// Recompute `average_grade` and `course_count` for the mutated student.
    #[default]
    Incremental,
    /// Only the bulk load and explicit rebuilds touch student aggregates.
    LoadOnly,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    pub student_aggregates: Option<StudentAggregatePolicy>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedStudent {
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedConfig {
    pub students: Vec<SeedStudent>,
    pub courses: Vec<String>,
    pub min_courses_per_student: usize,
    pub max_courses_per_student: usize,
    pub grade_min: i64,
    pub grade_max: i64,
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl SeedConfig {
    pub fn with_defaults() -> Self {
        Self {
            students: DEFAULT_STUDENTS
                .iter()
                .map(|name| SeedStudent {
                    name: (*name).to_string(),
                    email: format!("{}@example.com", name.to_lowercase()),
                })
                .collect(),
            courses: DEFAULT_COURSES.iter().map(|name| name.to_string()).collect(),
            min_courses_per_student: 3,
            max_courses_per_student: 8,
            grade_min: 55,
            grade_max: 100,
            rng_seed: None,
        }
    }

    pub fn validate(&self) -> GradebookResult<()> {
        if self.min_courses_per_student > self.max_courses_per_student {
            return Err(GradebookError::validation(
                "min_courses_per_student exceeds max_courses_per_student",
            ));
        }
        if self.grade_min > self.grade_max {
            return Err(GradebookError::validation("grade_min exceeds grade_max"));
        }
        let needs_courses = !self.students.is_empty() && self.min_courses_per_student > 0;
        if needs_courses && self.courses.is_empty() {
            return Err(GradebookError::validation(
                "students need at least one course to be graded in",
            ));
        }
        Ok(())
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GradebookConfig {
    pub database: DatabaseConfig,
    pub pool: Option<PoolConfig>,
    pub maintenance: Option<MaintenanceConfig>,
    pub seed: Option<SeedConfig>,
    pub failpoints: Option<Vec<String>>,
}

impl GradebookConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            pool: None,
            maintenance: Some(MaintenanceConfig {
                student_aggregates: Some(StudentAggregatePolicy::Incremental),
            }),
            seed: None,
            failpoints: None,
        }
    }

    pub fn load_or_init(base_dir: &Path, default_sqlite_path: &Path) -> GradebookResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| GradebookError::storage(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| GradebookError::storage(format!("read config: {err}")))?;
            let config: GradebookConfig = serde_json::from_str(&raw)
                .map_err(|err| GradebookError::validation(err.to_string()))?;
            return Ok(config);
        }
        let default = GradebookConfig::default_sqlite(default_sqlite_path.to_string_lossy());
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| GradebookError::storage(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| GradebookError::storage(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> GradebookResult<PathBuf> {
        match &self.database {
            DatabaseConfig::Sqlite { path } => {
                let path = path.clone().unwrap_or_else(|| DEFAULT_DB_FILE.to_string());
                let candidate = PathBuf::from(path);
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            _ => Err(GradebookError::validation("config is not sqlite backend")),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
            DatabaseConfig::Mysql { .. } => "mysql",
        }
    }

    pub fn connection_url(&self) -> Option<&str> {
        match &self.database {
            DatabaseConfig::Sqlite { .. } => None,
            DatabaseConfig::Postgres { url } | DatabaseConfig::Mysql { url } => Some(url.as_str()),
        }
    }

    pub fn student_policy(&self) -> StudentAggregatePolicy {
        self.maintenance
            .as_ref()
            .and_then(|cfg| cfg.student_aggregates)
            .unwrap_or_default()
    }

    pub fn with_failpoints<I, S>(mut self, failpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failpoints = Some(failpoints.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_student_policy(mut self, policy: StudentAggregatePolicy) -> Self {
        self.maintenance = Some(MaintenanceConfig {
            student_aggregates: Some(policy),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{GradebookConfig, SeedConfig, StudentAggregatePolicy};
    use tempfile::tempdir;

    #[test]
    fn load_or_init_writes_default_file() {
        let dir = tempdir().expect("tempdir");
        let base = dir.path();
        let config =
            GradebookConfig::load_or_init(base, &base.join("gradebook.sqlite")).expect("config");
        assert_eq!(config.backend_name(), "sqlite");
        assert!(base.join("gradebook.json").exists());
        let reloaded =
            GradebookConfig::load_or_init(base, &base.join("other.sqlite")).expect("reload");
        assert_eq!(
            reloaded.sqlite_path(base).expect("path"),
            base.join("gradebook.sqlite")
        );
    }

    #[test]
    fn student_policy_defaults_to_incremental() {
        let mut config = GradebookConfig::default_sqlite("a.sqlite");
        config.maintenance = None;
        assert_eq!(config.student_policy(), StudentAggregatePolicy::Incremental);
        let config = config.with_student_policy(StudentAggregatePolicy::LoadOnly);
        assert_eq!(config.student_policy(), StudentAggregatePolicy::LoadOnly);
    }

    #[test]
    fn default_seed_matches_reference_dataset() {
        let seed = SeedConfig::with_defaults();
        assert_eq!(seed.students.len(), 29);
        assert_eq!(seed.courses.len(), 8);
        assert_eq!(seed.students[0].email, "alice@example.com");
        assert!(seed.validate().is_ok());
    }

    #[test]
    fn seed_validation_rejects_inverted_ranges() {
        let mut seed = SeedConfig::with_defaults();
        seed.grade_min = 90;
        seed.grade_max = 60;
        assert!(seed.validate().is_err());
        let mut seed = SeedConfig::with_defaults();
        seed.min_courses_per_student = 9;
        assert!(seed.validate().is_err());
    }
}
