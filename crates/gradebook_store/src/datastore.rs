use std::path::{Path, PathBuf};

use gradebook_core::GradebookResult;

use crate::{GradebookConfig, GradebookStore};

const DEFAULT_DB_NAME: &str = "gradebook.sqlite";

pub fn load_or_init_config(base: &Path) -> GradebookResult<GradebookConfig> {
    let default_sqlite = base.join(DEFAULT_DB_NAME);
    GradebookConfig::load_or_init(base, &default_sqlite)
}

pub async fn open_store(base: &Path) -> GradebookResult<GradebookStore> {
    let config = load_or_init_config(base)?;
    GradebookStore::connect(&config, base).await
}

pub fn default_sqlite_path(base: &Path) -> PathBuf {
    base.join(DEFAULT_DB_NAME)
}

#[cfg(test)]
mod tests {
    use super::{default_sqlite_path, load_or_init_config, open_store};
    use crate::{DirectoryApi, GradebookResult, NewCourse};
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_store_creates_config_and_sqlite_file() -> GradebookResult<()> {
        let dir = tempdir().expect("tempdir");
        let base = dir.path().join("datastore");
        let store = open_store(&base).await?;
        assert!(base.join("gradebook.json").exists());
        assert!(default_sqlite_path(&base).exists());
        assert!(store.list_courses().await?.is_empty());

        let course_id = store.create_course(NewCourse::new("Geography")).await?;
        drop(store);
        let config = load_or_init_config(&base)?;
        assert_eq!(config.backend_name(), "sqlite");
        assert_eq!(config.sqlite_path(&base)?, default_sqlite_path(&base));
        let reopened = open_store(&base).await?;
        let courses = reopened.list_courses().await?;
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].id, course_id);
        assert_eq!(courses[0].enrolled_count, 0);
        Ok(())
    }
}
