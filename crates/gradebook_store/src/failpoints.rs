use std::collections::HashSet;
use std::sync::Arc;

use gradebook_core::{GradebookError, GradebookResult};

pub const AFTER_FACT_INSERT: &str = "after_fact_insert";
pub const AFTER_FACT_DELETE: &str = "after_fact_delete";
pub const COURSE_RECOMPUTE: &str = "course_recompute";
pub const STUDENT_RECOMPUTE: &str = "student_recompute";
pub const BULK_RECOMPUTE: &str = "bulk_recompute";

/// Named hooks that force a storage error at a fixed step. Enabled only via
/// `GradebookConfig::failpoints`.
#[derive(Clone, Debug, Default)]
pub struct Failpoints(Arc<HashSet<String>>);

impl Failpoints {
    pub fn from_config(names: Option<&[String]>) -> Self {
        let set = names
            .unwrap_or_default()
            .iter()
            .cloned()
            .collect::<HashSet<_>>();
        Self(Arc::new(set))
    }

    pub fn check(&self, key: &str) -> GradebookResult<()> {
        if self.0.contains(key) {
            Err(GradebookError::storage(format!("failpoint {key}")))
        } else {
            Ok(())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
