use serde::{Deserialize, Serialize};

use crate::{CourseId, StudentId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactChangeKind {
    Inserted,
    Deleted,
    /// Value change on an existing pair; keys are unchanged.
    Updated,
}

/// Emitted by the fact store inside the mutating transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactChanged {
    pub kind: FactChangeKind,
    pub student_id: StudentId,
    pub course_id: CourseId,
}

impl FactChanged {
    pub fn inserted(student_id: StudentId, course_id: CourseId) -> Self {
        Self {
            kind: FactChangeKind::Inserted,
            student_id,
            course_id,
        }
    }

    pub fn deleted(student_id: StudentId, course_id: CourseId) -> Self {
        Self {
            kind: FactChangeKind::Deleted,
            student_id,
            course_id,
        }
    }

    pub fn updated(student_id: StudentId, course_id: CourseId) -> Self {
        Self {
            kind: FactChangeKind::Updated,
            student_id,
            course_id,
        }
    }
}
