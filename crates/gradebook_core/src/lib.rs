pub mod api;
pub mod error;
pub mod events;
pub mod ids;
pub mod model;

pub use api::*;
pub use error::{GradebookError, GradebookResult};
pub use events::*;
pub use ids::*;
pub use model::*;
