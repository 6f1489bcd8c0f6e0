pub mod config;
pub mod datastore;
mod db;
pub mod failpoints;
pub mod maintenance;
pub mod migration;
pub mod reporting;
pub mod seed;
pub mod store;

pub use config::{
    DatabaseConfig, GradebookConfig, MaintenanceConfig, PoolConfig, SeedConfig, SeedStudent,
    StudentAggregatePolicy,
};
pub use datastore::{default_sqlite_path, load_or_init_config, open_store};
pub use gradebook_core::*;
pub use maintenance::{AggregateMaintenance, FactChangeHandler};
pub use seed::{BulkLoadApi, plan_grades};
pub use store::GradebookStore;
