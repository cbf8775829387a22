//! Template-cloned ephemeral databases for automated tests.
//!
//! Schema and seed setup run once, into a `template` database; each test then
//! gets its own database materialized by copying the template's data files
//! instead of re-running setup. A uniqueness token persisted next to the
//! files decides across process restarts whether the template is still valid.

pub mod cloner;
pub mod config;
pub mod dirs;
pub mod driver;
pub mod error;
pub mod instance;
pub mod lifecycle;
pub mod orchestrator;
pub mod template;

pub use config::AppConfig;
pub use driver::{BuildRoutine, RebuildCheck, SqlConnection, SqlDriver};
pub use error::{Error, Result};
pub use orchestrator::{derive_database_name, Database, SqlInstance};
pub use template::TEMPLATE_NAME;
