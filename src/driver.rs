//! Capability seams toward the external database driver and the
//! caller-supplied template customization hooks.
//!
//! The engine never depends on a concrete wire driver. It only needs to open
//! a connection from a connection string and execute command text over it, so
//! that pair of capabilities is expressed as object-safe traits and injected
//! into the orchestrator.

/// A single open connection to the server, capable of executing command text.
#[async_trait::async_trait]
pub trait SqlConnection: Send {
    async fn execute(&mut self, command_text: &str) -> anyhow::Result<()>;
}

/// Opens connections given a connection string.
#[async_trait::async_trait]
pub trait SqlDriver: Send + Sync {
    async fn connect(&self, connection_string: &str) -> anyhow::Result<Box<dyn SqlConnection>>;
}

/// Caller-supplied routine that turns a freshly created, empty template
/// database into the canonical test database (schema plus optional seed
/// data). Invoked exactly once per rebuild.
#[async_trait::async_trait]
pub trait BuildRoutine: Send + Sync {
    async fn build(&self, connection: &mut dyn SqlConnection) -> anyhow::Result<()>;
}

/// Optional override hook consulted only when the persisted uniqueness token
/// already matches: given a connection to the existing template, decide
/// whether a rebuild is needed anyway.
#[async_trait::async_trait]
pub trait RebuildCheck: Send + Sync {
    async fn requires_rebuild(&self, connection: &mut dyn SqlConnection) -> anyhow::Result<bool>;
}

/// Connection string for a database on the given server address.
///
/// Pooling is disabled only for the template connection so the template can
/// be detached immediately after the build routine finishes.
pub fn connection_string(server_address: &str, database: &str, pooling: bool) -> String {
    let mut value =
        format!("Data Source={server_address};Database={database};MultipleActiveResultSets=True");
    if !pooling {
        value.push_str(";Pooling=false");
    }
    value
}

/// Connection string for the master database, used for attach/detach/drop
/// commands.
pub fn master_connection_string(server_address: &str) -> String {
    format!("Data Source={server_address};Database=master")
}
