use crate::dirs;
use crate::driver::{self, SqlDriver};
use crate::error::{Error, Result};
use crate::instance::InstanceController;
use std::path::Path;
use std::sync::Arc;

/// Tears databases down: force-disconnect open sessions, drop server-side,
/// then delete the backing files. Deleting an absent database is a no-op.
pub struct LifecycleManager {
    controller: Arc<InstanceController>,
    driver: Arc<dyn SqlDriver>,
}

impl LifecycleManager {
    pub fn new(controller: Arc<InstanceController>, driver: Arc<dyn SqlDriver>) -> Self {
        Self { controller, driver }
    }

    pub async fn delete_database(&self, name: &str) -> Result<()> {
        dirs::validate_name(name)?;
        let directory = self.controller.directory();
        let data_file = dirs::data_file(directory, name);

        let command_text = drop_database_text(name);
        let master = driver::master_connection_string(self.controller.server_address());
        let mut connection = self.driver.connect(&master).await.map_err(|source| {
            self.command_error("open master connection", name, &data_file, &command_text, source)
        })?;
        connection.execute(&command_text).await.map_err(|source| {
            self.command_error("drop database", name, &data_file, &command_text, source)
        })?;

        remove_if_exists(&data_file).await?;
        remove_if_exists(&dirs::log_file(directory, name)).await?;
        log::debug!("deleted database '{name}'");
        Ok(())
    }

    fn command_error(
        &self,
        operation: &'static str,
        name: &str,
        data_file: &Path,
        command_text: &str,
        source: anyhow::Error,
    ) -> Error {
        Error::Command {
            operation,
            instance: self.controller.name().to_string(),
            database: name.to_string(),
            data_file: data_file.display().to_string(),
            command_text: command_text.to_string(),
            source,
        }
    }
}

/// Single-user with immediate rollback kicks out any session a prior test
/// left open; the `db_id` guard makes the whole command a no-op for an
/// absent database.
fn drop_database_text(name: &str) -> String {
    format!(
        "\
if db_id('{name}') is not null
begin
    alter database [{name}] set single_user with rollback immediate;
    drop database [{name}];
end;
"
    )
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(Error::io(path, source)),
    }
}
