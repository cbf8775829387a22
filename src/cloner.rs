use crate::dirs;
use crate::driver::{self, SqlDriver};
use crate::error::{Error, Result};
use crate::instance::InstanceController;
use crate::template::TEMPLATE_NAME;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Materializes new databases by copying the template's backing file and
/// attaching the copy under a fresh logical name.
pub struct DatabaseCloner {
    controller: Arc<InstanceController>,
    driver: Arc<dyn SqlDriver>,
}

impl DatabaseCloner {
    pub fn new(controller: Arc<InstanceController>, driver: Arc<dyn SqlDriver>) -> Self {
        Self { controller, driver }
    }

    /// Produce an independently usable database named `name` from the
    /// template files and return its connection string.
    ///
    /// The file copy and the master connection open have independent latency,
    /// so they run concurrently; the attach-and-rename command is issued once
    /// both have finished.
    pub async fn clone_from(&self, name: &str) -> Result<String> {
        let started = Instant::now();
        dirs::validate_name(name)?;
        if name.eq_ignore_ascii_case(TEMPLATE_NAME) {
            return Err(Error::ReservedName {
                name: name.to_string(),
            });
        }

        let directory = self.controller.directory();
        let data_file = dirs::data_file(directory, name);
        if data_file.exists() {
            return Err(Error::DuplicateName {
                name: name.to_string(),
                data_file,
            });
        }
        let template_file = dirs::data_file(directory, TEMPLATE_NAME);

        let command_text = attach_and_rename_text(name, &data_file);
        let master = driver::master_connection_string(self.controller.server_address());

        let (copied, connection) = tokio::join!(
            tokio::fs::copy(&template_file, &data_file),
            self.driver.connect(&master),
        );
        copied.map_err(|source| Error::io(&data_file, source))?;
        let mut connection = connection.map_err(|source| {
            self.command_error("open master connection", name, &data_file, &command_text, source)
        })?;

        connection.execute(&command_text).await.map_err(|source| {
            self.command_error("attach cloned database", name, &data_file, &command_text, source)
        })?;

        log::debug!("cloned '{name}' from template in {:?}", started.elapsed());
        Ok(driver::connection_string(
            self.controller.server_address(),
            name,
            true,
        ))
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

/// Attach the copied file under the new name, then rename the internal
/// logical file names inherited from the template.
fn attach_and_rename_text(name: &str, data_file: &Path) -> String {
    format!(
        "\
create database [{name}] on
(
    name = [{name}],
    filename = '{data_file}',
    size = 10MB,
    fileGrowth = 5MB
)
for attach;

alter database [{name}]
    modify file (name = [template], newname = '{name}');
alter database [{name}]
    modify file (name = [template_log], newname = '{name}_log');
",
        name = name,
        data_file = data_file.display()
    )
}
