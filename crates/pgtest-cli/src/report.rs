use std::io::{self, Write};
use std::path::Path;

use pgtest::PgInstance;
use serde::Serialize;

/// Connection details printed once the instance is ready.
#[derive(Debug, Serialize)]
pub(crate) struct InstanceReport<'a> {
    socket_dir: &'a Path,
    data_dir: &'a Path,
    root: &'a Path,
    database: &'a str,
    user: &'a str,
    pid: Option<u32>,
    persistent: bool,
    url: String,
}

impl<'a> InstanceReport<'a> {
    pub(crate) fn new(instance: &'a PgInstance) -> Self {
        Self {
            socket_dir: instance.socket_dir(),
            data_dir: instance.data_dir(),
            root: instance.root(),
            database: instance.database(),
            user: instance.user(),
            pid: instance.pid(),
            persistent: instance.is_persistent(),
            url: instance.connection_url(),
        }
    }

    /// Writes the report as a single JSON line.
    pub(crate) fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        serde_json::to_writer(&mut *writer, self)?;
        writeln!(writer)?;
        writer.flush()
    }
}
