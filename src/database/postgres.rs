use crate::backup::pipeline::StageCommand;
use crate::config::DumpFormat;
use std::path::Path;
use url::Url;

/// Builds the `pg_dump` invocation whose stdout feeds the compressor.
pub fn dump_command(
    pg_dump: &Path,
    connection_string: &str,
    format: DumpFormat,
    exclude_tables: &[String],
) -> StageCommand {
    let mut command = StageCommand::new(pg_dump).arg(format!("--dbname={}", connection_string));

    command = match format {
        DumpFormat::Plain => command.arg("--format=plain"),
        DumpFormat::Native => command.args(["--format=custom", "--blobs"]),
    };

    for table in exclude_tables.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        command = command.arg(format!("--exclude-table={}", table));
    }

    command
}

/// `host/database` for log lines, without credentials.
pub fn describe_target(connection_string: &str) -> String {
    if let Ok(url) = Url::parse(connection_string) {
        if matches!(url.scheme(), "postgres" | "postgresql") {
            let host = url.host_str().unwrap_or("localhost");
            let database = url.path().trim_start_matches('/');
            return format!("{}/{}", host, database);
        }
    }

    let mut host = "localhost";
    let mut database = "";
    for pair in connection_string.split_whitespace() {
        match pair.split_once('=') {
            Some(("host", value)) => host = value,
            Some(("dbname", value)) => database = value,
            _ => {}
        }
    }
    format!("{}/{}", host, database)
}
