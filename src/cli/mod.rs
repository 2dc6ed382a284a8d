use crate::backup::schedule::next_due;
use crate::backup::RunSummary;
use crate::config::AppConfig;
use crate::database::describe_target;
use crate::error::Result;
use crate::history::{Outcome, RunHistory, RunRecord};
use chrono::Utc;
use console::style;

pub fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "{} attempted, {} skipped, {} succeeded, {} failed",
        summary.attempted,
        summary.skipped,
        style(summary.succeeded).green(),
        if summary.failed > 0 {
            style(summary.failed).red().bold()
        } else {
            style(summary.failed).dim()
        }
    );
    if summary.warnings > 0 {
        println!(
            "{}",
            style(format!(
                "{} backup(s) changed size by more than 10%; check the run log",
                summary.warnings
            ))
            .yellow()
        );
    }
}

pub fn print_servers(config: &AppConfig, history: &RunHistory) -> Result<()> {
    if config.servers.is_empty() {
        println!("{}", style("No servers configured").dim());
        return Ok(());
    }

    let latest = history.latest_per_server()?;
    let now = Utc::now();

    for server in &config.servers {
        let last_run = latest.iter().find(|r| r.server_id == server.id);
        let last_success = history.last_success(&server.id)?.map(|r| r.timestamp);
        let runs = history.count_for(&server.id)?;

        let status = match last_run {
            Some(r) if r.outcome == Outcome::Success => style("OK".to_string()).green(),
            Some(_) => style("FAILED".to_string()).red(),
            None => style("NEVER".to_string()).dim(),
        };
        let due = match next_due(server.frequency_hrs, last_success, now) {
            Some(at) => format!("due {}", at.format("%Y-%m-%d %H:%M UTC")),
            None => "due now".to_string(),
        };

        println!(
            "{:<20} {:<8} every {:>3}h  {:<32} {:>5} runs  {}",
            style(&server.id).cyan(),
            status,
            server.frequency_hrs,
            describe_target(&server.connection_string),
            runs,
            due
        );
    }
    Ok(())
}

pub fn print_logs(server_id: &str, records: &[RunRecord]) {
    if records.is_empty() {
        println!("{}", style(format!("No runs recorded for '{}'", server_id)).dim());
        return;
    }

    for record in records {
        let outcome = match record.outcome {
            Outcome::Success => style(record.outcome.to_string()).green(),
            Outcome::Failure => style(record.outcome.to_string()).red(),
        };
        let size = record
            .file_size
            .map(|s| format!("{:.2} MB", s as f64 / 1024.0 / 1024.0))
            .unwrap_or_default();

        println!(
            "#{:<6} {}  {:<8} {:>12}  {}",
            record.id,
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            outcome,
            size,
            record
                .error
                .as_deref()
                .or(record.note.as_deref())
                .unwrap_or("")
        );
    }
}

/// Shows how each server resolves against the global defaults.
pub fn print_check(config: &AppConfig) -> bool {
    let mut ok = true;

    for server in &config.servers {
        match server.resolve_storage(&config.storage) {
            Ok(target) => println!(
                "{} {:<20} bucket {}{}",
                style("✓").green(),
                server.id,
                target.bucket,
                if server
                    .resolve_passphrase(&config.default_archive_password)
                    .is_none()
                {
                    style(" (unencrypted)").yellow().to_string()
                } else {
                    String::new()
                }
            ),
            Err(e) => {
                ok = false;
                println!("{} {:<20} {}", style("✗").red(), server.id, e);
            }
        }
    }
    ok
}
