use anyhow::Result;
use console::style;
use landfill::{
    connect, DatabaseBackend, Direction, ExecutionMode, ExecutionReport, MigrationConfig,
    MigrationManager, MigrationRequest, MigrationStatus, MigrationStatusEntry, Migrator, Target,
};

/// An open connection plus the migrator reading the configured directory
struct Session {
    migrator: Migrator,
    backend: Box<dyn DatabaseBackend>,
}

impl Session {
    async fn open(config: &MigrationConfig) -> Result<Self> {
        let url = config.require_database_url()?;
        let backend = connect(url, config.lock_timeout()).await?;
        let migrator = Migrator::new(MigrationManager::from_config(config), config.clone());
        Ok(Self { migrator, backend })
    }

    async fn status(&mut self) -> Result<Vec<MigrationStatusEntry>> {
        Ok(self.migrator.status(&mut *self.backend).await?)
    }

    async fn run(&mut self, target: Target, dry_run: bool) -> Result<()> {
        let mut request = MigrationRequest::new(target);
        if dry_run {
            request = request.dry_run();
        }

        let report = self.migrator.run(&mut *self.backend, request).await?;
        print_report(&report);
        report.into_result()?;
        Ok(())
    }

    async fn close(self) {
        if let Err(err) = self.backend.close().await {
            tracing::warn!(error = %err, "Failed to close database connection");
        }
    }
}

pub async fn up(config: &MigrationConfig, migration: Option<String>, dry_run: bool) -> Result<()> {
    let target = match migration {
        Some(name) => Target::ApplyTo(name),
        None => Target::Latest,
    };

    let mut session = Session::open(config).await?;
    let result = session.run(target, dry_run).await;
    session.close().await;
    result
}

pub async fn down(
    config: &MigrationConfig,
    migration: Option<String>,
    all: bool,
    dry_run: bool,
) -> Result<()> {
    let target = match migration {
        Some(name) => Target::RevertTo(name),
        None if all => Target::RevertAll,
        None => Target::RevertLast,
    };

    let mut session = Session::open(config).await?;
    let result = session.run(target, dry_run).await;
    session.close().await;
    result
}

pub async fn status(config: &MigrationConfig, json: bool) -> Result<()> {
    let mut session = Session::open(config).await?;
    let result = session.status().await;
    session.close().await;
    let entries = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No migrations found in {}", config.migrations_dir.display());
        return Ok(());
    }

    println!("Migration Status:");
    println!("================");

    let mut applied = 0;
    let mut pending = 0;
    for entry in &entries {
        match &entry.status {
            MigrationStatus::Applied { applied_at } => {
                applied += 1;
                println!(
                    "  {} {}  {}",
                    style("applied ").green(),
                    entry.name,
                    style(applied_at.format("%Y-%m-%d %H:%M:%S UTC")).dim()
                );
            }
            MigrationStatus::Pending => {
                pending += 1;
                println!("  {} {}", style("pending ").yellow(), entry.name);
            }
            MigrationStatus::Orphaned { applied_at } => {
                println!(
                    "  {} {}  {} (no migration file)",
                    style("orphaned").red(),
                    entry.name,
                    style(applied_at.format("%Y-%m-%d %H:%M:%S UTC")).dim()
                );
            }
        }
    }

    println!();
    println!(
        "{}",
        style(format!("{} applied, {} pending", applied, pending)).magenta()
    );
    Ok(())
}

pub async fn create(config: &MigrationConfig, label: &str) -> Result<()> {
    let path = MigrationManager::from_config(config)
        .create_migration(label)
        .await?;
    println!("{} {}", style("Created migration:").green(), path.display());
    Ok(())
}

pub async fn unlock(config: &MigrationConfig) -> Result<()> {
    let mut session = Session::open(config).await?;
    let result = session.migrator.force_unlock(&mut *session.backend).await;
    session.close().await;

    if result? {
        println!("{}", style("Cleared the migration lock").magenta());
    } else {
        println!("No migration lock was held");
    }
    Ok(())
}

fn print_report(report: &ExecutionReport) {
    for line in report_lines(report) {
        println!("{}", line);
    }
}

/// Progress lines for a finished run: each step with its statements, then a summary
fn report_lines(report: &ExecutionReport) -> Vec<String> {
    let mut lines = Vec::new();

    if report.completed.is_empty() && report.failure.is_none() {
        lines.push(style("Database is already up to date").magenta().to_string());
        return lines;
    }

    for step in &report.completed {
        let verb = match step.direction {
            Direction::Forward => "apply",
            Direction::Backward => "revert",
        };
        lines.push(format!(
            "{} {}",
            style(format!("Attempting to {}", verb)).cyan(),
            style(&step.name).bold()
        ));

        for statement in report
            .statements
            .iter()
            .filter(|s| s.migration == step.name && s.direction == step.direction)
        {
            lines.push(format!("    {}", style(format!("{};", statement.sql)).green()));
        }
    }

    let Some(last) = report.completed.last() else {
        return lines;
    };

    if report.mode == ExecutionMode::DryRun {
        lines.push(
            style(format!(
                "Dry run: {} migration(s) previewed, nothing was executed",
                report.completed.len()
            ))
            .magenta()
            .to_string(),
        );
    } else {
        let verb = match last.direction {
            Direction::Forward => "Applied",
            Direction::Backward => "Reverted",
        };
        lines.push(
            style(format!(
                "{} {} migration(s) in {}ms",
                verb,
                report.completed.len(),
                report.execution_time_ms
            ))
            .magenta()
            .to_string(),
        );
        lines.push(format!("{} {}", style("Last run migration:").magenta(), last.name));
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use landfill::{CompletedStep, RenderedStatement};

    fn report(mode: ExecutionMode) -> ExecutionReport {
        ExecutionReport {
            mode,
            completed: vec![CompletedStep {
                name: "0001_create_users".to_string(),
                direction: Direction::Forward,
            }],
            statements: vec![RenderedStatement {
                migration: "0001_create_users".to_string(),
                direction: Direction::Forward,
                sql: "CREATE TABLE users (id INTEGER)".to_string(),
            }],
            failure: None,
            execution_time_ms: 3,
        }
    }

    #[test]
    fn test_applied_statements_are_listed() {
        console::set_colors_enabled(false);
        let lines = report_lines(&report(ExecutionMode::Apply));
        assert_eq!(
            lines,
            vec![
                "Attempting to apply 0001_create_users",
                "    CREATE TABLE users (id INTEGER);",
                "Applied 1 migration(s) in 3ms",
                "Last run migration: 0001_create_users",
            ]
        );
    }

    #[test]
    fn test_dry_run_lists_statements_and_says_nothing_ran() {
        console::set_colors_enabled(false);
        let lines = report_lines(&report(ExecutionMode::DryRun));
        assert_eq!(lines[1], "    CREATE TABLE users (id INTEGER);");
        assert_eq!(lines[2], "Dry run: 1 migration(s) previewed, nothing was executed");
    }

    #[test]
    fn test_empty_run_is_up_to_date() {
        console::set_colors_enabled(false);
        let mut empty = report(ExecutionMode::Apply);
        empty.completed.clear();
        empty.statements.clear();
        assert_eq!(report_lines(&empty), vec!["Database is already up to date"]);
    }
}
