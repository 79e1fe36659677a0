mod commands;
mod logging;

use clap::{Args, Parser, Subcommand};
use console::style;
use landfill::MigrationConfig;
use std::path::PathBuf;

use commands::migrate;
use logging::{LogFormat, LoggingConfig};

#[derive(Parser, Debug)]
#[command(name = "landfill", version)]
#[command(about = "Apply, revert and preview database schema migrations")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Database connection URL (postgres://, mysql:// or sqlite://)
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Directory holding the *.sql migration files
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    /// Name of the table recording applied migrations
    #[arg(long, global = true)]
    table: Option<String>,

    /// Configuration file (defaults to ./landfill.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter, ignored when RUST_LOG is set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    log_format: LogFormat,
}

impl GlobalArgs {
    /// Defaults, config file and environment, then the flags given here
    fn resolve_config(&self) -> anyhow::Result<MigrationConfig> {
        let mut config = MigrationConfig::load(self.config.as_deref())?;
        if let Some(url) = &self.database_url {
            config.database_url = Some(url.clone());
        }
        if let Some(dir) = &self.migrations_dir {
            config.migrations_dir = dir.clone();
        }
        if let Some(table) = &self.table {
            config.migrations_table = table.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug, Clone, Copy)]
struct ModeArgs {
    /// Print the statements that would run without executing or recording them
    #[arg(long, visible_alias = "fake")]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    Up {
        /// Apply pending migrations up to and including this one
        #[arg(long)]
        migration: Option<String>,

        #[command(flatten)]
        mode: ModeArgs,
    },

    /// Revert applied migrations (the most recent one by default)
    Down {
        /// Revert applied migrations back to and including this one
        #[arg(long, conflicts_with = "all")]
        migration: Option<String>,

        /// Revert every applied migration
        #[arg(long)]
        all: bool,

        #[command(flatten)]
        mode: ModeArgs,
    },

    /// Show applied, pending and orphaned migrations
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a new migration file
    Create {
        /// Short description used in the file name (e.g. add_users)
        label: String,
    },

    /// Clear a migration lock left behind by a crashed run
    Unlock,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: cli.global.log_level.clone(),
        format: cli.global.log_format,
    };
    if let Err(err) = logging::init_logging(&logging) {
        eprintln!("{} failed to initialize logging: {:#}", style("warning:").yellow(), err);
    }

    if let Err(err) = run(cli).await {
        eprintln!("{} {:#}", style("Error:").red().bold(), err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.global.resolve_config()?;

    match cli.command {
        Commands::Up { migration, mode } => migrate::up(&config, migration, mode.dry_run).await,
        Commands::Down {
            migration,
            all,
            mode,
        } => migrate::down(&config, migration, all, mode.dry_run).await,
        Commands::Status { json } => migrate::status(&config, json).await,
        Commands::Create { label } => migrate::create(&config, &label).await,
        Commands::Unlock => migrate::unlock(&config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_up_defaults() {
        match parse(&["landfill", "up"]).command {
            Commands::Up { migration, mode } => {
                assert!(migration.is_none());
                assert!(!mode.dry_run);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_fake_is_dry_run() {
        match parse(&["landfill", "up", "--fake", "--migration", "0002_add_users"]).command {
            Commands::Up { migration, mode } => {
                assert_eq!(migration.as_deref(), Some("0002_add_users"));
                assert!(mode.dry_run);
            }
            other => panic!("unexpected command {:?}", other),
        }
        match parse(&["landfill", "down", "--dry-run"]).command {
            Commands::Down { mode, all, .. } => {
                assert!(mode.dry_run);
                assert!(!all);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_down_all_conflicts_with_migration() {
        assert!(Cli::try_parse_from(["landfill", "down", "--all", "--migration", "0001_init"]).is_err());
        assert!(matches!(
            parse(&["landfill", "down", "--all"]).command,
            Commands::Down { all: true, .. }
        ));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&[
            "landfill",
            "status",
            "--json",
            "--table",
            "schema_history",
            "--migrations-dir",
            "db/migrations",
            "--log-format",
            "json",
        ]);
        assert!(matches!(cli.command, Commands::Status { json: true }));
        assert_eq!(cli.global.table.as_deref(), Some("schema_history"));
        assert_eq!(cli.global.log_format, LogFormat::Json);
        assert_eq!(cli.global.log_level, "warn");

        let config = cli.global.resolve_config().unwrap();
        assert_eq!(config.migrations_table, "schema_history");
        assert_eq!(config.migrations_dir, PathBuf::from("db/migrations"));
    }

    #[test]
    fn test_invalid_table_flag_is_rejected() {
        let cli = parse(&["landfill", "status", "--table", "bad-name"]);
        assert!(cli.global.resolve_config().is_err());
    }

    #[test]
    fn test_create_requires_label() {
        assert!(Cli::try_parse_from(["landfill", "create"]).is_err());
        assert!(matches!(
            parse(&["landfill", "create", "add_users"]).command,
            Commands::Create { ref label } if label == "add_users"
        ));
    }
}
