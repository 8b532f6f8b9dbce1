use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the job workers until interrupted (default)
    Serve,
    /// Database migration commands
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum MigrateAction {
    /// Run migrations up
    Up {
        /// Number of migrations to run (default: all)
        #[arg(short, long)]
        steps: Option<u32>,
    },
    /// Run migrations down
    Down {
        /// Number of migrations to rollback (default: 1)
        #[arg(short, long, default_value = "1")]
        steps: u32,
    },
    /// Show migration status
    Status,
    /// Reset database (down all, then up all)
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["jobcore"]).unwrap();
        assert_eq!(cli.command, None);
    }

    #[test]
    fn test_migrate_down_defaults_to_one_step() {
        let cli = Cli::try_parse_from(["jobcore", "migrate", "down"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Migrate {
                action: MigrateAction::Down { steps: 1 }
            })
        );
    }

    #[test]
    fn test_migrate_up_with_steps() {
        let cli = Cli::try_parse_from(["jobcore", "migrate", "up", "--steps", "2"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Migrate {
                action: MigrateAction::Up { steps: Some(2) }
            })
        );
    }

    #[test]
    fn test_unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["jobcore", "console"]).is_err());
    }
}
