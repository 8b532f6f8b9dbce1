use time::format_description::parse;
use tracing_subscriber::{filter::Directive, fmt::time::OffsetTime, EnvFilter};

use crate::cli::Commands;

const NOISY_TARGETS: [&str; 2] = [
    "sqlx::query=warn",
    "sea_orm_migration::migrator=warn",
];

pub fn setup_tracing_for_command(command: Option<&Commands>, server_log_level: &str) {
    // Migrations only print their own progress; serving needs operational visibility.
    // RUST_LOG always wins.
    let default_level = match command {
        Some(Commands::Migrate { .. }) => "warn",
        Some(Commands::Version) => "error",
        Some(Commands::Serve) | None => server_log_level,
    };

    let env_filter = NOISY_TARGETS
        .iter()
        .filter_map(|directive| directive.parse::<Directive>().ok())
        .fold(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
            EnvFilter::add_directive,
        );

    let fmt = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .with_ansi(true)
        .compact();

    match parse("[hour]:[minute]:[second].[subsecond digits:2]") {
        Ok(format) => {
            let offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
            fmt.with_timer(OffsetTime::new(offset, format)).init();
        }
        Err(_) => fmt.init(),
    }
}
