use clap::{Parser, Subcommand};

const HELP_EPILOG: &str = r#"Server options can also be provided via environment variables:
  CONFIG_PATH (default: ./config.yaml)
  DB_PATH     (default: data/ledger.db)
  PORT        (default: 5151 or config.listen_port)
  RUST_LOG    (default: info)

`sweep` runs one auction and one task finalization pass against DB_PATH and
exits; use it from cron when the server's own sweepers are not running.
"#;

#[derive(Debug, Parser)]
#[command(
    name = "groupledger-server",
    version,
    about = "Group ledger server: task claims, auctions and point balances",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Optional subcommand. Without one, runs the server.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Finalize ended auctions and overdue tasks once, then exit
    Sweep,
    /// Print a bearer token for a user, signed with the configured secret
    Token {
        /// User id to put in the token subject
        #[arg(long)]
        user: String,
        /// Token lifetime in days
        #[arg(long, default_value_t = groupledger_server::server::auth::DEFAULT_TOKEN_TTL_DAYS)]
        ttl_days: i64,
    },
}
