use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "credit-ledger")]
#[command(about = "Credit hold ledger: reserve, commit, release and sweep credit balances")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize database and configuration
    Init,

    /// Grant credits to an account (creates the account on first grant)
    Grant {
        /// Account identifier
        account: String,

        /// Amount in credits (e.g. 1.5)
        amount: f64,
    },

    /// Show an account's available/reserved/spent balance
    Balance {
        /// Account identifier
        account: String,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Place a hold against an account's available balance
    Hold {
        /// Account identifier
        account: String,

        /// Amount in credits (e.g. 1.5)
        amount: f64,

        /// Time-to-live in minutes (defaults to holds.default_ttl_minutes)
        #[arg(short, long)]
        ttl: Option<u64>,

        /// Opaque caller context, e.g. a job identifier
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Commit a pending hold as a permanent spend
    Commit {
        /// Hold identifier
        hold_id: i64,
    },

    /// Release a pending hold back to the available balance
    Release {
        /// Hold identifier
        hold_id: i64,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Run one expiry sweep on behalf of an external trigger
    Sweep {
        /// Shared secret forwarded by the trigger
        #[arg(long)]
        secret: Option<String>,
    },

    /// Run the self-scheduled periodic sweep service
    Auto {
        /// Sweep interval in seconds (defaults to sweeper.interval_secs)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// List holds
    List {
        /// Filter by account
        #[arg(short, long)]
        account: Option<String>,

        /// Filter by state (pending, committed, released, expired, all)
        #[arg(short, long, default_value = "all")]
        state: String,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,

        /// Limit number of holds shown
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show ledger statistics
    Stats {
        /// Output format: table or json
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}
