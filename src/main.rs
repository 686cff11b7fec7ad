mod cli;
mod config;
mod credit;
mod error;
mod storage;
mod sweeper;
mod utils;

use std::str::FromStr;

use clap::Parser;
use cli::{Cli, Commands};
use colored::*;
use config::Config;
use credit::CreditService;
use error::{LedgerError, Result};
use storage::{Database, HoldState};
use sweeper::{SweepFailure, Sweeper};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("credit_ledger=debug,info")
        .init();

    let cli = Cli::parse();

    let config = match Config::load().and_then(|cfg| {
        cfg.validate()?;
        Ok(cfg)
    }) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Init => initialize(&config),

        Commands::Grant { account, amount } => grant(&config, &account, amount),

        Commands::Balance { account, format } => show_balance(&config, &account, &format),

        Commands::Hold {
            account,
            amount,
            ttl,
            reason,
        } => place_hold(&config, &account, amount, ttl, reason.as_deref()),

        Commands::Commit { hold_id } => commit_hold(&config, hold_id),

        Commands::Release { hold_id, yes } => release_hold(&config, hold_id, yes),

        Commands::Sweep { secret } => sweep_once(&config, secret.as_deref()),

        Commands::Auto { interval } => run_auto_service(&config, interval).await,

        Commands::List {
            account,
            state,
            format,
            limit,
        } => list_holds(&config, account.as_deref(), &state, &format, limit),

        Commands::Stats { format } => show_stats(&config, &format),
    };

    if let Err(e) = result {
        error!("{}", format!("Error: {}", e).red());
        std::process::exit(1);
    }
}

fn open_service(config: &Config) -> Result<CreditService> {
    let db = Database::new(&config.database.path)?;
    Ok(CreditService::new(db))
}

fn initialize(config: &Config) -> Result<()> {
    println!("{}", "Initializing credit hold ledger...".green());
    let _db = Database::new(&config.database.path)?;
    println!("{}", "✓ Database initialized".green());
    println!("{}", "✓ Configuration loaded".green());
    println!("\n{}", "Configuration:".cyan());
    println!("  Database:       {}", config.database.path);
    println!("  Sweep interval: {}s", config.sweeper.interval_secs);
    println!("  Default TTL:    {} minutes", config.holds.default_ttl_minutes);
    Ok(())
}

fn grant(config: &Config, account: &str, amount: f64) -> Result<()> {
    let service = open_service(config)?;
    let units = utils::credits_to_units(amount);
    let balance = service.grant_credits(account, units)?;

    println!("✓ Granted {} to {}", utils::format_credits(units), account);
    println!("Available: {}", utils::format_credits(balance.available));
    Ok(())
}

fn show_balance(config: &Config, account: &str, format: &str) -> Result<()> {
    let service = open_service(config)?;
    let balance = service.balance(account)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&balance)?);
        return Ok(());
    }

    println!("{}", format!("=== Balance: {} ===", account).cyan().bold());
    println!("  Available:  {}", utils::format_credits(balance.available));
    println!("  Reserved:   {}", utils::format_credits(balance.reserved));
    println!("  Spent:      {}", utils::format_credits(balance.spent));
    println!("  Updated:    {}", utils::format_timestamp(&balance.updated_at));
    Ok(())
}

fn place_hold(
    config: &Config,
    account: &str,
    amount: f64,
    ttl: Option<u64>,
    reason: Option<&str>,
) -> Result<()> {
    let service = open_service(config)?;
    let units = utils::credits_to_units(amount);
    let ttl_minutes = ttl.unwrap_or(config.holds.default_ttl_minutes);
    let expires_at = chrono::Utc::now() + chrono::Duration::minutes(ttl_minutes as i64);

    let hold_id = service.place_hold(account, units, expires_at, reason)?;

    println!(
        "✓ Placed hold {} for {} on {}",
        hold_id.to_string().green(),
        utils::format_credits(units),
        account
    );
    println!("Expires: {}", utils::format_timestamp(&expires_at));

    let balance = service.balance(account)?;
    println!("Available: {}", utils::format_credits(balance.available));
    println!("Reserved:  {}", utils::format_credits(balance.reserved));
    Ok(())
}

fn commit_hold(config: &Config, hold_id: i64) -> Result<()> {
    let service = open_service(config)?;
    service.commit_hold(hold_id)?;

    let hold = service.get_hold(hold_id)?;
    println!(
        "✓ Committed hold {} ({} spent by {})",
        hold_id,
        utils::format_credits(hold.amount),
        hold.account_id
    );
    Ok(())
}

fn release_hold(config: &Config, hold_id: i64, yes: bool) -> Result<()> {
    let service = open_service(config)?;

    if !yes {
        let hold = service.get_hold(hold_id)?;
        let prompt = format!(
            "Release hold {} ({} reserved by {})?",
            hold_id,
            utils::format_credits(hold.amount),
            hold.account_id
        );
        if !utils::confirm_action(&prompt) {
            println!("Cancelled");
            return Ok(());
        }
    }

    service.release_hold(hold_id)?;
    println!("✓ Released hold {}", hold_id);
    Ok(())
}

/// One sweep on behalf of an external trigger. The structured payload goes to
/// stdout either way so the invoker always gets a machine-readable answer.
fn sweep_once(config: &Config, secret: Option<&str>) -> Result<()> {
    let service = open_service(config)?;
    let sweeper = Sweeper::new(service, config.sweeper.shared_secret.clone());

    match sweeper.trigger(secret, chrono::Utc::now()) {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            info!("Sweep released {} holds", report.released_count);
            Ok(())
        }
        Err(e) => {
            let failure = SweepFailure::new(e.to_string());
            println!("{}", serde_json::to_string_pretty(&failure)?);
            Err(e)
        }
    }
}

async fn run_auto_service(config: &Config, interval: Option<u64>) -> Result<()> {
    println!("{}", "Starting expiry sweep service...".green());

    let interval_secs = interval.unwrap_or(config.sweeper.interval_secs);
    let service = open_service(config)?;
    let sweeper = Sweeper::new(service, config.sweeper.shared_secret.clone());

    sweeper.run_scheduled(interval_secs).await;
    Ok(())
}

fn list_holds(
    config: &Config,
    account: Option<&str>,
    state: &str,
    format: &str,
    limit: Option<usize>,
) -> Result<()> {
    let service = open_service(config)?;

    let state_filter = match state {
        "all" => None,
        other => Some(HoldState::from_str(other).map_err(LedgerError::InvalidArgument)?),
    };

    let holds = service.list_holds(account, state_filter, limit)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&holds)?);
        return Ok(());
    }

    if holds.is_empty() {
        println!("No holds found");
        return Ok(());
    }

    utils::print_table_border(100);
    utils::print_table_row(
        &["Id", "Account", "Amount", "State", "Expires", "Reason"],
        &[8, 24, 16, 10, 22, 14],
    );
    utils::print_table_border(100);

    for hold in &holds {
        utils::print_table_row(
            &[
                &hold.id.to_string(),
                &hold.account_id,
                &utils::format_credits(hold.amount),
                &hold.state.to_string(),
                &utils::format_timestamp(&hold.expires_at),
                hold.reason.as_deref().unwrap_or("-"),
            ],
            &[8, 24, 16, 10, 22, 14],
        );
    }
    utils::print_table_border(100);
    Ok(())
}

fn show_stats(config: &Config, format: &str) -> Result<()> {
    let service = open_service(config)?;
    let stats = service.stats()?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", "=== Credit Hold Ledger Statistics ===".cyan().bold());
    println!("\nAccounts:");
    println!("  Total:      {}", stats.total_accounts);
    println!("  Available:  {}", utils::format_credits(stats.total_available));
    println!("  Reserved:   {}", utils::format_credits(stats.total_reserved));
    println!("  Spent:      {}", utils::format_credits(stats.total_spent));

    println!("\nHolds:");
    println!("  Pending:    {}", stats.pending_holds.to_string().yellow());
    println!("  Committed:  {}", stats.committed_holds.to_string().green());
    println!("  Released:   {}", stats.released_holds);
    println!("  Expired:    {}", stats.expired_holds.to_string().cyan());
    Ok(())
}
