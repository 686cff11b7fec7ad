use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sweeper: SweeperConfig,
    pub holds: HoldConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SweeperConfig {
    /// Seconds between sweep ticks when self-scheduling.
    pub interval_secs: u64,
    /// Pre-shared secret the trigger must present, compared for exact equality.
    pub shared_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HoldConfig {
    /// Default time-to-live for a new hold when the caller gives none.
    pub default_ttl_minutes: u64,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::Environment::with_prefix("CREDIT").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sweeper.shared_secret.is_empty() {
            anyhow::bail!("sweeper.shared_secret must not be empty");
        }
        if self.holds.default_ttl_minutes == 0 {
            anyhow::bail!("holds.default_ttl_minutes must be positive");
        }
        Ok(())
    }
}
