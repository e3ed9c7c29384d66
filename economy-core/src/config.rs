//! Configuration for the ledger and its engines

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Level curve
    pub leveling: LevelingConfig,

    /// Earning rules
    pub accrual: AccrualConfig,

    /// Referral rewards
    pub referral: ReferralConfig,

    /// Points-funded donations
    pub spend: SpendConfig,

    /// Staff overrides
    pub admin: AdminConfig,

    /// Announcement channel
    pub announcements: AnnouncementConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/economy"),
            service_name: "economy-core".to_string(),
            rocksdb: RocksDBConfig::default(),
            leveling: LevelingConfig::default(),
            accrual: AccrualConfig::default(),
            referral: ReferralConfig::default(),
            spend: SpendConfig::default(),
            admin: AdminConfig::default(),
            announcements: AnnouncementConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// How long a transaction waits for a row lock before failing (ms)
    pub lock_timeout_ms: i64,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            lock_timeout_ms: 2_000,
            enable_statistics: false,
        }
    }
}

/// Level curve: `thresholds[i]` is the XP needed for level `i + 1`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelingConfig {
    /// Strictly increasing XP thresholds, starting at 0
    pub thresholds: Vec<i64>,

    /// XP per level beyond the last threshold
    pub tail_step: i64,
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            thresholds: vec![0, 100, 250, 500, 1_000, 1_750, 2_750, 4_000, 5_500, 7_500],
            tail_step: 2_500,
        }
    }
}

/// Earning rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccrualConfig {
    /// XP for a check-in with no streak bonus
    pub checkin_base_xp: i64,

    /// Extra XP per bonus step
    pub checkin_bonus_xp: i64,

    /// Points for a check-in with no streak bonus
    pub checkin_base_points: i64,

    /// Extra Points per bonus step
    pub checkin_bonus_points: i64,

    /// Bonus steps cap
    pub checkin_max_bonus: u32,

    /// Points per completed watch block
    pub watch_points_per_block: i64,

    /// Watched minutes per block
    pub watch_block_minutes: i64,

    /// Heartbeats further apart than this start a new session (seconds).
    /// Never shorter than one watch block.
    pub max_heartbeat_gap_secs: i64,

    /// Points per qualifying chat message
    pub chat_points: i64,

    /// XP per qualifying chat message
    pub chat_xp: i64,

    /// Chat message guards older than this may be pruned (hours)
    pub chat_guard_retention_hours: i64,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            checkin_base_xp: 25,
            checkin_bonus_xp: 5,
            checkin_base_points: 10,
            checkin_bonus_points: 2,
            checkin_max_bonus: 10,
            watch_points_per_block: 5,
            watch_block_minutes: 60,
            max_heartbeat_gap_secs: 3900,
            chat_points: 1,
            chat_xp: 0,
            chat_guard_retention_hours: 72,
        }
    }
}

/// Referral rewards
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferralConfig {
    /// Points credited to each side
    pub bonus_points: i64,

    /// Referral token length (alphanumeric characters)
    pub token_length: usize,

    /// Entries returned in `recent_referrals`
    pub recent_limit: usize,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            bonus_points: 20,
            token_length: 10,
            recent_limit: 10,
        }
    }
}

/// Points-funded donations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpendConfig {
    /// Minimum Points per currency unit donated
    pub points_per_currency_unit: i64,

    /// Maximum message length (characters)
    pub max_message_len: usize,
}

impl Default for SpendConfig {
    fn default() -> Self {
        Self {
            points_per_currency_unit: 100,
            max_message_len: 500,
        }
    }
}

/// Staff overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Largest magnitude a single override may carry
    pub max_override_amount: i64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            max_override_amount: 1_000_000,
        }
    }
}

/// Announcement channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnouncementConfig {
    /// Bounded channel capacity; announcements beyond it are dropped and logged
    pub channel_capacity: usize,
}

impl Default for AnnouncementConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("ECONOMY_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(timeout) = std::env::var("ECONOMY_LOCK_TIMEOUT_MS") {
            config.rocksdb.lock_timeout_ms = timeout
                .parse()
                .map_err(|e| crate::Error::Config(format!("ECONOMY_LOCK_TIMEOUT_MS: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engines cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        crate::leveling::LevelTable::from_config(&self.leveling)?;

        if self.accrual.watch_block_minutes <= 0 {
            return Err(crate::Error::Config(
                "accrual.watch_block_minutes must be positive".to_string(),
            ));
        }
        if self.accrual.max_heartbeat_gap_secs < self.accrual.watch_block_minutes * 60 {
            return Err(crate::Error::Config(
                "accrual.max_heartbeat_gap_secs must cover one watch block".to_string(),
            ));
        }
        if self.accrual.chat_guard_retention_hours <= 0 {
            return Err(crate::Error::Config(
                "accrual.chat_guard_retention_hours must be positive".to_string(),
            ));
        }
        if self.referral.bonus_points <= 0 {
            return Err(crate::Error::Config(
                "referral.bonus_points must be positive".to_string(),
            ));
        }
        if self.referral.token_length < 6 {
            return Err(crate::Error::Config(
                "referral.token_length must be at least 6".to_string(),
            ));
        }
        if self.spend.points_per_currency_unit <= 0 {
            return Err(crate::Error::Config(
                "spend.points_per_currency_unit must be positive".to_string(),
            ));
        }
        if self.admin.max_override_amount <= 0 {
            return Err(crate::Error::Config(
                "admin.max_override_amount must be positive".to_string(),
            ));
        }
        if self.announcements.channel_capacity == 0 {
            return Err(crate::Error::Config(
                "announcements.channel_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
