//! XP → level
//!
//! Levels come from a configured threshold table. Level 1 starts at 0 XP;
//! past the last threshold one more level is gained every `tail_step` XP, so
//! the curve is defined for every XP value.

use crate::config::LevelingConfig;
use crate::{Error, Result};
use serde::Serialize;

/// Validated level curve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTable {
    thresholds: Vec<i64>,
    tail_step: i64,
}

/// Where an XP total sits on the curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelProgress {
    /// Current level
    pub level: u32,
    /// XP earned since reaching `level`
    pub xp_into_level: i64,
    /// XP still needed for `level + 1`
    pub xp_to_next_level: i64,
}

impl LevelTable {
    /// Build from config, rejecting curves that are not strictly increasing
    pub fn from_config(config: &LevelingConfig) -> Result<Self> {
        Self::new(config.thresholds.clone(), config.tail_step)
    }

    /// Build from raw thresholds
    pub fn new(thresholds: Vec<i64>, tail_step: i64) -> Result<Self> {
        if thresholds.first() != Some(&0) {
            return Err(Error::Config(
                "level thresholds must start at 0".to_string(),
            ));
        }
        if thresholds.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(Error::Config(
                "level thresholds must be strictly increasing".to_string(),
            ));
        }
        if tail_step <= 0 {
            return Err(Error::Config("level tail_step must be positive".to_string()));
        }
        Ok(Self {
            thresholds,
            tail_step,
        })
    }

    /// Level for an XP total. Negative totals count as 0.
    pub fn level_for(&self, xp_total: i64) -> u32 {
        let xp = xp_total.max(0);
        let last = *self.thresholds.last().unwrap_or(&0);

        if xp >= last {
            let extra = (xp - last) / self.tail_step;
            let table_levels = self.thresholds.len() as u64;
            return u32::try_from(table_levels + extra as u64).unwrap_or(u32::MAX);
        }

        // Number of thresholds <= xp
        self.thresholds.partition_point(|&threshold| threshold <= xp) as u32
    }

    /// XP needed to reach `level` (saturating for levels far past the table)
    pub fn threshold_for(&self, level: u32) -> i64 {
        let level = level.max(1) as usize;
        if level <= self.thresholds.len() {
            return self.thresholds[level - 1];
        }
        let last = *self.thresholds.last().unwrap_or(&0);
        let beyond = (level - self.thresholds.len()) as i64;
        last.saturating_add(beyond.saturating_mul(self.tail_step))
    }

    /// Level plus distance to the next one
    pub fn progress(&self, xp_total: i64) -> LevelProgress {
        let xp = xp_total.max(0);
        let level = self.level_for(xp);
        let current = self.threshold_for(level);
        let next = self.threshold_for(level.saturating_add(1));

        LevelProgress {
            level,
            xp_into_level: xp - current,
            xp_to_next_level: (next - xp).max(0),
        }
    }
}

impl Default for LevelTable {
    fn default() -> Self {
        let config = LevelingConfig::default();
        Self {
            thresholds: config.thresholds,
            tail_step: config.tail_step,
        }
    }
}
