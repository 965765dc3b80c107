use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeagueConfig {
    pub league: String,
    pub excluded_game_types: Vec<String>,
    pub games_collection: String,
    pub player_collection: String,
    pub venue_collection: String,
    // League-wide possessions per 48 minutes used when no pace can be observed.
    pub pace_baseline: f64,
    pub rotation_mpg_threshold: f64,
    // `k` in exp(-days_since_last_played / k).
    pub injury_recency_days: f64,
    pub close_game_margin: u32,
    pub rest_cap_days: i64,
    pub margin_shrink_k: f64,
    pub h2h_beta_prior: f64,
    pub elo_k: f64,
    pub elo_home_adv: f64,
    pub elo_initial: f64,
}

impl Default for LeagueConfig {
    fn default() -> Self {
        Self::nba()
    }
}

impl LeagueConfig {
    pub fn nba() -> Self {
        Self {
            league: "nba".to_string(),
            excluded_game_types: vec![
                "preseason".to_string(),
                "allstar".to_string(),
                "all_star".to_string(),
            ],
            games_collection: "stats_nba".to_string(),
            player_collection: "stats_nba_players".to_string(),
            venue_collection: "venues_nba".to_string(),
            pace_baseline: 99.0,
            rotation_mpg_threshold: 10.0,
            injury_recency_days: 30.0,
            close_game_margin: 5,
            rest_cap_days: 7,
            margin_shrink_k: 5.0,
            h2h_beta_prior: 2.0,
            elo_k: 20.0,
            elo_home_adv: 100.0,
            elo_initial: 1500.0,
        }
    }

    pub fn is_excluded(&self, game_type: &str) -> bool {
        let key = normalize_game_type(game_type);
        self.excluded_game_types
            .iter()
            .any(|t| normalize_game_type(t) == key)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read league config {}", path.display()))?;
        let cfg = serde_json::from_str::<LeagueConfig>(&raw)
            .with_context(|| format!("parse league config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads `.env.local` / `.env`, then `LEAGUE_CONFIG_PATH` if set, then applies single-value
    /// env overrides on top.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");

        let mut cfg = match env::var("LEAGUE_CONFIG_PATH") {
            Ok(path) if !path.trim().is_empty() => Self::load(Path::new(path.trim()))?,
            _ => Self::default(),
        };

        if let Ok(raw) = env::var("EXCLUDED_GAME_TYPES") {
            cfg.excluded_game_types = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = env_f64("PACE_BASELINE") {
            cfg.pace_baseline = v;
        }
        if let Some(v) = env_f64("ROTATION_MPG_THRESHOLD") {
            cfg.rotation_mpg_threshold = v;
        }
        if let Some(v) = env_f64("INJURY_RECENCY_DAYS") {
            cfg.injury_recency_days = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        for name in [
            &self.games_collection,
            &self.player_collection,
            &self.venue_collection,
        ] {
            if !is_valid_collection_name(name) {
                return Err(anyhow!("invalid collection name {name:?}"));
            }
        }
        if self.pace_baseline <= 0.0 {
            return Err(anyhow!("pace_baseline must be positive"));
        }
        if self.injury_recency_days <= 0.0 {
            return Err(anyhow!("injury_recency_days must be positive"));
        }
        if self.rest_cap_days < 1 {
            return Err(anyhow!("rest_cap_days must be at least 1"));
        }
        Ok(())
    }
}

fn normalize_game_type(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn env_f64(key: &str) -> Option<f64> {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

// Collection names end up in SQL identifiers.
pub(crate) fn is_valid_collection_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}
