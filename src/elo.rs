use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::warn;

use crate::cache::SessionCache;
use crate::game::GameRecord;
use crate::game_index::GameSource;
use crate::league_config::LeagueConfig;

#[derive(Debug, Clone, Copy)]
pub struct EloConfig {
    pub k: f64,
    pub home_adv_pts: f64,
    pub initial: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            k: 20.0,
            home_adv_pts: 100.0,
            initial: 1500.0,
        }
    }
}

impl EloConfig {
    pub fn from_league(cfg: &LeagueConfig) -> Self {
        Self {
            k: cfg.elo_k,
            home_adv_pts: cfg.elo_home_adv,
            initial: cfg.elo_initial,
        }
    }
}

/// Ratings after replaying `games` in date order. Callers pass only eligible games.
pub fn compute_elo(games: &[Arc<GameRecord>], cfg: EloConfig) -> HashMap<String, f64> {
    let mut ordered: Vec<&GameRecord> = games.iter().map(|g| g.as_ref()).collect();
    ordered.sort_by(|a, b| a.date.cmp(&b.date).then(a.game_id.cmp(&b.game_id)));

    let mut elo: HashMap<String, f64> = HashMap::new();
    for g in ordered {
        let eh = *elo.entry(g.home_team.clone()).or_insert(cfg.initial);
        let ea = *elo.entry(g.away_team.clone()).or_insert(cfg.initial);

        let expected_home = expected_score(eh + cfg.home_adv_pts, ea);
        let s_home = if g.home_won { 1.0 } else { 0.0 };

        let delta = cfg.k * (s_home - expected_home);
        elo.insert(g.home_team.clone(), eh + delta);
        elo.insert(g.away_team.clone(), ea - delta);
    }

    elo
}

pub fn expected_score(r_a: f64, r_b: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf(-(r_a - r_b) / 400.0))
}

pub fn season_ratings(
    source: &dyn GameSource,
    config: &LeagueConfig,
    cache: &SessionCache,
    season: &str,
    date: NaiveDate,
) -> Arc<HashMap<String, f64>> {
    cache
        .elo
        .get_or_insert_with((season.to_string(), date), || {
            let games = match source.season_games(season) {
                Ok(games) => games,
                Err(err) => {
                    warn!(season, error = %err, "season games lookup failed; ratings start flat");
                    Vec::new()
                }
            };
            let eligible: Vec<Arc<GameRecord>> = games
                .into_iter()
                .filter(|g| g.date < date && !config.is_excluded(&g.game_type))
                .collect();
            Arc::new(compute_elo(&eligible, EloConfig::from_league(config)))
        })
}

pub fn rating(ratings: &HashMap<String, f64>, team: &str, cfg: EloConfig) -> f64 {
    ratings.get(team).copied().unwrap_or(cfg.initial)
}

/// Home side's win probability with home advantage applied.
pub fn home_win_prob(ratings: &HashMap<String, f64>, home: &str, away: &str, cfg: EloConfig) -> f64 {
    expected_score(
        rating(ratings, home, cfg) + cfg.home_adv_pts,
        rating(ratings, away, cfg),
    )
}
