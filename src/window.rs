use std::sync::Arc;

use chrono::{Duration, Months, NaiveDate};
use tracing::warn;

use crate::cache::{GameWindow, SessionCache, WindowKey, WindowScope};
use crate::descriptor::TimePeriod;
use crate::game::{GameRecord, Side};
use crate::game_index::GameSource;
use crate::league_config::LeagueConfig;

pub struct WindowResolver<'a> {
    source: &'a dyn GameSource,
    config: &'a LeagueConfig,
    cache: &'a SessionCache,
}

impl<'a> WindowResolver<'a> {
    pub fn new(source: &'a dyn GameSource, config: &'a LeagueConfig, cache: &'a SessionCache) -> Self {
        Self {
            source,
            config,
            cache,
        }
    }

    pub fn schedule(&self, team: &str, season: &str) -> GameWindow {
        self.cache
            .schedules
            .get_or_insert_with((team.to_string(), season.to_string()), || {
                match self.source.team_season_games(team, season) {
                    Ok(games) => games.into(),
                    Err(err) => {
                        warn!(team, season, error = %err, "season games lookup failed; treating as empty");
                        Vec::new().into()
                    }
                }
            })
    }

    fn all_seasons(&self, team: &str) -> GameWindow {
        self.cache
            .all_seasons
            .get_or_insert_with(team.to_string(), || match self.source.team_games(team) {
                Ok(games) => games.into(),
                Err(err) => {
                    warn!(team, error = %err, "team games lookup failed; treating as empty");
                    Vec::new().into()
                }
            })
    }

    fn eligible(&self, game: &GameRecord, date: NaiveDate) -> bool {
        game.date < date && !self.config.is_excluded(&game.game_type)
    }

    fn memo(
        &self,
        team: &str,
        season: &str,
        date: NaiveDate,
        scope: WindowScope,
        build: impl FnOnce() -> Vec<Arc<GameRecord>>,
    ) -> GameWindow {
        let key = WindowKey {
            team: team.to_string(),
            season: season.to_string(),
            date,
            scope,
        };
        self.cache
            .windows
            .get_or_insert_with(key, || build().into())
    }

    pub fn games_before(&self, team: &str, season: &str, date: NaiveDate) -> GameWindow {
        self.memo(team, season, date, WindowScope::Season, || {
            self.schedule(team, season)
                .iter()
                .filter(|g| self.eligible(g, date))
                .cloned()
                .collect()
        })
    }

    pub fn games_last_n_days(&self, team: &str, season: &str, date: NaiveDate, n: u32) -> GameWindow {
        self.memo(team, season, date, WindowScope::Days(n), || {
            let start = date - Duration::days(i64::from(n));
            self.games_before(team, season, date)
                .iter()
                .filter(|g| g.date >= start)
                .cloned()
                .collect()
        })
    }

    pub fn games_last_n_months(
        &self,
        team: &str,
        season: &str,
        date: NaiveDate,
        n: u32,
    ) -> GameWindow {
        self.memo(team, season, date, WindowScope::Months(n), || {
            let start = date
                .checked_sub_months(Months::new(n))
                .unwrap_or(NaiveDate::MIN);
            self.games_before(team, season, date)
                .iter()
                .filter(|g| g.date >= start)
                .cloned()
                .collect()
        })
    }

    pub fn games_last_n_games(
        &self,
        team: &str,
        season: &str,
        date: NaiveDate,
        n: u32,
    ) -> GameWindow {
        self.memo(team, season, date, WindowScope::Games(n), || {
            let all = self.games_before(team, season, date);
            let start = all.len().saturating_sub(n as usize);
            all[start..].to_vec()
        })
    }

    /// Meetings between `team_a` and `team_b` before `date`, newest `last` of them.
    /// `home_only` keeps only games where `team_a` hosted; `season_only` stays within
    /// `season` instead of spanning every season on record.
    #[allow(clippy::too_many_arguments)]
    pub fn h2h_games(
        &self,
        team_a: &str,
        team_b: &str,
        season: &str,
        date: NaiveDate,
        last: Option<u32>,
        home_only: bool,
        season_only: bool,
    ) -> GameWindow {
        let scope = WindowScope::H2h {
            opponent: team_b.to_string(),
            last,
            home_only,
            season_only,
        };
        self.memo(team_a, season, date, scope, || {
            let pool = if season_only {
                self.games_before(team_a, season, date)
            } else {
                self.all_seasons(team_a)
            };
            let meetings: Vec<Arc<GameRecord>> = pool
                .iter()
                .filter(|g| self.eligible(g, date))
                .filter(|g| g.opponent(team_a) == Some(team_b))
                .filter(|g| !home_only || g.home_team == team_a)
                .cloned()
                .collect();
            match last {
                Some(n) => {
                    let start = meetings.len().saturating_sub(n as usize);
                    meetings[start..].to_vec()
                }
                None => meetings,
            }
        })
    }

    pub fn window_for(
        &self,
        team: &str,
        opponent: &str,
        season: &str,
        date: NaiveDate,
        period: TimePeriod,
    ) -> GameWindow {
        match period {
            TimePeriod::None | TimePeriod::Season => self.games_before(team, season, date),
            TimePeriod::Days(n) => self.games_last_n_days(team, season, date, n),
            TimePeriod::Months(n) => self.games_last_n_months(team, season, date, n),
            TimePeriod::Games(n) => self.games_last_n_games(team, season, date, n),
            TimePeriod::H2hLast(n) => {
                self.h2h_games(team, opponent, season, date, Some(n), false, false)
            }
            TimePeriod::H2hSeason => self.h2h_games(team, opponent, season, date, None, false, true),
        }
    }

    pub fn current_game(&self, team: &str, season: &str, date: NaiveDate) -> Option<Arc<GameRecord>> {
        self.cache
            .current_games
            .get_or_insert_with((team.to_string(), season.to_string(), date), || {
                match self.source.game_on(season, date, team) {
                    Ok(game) => game,
                    Err(err) => {
                        warn!(team, season, %date, error = %err, "current game lookup failed");
                        None
                    }
                }
            })
    }

    pub fn plays_on(&self, team: &str, season: &str, date: NaiveDate) -> bool {
        self.schedule(team, season).iter().any(|g| {
            g.date == date && !self.config.is_excluded(&g.game_type)
        })
    }
}

pub fn at_location(window: &[Arc<GameRecord>], team: &str, side: Side) -> GameWindow {
    window
        .iter()
        .filter(|g| g.side_of(team) == Some(side))
        .cloned()
        .collect::<Vec<_>>()
        .into()
}
