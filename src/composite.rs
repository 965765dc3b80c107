use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::NaiveDate;

use crate::descriptor::{CalcWeight, FeatureDescriptor, Perspective, TimePeriod};
use crate::game::{GameRecord, Side};
use crate::league_config::LeagueConfig;
use crate::stats::{self, AggregateParams, StatSpec};
use crate::window::{WindowResolver, at_location};

pub const NEUTRAL_WIN_PCT: f64 = 0.5;

/// Harmonic mean of two paces. Falls back to whichever side is nonzero, then to `baseline`.
pub fn harmonic_pace(a: f64, b: f64, baseline: f64) -> f64 {
    match (a > 0.0, b > 0.0) {
        (true, true) => 2.0 * a * b / (a + b),
        (true, false) | (false, true) => a.max(b),
        (false, false) => baseline,
    }
}

pub struct Composer<'a> {
    windows: &'a WindowResolver<'a>,
    config: &'a LeagueConfig,
    home: &'a str,
    away: &'a str,
    season: &'a str,
    date: NaiveDate,
}

impl<'a> Composer<'a> {
    pub fn new(
        windows: &'a WindowResolver<'a>,
        config: &'a LeagueConfig,
        home: &'a str,
        away: &'a str,
        season: &'a str,
        date: NaiveDate,
    ) -> Self {
        Self {
            windows,
            config,
            home,
            away,
            season,
            date,
        }
    }

    fn params(&self) -> AggregateParams {
        AggregateParams {
            as_of: self.date,
            shrink_k: self.config.margin_shrink_k,
        }
    }

    pub fn team(&self, side: Side) -> &'a str {
        match side {
            Side::Home => self.home,
            Side::Away => self.away,
        }
    }

    fn window(&self, side: Side, period: TimePeriod) -> Arc<[Arc<GameRecord>]> {
        self.windows.window_for(
            self.team(side),
            self.team(side.flip()),
            self.season,
            self.date,
            period,
        )
    }

    fn per_side(&self, perspective: Perspective, mut f: impl FnMut(Side) -> Result<f64>) -> Result<f64> {
        let home = if perspective.needs_home() { f(Side::Home)? } else { 0.0 };
        let away = if perspective.needs_away() { f(Side::Away)? } else { 0.0 };
        Ok(perspective.combine(home, away))
    }

    fn side_stat(&self, spec: &StatSpec, d: &FeatureDescriptor, side: Side, period: TimePeriod) -> f64 {
        let team = self.team(side);
        let window = self.window(side, period);
        let games = if d.side_split || spec.location_only {
            at_location(&window, team, side)
        } else {
            window
        };
        stats::aggregate(spec, team, &games, d.calc, &self.params())
    }

    fn side_value(&self, d: &FeatureDescriptor, side: Side, period: TimePeriod) -> Result<f64> {
        let spec = stats::lookup(&d.stat).ok_or_else(|| anyhow!("unknown stat {:?}", d.stat))?;
        let value = self.side_stat(spec, d, side, period);
        if !d.net {
            return Ok(value);
        }
        let counterpart = spec
            .net_counterpart
            .and_then(stats::lookup)
            .ok_or_else(|| anyhow!("{:?} has no net counterpart", d.stat))?;
        Ok(value - self.side_stat(counterpart, d, side, period))
    }

    pub fn stat_feature(&self, d: &FeatureDescriptor) -> Result<f64> {
        match &d.blend {
            None => self.per_side(d.perspective, |side| self.side_value(d, side, d.period)),
            Some(blend) => {
                let mut total = 0.0;
                for component in blend.components() {
                    let period: TimePeriod = component
                        .key
                        .parse()
                        .map_err(|e| anyhow!("blend component {:?}: {e}", component.key))?;
                    let narrowed = d.with_period(period);
                    let value = self.per_side(d.perspective, |side| {
                        self.side_value(&narrowed, side, period)
                    })?;
                    total += component.weight * value;
                }
                Ok(total)
            }
        }
    }

    fn h2h_window(&self, period: TimePeriod, home_only: bool) -> Arc<[Arc<GameRecord>]> {
        let (last, season_only) = match period {
            TimePeriod::H2hLast(n) => (Some(n), false),
            TimePeriod::H2hSeason => (None, true),
            TimePeriod::Games(n) => (Some(n), false),
            TimePeriod::Season => (None, true),
            _ => (None, false),
        };
        self.windows.h2h_games(
            self.home,
            self.away,
            self.season,
            self.date,
            last,
            home_only,
            season_only,
        )
    }

    /// Share of prior meetings won by the current home team. `beta` shrinks toward 0.5 with a
    /// symmetric prior; no meetings gives exactly 0.5.
    pub fn h2h_win_pct(&self, period: TimePeriod, calc: CalcWeight, side_split: bool, perspective: Perspective) -> f64 {
        let games = self.h2h_window(period, side_split);
        let n = games.len() as f64;
        let p = if games.is_empty() {
            NEUTRAL_WIN_PCT
        } else {
            let wins = games
                .iter()
                .filter(|g| g.won_by(self.home) == Some(true))
                .count() as f64;
            match calc {
                CalcWeight::Beta => {
                    let prior = self.config.h2h_beta_prior;
                    (wins + prior) / (n + 2.0 * prior)
                }
                _ => wins / n,
            }
        };
        match perspective {
            Perspective::Away => 1.0 - p,
            _ => p,
        }
    }

    fn margin_calc(calc: CalcWeight) -> CalcWeight {
        match calc {
            CalcWeight::Raw | CalcWeight::Beta => CalcWeight::Avg,
            other => other,
        }
    }

    pub fn margin(&self, d: &FeatureDescriptor) -> Result<f64> {
        let spec = stats::lookup("margin").ok_or_else(|| anyhow!("margin stat missing"))?;
        let calc = Self::margin_calc(d.calc);
        self.per_side(d.perspective, |side| {
            let team = self.team(side);
            let window = self.window(side, d.period);
            let games = if d.side_split {
                at_location(&window, team, side)
            } else {
                window
            };
            Ok(stats::aggregate(spec, team, &games, calc, &self.params()))
        })
    }

    pub fn margin_h2h(&self, d: &FeatureDescriptor) -> Result<f64> {
        let spec = stats::lookup("margin").ok_or_else(|| anyhow!("margin stat missing"))?;
        let games = self.h2h_window(d.period, d.side_split);
        let team = match d.perspective {
            Perspective::Away => self.away,
            _ => self.home,
        };
        Ok(stats::aggregate(
            spec,
            team,
            &games,
            Self::margin_calc(d.calc),
            &self.params(),
        ))
    }

    fn pace_of(&self, side: Side, period: TimePeriod) -> f64 {
        let Some(spec) = stats::lookup("pace") else {
            return 0.0;
        };
        let team = self.team(side);
        stats::aggregate(spec, team, &self.window(side, period), CalcWeight::Raw, &self.params())
    }

    /// Expected matchup pace. Retries over the season window when the requested one is empty
    /// for both teams.
    pub fn pace_interaction(&self, period: TimePeriod) -> f64 {
        let (home, away) = (self.pace_of(Side::Home, period), self.pace_of(Side::Away, period));
        if home > 0.0 || away > 0.0 {
            return harmonic_pace(home, away, self.config.pace_baseline);
        }
        let (home, away) = (
            self.pace_of(Side::Home, TimePeriod::Season),
            self.pace_of(Side::Away, TimePeriod::Season),
        );
        harmonic_pace(home, away, self.config.pace_baseline)
    }

    fn rating(&self, name: &str, side: Side, period: TimePeriod) -> f64 {
        let Some(spec) = stats::lookup(name) else {
            return 0.0;
        };
        let team = self.team(side);
        stats::aggregate(spec, team, &self.window(side, period), CalcWeight::Raw, &self.params())
    }

    pub fn exp_points(&self, period: TimePeriod, perspective: Perspective) -> f64 {
        let pace = self.pace_interaction(period);
        let side = |s: Side| Ok(self.rating("off_rtg", s, period) / 100.0 * pace);
        self.per_side(perspective, side).unwrap_or(0.0)
    }

    pub fn exp_points_matchup(&self, period: TimePeriod, perspective: Perspective) -> f64 {
        let pace = self.pace_interaction(period);
        let side = |s: Side| {
            let off = self.rating("off_rtg", s, period);
            let def = self.rating("def_rtg", s.flip(), period);
            Ok((off + def) / 2.0 / 100.0 * pace)
        };
        self.per_side(perspective, side).unwrap_or(0.0)
    }

    pub fn close_win_pct(&self, period: TimePeriod, side_split: bool, perspective: Perspective) -> f64 {
        let limit = f64::from(self.config.close_game_margin);
        let side = |s: Side| {
            let team = self.team(s);
            let window = self.window(s, period);
            let games = if side_split { at_location(&window, team, s) } else { window };
            let close: Vec<bool> = games
                .iter()
                .filter(|g| g.margin_for(team).is_some_and(|m| m.abs() <= limit))
                .filter_map(|g| g.won_by(team))
                .collect();
            if close.is_empty() {
                return Ok(NEUTRAL_WIN_PCT);
            }
            Ok(close.iter().filter(|w| **w).count() as f64 / close.len() as f64)
        };
        self.per_side(perspective, side).unwrap_or(NEUTRAL_WIN_PCT)
    }

    pub fn games_played(&self, period: TimePeriod, side_split: bool, perspective: Perspective) -> f64 {
        let side = |s: Side| {
            let team = self.team(s);
            let window = self.window(s, period);
            let n = if side_split {
                at_location(&window, team, s).len()
            } else {
                window.len()
            };
            Ok(n as f64)
        };
        self.per_side(perspective, side).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SessionCache;
    use crate::game::test_support::{day, game};
    use crate::game_index::GameIndex;
    use approx::assert_relative_eq;

    fn index() -> GameIndex {
        GameIndex::build(
            vec![
                game("g1", "2024-01-01", "BOS", "NYK", 108, 100),
                game("g2", "2024-01-03", "NYK", "BOS", 100, 112),
                game("g3", "2024-01-05", "BOS", "MIA", 110, 107),
                game("g4", "2024-01-07", "MIA", "NYK", 95, 99),
            ],
            Vec::new(),
        )
    }

    fn parse(raw: &str) -> FeatureDescriptor {
        FeatureDescriptor::parse(raw).unwrap()
    }

    #[test]
    fn harmonic_pace_fallbacks() {
        assert_relative_eq!(harmonic_pace(100.0, 96.0, 99.0), harmonic_pace(96.0, 100.0, 99.0));
        assert_relative_eq!(harmonic_pace(100.0, 100.0, 99.0), 100.0);
        assert_eq!(harmonic_pace(0.0, 97.0, 99.0), 97.0);
        assert_eq!(harmonic_pace(101.0, 0.0, 99.0), 101.0);
        assert_eq!(harmonic_pace(0.0, 0.0, 99.0), 99.0);
    }

    #[test]
    fn points_average_and_blend() {
        let idx = index();
        let cfg = LeagueConfig::nba();
        let cache = SessionCache::new();
        let w = WindowResolver::new(&idx, &cfg, &cache);
        let c = Composer::new(&w, &cfg, "BOS", "NYK", "2023-2024", day("2024-01-10"));

        assert_relative_eq!(c.stat_feature(&parse("points|games_3|avg|home")).unwrap(), 110.0);
        let one = c.stat_feature(&parse("points|games_1|avg|home")).unwrap();
        assert_relative_eq!(one, 110.0);

        let blend = c
            .stat_feature(&parse("points_blend|blend:games_1:1/season:3|avg|home"))
            .unwrap();
        assert_relative_eq!(blend, 0.25 * 110.0 + 0.75 * 110.0);

        let net = c.stat_feature(&parse("points_net|season|avg|home")).unwrap();
        assert_relative_eq!(net, 110.0 - (100.0 + 100.0 + 107.0) / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn side_split_keeps_location() {
        let idx = index();
        let cfg = LeagueConfig::nba();
        let cache = SessionCache::new();
        let w = WindowResolver::new(&idx, &cfg, &cache);
        let c = Composer::new(&w, &cfg, "BOS", "NYK", "2023-2024", day("2024-01-10"));
        let home_only = c.stat_feature(&parse("points_side|season|avg|home")).unwrap();
        assert_relative_eq!(home_only, 109.0);
        let away_only = c.stat_feature(&parse("points_side|season|avg|away")).unwrap();
        assert_relative_eq!(away_only, 99.5);
    }

    #[test]
    fn head_to_head_defaults_and_beta() {
        let idx = index();
        let cfg = LeagueConfig::nba();
        let cache = SessionCache::new();
        let w = WindowResolver::new(&idx, &cfg, &cache);

        let early = Composer::new(&w, &cfg, "BOS", "NYK", "2023-2024", day("2024-01-01"));
        for calc in [CalcWeight::Raw, CalcWeight::Avg, CalcWeight::Beta] {
            assert_eq!(early.h2h_win_pct(TimePeriod::None, calc, false, Perspective::Home), 0.5);
        }

        let c = Composer::new(&w, &cfg, "BOS", "NYK", "2023-2024", day("2024-01-10"));
        assert_eq!(c.h2h_win_pct(TimePeriod::None, CalcWeight::Raw, false, Perspective::Home), 1.0);
        assert_relative_eq!(
            c.h2h_win_pct(TimePeriod::None, CalcWeight::Beta, false, Perspective::Home),
            4.0 / 6.0
        );
        assert_eq!(c.h2h_win_pct(TimePeriod::None, CalcWeight::Raw, false, Perspective::Away), 0.0);
        assert_relative_eq!(
            c.h2h_win_pct(TimePeriod::H2hLast(1), CalcWeight::Raw, true, Perspective::Home),
            1.0
        );
    }

    #[test]
    fn margins_and_close_games() {
        let idx = index();
        let cfg = LeagueConfig::nba();
        let cache = SessionCache::new();
        let w = WindowResolver::new(&idx, &cfg, &cache);
        let c = Composer::new(&w, &cfg, "BOS", "NYK", "2023-2024", day("2024-01-10"));

        let m = c.margin(&parse("margin|season|avg|home")).unwrap();
        assert_relative_eq!(m, (8.0 + 12.0 + 3.0) / 3.0, epsilon = 1e-9);
        let h2h = c.margin_h2h(&parse("margin_h2h|none|avg|home")).unwrap();
        assert_relative_eq!(h2h, 10.0);
        let h2h_away = c.margin_h2h(&parse("margin_h2h|none|avg|away")).unwrap();
        assert_relative_eq!(h2h_away, -10.0);

        assert_eq!(c.close_win_pct(TimePeriod::Season, false, Perspective::Home), 1.0);
        assert_eq!(c.close_win_pct(TimePeriod::Season, false, Perspective::Away), 1.0);
        let early = Composer::new(&w, &cfg, "BOS", "NYK", "2023-2024", day("2024-01-01"));
        assert_eq!(early.close_win_pct(TimePeriod::Season, false, Perspective::Home), 0.5);
        assert_eq!(c.games_played(TimePeriod::Season, false, Perspective::Diff), 0.0);
    }

    #[test]
    fn attempt_rates_only_count_games_at_the_location() {
        let mut g1 = game("g1", "2024-01-01", "BOS", "NYK", 108, 100);
        g1.home.three_att = 40;
        let mut g2 = game("g2", "2024-01-03", "NYK", "BOS", 100, 112);
        g2.away.three_att = 20;
        g2.home.ft_att = 30;
        let idx = GameIndex::build(vec![g1, g2], Vec::new());
        let cfg = LeagueConfig::nba();
        let cache = SessionCache::new();
        let w = WindowResolver::new(&idx, &cfg, &cache);
        let c = Composer::new(&w, &cfg, "BOS", "NYK", "2023-2024", day("2024-01-10"));

        let home = c.stat_feature(&parse("three_rate|season|raw|home")).unwrap();
        assert_relative_eq!(home, 40.0 / 85.0, epsilon = 1e-12);
        assert!((home - 60.0 / 170.0).abs() > 1e-3);
        let away = c.stat_feature(&parse("three_rate|season|raw|away")).unwrap();
        assert_relative_eq!(away, 33.0 / 85.0, epsilon = 1e-12);

        // NYK's 30 free-throw attempts came at home, so they never reach its away rate.
        let ft_away = c.stat_feature(&parse("ft_rate|season|raw|away")).unwrap();
        assert_relative_eq!(ft_away, 22.0 / 85.0, epsilon = 1e-12);
    }

    #[test]
    fn matchup_points_blend_offense_with_opposing_defense() {
        let idx = index();
        let cfg = LeagueConfig::nba();
        let cache = SessionCache::new();
        let w = WindowResolver::new(&idx, &cfg, &cache);
        let c = Composer::new(&w, &cfg, "BOS", "NYK", "2023-2024", day("2024-01-10"));
        let pace = c.pace_interaction(TimePeriod::Season);

        let home_off = c.rating("off_rtg", Side::Home, TimePeriod::Season);
        let away_def = c.rating("def_rtg", Side::Away, TimePeriod::Season);
        let away_off = c.rating("off_rtg", Side::Away, TimePeriod::Season);
        let home_def = c.rating("def_rtg", Side::Home, TimePeriod::Season);
        let home = (home_off + away_def) / 2.0 / 100.0 * pace;
        let away = (away_off + home_def) / 2.0 / 100.0 * pace;

        assert_relative_eq!(
            c.exp_points_matchup(TimePeriod::Season, Perspective::Home),
            home,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            c.exp_points_matchup(TimePeriod::Season, Perspective::Diff),
            home - away,
            epsilon = 1e-9
        );
        assert!(home_off > 0.0 && away_def > 0.0);
    }

    #[test]
    fn pace_interaction_uses_baseline_without_history() {
        let idx = index();
        let cfg = LeagueConfig::nba();
        let cache = SessionCache::new();
        let w = WindowResolver::new(&idx, &cfg, &cache);
        let early = Composer::new(&w, &cfg, "BOS", "NYK", "2023-2024", day("2023-12-01"));
        assert_eq!(early.pace_interaction(TimePeriod::Games(5)), cfg.pace_baseline);

        let c = Composer::new(&w, &cfg, "BOS", "NYK", "2023-2024", day("2024-01-10"));
        let pace = c.pace_interaction(TimePeriod::Season);
        assert!(pace > 0.0);
        let pts = c.exp_points(TimePeriod::Season, Perspective::Home);
        let off = c.rating("off_rtg", Side::Home, TimePeriod::Season);
        assert_relative_eq!(pts, off / 100.0 * pace, epsilon = 1e-9);
    }
}
