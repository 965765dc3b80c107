use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::warn;

use crate::cache::{PlayerRows, SessionCache};
use crate::descriptor::BlendSpec;
use crate::game::PlayerGameStat;
use crate::game_index::GameSource;
use crate::league_config::LeagueConfig;
use crate::per::{LeagueTimeline, StatLine};
use crate::window::WindowResolver;

const EPS: f64 = 1e-6;
const SHARE_CAP: f64 = 1.5;

pub const INJURY_FEATURE_NAMES: [&str; 12] = [
    "inj_per_value",
    "inj_top1_per",
    "inj_top3_per_sum",
    "inj_min_lost",
    "inj_severity",
    "inj_rotation",
    "inj_per_share",
    "inj_weighted_per_share",
    "inj_star_out",
    "inj_star_share",
    "inj_impact",
    "inj_severity_season",
];

#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub player_id: String,
    pub games: f64,
    pub mpg: f64,
    pub per: f64,
    pub last_played: Option<NaiveDate>,
}

impl RosterEntry {
    pub fn star_score(&self) -> f64 {
        self.per * self.mpg
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeamAggregate {
    pub games_played: usize,
    pub rotation_mpg: f64,
    pub max_mpg: f64,
    pub rotation_threshold: f64,
    pub roster: Vec<RosterEntry>,
}

impl TeamAggregate {
    pub fn entry(&self, player_id: &str) -> Option<&RosterEntry> {
        self.roster.iter().find(|e| e.player_id == player_id)
    }

    pub fn rotation(&self) -> impl Iterator<Item = &RosterEntry> {
        self.roster
            .iter()
            .filter(|e| e.mpg >= self.rotation_threshold)
    }

    /// Rotation players, or the whole roster when nobody clears the threshold yet.
    fn core(&self) -> Vec<&RosterEntry> {
        let rotation: Vec<&RosterEntry> = self.rotation().collect();
        if rotation.is_empty() {
            self.roster.iter().collect()
        } else {
            rotation
        }
    }

    pub fn top_per(&self) -> f64 {
        top_sum(self.core().iter().map(|e| e.per), 1)
    }

    pub fn top3_per_sum(&self) -> f64 {
        top_sum(self.core().iter().map(|e| e.per), 3)
    }

    pub fn weighted_per(&self) -> f64 {
        let core = self.core();
        let minutes: f64 = core.iter().map(|e| e.mpg).sum();
        if minutes <= 0.0 {
            return 0.0;
        }
        core.iter().map(|e| e.per * e.mpg).sum::<f64>() / minutes
    }
}

fn top_sum(values: impl Iterator<Item = f64>, n: usize) -> f64 {
    let mut v: Vec<f64> = values.filter(|x| x.is_finite()).collect();
    v.sort_by(|a, b| b.total_cmp(a));
    v.into_iter().take(n).sum()
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InjuryImpact {
    pub per_value: f64,
    pub top1_per: f64,
    pub top3_per_sum: f64,
    pub min_lost: f64,
    pub severity: f64,
    pub rotation_count: f64,
    pub per_share: f64,
    pub weighted_per_share: f64,
    pub star_out: f64,
    pub star_share: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpactWeights {
    pub severity: f64,
    pub top1_per: f64,
    pub rotation: f64,
}

impl Default for ImpactWeights {
    fn default() -> Self {
        Self {
            severity: 0.45,
            top1_per: 0.35,
            rotation: 0.20,
        }
    }
}

impl ImpactWeights {
    /// Reads `severity`, `top1_per` and `rotation` weights from a blend spec; anything
    /// missing keeps its default share before renormalizing.
    pub fn from_blend(spec: Option<&BlendSpec>) -> Self {
        let Some(spec) = spec else {
            return Self::default();
        };
        let d = Self::default();
        let severity = spec.weight_of("severity");
        let top1 = spec.weight_of("top1_per");
        let rotation = spec.weight_of("rotation");
        if severity.is_none() && top1.is_none() && rotation.is_none() {
            return d;
        }
        let (s, t, r) = (
            severity.unwrap_or(0.0),
            top1.unwrap_or(0.0),
            rotation.unwrap_or(0.0),
        );
        let total = s + t + r;
        if total <= 0.0 {
            return d;
        }
        Self {
            severity: s / total,
            top1_per: t / total,
            rotation: r / total,
        }
    }
}

impl InjuryImpact {
    pub fn blended(&self, w: &ImpactWeights) -> f64 {
        w.severity * self.severity + w.top1_per * self.top1_per + w.rotation * self.rotation_count
    }

    pub fn metric(&self, name: &str, weights: &ImpactWeights) -> Option<f64> {
        let v = match name {
            "inj_per_value" => self.per_value,
            "inj_top1_per" => self.top1_per,
            "inj_top3_per_sum" => self.top3_per_sum,
            "inj_min_lost" => self.min_lost,
            "inj_severity" => self.severity,
            "inj_rotation" => self.rotation_count,
            "inj_per_share" => self.per_share,
            "inj_weighted_per_share" => self.weighted_per_share,
            "inj_star_out" => self.star_out,
            "inj_star_share" => self.star_share,
            "inj_impact" => self.blended(weights),
            _ => return None,
        };
        Some(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverityPoint {
    pub date: NaiveDate,
    pub cum_lost: f64,
    pub cum_rotation: f64,
}

/// Running sums behind the season-to-date severity ratio; entry `i` covers the team's first
/// `i + 1` eligible games of the season.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeverityTimeline {
    points: Vec<SeverityPoint>,
}

impl SeverityTimeline {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn push(&mut self, date: NaiveDate, lost: f64, rotation: f64) {
        let (cum_lost, cum_rotation) = self
            .points
            .last()
            .map(|p| (p.cum_lost, p.cum_rotation))
            .unwrap_or((0.0, 0.0));
        self.points.push(SeverityPoint {
            date,
            cum_lost: cum_lost + lost,
            cum_rotation: cum_rotation + rotation + EPS,
        });
    }

    pub fn ratio_through(&self, games: usize) -> f64 {
        if games == 0 {
            return 0.0;
        }
        self.points
            .get(games - 1)
            .map(|p| p.cum_lost / p.cum_rotation)
            .unwrap_or(0.0)
    }
}

pub struct InjuryCalculator<'a> {
    source: &'a dyn GameSource,
    config: &'a LeagueConfig,
    cache: &'a SessionCache,
    windows: WindowResolver<'a>,
}

impl<'a> InjuryCalculator<'a> {
    pub fn new(source: &'a dyn GameSource, config: &'a LeagueConfig, cache: &'a SessionCache) -> Self {
        Self {
            source,
            config,
            cache,
            windows: WindowResolver::new(source, config, cache),
        }
    }

    fn team_rows(&self, team: &str, season: &str) -> PlayerRows {
        self.cache
            .team_players
            .get_or_insert_with((team.to_string(), season.to_string()), || {
                match self.source.team_player_games(team, season) {
                    Ok(rows) => rows.into(),
                    Err(err) => {
                        warn!(team, season, error = %err, "player rows lookup failed; treating as empty");
                        Vec::new().into()
                    }
                }
            })
    }

    fn player_history(&self, player_id: &str) -> PlayerRows {
        self.cache
            .player_history
            .get_or_insert_with(player_id.to_string(), || {
                match self.source.player_games(player_id) {
                    Ok(rows) => rows.into(),
                    Err(err) => {
                        warn!(player_id, error = %err, "player history lookup failed; treating as empty");
                        Vec::new().into()
                    }
                }
            })
    }

    pub fn league_timeline(&self, season: &str) -> Arc<LeagueTimeline> {
        self.cache
            .league_totals
            .get_or_insert_with(season.to_string(), || {
                let rows = match self.source.season_player_games(season) {
                    Ok(rows) => rows,
                    Err(err) => {
                        warn!(season, error = %err, "league rows lookup failed; using default constants");
                        Vec::new()
                    }
                };
                Arc::new(LeagueTimeline::from_rows(rows.iter().map(|r| r.as_ref())))
            })
    }

    pub fn team_aggregate(&self, team: &str, season: &str, date: NaiveDate) -> Arc<TeamAggregate> {
        let key = (team.to_string(), season.to_string(), date);
        self.cache.team_aggregates.get_or_insert_with(key, || {
            Arc::new(self.build_team_aggregate(team, season, date))
        })
    }

    fn build_team_aggregate(&self, team: &str, season: &str, date: NaiveDate) -> TeamAggregate {
        let rows = self.team_rows(team, season);
        let mut lines: BTreeMap<&str, (StatLine, Option<NaiveDate>)> = BTreeMap::new();
        for row in rows.iter().filter(|r| r.date < date) {
            let entry = lines
                .entry(row.player_id.as_str())
                .or_insert((StatLine::default(), None));
            entry.0 += &StatLine::from_row(row);
            if row.played() {
                entry.1 = Some(entry.1.map_or(row.date, |d| d.max(row.date)));
            }
        }

        let constants = self.league_timeline(season).constants_before(date);
        let roster: Vec<RosterEntry> = lines
            .into_iter()
            .filter(|(_, (line, _))| line.games > 0.0)
            .map(|(id, (line, last_played))| RosterEntry {
                player_id: id.to_string(),
                games: line.games,
                mpg: line.minutes_per_game(),
                per: constants.per(&line),
                last_played,
            })
            .collect();

        let threshold = self.config.rotation_mpg_threshold;
        let rotation_mpg = roster
            .iter()
            .filter(|e| e.mpg >= threshold)
            .map(|e| e.mpg)
            .sum();
        let max_mpg = roster.iter().map(|e| e.mpg).fold(0.0, f64::max);

        TeamAggregate {
            games_played: self.windows.games_before(team, season, date).len(),
            rotation_mpg,
            max_mpg,
            rotation_threshold: threshold,
            roster,
        }
    }

    pub fn last_appearance(&self, player_id: &str, date: NaiveDate) -> Option<Arc<PlayerGameStat>> {
        let history = self.player_history(player_id);
        let end = history.partition_point(|r| r.date < date);
        history[..end].iter().rev().find(|r| r.played()).cloned()
    }

    fn recency(&self, as_of: NaiveDate, last: Option<NaiveDate>) -> f64 {
        let days = last
            .map(|d| (as_of - d).num_days().max(0) as f64)
            .unwrap_or(0.0);
        (-days / self.config.injury_recency_days).exp()
    }

    pub fn impact(&self, team: &str, season: &str, date: NaiveDate, injured: &[String]) -> InjuryImpact {
        if injured.is_empty() {
            return InjuryImpact::default();
        }
        let agg = self.team_aggregate(team, season, date);
        if agg.max_mpg <= 0.0 {
            return InjuryImpact::default();
        }

        let mut seen = HashSet::new();
        let mut out_players: Vec<(&RosterEntry, f64)> = Vec::new();
        for id in injured {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let Some(last) = self.last_appearance(id, date) else {
                continue;
            };
            if last.team != team {
                continue;
            }
            let Some(entry) = agg.entry(id) else {
                continue;
            };
            if entry.mpg <= 0.0 {
                continue;
            }
            out_players.push((entry, self.recency(date, Some(last.date))));
        }
        if out_players.is_empty() {
            return InjuryImpact::default();
        }

        let per_value: f64 = out_players
            .iter()
            .map(|(e, recency)| e.per * (e.mpg / agg.max_mpg) * recency)
            .sum();
        let top1_per = top_sum(out_players.iter().map(|(e, _)| e.per), 1);
        let top3_per_sum = top_sum(out_players.iter().map(|(e, _)| e.per), 3);

        let threshold = self.config.rotation_mpg_threshold;
        let rotation_out: Vec<&RosterEntry> = out_players
            .iter()
            .map(|(e, _)| *e)
            .filter(|e| e.mpg >= threshold)
            .collect();
        let min_lost: f64 = rotation_out.iter().map(|e| e.mpg).sum();
        let severity = if agg.rotation_mpg > 0.0 {
            min_lost / agg.rotation_mpg
        } else {
            0.0
        };

        let per_share = (top3_per_sum / (agg.top3_per_sum() + EPS)).clamp(0.0, SHARE_CAP);

        // Same weighting and roster set as the injured numerator.
        let team_weighted: f64 = agg
            .roster
            .iter()
            .map(|e| e.per * (e.mpg / agg.max_mpg) * self.recency(date, e.last_played))
            .sum();
        let weighted_per_share = (per_value / (team_weighted + EPS)).clamp(0.0, SHARE_CAP);

        let mut stars: Vec<&RosterEntry> = agg.roster.iter().collect();
        stars.sort_by(|a, b| b.star_score().total_cmp(&a.star_score()));
        stars.truncate(3);
        let out_ids: HashSet<&str> = out_players.iter().map(|(e, _)| e.player_id.as_str()).collect();
        let star_out = match stars.first() {
            Some(s) if out_ids.contains(s.player_id.as_str()) => 1.0,
            _ => 0.0,
        };
        let star_mass: f64 = stars.iter().map(|s| s.star_score().max(0.0)).sum();
        let star_lost: f64 = stars
            .iter()
            .filter(|s| out_ids.contains(s.player_id.as_str()))
            .map(|s| s.star_score().max(0.0))
            .sum();
        let star_share = (star_lost / (star_mass + EPS)).clamp(0.0, 1.0);

        InjuryImpact {
            per_value,
            top1_per,
            top3_per_sum,
            min_lost,
            severity,
            rotation_count: rotation_out.len() as f64,
            per_share,
            weighted_per_share,
            star_out,
            star_share,
        }
    }

    /// Running `Σ minutes lost / Σ (rotation minutes + ε)` over prior games this season.
    pub fn season_severity(&self, team: &str, season: &str, date: NaiveDate) -> f64 {
        let games = self.windows.games_before(team, season, date);
        let key = (team.to_string(), season.to_string());
        let mut timeline = self.cache.severity.take(&key).unwrap_or_default();

        let consistent = timeline
            .points
            .iter()
            .zip(games.iter())
            .all(|(p, g)| p.date == g.date);
        if !consistent {
            timeline = SeverityTimeline::default();
        }

        while timeline.len() < games.len() {
            let game = &games[timeline.len()];
            let Some(side) = game.side_of(team) else {
                break;
            };
            let rotation = self.team_aggregate(team, season, game.date).rotation_mpg;
            let lost = self
                .impact(team, season, game.date, game.injured(side))
                .min_lost;
            timeline.push(game.date, lost, rotation);
        }

        let value = timeline.ratio_through(games.len());
        self.cache.severity.insert(key, timeline);
        value
    }
}
