use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::betting_lines;
use crate::cache::SessionCache;
use crate::composite::Composer;
use crate::descriptor::{FeatureDescriptor, Perspective, SpecialRequest, TimePeriod};
use crate::elo::{self, EloConfig};
use crate::game::{BettingLine, GameRecord, Side};
use crate::game_index::GameSource;
use crate::injury_impact::{ImpactWeights, InjuryCalculator};
use crate::league_config::LeagueConfig;
use crate::schedule::{ScheduleFeatures, VenueCache};
use crate::stats;
use crate::window::WindowResolver;

pub const ENGINE_VERSION: u32 = 2;

pub type FeatureMap = BTreeMap<String, f64>;

const COMPOSITE_FEATURES: &[&str] = &[
    "margin",
    "margin_h2h",
    "h2h_win_pct",
    "pace_interaction",
    "exp_points",
    "exp_points_matchup",
    "close_win_pct",
    "games_played",
];

const SCHEDULE_FEATURES: &[&str] = &["days_rest", "b2b", "first_of_b2b", "travel", "travel_incl"];

const RATING_FEATURES: &[&str] = &["elo", "elo_prob", "per_top1", "per_top3_sum", "per_weighted"];

fn is_special(name: &str) -> bool {
    COMPOSITE_FEATURES.contains(&name)
        || SCHEDULE_FEATURES.contains(&name)
        || RATING_FEATURES.contains(&name)
        || betting_lines::LINE_FEATURE_NAMES.contains(&name)
        || crate::injury_impact::INJURY_FEATURE_NAMES.contains(&name)
}

/// The game a feature set is computed for. Injured lists and betting lines fall back to the
/// stored record for that day when not given.
#[derive(Debug, Clone, PartialEq)]
pub struct Matchup {
    pub game_id: Option<String>,
    pub home: String,
    pub away: String,
    pub season: String,
    pub date: NaiveDate,
    pub venue: Option<String>,
    pub home_injured: Option<Vec<String>>,
    pub away_injured: Option<Vec<String>>,
    pub lines: Option<BettingLine>,
}

impl Matchup {
    pub fn new(home: impl Into<String>, away: impl Into<String>, season: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            game_id: None,
            home: home.into(),
            away: away.into(),
            season: season.into(),
            date,
            venue: None,
            home_injured: None,
            away_injured: None,
            lines: None,
        }
    }

    pub fn from_game(game: &GameRecord) -> Self {
        Self {
            game_id: Some(game.game_id.clone()),
            venue: game.venue.clone(),
            home_injured: Some(game.home_injured.clone()),
            away_injured: Some(game.away_injured.clone()),
            lines: Some(game.lines.clone()),
            ..Self::new(&game.home_team, &game.away_team, &game.season, game.date)
        }
    }

    pub fn with_injuries(mut self, home: Vec<String>, away: Vec<String>) -> Self {
        self.home_injured = Some(home);
        self.away_injured = Some(away);
        self
    }

    fn team(&self, side: Side) -> &str {
        match side {
            Side::Home => &self.home,
            Side::Away => &self.away,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureRow {
    pub engine_version: u32,
    pub game_id: Option<String>,
    pub season: String,
    pub date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    pub features: FeatureMap,
}

#[derive(Debug, Clone, Copy)]
pub struct BulkOptions {
    pub threads: usize,
    pub chunk_size: usize,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            threads: feature_parallelism(),
            chunk_size: 64,
        }
    }
}

pub struct FeatureEngine<'a> {
    source: &'a dyn GameSource,
    config: &'a LeagueConfig,
    venues: &'a VenueCache,
}

impl<'a> FeatureEngine<'a> {
    pub fn new(source: &'a dyn GameSource, config: &'a LeagueConfig, venues: &'a VenueCache) -> Self {
        Self {
            source,
            config,
            venues,
        }
    }

    /// `{descriptor -> value}` for one matchup. A failing descriptor reads 0.0.
    pub fn compute<S: AsRef<str>>(&self, matchup: &Matchup, descriptors: &[S], cache: &SessionCache) -> FeatureMap {
        let eval = Evaluation::new(self, matchup, cache);
        descriptors
            .iter()
            .map(|raw| {
                let raw = raw.as_ref();
                (raw.to_string(), eval.feature(raw))
            })
            .collect()
    }

    /// Computes every matchup on a dedicated rayon pool. Each chunk gets its own
    /// `SessionCache`; rows come back ordered by date, then game id.
    pub fn generate_bulk<S>(
        &self,
        matchups: &[Matchup],
        descriptors: &[S],
        options: BulkOptions,
        progress: Option<&(dyn Fn(usize, usize) + Sync)>,
    ) -> Vec<FeatureRow>
    where
        S: AsRef<str> + Sync,
    {
        let total = matchups.len();
        let mut ordered: Vec<&Matchup> = matchups.iter().collect();
        ordered.sort_by(|a, b| (a.date, &a.game_id).cmp(&(b.date, &b.game_id)));

        let done = AtomicUsize::new(0);
        let chunk_size = options.chunk_size.max(1);
        let pool = build_feature_pool(options.threads);
        info!(total, threads = options.threads, chunk_size, "bulk feature generation started");

        let mut rows: Vec<FeatureRow> = with_feature_pool(&pool, || {
            ordered
                .par_chunks(chunk_size)
                .flat_map_iter(|chunk| {
                    let cache = SessionCache::new();
                    let rows: Vec<FeatureRow> = chunk
                        .iter()
                        .map(|m| FeatureRow {
                            engine_version: ENGINE_VERSION,
                            game_id: m.game_id.clone(),
                            season: m.season.clone(),
                            date: m.date,
                            home_team: m.home.clone(),
                            away_team: m.away.clone(),
                            features: self.compute(m, descriptors, &cache),
                        })
                        .collect();
                    let finished = done.fetch_add(chunk.len(), Ordering::SeqCst) + chunk.len();
                    let stats = cache.stats();
                    debug!(hits = stats.hits, misses = stats.misses, windows = stats.windows, "chunk cache");
                    info!(done = finished, total, "feature rows computed");
                    if let Some(cb) = progress {
                        cb(finished, total);
                    }
                    rows
                })
                .collect()
        });

        rows.sort_by(|a, b| (a.date, &a.game_id).cmp(&(b.date, &b.game_id)));
        rows
    }
}

fn build_feature_pool(threads: usize) -> Option<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
        .ok()
}

fn with_feature_pool<T>(pool: &Option<rayon::ThreadPool>, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    if let Some(pool) = pool.as_ref() {
        pool.install(action)
    } else {
        action()
    }
}

fn feature_parallelism() -> usize {
    env::var("FEATURE_PARALLELISM")
        .ok()
        .and_then(|val| val.parse::<usize>().ok())
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
        .clamp(1, 64)
}

struct Evaluation<'a> {
    engine: &'a FeatureEngine<'a>,
    matchup: &'a Matchup,
    windows: WindowResolver<'a>,
    injuries: InjuryCalculator<'a>,
    cache: &'a SessionCache,
}

impl<'a> Evaluation<'a> {
    fn new(engine: &'a FeatureEngine<'a>, matchup: &'a Matchup, cache: &'a SessionCache) -> Self {
        Self {
            engine,
            matchup,
            windows: WindowResolver::new(engine.source, engine.config, cache),
            injuries: InjuryCalculator::new(engine.source, engine.config, cache),
            cache,
        }
    }

    fn feature(&self, raw: &str) -> f64 {
        let outcome = match FeatureDescriptor::parse(raw) {
            Ok(d) => self.descriptor(&d),
            Err(err) => {
                debug!(descriptor = raw, error = %err, "descriptor did not parse; trying special handlers");
                let req = SpecialRequest::lenient(raw);
                if is_special(&req.name) {
                    self.special(&lenient_descriptor(raw, req))
                } else {
                    Err(anyhow!("unhandled descriptor"))
                }
            }
        };
        match outcome {
            Ok(v) if v.is_finite() => v,
            Ok(v) => {
                debug!(descriptor = raw, value = v, "non-finite feature value");
                0.0
            }
            Err(err) => {
                debug!(descriptor = raw, error = %err, "feature defaulted to 0.0");
                0.0
            }
        }
    }

    fn descriptor(&self, d: &FeatureDescriptor) -> Result<f64> {
        if is_special(&d.stat) {
            return self.special(d);
        }
        if stats::lookup(&d.stat).is_some() {
            return self.composer().stat_feature(d);
        }
        Err(anyhow!("unknown feature {:?}", d.stat))
    }

    fn composer(&self) -> Composer<'_> {
        let m = self.matchup;
        Composer::new(&self.windows, self.engine.config, &m.home, &m.away, &m.season, m.date)
    }

    fn schedule(&self) -> ScheduleFeatures<'_> {
        ScheduleFeatures::new(&self.windows, self.engine.config, self.engine.venues)
    }

    fn current_game(&self) -> Option<Arc<GameRecord>> {
        let m = self.matchup;
        self.windows.current_game(&m.home, &m.season, m.date)
    }

    fn injured(&self, side: Side) -> Vec<String> {
        let explicit = match side {
            Side::Home => &self.matchup.home_injured,
            Side::Away => &self.matchup.away_injured,
        };
        if let Some(list) = explicit {
            return list.clone();
        }
        let team = self.matchup.team(side);
        self.current_game()
            .and_then(|g| g.side_of(team).map(|s| g.injured(s).to_vec()))
            .unwrap_or_default()
    }

    fn lines(&self) -> Option<BettingLine> {
        self.matchup
            .lines
            .clone()
            .or_else(|| self.current_game().map(|g| g.lines.clone()))
    }

    fn upcoming_venue(&self) -> String {
        self.matchup
            .venue
            .clone()
            .or_else(|| self.current_game().and_then(|g| g.venue.clone()))
            .unwrap_or_else(|| self.matchup.home.clone())
    }

    fn per_side(&self, perspective: Perspective, mut f: impl FnMut(Side, &str) -> f64) -> f64 {
        let home = if perspective.needs_home() { f(Side::Home, &self.matchup.home) } else { 0.0 };
        let away = if perspective.needs_away() { f(Side::Away, &self.matchup.away) } else { 0.0 };
        perspective.combine(home, away)
    }

    fn special(&self, d: &FeatureDescriptor) -> Result<f64> {
        // Injury blends carry metric weights, not periods.
        if let Some(blend) = &d.blend
            && !d.stat.starts_with("inj_")
        {
            let mut total = 0.0;
            for component in blend.components() {
                let period: TimePeriod = component
                    .key
                    .parse()
                    .map_err(|e| anyhow!("blend component {:?}: {e}", component.key))?;
                total += component.weight * self.special(&d.with_period(period))?;
            }
            return Ok(total);
        }

        let m = self.matchup;
        let (season, date) = (m.season.as_str(), m.date);
        let p = d.perspective;
        let value = match d.stat.as_str() {
            "margin" => self.composer().margin(d)?,
            "margin_h2h" => self.composer().margin_h2h(d)?,
            "h2h_win_pct" => self.composer().h2h_win_pct(d.period, d.calc, d.side_split, p),
            "pace_interaction" => self.composer().pace_interaction(d.period),
            "exp_points" => self.composer().exp_points(d.period, p),
            "exp_points_matchup" => self.composer().exp_points_matchup(d.period, p),
            "close_win_pct" => self.composer().close_win_pct(d.period, d.side_split, p),
            "games_played" => self.composer().games_played(d.period, d.side_split, p),

            "days_rest" => self.per_side(p, |_, team| self.schedule().days_rest(team, season, date)),
            "b2b" => self.per_side(p, |_, team| self.schedule().back_to_back(team, season, date)),
            "first_of_b2b" => self.per_side(p, |_, team| {
                self.schedule().first_of_back_to_back(team, season, date)
            }),
            "travel" => self.per_side(p, |_, team| {
                self.schedule().travel(team, season, date, d.period, None)
            }),
            "travel_incl" => {
                let venue = self.upcoming_venue();
                self.per_side(p, |_, team| {
                    self.schedule().travel(team, season, date, d.period, Some(&venue))
                })
            }

            "elo" | "elo_prob" => {
                let cfg = EloConfig::from_league(self.engine.config);
                let ratings =
                    elo::season_ratings(self.engine.source, self.engine.config, self.cache, season, date);
                if d.stat == "elo" {
                    self.per_side(p, |_, team| elo::rating(&ratings, team, cfg))
                } else {
                    let home = elo::home_win_prob(&ratings, &m.home, &m.away, cfg);
                    match p {
                        Perspective::Away => 1.0 - home,
                        _ => home,
                    }
                }
            }

            "per_top1" => self.per_side(p, |_, team| {
                self.injuries.team_aggregate(team, season, date).top_per()
            }),
            "per_top3_sum" => self.per_side(p, |_, team| {
                self.injuries.team_aggregate(team, season, date).top3_per_sum()
            }),
            "per_weighted" => self.per_side(p, |_, team| {
                self.injuries.team_aggregate(team, season, date).weighted_per()
            }),

            "inj_severity_season" => self.per_side(p, |_, team| {
                self.injuries.season_severity(team, season, date)
            }),
            name if name.starts_with("inj_") => {
                let weights = ImpactWeights::from_blend(d.blend.as_ref());
                let mut failed = false;
                let v = self.per_side(p, |side, team| {
                    let impact = self.injuries.impact(team, season, date, &self.injured(side));
                    impact.metric(name, &weights).unwrap_or_else(|| {
                        failed = true;
                        0.0
                    })
                });
                if failed {
                    return Err(anyhow!("unknown injury metric {name:?}"));
                }
                v
            }

            name if name.starts_with("vegas_") => {
                let lines = self.lines().ok_or_else(|| anyhow!("no betting line"))?;
                betting_lines::line_feature(name, &lines, p)
                    .ok_or_else(|| anyhow!("betting line lacks {name:?}"))?
            }

            other => return Err(anyhow!("no special handler for {other:?}")),
        };
        Ok(value)
    }
}

fn lenient_descriptor(raw: &str, req: SpecialRequest) -> FeatureDescriptor {
    FeatureDescriptor {
        raw: raw.to_string(),
        stat: req.name,
        period: req.period,
        calc: req.calc,
        perspective: req.perspective,
        net: false,
        side_split: false,
        blend: req.blend,
    }
}
