use std::collections::HashMap;
use std::ops::AddAssign;
use std::sync::Arc;

use chrono::NaiveDate;
use once_cell::sync::Lazy;

use crate::descriptor::CalcWeight;
use crate::game::{GameRecord, TeamBox};

pub const REGULATION_MINUTES: f64 = 48.0;
const OVERTIME_MINUTES: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxTotals {
    pub games: f64,
    pub minutes: f64,
    pub points: f64,
    pub fg_made: f64,
    pub fg_att: f64,
    pub three_made: f64,
    pub three_att: f64,
    // `None` once any game in the window lacks the field.
    pub ft_made: Option<f64>,
    pub ft_att: f64,
    pub off_reb: f64,
    pub def_reb: Option<f64>,
    pub turnovers: f64,
    pub assists: f64,
}

impl Default for BoxTotals {
    fn default() -> Self {
        Self {
            games: 0.0,
            minutes: 0.0,
            points: 0.0,
            fg_made: 0.0,
            fg_att: 0.0,
            three_made: 0.0,
            three_att: 0.0,
            ft_made: Some(0.0),
            ft_att: 0.0,
            off_reb: 0.0,
            def_reb: Some(0.0),
            turnovers: 0.0,
            assists: 0.0,
        }
    }
}

impl BoxTotals {
    pub fn from_box(b: &TeamBox, overtime: bool) -> Self {
        Self {
            games: 1.0,
            minutes: if overtime {
                REGULATION_MINUTES + OVERTIME_MINUTES
            } else {
                REGULATION_MINUTES
            },
            points: b.points as f64,
            fg_made: b.fg_made as f64,
            fg_att: b.fg_att as f64,
            three_made: b.three_made as f64,
            three_att: b.three_att as f64,
            ft_made: b.ft_made.map(f64::from),
            ft_att: b.ft_att as f64,
            off_reb: b.off_reb as f64,
            def_reb: b.def_reb.map(f64::from),
            turnovers: b.turnovers as f64,
            assists: b.assists as f64,
        }
    }

    pub fn possessions(&self) -> f64 {
        self.fg_att - self.off_reb + self.turnovers + 0.44 * self.ft_att
    }
}

impl AddAssign<&BoxTotals> for BoxTotals {
    fn add_assign(&mut self, rhs: &BoxTotals) {
        self.games += rhs.games;
        self.minutes += rhs.minutes;
        self.points += rhs.points;
        self.fg_made += rhs.fg_made;
        self.fg_att += rhs.fg_att;
        self.three_made += rhs.three_made;
        self.three_att += rhs.three_att;
        self.ft_made = self.ft_made.zip(rhs.ft_made).map(|(a, b)| a + b);
        self.ft_att += rhs.ft_att;
        self.off_reb += rhs.off_reb;
        self.def_reb = self.def_reb.zip(rhs.def_reb).map(|(a, b)| a + b);
        self.turnovers += rhs.turnovers;
        self.assists += rhs.assists;
    }
}

pub fn window_totals(team: &str, games: &[Arc<GameRecord>]) -> (BoxTotals, BoxTotals) {
    let mut own = BoxTotals::default();
    let mut opp = BoxTotals::default();
    for game in games {
        let Some((a, b)) = game.boxes_for(team) else {
            continue;
        };
        own += &BoxTotals::from_box(a, game.overtime);
        opp += &BoxTotals::from_box(b, game.overtime);
    }
    (own, opp)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Counting,
    Rate {
        /// Depends on paired offense/defense totals; never averaged per game.
        window_only: bool,
    },
    Wins,
}

type Formula = fn(&BoxTotals, &BoxTotals) -> Option<f64>;

#[derive(Debug, Clone, Copy)]
pub struct StatSpec {
    pub name: &'static str,
    pub kind: StatKind,
    formula: Formula,
    /// Evaluated on the opponent's box (points allowed, eFG% allowed...).
    pub opponent_view: bool,
    stored_key: &'static str,
    /// Only games where the team played at the requested location count.
    pub location_only: bool,
    /// What the team concedes on the same stat, for `_net` features.
    pub net_counterpart: Option<&'static str>,
}

impl StatSpec {
    fn counting(name: &'static str, formula: Formula) -> Self {
        Self {
            name,
            kind: StatKind::Counting,
            formula,
            opponent_view: false,
            stored_key: name,
            location_only: false,
            net_counterpart: None,
        }
    }

    fn rate(name: &'static str, window_only: bool, formula: Formula) -> Self {
        Self {
            kind: StatKind::Rate { window_only },
            ..Self::counting(name, formula)
        }
    }

    fn allowed(self, name: &'static str) -> Self {
        let kind = match self.kind {
            StatKind::Rate { .. } => StatKind::Rate { window_only: true },
            other => other,
        };
        Self {
            name,
            kind,
            opponent_view: true,
            ..self
        }
    }

    fn net(self, counterpart: &'static str) -> Self {
        Self {
            net_counterpart: Some(counterpart),
            ..self
        }
    }

    fn at_location(self) -> Self {
        Self {
            location_only: true,
            ..self
        }
    }

    fn orient<'a>(&self, own: &'a BoxTotals, opp: &'a BoxTotals) -> (&'a BoxTotals, &'a BoxTotals) {
        if self.opponent_view {
            (opp, own)
        } else {
            (own, opp)
        }
    }

    pub fn from_totals(&self, own: &BoxTotals, opp: &BoxTotals) -> Option<f64> {
        if own.games <= 0.0 {
            return None;
        }
        let (a, b) = self.orient(own, opp);
        (self.formula)(a, b).filter(|v| v.is_finite())
    }

    pub fn per_game(&self, team: &str, game: &GameRecord) -> Option<f64> {
        if self.kind == StatKind::Wins {
            return game.won_by(team).map(f64::from);
        }
        let (own, opp) = game.boxes_for(team)?;
        let stored_box = if self.opponent_view { opp } else { own };
        if let Some(v) = stored_box.stored_value(self.stored_key) {
            return Some(v);
        }
        let own_t = BoxTotals::from_box(own, game.overtime);
        let opp_t = BoxTotals::from_box(opp, game.overtime);
        self.from_totals(&own_t, &opp_t)
    }
}

fn ratio(num: f64, den: f64) -> Option<f64> {
    (den > 0.0).then(|| num / den)
}

fn pct(num: f64, den: f64) -> Option<f64> {
    ratio(num, den).map(|v| v * 100.0)
}

fn shared_possessions(own: &BoxTotals, opp: &BoxTotals) -> f64 {
    (own.possessions() + opp.possessions()) / 2.0
}

fn efg(t: &BoxTotals, _: &BoxTotals) -> Option<f64> {
    pct(t.fg_made + 0.5 * t.three_made, t.fg_att)
}

fn true_shooting(t: &BoxTotals, _: &BoxTotals) -> Option<f64> {
    pct(t.points, 2.0 * (t.fg_att + 0.44 * t.ft_att))
}

fn three_pct(t: &BoxTotals, _: &BoxTotals) -> Option<f64> {
    pct(t.three_made, t.three_att)
}

fn assist_ratio(t: &BoxTotals, _: &BoxTotals) -> Option<f64> {
    pct(t.assists, t.fg_att + 0.44 * t.ft_att + t.assists + t.turnovers)
}

fn turnover_rate(t: &BoxTotals, _: &BoxTotals) -> Option<f64> {
    pct(t.turnovers, t.fg_att + 0.44 * t.ft_att + t.turnovers)
}

fn off_rtg(own: &BoxTotals, opp: &BoxTotals) -> Option<f64> {
    pct(own.points, shared_possessions(own, opp))
}

fn def_rtg(own: &BoxTotals, opp: &BoxTotals) -> Option<f64> {
    pct(opp.points, shared_possessions(own, opp))
}

fn pace(own: &BoxTotals, opp: &BoxTotals) -> Option<f64> {
    ratio(shared_possessions(own, opp) * REGULATION_MINUTES, own.minutes)
}

static STATS: Lazy<HashMap<&'static str, StatSpec>> = Lazy::new(|| {
    let specs = vec![
        StatSpec::counting("points", |t, _| Some(t.points)).net("opp_points"),
        StatSpec::counting("fg_made", |t, _| Some(t.fg_made)),
        StatSpec::counting("fg_att", |t, _| Some(t.fg_att)),
        StatSpec::counting("three_made", |t, _| Some(t.three_made)),
        StatSpec::counting("three_att", |t, _| Some(t.three_att)),
        StatSpec::counting("ft_made", |t, _| t.ft_made),
        StatSpec::counting("ft_att", |t, _| Some(t.ft_att)),
        StatSpec::counting("off_reb", |t, _| Some(t.off_reb)),
        StatSpec::counting("def_reb", |t, _| t.def_reb),
        StatSpec::counting("total_reb", |t, _| t.def_reb.map(|d| d + t.off_reb)),
        StatSpec::counting("assists", |t, _| Some(t.assists)),
        StatSpec::counting("turnovers", |t, _| Some(t.turnovers)),
        StatSpec::counting("possessions", |t, _| Some(t.possessions())),
        StatSpec::counting("margin", |t, o| Some(t.points - o.points)),
        StatSpec::counting("points", |t, _| Some(t.points)).allowed("opp_points"),
        StatSpec::counting("turnovers", |t, _| Some(t.turnovers)).allowed("opp_turnovers"),
        StatSpec {
            kind: StatKind::Wins,
            ..StatSpec::counting("wins", |_, _| None)
        },
        StatSpec::rate("effective_fg_perc", false, efg).net("opp_effective_fg_perc"),
        StatSpec::rate("effective_fg_perc", false, efg).allowed("opp_effective_fg_perc"),
        StatSpec::rate("true_shooting_perc", false, true_shooting).net("opp_true_shooting_perc"),
        StatSpec::rate("true_shooting_perc", false, true_shooting)
            .allowed("opp_true_shooting_perc"),
        StatSpec::rate("three_perc", false, three_pct).net("opp_three_perc"),
        StatSpec::rate("three_perc", false, three_pct).allowed("opp_three_perc"),
        StatSpec::rate("fg_perc", false, |t, _| pct(t.fg_made, t.fg_att)),
        StatSpec::rate("ft_perc", false, |t, _| pct(t.ft_made?, t.ft_att)),
        StatSpec::rate("off_rtg", true, off_rtg).net("def_rtg"),
        StatSpec::rate("def_rtg", true, def_rtg).net("off_rtg"),
        StatSpec::rate("assist_ratio", true, assist_ratio).net("opp_assist_ratio"),
        StatSpec::rate("assist_ratio", true, assist_ratio).allowed("opp_assist_ratio"),
        StatSpec::rate("turnover_rate", false, turnover_rate).net("opp_turnover_rate"),
        StatSpec::rate("turnover_rate", false, turnover_rate).allowed("opp_turnover_rate"),
        StatSpec::rate("off_reb_perc", true, |t, o| pct(t.off_reb, t.off_reb + o.def_reb?)),
        StatSpec::rate("pace", false, pace),
        StatSpec::rate("three_rate", false, |t, _| ratio(t.three_att, t.fg_att)).at_location(),
        StatSpec::rate("ft_rate", false, |t, _| ratio(t.ft_att, t.fg_att)).at_location(),
    ];
    specs.into_iter().map(|s| (s.name, s)).collect()
});

pub fn lookup(name: &str) -> Option<&'static StatSpec> {
    STATS.get(name)
}

pub fn stat_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = STATS.keys().copied().collect();
    names.sort_unstable();
    names
}

#[derive(Debug, Clone, Copy)]
pub struct AggregateParams {
    pub as_of: NaiveDate,
    /// `k` in the empirical-Bayes shrink `n / (n + k)`.
    pub shrink_k: f64,
}

pub fn aggregate(
    spec: &StatSpec,
    team: &str,
    games: &[Arc<GameRecord>],
    calc: CalcWeight,
    params: &AggregateParams,
) -> f64 {
    let value = match spec.kind {
        StatKind::Counting | StatKind::Wins => per_game_summary(spec, team, games, calc, params),
        StatKind::Rate { window_only: true } => window_value(spec, team, games),
        StatKind::Rate { window_only: false } => match calc {
            CalcWeight::Raw => window_value(spec, team, games),
            _ => per_game_summary(spec, team, games, calc, params)
                .or_else(|| window_value(spec, team, games)),
        },
    };
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

pub fn window_value(spec: &StatSpec, team: &str, games: &[Arc<GameRecord>]) -> Option<f64> {
    let (own, opp) = window_totals(team, games);
    spec.from_totals(&own, &opp)
}

fn per_game_summary(
    spec: &StatSpec,
    team: &str,
    games: &[Arc<GameRecord>],
    calc: CalcWeight,
    params: &AggregateParams,
) -> Option<f64> {
    let samples: Vec<(f64, NaiveDate)> = games
        .iter()
        .filter_map(|g| spec.per_game(team, g).map(|v| (v, g.date)))
        .collect();
    if samples.is_empty() {
        return None;
    }
    let values: Vec<f64> = samples.iter().map(|(v, _)| *v).collect();
    let n = values.len() as f64;
    let value = match calc {
        CalcWeight::Raw => values.iter().sum(),
        CalcWeight::Avg | CalcWeight::Beta => mean(&values),
        CalcWeight::Std => sample_std(&values),
        CalcWeight::EmpiricalBayes => n / (n + params.shrink_k) * mean(&values),
        CalcWeight::LogWeighted => mean(&values) * (1.0 + n).ln(),
        CalcWeight::Decay(lambda) => {
            let mut num = 0.0;
            let mut den = 0.0;
            for (v, date) in &samples {
                let days = (params.as_of - *date).num_days().max(0) as f64;
                let w = (-lambda * days).exp();
                num += w * v;
                den += w;
            }
            ratio(num, den)?
        }
    };
    Some(value)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::test_support::{day, game};
    use approx::assert_relative_eq;

    fn params() -> AggregateParams {
        AggregateParams {
            as_of: day("2024-02-01"),
            shrink_k: 5.0,
        }
    }

    fn shooting_game(id: &str, date: &str, fgm: u32, fga: u32, tpm: u32) -> Arc<GameRecord> {
        let mut g = game(id, date, "BOS", "NYK", 100, 90);
        g.home.fg_made = fgm;
        g.home.fg_att = fga;
        g.home.three_made = tpm;
        Arc::new(g)
    }

    #[test]
    fn raw_rate_sums_totals_before_the_formula() {
        let games = vec![
            shooting_game("a", "2024-01-01", 40, 80, 10),
            shooting_game("b", "2024-01-03", 45, 90, 12),
        ];
        let spec = lookup("effective_fg_perc").unwrap();
        let raw = aggregate(spec, "BOS", &games, CalcWeight::Raw, &params());
        let expected = ((40.0 + 45.0) + 0.5 * (10.0 + 12.0)) / (80.0 + 90.0) * 100.0;
        assert_relative_eq!(raw, expected, epsilon = 1e-9);

        let avg = aggregate(spec, "BOS", &games, CalcWeight::Avg, &params());
        let per_game = ((45.0 / 80.0) + (51.0 / 90.0)) / 2.0 * 100.0;
        assert_relative_eq!(avg, per_game, epsilon = 1e-9);
        assert!((raw - avg).abs() > 1e-6);
    }

    #[test]
    fn window_only_stats_ignore_avg() {
        let mut g1 = game("a", "2024-01-01", "BOS", "NYK", 120, 100);
        g1.home.fg_att = 70;
        let g2 = game("b", "2024-01-03", "NYK", "BOS", 90, 95);
        let games = vec![Arc::new(g1), Arc::new(g2)];
        let spec = lookup("off_rtg").unwrap();
        let raw = aggregate(spec, "BOS", &games, CalcWeight::Raw, &params());
        let avg = aggregate(spec, "BOS", &games, CalcWeight::Avg, &params());
        assert_relative_eq!(raw, avg, epsilon = 1e-12);

        let (own, opp) = window_totals("BOS", &games);
        let poss = (own.possessions() + opp.possessions()) / 2.0;
        assert_relative_eq!(raw, 100.0 * 215.0 / poss, epsilon = 1e-9);
    }

    #[test]
    fn counting_stats_sum_or_average() {
        let games: Vec<_> = [("a", 108), ("b", 112), ("c", 110)]
            .iter()
            .enumerate()
            .map(|(i, (id, pts))| Arc::new(game(id, &format!("2024-01-0{}", i + 1), "BOS", "NYK", *pts, 99)))
            .collect();
        let spec = lookup("points").unwrap();
        assert_relative_eq!(aggregate(spec, "BOS", &games, CalcWeight::Avg, &params()), 110.0);
        assert_relative_eq!(aggregate(spec, "BOS", &games, CalcWeight::Raw, &params()), 330.0);
        assert_relative_eq!(aggregate(spec, "BOS", &games, CalcWeight::Std, &params()), 2.0);
        assert_relative_eq!(
            aggregate(spec, "BOS", &games, CalcWeight::EmpiricalBayes, &params()),
            3.0 / 8.0 * 110.0
        );
        let opp = lookup("opp_points").unwrap();
        assert_relative_eq!(aggregate(opp, "BOS", &games, CalcWeight::Avg, &params()), 99.0);
    }

    #[test]
    fn decay_weights_recent_games_more() {
        let games = vec![
            Arc::new(game("a", "2024-01-01", "BOS", "NYK", 90, 80)),
            Arc::new(game("b", "2024-01-31", "BOS", "NYK", 130, 80)),
        ];
        let spec = lookup("points").unwrap();
        let v = aggregate(spec, "BOS", &games, CalcWeight::Decay(0.1), &params());
        assert!(v > 110.0 && v < 130.0);
    }

    #[test]
    fn wins_count_and_fraction() {
        let games = vec![
            Arc::new(game("a", "2024-01-01", "BOS", "NYK", 100, 90)),
            Arc::new(game("b", "2024-01-02", "NYK", "BOS", 100, 90)),
            Arc::new(game("c", "2024-01-03", "LAL", "BOS", 80, 90)),
        ];
        let spec = lookup("wins").unwrap();
        assert_relative_eq!(aggregate(spec, "BOS", &games, CalcWeight::Raw, &params()), 2.0);
        assert_relative_eq!(
            aggregate(spec, "BOS", &games, CalcWeight::Avg, &params()),
            2.0 / 3.0
        );
    }

    #[test]
    fn stored_field_beats_formula_then_aggregate_fallback() {
        let mut g = game("a", "2024-01-01", "BOS", "NYK", 100, 90);
        g.home.stored.insert("effective_fg_perc".to_string(), 61.5);
        let spec = lookup("effective_fg_perc").unwrap();
        assert_eq!(spec.per_game("BOS", &g), Some(61.5));

        let mut missing = game("b", "2024-01-02", "BOS", "NYK", 100, 90);
        missing.home.ft_made = None;
        let ft = lookup("ft_perc").unwrap();
        assert_eq!(ft.per_game("BOS", &missing), None);
        let games = vec![Arc::new(missing)];
        assert_eq!(aggregate(ft, "BOS", &games, CalcWeight::Avg, &params()), 0.0);
    }

    #[test]
    fn empty_window_is_zero() {
        for name in stat_names() {
            let spec = lookup(name).unwrap();
            for calc in [CalcWeight::Raw, CalcWeight::Avg, CalcWeight::Std] {
                assert_eq!(aggregate(spec, "BOS", &[], calc, &params()), 0.0, "{name}");
            }
        }
    }

    #[test]
    fn net_counterparts_exist() {
        for name in stat_names() {
            if let Some(other) = lookup(name).unwrap().net_counterpart {
                assert!(lookup(other).is_some(), "{name} -> {other}");
            }
        }
        assert!(lookup("opp_three_perc").unwrap().opponent_view);
        assert_eq!(
            lookup("opp_three_perc").unwrap().kind,
            StatKind::Rate { window_only: true }
        );
    }
}
