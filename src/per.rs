//! Hollinger's unadjusted PER, scaled so the league average is 15.

use std::ops::AddAssign;

use chrono::NaiveDate;

use crate::game::PlayerGameStat;

pub const LEAGUE_AVERAGE_PER: f64 = 15.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatLine {
    pub games: f64,
    pub minutes: f64,
    pub points: f64,
    pub fg_made: f64,
    pub fg_att: f64,
    pub three_made: f64,
    pub ft_made: f64,
    pub ft_att: f64,
    pub off_reb: f64,
    pub def_reb: f64,
    pub assists: f64,
    pub steals: f64,
    pub blocks: f64,
    pub turnovers: f64,
    pub fouls: f64,
}

impl StatLine {
    pub fn from_row(row: &PlayerGameStat) -> Self {
        Self {
            games: if row.played() { 1.0 } else { 0.0 },
            minutes: row.minutes.max(0.0),
            points: row.points as f64,
            fg_made: row.fg_made as f64,
            fg_att: row.fg_att as f64,
            three_made: row.three_made as f64,
            ft_made: row.ft_made as f64,
            ft_att: row.ft_att as f64,
            off_reb: row.off_reb as f64,
            def_reb: row.def_reb as f64,
            assists: row.assists as f64,
            steals: row.steals as f64,
            blocks: row.blocks as f64,
            turnovers: row.turnovers as f64,
            fouls: row.fouls as f64,
        }
    }

    pub fn total_reb(&self) -> f64 {
        self.off_reb + self.def_reb
    }

    pub fn minutes_per_game(&self) -> f64 {
        if self.games > 0.0 {
            self.minutes / self.games
        } else {
            0.0
        }
    }
}

impl AddAssign<&StatLine> for StatLine {
    fn add_assign(&mut self, rhs: &StatLine) {
        self.games += rhs.games;
        self.minutes += rhs.minutes;
        self.points += rhs.points;
        self.fg_made += rhs.fg_made;
        self.fg_att += rhs.fg_att;
        self.three_made += rhs.three_made;
        self.ft_made += rhs.ft_made;
        self.ft_att += rhs.ft_att;
        self.off_reb += rhs.off_reb;
        self.def_reb += rhs.def_reb;
        self.assists += rhs.assists;
        self.steals += rhs.steals;
        self.blocks += rhs.blocks;
        self.turnovers += rhs.turnovers;
        self.fouls += rhs.fouls;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeagueConstants {
    factor: f64,
    vop: f64,
    drb_pct: f64,
    ast_per_fg: f64,
    ft_per_pf: f64,
    fta_per_pf: f64,
    league_uper: f64,
}

impl Default for LeagueConstants {
    /// Typical modern NBA season totals, used before any games are on record.
    fn default() -> Self {
        let typical = StatLine {
            games: 1.0,
            minutes: 240.0,
            points: 114.0,
            fg_made: 42.0,
            fg_att: 88.5,
            three_made: 12.8,
            ft_made: 17.5,
            ft_att: 22.5,
            off_reb: 10.5,
            def_reb: 33.5,
            assists: 26.5,
            steals: 7.5,
            blocks: 5.0,
            turnovers: 13.8,
            fouls: 19.5,
        };
        Self::from_totals(&typical).unwrap_or(Self {
            factor: 0.6,
            vop: 1.1,
            drb_pct: 0.76,
            ast_per_fg: 0.63,
            ft_per_pf: 0.9,
            fta_per_pf: 1.15,
            league_uper: 0.33,
        })
    }
}

impl LeagueConstants {
    pub fn from_totals(lg: &StatLine) -> Option<Self> {
        let poss = lg.fg_att - lg.off_reb + lg.turnovers + 0.44 * lg.ft_att;
        if lg.fg_made <= 0.0 || lg.ft_made <= 0.0 || lg.total_reb() <= 0.0 || poss <= 0.0 {
            return None;
        }
        let ast_per_fg = lg.assists / lg.fg_made;
        let factor = (2.0 / 3.0) - (0.5 * ast_per_fg) / (2.0 * (lg.fg_made / lg.ft_made));
        let vop = lg.points / poss;
        let drb_pct = lg.def_reb / lg.total_reb();
        let (ft_per_pf, fta_per_pf) = if lg.fouls > 0.0 {
            (lg.ft_made / lg.fouls, lg.ft_att / lg.fouls)
        } else {
            (0.0, 0.0)
        };
        let mut out = Self {
            factor,
            vop,
            drb_pct,
            ast_per_fg,
            ft_per_pf,
            fta_per_pf,
            league_uper: 0.0,
        };
        out.league_uper = out.unadjusted(lg)?;
        (out.league_uper > 0.0).then_some(out)
    }

    /// Per-minute linear weights before league normalization.
    pub fn unadjusted(&self, p: &StatLine) -> Option<f64> {
        if p.minutes <= 0.0 {
            return None;
        }
        let tm_ast = self.ast_per_fg;
        let vop = self.vop;
        let drb = self.drb_pct;
        let value = p.three_made + (2.0 / 3.0) * p.assists
            + (2.0 - self.factor * tm_ast) * p.fg_made
            + p.ft_made * 0.5 * (1.0 + (1.0 - tm_ast) + (2.0 / 3.0) * tm_ast)
            - vop * p.turnovers
            - vop * drb * (p.fg_att - p.fg_made)
            - vop * 0.44 * (0.44 + 0.56 * drb) * (p.ft_att - p.ft_made)
            + vop * (1.0 - drb) * p.def_reb
            + vop * drb * p.off_reb
            + vop * p.steals
            + vop * drb * p.blocks
            - p.fouls * (self.ft_per_pf - 0.44 * self.fta_per_pf * vop);
        Some(value / p.minutes)
    }

    pub fn per(&self, p: &StatLine) -> f64 {
        self.unadjusted(p)
            .map(|u| u * LEAGUE_AVERAGE_PER / self.league_uper)
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LeagueTimeline {
    points: Vec<(NaiveDate, StatLine)>,
}

impl LeagueTimeline {
    /// `rows` must be ascending by date.
    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a PlayerGameStat>,
    {
        let mut points: Vec<(NaiveDate, StatLine)> = Vec::new();
        let mut running = StatLine::default();
        for row in rows {
            running += &StatLine::from_row(row);
            match points.last_mut() {
                Some((date, line)) if *date == row.date => *line = running,
                _ => points.push((row.date, running)),
            }
        }
        Self { points }
    }

    pub fn totals_before(&self, date: NaiveDate) -> StatLine {
        let idx = self.points.partition_point(|(d, _)| *d < date);
        if idx == 0 {
            StatLine::default()
        } else {
            self.points[idx - 1].1
        }
    }

    pub fn constants_before(&self, date: NaiveDate) -> LeagueConstants {
        LeagueConstants::from_totals(&self.totals_before(date)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::test_support::day;
    use approx::assert_relative_eq;

    fn row(player: &str, date: &str, minutes: f64, points: u32) -> PlayerGameStat {
        PlayerGameStat {
            player_id: player.to_string(),
            team: "BOS".to_string(),
            season: "2023-2024".to_string(),
            date: day(date),
            minutes,
            points,
            fg_made: points / 2 - 1,
            fg_att: points,
            three_made: 2,
            ft_made: 3,
            ft_att: 4,
            off_reb: 1,
            def_reb: 5,
            assists: 4,
            steals: 1,
            blocks: 1,
            turnovers: 2,
            fouls: 3,
        }
    }

    #[test]
    fn league_totals_rate_fifteen() {
        let lg = StatLine {
            games: 10.0,
            ..StatLine::default()
        };
        assert!(LeagueConstants::from_totals(&lg).is_none());

        let consts = LeagueConstants::default();
        let mut typical = StatLine::default();
        typical += &StatLine::from_row(&row("a", "2024-01-01", 36.0, 24));
        assert!(consts.per(&typical).is_finite());

        let mut league = StatLine::default();
        for (i, pts) in [10u32, 20, 30, 16].iter().enumerate() {
            league += &StatLine::from_row(&row(&format!("p{i}"), "2024-01-01", 30.0, *pts));
        }
        let c = LeagueConstants::from_totals(&league).unwrap();
        assert_relative_eq!(c.per(&league), LEAGUE_AVERAGE_PER, epsilon = 1e-9);
    }

    #[test]
    fn better_lines_rate_higher() {
        let c = LeagueConstants::default();
        let good = StatLine::from_row(&row("a", "2024-01-01", 30.0, 30));
        let mut poor = good;
        poor.turnovers += 6.0;
        poor.fg_att += 10.0;
        assert!(c.per(&good) > c.per(&poor));
        assert_eq!(c.per(&StatLine::default()), 0.0);
    }

    #[test]
    fn timeline_is_strictly_before() {
        let rows = vec![
            row("a", "2024-01-01", 30.0, 20),
            row("b", "2024-01-01", 20.0, 10),
            row("a", "2024-01-03", 30.0, 22),
        ];
        let t = LeagueTimeline::from_rows(rows.iter());
        assert_eq!(t.totals_before(day("2024-01-01")).games, 0.0);
        assert_eq!(t.totals_before(day("2024-01-02")).games, 2.0);
        assert_eq!(t.totals_before(day("2024-01-03")).points, 30.0);
        assert_eq!(t.totals_before(day("2024-02-01")).points, 52.0);
    }
}
