use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub fn flip(self) -> Self {
        match self {
            Side::Home => Side::Away,
            Side::Away => Side::Home,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamBox {
    pub points: u32,
    pub fg_made: u32,
    pub fg_att: u32,
    pub three_made: u32,
    pub three_att: u32,
    #[serde(default)]
    pub ft_made: Option<u32>,
    pub ft_att: u32,
    pub off_reb: u32,
    #[serde(default)]
    pub def_reb: Option<u32>,
    pub turnovers: u32,
    pub assists: u32,
    // Precomputed per-game values keyed by stat name (e.g. "effective_fg_perc").
    #[serde(default)]
    pub stored: BTreeMap<String, f64>,
}

impl TeamBox {
    pub fn stored_value(&self, stat: &str) -> Option<f64> {
        self.stored.get(stat).copied().filter(|v| v.is_finite())
    }

    /// `FGA - OffReb + TO + 0.44 * FTA`
    pub fn possessions(&self) -> f64 {
        self.fg_att as f64 - self.off_reb as f64 + self.turnovers as f64
            + 0.44 * self.ft_att as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BettingLine {
    #[serde(default)]
    pub home_moneyline: Option<f64>,
    #[serde(default)]
    pub away_moneyline: Option<f64>,
    // Home-perspective spread, negative when the home side is favoured.
    #[serde(default)]
    pub spread: Option<f64>,
    #[serde(default)]
    pub total: Option<f64>,
}

impl BettingLine {
    pub fn is_empty(&self) -> bool {
        self.home_moneyline.is_none()
            && self.away_moneyline.is_none()
            && self.spread.is_none()
            && self.total.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRecord {
    pub game_id: String,
    pub season: String,
    pub date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    pub home: TeamBox,
    pub away: TeamBox,
    pub home_won: bool,
    #[serde(default)]
    pub overtime: bool,
    #[serde(default = "default_game_type")]
    pub game_type: String,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub home_injured: Vec<String>,
    #[serde(default)]
    pub away_injured: Vec<String>,
    #[serde(default)]
    pub lines: BettingLine,
}

fn default_game_type() -> String {
    "regular".to_string()
}

impl GameRecord {
    pub fn side_of(&self, team: &str) -> Option<Side> {
        if self.home_team == team {
            Some(Side::Home)
        } else if self.away_team == team {
            Some(Side::Away)
        } else {
            None
        }
    }

    pub fn team(&self, side: Side) -> &str {
        match side {
            Side::Home => &self.home_team,
            Side::Away => &self.away_team,
        }
    }

    pub fn box_for(&self, side: Side) -> &TeamBox {
        match side {
            Side::Home => &self.home,
            Side::Away => &self.away,
        }
    }

    pub fn opponent(&self, team: &str) -> Option<&str> {
        self.side_of(team).map(|side| self.team(side.flip()))
    }

    /// (own box, opponent box) from `team`'s point of view.
    pub fn boxes_for(&self, team: &str) -> Option<(&TeamBox, &TeamBox)> {
        let side = self.side_of(team)?;
        Some((self.box_for(side), self.box_for(side.flip())))
    }

    pub fn won_by(&self, team: &str) -> Option<bool> {
        match self.side_of(team)? {
            Side::Home => Some(self.home_won),
            Side::Away => Some(!self.home_won),
        }
    }

    /// Point differential from `team`'s point of view.
    pub fn margin_for(&self, team: &str) -> Option<f64> {
        let (own, opp) = self.boxes_for(team)?;
        Some(own.points as f64 - opp.points as f64)
    }

    pub fn injured(&self, side: Side) -> &[String] {
        match side {
            Side::Home => &self.home_injured,
            Side::Away => &self.away_injured,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerGameStat {
    pub player_id: String,
    pub team: String,
    pub season: String,
    pub date: NaiveDate,
    pub minutes: f64,
    #[serde(default)]
    pub points: u32,
    #[serde(default)]
    pub fg_made: u32,
    #[serde(default)]
    pub fg_att: u32,
    #[serde(default)]
    pub three_made: u32,
    #[serde(default)]
    pub ft_made: u32,
    #[serde(default)]
    pub ft_att: u32,
    #[serde(default)]
    pub off_reb: u32,
    #[serde(default)]
    pub def_reb: u32,
    #[serde(default)]
    pub assists: u32,
    #[serde(default)]
    pub steals: u32,
    #[serde(default)]
    pub blocks: u32,
    #[serde(default)]
    pub turnovers: u32,
    #[serde(default)]
    pub fouls: u32,
}

impl PlayerGameStat {
    pub fn played(&self) -> bool {
        self.minutes > 0.0
    }
}
