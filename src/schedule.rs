use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::descriptor::TimePeriod;
use crate::game::GameRecord;
use crate::league_config::LeagueConfig;
use crate::window::WindowResolver;

const EARTH_RADIUS_MILES: f64 = 3958.8;
const DEFAULT_TRAVEL_DAYS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

pub fn haversine_miles(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MILES * h.sqrt().min(1.0).asin()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VenueCache {
    venues: HashMap<String, GeoPoint>,
}

impl VenueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read venue cache {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse venue cache {}", path.display()))
    }

    pub fn insert(&mut self, name: impl Into<String>, point: GeoPoint) {
        self.venues.insert(name.into(), point);
    }

    pub fn get(&self, name: &str) -> Option<GeoPoint> {
        self.venues.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.venues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, GeoPoint)> {
        self.venues.iter().map(|(k, v)| (k.as_str(), *v))
    }

    fn locate(&self, game: &GameRecord) -> Option<GeoPoint> {
        game.venue
            .as_deref()
            .and_then(|v| self.get(v))
            .or_else(|| self.get(&game.home_team))
    }
}

impl FromIterator<(String, GeoPoint)> for VenueCache {
    fn from_iter<I: IntoIterator<Item = (String, GeoPoint)>>(iter: I) -> Self {
        Self {
            venues: iter.into_iter().collect(),
        }
    }
}

pub struct ScheduleFeatures<'a> {
    windows: &'a WindowResolver<'a>,
    config: &'a LeagueConfig,
    venues: &'a VenueCache,
}

impl<'a> ScheduleFeatures<'a> {
    pub fn new(windows: &'a WindowResolver<'a>, config: &'a LeagueConfig, venues: &'a VenueCache) -> Self {
        Self {
            windows,
            config,
            venues,
        }
    }

    /// Days since the team's previous game, capped; the cap when there is none.
    pub fn days_rest(&self, team: &str, season: &str, date: NaiveDate) -> f64 {
        let cap = self.config.rest_cap_days;
        let days = self
            .windows
            .games_before(team, season, date)
            .last()
            .map(|g| (date - g.date).num_days().clamp(0, cap))
            .unwrap_or(cap);
        days as f64
    }

    pub fn back_to_back(&self, team: &str, season: &str, date: NaiveDate) -> f64 {
        if self.days_rest(team, season, date) == 1.0 {
            1.0
        } else {
            0.0
        }
    }

    /// 1.0 when the team also plays the following day.
    pub fn first_of_back_to_back(&self, team: &str, season: &str, date: NaiveDate) -> f64 {
        let next = date + Duration::days(1);
        if self.windows.plays_on(team, season, next) {
            1.0
        } else {
            0.0
        }
    }

    /// Miles between consecutive venues over the window. With `upcoming`, adds the leg from the
    /// last venue in the window to that venue.
    pub fn travel(
        &self,
        team: &str,
        season: &str,
        date: NaiveDate,
        period: TimePeriod,
        upcoming: Option<&str>,
    ) -> f64 {
        let period = match period {
            TimePeriod::None => TimePeriod::Days(DEFAULT_TRAVEL_DAYS),
            other => other,
        };
        let window = self.windows.window_for(team, "", season, date, period);
        let mut points: Vec<GeoPoint> = window.iter().filter_map(|g| self.venues.locate(g)).collect();
        if let Some(next) = upcoming.and_then(|v| self.venues.get(v))
            && !points.is_empty()
        {
            points.push(next);
        }
        points
            .windows(2)
            .map(|leg| haversine_miles(leg[0], leg[1]))
            .sum()
    }
}
