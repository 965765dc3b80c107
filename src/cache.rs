use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::game::{GameRecord, PlayerGameStat};
use crate::injury_impact::{SeverityTimeline, TeamAggregate};
use crate::per::LeagueTimeline;

pub type GameWindow = Arc<[Arc<GameRecord>]>;
pub type PlayerRows = Arc<[Arc<PlayerGameStat>]>;

pub struct Memo<K, V> {
    entries: RefCell<HashMap<K, V>>,
    hits: Cell<u64>,
    misses: Cell<u64>,
}

impl<K, V> Default for Memo<K, V> {
    fn default() -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            hits: Cell::new(0),
            misses: Cell::new(0),
        }
    }
}

impl<K: Eq + Hash, V: Clone> Memo<K, V> {
    pub fn get(&self, key: &K) -> Option<V> {
        let found = self.entries.borrow().get(key).cloned();
        match found {
            Some(_) => self.hits.set(self.hits.get() + 1),
            None => self.misses.set(self.misses.get() + 1),
        }
        found
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.borrow_mut().insert(key, value);
    }

    /// `f` runs with no borrow held, so it may consult this or any other memo.
    pub fn get_or_insert_with(&self, key: K, f: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = f();
        self.insert(key, value.clone());
        value
    }

    /// Removes the entry so it can be extended in place and re-inserted.
    pub fn take(&self, key: &K) -> Option<V> {
        let found = self.entries.borrow_mut().remove(key);
        match found {
            Some(_) => self.hits.set(self.hits.get() + 1),
            None => self.misses.set(self.misses.get() + 1),
        }
        found
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    fn counters(&self) -> (u64, u64) {
        (self.hits.get(), self.misses.get())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WindowScope {
    Season,
    Days(u32),
    Months(u32),
    Games(u32),
    H2h {
        opponent: String,
        last: Option<u32>,
        home_only: bool,
        season_only: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub team: String,
    pub season: String,
    pub date: NaiveDate,
    pub scope: WindowScope,
}

pub type TeamSeason = (String, String);
pub type TeamDateKey = (String, String, NaiveDate);

#[derive(Default)]
pub struct SessionCache {
    pub(crate) windows: Memo<WindowKey, GameWindow>,
    pub(crate) schedules: Memo<TeamSeason, GameWindow>,
    pub(crate) all_seasons: Memo<String, GameWindow>,
    pub(crate) current_games: Memo<TeamDateKey, Option<Arc<GameRecord>>>,
    pub(crate) team_aggregates: Memo<TeamDateKey, Arc<TeamAggregate>>,
    pub(crate) severity: Memo<TeamSeason, SeverityTimeline>,
    pub(crate) elo: Memo<(String, NaiveDate), Arc<HashMap<String, f64>>>,
    pub(crate) league_totals: Memo<String, Arc<LeagueTimeline>>,
    pub(crate) player_history: Memo<String, PlayerRows>,
    pub(crate) team_players: Memo<TeamSeason, PlayerRows>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub windows: usize,
    pub team_aggregates: usize,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CacheStats {
        let counters = [
            self.windows.counters(),
            self.schedules.counters(),
            self.all_seasons.counters(),
            self.current_games.counters(),
            self.team_aggregates.counters(),
            self.severity.counters(),
            self.elo.counters(),
            self.league_totals.counters(),
            self.player_history.counters(),
            self.team_players.counters(),
        ];
        CacheStats {
            hits: counters.iter().map(|c| c.0).sum(),
            misses: counters.iter().map(|c| c.1).sum(),
            windows: self.windows.len(),
            team_aggregates: self.team_aggregates.len(),
        }
    }
}
