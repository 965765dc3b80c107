use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;

use crate::game::{GameRecord, PlayerGameStat};

/// Read access to historical games and player lines.
pub trait GameSource: Send + Sync {
    fn team_season_games(&self, team: &str, season: &str) -> Result<Vec<Arc<GameRecord>>>;

    fn team_games(&self, team: &str) -> Result<Vec<Arc<GameRecord>>>;

    fn season_games(&self, season: &str) -> Result<Vec<Arc<GameRecord>>>;

    fn game_on(&self, season: &str, date: NaiveDate, team: &str)
    -> Result<Option<Arc<GameRecord>>>;

    fn player_games(&self, player_id: &str) -> Result<Vec<Arc<PlayerGameStat>>>;

    fn team_player_games(&self, team: &str, season: &str) -> Result<Vec<Arc<PlayerGameStat>>>;

    fn season_player_games(&self, season: &str) -> Result<Vec<Arc<PlayerGameStat>>>;
}

type DayGames = HashMap<String, Arc<GameRecord>>;

/// Preloaded, read-only game history keyed `{season: {date: {team: game}}}`.
#[derive(Debug, Default)]
pub struct GameIndex {
    by_season: HashMap<String, BTreeMap<NaiveDate, DayGames>>,
    season_games: HashMap<String, Vec<Arc<GameRecord>>>,
    team_games: HashMap<String, Vec<Arc<GameRecord>>>,
    team_season_games: HashMap<(String, String), Vec<Arc<GameRecord>>>,
    players: HashMap<String, Vec<Arc<PlayerGameStat>>>,
    team_players: HashMap<(String, String), Vec<Arc<PlayerGameStat>>>,
    season_players: HashMap<String, Vec<Arc<PlayerGameStat>>>,
}

impl GameIndex {
    pub fn build<G, P>(games: G, players: P) -> Self
    where
        G: IntoIterator<Item = GameRecord>,
        P: IntoIterator<Item = PlayerGameStat>,
    {
        let mut index = GameIndex::default();
        for game in games {
            index.insert_game(Arc::new(game));
        }
        for row in players {
            index.insert_player_game(Arc::new(row));
        }
        index.sort_lists();
        index
    }

    fn insert_game(&mut self, game: Arc<GameRecord>) {
        let day = self
            .by_season
            .entry(game.season.clone())
            .or_default()
            .entry(game.date)
            .or_default();
        day.insert(game.home_team.clone(), game.clone());
        day.insert(game.away_team.clone(), game.clone());

        self.season_games
            .entry(game.season.clone())
            .or_default()
            .push(game.clone());
        for team in [&game.home_team, &game.away_team] {
            self.team_games
                .entry(team.clone())
                .or_default()
                .push(game.clone());
            self.team_season_games
                .entry((team.clone(), game.season.clone()))
                .or_default()
                .push(game.clone());
        }
    }

    fn insert_player_game(&mut self, row: Arc<PlayerGameStat>) {
        self.players
            .entry(row.player_id.clone())
            .or_default()
            .push(row.clone());
        self.team_players
            .entry((row.team.clone(), row.season.clone()))
            .or_default()
            .push(row.clone());
        self.season_players
            .entry(row.season.clone())
            .or_default()
            .push(row);
    }

    fn sort_lists(&mut self) {
        let by_game = |a: &Arc<GameRecord>, b: &Arc<GameRecord>| {
            a.date.cmp(&b.date).then_with(|| a.game_id.cmp(&b.game_id))
        };
        for list in self.season_games.values_mut() {
            list.sort_by(by_game);
            list.dedup_by(|a, b| a.game_id == b.game_id);
        }
        for list in self.team_games.values_mut() {
            list.sort_by(by_game);
            list.dedup_by(|a, b| a.game_id == b.game_id);
        }
        for list in self.team_season_games.values_mut() {
            list.sort_by(by_game);
            list.dedup_by(|a, b| a.game_id == b.game_id);
        }
        let by_row = |a: &Arc<PlayerGameStat>, b: &Arc<PlayerGameStat>| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.player_id.cmp(&b.player_id))
        };
        for list in self.players.values_mut() {
            list.sort_by(by_row);
        }
        for list in self.team_players.values_mut() {
            list.sort_by(by_row);
        }
        for list in self.season_players.values_mut() {
            list.sort_by(by_row);
        }
    }

    pub fn games_on(&self, season: &str, date: NaiveDate) -> Option<&DayGames> {
        self.by_season.get(season)?.get(&date)
    }

    pub fn game_count(&self) -> usize {
        self.season_games.values().map(Vec::len).sum()
    }
}

impl GameSource for GameIndex {
    fn team_season_games(&self, team: &str, season: &str) -> Result<Vec<Arc<GameRecord>>> {
        Ok(self
            .team_season_games
            .get(&(team.to_string(), season.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn team_games(&self, team: &str) -> Result<Vec<Arc<GameRecord>>> {
        Ok(self.team_games.get(team).cloned().unwrap_or_default())
    }

    fn season_games(&self, season: &str) -> Result<Vec<Arc<GameRecord>>> {
        Ok(self.season_games.get(season).cloned().unwrap_or_default())
    }

    fn game_on(
        &self,
        season: &str,
        date: NaiveDate,
        team: &str,
    ) -> Result<Option<Arc<GameRecord>>> {
        Ok(self
            .games_on(season, date)
            .and_then(|day| day.get(team))
            .cloned())
    }

    fn player_games(&self, player_id: &str) -> Result<Vec<Arc<PlayerGameStat>>> {
        Ok(self.players.get(player_id).cloned().unwrap_or_default())
    }

    fn team_player_games(&self, team: &str, season: &str) -> Result<Vec<Arc<PlayerGameStat>>> {
        Ok(self
            .team_players
            .get(&(team.to_string(), season.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn season_player_games(&self, season: &str) -> Result<Vec<Arc<PlayerGameStat>>> {
        Ok(self.season_players.get(season).cloned().unwrap_or_default())
    }
}
