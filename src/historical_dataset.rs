use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, Params, params};
use serde::de::DeserializeOwned;

use crate::game::{GameRecord, PlayerGameStat};
use crate::game_index::{GameIndex, GameSource};
use crate::league_config::{LeagueConfig, is_valid_collection_name};
use crate::schedule::{GeoPoint, VenueCache};

const DATE_FMT: &str = "%Y-%m-%d";

#[derive(Debug, Clone)]
struct Tables {
    games: String,
    players: String,
    venues: String,
}

impl Tables {
    fn from_config(config: &LeagueConfig) -> Result<Self> {
        for name in [
            &config.games_collection,
            &config.player_collection,
            &config.venue_collection,
        ] {
            if !is_valid_collection_name(name) {
                return Err(anyhow!("invalid collection name {name:?}"));
            }
        }
        Ok(Self {
            games: config.games_collection.clone(),
            players: config.player_collection.clone(),
            venues: config.venue_collection.clone(),
        })
    }
}

pub fn open_db(path: &Path, config: &LeagueConfig) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn, config)?;
    Ok(conn)
}

pub fn open_in_memory(config: &LeagueConfig) -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
    init_schema(&conn, config)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection, config: &LeagueConfig) -> Result<()> {
    let t = Tables::from_config(config)?;
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {games} (
            game_id TEXT PRIMARY KEY,
            season TEXT NOT NULL,
            game_date TEXT NOT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            game_type TEXT NOT NULL,
            record_json TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{games}_season_date ON {games}(season, game_date);
        CREATE INDEX IF NOT EXISTS idx_{games}_home ON {games}(home_team, game_date);
        CREATE INDEX IF NOT EXISTS idx_{games}_away ON {games}(away_team, game_date);

        CREATE TABLE IF NOT EXISTS {players} (
            player_id TEXT NOT NULL,
            game_date TEXT NOT NULL,
            team TEXT NOT NULL,
            season TEXT NOT NULL,
            row_json TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (player_id, game_date)
        );
        CREATE INDEX IF NOT EXISTS idx_{players}_team ON {players}(team, season, game_date);
        CREATE INDEX IF NOT EXISTS idx_{players}_season ON {players}(season, game_date);

        CREATE TABLE IF NOT EXISTS {venues} (
            name TEXT PRIMARY KEY,
            lat REAL NOT NULL,
            lon REAL NOT NULL
        );
        "#,
        games = t.games,
        players = t.players,
        venues = t.venues,
    ))
    .context("create sqlite schema")?;
    Ok(())
}

pub fn upsert_games(conn: &mut Connection, config: &LeagueConfig, games: &[GameRecord]) -> Result<usize> {
    let t = Tables::from_config(config)?;
    let sql = format!(
        r#"
        INSERT INTO {games} (
            game_id, season, game_date, home_team, away_team, game_type, record_json, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(game_id) DO UPDATE SET
            season = excluded.season,
            game_date = excluded.game_date,
            home_team = excluded.home_team,
            away_team = excluded.away_team,
            game_type = excluded.game_type,
            record_json = excluded.record_json,
            updated_at = excluded.updated_at
        "#,
        games = t.games
    );
    let tx = conn.transaction().context("begin games transaction")?;
    let now = Utc::now().to_rfc3339();
    for g in games {
        let json = serde_json::to_string(g).with_context(|| format!("encode game {}", g.game_id))?;
        tx.execute(
            &sql,
            params![
                g.game_id,
                g.season,
                g.date.format(DATE_FMT).to_string(),
                g.home_team,
                g.away_team,
                g.game_type,
                json,
                now,
            ],
        )
        .with_context(|| format!("upsert game {}", g.game_id))?;
    }
    tx.commit().context("commit games transaction")?;
    Ok(games.len())
}

pub fn upsert_player_games(
    conn: &mut Connection,
    config: &LeagueConfig,
    rows: &[PlayerGameStat],
) -> Result<usize> {
    let t = Tables::from_config(config)?;
    let sql = format!(
        r#"
        INSERT INTO {players} (player_id, game_date, team, season, row_json, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(player_id, game_date) DO UPDATE SET
            team = excluded.team,
            season = excluded.season,
            row_json = excluded.row_json,
            updated_at = excluded.updated_at
        "#,
        players = t.players
    );
    let tx = conn.transaction().context("begin player transaction")?;
    let now = Utc::now().to_rfc3339();
    for r in rows {
        let json = serde_json::to_string(r)
            .with_context(|| format!("encode player row {} {}", r.player_id, r.date))?;
        tx.execute(
            &sql,
            params![
                r.player_id,
                r.date.format(DATE_FMT).to_string(),
                r.team,
                r.season,
                json,
                now,
            ],
        )
        .with_context(|| format!("upsert player row {} {}", r.player_id, r.date))?;
    }
    tx.commit().context("commit player transaction")?;
    Ok(rows.len())
}

pub fn upsert_venues(conn: &mut Connection, config: &LeagueConfig, venues: &VenueCache) -> Result<usize> {
    let t = Tables::from_config(config)?;
    let sql = format!(
        "INSERT INTO {venues} (name, lat, lon) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET lat = excluded.lat, lon = excluded.lon",
        venues = t.venues
    );
    let tx = conn.transaction().context("begin venue transaction")?;
    for (name, p) in venues.iter() {
        tx.execute(&sql, params![name, p.lat, p.lon])
            .with_context(|| format!("upsert venue {name}"))?;
    }
    tx.commit().context("commit venue transaction")?;
    Ok(venues.len())
}

fn query_json<T, P>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Arc<T>>>
where
    T: DeserializeOwned,
    P: Params,
{
    let mut stmt = conn.prepare(sql).context("prepare history query")?;
    let rows = stmt
        .query_map(params, |row| row.get::<_, String>(0))
        .context("run history query")?;
    let mut out = Vec::new();
    for row in rows {
        let json = row.context("read history row")?;
        let value: T = serde_json::from_str(&json).context("decode history row")?;
        out.push(Arc::new(value));
    }
    Ok(out)
}

pub fn load_index(conn: &Connection, config: &LeagueConfig) -> Result<GameIndex> {
    let t = Tables::from_config(config)?;
    let games: Vec<Arc<GameRecord>> = query_json(
        conn,
        &format!("SELECT record_json FROM {} ORDER BY game_date ASC, game_id ASC", t.games),
        [],
    )?;
    let players: Vec<Arc<PlayerGameStat>> = query_json(
        conn,
        &format!(
            "SELECT row_json FROM {} ORDER BY game_date ASC, player_id ASC",
            t.players
        ),
        [],
    )?;
    Ok(GameIndex::build(
        games.into_iter().map(Arc::unwrap_or_clone),
        players.into_iter().map(Arc::unwrap_or_clone),
    ))
}

pub fn load_venues(conn: &Connection, config: &LeagueConfig) -> Result<VenueCache> {
    let t = Tables::from_config(config)?;
    let mut stmt = conn
        .prepare(&format!("SELECT name, lat, lon FROM {}", t.venues))
        .context("prepare venue query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                GeoPoint {
                    lat: row.get(1)?,
                    lon: row.get(2)?,
                },
            ))
        })
        .context("query venues")?;
    let mut out = VenueCache::new();
    for row in rows {
        let (name, point) = row.context("decode venue row")?;
        out.insert(name, point);
    }
    Ok(out)
}

/// On-demand queries against the database, shared by the worker pool behind a mutex.
pub struct SqliteGameSource {
    conn: Mutex<Connection>,
    tables: Tables,
}

impl SqliteGameSource {
    pub fn new(conn: Connection, config: &LeagueConfig) -> Result<Self> {
        init_schema(&conn, config)?;
        Ok(Self {
            conn: Mutex::new(conn),
            tables: Tables::from_config(config)?,
        })
    }

    pub fn open(path: &Path, config: &LeagueConfig) -> Result<Self> {
        Self::new(open_db(path, config)?, config)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite connection mutex poisoned"))
    }

    fn games<P: Params>(&self, filter: &str, params: P) -> Result<Vec<Arc<GameRecord>>> {
        let sql = format!(
            "SELECT record_json FROM {} WHERE {filter} ORDER BY game_date ASC, game_id ASC",
            self.tables.games
        );
        let conn = self.lock()?;
        query_json(&conn, &sql, params)
    }

    fn players<P: Params>(&self, filter: &str, params: P) -> Result<Vec<Arc<PlayerGameStat>>> {
        let sql = format!(
            "SELECT row_json FROM {} WHERE {filter} ORDER BY game_date ASC, player_id ASC",
            self.tables.players
        );
        let conn = self.lock()?;
        query_json(&conn, &sql, params)
    }
}

impl GameSource for SqliteGameSource {
    fn team_season_games(&self, team: &str, season: &str) -> Result<Vec<Arc<GameRecord>>> {
        self.games(
            "season = ?1 AND (home_team = ?2 OR away_team = ?2)",
            params![season, team],
        )
    }

    fn team_games(&self, team: &str) -> Result<Vec<Arc<GameRecord>>> {
        self.games("home_team = ?1 OR away_team = ?1", params![team])
    }

    fn season_games(&self, season: &str) -> Result<Vec<Arc<GameRecord>>> {
        self.games("season = ?1", params![season])
    }

    fn game_on(&self, season: &str, date: NaiveDate, team: &str) -> Result<Option<Arc<GameRecord>>> {
        let found = self.games(
            "season = ?1 AND game_date = ?2 AND (home_team = ?3 OR away_team = ?3)",
            params![season, date.format(DATE_FMT).to_string(), team],
        )?;
        Ok(found.into_iter().next())
    }

    fn player_games(&self, player_id: &str) -> Result<Vec<Arc<PlayerGameStat>>> {
        self.players("player_id = ?1", params![player_id])
    }

    fn team_player_games(&self, team: &str, season: &str) -> Result<Vec<Arc<PlayerGameStat>>> {
        self.players("team = ?1 AND season = ?2", params![team, season])
    }

    fn season_player_games(&self, season: &str) -> Result<Vec<Arc<PlayerGameStat>>> {
        self.players("season = ?1", params![season])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::test_support::{day, game};

    fn row(player: &str, team: &str, date: &str) -> PlayerGameStat {
        PlayerGameStat {
            player_id: player.to_string(),
            team: team.to_string(),
            season: "2023-2024".to_string(),
            date: day(date),
            minutes: 30.0,
            points: 20,
            ..PlayerGameStat::default()
        }
    }

    fn seeded() -> (Connection, LeagueConfig) {
        let cfg = LeagueConfig::nba();
        let mut conn = open_in_memory(&cfg).unwrap();
        upsert_games(
            &mut conn,
            &cfg,
            &[
                game("g2", "2024-01-03", "NYK", "BOS", 100, 90),
                game("g1", "2024-01-01", "BOS", "NYK", 100, 90),
                game("g3", "2024-01-04", "MIA", "LAL", 100, 90),
            ],
        )
        .unwrap();
        upsert_player_games(
            &mut conn,
            &cfg,
            &[row("p1", "BOS", "2024-01-03"), row("p1", "BOS", "2024-01-01")],
        )
        .unwrap();
        (conn, cfg)
    }

    #[test]
    fn queries_come_back_sorted() {
        let (conn, cfg) = seeded();
        let src = SqliteGameSource::new(conn, &cfg).unwrap();
        let games = src.team_season_games("BOS", "2023-2024").unwrap();
        let ids: Vec<&str> = games.iter().map(|g| g.game_id.as_str()).collect();
        assert_eq!(ids, vec!["g1", "g2"]);
        assert_eq!(src.season_games("2023-2024").unwrap().len(), 3);
        assert!(src.game_on("2023-2024", day("2024-01-04"), "LAL").unwrap().is_some());
        assert!(src.game_on("2023-2024", day("2024-01-04"), "BOS").unwrap().is_none());
        let rows = src.player_games("p1").unwrap();
        assert!(rows[0].date < rows[1].date);
    }

    #[test]
    fn upsert_replaces_existing_rows() {
        let (mut conn, cfg) = seeded();
        upsert_games(&mut conn, &cfg, &[game("g1", "2024-01-01", "BOS", "NYK", 120, 90)]).unwrap();
        let idx = load_index(&conn, &cfg).unwrap();
        assert_eq!(idx.game_count(), 3);
        let g = idx.game_on("2023-2024", day("2024-01-01"), "BOS").unwrap().unwrap();
        assert_eq!(g.home.points, 120);
    }

    #[test]
    fn venues_round_trip_through_the_table() {
        let (mut conn, cfg) = seeded();
        let mut venues = VenueCache::new();
        venues.insert("BOS Arena", GeoPoint { lat: 42.366, lon: -71.062 });
        upsert_venues(&mut conn, &cfg, &venues).unwrap();
        let loaded = load_venues(&conn, &cfg).unwrap();
        assert_eq!(loaded.get("BOS Arena"), venues.get("BOS Arena"));
    }

    #[test]
    fn rejects_unsafe_table_names() {
        let mut cfg = LeagueConfig::nba();
        cfg.games_collection = "games; DROP TABLE x".to_string();
        assert!(open_in_memory(&cfg).is_err());
    }
}
