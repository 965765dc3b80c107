use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use approx::assert_relative_eq;
use chrono::NaiveDate;

use matchup_features::historical_dataset::{open_in_memory, upsert_games, upsert_player_games, upsert_venues};
use matchup_features::injury_impact::InjuryCalculator;
use matchup_features::{
    BulkOptions, ENGINE_VERSION, FeatureEngine, GameIndex, GameRecord, LeagueConfig, Matchup, PlayerGameStat,
    SessionCache, SqliteGameSource, VenueCache,
};

const DESCRIPTORS: &[&str] = &[
    "points|games_3|avg|home",
    "effective_fg_perc_net|season|raw|diff",
    "off_rtg|blend:games_2:0.7/season:0.3|raw|diff",
    "three_rate|season|raw|home",
    "margin|season|eb|diff",
    "margin_h2h|none|avg|home",
    "h2h_win_pct|none|beta|home",
    "close_win_pct|season|avg|away",
    "pace_interaction|games_5|raw|none",
    "exp_points_matchup|season|raw|diff",
    "days_rest|none|raw|diff",
    "first_of_b2b|none|raw|home",
    "travel|days_14|raw|away",
    "elo_prob|none|raw|home",
    "per_top1|none|raw|diff",
    "inj_weighted_per_share|none|raw|away",
    "inj_severity_season|none|raw|away",
];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

fn games() -> Vec<GameRecord> {
    serde_json::from_str(&read_fixture("games.json")).expect("games fixture should parse")
}

fn players() -> Vec<PlayerGameStat> {
    serde_json::from_str(&read_fixture("players.json")).expect("players fixture should parse")
}

fn venues() -> VenueCache {
    serde_json::from_str(&read_fixture("venues.json")).expect("venues fixture should parse")
}

fn matchups() -> Vec<Matchup> {
    games()
        .iter()
        .filter(|g| g.game_type == "regular")
        .map(Matchup::from_game)
        .rev()
        .collect()
}

#[test]
fn sqlite_fallback_matches_preloaded_index() {
    init_tracing();
    let cfg = LeagueConfig::nba();
    let venues = venues();
    let mut conn = open_in_memory(&cfg).expect("in-memory db");
    upsert_games(&mut conn, &cfg, &games()).expect("games stored");
    upsert_player_games(&mut conn, &cfg, &players()).expect("players stored");
    upsert_venues(&mut conn, &cfg, &venues).expect("venues stored");
    let sqlite = SqliteGameSource::new(conn, &cfg).expect("sqlite source");
    let index = GameIndex::build(games(), players());

    let from_index = FeatureEngine::new(&index, &cfg, &venues);
    let from_sqlite = FeatureEngine::new(&sqlite, &cfg, &venues);
    for m in matchups() {
        let a = from_index.compute(&m, DESCRIPTORS, &SessionCache::new());
        let b = from_sqlite.compute(&m, DESCRIPTORS, &SessionCache::new());
        assert_eq!(a.len(), DESCRIPTORS.len());
        for d in DESCRIPTORS {
            assert_relative_eq!(a[*d], b[*d], epsilon = 1e-9);
        }
    }
}

#[test]
fn bulk_matches_sequential_and_is_chronological() {
    init_tracing();
    let cfg = LeagueConfig::nba();
    let venues = venues();
    let index = GameIndex::build(games(), players());
    let engine = FeatureEngine::new(&index, &cfg, &venues);

    let seen = Mutex::new(Vec::new());
    let progress = |done: usize, total: usize| {
        seen.lock().unwrap().push((done, total));
    };
    let options = BulkOptions {
        threads: 2,
        chunk_size: 2,
    };
    let input = matchups();
    let rows = engine.generate_bulk(&input, DESCRIPTORS, options, Some(&progress));

    assert_eq!(rows.len(), input.len());
    assert!(rows.iter().all(|r| r.engine_version == ENGINE_VERSION));
    assert!(rows.windows(2).all(|p| p[0].date <= p[1].date));
    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.iter().map(|(d, _)| *d).max(), Some(input.len()));

    let shared = SessionCache::new();
    for row in &rows {
        let m = input
            .iter()
            .find(|m| m.game_id == row.game_id)
            .expect("row maps to an input matchup");
        let sequential = engine.compute(m, DESCRIPTORS, &shared);
        assert_eq!(row.features, sequential);
    }
}

#[test]
fn season_severity_extends_incrementally() {
    let cfg = LeagueConfig::nba();
    let index = GameIndex::build(games(), players());
    let date = NaiveDate::from_ymd_opt(2023, 11, 30).expect("valid date");

    let warm = SessionCache::new();
    let calc = InjuryCalculator::new(&index, &cfg, &warm);
    for d in ["2023-11-04", "2023-11-06", "2023-11-08"] {
        let d = NaiveDate::parse_from_str(d, "%Y-%m-%d").expect("valid date");
        calc.season_severity("MIA", "2023-2024", d);
    }
    let incremental = calc.season_severity("MIA", "2023-2024", date);

    let cold = SessionCache::new();
    let fresh = InjuryCalculator::new(&index, &cfg, &cold).season_severity("MIA", "2023-2024", date);
    assert_relative_eq!(incremental, fresh, epsilon = 1e-12);
    assert!(fresh > 0.0);
}
