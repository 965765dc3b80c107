//! Matchup feature computation for team-sport outcome models.

pub mod betting_lines;
pub mod cache;
pub mod composite;
pub mod descriptor;
pub mod elo;
pub mod engine;
pub mod game;
pub mod game_index;
pub mod historical_dataset;
pub mod injury_impact;
pub mod league_config;
pub mod per;
pub mod schedule;
pub mod stats;
pub mod window;

pub use cache::SessionCache;
pub use descriptor::{CalcWeight, DescriptorError, FeatureDescriptor, Perspective, TimePeriod};
pub use engine::{BulkOptions, ENGINE_VERSION, FeatureEngine, FeatureMap, FeatureRow, Matchup};
pub use game::{BettingLine, GameRecord, PlayerGameStat, Side, TeamBox};
pub use game_index::{GameIndex, GameSource};
pub use historical_dataset::SqliteGameSource;
pub use league_config::LeagueConfig;
pub use schedule::{GeoPoint, VenueCache};
