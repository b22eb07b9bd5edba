pub mod config;
pub mod model;
pub mod scenario;
pub mod seed;

pub use config::{ConfigError, SimConfig, SimConfigOverride};
pub use model::{
    CongestionAlgorithm, CongestionBand, EventKind, EventLogEntry, MetricsSample, NetworkNode,
    NetworkUser, NewUser, NodeKind, ParseLabelError, TrafficType, UserPatch, format_clock,
};
pub use scenario::{Scenario, ScenarioAction};
pub use seed::{seed_nodes, seed_users};
