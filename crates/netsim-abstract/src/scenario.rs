use crate::config::SimConfigOverride;
use crate::model::{CongestionAlgorithm, NewUser, TrafficType};
use serde::Deserialize;

/// A scripted session replayed against the simulation store.
#[derive(Deserialize, Debug, Clone)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: SimConfigOverride,
    pub algorithm: Option<CongestionAlgorithm>,
    #[serde(default)]
    pub actions: Vec<ScenarioAction>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioAction {
    /// Add a user; omitted fields get the usual defaults
    AddUser {
        name: Option<String>,
        traffic_type: Option<TrafficType>,
        sending_rate: Option<f64>,
    },
    /// Remove the user with this name (ids are generated at runtime)
    RemoveUser { name: String },
    SetAlgorithm { algorithm: CongestionAlgorithm },
    /// Start the simulation if needed and advance it by `count` ticks
    RunTicks { count: u64 },
    Reset,
}

impl ScenarioAction {
    /// The add-user request carried by an `AddUser` action.
    pub fn new_user(&self) -> Option<NewUser> {
        match self {
            ScenarioAction::AddUser {
                name,
                traffic_type,
                sending_rate,
            } => Some(NewUser {
                name: name.clone(),
                traffic_type: *traffic_type,
                sending_rate: *sending_rate,
            }),
            _ => None,
        }
    }
}
