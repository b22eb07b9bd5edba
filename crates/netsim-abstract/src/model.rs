use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use thiserror::Error;

/// Returned when a user-visible label does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseLabelError {
    kind: &'static str,
    value: String,
}

impl ParseLabelError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

fn normalize(label: &str) -> String {
    label
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Role of a node in the fixed topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    User,
    Router,
    Server,
}

impl NodeKind {
    /// Multiplier applied to the network-wide congestion scalar.
    /// Routers sit on the bottleneck and run hotter, servers cooler.
    pub fn congestion_scale(self) -> f64 {
        match self {
            NodeKind::User => 1.0,
            NodeKind::Router => 1.2,
            NodeKind::Server => 0.8,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            NodeKind::User => "User",
            NodeKind::Router => "Router",
            NodeKind::Server => "Server",
        }
    }
}

/// Colour band of a congestion level as shown on the topology panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionBand {
    Low,
    Elevated,
    Critical,
}

impl CongestionBand {
    pub fn from_level(level: f64) -> Self {
        if level > 0.8 {
            CongestionBand::Critical
        } else if level > 0.5 {
            CongestionBand::Elevated
        } else {
            CongestionBand::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// 0 (idle) to 1 (saturated).
    pub congestion_level: f64,
}

impl NetworkNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            congestion_level: 0.0,
        }
    }

    pub fn band(&self) -> CongestionBand {
        CongestionBand::from_level(self.congestion_level)
    }

    /// Short label such as `Router 1` for the node `router-1`.
    pub fn display_name(&self) -> String {
        match self.id.split_once('-') {
            Some((_, suffix)) => format!("{} {}", self.kind.label(), suffix),
            None => self.kind.label().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrafficType {
    #[serde(rename = "Video Stream")]
    VideoStream,
    #[serde(rename = "File Download")]
    FileDownload,
    #[serde(rename = "VoIP Call")]
    VoipCall,
}

impl TrafficType {
    pub const ALL: [TrafficType; 3] = [
        TrafficType::VideoStream,
        TrafficType::FileDownload,
        TrafficType::VoipCall,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TrafficType::VideoStream => "Video Stream",
            TrafficType::FileDownload => "File Download",
            TrafficType::VoipCall => "VoIP Call",
        }
    }

    /// Sending rates (whole Mbps) drawn for a new user that did not specify one.
    pub fn default_rate_range(self) -> RangeInclusive<u32> {
        match self {
            TrafficType::VideoStream => 10..=24,
            TrafficType::FileDownload => 20..=44,
            TrafficType::VoipCall => 2..=6,
        }
    }

    /// What a user of this traffic type is doing, for status messages.
    pub fn activity(self) -> &'static str {
        match self {
            TrafficType::VideoStream => "streaming video",
            TrafficType::FileDownload => "downloading a large file",
            TrafficType::VoipCall => "on a VoIP call",
        }
    }

    pub fn next(self) -> Self {
        match self {
            TrafficType::VideoStream => TrafficType::FileDownload,
            TrafficType::FileDownload => TrafficType::VoipCall,
            TrafficType::VoipCall => TrafficType::VideoStream,
        }
    }

    pub fn prev(self) -> Self {
        self.next().next()
    }
}

impl fmt::Display for TrafficType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TrafficType {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "videostream" | "video" => Ok(TrafficType::VideoStream),
            "filedownload" | "download" | "file" => Ok(TrafficType::FileDownload),
            "voipcall" | "voip" | "call" => Ok(TrafficType::VoipCall),
            _ => Err(ParseLabelError::new("traffic type", s)),
        }
    }
}

/// A mock user generating synthetic traffic. Serialized exactly as the
/// persisted user-list record: `{id, name, trafficType, sendingRate}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkUser {
    pub id: String,
    pub name: String,
    pub traffic_type: TrafficType,
    /// Mbps, never negative.
    pub sending_rate: f64,
}

impl NetworkUser {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        traffic_type: TrafficType,
        sending_rate: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            traffic_type,
            sending_rate,
        }
    }
}

/// Request to add a user. Missing fields are filled in by the store.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewUser {
    pub name: Option<String>,
    pub traffic_type: Option<TrafficType>,
    pub sending_rate: Option<f64>,
}

impl NewUser {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_traffic(mut self, traffic_type: TrafficType) -> Self {
        self.traffic_type = Some(traffic_type);
        self
    }

    pub fn with_rate(mut self, sending_rate: f64) -> Self {
        self.sending_rate = Some(sending_rate);
        self
    }
}

/// Inline edit of an existing user; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub name: Option<String>,
    pub traffic_type: Option<TrafficType>,
    pub sending_rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSample {
    /// Epoch milliseconds.
    pub timestamp: u64,
    /// Mbps.
    pub throughput: f64,
    /// Percentage, 0 to 100.
    pub packet_loss: f64,
    /// Milliseconds.
    pub latency: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Info,
    Warning,
    Success,
}

impl EventKind {
    pub fn icon(self) -> &'static str {
        match self {
            EventKind::Info => "i",
            EventKind::Warning => "!",
            EventKind::Success => "✓",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Wall-clock time of day, `HH:MM:SS`.
    pub timestamp: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
}

impl EventLogEntry {
    pub fn at(now_ms: u64, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: format_clock(now_ms),
            message: message.into(),
            kind,
        }
    }
}

/// Formats epoch milliseconds as a UTC time of day.
pub fn format_clock(epoch_ms: u64) -> String {
    let secs = epoch_ms / 1000;
    let (h, m, s) = ((secs / 3600) % 24, (secs / 60) % 60, secs % 60);
    format!("{h:02}:{m:02}:{s:02}")
}

/// Congestion-control policy applied to the simulated bottleneck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CongestionAlgorithm {
    #[default]
    #[serde(rename = "TCP Reno")]
    TcpReno,
    #[serde(rename = "RED")]
    Red,
    #[serde(rename = "AI-Optimized")]
    AiOptimized,
}

impl CongestionAlgorithm {
    pub const ALL: [CongestionAlgorithm; 3] = [
        CongestionAlgorithm::TcpReno,
        CongestionAlgorithm::Red,
        CongestionAlgorithm::AiOptimized,
    ];

    pub fn label(self) -> &'static str {
        match self {
            CongestionAlgorithm::TcpReno => "TCP Reno",
            CongestionAlgorithm::Red => "RED",
            CongestionAlgorithm::AiOptimized => "AI-Optimized",
        }
    }

    pub fn next(self) -> Self {
        match self {
            CongestionAlgorithm::TcpReno => CongestionAlgorithm::Red,
            CongestionAlgorithm::Red => CongestionAlgorithm::AiOptimized,
            CongestionAlgorithm::AiOptimized => CongestionAlgorithm::TcpReno,
        }
    }
}

impl fmt::Display for CongestionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CongestionAlgorithm {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "tcpreno" | "reno" => Ok(CongestionAlgorithm::TcpReno),
            "red" => Ok(CongestionAlgorithm::Red),
            "aioptimized" | "ai" => Ok(CongestionAlgorithm::AiOptimized),
            _ => Err(ParseLabelError::new("congestion algorithm", s)),
        }
    }
}
