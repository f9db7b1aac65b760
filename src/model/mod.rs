//! Wire payload types.
//!
//! Every payload crossing the network boundary has an explicit schema
//! here and is validated before it enters client state.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Sensor metrics tracked by the dashboard.
///
/// Serde names match the wire exactly; `/data/{metric}` paths use the
/// same spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "temperature")]
    Temperature,
    #[serde(rename = "pH")]
    Ph,
    #[serde(rename = "ORP")]
    Orp,
    #[serde(rename = "TDS")]
    Tds,
    #[serde(rename = "EC")]
    Ec,
    #[serde(rename = "distance")]
    Distance,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Temperature,
        Metric::Ph,
        Metric::Orp,
        Metric::Tds,
        Metric::Ec,
        Metric::Distance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Ph => "pH",
            Metric::Orp => "ORP",
            Metric::Tds => "TDS",
            Metric::Ec => "EC",
            Metric::Distance => "distance",
        }
    }

    /// Display unit for log messages.
    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Temperature => "°C",
            Metric::Ph => "",
            Metric::Orp => "mV",
            Metric::Tds => "ppm",
            Metric::Ec => "μS/cm",
            Metric::Distance => "cm",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sensor reading: value plus collection time in seconds since epoch.
///
/// Immutable once received; a newer reading supersedes it wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: f64,
    pub time: f64,
}

/// Wire shape of `/api/latest` responses and live-channel messages.
///
/// An `error` field marks a non-data message; such payloads never reach
/// the snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatestPayload {
    pub temperature: Option<Reading>,
    #[serde(rename = "pH")]
    pub ph: Option<Reading>,
    #[serde(rename = "ORP")]
    pub orp: Option<Reading>,
    #[serde(rename = "TDS")]
    pub tds: Option<Reading>,
    #[serde(rename = "EC")]
    pub ec: Option<Reading>,
    pub distance: Option<Reading>,
    #[serde(rename = "deviceID", skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl LatestPayload {
    pub fn reading(&self, metric: Metric) -> Option<Reading> {
        match metric {
            Metric::Temperature => self.temperature,
            Metric::Ph => self.ph,
            Metric::Orp => self.orp,
            Metric::Tds => self.tds,
            Metric::Ec => self.ec,
            Metric::Distance => self.distance,
        }
    }

    /// True when this payload carries sensor data rather than an error
    /// envelope.
    pub fn is_data(&self) -> bool {
        self.error.is_none()
    }
}

/// Most-recent reading per metric, replaced atomically on each
/// successful fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorSnapshot {
    pub readings: HashMap<Metric, Reading>,
    pub device_id: Option<String>,
}

impl SensorSnapshot {
    pub fn from_payload(payload: &LatestPayload) -> Self {
        let mut readings = HashMap::new();
        for metric in Metric::ALL {
            if let Some(reading) = payload.reading(metric) {
                readings.insert(metric, reading);
            }
        }
        Self {
            readings,
            device_id: payload.device_id.clone(),
        }
    }

    pub fn reading(&self, metric: Metric) -> Option<Reading> {
        self.readings.get(&metric).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// One point of a historical series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub time: f64,
    pub value: f64,
}

/// Historical series per metric, populated lazily and replaced
/// wholesale per metric.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeriesStore {
    series: HashMap<Metric, Vec<SeriesPoint>>,
}

impl TimeSeriesStore {
    /// Replace a metric's series. Points are kept in ascending time
    /// order regardless of server ordering.
    pub fn replace(&mut self, metric: Metric, mut points: Vec<SeriesPoint>) {
        points.sort_by(|a, b| a.time.total_cmp(&b.time));
        self.series.insert(metric, points);
    }

    pub fn get(&self, metric: Metric) -> Option<&[SeriesPoint]> {
        self.series.get(&metric).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CpuInfo {
    pub percent: f64,
    pub cores: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct UsageInfo {
    pub percent: f64,
}

/// Host resource utilization from `/api/system/info`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemInfo {
    pub cpu: Option<CpuInfo>,
    pub memory: Option<UsageInfo>,
    pub disk: Option<UsageInfo>,
    pub network: Option<UsageInfo>,
    pub uptime: Option<String>,
    #[serde(rename = "lastBoot")]
    pub last_boot: Option<String>,
    pub os: Option<String>,
}

/// Push notification payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushMessage {
    pub message: Option<String>,
    pub url: Option<String>,
}
