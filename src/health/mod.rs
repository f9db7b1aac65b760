//! Derived health state.
//!
//! Pure arithmetic over the sensor snapshot: per-metric status
//! classification, tank fill percentage, temperature unit conversion,
//! and the overall health assessment with its recommendations.

pub mod activity;

use std::collections::HashMap;

use crate::config::{Settings, TemperatureUnit};
use crate::model::{Metric, SensorSnapshot};

/// Status badge for a scalar metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Good,
    /// Below the good range but still inside the ok range.
    Low,
    /// Above the good range but still inside the ok range.
    High,
    TooLow,
    TooHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
    Alert,
}

impl Status {
    pub fn label(&self) -> &'static str {
        match self {
            Status::Good => "Good",
            Status::Low => "Low",
            Status::High => "High",
            Status::TooLow => "Too Low",
            Status::TooHigh => "Too High",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Status::Good => Severity::Normal,
            Status::Low | Status::High => Severity::Warning,
            Status::TooLow | Status::TooHigh => Severity::Alert,
        }
    }
}

/// Water-level badge. Lower distance means a fuller tank, so the scale
/// is reversed and has its own labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelStatus {
    Good,
    Ok,
    Low,
}

impl LevelStatus {
    pub fn label(&self) -> &'static str {
        match self {
            LevelStatus::Good => "Good",
            LevelStatus::Ok => "OK",
            LevelStatus::Low => "Low",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            LevelStatus::Good => Severity::Normal,
            LevelStatus::Ok => Severity::Warning,
            LevelStatus::Low => Severity::Alert,
        }
    }
}

/// Good/ok value ranges for a scalar metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ranges {
    pub good_low: f64,
    pub good_high: f64,
    pub ok_low: f64,
    pub ok_high: f64,
}

/// Ideal and acceptable ranges per metric. Water level is handled by
/// [`classify_level`] instead.
pub fn ranges_for(metric: Metric) -> Option<Ranges> {
    match metric {
        Metric::Temperature => Some(Ranges { good_low: 18.0, good_high: 25.0, ok_low: 15.0, ok_high: 30.0 }),
        Metric::Ph => Some(Ranges { good_low: 5.5, good_high: 6.5, ok_low: 5.0, ok_high: 7.0 }),
        Metric::Orp => Some(Ranges { good_low: 300.0, good_high: 400.0, ok_low: 200.0, ok_high: 500.0 }),
        Metric::Tds => Some(Ranges { good_low: 100.0, good_high: 300.0, ok_low: 50.0, ok_high: 400.0 }),
        Metric::Ec => Some(Ranges { good_low: 10.0, good_high: 25.0, ok_low: 5.0, ok_high: 35.0 }),
        Metric::Distance => None,
    }
}

/// Classify a value against its ranges.
///
/// The ok range is boundary-inclusive: a value exactly on the ok bound
/// is a warning, not an alert.
pub fn classify(value: f64, ranges: Ranges) -> Status {
    if value >= ranges.good_low && value <= ranges.good_high {
        Status::Good
    } else if value >= ranges.ok_low && value <= ranges.ok_high {
        if value < ranges.good_low {
            Status::Low
        } else {
            Status::High
        }
    } else if value < ranges.ok_low {
        Status::TooLow
    } else {
        Status::TooHigh
    }
}

/// Classify a distance reading against the tank calibration.
pub fn classify_level(distance: f64, settings: &Settings) -> LevelStatus {
    let range = settings.tank_range();
    let good_high = settings.tank_min_distance + range * 0.3;
    let ok_high = settings.tank_min_distance + range * 0.7;

    if distance <= good_high {
        LevelStatus::Good
    } else if distance <= ok_high {
        LevelStatus::Ok
    } else {
        LevelStatus::Low
    }
}

/// Tank fill percentage from a distance reading: the closer the surface,
/// the fuller the tank. Clamped to 0–100.
pub fn fill_percentage(distance: f64, settings: &Settings) -> f64 {
    let range = settings.tank_range();
    if range <= 0.0 {
        return 0.0;
    }
    let drained = ((distance - settings.tank_min_distance) / range * 100.0).clamp(0.0, 100.0);
    100.0 - drained
}

/// Convert a celsius reading for display.
pub fn display_temperature(celsius: f64, unit: TemperatureUnit) -> f64 {
    match unit {
        TemperatureUnit::Celsius => celsius,
        TemperatureUnit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
    }
}

/// Overall condition bucket derived from the health score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Good,
    Fair,
    Poor,
}

impl Condition {
    pub fn label(&self) -> &'static str {
        match self {
            Condition::Good => "Good Condition",
            Condition::Fair => "Fair Condition",
            Condition::Poor => "Poor Condition",
        }
    }
}

/// Result of a full health assessment.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthAssessment {
    /// 0–100 overall health score.
    pub overall_health: f64,
    /// 0–100 water quality score.
    pub water_quality: f64,
    pub condition: Condition,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

impl HealthAssessment {
    /// The recommendation shown to the user: the first (most important)
    /// one, or the all-clear text.
    pub fn primary_recommendation(&self) -> &str {
        self.recommendations.first().map(String::as_str).unwrap_or(
            "All parameters are within optimal ranges. Continue current care regimen.",
        )
    }
}

/// Score the snapshot. Metrics missing from the snapshot contribute no
/// deduction.
pub fn assess(snapshot: &SensorSnapshot, settings: &Settings) -> HealthAssessment {
    let mut overall: f64 = 100.0;
    let mut water: f64 = 100.0;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    if let Some(reading) = snapshot.reading(Metric::Temperature) {
        let temp = reading.value;
        if !(18.0..=25.0).contains(&temp) {
            overall -= 10.0;
            issues.push("Temperature".to_string());
            if temp < 18.0 {
                recommendations.push(
                    "Temperature is below optimal range. Consider raising the ambient temperature."
                        .to_string(),
                );
            } else {
                recommendations.push(
                    "Temperature is above optimal range. Consider cooling the environment."
                        .to_string(),
                );
            }
        }
    }

    if let Some(reading) = snapshot.reading(Metric::Ph) {
        let ph = reading.value;
        if !(5.5..=6.5).contains(&ph) {
            overall -= 15.0;
            water -= 20.0;
            issues.push("pH".to_string());
            if ph < 5.5 {
                recommendations
                    .push("pH is too low. Add pH UP solution to raise the pH level.".to_string());
            } else {
                recommendations
                    .push("pH is too high. Add pH DOWN solution to lower the pH level.".to_string());
            }
        }
    }

    if let Some(reading) = snapshot.reading(Metric::Tds) {
        let tds = reading.value;
        if !(100.0..=300.0).contains(&tds) {
            overall -= 15.0;
            water -= 30.0;
            issues.push("TDS".to_string());
            if tds < 100.0 {
                recommendations.push(
                    "Nutrient concentration (TDS) is low. Add more nutrient solution.".to_string(),
                );
            } else {
                recommendations.push(
                    "Nutrient concentration (TDS) is high. Dilute the nutrient solution with water."
                        .to_string(),
                );
            }
        }
    }

    if let Some(reading) = snapshot.reading(Metric::Ec) {
        let ec = reading.value;
        if !(10.0..=25.0).contains(&ec) {
            water -= 15.0;
            issues.push("EC".to_string());
            if ec < 10.0 {
                recommendations.push(
                    "Water conductivity (EC) is low. Check and adjust nutrient levels.".to_string(),
                );
            } else {
                recommendations
                    .push("Water conductivity (EC) is high. Dilute the nutrient solution.".to_string());
            }
        }
    }

    if let Some(reading) = snapshot.reading(Metric::Distance) {
        if classify_level(reading.value, settings) == LevelStatus::Low {
            overall -= 10.0;
            issues.push("Water Level".to_string());
            recommendations.push("Water level is low. Refill the water tank.".to_string());
        }
    }

    let overall_health = overall.clamp(0.0, 100.0);
    let water_quality = water.clamp(0.0, 100.0);

    let condition = if overall_health < 60.0 {
        Condition::Poor
    } else if overall_health < 80.0 {
        Condition::Fair
    } else {
        Condition::Good
    };

    HealthAssessment {
        overall_health,
        water_quality,
        condition,
        issues,
        recommendations,
    }
}

/// Everything the presenter needs to render one snapshot: per-metric
/// badges, tank state, the display temperature, and the assessment.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotView {
    pub statuses: HashMap<Metric, Status>,
    pub level: Option<LevelStatus>,
    pub fill_percentage: Option<f64>,
    /// Temperature converted to the configured unit.
    pub display_temperature: Option<f64>,
    pub assessment: HealthAssessment,
}

/// Derive the full presenter view of a snapshot.
pub fn view(snapshot: &SensorSnapshot, settings: &Settings) -> SnapshotView {
    let mut statuses = HashMap::new();
    for metric in Metric::ALL {
        let (reading, ranges) = match (snapshot.reading(metric), ranges_for(metric)) {
            (Some(reading), Some(ranges)) => (reading, ranges),
            _ => continue,
        };
        statuses.insert(metric, classify(reading.value, ranges));
    }

    let distance = snapshot.reading(Metric::Distance).map(|r| r.value);
    let level = distance.map(|d| classify_level(d, settings));
    let fill = distance.map(|d| fill_percentage(d, settings));

    let display_temp = snapshot
        .reading(Metric::Temperature)
        .map(|r| display_temperature(r.value, settings.temperature_unit));

    SnapshotView {
        statuses,
        level,
        fill_percentage: fill,
        display_temperature: display_temp,
        assessment: assess(snapshot, settings),
    }
}
