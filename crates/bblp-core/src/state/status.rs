//! Read-only projections over a [`StateSnapshot`].

use std::fmt;

use chrono::{DateTime, Local};

use super::snapshot::{StateSnapshot, StatusField, as_float, as_integer};
use crate::protocol::constants::{PRINT_STAGE_IDLE, PRINT_STAGE_PAUSED, PRINT_STAGE_PRINTING};

/// Placeholder shown when the job name has not been reported.
pub const UNKNOWN_TASK: &str = "Unknown";
/// Placeholder shown when no remaining time has been reported.
pub const UNKNOWN_ETA: &str = "??:??";

/// `mc_print_stage` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintStage {
    Idle,
    Printing,
    /// Also reported when filament runs out.
    Paused,
    Other(i64),
}

impl PrintStage {
    pub fn from_code(code: i64) -> Self {
        match code {
            PRINT_STAGE_IDLE => PrintStage::Idle,
            PRINT_STAGE_PRINTING => PrintStage::Printing,
            PRINT_STAGE_PAUSED => PrintStage::Paused,
            other => PrintStage::Other(other),
        }
    }
}

impl fmt::Display for PrintStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrintStage::Idle => write!(f, "Idle"),
            PrintStage::Printing => write!(f, "Printing"),
            PrintStage::Paused => write!(f, "Paused"),
            PrintStage::Other(n) => write!(f, "Stage {}", n),
        }
    }
}

/// Typed view of the tracked push-status fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrintStatus {
    pub percent: Option<i64>,
    pub remaining_minutes: Option<i64>,
    pub layer_num: Option<i64>,
    pub wifi_signal: Option<String>,
    pub stage: Option<PrintStage>,
    pub sub_stage: Option<i64>,
    pub nozzle_temp: Option<f64>,
    pub chamber_temp: Option<f64>,
    pub task_name: Option<String>,
}

impl PrintStatus {
    pub fn from_snapshot(snapshot: &StateSnapshot) -> Self {
        let int = |f| snapshot.get(f).and_then(as_integer);
        let float = |f| snapshot.get(f).and_then(as_float);
        let text = |f| {
            snapshot.get(f).map(|v| match v.as_str() {
                Some(s) => s.to_string(),
                None => v.to_string(),
            })
        };

        Self {
            percent: int(StatusField::Percent),
            remaining_minutes: int(StatusField::RemainingMinutes),
            layer_num: int(StatusField::LayerNum),
            wifi_signal: text(StatusField::WifiSignal),
            stage: int(StatusField::Stage).map(PrintStage::from_code),
            sub_stage: int(StatusField::SubStage),
            nozzle_temp: float(StatusField::NozzleTemp),
            chamber_temp: float(StatusField::ChamberTemp),
            task_name: text(StatusField::TaskName),
        }
    }
}

impl StateSnapshot {
    pub fn status(&self) -> PrintStatus {
        PrintStatus::from_snapshot(self)
    }

    pub fn stage(&self) -> Option<PrintStage> {
        self.get(StatusField::Stage)
            .and_then(as_integer)
            .map(PrintStage::from_code)
    }

    /// Human-readable stage; raw values that are not numbers render as-is.
    pub fn stage_name(&self) -> String {
        match (self.stage(), self.get(StatusField::Stage)) {
            (Some(stage), _) => stage.to_string(),
            (None, Some(raw)) => format!("Stage {}", raw.as_str().unwrap_or(&raw.to_string())),
            (None, None) => "Stage Unknown".to_string(),
        }
    }

    pub fn task_name(&self) -> String {
        self.get(StatusField::TaskName)
            .and_then(|v| v.as_str())
            .unwrap_or(UNKNOWN_TASK)
            .to_string()
    }

    /// ETA as a clock time, with the weekday when it is not today.
    pub fn eta_display(&self, now: DateTime<Local>) -> String {
        match &self.remaining {
            None => UNKNOWN_ETA.to_string(),
            Some(r) if r.completion.date_naive() == now.date_naive() => {
                r.completion.format("%H:%M:%S").to_string()
            }
            Some(r) => r.completion.format("%a %H:%M:%S").to_string(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.stage() == Some(PrintStage::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::{Value, json};

    fn snapshot_with(v: Value, now: DateTime<Local>) -> StateSnapshot {
        let Value::Object(map) = v else { panic!() };
        let mut s = StateSnapshot::new();
        s.apply_push_status(&map, now);
        s
    }

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(snapshot_with(json!({"mc_print_stage": "1"}), noon()).stage_name(), "Idle");
        assert_eq!(snapshot_with(json!({"mc_print_stage": 2}), noon()).stage_name(), "Printing");
        assert_eq!(snapshot_with(json!({"mc_print_stage": "3"}), noon()).stage_name(), "Paused");
        assert_eq!(snapshot_with(json!({"mc_print_stage": "7"}), noon()).stage_name(), "Stage 7");
        assert_eq!(snapshot_with(json!({"mc_print_stage": "x"}), noon()).stage_name(), "Stage x");
        assert_eq!(StateSnapshot::new().stage_name(), "Stage Unknown");
    }

    #[test]
    fn test_task_name_default() {
        assert_eq!(StateSnapshot::new().task_name(), "Unknown");
        let s = snapshot_with(json!({"subtask_name": "benchy"}), noon());
        assert_eq!(s.task_name(), "benchy");
    }

    #[test]
    fn test_eta_display() {
        assert_eq!(StateSnapshot::new().eta_display(noon()), "??:??");

        let s = snapshot_with(json!({"mc_remaining_time": 90}), noon());
        assert_eq!(s.eta_display(noon()), "13:30:00");

        let s = snapshot_with(json!({"mc_remaining_time": 24 * 60}), noon());
        let expected = (noon() + Duration::days(1)).format("%a 12:00:00").to_string();
        assert_eq!(s.eta_display(noon()), expected);
    }

    #[test]
    fn test_typed_status() {
        let s = snapshot_with(
            json!({
                "mc_percent": 42,
                "mc_remaining_time": 10,
                "layer_num": 7,
                "wifi_signal": "-51dBm",
                "mc_print_stage": "2",
                "mc_print_sub_stage": 0,
                "nozzle_temper": 219.5,
                "chamber_temper": 31,
                "subtask_name": "benchy"
            }),
            noon(),
        );
        let st = s.status();
        assert_eq!(st.percent, Some(42));
        assert_eq!(st.layer_num, Some(7));
        assert_eq!(st.wifi_signal.as_deref(), Some("-51dBm"));
        assert_eq!(st.stage, Some(PrintStage::Printing));
        assert_eq!(st.nozzle_temp, Some(219.5));
        assert_eq!(st.chamber_temp, Some(31.0));
        assert_eq!(st.task_name.as_deref(), Some("benchy"));
        assert!(!s.is_idle());
    }
}
