//! Last-known device state.
//!
//! A field only appears after a report has carried it; absent is not zero.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Local};
use serde_json::{Map, Value};

use crate::protocol::ModuleVersion;
use crate::protocol::constants::MINUTES_PER_HOUR;

/// Push-status fields that are tracked for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusField {
    Percent,
    RemainingMinutes,
    LayerNum,
    WifiSignal,
    Stage,
    SubStage,
    NozzleTemp,
    ChamberTemp,
    TaskName,
}

impl StatusField {
    pub const ALL: [StatusField; 9] = [
        StatusField::Percent,
        StatusField::RemainingMinutes,
        StatusField::LayerNum,
        StatusField::WifiSignal,
        StatusField::Stage,
        StatusField::SubStage,
        StatusField::NozzleTemp,
        StatusField::ChamberTemp,
        StatusField::TaskName,
    ];

    /// Key used in the `print` payload.
    pub fn key(&self) -> &'static str {
        match self {
            StatusField::Percent => "mc_percent",
            StatusField::RemainingMinutes => "mc_remaining_time",
            StatusField::LayerNum => "layer_num",
            StatusField::WifiSignal => "wifi_signal",
            StatusField::Stage => "mc_print_stage",
            StatusField::SubStage => "mc_print_sub_stage",
            StatusField::NozzleTemp => "nozzle_temper",
            StatusField::ChamberTemp => "chamber_temper",
            StatusField::TaskName => "subtask_name",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }
}

impl fmt::Display for StatusField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Connection lifecycle as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Connected,
    /// Terminal: no more wake-ups will carry new data.
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Values derived from `mc_remaining_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingTime {
    pub hours: i64,
    /// Minutes past the whole hours.
    pub minutes: i64,
    /// Estimated completion.
    pub completion: DateTime<Local>,
}

impl RemainingTime {
    /// `None` when the completion time is not representable.
    pub fn from_minutes(total: i64, now: DateTime<Local>) -> Option<Self> {
        let completion = Duration::try_minutes(total).and_then(|d| now.checked_add_signed(d))?;
        Some(Self {
            hours: total.div_euclid(MINUTES_PER_HOUR),
            minutes: total.rem_euclid(MINUTES_PER_HOUR),
            completion,
        })
    }
}

/// Copyable view of everything the session knows about the device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    /// Allowlisted push-status values, as received.
    pub fields: Map<String, Value>,
    /// Raw `print` payload, merged across reports.
    pub print: Map<String, Value>,
    /// Module list from the last `get_version` reply.
    pub version: Option<Vec<ModuleVersion>>,
    pub remaining: Option<RemainingTime>,
    /// Fields changed by the most recent message.
    pub last_changed: BTreeSet<StatusField>,
    pub connection: ConnectionState,
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// True until the first report has touched the snapshot.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.print.is_empty() && self.version.is_none()
    }

    pub fn get(&self, field: StatusField) -> Option<&Value> {
        self.fields.get(field.key())
    }

    /// Merge a raw `print` payload without touching tracked fields.
    pub fn merge_raw_print(&mut self, payload: &Map<String, Value>) {
        for (k, v) in payload {
            self.print.insert(k.clone(), v.clone());
        }
    }

    /// Apply a push-status payload and return the tracked fields it changed.
    ///
    /// Only allowlisted keys take part in change detection; everything else
    /// lands in [`StateSnapshot::print`].
    pub fn apply_push_status(
        &mut self,
        payload: &Map<String, Value>,
        now: DateTime<Local>,
    ) -> BTreeSet<StatusField> {
        self.merge_raw_print(payload);

        let mut changed = BTreeSet::new();
        for field in StatusField::ALL {
            let Some(new) = payload.get(field.key()) else {
                continue;
            };
            if self.fields.get(field.key()) != Some(new) {
                self.fields.insert(field.key().to_string(), new.clone());
                changed.insert(field);
            }
        }

        // Recomputed even when the minutes did not move: "now" did.
        if let Some(total) = self.get(StatusField::RemainingMinutes).and_then(as_integer) {
            self.remaining = RemainingTime::from_minutes(total, now);
            if self.remaining.is_none() {
                tracing::debug!(total, "Remaining time out of range, ignored");
            }
        }

        self.last_changed = changed.clone();
        changed
    }

    /// Replace the module list wholesale.
    pub fn replace_version(&mut self, modules: Vec<ModuleVersion>) {
        self.version = Some(modules);
    }

    /// Scalar entries (tracked fields plus derived values) for flat dumps.
    pub fn scalars(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .fields
            .iter()
            .filter(|(_, v)| !v.is_object() && !v.is_array())
            .map(|(k, v)| (k.clone(), render_scalar(v)))
            .collect();
        if let Some(r) = &self.remaining {
            out.push(("remain_hr".into(), r.hours.to_string()));
            out.push(("remain_min".into(), r.minutes.to_string()));
            out.push((
                "remain_eta".into(),
                r.completion.format("%Y-%m-%d %H:%M:%S").to_string(),
            ));
        }
        out.sort();
        out
    }
}

/// Read an integer that may arrive as a JSON number or a numeric string.
pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a float that may arrive as a JSON number or a numeric string.
pub fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn payload(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_changed_fields_track_differences_only() {
        let mut s = StateSnapshot::new();
        let changed = s.apply_push_status(
            &payload(json!({"command": "push_status", "mc_percent": 10, "layer_num": 3, "bed_temper": 60})),
            now(),
        );
        assert_eq!(
            changed,
            BTreeSet::from([StatusField::Percent, StatusField::LayerNum])
        );

        let changed = s.apply_push_status(
            &payload(json!({"command": "push_status", "mc_percent": 10, "layer_num": 4, "bed_temper": 61})),
            now(),
        );
        assert_eq!(changed, BTreeSet::from([StatusField::LayerNum]));
        assert_eq!(s.last_changed, changed);

        // Non-allowlisted keys are kept raw but never reported as changed.
        assert_eq!(s.print["bed_temper"], 61);
        assert!(s.fields.get("bed_temper").is_none());
    }

    #[test]
    fn test_last_changed_is_replaced() {
        let mut s = StateSnapshot::new();
        s.apply_push_status(&payload(json!({"mc_percent": 1})), now());
        let changed = s.apply_push_status(&payload(json!({"wifi_signal": "-40dBm"})), now());
        assert_eq!(changed, BTreeSet::from([StatusField::WifiSignal]));
        assert_eq!(s.last_changed, changed);

        let changed = s.apply_push_status(&payload(json!({"wifi_signal": "-40dBm"})), now());
        assert!(changed.is_empty());
        assert!(s.last_changed.is_empty());
    }

    #[test]
    fn test_remaining_time_derivation() {
        let mut s = StateSnapshot::new();
        s.apply_push_status(&payload(json!({"mc_remaining_time": 125})), now());
        let r = s.remaining.unwrap();
        assert_eq!(r.hours, 2);
        assert_eq!(r.minutes, 5);
        assert_eq!(r.completion, now() + Duration::minutes(125));
    }

    #[test]
    fn test_remaining_time_out_of_range_is_skipped() {
        let mut s = StateSnapshot::new();
        s.apply_push_status(&payload(json!({"mc_remaining_time": 30})), now());
        assert!(s.remaining.is_some());

        for huge in [json!(1_000_000_000_000i64), json!(i64::MAX), json!(1e300)] {
            let changed =
                s.apply_push_status(&payload(json!({"mc_remaining_time": huge})), now());
            assert_eq!(changed, BTreeSet::from([StatusField::RemainingMinutes]));
            assert!(s.remaining.is_none());
        }
        assert!(RemainingTime::from_minutes(i64::MIN, now()).is_none());
    }

    #[test]
    fn test_remaining_time_recomputed_without_change() {
        let mut s = StateSnapshot::new();
        s.apply_push_status(&payload(json!({"mc_remaining_time": 30})), now());
        let later = now() + Duration::minutes(10);
        let changed = s.apply_push_status(&payload(json!({"mc_percent": 50})), later);
        assert_eq!(changed, BTreeSet::from([StatusField::Percent]));
        assert_eq!(s.remaining.unwrap().completion, later + Duration::minutes(30));
    }

    #[test]
    fn test_absent_is_not_zero() {
        let s = StateSnapshot::new();
        assert!(s.get(StatusField::Percent).is_none());
        assert!(s.remaining.is_none());
        assert!(s.is_empty());
    }

    #[test]
    fn test_version_replaced_wholesale() {
        let mut s = StateSnapshot::new();
        s.replace_version(vec![
            ModuleVersion {
                name: "ota".into(),
                ..Default::default()
            },
            ModuleVersion {
                name: "mc".into(),
                ..Default::default()
            },
        ]);
        s.replace_version(vec![ModuleVersion {
            name: "ahb".into(),
            ..Default::default()
        }]);
        let v = s.version.as_ref().unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].name, "ahb");
    }

    #[test]
    fn test_as_integer_accepts_strings() {
        assert_eq!(as_integer(&json!("2")), Some(2));
        assert_eq!(as_integer(&json!(7)), Some(7));
        assert_eq!(as_integer(&json!("x")), None);
    }

    #[test]
    fn test_scalars_include_derived() {
        let mut s = StateSnapshot::new();
        s.apply_push_status(
            &payload(json!({"mc_remaining_time": 61, "subtask_name": "benchy"})),
            now(),
        );
        let scalars = s.scalars();
        assert!(scalars.contains(&("remain_hr".to_string(), "1".to_string())));
        assert!(scalars.contains(&("remain_min".to_string(), "1".to_string())));
        assert!(scalars.contains(&("subtask_name".to_string(), "\"benchy\"".to_string())));
    }
}
