//! Outbound command encoding.
//!
//! Every command is a JSON object keyed by its namespace:
//! `{"print": {"command": "stop", "sequence_id": 7, "param": ""}}` followed by
//! one NUL byte.

use std::fmt;

use serde_json::{Map, Value, json};

use super::constants::{
    CMD_GET_VERSION, CMD_PAUSE, CMD_PROJECT_FILE, CMD_PUSH_ALL, CMD_RESUME, CMD_STOP,
};
use super::framing::frame;

/// Top-level key of an outbound body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Pushing,
    Info,
    Print,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Pushing => "pushing",
            Namespace::Info => "info",
            Namespace::Print => "print",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command ready to be sequenced and published.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCommand {
    pub namespace: Namespace,
    pub command: &'static str,
    pub parameters: Map<String, Value>,
}

impl OutboundCommand {
    pub fn new(namespace: Namespace, command: &'static str, parameters: Map<String, Value>) -> Self {
        Self {
            namespace,
            command,
            parameters,
        }
    }

    /// Ask for a full status report.
    pub fn push_all() -> Self {
        Self::new(
            Namespace::Pushing,
            CMD_PUSH_ALL,
            object(json!({"push_target": 1, "version": 1})),
        )
    }

    /// Ask for firmware/module versions.
    pub fn get_version() -> Self {
        Self::new(Namespace::Info, CMD_GET_VERSION, Map::new())
    }

    /// Start printing a file already on the printer's storage.
    pub fn project_file(job: &PrintJob) -> Self {
        Self::new(Namespace::Print, CMD_PROJECT_FILE, job.parameters())
    }

    pub fn stop() -> Self {
        Self::job_control(CMD_STOP)
    }

    pub fn pause() -> Self {
        Self::job_control(CMD_PAUSE)
    }

    pub fn resume() -> Self {
        Self::job_control(CMD_RESUME)
    }

    fn job_control(command: &'static str) -> Self {
        Self::new(Namespace::Print, command, object(json!({"param": ""})))
    }

    /// Build the JSON body for `sequence_id`, without framing.
    pub fn to_json(&self, sequence_id: u64) -> Value {
        let mut inner = Map::new();
        inner.insert("command".into(), Value::from(self.command));
        inner.insert("sequence_id".into(), Value::from(sequence_id));
        for (k, v) in &self.parameters {
            inner.insert(k.clone(), v.clone());
        }

        let mut root = Map::new();
        root.insert(self.namespace.as_str().into(), Value::Object(inner));
        Value::Object(root)
    }

    /// Serialize to the NUL-terminated wire body.
    pub fn encode(&self, sequence_id: u64) -> Result<Vec<u8>, serde_json::Error> {
        let body = serde_json::to_vec(&self.to_json(sequence_id))?;
        Ok(frame(body))
    }
}

/// A print job submission.
///
/// Unset options fall back to the protocol defaults in [`PrintJob::defaults`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrintJob {
    /// Path of the 3MF on the printer's storage.
    pub file: String,
    /// 1-based plate inside the project.
    pub plate: Option<u32>,
    pub bed_leveling: Option<bool>,
    pub flow_calibration: Option<bool>,
    pub vibration_calibration: Option<bool>,
    pub layer_inspect: Option<bool>,
    pub timelapse: Option<bool>,
    pub bed_type: Option<String>,
    pub use_ams: Option<bool>,
    /// Filament index to AMS slot mapping.
    pub ams_mapping: Option<Vec<i32>>,
}

impl PrintJob {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Default::default()
        }
    }

    /// Protocol defaults for a `project_file` command.
    pub fn defaults(file: &str) -> Map<String, Value> {
        object(json!({
            "param": "Metadata/plate_1.gcode",
            "subtask_name": file,
            "url": format!("ftp://{}", file),
            "bed_type": "auto",
            "timelapse": false,
            "bed_leveling": true,
            "flow_cali": false,
            "vibration_cali": true,
            "layer_inspect": true,
            "use_ams": true,
            "profile_id": "0",
            "project_id": "0",
            "subtask_id": "0",
            "task_id": "0",
        }))
    }

    /// Options explicitly set on this job, as wire keys.
    pub fn overrides(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(plate) = self.plate {
            map.insert(
                "param".into(),
                Value::from(format!("Metadata/plate_{}.gcode", plate)),
            );
        }
        let flags = [
            ("bed_leveling", self.bed_leveling),
            ("flow_cali", self.flow_calibration),
            ("vibration_cali", self.vibration_calibration),
            ("layer_inspect", self.layer_inspect),
            ("timelapse", self.timelapse),
            ("use_ams", self.use_ams),
        ];
        for (key, value) in flags {
            if let Some(v) = value {
                map.insert(key.into(), Value::from(v));
            }
        }
        if let Some(bed_type) = &self.bed_type {
            map.insert("bed_type".into(), Value::from(bed_type.as_str()));
        }
        if let Some(mapping) = &self.ams_mapping {
            map.insert("ams_mapping".into(), Value::from(mapping.clone()));
        }
        map
    }

    /// Defaults with this job's overrides applied on top.
    pub fn parameters(&self) -> Map<String, Value> {
        merge_over(Self::defaults(&self.file), self.overrides())
    }
}

/// Shallow merge: keys in `overrides` replace keys in `base`.
pub fn merge_over(mut base: Map<String, Value>, overrides: Map<String, Value>) -> Map<String, Value> {
    for (k, v) in overrides {
        base.insert(k, v);
    }
    base
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_body(bytes: &[u8]) -> Value {
        let (last, body) = bytes.split_last().unwrap();
        assert_eq!(*last, 0);
        serde_json::from_slice(body).unwrap()
    }

    #[test]
    fn test_push_all_encoding() {
        let bytes = OutboundCommand::push_all().encode(1).unwrap();
        let v = decode_body(&bytes);
        assert_eq!(v["pushing"]["command"], "pushall");
        assert_eq!(v["pushing"]["sequence_id"], 1);
        assert_eq!(v["pushing"]["push_target"], 1);
        assert_eq!(v["pushing"]["version"], 1);
        assert_eq!(v.as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_get_version_encoding() {
        let v = OutboundCommand::get_version().to_json(9);
        assert_eq!(v, json!({"info": {"command": "get_version", "sequence_id": 9}}));
    }

    #[test]
    fn test_job_control_encoding() {
        for (cmd, name) in [
            (OutboundCommand::stop(), "stop"),
            (OutboundCommand::pause(), "pause"),
            (OutboundCommand::resume(), "resume"),
        ] {
            let v = cmd.to_json(2);
            assert_eq!(v["print"]["command"], name);
            assert_eq!(v["print"]["param"], "");
        }
    }

    #[test]
    fn test_print_job_override_keeps_other_defaults() {
        let job = PrintJob {
            bed_leveling: Some(false),
            ..PrintJob::new("benchy.3mf")
        };
        let v = decode_body(&OutboundCommand::project_file(&job).encode(4).unwrap());
        let p = &v["print"];
        assert_eq!(p["command"], "project_file");
        assert_eq!(p["bed_leveling"], false);
        assert_eq!(p["use_ams"], true);
        assert_eq!(p["flow_cali"], false);
        assert_eq!(p["bed_type"], "auto");
        assert_eq!(p["timelapse"], false);
        assert_eq!(p["subtask_name"], "benchy.3mf");
        assert_eq!(p["url"], "ftp://benchy.3mf");
        assert_eq!(p["param"], "Metadata/plate_1.gcode");
        assert!(p.get("ams_mapping").is_none());
    }

    #[test]
    fn test_print_job_plate_and_mapping() {
        let job = PrintJob {
            plate: Some(3),
            bed_type: Some("textured_plate".into()),
            ams_mapping: Some(vec![0, 2, -1]),
            use_ams: Some(false),
            ..PrintJob::new("part.3mf")
        };
        let params = job.parameters();
        assert_eq!(params["param"], "Metadata/plate_3.gcode");
        assert_eq!(params["bed_type"], "textured_plate");
        assert_eq!(params["ams_mapping"], json!([0, 2, -1]));
        assert_eq!(params["use_ams"], false);
    }
}
