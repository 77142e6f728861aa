// Network endpoints
pub const MQTT_PORT: u16 = 8883;
pub const FTPS_PORT: u16 = 990;
pub const DISCOVERY_PORT: u16 = 2021;

// Both the MQTT broker and the FTPS server use the same fixed account.
pub const USERNAME: &str = "bblp";

pub const KEEP_ALIVE_SECS: u64 = 60;
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

pub const SUBSCRIBE_ALL: &str = "#";
pub const TOPIC_ROOT: &str = "device";
pub const TOPIC_REPORT: &str = "report";
pub const TOPIC_REQUEST: &str = "request";

// Outbound bodies (and echoed requests) end with a single NUL.
pub const FRAME_TERMINATOR: u8 = 0x00;

// Discovery
pub const NOTIFY_PREAMBLE: &[u8] = b"NOTIFY *";
pub const DISCOVERY_TIMEOUT_SECS: u64 = 10;
pub const DISCOVERY_MAX_DATAGRAM: usize = 1024;
pub const HEADER_LOCATION: &str = "Location";
pub const HEADER_USN: &str = "USN";
pub const HEADER_DEVICE_NAME: &str = "DevName.bambu.com";

// Report commands
pub const CMD_PUSH_STATUS: &str = "push_status";
pub const CMD_PUSH_ALL: &str = "pushall";
pub const CMD_GET_VERSION: &str = "get_version";
pub const CMD_PROJECT_FILE: &str = "project_file";
pub const CMD_STOP: &str = "stop";
pub const CMD_PAUSE: &str = "pause";
pub const CMD_RESUME: &str = "resume";

// Print stages (mc_print_stage). Paused also covers filament runout.
pub const PRINT_STAGE_IDLE: i64 = 1;
pub const PRINT_STAGE_PRINTING: i64 = 2;
pub const PRINT_STAGE_PAUSED: i64 = 3;

pub const MINUTES_PER_HOUR: i64 = 60;
