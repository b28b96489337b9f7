// ABOUTME: Default values applied when configuration variables are unset
// ABOUTME: Kept next to the variable names so every crate agrees on them

pub const HOST: &str = "127.0.0.1";
pub const PORT: u16 = 4100;
pub const CORS_ORIGIN: &str = "http://localhost:5173";

pub const WORKSPACES_PATH: &str = "./workspaces";

pub const SCRIPT_TIMEOUT_MS: u64 = 2_000;
pub const SCRIPT_MEMORY_MB: u64 = 64;
pub const NODE_ENV: &str = "production";

pub const CONTAINER_TIMEOUT_SECS: u64 = 30 * 60;
pub const PORT_RANGE_START: u16 = 9100;
pub const PORT_RANGE_END: u16 = 9199;
pub const PREVIEW_HOST: &str = "localhost";

pub const SHARED_CPUS: f64 = 0.5;
pub const SHARED_MEMORY_MB: u64 = 256;
pub const DEDICATED_CPUS: f64 = 2.0;
pub const DEDICATED_MEMORY_MB: u64 = 1024;

pub const STDOUT_BUFFER_BYTES: usize = 64 * 1024;
pub const REAPER_INTERVAL_MS: u64 = 500;
pub const STOP_GRACE_MS: u64 = 3_000;
pub const IDLE_SLOT_RETENTION_SECS: u64 = 3_600;
