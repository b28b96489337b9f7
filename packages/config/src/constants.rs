// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Runbox

// Server Configuration
pub const RUNBOX_HOST: &str = "RUNBOX_HOST";
pub const RUNBOX_PORT: &str = "RUNBOX_PORT";
pub const PORT: &str = "PORT"; // Legacy

// CORS Configuration
pub const RUNBOX_CORS_ORIGIN: &str = "RUNBOX_CORS_ORIGIN";
pub const CORS_ORIGIN: &str = "CORS_ORIGIN"; // Legacy

// Workspaces
pub const RUNBOX_WORKSPACES_PATH: &str = "RUNBOX_WORKSPACES_PATH";

// Execution strategy
pub const RUNBOX_JS_STRATEGY: &str = "RUNBOX_JS_STRATEGY";

// Sandboxed scripts
pub const RUNBOX_SCRIPT_TIMEOUT_MS: &str = "RUNBOX_SCRIPT_TIMEOUT_MS";
pub const RUNBOX_SCRIPT_MEMORY_MB: &str = "RUNBOX_SCRIPT_MEMORY_MB";
pub const NODE_ENV: &str = "NODE_ENV";

// Containers
pub const RUNBOX_CONTAINER_TIMEOUT_SECS: &str = "RUNBOX_CONTAINER_TIMEOUT_SECS";
pub const RUNBOX_PORT_RANGE_START: &str = "RUNBOX_PORT_RANGE_START";
pub const RUNBOX_PORT_RANGE_END: &str = "RUNBOX_PORT_RANGE_END";
pub const RUNBOX_PREVIEW_HOST: &str = "RUNBOX_PREVIEW_HOST";
pub const RUNBOX_SHARED_CPUS: &str = "RUNBOX_SHARED_CPUS";
pub const RUNBOX_SHARED_MEMORY_MB: &str = "RUNBOX_SHARED_MEMORY_MB";
pub const RUNBOX_DEDICATED_CPUS: &str = "RUNBOX_DEDICATED_CPUS";
pub const RUNBOX_DEDICATED_MEMORY_MB: &str = "RUNBOX_DEDICATED_MEMORY_MB";

// Session registry
pub const RUNBOX_STDOUT_BUFFER_BYTES: &str = "RUNBOX_STDOUT_BUFFER_BYTES";
pub const RUNBOX_REAPER_INTERVAL_MS: &str = "RUNBOX_REAPER_INTERVAL_MS";
pub const RUNBOX_STOP_GRACE_MS: &str = "RUNBOX_STOP_GRACE_MS";
pub const RUNBOX_IDLE_SLOT_RETENTION_SECS: &str = "RUNBOX_IDLE_SLOT_RETENTION_SECS";

// Network simulation
pub const NETWORK_LATENCY: &str = "NETWORK_LATENCY";
pub const NETWORK_FAILURE_RATE: &str = "NETWORK_FAILURE_RATE";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";
