use std::time::Duration;

/// Software version
pub const GATE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GATE_NAME: &str = "tbbox-gate";

/// Length of the switch part of an alert.
pub const PATTERN_LENGTH: usize = 4;
/// Full alert length: switch pattern + suffix.
pub const ALERT_LENGTH: usize = 8;
/// Expected alert suffix. Anything else is only worth a warning.
pub const ALERT_SUFFIX: &str = "9999";

/// Highest id derivable from 4 switches.
pub const SWITCH_PROGRAMS: u8 = 16;
/// Highest valid id; 17-20 are reserved for direct invocation.
pub const MAX_PROGRAM_ID: u8 = 20;

/// Max bytes read back from TBBOX after a command, for logging only.
pub const RESPONSE_BUFFER_SIZE: usize = 1024;

// Device session defaults.
pub const DEFAULT_DEVICE_PORT: u16 = 5200;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_CONNECT_RETRIES: u32 = 5;
pub const DEFAULT_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_SEND_RETRIES: u32 = 3;
pub const DEFAULT_SEND_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Requests queued for the device worker before callers wait.
pub const DEVICE_QUEUE_LENGTH: usize = 15;

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

pub const DEFAULT_HTTP_BIND: &str = "0.0.0.0:8080";
