use std::time::Duration;

/// How long a blocking query is allowed to hang server-side before the
/// backend must answer, changed or not.
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(60);

/// First delay of the exponential retry ladder used by a View after a
/// transient fetch error.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(250);

/// Ceiling for the exponential retry ladder.
pub const DEFAULT_RETRY_CAP: Duration = Duration::from_secs(60);

/// Number of attempts before a View gives up and surfaces the error.
pub const DEFAULT_RETRY_ATTEMPTS: usize = 12;

/// Base delay when Vault reports a renewable lease with TTL=0. These
/// retries are unbounded by default, so the ladder is capped separately.
pub const DEFAULT_VAULT_TTL_ZERO_BASE: Duration = Duration::from_millis(250);

/// Ceiling for TTL=0 retries.
pub const DEFAULT_VAULT_TTL_ZERO_CAP: Duration = Duration::from_secs(5 * 60);

/// Transport defaults, applied at config finalize time.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a child command may run before it is killed.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period between asking a child to stop and force-killing it.
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(30);

/// File mode used for rendered destinations when none is configured.
pub const DEFAULT_FILE_PERMS: u32 = 0o644;

/// Interval between stat() polls for local file dependencies.
pub const FILE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Sentinel substituted for unresolved lookups when
/// `error_on_missing_key` is off.
pub const NO_VALUE: &str = "<no value>";

/// Default template delimiters.
pub const DEFAULT_LEFT_DELIM: &str = "{{";
pub const DEFAULT_RIGHT_DELIM: &str = "}}";
