//! Default configuration values

/// Vendor field of generated target triplets
pub const TARGET_VENDOR: &str = "weaver";

/// OS/ABI field of generated target triplets
pub const TARGET_OS: &str = "linux-gnu";

/// Base image for component builds
pub const BASE_IMAGE: &str = "debian:bookworm-slim";

/// How long a worker waits on another process's reservation (in seconds)
pub const RESERVATION_WAIT_SECS: u64 = 3600;

/// First backoff delay while waiting on a reservation (in milliseconds)
pub const RESERVATION_INITIAL_BACKOFF_MS: u64 = 250;

/// Backoff delay cap while waiting on a reservation (in milliseconds)
pub const RESERVATION_MAX_BACKOFF_MS: u64 = 30_000;

/// Age after which a reservation whose holder cannot be checked is stale (in seconds)
pub const STALE_RESERVATION_SECS: u64 = 48 * 3600;

/// Install prefix inside build containers
pub const CONTAINER_PREFIX: &str = "/opt/weaver/out";

/// Where dependency artifact trees are mounted inside build containers
pub const CONTAINER_DEPS_DIR: &str = "/opt/weaver/deps";

/// Source tree location inside build containers
pub const CONTAINER_SOURCE_DIR: &str = "/opt/weaver/src";

/// Build directory inside build containers
pub const CONTAINER_BUILD_DIR: &str = "/opt/weaver/build";

/// Minimum proptest iterations
pub const MIN_PROPTEST_ITERATIONS: u32 = 100;
