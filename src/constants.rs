// src/constants.rs
//
// Central location for the tunable constants used throughout blkbench.

use std::time::Duration;

// =============================================================================
// Scenario matrix
// =============================================================================

/// Margin added to a scenario's runtime to derive its command timeout.
pub const TIMEOUT_MARGIN_SECS: u64 = 60;

/// Wall-clock bound for a dd sequential pass (dd has no runtime knob).
pub const SEQ_TIMEOUT_SECS: u64 = 300;

/// Per-scenario runtime for a full measurement run.
pub const DEFAULT_RUNTIME_SECS: u64 = 30;

/// Per-scenario runtime in quick (validation) mode.
pub const QUICK_RUNTIME_SECS: u64 = 3;

/// Target file size for fio scenarios.
pub const DEFAULT_FILE_SIZE: &str = "1G";

/// Target file size for dd sequential passes in quick mode.
pub const QUICK_SEQ_FILE_SIZE: &str = "100M";

// =============================================================================
// Remote execution
// =============================================================================

/// TCP connect timeout for SSH sessions. Bounds how long one dead host can
/// stall its own dispatch/collect slot.
pub const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default SSH port when a host address carries no explicit port.
pub const SSH_PORT: u16 = 22;

// =============================================================================
// Run identifiers and store layout
// =============================================================================

/// Run stamp rendering: UTC start instant truncated to the minute.
pub const STAMP_FORMAT: &str = "%Y%m%d-%H%M";

/// Cluster-config start time format (minute precision).
pub const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Reports root, relative to the working directory on every machine.
pub const REPORTS_SUBDIR: &str = "test_data/reports";

/// Structured per-host result artifact inside a run directory.
pub const REPORT_JSON: &str = "report.json";

/// Remote execution log inside a run directory.
pub const RUN_LOG: &str = "run.log";

// =============================================================================
// Comparison
// =============================================================================

/// Percentage band within which a metric change is classified as flat.
pub const FLAT_PCT: f64 = 1.0;

// =============================================================================
// Scheduling
// =============================================================================

/// Upper bound on a single sleep inside wait_until, so cancellation and
/// clock checks stay responsive.
pub const WAIT_POLL_MAX: Duration = Duration::from_secs(1);
