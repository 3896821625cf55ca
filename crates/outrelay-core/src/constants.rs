//! Shared constants.

use std::time::Duration;

/// How long a session may go without a line or keepalive before it is
/// closed: three keepalive probes plus a second.
pub const KEEPALIVE_WINDOW: Duration = Duration::from_secs(16);
