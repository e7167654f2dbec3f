//! Defaults used when the command line leaves a value out.

use std::time::Duration;

/// Port the server listens on when none (or an unparsable one) is given.
pub const DEFAULT_SERVER_PORT: u16 = 5556;

/// Port the client dials when none (or an unparsable one) is given.
pub const DEFAULT_CLIENT_PORT: u16 = 5555;

pub const DEFAULT_HOST: &str = "localhost";

/// How long `#quit` waits for queued lines to reach clients before returning.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);
