//! Server configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Default SSH port for nanogit.
pub const DEFAULT_SSH_PORT: u16 = 1337;

/// Default bind host (localhost only for security).
pub const DEFAULT_SSH_HOST: &str = "localhost";

/// Default host key type handed to `ssh-keygen` when no key exists yet.
pub const DEFAULT_KEYGEN_TYPE: &str = "rsa";

/// SSH authentication rejection delay (prevents timing attacks).
pub const SSH_AUTH_REJECTION_DELAY: Duration = Duration::from_secs(1);

/// Connections idle for longer than this are dropped by russh.
pub const SSH_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(600);

/// Maximum public-key attempts per connection.
pub const SSH_MAX_AUTH_ATTEMPTS: usize = 6;

/// Read buffer used when copying subprocess output into a channel.
pub const PIPE_BUFFER_SIZE: usize = 32 * 1024;

/// SSH extended-data type code for stderr (RFC 4254 §5.2).
pub const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Exit status reported when a failed command never produced a process.
pub const EXIT_STATUS_FAILURE: u32 = 1;

/// Exit status for an exec naming no registered command, which completes
/// without running anything.
pub const EXIT_STATUS_SUCCESS: u32 = 0;
