use std::time::Duration;

/// Maximum size of a single channel frame (16 MB).
///
/// Proofs carry one raw file chunk, so frames stay far below this.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Time an initiator waits for the responder to answer one step.
///
/// Must exceed the farmer's transfer timeout: the final handoff step only
/// answers once both files have arrived.
pub const STEP_RESPONSE_TIMEOUT: Duration = Duration::from_secs(180);

/// Time allowed to establish a channel connection.
pub const CHANNEL_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error code: a step arrived out of order, or a payload was malformed.
pub const ERR_PROTOCOL_VIOLATION: i32 = 400;

/// Error code: the responder refused to open the channel for this session.
pub const ERR_REFUSED: i32 = 403;

/// Error code: no responder is registered for the channel kind.
pub const ERR_UNKNOWN_CHANNEL: i32 = 404;

/// Error code: the step handler failed (I/O, scheme failure).
pub const ERR_STEP_FAILED: i32 = 500;
