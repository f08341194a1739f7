use std::time::Duration;

/// The endpoint drops frames sent immediately after the transport opens, so
/// the setup frame waits this long.
pub const SETUP_SEND_DELAY: Duration = Duration::from_millis(500);

/// Delay before re-opening the transport after an unexpected close or a
/// failed open.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Context sends retry with exponential backoff: base doubling per attempt,
/// capped, then abandoned.
pub const CONTEXT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
pub const CONTEXT_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);
pub const CONTEXT_RETRY_MAX_ATTEMPTS: u32 = 5;

/// After this many context retries with the transport open but no ack, the
/// session is forced to Ready instead of wedging. Known race: the peer may
/// not be ready for content yet. See DESIGN.md.
pub const FORCE_READY_AFTER_RETRIES: u32 = 2;

/// Inbound audio arriving within this window after an interrupt is stale
/// output from the aborted response and is discarded.
pub const INTERRUPT_SUPPRESS_WINDOW: Duration = Duration::from_millis(800);

/// Stage delays for a context switch. All three directives at once risk the
/// peer interleaving stale and fresh instructions.
pub const SWITCH_STAGE_SUBJECT_DELAY: Duration = Duration::from_millis(150);
pub const SWITCH_STAGE_DETAIL_DELAY: Duration = Duration::from_millis(400);

/// Imperative turn sent on interrupt.
pub const STOP_DIRECTIVE: &str =
    "Stop speaking immediately and wait for further instructions.";

pub const COMMAND_QUEUE_CAPACITY: usize = 256;
pub const TIMER_QUEUE_CAPACITY: usize = 64;
pub const TOOL_RESULT_QUEUE_CAPACITY: usize = 64;
pub const PLAYBACK_DONE_QUEUE_CAPACITY: usize = 8;
