/// Protocol name for the request-response frame exchange
pub const PROTOCOL_NAME: &str = "/garland/sync/1";

/// Application name
pub const APP_NAME: &str = "Garland";

/// Default timeout for a single outbound request, in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum frame size in bytes (8 MiB, bounded by photo payloads)
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Default QUIC listen port
pub const DEFAULT_QUIC_PORT: u16 = 4815;

/// Default number of record pulls in flight per sync phase
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Consecutive request timeouts before a sync phase is abandoned
pub const DEFAULT_TIMEOUT_TRIP: u32 = 3;

/// File extension used for stored gift photos
pub const PHOTO_EXTENSION: &str = "jpg";
