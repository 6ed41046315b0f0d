//! Limits and fixed values shared by the token services and the saga.

use chrono::Duration;

/// Number of leading characters of an API key stored in clear for lookup.
pub const API_KEY_LOOKUP_PREFIX_LEN: usize = 16;

/// Random bytes in the secret part of an API key (256 bits).
pub const API_KEY_SECRET_BYTES: usize = 32;

/// Header carrying a project API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Minimum forward window for a signed download link.
pub fn signed_url_min_ttl() -> Duration {
    Duration::minutes(5)
}

/// Shortest lifetime an API key may be issued with.
pub fn api_key_min_ttl() -> Duration {
    Duration::hours(1)
}

/// Longest lifetime an API key may be issued with.
pub fn api_key_max_ttl() -> Duration {
    Duration::days(365)
}

/// Path the signed download endpoint is mounted at.
pub const SIGNED_DOWNLOAD_PATH: &str = "/api/files/download-signed";

/// Bytes inspected when sniffing a file's content type.
pub const CONTENT_SNIFF_LEN: usize = 512;

/// Fallback content type for payloads nothing else matches.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
