/// Default signalling server port, overridable with `SERVER_PORT`.
pub const DEFAULT_SERVER_PORT: u16 = 25565;

/// Default chunk size. Kept well below the SCTP message ceiling so a chunk
/// always fits in a single data-channel message.
pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 16 * 1024;

/// Client-side connection parameters, sourced from the environment.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL of the signalling server (`SERVER_ADDRESS`)
    pub server_address: String,
    /// Transfer chunk size in bytes (`CHUNK_SIZE_BYTES`)
    pub chunk_size_bytes: u64,
}

impl SessionConfig {
    pub fn new(server_address: impl Into<String>, chunk_size_bytes: u64) -> Self {
        Self {
            server_address: server_address.into(),
            chunk_size_bytes,
        }
    }

    /// Build from `SERVER_ADDRESS` and `CHUNK_SIZE_BYTES`, falling back to
    /// defaults when unset or unparseable. A zero chunk size is rejected.
    pub fn from_env() -> Self {
        let server_address = std::env::var("SERVER_ADDRESS")
            .unwrap_or_else(|_| format!("ws://127.0.0.1:{DEFAULT_SERVER_PORT}"));
        let chunk_size_bytes = std::env::var("CHUNK_SIZE_BYTES")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .filter(|&size| size > 0)
            .unwrap_or(DEFAULT_CHUNK_SIZE_BYTES);
        Self {
            server_address,
            chunk_size_bytes,
        }
    }

    /// Number of chunks a payload of `filesize` bytes splits into.
    pub fn total_chunks(&self, filesize: u64) -> u64 {
        filesize.div_ceil(self.chunk_size_bytes)
    }

    /// How many chunks the receiver may buffer in memory before spilling a
    /// part file to disk. Clamped so even a tiny RAM budget yields one chunk
    /// per part.
    pub fn chunks_per_part(&self, max_ram_mb: u64) -> u64 {
        ((max_ram_mb * 1024 * 1024) / self.chunk_size_bytes).max(1)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(
            format!("ws://127.0.0.1:{DEFAULT_SERVER_PORT}"),
            DEFAULT_CHUNK_SIZE_BYTES,
        )
    }
}
