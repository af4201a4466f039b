/// Configuration of one version control relay instance.
///
/// Passed explicitly to every component that needs it; there is no
/// process-wide state, so independent instances (tests) never interfere.
#[derive(Debug, Clone)]
pub struct VersionControlConfig {
    /// Unique identifier for this node; stamped on every outbound envelope.
    pub node_id: String,
    /// How long a pending request waits for its response before eviction.
    pub request_timeout_ms: u64,
    /// Maximum characters per outbound (and worker reply) payload chunk.
    pub chunk_size_chars: usize,
    /// Page size when reading entity documents from a version.
    pub import_page_size: u32,
    /// Page size when enumerating local entities for export and cleanup.
    pub export_page_size: u32,
    /// Number of FIFO partitions of the in-process transport.
    pub transport_partitions: u32,
    /// Bounded channel capacity per transport partition.
    pub transport_channel_capacity: usize,
    /// Maximum number of task results kept for polling.
    pub task_status_capacity: usize,
}

impl Default for VersionControlConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            request_timeout_ms: 180_000,
            chunk_size_chars: 250_000,
            import_page_size: 100,
            export_page_size: 100,
            transport_partitions: 4,
            transport_channel_capacity: 256,
            task_status_capacity: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_limits() {
        let config = VersionControlConfig::default();
        assert_eq!(config.request_timeout_ms, 180_000);
        assert_eq!(config.chunk_size_chars, 250_000);
        assert_eq!(config.import_page_size, 100);
        assert_eq!(config.export_page_size, 100);
    }
}
