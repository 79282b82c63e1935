/// Running traffic counters for one server link, both channels combined.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub parse_errors: u64,
    pub rejected_datagrams: u64,
}
