#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_received: u64,
    pub frames_malformed: u64,
    pub entries_rejected: u64,
    pub envelopes_dispatched: u64,
    pub duplicates_suppressed: u64,
    pub unknown_channel_drops: u64,
    pub handler_failures: u64,
    pub frames_sent: u64,
    pub frames_queued: u64,
    pub connect_attempts: u64,
    pub reconnect_cycles: u64,
}
