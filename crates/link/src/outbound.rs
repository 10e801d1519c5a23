use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;

use crate::error::ProtocolError;
use crate::net::{ConnectionState, Sample, encode_frame};

pub const DEFAULT_MAX_PENDING: usize = 64;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundFrame {
    samples: BTreeMap<String, Sample>,
}

impl OutboundFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, channel: impl Into<String>, data: Value) -> Self {
        self.insert(channel, Sample::stamped(data));
        self
    }

    pub fn insert(&mut self, channel: impl Into<String>, sample: Sample) {
        self.samples.insert(channel.into(), sample);
    }

    // {"Channel": {"data": ..., "tm": ...}, ...}
    pub fn from_channel_map(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(map) = value else {
            return Err(ProtocolError::NotAMap);
        };

        let mut frame = Self::new();
        for (channel, entry) in map {
            if !entry.as_object().is_some_and(|e| e.contains_key("data")) {
                return Err(ProtocolError::MissingData { channel });
            }
            let sample: Sample = serde_json::from_value(entry)?;
            frame.insert(channel, sample);
        }
        Ok(frame)
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Self::from_channel_map(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        encode_frame(&self.samples)
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.samples.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// What happens to frames queued while the link was down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutboundPolicy {
    #[default]
    Hold,
    ReplayOnConnect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Transmit(String),
    Queued,
    Empty,
}

#[derive(Debug)]
pub struct OutboundQueue {
    pending: VecDeque<OutboundFrame>,
    max_pending: usize,
    policy: OutboundPolicy,
    evicted: u64,
}

impl OutboundQueue {
    pub fn new(max_pending: usize, policy: OutboundPolicy) -> Self {
        Self {
            pending: VecDeque::with_capacity(max_pending),
            max_pending,
            policy,
            evicted: 0,
        }
    }

    pub fn submit(
        &mut self,
        frame: OutboundFrame,
        state: ConnectionState,
    ) -> Result<Submission, ProtocolError> {
        if frame.is_empty() {
            return Ok(Submission::Empty);
        }

        if state == ConnectionState::Connected {
            return frame.encode().map(Submission::Transmit);
        }

        if self.max_pending == 0 {
            self.evicted += 1;
            return Ok(Submission::Queued);
        }
        if self.pending.len() >= self.max_pending {
            self.pending.pop_front();
            self.evicted += 1;
            log::warn!("Outbound queue full, dropped oldest frame");
        }
        self.pending.push_back(frame);
        Ok(Submission::Queued)
    }

    pub fn on_connected(&mut self) -> Vec<OutboundFrame> {
        match self.policy {
            OutboundPolicy::Hold => Vec::new(),
            OutboundPolicy::ReplayOnConnect => self.take_pending(),
        }
    }

    pub fn take_pending(&mut self) -> Vec<OutboundFrame> {
        self.pending.drain(..).collect()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING, OutboundPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(n: i64) -> OutboundFrame {
        let mut frame = OutboundFrame::new();
        frame.insert("Mode_In", Sample::new(json!(n)));
        frame
    }

    #[test]
    fn test_connected_submit_transmits() {
        let mut queue = OutboundQueue::default();

        let submission = queue.submit(frame(1), ConnectionState::Connected).unwrap();
        assert_eq!(submission, Submission::Transmit(r#"{"Mode_In":{"data":1}}"#.to_string()));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_disconnected_submit_is_held_not_replayed() {
        let mut queue = OutboundQueue::default();

        for state in [
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Disconnected,
        ] {
            assert_eq!(queue.submit(frame(1), state).unwrap(), Submission::Queued);
        }

        assert!(queue.on_connected().is_empty());
        assert_eq!(queue.len(), 3);

        let pending = queue.take_pending();
        assert_eq!(pending.len(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_replay_policy_keeps_submission_order() {
        let mut queue = OutboundQueue::new(8, OutboundPolicy::ReplayOnConnect);
        queue.submit(frame(1), ConnectionState::Disconnected).unwrap();
        queue.submit(frame(2), ConnectionState::Disconnected).unwrap();

        assert_eq!(queue.on_connected(), vec![frame(1), frame(2)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_evicts_oldest() {
        let mut queue = OutboundQueue::new(2, OutboundPolicy::ReplayOnConnect);
        for n in 0..4 {
            queue.submit(frame(n), ConnectionState::Disconnected).unwrap();
        }

        assert_eq!(queue.evicted(), 2);
        assert_eq!(queue.take_pending(), vec![frame(2), frame(3)]);
    }

    #[test]
    fn test_empty_frame_ignored() {
        let mut queue = OutboundQueue::default();
        assert_eq!(
            queue.submit(OutboundFrame::new(), ConnectionState::Disconnected).unwrap(),
            Submission::Empty
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_parse_debug_console_input() {
        let frame = OutboundFrame::parse(r#"{"Velocity2D_In": {"data": {"vx": 0.1, "vy": 0, "va": 0}}}"#)
            .unwrap();
        assert_eq!(frame.channels().collect::<Vec<_>>(), vec!["Velocity2D_In"]);

        assert!(matches!(
            OutboundFrame::parse(r#"{"Velocity2D_In": 0.1}"#),
            Err(ProtocolError::MissingData { .. })
        ));
        assert!(matches!(OutboundFrame::parse("[]"), Err(ProtocolError::NotAMap)));
    }

    #[test]
    fn test_builder_stamps_samples() {
        let frame = OutboundFrame::new()
            .with("FlipperAngle_In", json!([0, 0, 0, 0]))
            .with("MotorLoad_In", json!([0, 0, 0, 0, 0, 0]));

        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert!(value["FlipperAngle_In"]["tm"].as_f64().unwrap() > 0.0);
        assert_eq!(value["MotorLoad_In"]["data"], json!([0, 0, 0, 0, 0, 0]));
    }
}
