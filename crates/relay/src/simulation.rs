use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;

use telemux::ProtocolError;
use telemux::net::{Sample, encode_frame, now_secs};

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn wrap_angle(rad: f64) -> f64 {
    (rad + PI).rem_euclid(2.0 * PI) - PI
}

/// Synthetic robot telemetry: a robot driving a slow circle while its
/// batteries drain.
#[derive(Debug)]
pub struct TelemetrySimulator {
    step: u64,
    dt: f64,
}

impl TelemetrySimulator {
    pub fn new(interval: Duration) -> Self {
        Self {
            step: 0,
            dt: interval.as_secs_f64(),
        }
    }

    pub fn elapsed(&self) -> f64 {
        self.step as f64 * self.dt
    }

    /// One sample for every simulated channel, then advances one step.
    pub fn next_samples(&mut self) -> Vec<(&'static str, Value)> {
        let t = self.elapsed();
        self.step += 1;

        let heading = wrap_angle(t * 0.2);
        let speed_level = (t / 10.0) as i64 % 3;
        let flippers_up = (t / 5.0) as i64 % 2 == 1;
        let phase = |offset: f64| round3((t * 0.3 + offset).sin() * 0.5);

        vec![
            (
                "MainCapacityRatio_In",
                json!(round3(100.0 - (t / 6.0) % 100.0)),
            ),
            ("GCCapacityRatio_In", json!(round3(100.0 - (t / 9.0) % 100.0))),
            (
                "Mode_In",
                json!([1, speed_level, 2, if flippers_up { 0b1111 } else { 0 }, 1, 0]),
            ),
            (
                "Pose3D_In",
                json!({
                    "position": {
                        "x": round3(2.0 * heading.cos()),
                        "y": round3(2.0 * heading.sin()),
                        "z": 0.0
                    },
                    "orientation": {"r": 0.0, "p": 0.0, "y": round3(heading)}
                }),
            ),
            (
                "Velocity2D_In",
                json!({
                    "vx": round3(0.4 + 0.2 * (t * 0.5).sin()),
                    "vy": 0.0,
                    "va": round3(0.2 + 0.1 * (t * 0.25).sin())
                }),
            ),
            (
                "FlipperAngle_In",
                json!([phase(0.0), phase(0.0), phase(PI), phase(PI)]),
            ),
            (
                "MotorLoad_In",
                json!([
                    round3(0.6 + 0.1 * (t * 0.7).sin()),
                    round3(0.6 + 0.1 * (t * 0.7).cos()),
                    phase(0.5).abs(),
                    phase(0.5).abs(),
                    phase(1.5).abs(),
                    phase(1.5).abs()
                ]),
            ),
            (
                "Arm1Angular_In",
                json!([phase(0.0), phase(0.7), phase(1.4), 0.0, 0.0, 0.0]),
            ),
        ]
    }

    /// Encodes the next step as one frame per channel, all stamped `tm`.
    pub fn next_frames(&mut self, tm: f64) -> Result<Vec<String>, ProtocolError> {
        self.next_samples()
            .into_iter()
            .map(|(channel, data)| {
                let sample = Sample {
                    timestamp: Some(tm),
                    data,
                };
                encode_frame(&BTreeMap::from([(channel.to_string(), sample)]))
            })
            .collect()
    }
}

/// Publishes one simulated step per `interval` until `shutdown` flips.
pub async fn publish_simulated(
    interval: Duration,
    frames: broadcast::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sim = TelemetrySimulator::new(interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => match sim.next_frames(now_secs()) {
                Ok(batch) => {
                    for frame in batch {
                        // No viewers connected is fine.
                        let _ = frames.send(frame);
                    }
                }
                Err(e) => log::error!("Simulation step failed: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemux::net::decode_frame;

    #[test]
    fn test_frames_carry_one_channel_each() {
        let mut sim = TelemetrySimulator::new(Duration::from_millis(100));
        let frames = sim.next_frames(12.5).unwrap();

        assert_eq!(frames.len(), 8);
        for text in &frames {
            let frame = decode_frame(text).unwrap();
            assert!(frame.rejected.is_empty());
            assert_eq!(frame.envelopes.len(), 1);
            assert_eq!(frame.envelopes[0].timestamp, Some(12.5));
        }
    }

    #[test]
    fn test_steps_advance_time() {
        let mut sim = TelemetrySimulator::new(Duration::from_millis(100));
        sim.next_samples();
        sim.next_samples();
        assert!((sim.elapsed() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_battery_drains_and_stays_in_range() {
        let mut sim = TelemetrySimulator::new(Duration::from_secs(60));
        let mut last = f64::MAX;
        for _ in 0..5 {
            let samples = sim.next_samples();
            let battery = samples[0].1.as_f64().unwrap();
            assert!((0.0..=100.0).contains(&battery));
            assert!(battery < last);
            last = battery;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_publisher_stops_on_shutdown() {
        let (frames, mut feed) = broadcast::channel(64);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(publish_simulated(
            Duration::from_millis(100),
            frames,
            shutdown_rx,
        ));

        let first = feed.recv().await.unwrap();
        assert!(decode_frame(&first).is_ok());

        shutdown.send_replace(true);
        task.await.unwrap();
    }

    #[test]
    fn test_heading_wraps() {
        let wrapped = wrap_angle(3.0 * PI);
        assert!((wrapped.abs() - PI).abs() < 1e-9);
        assert!((wrap_angle(0.5) - 0.5).abs() < 1e-12);
    }
}
