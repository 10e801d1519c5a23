use std::f64::consts::PI;

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("{channel}: expected {expected}")]
    Shape {
        channel: String,
        expected: &'static str,
    },
}

/// Battery levels at or below which the gauge changes colour.
const BATTERY_LOW: f64 = 20.0;
const BATTERY_MID: f64 = 80.0;

const MODE_ROWS: [&str; 3] = ["operation", "speed-level", "speed-max"];
const FLIPPER_ACTIONS: [&str; 3] = ["selected", "up", "down"];
const WHEELS: [(&str, &str); 4] = [
    ("front", "right"),
    ("front", "left"),
    ("rear", "right"),
    ("rear", "left"),
];
const MOTORS: [(&str, &str); 6] = [
    ("main", "right"),
    ("main", "left"),
    ("front", "right"),
    ("front", "left"),
    ("rear", "right"),
    ("rear", "left"),
];

/// Which readout a channel feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Battery,
    Mode,
    Pose,
    Velocity,
    Flipper,
    MotorLoad,
    Series,
}

/// Per-channel parameters handed back to the handler on every sample.
#[derive(Debug, Clone)]
pub struct ChannelParams {
    pub panel: Panel,
    pub label: &'static str,
}

pub const CHANNELS: [(&str, ChannelParams); 11] = [
    ("MainCapacityRatio_In", params(Panel::Battery, "main battery")),
    ("GCCapacityRatio_In", params(Panel::Battery, "gc battery")),
    ("Mode_In", params(Panel::Mode, "mode")),
    ("Pose3D_In", params(Panel::Pose, "pose")),
    ("Velocity2D_In", params(Panel::Velocity, "velocity")),
    ("FlipperAngle_In", params(Panel::Flipper, "flipper")),
    ("MotorLoad_In", params(Panel::MotorLoad, "motor load")),
    ("Arm1Pose3D_In", params(Panel::Pose, "arm pose")),
    ("Arm1Angular_In", params(Panel::Series, "arm joints")),
    ("Arm1Finger_In", params(Panel::Series, "arm finger")),
    ("Arm1Current_In", params(Panel::Series, "arm current")),
];

const fn params(panel: Panel, label: &'static str) -> ChannelParams {
    ChannelParams { panel, label }
}

/// Radians to degrees, rounded to a multiple of `base`.
pub fn angle(rad: f64, base: f64) -> f64 {
    (rad * 180.0 / PI / base).round() * base
}

fn shape(channel: &str, expected: &'static str) -> PanelError {
    PanelError::Shape {
        channel: channel.to_string(),
        expected,
    }
}

fn numbers(channel: &str, data: &Value, len: usize) -> Result<Vec<f64>, PanelError> {
    let expected = "an array of numbers";
    let items = data.as_array().ok_or_else(|| shape(channel, expected))?;
    if items.len() < len {
        return Err(shape(channel, expected));
    }
    items
        .iter()
        .map(|v| v.as_f64().ok_or_else(|| shape(channel, expected)))
        .collect()
}

fn field(channel: &str, data: &Value, key: &str) -> Result<f64, PanelError> {
    data.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| shape(channel, "numeric fields"))
}

impl Panel {
    /// Formats one sample as a single readout line.
    pub fn render(&self, channel: &str, data: &Value) -> Result<String, PanelError> {
        match self {
            Panel::Battery => {
                let ratio = data.as_f64().ok_or_else(|| shape(channel, "a number"))?;
                if ratio < 0.0 {
                    return Ok("-".to_string());
                }
                let level = if ratio <= BATTERY_LOW {
                    "low"
                } else if ratio <= BATTERY_MID {
                    "mid"
                } else {
                    "full"
                };
                Ok(format!("{:.0}% ({})", ratio, level))
            }
            Panel::Mode => {
                let mode = numbers(channel, data, 5)?;
                let mut parts: Vec<String> = MODE_ROWS
                    .iter()
                    .zip(&mode)
                    .map(|(row, value)| format!("{}={}", row, *value as i64))
                    .collect();

                let mask = mode[3] as i64;
                let action = FLIPPER_ACTIONS
                    .get(mode[4] as usize)
                    .copied()
                    .unwrap_or("selected");
                let selected: Vec<String> = WHEELS
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, (fr, rl))| format!("{}-{}", fr, rl))
                    .collect();
                if !selected.is_empty() {
                    parts.push(format!("flippers {} {}", selected.join(","), action));
                }
                Ok(parts.join(" "))
            }
            Panel::Pose => {
                let position = data
                    .get("position")
                    .ok_or_else(|| shape(channel, "position and orientation"))?;
                let orientation = data
                    .get("orientation")
                    .ok_or_else(|| shape(channel, "position and orientation"))?;
                Ok(format!(
                    "x={:.3} y={:.3} z={:.3} r={:.1} p={:.1} y={:.1}",
                    field(channel, position, "x")?,
                    field(channel, position, "y")?,
                    field(channel, position, "z")?,
                    angle(field(channel, orientation, "r")?, 0.1),
                    angle(field(channel, orientation, "p")?, 0.1),
                    angle(field(channel, orientation, "y")?, 0.1),
                ))
            }
            Panel::Velocity => {
                let (vx, va) = velocity_targets(channel, data)?;
                Ok(format!("vx={:.2} m/s va={:.0} deg/s", vx, va))
            }
            Panel::Flipper => {
                let angles = numbers(channel, data, 4)?;
                let parts: Vec<String> = WHEELS
                    .iter()
                    .zip(&angles)
                    .map(|((fr, rl), rad)| format!("{}-{}={:.1}", fr, rl, angle(*rad, 1.0)))
                    .collect();
                Ok(parts.join(" "))
            }
            Panel::MotorLoad => {
                let loads = numbers(channel, data, 6)?;
                let parts: Vec<String> = MOTORS
                    .iter()
                    .zip(&loads)
                    .map(|((pos, rl), load)| format!("{}-{}={:.3}", pos, rl, load))
                    .collect();
                Ok(parts.join(" "))
            }
            Panel::Series => {
                let values = numbers(channel, data, 0)?;
                let parts: Vec<String> = values.iter().map(|v| format!("{:.3}", v)).collect();
                Ok(format!("[{}]", parts.join(", ")))
            }
        }
    }
}

/// Gauge targets from a `Velocity2D_In` sample: `vx` in m/s and `va`
/// converted to whole degrees per second.
pub fn velocity_targets(channel: &str, data: &Value) -> Result<(f64, f64), PanelError> {
    let vx = field(channel, data, "vx")?;
    let va = angle(field(channel, data, "va")?, 1.0);
    Ok((vx, va))
}
