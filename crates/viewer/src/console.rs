use serde_json::{Value, json};

use telemux::{OutboundFrame, ProtocolError};

/// Zero-valued sample for a channel, used when a console line names a
/// channel without data.
pub fn zero_sample(channel: &str) -> Option<Value> {
    let data = match channel {
        "MainCapacityRatio_In" | "GCCapacityRatio_In" => json!(0),
        "Mode_In" => json!([0, 0, 0, 0, 0, 0]),
        "Pose3D_In" | "Arm1Pose3D_In" => json!({
            "position": {"x": 0, "y": 0, "z": 0},
            "orientation": {"r": 0, "p": 0, "y": 0}
        }),
        "Velocity2D_In" => json!({"vx": 0, "vy": 0, "va": 0}),
        "FlipperAngle_In" => json!([0, 0, 0, 0]),
        "MotorLoad_In" => json!([0, 0, 0, 0, 0, 0]),
        _ => return None,
    };
    Some(data)
}

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("unknown command {0}")]
    UnknownCommand(String),
    #[error("unknown channel {0}")]
    UnknownChannel(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, PartialEq)]
pub enum ConsoleInput {
    Send(OutboundFrame),
    /// Resubmit frames held while the link was down.
    Resend,
    Stats,
    State,
}

/// Parses one debug-console line. Blank lines yield `None`.
///
/// A line is a `:command`, a JSON channel map such as
/// `{"Mode_In": {"data": [1, 0, 0, 0, 0, 0]}}`, or a bare channel name,
/// which sends that channel's zero sample.
pub fn parse_line(line: &str) -> Option<Result<ConsoleInput, ConsoleError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let input = match line {
        ":resend" => Ok(ConsoleInput::Resend),
        ":stats" => Ok(ConsoleInput::Stats),
        ":state" => Ok(ConsoleInput::State),
        _ if line.starts_with(':') => Err(ConsoleError::UnknownCommand(line.to_string())),
        _ if line.starts_with('{') => OutboundFrame::parse(line)
            .map(ConsoleInput::Send)
            .map_err(ConsoleError::from),
        _ => zero_sample(line)
            .map(|data| ConsoleInput::Send(OutboundFrame::new().with(line, data)))
            .ok_or_else(|| ConsoleError::UnknownChannel(line.to_string())),
    };
    Some(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_lines_skipped() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   \t").is_none());
    }

    #[test]
    fn test_channel_map_line() {
        let Some(Ok(ConsoleInput::Send(frame))) =
            parse_line(r#"{"Mode_In": {"data": [1, 0, 0, 0, 0, 0]}}"#)
        else {
            panic!("expected a frame");
        };
        assert_eq!(frame.channels().collect::<Vec<_>>(), vec!["Mode_In"]);
    }

    #[test]
    fn test_bare_channel_sends_zero_sample() {
        let Some(Ok(ConsoleInput::Send(frame))) = parse_line("FlipperAngle_In") else {
            panic!("expected a frame");
        };
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(value["FlipperAngle_In"]["data"], json!([0, 0, 0, 0]));
    }

    #[test]
    fn test_commands() {
        assert!(matches!(parse_line(" :resend "), Some(Ok(ConsoleInput::Resend))));
        assert!(matches!(parse_line(":stats"), Some(Ok(ConsoleInput::Stats))));
        assert!(matches!(parse_line(":state"), Some(Ok(ConsoleInput::State))));
        assert!(matches!(
            parse_line(":quit"),
            Some(Err(ConsoleError::UnknownCommand(_)))
        ));
    }

    #[test]
    fn test_bad_lines_rejected() {
        assert!(matches!(
            parse_line("Nope_In"),
            Some(Err(ConsoleError::UnknownChannel(_)))
        ));
        assert!(matches!(
            parse_line(r#"{"Mode_In": [1]}"#),
            Some(Err(ConsoleError::Protocol(ProtocolError::MissingData { .. })))
        ));
    }
}
