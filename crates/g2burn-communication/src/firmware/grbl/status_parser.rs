//! GRBL Status Report Parsing
//!
//! Parses GRBL 1.1 status reports of the form
//! `<Run|MPos:1.000,2.000,0.000|Bf:15,128|FS:500,1000|WCO:0.000,0.000,0.000>`.
//! Only one of `MPos`/`WPos` is reported at a time; the other is derived
//! from the work coordinate offset when one has been seen.

use g2burn_core::{MachineState, Position};
use serde::{Deserialize, Serialize};

/// Planner and receive buffer availability (`Bf:` field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferState {
    /// Free planner blocks
    pub planner_blocks: u16,
    /// Free receive buffer bytes
    pub rx_bytes: u16,
}

/// A parsed status report
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusReport {
    /// Raw state field, e.g. `Hold:0`
    pub state_name: String,
    /// Mapped state, `None` for names this parser does not know
    pub state: Option<MachineState>,
    pub sub_state: Option<u8>,
    pub machine_position: Option<Position>,
    pub work_position: Option<Position>,
    pub work_offset: Option<Position>,
    pub buffer: Option<BufferState>,
    pub feed_rate: Option<f64>,
    pub spindle_speed: Option<f64>,
}

fn parse_position(value: &str) -> Option<Position> {
    let coords: Vec<f64> = value
        .split(',')
        .map(|s| s.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match coords.as_slice() {
        [x, y] => Some(Position::new(*x, *y, 0.0)),
        [x, y, z, ..] => Some(Position::new(*x, *y, *z)),
        _ => None,
    }
}

fn parse_numbers(value: &str) -> Vec<f64> {
    value
        .split(',')
        .filter_map(|s| s.trim().parse::<f64>().ok())
        .collect()
}

/// Parse a status report line. Returns `None` when the line is not a
/// well-formed `<...>` report.
pub fn parse_status(line: &str) -> Option<StatusReport> {
    let inner = line.trim().strip_prefix('<')?.strip_suffix('>')?;
    let mut fields = inner.split('|');
    let state_name = fields.next()?.trim();
    if state_name.is_empty() {
        return None;
    }

    let mut report = StatusReport {
        state_name: state_name.to_string(),
        state: MachineState::from_grbl_name(state_name),
        sub_state: state_name
            .split_once(':')
            .and_then(|(_, sub)| sub.parse().ok()),
        ..Default::default()
    };

    for field in fields {
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        match key {
            "MPos" => report.machine_position = parse_position(value),
            "WPos" => report.work_position = parse_position(value),
            "WCO" => report.work_offset = parse_position(value),
            "Bf" => {
                if let [planner, rx] = parse_numbers(value).as_slice() {
                    report.buffer = Some(BufferState {
                        planner_blocks: *planner as u16,
                        rx_bytes: *rx as u16,
                    });
                }
            }
            "FS" => {
                let nums = parse_numbers(value);
                report.feed_rate = nums.first().copied();
                report.spindle_speed = nums.get(1).copied();
            }
            "F" => report.feed_rate = parse_numbers(value).first().copied(),
            _ => {}
        }
    }

    if let Some(wco) = report.work_offset {
        match (report.machine_position, report.work_position) {
            (Some(mpos), None) => report.work_position = Some(mpos - wco),
            (None, Some(wpos)) => report.machine_position = Some(wpos + wco),
            _ => {}
        }
    }

    Some(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_report() {
        let report =
            parse_status("<Run|MPos:10.000,5.000,0.000|Bf:15,96|FS:500,750|WCO:2.000,1.000,0.000>")
                .unwrap();
        assert_eq!(report.state, Some(MachineState::Run));
        assert_eq!(report.machine_position, Some(Position::new(10.0, 5.0, 0.0)));
        assert_eq!(report.work_position, Some(Position::new(8.0, 4.0, 0.0)));
        assert_eq!(
            report.buffer,
            Some(BufferState {
                planner_blocks: 15,
                rx_bytes: 96
            })
        );
        assert_eq!(report.feed_rate, Some(500.0));
        assert_eq!(report.spindle_speed, Some(750.0));
    }

    #[test]
    fn test_sub_state_and_wpos() {
        let report = parse_status("<Hold:1|WPos:1.5,2.5,0|F:0>").unwrap();
        assert_eq!(report.state, Some(MachineState::Hold));
        assert_eq!(report.sub_state, Some(1));
        assert_eq!(report.work_position, Some(Position::new(1.5, 2.5, 0.0)));
        assert_eq!(report.machine_position, None);
        assert_eq!(report.feed_rate, Some(0.0));
    }

    #[test]
    fn test_malformed() {
        assert!(parse_status("<Idle|MPos:0,0,0").is_none());
        assert!(parse_status("<>").is_none());
        let report = parse_status("<Idle|MPos:a,b,c>").unwrap();
        assert_eq!(report.machine_position, None);
        assert_eq!(parse_status("<Weird>").unwrap().state, None);
    }
}
