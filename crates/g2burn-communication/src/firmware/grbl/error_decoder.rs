//! GRBL error and alarm code descriptions

/// Describe a GRBL 1.1 `error:N` code
pub fn decode_error(code: u8) -> &'static str {
    match code {
        1 => "Expected command letter",
        2 => "Bad number format",
        3 => "Invalid '$' statement",
        4 => "Negative value where positive expected",
        5 => "Homing cycle not enabled",
        6 => "Step pulse time must exceed 3us",
        7 => "EEPROM read failed, settings restored to defaults",
        8 => "'$' command requires Idle state",
        9 => "G-code locked out during alarm or jog",
        10 => "Soft limits require homing",
        11 => "Line exceeds maximum length",
        12 => "Step rate exceeds maximum",
        13 => "Safety door opened",
        14 => "Build info or startup line too long",
        15 => "Jog target exceeds machine travel",
        16 => "Invalid jog command",
        17 => "Laser mode requires PWM output",
        20 => "Unsupported G-code command",
        21 => "More than one command from the same modal group",
        22 => "Feed rate not set",
        23 => "Command requires an integer value",
        24 => "More than one command requires axis words",
        25 => "Repeated G-code word",
        26 => "Command requires axis words",
        27 => "Line number out of range",
        28 => "Missing P or L value word",
        29 => "Unsupported work coordinate system",
        30 => "G53 requires G0 or G1 motion mode",
        31 => "Unused axis words with G80 active",
        32 => "Arc has no axis words in the selected plane",
        33 => "Invalid motion target",
        34 => "Arc radius geometry error",
        35 => "Arc missing IJK offset word",
        36 => "Unused G-code words in block",
        37 => "Tool length offset on wrong axis",
        38 => "Tool number too large",
        _ => "Unknown error",
    }
}

/// Describe a GRBL 1.1 `ALARM:N` code
pub fn decode_alarm(code: u8) -> &'static str {
    match code {
        1 => "Hard limit triggered, position lost",
        2 => "Motion target exceeds machine travel",
        3 => "Reset while in motion, position lost",
        4 => "Touch plate input not in expected initial state",
        5 => "Touch-off cycle did not contact the workpiece",
        6 => "Homing reset",
        7 => "Safety door opened during homing",
        8 => "Homing failed to clear limit switch",
        9 => "Homing could not find limit switch",
        10 => "Homing second locate failed",
        _ => "Unknown alarm",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_and_unknown_codes() {
        assert_eq!(decode_error(22), "Feed rate not set");
        assert_eq!(decode_error(200), "Unknown error");
        assert_eq!(decode_alarm(1), "Hard limit triggered, position lost");
        assert_eq!(decode_alarm(99), "Unknown alarm");
    }
}
