//! Built-in captured payloads and payload-file loading.
//!
//! The built-in captures are verbatim byte sequences recorded from a live
//! logger session. They are replayed as opaque bytes; nothing in the replay
//! path depends on their content being well-formed.

use std::path::{Path, PathBuf};

/// A named, immutable capture shipped with the binary.
pub struct Capture {
    pub name: &'static str,
    pub bytes: &'static [u8],
}

/// Heartbeat frame recorded from a live session (14 bytes).
pub const HEARTBEAT: &[u8] = &[165, 1, 0, 16, 71, 31, 32, 79, 172, 254, 103, 0, 247, 21];

/// Telemetry data frame recorded from a live session (164 bytes).
pub const TELEMETRY: &[u8] = &[
    165, 151, 0, 16, 66, 44, 45, 79, 172, 254, 103, 1, 1, 39, 173, 118, 1, 0, 27, 12, 0, 0, 228,
    17, 81, 100, 1, 0, 187, 1, 0, 0, 83, 70, 52, 69, 83, 48, 48, 51, 77, 52, 67, 48, 53, 56, 32,
    32, 114, 1, 94, 11, 217, 2, 5, 0, 0, 0, 8, 0, 9, 0, 8, 0, 225, 8, 207, 8, 213, 8, 134, 19,
    110, 0, 0, 0, 229, 1, 0, 0, 176, 119, 0, 0, 246, 23, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 86, 50, 56, 48, 86, 49, 48, 48, 21, 0, 55, 24, 79, 11, 202, 2, 60, 0, 1, 0, 52, 5,
    77, 6, 23, 5, 7, 0, 0, 0, 0, 0, 6, 0, 228, 3, 224, 3, 227, 3, 86, 50, 56, 48, 86, 50, 56, 48,
    23, 5, 3, 18, 14, 19, 15, 0, 0, 0, 239, 21,
];

const BUILTINS: &[Capture] = &[
    Capture {
        name: "heartbeat",
        bytes: HEARTBEAT,
    },
    Capture {
        name: "telemetry",
        bytes: TELEMETRY,
    },
];

/// All built-in captures, in replay order.
pub fn builtins() -> &'static [Capture] {
    BUILTINS
}

/// Look up a built-in capture by name.
pub fn builtin(name: &str) -> Option<&'static [u8]> {
    BUILTINS.iter().find(|c| c.name == name).map(|c| c.bytes)
}

/// A payload resolved for replay, either built-in or loaded from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// The replay script the original probe sessions used: one heartbeat, then
/// one telemetry frame.
pub fn default_script() -> Vec<Payload> {
    vec![
        Payload {
            name: "heartbeat".to_string(),
            bytes: HEARTBEAT.to_vec(),
        },
        Payload {
            name: "telemetry".to_string(),
            bytes: TELEMETRY.to_vec(),
        },
    ]
}

/// Resolve a command-line argument into a payload.
///
/// Built-in capture names win; anything else must be a readable hex payload
/// file (whitespace- or comma-separated hex bytes, `#` starts a comment).
pub fn resolve(arg: &str) -> Result<Payload, CaptureError> {
    if let Some(bytes) = builtin(arg) {
        return Ok(Payload {
            name: arg.to_string(),
            bytes: bytes.to_vec(),
        });
    }

    let path = Path::new(arg);
    if !path.exists() {
        return Err(CaptureError::Unknown(arg.to_string()));
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| CaptureError::FileRead(path.to_path_buf(), e))?;
    let bytes = parse_hex(&contents)?;
    if bytes.is_empty() {
        return Err(CaptureError::EmptyPayload(path.to_path_buf()));
    }

    Ok(Payload {
        name: arg.to_string(),
        bytes,
    })
}

/// Parse a hex payload file body into bytes.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, CaptureError> {
    let mut digits: Vec<u8> = Vec::new();
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("");
        for c in line.chars() {
            if c.is_whitespace() || c == ',' {
                continue;
            }
            let digit = c
                .to_digit(16)
                .ok_or(CaptureError::InvalidHexDigit(c))?;
            digits.push(digit as u8);
        }
    }

    if digits.len() % 2 != 0 {
        return Err(CaptureError::OddHexLength(digits.len()));
    }

    Ok(digits.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect())
}

/// Payload resolution errors
#[derive(Debug)]
pub enum CaptureError {
    /// Argument is neither a built-in capture nor an existing file
    Unknown(String),
    FileRead(PathBuf, std::io::Error),
    InvalidHexDigit(char),
    OddHexLength(usize),
    EmptyPayload(PathBuf),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::Unknown(arg) => {
                write!(f, "'{}' is not a built-in capture or a payload file", arg)
            }
            CaptureError::FileRead(path, e) => {
                write!(f, "Failed to read payload file '{}': {}", path.display(), e)
            }
            CaptureError::InvalidHexDigit(c) => {
                write!(f, "Invalid hex digit '{}' in payload file", c)
            }
            CaptureError::OddHexLength(n) => {
                write!(f, "Payload file holds {} hex digits, expected an even count", n)
            }
            CaptureError::EmptyPayload(path) => {
                write!(f, "Payload file '{}' holds no bytes", path.display())
            }
        }
    }
}

impl std::error::Error for CaptureError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(builtin("heartbeat"), Some(HEARTBEAT));
        assert_eq!(builtin("telemetry"), Some(TELEMETRY));
        assert!(builtin("bogus").is_none());
    }

    #[test]
    fn test_default_script_order() {
        let script = default_script();
        assert_eq!(script.len(), 2);
        assert_eq!(script[0].name, "heartbeat");
        assert_eq!(script[0].bytes, HEARTBEAT);
        assert_eq!(script[1].name, "telemetry");
        assert_eq!(script[1].bytes, TELEMETRY);
    }

    #[test]
    fn test_parse_hex_formats() {
        assert_eq!(parse_hex("a5 01 00").unwrap(), vec![0xa5, 0x01, 0x00]);
        assert_eq!(parse_hex("A501,00").unwrap(), vec![0xa5, 0x01, 0x00]);
        assert_eq!(
            parse_hex("a5 01 # heartbeat header\n00").unwrap(),
            vec![0xa5, 0x01, 0x00]
        );
    }

    #[test]
    fn test_parse_hex_errors() {
        assert!(matches!(
            parse_hex("a5 0"),
            Err(CaptureError::OddHexLength(3))
        ));
        assert!(matches!(
            parse_hex("a5 zz"),
            Err(CaptureError::InvalidHexDigit('z'))
        ));
    }

    #[test]
    fn test_resolve_builtin_and_unknown() {
        let payload = resolve("heartbeat").unwrap();
        assert_eq!(payload.bytes, HEARTBEAT);
        assert!(matches!(
            resolve("no-such-capture"),
            Err(CaptureError::Unknown(_))
        ));
    }

    #[test]
    fn test_resolve_payload_file() {
        let dir = std::env::temp_dir();
        let path = dir.join("sofar-probe-test-payload.hex");
        std::fs::write(&path, "# heartbeat replay\na5 01 00 10 47\n").unwrap();

        let payload = resolve(path.to_str().unwrap()).unwrap();
        assert_eq!(payload.bytes, vec![0xa5, 0x01, 0x00, 0x10, 0x47]);

        std::fs::remove_file(&path).ok();
    }
}
