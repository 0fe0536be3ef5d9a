//! Framing and resynchronisation of the CC128 serial stream.
//!
//! The display unit writes one XML message per line, but the stream is
//! noisy: lines lose their first character, two messages get glued
//! together without a newline, stray blank lines and history dumps are
//! interleaved, and a read that starts mid-message returns only a tail.
//! [`FrameReader::read_frame`] turns that stream back into exactly one
//! well-formed `<msg>...</msg>` string per call.

use log::{debug, info};

use crate::serial::LineChannel;
use crate::utils::error::{FrameError, ReadTimeoutError};

/// Reads allowed per `read_frame` call before giving up.
pub const MAX_ATTEMPTS: u32 = 5;

const MESSAGE_START: &str = "<msg><src>";
const MESSAGE_OPEN: &str = "<msg>";
const MESSAGE_CLOSE: &str = "</msg>";
const TRUNCATED_OPEN: &str = "msg>";
const HISTORY_MARKER: &str = "<hist>";

/// What a single raw line turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineVerdict {
    /// Read timed out with nothing received.
    Empty,
    Blank,
    History,
    /// No message start anywhere on the line.
    NoDelimiter,
    Malformed(String),
    Frame(String),
}

/// Applies the fixups to one raw line and decides whether it is a frame.
pub fn classify_line(line: &str) -> LineVerdict {
    if line.is_empty() {
        return LineVerdict::Empty;
    }
    if line == "\n" {
        return LineVerdict::Blank;
    }
    if line.contains(HISTORY_MARKER) {
        return LineVerdict::History;
    }

    // The unit likes to drop the first character of a line
    let fixed;
    let line = if line.starts_with(TRUNCATED_OPEN) {
        fixed = format!("<{}", line);
        fixed.as_str()
    } else {
        line
    };

    // Garbage before the first message start is dropped; when two messages
    // were concatenated only the last one is kept.
    let Some(body) = line.split(MESSAGE_START).skip(1).last() else {
        return LineVerdict::NoDelimiter;
    };

    let candidate = format!("{}{}", MESSAGE_START, body.trim_end_matches(['\r', '\n']));
    if candidate.starts_with(MESSAGE_OPEN) && candidate.ends_with(MESSAGE_CLOSE) {
        LineVerdict::Frame(candidate)
    } else {
        LineVerdict::Malformed(candidate)
    }
}

pub struct FrameReader<C: LineChannel> {
    channel: C,
}

impl<C: LineChannel> FrameReader<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn port_name(&self) -> &str {
        self.channel.port_name()
    }

    /// Reads lines until one of them yields a complete message, spending at
    /// most [`MAX_ATTEMPTS`] reads.
    pub fn read_frame(&mut self) -> Result<String, FrameError> {
        for attempt in 1..=MAX_ATTEMPTS {
            debug!("Reading from {}, attempt {}", self.channel.port_name(), attempt);
            let line = self.channel.read_line()?;

            match classify_line(&line) {
                LineVerdict::Frame(frame) => return Ok(frame),
                LineVerdict::Empty => debug!("Read timed out with no data"),
                LineVerdict::Blank => {}
                LineVerdict::History => debug!("Skipping history message: {}", line.trim_end()),
                LineVerdict::NoDelimiter | LineVerdict::Malformed(_) => {
                    info!("Skipping malformed message: {}", line.trim_end())
                }
            }
        }

        Err(ReadTimeoutError {
            port: self.channel.port_name().to_string(),
            attempts: MAX_ATTEMPTS,
        }
        .into())
    }

    pub fn close(&mut self) {
        self.channel.close();
    }

    pub fn into_inner(self) -> C {
        self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::channel::testing::ScriptedChannel;
    use std::sync::atomic::Ordering;

    const FRAME: &str = "<msg><src>CC128-v0.11</src><ch1><watts>00345</watts></ch1></msg>";

    fn reader(lines: &[&str]) -> FrameReader<ScriptedChannel> {
        FrameReader::new(ScriptedChannel::new(lines.iter().copied()))
    }

    #[test]
    fn test_well_formed_line_is_returned_unchanged() {
        let line = format!("{}\r\n", FRAME);
        let mut reader = reader(&[line.as_str()]);
        assert_eq!(reader.read_frame().unwrap(), FRAME);
    }

    #[test]
    fn test_concatenated_messages_keep_the_last() {
        let mut reader = reader(&["garbage<msg><src>A</src></msg><msg><src>B</src></msg>\n"]);
        assert_eq!(reader.read_frame().unwrap(), "<msg><src>B</src></msg>");
    }

    #[test]
    fn test_missing_leading_bracket_is_restored() {
        let mut reader = reader(&["msg><src>1</src></msg>\n"]);
        assert_eq!(reader.read_frame().unwrap(), "<msg><src>1</src></msg>");
    }

    #[test]
    fn test_leading_garbage_is_dropped() {
        assert_eq!(
            classify_line("\u{fffd}x<msg><src>1</src></msg>\n"),
            LineVerdict::Frame("<msg><src>1</src></msg>".to_string())
        );
    }

    #[test]
    fn test_line_classification() {
        assert_eq!(classify_line(""), LineVerdict::Empty);
        assert_eq!(classify_line("\n"), LineVerdict::Blank);
        assert_eq!(classify_line("<msg><src>1</src><hist><dsw>1</dsw></hist></msg>\n"), LineVerdict::History);
        assert_eq!(classify_line("watts>00345</watts></ch1></msg>\n"), LineVerdict::NoDelimiter);
        assert_eq!(
            classify_line("<msg><src>1</src><ch1><wat\n"),
            LineVerdict::Malformed("<msg><src>1</src><ch1><wat".to_string())
        );
    }

    #[test]
    fn test_five_bad_lines_time_out() {
        let mut reader = reader(&["\n", "junk\n", "<msg><src>1</src>\n", "<hist></hist>\n", ""]);
        let err = reader.read_frame().unwrap_err();

        match err {
            FrameError::Timeout(timeout) => {
                assert_eq!(timeout.attempts, MAX_ATTEMPTS);
                assert_eq!(timeout.port, "scripted");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_four_bad_lines_then_good_succeeds() {
        let good = format!("{}\n", FRAME);
        let mut reader = reader(&["\n", "junk\n", "", "msg><src>1</src\n", good.as_str()]);
        assert_eq!(reader.read_frame().unwrap(), FRAME);
    }

    #[test]
    fn test_each_line_uses_one_attempt() {
        let channel = ScriptedChannel::new(["junk\n"; 7]);
        let reads = channel.reads.clone();
        let mut reader = FrameReader::new(channel);

        assert!(reader.read_frame().is_err());
        assert_eq!(reads.load(Ordering::SeqCst), MAX_ATTEMPTS as usize);
    }

    #[test]
    fn test_close_delegates_to_channel() {
        let mut reader = reader(&[]);
        reader.close();
        reader.close();
        assert_eq!(reader.into_inner().closes, 2);
    }
}
