use log::{debug, info};
use serialport::SerialPort;
use std::io::{self, Read};
use std::time::{Duration, Instant};

use crate::config::SerialConfig;

/// Line-oriented view of a serial device.
///
/// `read_line` returns whatever arrived before the read timeout, which may be
/// an empty string or a partial line without its terminator.
pub trait LineChannel: Send {
    fn port_name(&self) -> &str;
    fn read_line(&mut self) -> io::Result<String>;
    fn close(&mut self);
}

pub struct SerialLineChannel {
    port_name: String,
    baud_rate: u32,
    read_timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
    pending: Vec<u8>,
}

impl SerialLineChannel {
    pub fn new(port_name: &str, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            read_timeout,
            port: None,
            pending: Vec::new(),
        }
    }

    pub fn from_config(config: &SerialConfig) -> Self {
        Self::new(&config.port, config.baud_rate, config.read_timeout())
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    // Opened on first use and kept for the lifetime of the channel, so
    // repeated reads never leak descriptors.
    fn ensure_open(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        if self.port.is_none() {
            info!("🔌 Opening serial port {} ({} baud, 8N1)", self.port_name, self.baud_rate);
            let port = serialport::new(&self.port_name, self.baud_rate)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .timeout(self.read_timeout)
                .open()
                .map_err(io::Error::from)?;
            self.port = Some(port);
        }

        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port not open"))
    }

    fn take_line(&mut self) -> Option<String> {
        let newline_pos = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=newline_pos).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

impl LineChannel for SerialLineChannel {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn read_line(&mut self) -> io::Result<String> {
        let deadline = Instant::now() + self.read_timeout;
        let mut buffer = [0u8; 256];

        // The port is always opened and read at least once, whatever the timeout
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }

            let result = self.ensure_open()?.read(&mut buffer);
            match result {
                Ok(0) => std::thread::sleep(Duration::from_millis(10)),
                Ok(n) => self.pending.extend_from_slice(&buffer[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                if let Some(line) = self.take_line() {
                    return Ok(line);
                }
                break;
            }
        }

        // Timed out: hand back the partial line, the caller decides what it is worth
        let partial = std::mem::take(&mut self.pending);
        debug!("Read timeout on {} with {} pending bytes", self.port_name, partial.len());
        Ok(String::from_utf8_lossy(&partial).into_owned())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            self.pending.clear();
            info!("✅ Serial port {} closed", self.port_name);
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Replays canned lines; once exhausted every read behaves like a timeout.
    pub struct ScriptedChannel {
        lines: VecDeque<String>,
        pub reads: Arc<AtomicUsize>,
        pub closes: usize,
    }

    impl ScriptedChannel {
        pub fn new<I, S>(lines: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                lines: lines.into_iter().map(Into::into).collect(),
                reads: Arc::new(AtomicUsize::new(0)),
                closes: 0,
            }
        }
    }

    impl LineChannel for ScriptedChannel {
        fn port_name(&self) -> &str {
            "scripted"
        }

        fn read_line(&mut self) -> io::Result<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            match self.lines.pop_front() {
                Some(line) => Ok(line),
                None => {
                    std::thread::sleep(Duration::from_millis(5));
                    Ok(String::new())
                }
            }
        }

        fn close(&mut self) {
            self.closes += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_is_lazy() {
        let channel = SerialLineChannel::new("/dev/does-not-exist", 57600, Duration::from_millis(10));
        assert!(!channel.is_open());
        assert_eq!(channel.port_name(), "/dev/does-not-exist");
    }

    #[test]
    fn test_open_failure_surfaces_as_io_error() {
        let mut channel = SerialLineChannel::new("/dev/does-not-exist", 57600, Duration::from_millis(10));
        assert!(channel.read_line().is_err());
        assert!(!channel.is_open());
    }

    #[test]
    fn test_zero_timeout_still_opens_the_port() {
        let mut channel = SerialLineChannel::new("/dev/does-not-exist", 57600, Duration::ZERO);
        assert!(channel.read_line().is_err());
        assert!(!channel.is_open());
    }

    #[test]
    fn test_close_twice_is_noop() {
        let mut channel = SerialLineChannel::new("/dev/does-not-exist", 57600, Duration::from_millis(10));
        channel.close();
        channel.close();
        assert!(!channel.is_open());
    }

    #[test]
    fn test_take_line_splits_on_newline() {
        let mut channel = SerialLineChannel::new("/dev/null", 57600, Duration::from_millis(10));
        channel.pending.extend_from_slice(b"<msg>a</msg>\r\n<msg>b");
        assert_eq!(channel.take_line().as_deref(), Some("<msg>a</msg>\r\n"));
        assert_eq!(channel.take_line(), None);
        assert_eq!(channel.pending, b"<msg>b");
    }
}
