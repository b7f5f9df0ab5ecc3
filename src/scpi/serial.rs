use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;

use crate::error::InstrumentError;

use super::Transport;

/// SCPI over an RS-232 line.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    timeout: Duration,
}

impl SerialLink {
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self, InstrumentError> {
        let port = serialport::new(path, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| InstrumentError::Unreachable {
                resource: path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { port, timeout })
    }
}

impl Transport for SerialLink {
    fn write_line(&mut self, line: &str) -> Result<(), InstrumentError> {
        let line = format!("{}\n", line);
        self.port.write_all(line.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, InstrumentError> {
        let mut response = Vec::new();
        let mut byte = [0u8; 1];
        let started = Instant::now();

        while started.elapsed() < self.timeout {
            match self.port.read(&mut byte) {
                Ok(0) => continue,
                Ok(_) if byte[0] == b'\n' => {
                    let text = String::from_utf8_lossy(&response);
                    return Ok(text.trim_end_matches('\r').to_string());
                }
                Ok(_) => response.push(byte[0]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }

        Err(InstrumentError::Timeout {
            command: String::new(),
            timeout: self.timeout,
        })
    }

    fn clear(&mut self) -> Result<(), InstrumentError> {
        self.port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}
