//! SCPI links to the analyzer.
//!
//! A [`Transport`] moves newline-terminated text to and from the instrument.
//! A [`Session`] sits on top of one open transport and adds logging plus the
//! `*OPC?` handshake used throughout the measurement scripts.

mod resource;
mod serial;
pub mod simulator;
mod tcp;

pub use resource::{Resource, DEFAULT_BAUD_RATE, RAW_SOCKET_PORT};
pub use serial::SerialLink;
pub use simulator::{SimulatedEtl, SimulatorLink};
pub use tcp::TcpLink;

use crate::error::InstrumentError;

/// Line-oriented link to an instrument.
pub trait Transport {
    /// Send one command. The terminator is appended by the transport.
    fn write_line(&mut self, line: &str) -> Result<(), InstrumentError>;

    /// Read one response line with the terminator stripped.
    fn read_line(&mut self) -> Result<String, InstrumentError>;

    /// Discard anything still buffered from a previous exchange.
    fn clear(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }
}

/// An open link to the analyzer. Dropping the session closes the link.
pub struct Session {
    link: Box<dyn Transport>,
    resource: String,
}

impl Session {
    pub fn new(link: Box<dyn Transport>, resource: impl Into<String>) -> Self {
        Self {
            link,
            resource: resource.into(),
        }
    }

    /// The address this session was opened on.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn clear(&mut self) -> Result<(), InstrumentError> {
        self.link.clear()
    }

    /// Sends a command that produces no response.
    pub fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        tracing::debug!("write to {}: {}", self.resource, command);
        self.link.write_line(command)
    }

    /// Sends a query and returns the trimmed response.
    pub fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        self.write(command)?;
        let response = match self.link.read_line() {
            Ok(response) => response,
            Err(InstrumentError::Timeout { timeout, .. }) => {
                return Err(InstrumentError::Timeout {
                    command: command.to_string(),
                    timeout,
                })
            }
            Err(e) => return Err(e),
        };
        let response = response.trim().to_string();
        tracing::debug!("response to {}: {}", command, response);
        Ok(response)
    }

    /// Operation complete query. The analyzer answers `1` once all pending
    /// overlapped operations are done.
    pub fn opc(&mut self) -> Result<(), InstrumentError> {
        let response = self.query("*OPC?")?;
        if response.trim_start_matches('+') == "1" {
            Ok(())
        } else {
            Err(InstrumentError::UnexpectedResponse {
                command: "*OPC?".to_string(),
                response,
            })
        }
    }

    /// Best-effort `*OPC?`: logs a failure under `context` and reports it
    /// as `false` instead of an error.
    pub fn opc_or_log(&mut self, context: &str) -> bool {
        match self.opc() {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Operation Complete query for {} failed: {}", context, e);
                false
            }
        }
    }

    /// Best-effort write: logs a failure under `context`.
    pub fn write_or_log(&mut self, command: &str, context: &str) -> bool {
        match self.write(command) {
            Ok(()) => true,
            Err(e) => {
                tracing::info!("{} failed: {}", context, e);
                false
            }
        }
    }
}

/// Quotes a remote path the way the analyzer's MMEM commands expect.
pub fn single_quoted(text: &str) -> String {
    format!("'{}'", text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn simulated_session() -> (Session, Rc<RefCell<SimulatedEtl>>) {
        let sim = Rc::new(RefCell::new(SimulatedEtl::default()));
        let link = SimulatorLink::new(Rc::clone(&sim));
        (Session::new(Box::new(link), "SIM"), sim)
    }

    #[test]
    fn query_returns_trimmed_response() {
        let (mut session, _) = simulated_session();
        let idn = session.query("*IDN?").unwrap();
        assert!(idn.starts_with("Rohde&Schwarz,ETL"));
        assert!(!idn.ends_with('\n'));
    }

    #[test]
    fn opc_accepts_one() {
        let (mut session, _) = simulated_session();
        assert!(session.opc().is_ok());
        assert!(session.opc_or_log("test"));
    }

    #[test]
    fn unknown_query_times_out_with_command_name() {
        let (mut session, _) = simulated_session();
        let err = session.query("BOGUS:QUERY?").unwrap_err();
        match err {
            InstrumentError::Timeout { command, .. } => assert_eq!(command, "BOGUS:QUERY?"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn writes_are_recorded_in_order() {
        let (mut session, sim) = simulated_session();
        session.write("*CLS").unwrap();
        session.write("INST CATV").unwrap();
        assert_eq!(sim.borrow().history, vec!["*CLS", "INST CATV"]);
    }

    #[test]
    fn single_quoted_wraps_text() {
        assert_eq!(single_quoted(r"Z:\Results"), r"'Z:\Results'");
    }
}
