use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::InstrumentError;

use super::Transport;

/// Raw SCPI socket link.
pub struct TcpLink {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    timeout: Duration,
}

impl TcpLink {
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, InstrumentError> {
        let resource = format!("{}:{}", host, port);
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| unreachable_err(&resource, e))?
            .next()
            .ok_or_else(|| InstrumentError::Unreachable {
                resource: resource.clone(),
                reason: "address did not resolve".to_string(),
            })?;

        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| unreachable_err(&resource, e))?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);

        Ok(Self {
            stream,
            reader,
            timeout,
        })
    }
}

fn unreachable_err(resource: &str, e: io::Error) -> InstrumentError {
    InstrumentError::Unreachable {
        resource: resource.to_string(),
        reason: e.to_string(),
    }
}

impl Transport for TcpLink {
    fn write_line(&mut self, line: &str) -> Result<(), InstrumentError> {
        self.stream.write_all(line.as_bytes())?;
        self.stream.write_all(b"\n")?;
        self.stream.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, InstrumentError> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
            Ok(_) => Ok(line.trim_end_matches(['\r', '\n']).to_string()),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Err(InstrumentError::Timeout {
                    command: String::new(),
                    timeout: self.timeout,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drops stale bytes left over from an earlier query that timed out.
    fn clear(&mut self) -> Result<(), InstrumentError> {
        self.reader.get_ref().set_nonblocking(true)?;
        let mut scratch = [0u8; 256];
        let drained = loop {
            match self.reader.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.reader.get_ref().set_nonblocking(false)?;
        drained?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn exchanges_lines_with_a_socket_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "*IDN?\n");
            writer.write_all(b"Rohde&Schwarz,ETL,1.0\n").unwrap();
        });

        let mut link = TcpLink::connect("127.0.0.1", port, Duration::from_secs(2)).unwrap();
        link.write_line("*IDN?").unwrap();
        assert_eq!(link.read_line().unwrap(), "Rohde&Schwarz,ETL,1.0");
        server.join().unwrap();
    }

    #[test]
    fn silent_server_reports_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(400));
            drop(stream);
        });

        let mut link = TcpLink::connect("127.0.0.1", port, Duration::from_millis(100)).unwrap();
        link.write_line("*OPC?").unwrap();
        assert!(link.read_line().unwrap_err().is_timeout());
        server.join().unwrap();
    }

    #[test]
    fn refused_connection_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = TcpLink::connect("127.0.0.1", port, Duration::from_millis(200)).err().unwrap();
        assert!(matches!(err, InstrumentError::Unreachable { .. }));
    }
}
