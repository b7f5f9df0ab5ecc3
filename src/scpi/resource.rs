use std::fmt;
use std::net::IpAddr;

use crate::error::ResourceError;

/// Raw SCPI socket port of R&S analyzers.
pub const RAW_SOCKET_PORT: u16 = 5025;

/// Line speed used for `ASRL` resources.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Where the analyzer lives, parsed from a VISA-style address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Tcp { host: String, port: u16 },
    Serial { port: String, baud_rate: u32 },
    Simulated,
}

impl Resource {
    /// Parses a bare IP address/host name or a VISA resource string.
    ///
    /// `TCPIP::<host>::INSTR` is served over the raw socket port, since the
    /// ETL accepts the same command set there.
    pub fn parse(address: &str) -> Result<Self, ResourceError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ResourceError::Empty);
        }

        let upper = address.to_ascii_uppercase();
        if upper == "SIM" || upper == "SIM::INSTR" {
            return Ok(Resource::Simulated);
        }

        // Compressed IPv6 contains `::` too.
        if let Ok(ip) = address.parse::<IpAddr>() {
            return Ok(Resource::Tcp {
                host: ip.to_string(),
                port: RAW_SOCKET_PORT,
            });
        }

        let parts: Vec<&str> = address.split("::").collect();
        let head = parts[0].to_ascii_uppercase();

        if head.starts_with("TCPIP") {
            let board = &head["TCPIP".len()..];
            if !board.chars().all(|c| c.is_ascii_digit()) {
                return Err(ResourceError::Unsupported(address.to_string()));
            }
            return match parts.as_slice() {
                [_, host] => Self::tcp(host, RAW_SOCKET_PORT, address),
                [_, host, kind] if kind.eq_ignore_ascii_case("INSTR") => {
                    Self::tcp(host, RAW_SOCKET_PORT, address)
                }
                [_, host, port, kind] if kind.eq_ignore_ascii_case("SOCKET") => {
                    let port = port
                        .parse::<u16>()
                        .map_err(|_| ResourceError::InvalidPort(port.to_string()))?;
                    Self::tcp(host, port, address)
                }
                _ => Err(ResourceError::Unsupported(address.to_string())),
            };
        }

        if head.starts_with("ASRL") {
            let target = &parts[0]["ASRL".len()..];
            if target.is_empty() || parts.len() > 2 || !is_instr_suffix(parts.get(1).copied()) {
                return Err(ResourceError::Unsupported(address.to_string()));
            }
            let port = if target.chars().all(|c| c.is_ascii_digit()) {
                format!("COM{}", target)
            } else {
                target.to_string()
            };
            return Ok(Resource::Serial {
                port,
                baud_rate: DEFAULT_BAUD_RATE,
            });
        }

        if parts.len() == 1 && is_host_name(address) {
            return Self::tcp(address, RAW_SOCKET_PORT, address);
        }

        Err(ResourceError::Unsupported(address.to_string()))
    }

    fn tcp(host: &str, port: u16, original: &str) -> Result<Self, ResourceError> {
        if !is_host_name(host) {
            return Err(ResourceError::Unsupported(original.to_string()));
        }
        Ok(Resource::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

fn is_instr_suffix(part: Option<&str>) -> bool {
    match part {
        None => true,
        Some(p) => p.eq_ignore_ascii_case("INSTR"),
    }
}

fn is_host_name(host: &str) -> bool {
    if host.parse::<IpAddr>().is_ok() {
        return true;
    }
    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && !host.chars().all(|c| c.is_ascii_digit() || c == '.')
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Tcp { host, port } if *port == RAW_SOCKET_PORT => {
                write!(f, "TCPIP::{}::INSTR", host)
            }
            Resource::Tcp { host, port } => write!(f, "TCPIP::{}::{}::SOCKET", host, port),
            Resource::Serial { port, .. } => match port.strip_prefix("COM") {
                Some(number) if number.chars().all(|c| c.is_ascii_digit()) => {
                    write!(f, "ASRL{}::INSTR", number)
                }
                _ => write!(f, "ASRL{}::INSTR", port),
            },
            Resource::Simulated => write!(f, "SIM::INSTR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp(host: &str, port: u16) -> Resource {
        Resource::Tcp {
            host: host.to_string(),
            port,
        }
    }

    #[test]
    fn bare_ip_uses_raw_socket() {
        assert_eq!(Resource::parse("192.168.1.50").unwrap(), tcp("192.168.1.50", 5025));
    }

    #[test]
    fn bare_ipv6_with_double_colon() {
        assert_eq!(Resource::parse("fe80::1").unwrap(), tcp("fe80::1", 5025));
        assert_eq!(Resource::parse("::1").unwrap(), tcp("::1", 5025));
        assert_eq!(
            Resource::parse("2001:db8:0:0:0:0:0:1").unwrap(),
            tcp("2001:db8::1", 5025)
        );
    }

    #[test]
    fn visa_instr_address() {
        assert_eq!(
            Resource::parse("TCPIP::10.0.0.7::INSTR").unwrap(),
            tcp("10.0.0.7", 5025)
        );
        assert_eq!(
            Resource::parse("tcpip0::etl-truck::INSTR").unwrap(),
            tcp("etl-truck", 5025)
        );
    }

    #[test]
    fn visa_socket_address_keeps_port() {
        assert_eq!(
            Resource::parse("TCPIP0::10.0.0.7::5555::SOCKET").unwrap(),
            tcp("10.0.0.7", 5555)
        );
        assert_eq!(
            Resource::parse("TCPIP::10.0.0.7::port::SOCKET").unwrap_err(),
            ResourceError::InvalidPort("port".to_string())
        );
    }

    #[test]
    fn serial_addresses() {
        assert_eq!(
            Resource::parse("ASRL3::INSTR").unwrap(),
            Resource::Serial {
                port: "COM3".to_string(),
                baud_rate: DEFAULT_BAUD_RATE
            }
        );
        assert_eq!(
            Resource::parse("ASRL/dev/ttyUSB0::INSTR").unwrap(),
            Resource::Serial {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: DEFAULT_BAUD_RATE
            }
        );
    }

    #[test]
    fn simulator_address() {
        assert_eq!(Resource::parse("sim").unwrap(), Resource::Simulated);
        assert_eq!(Resource::parse("SIM::INSTR").unwrap(), Resource::Simulated);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(Resource::parse("  ").unwrap_err(), ResourceError::Empty);
        assert!(Resource::parse("999.1.1").is_err());
        assert!(Resource::parse("USB0::0x0AAD::INSTR").is_err());
        assert!(Resource::parse("not an address").is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for text in [
            "TCPIP::10.0.0.7::INSTR",
            "TCPIP::10.0.0.7::5555::SOCKET",
            "ASRL3::INSTR",
            "SIM::INSTR",
        ] {
            let parsed = Resource::parse(text).unwrap();
            assert_eq!(parsed.to_string(), text);
        }
    }
}
