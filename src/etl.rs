//! Connectivity, identity, clock and GPS queries against the analyzer.
//!
//! Every operation opens its own session and closes it before returning, so
//! a stale link never survives between menu choices.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};

use crate::error::InstrumentError;
use crate::scpi::{single_quoted, Resource, SerialLink, Session, SimulatedEtl, SimulatorLink, TcpLink};

/// Read timeout for every query.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Device clock may drift this many seconds from the host before the
/// operator is warned.
pub const CLOCK_WARNING_SECONDS: f64 = 2.0;

/// Folder on the analyzer holding channel tables.
pub const CHANNEL_TABLE_FOLDER: &str = r"C:\R_S\instr\catv\channel_tables";

/// True when the device clock is off by more than the warning threshold.
/// Exactly two seconds is still acceptable.
pub fn exceeds_clock_threshold(delta_seconds: f64) -> bool {
    delta_seconds.abs() > CLOCK_WARNING_SECONDS
}

/// GPS fix as reported by the analyzer. Values are kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsFix {
    pub latitude: String,
    pub longitude: String,
    pub altitude: String,
    pub satellites: String,
}

/// Result of the startup connectivity check.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivityReport {
    pub identity: Option<String>,
    pub device_clock: Option<NaiveDateTime>,
    /// Device minus host, in seconds.
    pub clock_delta: Option<f64>,
}

impl ConnectivityReport {
    pub fn clock_warning(&self) -> Option<f64> {
        self.clock_delta.filter(|d| exceeds_clock_threshold(*d))
    }
}

/// Handle on the analyzer at one address.
pub struct Etl {
    resource: Resource,
    timeout: Duration,
    simulator: Option<Rc<RefCell<SimulatedEtl>>>,
}

impl Etl {
    pub fn new(resource: Resource) -> Self {
        let simulator = match resource {
            Resource::Simulated => Some(Rc::new(RefCell::new(SimulatedEtl::default()))),
            _ => None,
        };
        Self {
            resource,
            timeout: DEFAULT_TIMEOUT,
            simulator,
        }
    }

    /// Handle on an existing simulator, so a test can inspect its state.
    pub fn simulated(sim: Rc<RefCell<SimulatedEtl>>) -> Self {
        Self {
            resource: Resource::Simulated,
            timeout: DEFAULT_TIMEOUT,
            simulator: Some(sim),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// The simulated analyzer behind a `SIM` resource.
    pub fn simulator(&self) -> Option<Rc<RefCell<SimulatedEtl>>> {
        self.simulator.clone()
    }

    /// Opens a fresh session. The caller closes it by dropping it.
    pub fn open(&self) -> Result<Session, InstrumentError> {
        let name = self.resource.to_string();
        let session = match &self.resource {
            Resource::Tcp { host, port } => {
                Session::new(Box::new(TcpLink::connect(host, *port, self.timeout)?), name)
            }
            Resource::Serial { port, baud_rate } => {
                Session::new(Box::new(SerialLink::open(port, *baud_rate, self.timeout)?), name)
            }
            Resource::Simulated => {
                let sim = self
                    .simulator
                    .as_ref()
                    .ok_or_else(|| InstrumentError::Unreachable {
                        resource: name.clone(),
                        reason: "simulator not attached".to_string(),
                    })?;
                Session::new(Box::new(SimulatorLink::new(Rc::clone(sim))), name)
            }
        };
        Ok(session)
    }

    /// Opens and closes a session to prove the analyzer is reachable.
    pub fn test_connection(&self) -> Result<(), InstrumentError> {
        match self.open() {
            Ok(session) => {
                tracing::debug!("Connect to ({}): True", self.resource);
                drop(session);
                Ok(())
            }
            Err(e) => {
                tracing::debug!("Could not connect to {}: {}", self.resource, e);
                Err(e)
            }
        }
    }

    /// Clears the error queue and returns the `*IDN?` string.
    pub fn query_identity(&self) -> Result<String, InstrumentError> {
        let mut session = self.open()?;
        session.clear()?;
        session.write("*CLS")?;
        session.query("*IDN?")
    }

    pub fn query_device_clock(&self) -> Result<NaiveDateTime, InstrumentError> {
        let mut session = self.open()?;
        read_device_clock(&mut session)
    }

    /// Device clock minus host clock, in seconds.
    pub fn compare_to_host_clock(&self) -> Result<f64, InstrumentError> {
        let device = self.query_device_clock()?;
        Ok(clock_delta(device, Local::now().naive_local()))
    }

    /// Identity, device clock and a trailing `*OPC?`, each best-effort once
    /// the link is open.
    pub fn connectivity_report(&self) -> Result<ConnectivityReport, InstrumentError> {
        let mut session = self.open()?;
        if let Err(e) = session.clear() {
            tracing::debug!("clear failed: {}", e);
        }
        session.write_or_log("*CLS", "Clear error queue");

        let identity = match session.query("*IDN?") {
            Ok(idn) => Some(idn),
            Err(e) => {
                tracing::debug!("*IDN? failed: {}", e);
                None
            }
        };
        tracing::info!(
            "Connected to {} at {}",
            identity.as_deref().unwrap_or("unknown instrument"),
            self.resource
        );

        let device_clock = match read_device_clock(&mut session) {
            Ok(clock) => Some(clock),
            Err(e) => {
                tracing::debug!("Failed to read ETL date and time: {}", e);
                None
            }
        };
        let clock_delta = device_clock.map(|d| clock_delta(d, Local::now().naive_local()));
        if let Some(delta) = clock_delta {
            tracing::debug!("tdelta is {}", delta);
        }

        session.opc_or_log("connectivity check");

        Ok(ConnectivityReport {
            identity,
            device_clock,
            clock_delta,
        })
    }

    /// Pushes the host date and time to the analyzer and returns the
    /// remaining delta as read back from it.
    pub fn set_clock(&self, now: NaiveDateTime) -> Result<f64, InstrumentError> {
        tracing::warn!("Setting ETL date and time.");
        let mut session = self.open()?;
        session.write(&format!("SYST:DATE {}", now.format("%Y,%-m,%-d")))?;
        session.write(&format!("SYST:TIME {}", now.format("%-H,%-M,%-S")))?;

        let device = read_device_clock(&mut session)?;
        let delta = clock_delta(device, Local::now().naive_local());
        tracing::info!("ETL date and time: {}", device.format("%Y-%m-%d %H:%M:%S"));
        if exceeds_clock_threshold(delta) {
            tracing::info!("Time delta is still {:.1} seconds", delta);
        }
        session.opc_or_log("Set ETL Clock");
        Ok(delta)
    }

    /// Reads the GPS fix. `Ok(None)` means no receiver is connected.
    ///
    /// Outside the TV/Radio analyzer mode the status query goes unanswered,
    /// which is reported as `Unsupported`.
    pub fn gps_fix(&self) -> Result<Option<GpsFix>, InstrumentError> {
        let mut session = self.open()?;
        let connected = match query_gps_connected(&mut session) {
            Ok(connected) => connected,
            Err(e) if e.is_timeout() => {
                return Err(InstrumentError::Unsupported(
                    "Did not get GPS status. ETL may not be in \"TV/Radio Analyzer\" mode.".to_string(),
                ))
            }
            Err(e) => return Err(e),
        };
        if !connected {
            tracing::warn!(" ----- GPS is NOT CONNECTED! -----");
            return Ok(None);
        }

        // Displays GPS data in the Overview measurement.
        session.write("DISP:MEAS:OVER:GPS:STAT ON")?;
        let fix = GpsFix {
            latitude: session.query("SYST:POS:LAT?")?,
            longitude: session.query("SYST:POS:LONG?")?,
            altitude: session.query("SYST:POS:ALT?")?,
            satellites: session.query("SYSTem:POSition:GPS:SATellites?")?,
        };
        session.opc_or_log("GPS fix");
        tracing::debug!(
            "Lat, Long: {},{}, Altitude: {}, GPS: {} (no. of satellites)",
            fix.latitude,
            fix.longitude,
            fix.altitude,
            fix.satellites
        );
        Ok(Some(fix))
    }

    /// `MMEM:CAT?` listing of a remote file or folder.
    pub fn catalog(&self, path: &str) -> Result<String, InstrumentError> {
        let mut session = self.open()?;
        session.query(&format!("MMEM:CAT? {}", single_quoted(path)))
    }

    pub fn results_folder_exists(&self, folder: &str) -> Result<bool, InstrumentError> {
        match self.catalog(folder) {
            Ok(_) => Ok(true),
            Err(e) if e.is_timeout() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// True when `<name>.CHT` is stored in the analyzer's channel table folder.
    pub fn channel_table_exists(&self, name: &str) -> Result<bool, InstrumentError> {
        let path = format!(r"{}\{}.CHT", CHANNEL_TABLE_FOLDER, name);
        tracing::debug!("Query for file: '{}'", path);
        match self.catalog(&path) {
            Ok(listing) => Ok(listing == format!("'{}.CHT'", name)),
            Err(e) if e.is_timeout() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

pub(crate) fn query_gps_connected(session: &mut Session) -> Result<bool, InstrumentError> {
    let response = session.query("SYST:POS:GPS:CONN?")?;
    match response.trim().parse::<i32>() {
        Ok(flag) => Ok(flag == 1),
        Err(_) => Err(InstrumentError::UnexpectedResponse {
            command: "SYST:POS:GPS:CONN?".to_string(),
            response,
        }),
    }
}

pub(crate) fn read_device_clock(session: &mut Session) -> Result<NaiveDateTime, InstrumentError> {
    let date = session.query("SYST:DATE?")?;
    let time = session.query("SYST:TIME?")?;
    parse_device_clock(&date, &time).ok_or_else(|| InstrumentError::UnexpectedResponse {
        command: "SYST:DATE?/SYST:TIME?".to_string(),
        response: format!("{} {}", date, time),
    })
}

/// Parses the analyzer's `2020,5,9` and `7,38,53` answers.
pub fn parse_device_clock(date: &str, time: &str) -> Option<NaiveDateTime> {
    let text = format!("{} {}", date.trim(), time.trim());
    NaiveDateTime::parse_from_str(&text, "%Y,%m,%d %H,%M,%S").ok()
}

/// Device minus host, in seconds.
pub fn clock_delta(device: NaiveDateTime, host: NaiveDateTime) -> f64 {
    (device - host).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sim_etl() -> (Etl, Rc<RefCell<SimulatedEtl>>) {
        let sim = Rc::new(RefCell::new(SimulatedEtl::default()));
        (Etl::simulated(Rc::clone(&sim)), sim)
    }

    #[test]
    fn clock_threshold_is_strictly_greater_than_two_seconds() {
        assert!(!exceeds_clock_threshold(2.0));
        assert!(!exceeds_clock_threshold(-2.0));
        assert!(exceeds_clock_threshold(2.01));
        assert!(exceeds_clock_threshold(-7.5));
        assert!(!exceeds_clock_threshold(0.0));
    }

    #[test]
    fn parses_unpadded_device_clock() {
        let clock = parse_device_clock("2020,5,9\n", "7,38,53\n").unwrap();
        let expected = NaiveDate::from_ymd_opt(2020, 5, 9)
            .unwrap()
            .and_hms_opt(7, 38, 53)
            .unwrap();
        assert_eq!(clock, expected);
        assert!(parse_device_clock("2020-05-09", "07:38:53").is_none());
    }

    #[test]
    fn clock_delta_sign_is_device_minus_host() {
        let host = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(12, 0, 0).unwrap();
        let device = host + chrono::Duration::seconds(5);
        assert_eq!(clock_delta(device, host), 5.0);
        assert_eq!(clock_delta(host, device), -5.0);
    }

    #[test]
    fn connectivity_report_reads_identity_and_clock() {
        let (etl, sim) = sim_etl();
        sim.borrow_mut().clock_offset = chrono::Duration::seconds(30);
        let report = etl.connectivity_report().unwrap();
        assert!(report.identity.as_deref().unwrap().contains("ETL"));
        let delta = report.clock_delta.unwrap();
        assert!((delta - 30.0).abs() < 2.0);
        assert!(report.clock_warning().is_some());
        assert_eq!(sim.borrow().history[0], "*CLS");
    }

    #[test]
    fn set_clock_brings_device_in_line() {
        let (etl, sim) = sim_etl();
        sim.borrow_mut().clock_offset = chrono::Duration::minutes(-10);
        let delta = etl.set_clock(Local::now().naive_local()).unwrap();
        assert!(!exceeds_clock_threshold(delta));
        assert!(sim.borrow().history.iter().any(|c| c.starts_with("SYST:DATE ")));
        assert!(sim.borrow().history.iter().any(|c| c.starts_with("SYST:TIME ")));
    }

    #[test]
    fn gps_fix_enables_overlay() {
        let (etl, sim) = sim_etl();
        let fix = etl.gps_fix().unwrap().unwrap();
        assert_eq!(fix.satellites, "9");
        assert!(sim.borrow().gps_overlay);
    }

    #[test]
    fn gps_not_connected_is_none() {
        let (etl, sim) = sim_etl();
        sim.borrow_mut().gps = None;
        assert_eq!(etl.gps_fix().unwrap(), None);
    }

    #[test]
    fn gps_outside_tv_mode_is_unsupported() {
        let (etl, sim) = sim_etl();
        sim.borrow_mut().mode = Some("SAN".to_string());
        assert!(matches!(etl.gps_fix(), Err(InstrumentError::Unsupported(_))));
    }

    #[test]
    fn channel_table_lookup() {
        let (etl, _) = sim_etl();
        assert!(etl.channel_table_exists("TV-USA-ATSC").unwrap());
        assert!(!etl.channel_table_exists("TV-NOWHERE").unwrap());
    }

    #[test]
    fn results_folder_lookup() {
        let (etl, _) = sim_etl();
        assert!(etl.results_folder_exists(r"Z:\Measurement_results").unwrap());
        assert!(!etl.results_folder_exists(r"Q:\nothing").unwrap());
    }
}
