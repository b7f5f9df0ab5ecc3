//! # Simulated ETL
//!
//! A software stand-in for the R&S ETL that answers the SCPI subset this
//! program sends. It holds the instrument state the commands act on and
//! replies the way the firmware does, including staying silent on commands
//! it does not know (the caller then sees a read timeout).
//!
//! The simulator backs the test suite and the `SIM` resource, which lets an
//! operator rehearse a site visit without the analyzer.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};

use crate::error::InstrumentError;

use super::Transport;

/// Errors the simulated command parser can raise.
#[derive(Debug, PartialEq)]
pub enum CommandError {
    /// Header is not part of the simulated command set.
    UnknownCommand(String),
    /// Header is known, but its parameter is not acceptable.
    InvalidParameter(String),
}

// Parsed form of every command the simulator understands.
#[derive(Debug, PartialEq)]
enum Command {
    ClearStatus,
    Identify,
    OperationComplete,
    QueryDate,
    QueryTime,
    SetDate(u32, u32, u32),
    SetTime(u32, u32, u32),
    GpsConnected,
    Latitude,
    Longitude,
    Altitude,
    Satellites,
    GpsOverlay(bool),
    SelectMode(String),
    SelectChannelTable(String),
    TuneChannel(u32),
    AttenuationMode(String),
    CenterFrequency,
    Measurement(String),
    ShoulderAttenuation(bool),
    DemodulatorSync,
    MakeDirectory(String),
    Catalog(String),
    HardcopyColorMap(String),
    HardcopyLanguage(String),
    HardcopyColor(bool),
    HardcopyDestination(String),
    FileName(String),
    HardcopyComment(String),
    Hardcopy,
    MeasurementLog(bool),
    StoreMeasurementLog(String),
}

/// GPS receiver state of the simulated analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedGps {
    pub latitude: String,
    pub longitude: String,
    pub altitude: String,
    pub satellites: u32,
}

impl Default for SimulatedGps {
    fn default() -> Self {
        Self {
            latitude: "41.878113".to_string(),
            longitude: "-87.629799".to_string(),
            altitude: "182".to_string(),
            satellites: 9,
        }
    }
}

// Screen capture settings, as set by the HCOP/MMEM:NAME commands.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HardcopySettings {
    pub color_map: String,
    pub language: String,
    pub color: bool,
    pub destination: String,
    pub file_name: String,
    pub comment: String,
}

/// The full state of the simulated analyzer.
#[derive(Debug, Clone)]
pub struct SimulatedEtl {
    pub identity: String,
    // Device clock is host clock plus this offset.
    pub clock_offset: chrono::Duration,
    // `None` means no GPS receiver is connected.
    pub gps: Option<SimulatedGps>,
    pub gps_overlay: bool,
    pub mode: Option<String>,
    // Channel tables stored on the analyzer, without the .CHT extension.
    pub channel_tables: BTreeSet<String>,
    pub channel_table: Option<String>,
    pub channel: Option<u32>,
    pub attenuation_mode: Option<String>,
    pub measurement: Option<String>,
    pub shoulder_attenuation: bool,
    // Number of sync polls answered with 0 before the demodulator locks.
    // `None` never locks.
    pub polls_until_lock: Option<u32>,
    pub measurement_log: bool,
    pub hardcopy: HardcopySettings,
    // Remote file system, as full Windows paths.
    pub directories: BTreeSet<String>,
    pub files: BTreeSet<String>,
    // Exports are silently dropped, as on an unmounted share.
    pub disk_full: bool,
    // The next write starting with this header fails as if the link dropped.
    pub drop_link_on: Option<String>,
    // Every line received, in order.
    pub history: Vec<String>,
    sync_polls: u32,
}

impl Default for SimulatedEtl {
    fn default() -> Self {
        let mut channel_tables = BTreeSet::new();
        channel_tables.insert("TV-USA-ATSC".to_string());
        let mut directories = BTreeSet::new();
        directories.insert(r"Z:\Measurement_results".to_string());

        Self {
            identity: "Rohde&Schwarz,ETL,2112.0004K03/101234,3.40 SP1".to_string(),
            clock_offset: chrono::Duration::zero(),
            gps: Some(SimulatedGps::default()),
            gps_overlay: false,
            mode: None,
            channel_tables,
            channel_table: None,
            channel: None,
            attenuation_mode: None,
            measurement: None,
            shoulder_attenuation: false,
            polls_until_lock: Some(0),
            measurement_log: false,
            hardcopy: HardcopySettings::default(),
            directories,
            files: BTreeSet::new(),
            disk_full: false,
            drop_link_on: None,
            history: Vec::new(),
            sync_polls: 0,
        }
    }
}

/// Center frequency in Hz of a channel in the US ATSC table.
pub fn atsc_center_frequency(channel: u32) -> Option<u64> {
    let mhz = match channel {
        2..=4 => 57 + (channel - 2) * 6,
        5..=6 => 79 + (channel - 5) * 6,
        7..=13 => 177 + (channel - 7) * 6,
        14..=36 => 473 + (channel - 14) * 6,
        _ => return None,
    };
    Some(u64::from(mhz) * 1_000_000)
}

impl SimulatedEtl {
    fn link_drops_at(&mut self, line: &str) -> bool {
        let drops = self.drop_link_on.as_deref().is_some_and(|header| line.starts_with(header));
        if drops {
            self.drop_link_on = None;
        }
        drops
    }

    /// Device clock as the analyzer would report it right now.
    pub fn device_clock(&self) -> NaiveDateTime {
        Local::now().naive_local() + self.clock_offset
    }

    /// Parses one command line into a `Command`.
    fn parse_command(&self, line: &str) -> Result<Command, CommandError> {
        let (header, argument) = match line.split_once(' ') {
            Some((h, a)) => (h, a.trim()),
            None => (line, ""),
        };
        let header = header.to_ascii_uppercase();
        let invalid = || CommandError::InvalidParameter(line.to_string());

        let command = match header.as_str() {
            "*CLS" => Command::ClearStatus,
            "*IDN?" => Command::Identify,
            "*OPC?" => Command::OperationComplete,
            "SYST:DATE?" => Command::QueryDate,
            "SYST:TIME?" => Command::QueryTime,
            "SYST:DATE" => {
                let [y, m, d] = parse_triplet(argument).ok_or_else(invalid)?;
                Command::SetDate(y, m, d)
            }
            "SYST:TIME" => {
                let [h, m, s] = parse_triplet(argument).ok_or_else(invalid)?;
                Command::SetTime(h, m, s)
            }
            "SYST:POS:GPS:CONN?" => Command::GpsConnected,
            "SYST:POS:LAT?" => Command::Latitude,
            "SYST:POS:LONG?" => Command::Longitude,
            "SYST:POS:ALT?" => Command::Altitude,
            "SYSTEM:POSITION:GPS:SATELLITES?" => Command::Satellites,
            "DISP:MEAS:OVER:GPS:STAT" => Command::GpsOverlay(parse_switch(argument).ok_or_else(invalid)?),
            "INST" => Command::SelectMode(argument.to_string()),
            "CONF:TV:CTAB:SEL" => Command::SelectChannelTable(unquote(argument).to_string()),
            "FREQ:CHAN" => Command::TuneChannel(argument.parse().map_err(|_| invalid())?),
            "SENS:POW:ACH:PRES:RLEV:AUTO" => Command::AttenuationMode(argument.to_string()),
            "FREQ:CENT?" => Command::CenterFrequency,
            "CONF:DTV:MEAS" => Command::Measurement(argument.to_string()),
            "CONF:DTV:MEAS:SATT" => Command::ShoulderAttenuation(parse_switch(argument).ok_or_else(invalid)?),
            "CALC:DTV:RES:DEM:SYNC?" => Command::DemodulatorSync,
            "MMEM:MDIR" => Command::MakeDirectory(unquote(argument).to_string()),
            "MMEM:CAT?" => Command::Catalog(unquote(argument).to_string()),
            "HCOP:CMAP:DEF4" => Command::HardcopyColorMap("DEF4".to_string()),
            "HCOP:DEV:LANG" => Command::HardcopyLanguage(argument.to_string()),
            "HCOP:DEV:COL" => Command::HardcopyColor(parse_switch(argument).ok_or_else(invalid)?),
            "HCOP:DEST" => Command::HardcopyDestination(unquote(argument).to_string()),
            "MMEM:NAME" => Command::FileName(unquote(argument).to_string()),
            "HCOP:ITEM:WIND:TEXT" => Command::HardcopyComment(unquote(argument).to_string()),
            "HCOP" => Command::Hardcopy,
            "CONF:MLOG" => Command::MeasurementLog(parse_switch(argument).ok_or_else(invalid)?),
            "MMEM:STOR:MLOG:DATA" => {
                let fields: Vec<&str> = argument.split(',').map(|f| unquote(f.trim())).collect();
                // Start and stop times each contain a comma: date,time.
                if fields.len() != 6 {
                    return Err(invalid());
                }
                Command::StoreMeasurementLog(fields[5].to_string())
            }
            _ => return Err(CommandError::UnknownCommand(line.to_string())),
        };
        Ok(command)
    }

    /// Processes one received line and returns the response, if any.
    pub fn process_command(&mut self, line: &str) -> Result<Option<String>, CommandError> {
        let line = line.trim();
        self.history.push(line.to_string());
        let command = self.parse_command(line)?;
        self.execute_command(command)
    }

    /// Executes a parsed command and returns the response string for queries.
    fn execute_command(&mut self, command: Command) -> Result<Option<String>, CommandError> {
        let response = match command {
            Command::ClearStatus => None,
            Command::Identify => Some(self.identity.clone()),
            Command::OperationComplete => Some("1".to_string()),
            Command::QueryDate => Some(self.device_clock().format("%Y,%-m,%-d").to_string()),
            Command::QueryTime => Some(self.device_clock().format("%-H,%-M,%-S").to_string()),
            Command::SetDate(y, m, d) => {
                let clock = self.device_clock();
                let date = chrono::NaiveDate::from_ymd_opt(y as i32, m, d)
                    .ok_or_else(|| CommandError::InvalidParameter(format!("{y},{m},{d}")))?;
                self.set_device_clock(date.and_time(clock.time()));
                None
            }
            Command::SetTime(h, m, s) => {
                let clock = self.device_clock();
                let time = chrono::NaiveTime::from_hms_opt(h, m, s)
                    .ok_or_else(|| CommandError::InvalidParameter(format!("{h},{m},{s}")))?;
                self.set_device_clock(clock.date().and_time(time));
                None
            }
            Command::GpsConnected => {
                // GPS queries are only served by the TV/Radio analyzer.
                if self.mode.as_deref() != Some("CATV") && self.mode.is_some() {
                    return Err(CommandError::UnknownCommand("SYST:POS:GPS:CONN?".to_string()));
                }
                Some(if self.gps.is_some() { "1" } else { "0" }.to_string())
            }
            Command::Latitude => self.gps.as_ref().map(|g| g.latitude.clone()),
            Command::Longitude => self.gps.as_ref().map(|g| g.longitude.clone()),
            Command::Altitude => self.gps.as_ref().map(|g| g.altitude.clone()),
            Command::Satellites => self.gps.as_ref().map(|g| g.satellites.to_string()),
            Command::GpsOverlay(on) => {
                self.gps_overlay = on;
                None
            }
            Command::SelectMode(mode) => {
                self.mode = Some(mode);
                None
            }
            Command::SelectChannelTable(table) => {
                if !self.channel_tables.contains(&table) {
                    return Err(CommandError::InvalidParameter(table));
                }
                self.channel_table = Some(table);
                None
            }
            Command::TuneChannel(channel) => {
                self.channel = Some(channel);
                self.sync_polls = 0;
                None
            }
            Command::AttenuationMode(mode) => {
                self.attenuation_mode = Some(mode);
                None
            }
            Command::CenterFrequency => {
                let hz = self.channel.and_then(atsc_center_frequency).unwrap_or(0);
                Some(hz.to_string())
            }
            Command::Measurement(mode) => {
                self.measurement = Some(mode);
                self.sync_polls = 0;
                None
            }
            Command::ShoulderAttenuation(on) => {
                self.shoulder_attenuation = on;
                None
            }
            Command::DemodulatorSync => {
                let locked = match self.polls_until_lock {
                    Some(needed) => self.sync_polls >= needed,
                    None => false,
                };
                self.sync_polls += 1;
                Some(if locked { "1" } else { "0" }.to_string())
            }
            Command::MakeDirectory(path) => {
                self.directories.insert(path);
                None
            }
            Command::Catalog(path) => self.catalog(&path),
            Command::HardcopyColorMap(map) => {
                self.hardcopy.color_map = map;
                None
            }
            Command::HardcopyLanguage(language) => {
                self.hardcopy.language = language;
                None
            }
            Command::HardcopyColor(on) => {
                self.hardcopy.color = on;
                None
            }
            Command::HardcopyDestination(destination) => {
                self.hardcopy.destination = destination;
                None
            }
            Command::FileName(name) => {
                self.hardcopy.file_name = name;
                None
            }
            Command::HardcopyComment(comment) => {
                self.hardcopy.comment = comment;
                None
            }
            Command::Hardcopy => {
                let target = self.hardcopy.file_name.clone();
                if self.hardcopy.destination == "MMEM" && self.can_store(&target) {
                    self.files.insert(target);
                }
                None
            }
            Command::MeasurementLog(on) => {
                self.measurement_log = on;
                None
            }
            Command::StoreMeasurementLog(path) => {
                if self.measurement_log && self.can_store(&path) {
                    self.files.insert(path);
                }
                None
            }
        };
        Ok(response)
    }

    fn set_device_clock(&mut self, clock: NaiveDateTime) {
        self.clock_offset = clock - Local::now().naive_local();
    }

    fn can_store(&self, path: &str) -> bool {
        match path.rsplit_once('\\') {
            Some((parent, _)) => !self.disk_full && self.directories.contains(parent),
            None => false,
        }
    }

    // Lists a file or a directory the way MMEM:CAT? does; silent when the
    // path does not exist.
    fn catalog(&self, path: &str) -> Option<String> {
        if self.files.contains(path) {
            let name = path.rsplit('\\').next().unwrap_or(path);
            return Some(format!("'{}'", name));
        }
        if self.directories.contains(path) {
            let entries: Vec<String> = self
                .files
                .iter()
                .filter_map(|f| f.strip_prefix(path))
                .filter_map(|rest| rest.strip_prefix('\\'))
                .filter(|rest| !rest.contains('\\'))
                .map(|name| format!("'{}'", name))
                .collect();
            return Some(entries.join(","));
        }
        if let Some(table) = path
            .strip_prefix(r"C:\R_S\instr\catv\channel_tables\")
            .and_then(|name| name.strip_suffix(".CHT"))
        {
            if self.channel_tables.contains(table) {
                return Some(format!("'{}.CHT'", table));
            }
        }
        None
    }
}

fn unquote(text: &str) -> &str {
    text.trim_matches(|c| c == '\'' || c == '"')
}

fn parse_switch(argument: &str) -> Option<bool> {
    match argument.to_ascii_uppercase().as_str() {
        "ON" | "1" => Some(true),
        "OFF" | "0" => Some(false),
        _ => None,
    }
}

fn parse_triplet(argument: &str) -> Option<[u32; 3]> {
    let values: Vec<u32> = argument
        .split(',')
        .map(|v| v.trim().parse().ok())
        .collect::<Option<Vec<u32>>>()?;
    values.try_into().ok()
}

/// Transport into a shared simulator. Every session opened on the `SIM`
/// resource talks to the same analyzer state.
pub struct SimulatorLink {
    sim: Rc<RefCell<SimulatedEtl>>,
    pending: VecDeque<String>,
}

impl SimulatorLink {
    pub fn new(sim: Rc<RefCell<SimulatedEtl>>) -> Self {
        Self {
            sim,
            pending: VecDeque::new(),
        }
    }
}

impl Transport for SimulatorLink {
    fn write_line(&mut self, line: &str) -> Result<(), InstrumentError> {
        let mut sim = self.sim.borrow_mut();
        if sim.link_drops_at(line) {
            return Err(InstrumentError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated link dropped",
            )));
        }
        match sim.process_command(line) {
            Ok(Some(response)) => self.pending.push_back(response),
            Ok(None) => {}
            Err(e) => tracing::trace!("simulator ignored {:?}", e),
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, InstrumentError> {
        self.pending.pop_front().ok_or(InstrumentError::Timeout {
            command: String::new(),
            timeout: Duration::ZERO,
        })
    }

    fn clear(&mut self) -> Result<(), InstrumentError> {
        self.pending.clear();
        Ok(())
    }
}
