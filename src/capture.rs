//! Screenshots and measurement-log exports written by the analyzer to the
//! shared results folder.

use std::thread;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};

use crate::error::InstrumentError;
use crate::etl::{exceeds_clock_threshold, clock_delta, query_gps_connected, read_device_clock, Etl};
use crate::measure::{self, LockStatus, Measurement, Tuning};
use crate::scpi::{single_quoted, Session};
use crate::site::SiteRecord;

/// Label and extension of an operator-triggered screenshot.
pub const USER_SCREENSHOT_LABEL: &str = "SetByUser";
pub const SCREENSHOT_EXT: &str = "PNG";
pub const LOG_EXPORT_LABEL: &str = "capture";
pub const LOG_EXPORT_EXT: &str = "CSV";

/// Fixed waits of the capture scripts.
#[derive(Debug, Clone, PartialEq)]
pub struct Pacing {
    // After a mode switch, before the screenshot.
    pub settle: Duration,
    pub lock_timeout: Duration,
    pub opc_failure_pause: Duration,
    pub reopen_pause: Duration,
    // The GPS needs this long before logged data is usable.
    pub log_start_lead: Duration,
    pub countdown_tick: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(3),
            opc_failure_pause: Duration::from_secs(2),
            reopen_pause: Duration::from_secs(1),
            log_start_lead: Duration::from_secs(4),
            countdown_tick: Duration::from_secs(1),
        }
    }
}

impl Pacing {
    /// No waiting at all.
    pub fn immediate() -> Self {
        Self {
            settle: Duration::ZERO,
            lock_timeout: Duration::ZERO,
            opc_failure_pause: Duration::ZERO,
            reopen_pause: Duration::ZERO,
            log_start_lead: Duration::ZERO,
            countdown_tick: Duration::ZERO,
        }
    }
}

/// Remote location of one capture, e.g.
/// `Z:\Measurement_results\WXYZ\20240501_WXYZ_R270M20\A\WXYZ_R270M20_A_20240501_101500_Overview.PNG`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturePath {
    root: String,
    callsign: String,
    measurement_point: String,
    test_position: String,
    date: String,
    time: String,
    label: String,
    ext: String,
}

impl CapturePath {
    pub fn new(root: &str, site: &SiteRecord, label: &str, ext: &str, at: NaiveDateTime) -> Self {
        Self {
            root: root.trim_end_matches('\\').to_string(),
            callsign: site.callsign.clone(),
            measurement_point: site.measurement_point(),
            test_position: site.test_position.clone(),
            date: at.format("%Y%m%d").to_string(),
            time: at.format("%H%M%S").to_string(),
            label: label.to_string(),
            ext: ext.to_string(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The three folder levels, outermost first, as `MMEM:MDIR` needs them.
    pub fn directories(&self) -> [String; 3] {
        let station = format!(r"{}\{}", self.root, self.callsign);
        let visit = format!(r"{}\{}_{}_{}", station, self.date, self.callsign, self.measurement_point);
        let position = format!(r"{}\{}", visit, self.test_position);
        [station, visit, position]
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}_{}.{}",
            self.callsign, self.measurement_point, self.test_position, self.date, self.time, self.label, self.ext
        )
    }

    pub fn full_path(&self) -> String {
        let [_, _, folder] = self.directories();
        format!(r"{}\{}", folder, self.file_name())
    }

    fn window_text(&self) -> String {
        format!(
            "{}   Measuring Location: {}   Test: {}",
            self.callsign, self.measurement_point, self.test_position
        )
    }
}

/// Whether the analyzer listed the file back after writing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Saved(String),
    NotVerified,
}

impl CaptureOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, CaptureOutcome::Saved(_))
    }
}

fn make_directories(session: &mut Session, path: &CapturePath) {
    for dir in path.directories() {
        session.write_or_log(&format!("MMEM:MDIR {}", single_quoted(&dir)), "Create directory");
    }
}

fn verify(session: &mut Session, path: &CapturePath) -> CaptureOutcome {
    let full_path = path.full_path();
    match session.query(&format!("MMEM:CAT? {}", single_quoted(&full_path))) {
        Ok(listing) => {
            tracing::warn!("Exported {} to {}", path.label(), listing);
            CaptureOutcome::Saved(listing)
        }
        Err(e) => {
            tracing::debug!("Failed to save '{}': {}", full_path, e);
            tracing::warn!("!!! Failed to save {} to {} !!!", path.label(), path.file_name());
            CaptureOutcome::NotVerified
        }
    }
}

/// Renders the analyzer's current screen into `path`.
pub fn print_to_file(etl: &Etl, path: &CapturePath) -> Result<CaptureOutcome, InstrumentError> {
    tracing::debug!("Print {} to file", path.label());
    let mut session = etl.open()?;
    make_directories(&mut session, path);
    tracing::debug!("{}", path.full_path());

    // Current screen colors without any changes.
    session.write("HCOP:CMAP:DEF4")?;
    session.write(&format!("HCOP:DEV:LANG {}", path.ext))?;
    session.write("HCOP:DEV:COL ON")?;
    session.write("HCOP:DEST 'MMEM'")?;
    session.write(&format!("MMEM:NAME {}", single_quoted(&path.full_path())))?;
    session.write(&format!("HCOP:ITEM:WIND:TEXT {}", single_quoted(&path.window_text())))?;
    session.opc_or_log("creating directories");

    tracing::debug!("Exporting {} to {}", path.label(), path.file_name());
    if let Err(e) = session.write("HCOP") {
        tracing::warn!("Save to file failed: {}", e);
    }
    session.opc_or_log("saving hardcopy to file");
    Ok(verify(&mut session, path))
}

/// What happened to one screen of the capture sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenOutcome {
    Captured(CaptureOutcome),
    SkippedNoLock,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureReport {
    pub frequency_hz: Option<f64>,
    pub screens: Vec<(Measurement, ScreenOutcome)>,
}

/// Steps through all six screens. Overview and Spectrum are always
/// captured; the rest only once the demodulator locks.
pub fn capture_screenshots(
    etl: &Etl,
    site: &SiteRecord,
    root: &str,
    tuning: Tuning<'_>,
    pacing: &Pacing,
) -> Result<CaptureReport, InstrumentError> {
    let mut report = CaptureReport {
        frequency_hz: None,
        screens: Vec::with_capacity(Measurement::ALL.len()),
    };

    for measurement in Measurement::ALL {
        if let Some(hz) = measure::select(etl, measurement, tuning, pacing)? {
            report.frequency_hz = Some(hz);
        }

        let lock = match measurement {
            Measurement::Spectrum => None,
            _ => Some(measure::wait_for_lock(etl, pacing.lock_timeout)?),
        };
        if measurement.needs_lock() && !lock.is_some_and(LockStatus::is_locked) {
            tracing::warn!("No Lock. Did NOT capture {}.", measurement.label());
            report.screens.push((measurement, ScreenOutcome::SkippedNoLock));
            continue;
        }

        thread::sleep(pacing.settle);
        let path = CapturePath::new(root, site, measurement.label(), SCREENSHOT_EXT, Local::now().naive_local());
        let outcome = print_to_file(etl, &path)?;
        report.screens.push((measurement, ScreenOutcome::Captured(outcome)));
    }
    Ok(report)
}

/// Interaction needed while the measurement log runs.
pub trait LogOperator {
    /// Seconds to keep logging; 0 stops right away.
    fn log_duration(&mut self, start: NaiveDateTime) -> u64;

    /// Called once a second with the time left.
    fn countdown(&mut self, remaining: Duration);

    fn countdown_finished(&mut self) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeasureLogOutcome {
    Exported {
        capture: CaptureOutcome,
        frequency_hz: Option<f64>,
    },
    GpsNotConnected,
}

/// `DD.MM.YYYY,HH:MM:SS`, the time syntax of `MMEM:STOR:MLOG:DATA`.
pub fn log_timestamp(at: NaiveDateTime) -> String {
    at.format("%d.%m.%Y,%H:%M:%S").to_string()
}

/// Records the measurement log for an operator-chosen interval and exports
/// it as CSV next to the screenshots.
pub fn measure_log(
    etl: &Etl,
    site: &SiteRecord,
    root: &str,
    tuning: Tuning<'_>,
    pacing: &Pacing,
    operator: &mut dyn LogOperator,
) -> Result<MeasureLogOutcome, InstrumentError> {
    tracing::debug!("Begin MeasureLog");
    let mut session = etl.open()?;

    // Log timestamps come from the analyzer, so its clock must be right.
    match read_device_clock(&mut session) {
        Ok(device) => {
            let delta = clock_delta(device, Local::now().naive_local());
            if exceeds_clock_threshold(delta) {
                tracing::debug!("ETL clock is {} seconds different than computer", delta);
                drop(session);
                if let Err(e) = etl.set_clock(Local::now().naive_local()) {
                    tracing::info!("Failed to set ETL clock: {}", e);
                }
                session = etl.open()?;
            }
        }
        Err(e) => tracing::debug!("Failed to compare ETL time to computer: {}", e),
    }

    let connected = query_gps_connected(&mut session).map_err(|e| {
        tracing::debug!("Query for GPS status failed: {}", e);
        InstrumentError::Unsupported(
            "Did not get GPS status. ETL may not be in \"TV/Radio Analyzer\" mode.".to_string(),
        )
    })?;
    tracing::debug!("GPS connected status is {}", connected);
    if !connected {
        tracing::warn!(" ----- GPS is NOT CONNECTED! -----");
        return Ok(MeasureLogOutcome::GpsNotConnected);
    }

    session.write("DISP:MEAS:OVER:GPS:STAT ON")?;
    // Logging slows the analyzer down a little; it is switched off again below.
    session.write("CONF:MLOG ON")?;
    let activated = session.opc_or_log("Measure Log");
    tracing::debug!("Measure log activated, operation complete? {}", activated);
    drop(session);

    let result = record_and_export(etl, site, root, tuning, pacing, operator);
    deactivate_log(etl);
    result
}

/// Everything between switching the measurement log on and off.
fn record_and_export(
    etl: &Etl,
    site: &SiteRecord,
    root: &str,
    tuning: Tuning<'_>,
    pacing: &Pacing,
    operator: &mut dyn LogOperator,
) -> Result<MeasureLogOutcome, InstrumentError> {
    // The CSV comes out empty while Spectrum is on screen.
    let frequency_hz = measure::select(etl, Measurement::Overview, tuning, pacing)?;
    if let Some(hz) = frequency_hz {
        tracing::info!("Frequency reported by ETL: {} Hz", hz);
    }

    let lead = chrono::Duration::from_std(pacing.log_start_lead).unwrap_or_else(|_| chrono::Duration::zero());
    let start_at = Local::now().naive_local() + lead;
    let start = log_timestamp(start_at);
    tracing::info!("Capture start time will be {}", start);

    let seconds = operator.log_duration(start_at);
    tracing::debug!("User entered capture duration of {} s", seconds);
    for remaining in (1..=seconds).rev() {
        operator.countdown(Duration::from_secs(remaining));
        thread::sleep(pacing.countdown_tick);
    }
    operator.countdown_finished();

    let stop_at = Local::now().naive_local();
    let stop = log_timestamp(stop_at);
    let path = CapturePath::new(root, site, LOG_EXPORT_LABEL, LOG_EXPORT_EXT, stop_at);

    let mut session = etl.open()?;
    make_directories(&mut session, &path);
    // Compression level 0: one value per second.
    session.write(&format!(
        "MMEM:STOR:MLOG:DATA \"{}\", \"{}\", \"0\", \"{}\"",
        start,
        stop,
        path.full_path()
    ))?;
    tracing::info!("Capture stop time is {}", stop);
    session.opc_or_log("Export to CSV");
    let capture = verify(&mut session, &path);

    Ok(MeasureLogOutcome::Exported { capture, frequency_hz })
}

// Runs on every exit path once logging is on; a failure here is only logged.
fn deactivate_log(etl: &Etl) {
    match etl.open() {
        Ok(mut session) => {
            session.write_or_log("CONF:MLOG OFF", "Deactivate measurement log");
        }
        Err(e) => tracing::warn!("Could not switch the measurement log off: {}", e),
    }
}
