//! Measurement screens of the ETL's TV/Radio analyzer.
//!
//! Each screen is reached the same way: common tuning settings, then the
//! measurement mode, then an optional per-screen extra. Completion queries
//! are best-effort; the analyzer's screen is the source of truth.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use crate::capture::Pacing;
use crate::error::InstrumentError;
use crate::etl::{query_gps_connected, Etl};
use crate::scpi::Session;

/// The six digital TV measurement screens, in capture order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measurement {
    Overview,
    Spectrum,
    Constellation,
    ModulationErrors,
    EyeDiagram,
    EchoPattern,
}

impl Measurement {
    pub const ALL: [Measurement; 6] = [
        Measurement::Overview,
        Measurement::Spectrum,
        Measurement::Constellation,
        Measurement::ModulationErrors,
        Measurement::EyeDiagram,
        Measurement::EchoPattern,
    ];

    /// Argument of `CONF:DTV:MEAS`.
    pub fn mode(self) -> &'static str {
        match self {
            Measurement::Overview => "OVER",
            Measurement::Spectrum => "DSP",
            Measurement::Constellation => "CONS",
            Measurement::ModulationErrors => "MERR",
            Measurement::EyeDiagram => "EYED",
            Measurement::EchoPattern => "EPATtern",
        }
    }

    /// Suffix used in capture file names.
    pub fn label(self) -> &'static str {
        match self {
            Measurement::Overview => "Overview",
            Measurement::Spectrum => "Spectrum",
            Measurement::Constellation => "Constellation",
            Measurement::ModulationErrors => "MER",
            Measurement::EyeDiagram => "Eye",
            Measurement::EchoPattern => "Echo",
        }
    }

    /// Whether a capture of this screen waits for demodulator lock.
    pub fn needs_lock(self) -> bool {
        !matches!(self, Measurement::Overview | Measurement::Spectrum)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = match self {
            Measurement::Overview => "Overview",
            Measurement::Spectrum => "Spectrum",
            Measurement::Constellation => "Constellation Diagram",
            Measurement::ModulationErrors => "Modulation Errors",
            Measurement::EyeDiagram => "Eye Diagram",
            Measurement::EchoPattern => "Echo Pattern",
        };
        f.write_str(title)
    }
}

/// Channel the analyzer is tuned to.
#[derive(Debug, Clone, Copy)]
pub struct Tuning<'a> {
    pub channel_table: &'a str,
    pub channel: u32,
}

/// Outcome of polling the demodulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Locked { polls: u32 },
    TimedOut { polls: u32 },
}

impl LockStatus {
    pub fn is_locked(self) -> bool {
        matches!(self, LockStatus::Locked { .. })
    }
}

/// Selects the TV analyzer, tunes to the channel and reads back the center
/// frequency in Hz. Only a failure to open the session is an error.
pub fn common_settings(etl: &Etl, tuning: Tuning<'_>, pacing: &Pacing) -> Result<Option<f64>, InstrumentError> {
    tracing::debug!("Common settings for all measurements");
    let mut session = etl.open()?;
    if let Err(e) = session.clear() {
        tracing::debug!("clear failed: {}", e);
    }

    // TV/Radio Analyzer/Receiver mode.
    session.write_or_log("INST CATV", "Select TV/Radio Analyzer mode");
    if let Err(e) = session.opc() {
        tracing::info!("Select TV/Radio Analyzer mode: Operation Complete exception: {}", e);
    }

    let select_table = format!("CONF:TV:CTAB:SEL \"{}\"", tuning.channel_table);
    if session.write(&select_table).is_err() {
        tracing::debug!("Failed to select channel table '{}'", tuning.channel_table);
    }
    session.write_or_log(&format!("FREQ:CHAN {}", tuning.channel), "Tune to channel");
    if let Err(e) = session.opc() {
        tracing::info!("Tune to channel: Operation Complete failed: {}", e);
        thread::sleep(pacing.opc_failure_pause);
    }

    // The attenuator misbehaves unless the tuning above has completed.
    session.write_or_log("SENS:POW:ACH:PRES:RLEV:AUTO SLA", "Set RF attenuation mode");
    if let Err(e) = session.opc() {
        tracing::info!("Set RF attenuation mode: Operation Complete failed: {}", e);
        thread::sleep(pacing.opc_failure_pause);
    }

    let frequency = match session.query("FREQ:CENT?") {
        Ok(hz) => match hz.parse::<f64>() {
            Ok(hz) => {
                tracing::debug!("Frequency reported by ETL: {} Hz", hz);
                Some(hz)
            }
            Err(_) => {
                tracing::info!("Frequency query returned {:?}", hz);
                None
            }
        },
        Err(e) => {
            tracing::info!("Frequency query failed: {}", e);
            thread::sleep(pacing.opc_failure_pause);
            None
        }
    };
    session.opc_or_log("common settings");
    Ok(frequency)
}

/// Brings one measurement screen up. Returns the center frequency read
/// during tuning.
pub fn select(
    etl: &Etl,
    measurement: Measurement,
    tuning: Tuning<'_>,
    pacing: &Pacing,
) -> Result<Option<f64>, InstrumentError> {
    let frequency = common_settings(etl, tuning, pacing)?;
    let mut session = etl.open()?;
    session.write(&format!("CONF:DTV:MEAS {}", measurement.mode()))?;
    tracing::debug!("Requested {}", measurement);

    match measurement {
        Measurement::Overview => {
            overlay_gps(&mut session);
            session.opc_or_log("Overview");
        }
        Measurement::Spectrum => {
            if !session.opc_or_log("setting Spectrum") {
                drop(session);
                thread::sleep(pacing.reopen_pause);
                session = etl.open()?;
            }
            session.write("CONF:DTV:MEAS:SATT ON")?;
            tracing::debug!("Requested shoulder attenuation measurement");
            session.opc_or_log("setting shoulder attenuation measurement");
        }
        _ => {
            session.opc_or_log(&measurement.to_string());
        }
    }
    Ok(frequency)
}

// Shows the GPS fix on the Overview screen when a receiver is attached.
fn overlay_gps(session: &mut Session) {
    match query_gps_connected(session) {
        Ok(true) => {
            session.write_or_log("DISP:MEAS:OVER:GPS:STAT ON", "GPS overlay");
        }
        Ok(false) => tracing::warn!(" ----- GPS is NOT CONNECTED! -----"),
        Err(e) => tracing::debug!(
            "Did not get GPS status. ETL may not be in \"TV/Radio Analyzer\" mode. ({})",
            e
        ),
    }
}

/// Polls the demodulator sync flag until it reads `1` or `timeout` has
/// passed. At least one poll is always made.
pub fn wait_for_lock(etl: &Etl, timeout: Duration) -> Result<LockStatus, InstrumentError> {
    tracing::debug!("Wait for demod to lock");
    let mut session = etl.open()?;
    let deadline = Instant::now() + timeout;
    let mut polls = 0;

    loop {
        let locked = match session.query("CALC:DTV:RES:DEM:SYNC?") {
            Ok(flag) => flag.parse::<i32>().map(|f| f == 1).unwrap_or(false),
            Err(e) => {
                tracing::debug!("Locked query failed: {}", e);
                false
            }
        };
        session.opc_or_log("Locked Query");
        polls += 1;

        if locked {
            tracing::debug!("Locked count = {}", polls);
            return Ok(LockStatus::Locked { polls });
        }
        if Instant::now() >= deadline {
            tracing::debug!("No lock after {} polls", polls);
            return Ok(LockStatus::TimedOut { polls });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scpi::SimulatedEtl;
    use std::cell::RefCell;
    use std::rc::Rc;

    const TUNING: Tuning<'static> = Tuning {
        channel_table: "TV-USA-ATSC",
        channel: 8,
    };

    fn sim_etl() -> (Etl, Rc<RefCell<SimulatedEtl>>) {
        let sim = Rc::new(RefCell::new(SimulatedEtl::default()));
        (Etl::simulated(Rc::clone(&sim)), sim)
    }

    #[test]
    fn modes_and_labels() {
        let modes: Vec<_> = Measurement::ALL.iter().map(|m| m.mode()).collect();
        assert_eq!(modes, ["OVER", "DSP", "CONS", "MERR", "EYED", "EPATtern"]);
        let labels: Vec<_> = Measurement::ALL.iter().map(|m| m.label()).collect();
        assert_eq!(labels, ["Overview", "Spectrum", "Constellation", "MER", "Eye", "Echo"]);
    }

    #[test]
    fn common_settings_sends_the_tuning_sequence() {
        let (etl, sim) = sim_etl();
        let hz = common_settings(&etl, TUNING, &Pacing::immediate()).unwrap();
        assert_eq!(hz, Some(183_000_000.0));

        let sim = sim.borrow();
        assert_eq!(
            sim.history,
            vec![
                "INST CATV",
                "*OPC?",
                "CONF:TV:CTAB:SEL \"TV-USA-ATSC\"",
                "FREQ:CHAN 8",
                "*OPC?",
                "SENS:POW:ACH:PRES:RLEV:AUTO SLA",
                "*OPC?",
                "FREQ:CENT?",
                "*OPC?",
            ]
        );
        assert_eq!(sim.attenuation_mode.as_deref(), Some("SLA"));
    }

    #[test]
    fn overview_turns_on_gps_overlay() {
        let (etl, sim) = sim_etl();
        select(&etl, Measurement::Overview, TUNING, &Pacing::immediate()).unwrap();
        let sim = sim.borrow();
        assert_eq!(sim.measurement.as_deref(), Some("OVER"));
        assert!(sim.gps_overlay);
    }

    #[test]
    fn spectrum_enables_shoulder_attenuation() {
        let (etl, sim) = sim_etl();
        select(&etl, Measurement::Spectrum, TUNING, &Pacing::immediate()).unwrap();
        let sim = sim.borrow();
        assert_eq!(sim.measurement.as_deref(), Some("DSP"));
        assert!(sim.shoulder_attenuation);
    }

    #[test]
    fn echo_pattern_mode_text_is_preserved() {
        let (etl, sim) = sim_etl();
        select(&etl, Measurement::EchoPattern, TUNING, &Pacing::immediate()).unwrap();
        assert!(sim.borrow().history.contains(&"CONF:DTV:MEAS EPATtern".to_string()));
    }

    #[test]
    fn lock_is_reported_with_poll_count() {
        let (etl, sim) = sim_etl();
        sim.borrow_mut().polls_until_lock = Some(3);
        let status = wait_for_lock(&etl, Duration::from_secs(3)).unwrap();
        assert_eq!(status, LockStatus::Locked { polls: 4 });
    }

    #[test]
    fn lock_times_out_against_deadline() {
        let (etl, sim) = sim_etl();
        sim.borrow_mut().polls_until_lock = None;
        let started = Instant::now();
        let status = wait_for_lock(&etl, Duration::from_millis(50)).unwrap();
        assert!(!status.is_locked());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn zero_timeout_still_polls_once() {
        let (etl, sim) = sim_etl();
        sim.borrow_mut().polls_until_lock = None;
        let status = wait_for_lock(&etl, Duration::ZERO).unwrap();
        assert_eq!(status, LockStatus::TimedOut { polls: 1 });
    }
}
