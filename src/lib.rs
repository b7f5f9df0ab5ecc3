//! # ETL Field Capture Library
//!
//! Remote control of a Rohde & Schwarz ETL TV analyzer for field-strength
//! surveys. The analyzer is driven over SCPI; each measurement screen is set
//! up, tuned to the site's channel and saved as a screenshot under a
//! per-site folder tree. A site checklist workbook is written on the host.
//!
//! [`scpi`] carries the wire protocol and a simulated analyzer, [`etl`] the
//! analyzer operations, and [`app`] the operator menus built on top.

pub mod app;
pub mod capture;
pub mod checklist;
pub mod config;
pub mod console;
pub mod error;
pub mod etl;
pub mod logging;
pub mod measure;
pub mod scpi;
pub mod site;
pub mod timesync;

pub use app::{App, Flow, SessionState};
pub use config::{ConfigStore, Setting, Settings};
pub use console::Console;
pub use error::{ChecklistError, ConfigError, InstrumentError, ResourceError, TimeSyncError};
pub use etl::{ConnectivityReport, Etl, GpsFix};
pub use measure::Measurement;
pub use scpi::{Resource, SimulatedEtl};
pub use site::SiteRecord;
