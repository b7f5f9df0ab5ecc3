//! Operator menus.
//!
//! [`App`] owns everything a field visit accumulates: settings, the site
//! record and whatever was last read from the analyzer. Each menu choice
//! runs to completion before the menu is drawn again.

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};

use crate::capture::{self, CapturePath, LogOperator, MeasureLogOutcome, Pacing};
use crate::checklist::{self, ChecklistValues, Template};
use crate::config::{self, ConfigStore, Setting, Settings};
use crate::console::Console;
use crate::error::{ConfigError, InstrumentError};
use crate::etl::{exceeds_clock_threshold, Etl, GpsFix};
use crate::measure::{self, Measurement, Tuning};
use crate::scpi::Resource;
use crate::site::{self, BoundedField, ClutterCategory, SiteRecord};
use crate::timesync;

/// Whether the operator wants to keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

// Main menu entries that need the analyzer.
const DEVICE_CHOICES: &[&str] = &["1", "6", "7", "8", "9", "10", "11", "12", "13", "15"];

/// Everything the session has learned so far.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub settings: Settings,
    pub site: SiteRecord,
    pub connected: bool,
    pub identity: Option<String>,
    pub gps: Option<GpsFix>,
    pub frequency_hz: Option<f64>,
    pub clock_warning: Option<String>,
    // Shown once on the next menu redraw.
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn new(settings: Settings, site: SiteRecord) -> Self {
        Self {
            settings,
            site,
            connected: false,
            identity: None,
            gps: None,
            frequency_hz: None,
            clock_warning: None,
            last_error: None,
        }
    }
}

fn invalid_choice(choice: &str) -> String {
    format!("Your entry \"{}\" is not a valid choice", choice)
}

pub struct App<R, W> {
    console: Console<R, W>,
    store: ConfigStore,
    state: SessionState,
    etl: Option<Etl>,
    pacing: Pacing,
    time_server: String,
}

impl<R: BufRead, W: Write> App<R, W> {
    /// Loads settings and the site record from `store`.
    pub fn new(console: Console<R, W>, store: ConfigStore) -> Result<Self, ConfigError> {
        let settings = Settings::load(&store)?;
        let site = config::load_site_record(&store)?;
        Ok(Self {
            console,
            store,
            state: SessionState::new(settings, site),
            etl: None,
            pacing: Pacing::default(),
            time_server: timesync::DEFAULT_TIME_SERVER.to_string(),
        })
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_time_server(mut self, server: impl Into<String>) -> Self {
        self.time_server = server.into();
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn etl(&self) -> Option<&Etl> {
        self.etl.as_ref()
    }

    pub fn console(&self) -> &Console<R, W> {
        &self.console
    }

    /// Startup checks, then the main menu until the operator quits.
    pub fn run(&mut self) {
        if self.startup() == Flow::Continue {
            self.main_menu();
        }
        self.quit();
    }

    fn persist(&mut self, setting: Setting, value: &str) {
        if let Err(e) = self.store.set(setting, value) {
            tracing::error!("{}", e);
            self.state.last_error = Some(format!("Could not save {}: {}", setting.key(), e));
        }
    }

    fn connected_etl(&self) -> Option<&Etl> {
        self.etl.as_ref().filter(|_| self.state.connected)
    }

    fn address(&self) -> &str {
        &self.state.settings.ip_address
    }

    // Startup

    pub fn startup(&mut self) -> Flow {
        if self.connect() == Flow::Quit {
            return Flow::Quit;
        }
        if !self.state.connected {
            return Flow::Continue;
        }
        if self.verify_remote(RemoteCheck::ResultsFolder) == Flow::Quit {
            return Flow::Quit;
        }
        self.verify_remote(RemoteCheck::ChannelTable)
    }

    /// Prompts for the analyzer address and stores it when it parses.
    fn request_address(&mut self) -> Flow {
        let Some(address) = self.console.prompt("Enter the IP address of the ETL analyzer") else {
            return Flow::Quit;
        };
        match Resource::parse(&address) {
            Ok(resource) => {
                tracing::warn!("{} is a valid address ({}).", address, resource);
                self.persist(Setting::IpAddress, &address);
            }
            Err(e) => tracing::warn!("Address is invalid: {} ({})", address, e),
        }
        self.state.settings.ip_address = address;
        Flow::Continue
    }

    fn attach(&mut self, resource: Resource) -> &Etl {
        let reuse = matches!(&self.etl, Some(etl) if *etl.resource() == resource);
        if !reuse {
            self.etl = Some(Etl::new(resource.clone()));
        }
        self.etl.get_or_insert_with(|| Etl::new(resource))
    }

    fn try_connect(&mut self) -> Result<(), InstrumentError> {
        let resource = Resource::parse(self.address())?;
        let report = self.attach(resource).connectivity_report()?;
        self.state.identity = report.identity.clone();
        self.state.clock_warning = report.clock_warning().map(|delta| {
            format!(
                "\n   ———— WARNING ————    ETL time is {:.1} seconds different from computer.\n\
                 \x20             N — Compare computer time to NTP server\n\
                 \x20             1 — Set ETL date/time from computer",
                delta
            )
        });
        if let Some(clock) = report.device_clock {
            tracing::info!(
                "ETL date and time: {}   {}",
                clock.format("%Y-%m-%d %H:%M:%S"),
                self.state.clock_warning.as_deref().unwrap_or("")
            );
        }
        Ok(())
    }

    /// Connectivity check. On failure the operator may continue offline or
    /// enter another address; anything else quits.
    fn connect(&mut self) -> Flow {
        loop {
            if self.address().is_empty() {
                tracing::info!("IP address in INI file is blank");
                if self.request_address() == Flow::Quit {
                    return Flow::Quit;
                }
            } else {
                tracing::info!("IP Address in INI file is {}", self.address());
            }

            match self.try_connect() {
                Ok(()) => {
                    self.state.connected = true;
                    return Flow::Continue;
                }
                Err(e) => {
                    tracing::warn!("No response from {}", self.address());
                    tracing::debug!("{}", e);
                }
            }

            let text = format!(
                "Failed to open connection to {}.\n\n\
                 \x20           1 — continue without connection or\n\
                 \x20           2 — enter a new IP address.\n\n\
                 \x20           Type choice and ENTER or just ENTER to Quit",
                self.address()
            );
            match self.console.prompt(&text).as_deref() {
                Some("1") => {
                    tracing::warn!("User chose 1 to continue without connection.");
                    self.state.connected = false;
                    return Flow::Continue;
                }
                Some("2") => {
                    tracing::debug!("User chose 2 to enter new IP address.");
                    if self.request_address() == Flow::Quit {
                        return Flow::Quit;
                    }
                }
                _ => {
                    tracing::debug!("User chose to quit.");
                    return Flow::Quit;
                }
            }
        }
    }

    /// Confirms a results folder or channel table exists on the analyzer,
    /// offering to continue anyway, pick another or fall back to the default.
    fn verify_remote(&mut self, check: RemoteCheck) -> Flow {
        let mut candidate = check.current(&self.state.settings).to_string();
        let mut entry_error = String::new();

        loop {
            let found = match self.connected_etl() {
                Some(etl) => check.exists(etl, &candidate),
                None => return Flow::Continue,
            };
            match found {
                Ok(true) => {
                    tracing::debug!("ETL reported that {} '{}' exists", check.noun(), candidate);
                    check.store(&mut self.state.settings, candidate.clone());
                    self.persist(check.setting(), &candidate);
                    return Flow::Continue;
                }
                Ok(false) => {}
                Err(e) => tracing::debug!("{} check failed: {}", check.noun(), e),
            }

            let text = format!(
                "  ETL reported that {noun} '{candidate}' does NOT exist.\n\n\
                 \x20               1 — continue with {noun} that does not exist\n\
                 \x20               2 — enter a new {noun}{name}\n\
                 \x20               3 — use default '{default}'\n\
                 \x20               Q — Quit\n\
                 \x20               {entry_error}\n\
                 \x20               Type a choice and press ENTER or ENTER alone to try again",
                noun = check.noun(),
                name = if check == RemoteCheck::ChannelTable { " name" } else { "" },
                default = check.default_value(),
            );
            let Some(choice) = self.console.prompt(&text) else {
                return Flow::Quit;
            };
            entry_error.clear();

            match choice.as_str() {
                "q" | "Q" => {
                    tracing::debug!("User chose to quit.");
                    return Flow::Quit;
                }
                "1" => {
                    tracing::warn!("User chose 1 to continue with {} that does not exist.", check.noun());
                    return Flow::Continue;
                }
                "2" => {
                    let Some(entered) = self.console.prompt(check.new_value_prompt()) else {
                        return Flow::Quit;
                    };
                    candidate = check.sanitize(&entered);
                    tracing::debug!("User chose 2 to enter new {}: '{}'", check.noun(), candidate);
                }
                "3" => {
                    candidate = check.default_value().to_string();
                    tracing::debug!("User chose 3 to use default '{}'.", candidate);
                }
                "" => tracing::debug!("User chose to try again"),
                other => entry_error = invalid_choice(other),
            }
        }
    }

    // Main menu

    fn refresh_gps(&mut self) {
        let Some(etl) = self.connected_etl() else {
            return;
        };
        match etl.gps_fix() {
            Ok(fix) => self.state.gps = fix,
            Err(InstrumentError::Unsupported(message)) => {
                tracing::info!("{}", message);
                self.state.gps = None;
                self.state.last_error = Some(message);
            }
            Err(e) => {
                let message = format!("FAILED to connect to {}", self.address());
                tracing::info!("{}: {}", message, e);
                self.state.gps = None;
                self.state.last_error = Some(message);
            }
        }
    }

    fn gps_message(&self) -> String {
        if !self.state.connected {
            return format!("** No connection to {} **", self.address());
        }
        match &self.state.gps {
            Some(fix) => format!(
                "       GPS\n\
                 \x20                         Lat, Lon: {}, {}\n\
                 \x20                         Altitude: {} m\n\
                 \x20                         Number of satellites: {}",
                fix.latitude, fix.longitude, fix.altitude, fix.satellites
            ),
            None => "** GPS NOT CONNECTED **".to_string(),
        }
    }

    fn main_menu_text(&self) -> String {
        let site = &self.state.site;
        let heading = site.truck_heading.map(|h| h.to_string()).unwrap_or_default();
        let azimuth = site.azimuth_to_transmitter().map(|a| a.to_string()).unwrap_or_default();
        format!(
            "**** MAIN MENU ****    Control Script for Rohde & Schwarz ETL Analyzer{warning}\n\
             \x20             1 — set ETL date/time from computer\n\
             \x20             2 — enter Call Sign [{callsign}] and Channel [{channel}]\n\
             \x20             3 — enter Measuring Location [{point}]\n\
             \x20             4 — enter Test position [{position}]\n\
             \x20             5 — enter Truck Heading [{heading}]\n\
             \x20                   Truck antenna to transmitter [{azimuth}]\n\
             \x20             6 — Overview\n\
             \x20             7 — Spectrum\n\
             \x20             8 — Constellation Diagram\n\
             \x20             9 — Modulation Errors\n\
             \x20            10 — Eye Diagram\n\
             \x20            11 — Echo Pattern\n\
             \x20            12 — Capture Screen Shots\n\
             \x20            13 — Measure Log — START CAPTURE\n\
             \x20            14 — Site Checklist\n\
             \x20            15 — Screen Shot of current screen\n\n\
             \x20             Q — Quit\n\n\
             \x20            {gps}\n\n\
             \x20             {error}\n\
             \x20            Type a choice and press ENTER",
            warning = self.state.clock_warning.as_deref().unwrap_or(""),
            callsign = site.callsign,
            channel = site.channel,
            point = site.measurement_point(),
            position = site.test_position,
            gps = self.gps_message(),
            error = self.state.last_error.as_deref().unwrap_or(""),
        )
    }

    fn main_menu(&mut self) {
        loop {
            self.refresh_gps();
            let text = self.main_menu_text();
            let Some(choice) = self.console.prompt(&text) else {
                return;
            };
            self.state.last_error = None;

            let flow = match choice.as_str() {
                "q" | "Q" => return,
                c if DEVICE_CHOICES.contains(&c) && !self.state.connected => {
                    tracing::debug!("Skipping choice {} without a connection", c);
                    Flow::Continue
                }
                "1" => self.set_etl_clock(),
                "2" => self.enter_callsign_and_channel(),
                "3" => self.enter_measuring_location(),
                "4" => self.enter_test_position(),
                "5" => self.enter_truck_heading(),
                "6" | "7" | "8" | "9" | "10" | "11" => {
                    // Digits 6..=11 map onto the six screens in order.
                    let index = choice.parse::<usize>().unwrap_or(6) - 6;
                    self.show_measurement(Measurement::ALL[index])
                }
                "12" => self.capture_screenshots(),
                "13" => self.measure_log(),
                "14" => self.checklist_menu(),
                "15" => self.screenshot(),
                "n" | "N" => self.check_host_clock(),
                other => {
                    self.state.last_error = Some(invalid_choice(other));
                    Flow::Continue
                }
            };
            if flow == Flow::Quit {
                return;
            }
        }
    }

    /// Logs the last GPS position known.
    fn quit(&mut self) {
        if let Some(fix) = &self.state.gps {
            tracing::info!("Latitude, Longitude: {},{}", fix.latitude, fix.longitude);
        }
        tracing::info!("Quit");
    }

    fn report_device_error(&mut self, e: InstrumentError) {
        tracing::warn!("No response from {}: {}", self.address(), e);
        self.console.alert(&e.to_string());
        self.state.last_error = Some(e.to_string());
    }

    fn set_etl_clock(&mut self) -> Flow {
        let Some(etl) = self.connected_etl() else {
            return Flow::Continue;
        };
        match etl.set_clock(Local::now().naive_local()) {
            Ok(delta) if exceeds_clock_threshold(delta) => {
                let warning = format!("  *** WARNING ***   Time delta is {:.1} seconds", delta);
                self.console.alert(&warning);
                self.state.clock_warning = Some(warning);
            }
            Ok(_) => self.state.clock_warning = None,
            Err(e) => self.report_device_error(e),
        }
        Flow::Continue
    }

    /// Reads a bounded integer. Blank keeps the current value; bad input
    /// re-prompts with the reason. `None` means input ended.
    fn prompt_bounded(&mut self, field: BoundedField, current: &str) -> Option<Option<u32>> {
        let base = format!("{} ({})", field.prompt(), current);
        let mut message = base.clone();
        loop {
            let input = self.console.prompt(&message)?;
            if input.is_empty() {
                return Some(None);
            }
            match field.parse(&input) {
                Ok(value) => return Some(Some(value)),
                Err(e) => message = format!("{}\n                {}", base, e),
            }
        }
    }

    fn enter_callsign_and_channel(&mut self) -> Flow {
        let prompt = format!("Call sign? ({})", self.state.site.callsign);
        let Some(input) = self.console.prompt(&prompt) else {
            return Flow::Quit;
        };
        if !input.is_empty() {
            let callsign = site::sanitize_callsign(&input);
            self.persist(Setting::Callsign, &callsign);
            self.state.site.callsign = callsign;
            tracing::debug!("Call Sign is {}", self.state.site.callsign);
        }

        let current = self.state.site.channel.to_string();
        match self.prompt_bounded(BoundedField::Channel, &current) {
            None => Flow::Quit,
            Some(None) => Flow::Continue,
            Some(Some(channel)) => {
                self.state.site.channel = channel;
                self.persist(Setting::Channel, &channel.to_string());
                Flow::Continue
            }
        }
    }

    fn enter_measuring_location(&mut self) -> Flow {
        let current = site::radial_text(self.state.site.radial);
        match self.prompt_bounded(BoundedField::Radial, &current) {
            None => return Flow::Quit,
            Some(None) => {}
            Some(Some(radial)) => {
                self.state.site.radial = Some(radial);
                self.persist(Setting::Radial, &radial.to_string());
            }
        }

        let current = site::distance_text(self.state.site.distance);
        match self.prompt_bounded(BoundedField::Distance, &current) {
            None => return Flow::Quit,
            Some(None) => {}
            Some(Some(distance)) => {
                self.state.site.distance = Some(distance);
                self.persist(Setting::Distance, &distance.to_string());
            }
        }
        tracing::debug!("Measurement point is {}", self.state.site.measurement_point());
        Flow::Continue
    }

    fn enter_test_position(&mut self) -> Flow {
        let prompt = format!("Test? ({})", self.state.site.test_position);
        let Some(input) = self.console.prompt(&prompt) else {
            return Flow::Quit;
        };
        if !input.is_empty() {
            let position = site::sanitize_test_position(&input);
            self.persist(Setting::TestPosition, &position);
            self.state.site.test_position = position;
        }
        tracing::debug!("Test is {}", self.state.site.test_position);
        Flow::Continue
    }

    fn enter_truck_heading(&mut self) -> Flow {
        let current = self.state.site.truck_heading.map(|h| h.to_string()).unwrap_or_default();
        match self.prompt_bounded(BoundedField::TruckHeading, &current) {
            None => return Flow::Quit,
            Some(None) => {}
            Some(Some(heading)) => {
                tracing::debug!("Truck heading typed as input was {}", heading);
                self.state.site.truck_heading = Some(heading);
                self.persist(Setting::TruckHeading, &heading.to_string());
            }
        }
        if let Some(azimuth) = self.state.site.azimuth_to_transmitter() {
            tracing::debug!("Truck antenna heading to transmitter is {}", azimuth);
        }
        Flow::Continue
    }

    fn show_measurement(&mut self, measurement: Measurement) -> Flow {
        let Some(etl) = self.connected_etl() else {
            return Flow::Continue;
        };
        let tuning = Tuning {
            channel_table: &self.state.settings.channel_table,
            channel: self.state.site.channel,
        };
        match measure::select(etl, measurement, tuning, &self.pacing) {
            Ok(frequency) => {
                if frequency.is_some() {
                    self.state.frequency_hz = frequency;
                }
            }
            Err(e) => self.report_device_error(e),
        }
        Flow::Continue
    }

    fn capture_screenshots(&mut self) -> Flow {
        let Some(etl) = self.connected_etl() else {
            return Flow::Continue;
        };
        let tuning = Tuning {
            channel_table: &self.state.settings.channel_table,
            channel: self.state.site.channel,
        };
        let result = capture::capture_screenshots(
            etl,
            &self.state.site,
            &self.state.settings.results_folder,
            tuning,
            &self.pacing,
        );
        match result {
            Ok(report) => {
                if report.frequency_hz.is_some() {
                    self.state.frequency_hz = report.frequency_hz;
                }
            }
            Err(e) => self.report_device_error(e),
        }
        Flow::Continue
    }

    fn measure_log(&mut self) -> Flow {
        let Some(etl) = self.etl.as_ref().filter(|_| self.state.connected) else {
            return Flow::Continue;
        };
        let tuning = Tuning {
            channel_table: &self.state.settings.channel_table,
            channel: self.state.site.channel,
        };
        let result = capture::measure_log(
            etl,
            &self.state.site,
            &self.state.settings.results_folder,
            tuning,
            &self.pacing,
            &mut self.console,
        );
        match result {
            Ok(MeasureLogOutcome::Exported { frequency_hz, .. }) => {
                if frequency_hz.is_some() {
                    self.state.frequency_hz = frequency_hz;
                }
            }
            Ok(MeasureLogOutcome::GpsNotConnected) => {}
            Err(InstrumentError::Unsupported(message)) => {
                tracing::debug!("{}", message);
                self.state.last_error = Some(message);
            }
            Err(e) => self.report_device_error(e),
        }
        Flow::Continue
    }

    fn screenshot(&mut self) -> Flow {
        let Some(etl) = self.connected_etl() else {
            return Flow::Continue;
        };
        let path = CapturePath::new(
            &self.state.settings.results_folder,
            &self.state.site,
            capture::USER_SCREENSHOT_LABEL,
            capture::SCREENSHOT_EXT,
            Local::now().naive_local(),
        );
        if let Err(e) = capture::print_to_file(etl, &path) {
            self.report_device_error(e);
        }
        Flow::Continue
    }

    fn check_host_clock(&mut self) -> Flow {
        if let Err(e) = timesync::check_host_clock(&self.time_server) {
            tracing::debug!("{}", e);
        }
        Flow::Continue
    }

    // Site checklist

    fn checklist_menu_text(&self, entry_error: &str) -> String {
        let site = &self.state.site;
        format!(
            "**** SITE CHECKLIST ****\n\
             \x20         1 — enter Temperature [{}]\n\
             \x20         2 — enter Wind [{}]\n\
             \x20         3 — enter Sky Conditions [{}]\n\
             \x20         4 — enter Precip [{}]\n\
             \x20         5 — enter Technician Name [{}]\n\
             \x20         6 — enter Clutter Category [{}]\n\
             \x20         7 — enter Actual Antenna Dir — Mast 30' [{}]\n\
             \x20         8 — enter Actual Antenna Dir — Mast stowed [{}]\n\
             \x20         9 — Return to main menu\n\
             \x20        10 — SAVE and EXPORT checklist to Excel file\n\
             \x20        {}\n\
             \x20        Type choice and press ENTER",
            site.temperature,
            site.wind,
            site.sky_conditions,
            site.precipitation,
            site.technician,
            site.clutter,
            site.antenna_dir_mast_up,
            site.antenna_dir_mast_stowed,
            entry_error,
        )
    }

    fn checklist_menu(&mut self) -> Flow {
        let mut entry_error = String::new();
        loop {
            let text = self.checklist_menu_text(&entry_error);
            let Some(choice) = self.console.prompt(&text) else {
                return Flow::Quit;
            };
            entry_error.clear();

            let flow = match choice.as_str() {
                "10" => return self.export_checklist(),
                "9" | "" => return Flow::Continue,
                "1" => self.edit_text(ChecklistField::Temperature),
                "2" => self.edit_text(ChecklistField::Wind),
                "3" => self.edit_text(ChecklistField::SkyConditions),
                "4" => self.edit_text(ChecklistField::Precipitation),
                "5" => self.edit_text(ChecklistField::Technician),
                "6" => self.choose_clutter(),
                "7" => self.edit_text(ChecklistField::AntennaDirMastUp),
                "8" => self.edit_text(ChecklistField::AntennaDirMastStowed),
                other => {
                    entry_error = invalid_choice(other);
                    tracing::debug!("Site Checklist: {}", entry_error);
                    Flow::Continue
                }
            };
            if flow == Flow::Quit {
                return Flow::Quit;
            }
        }
    }

    fn edit_text(&mut self, field: ChecklistField) -> Flow {
        let prompt = format!("{} ({})", field.prompt(), field.get(&self.state.site));
        let Some(input) = self.console.prompt(&prompt) else {
            return Flow::Quit;
        };
        if !input.is_empty() {
            self.persist(field.setting(), &input);
            *field.get_mut(&mut self.state.site) = input;
        }
        Flow::Continue
    }

    fn choose_clutter(&mut self) -> Flow {
        let mut entry_error = String::new();
        loop {
            let mut text = format!("**** CLUTTER CATEGORY ****\n        ({})\n", self.state.site.clutter);
            for category in ClutterCategory::ALL {
                text.push_str(&format!("        {}\n", category));
            }
            text.push_str(&format!("\n          {}\n        Type a choice and press ENTER", entry_error));

            let Some(choice) = self.console.prompt(&text) else {
                return Flow::Quit;
            };
            tracing::debug!("Clutter Category menu choice = {}", choice);
            if choice.is_empty() {
                return Flow::Continue;
            }
            match ClutterCategory::from_choice(&choice) {
                Some(category) => {
                    let label = category.to_string();
                    self.persist(Setting::Clutter, &label);
                    self.state.site.clutter = label;
                    return Flow::Continue;
                }
                None => {
                    entry_error = invalid_choice(&choice);
                    tracing::debug!("{}", entry_error);
                }
            }
        }
    }

    /// Template file if present; otherwise the operator may name another
    /// one or accept the built-in layout.
    fn resolve_template(&mut self) -> Option<Template> {
        loop {
            let path = PathBuf::from(&self.state.settings.checklist_template);
            if path.is_file() {
                return Some(Template::File(path));
            }
            tracing::info!("Checklist template file {} does not exist", path.display());

            let text = format!(
                "Checklist template file {} does not exist.\n\
                 \x20           Press ENTER to create a checklist without using a template or\n\
                 \x20           type 1 then ENTER to specify a different template file.",
                path.display()
            );
            if self.console.prompt(&text)? != "1" {
                return Some(Template::BuiltIn);
            }

            tracing::debug!("User chose to enter new template file.");
            let entered = self.console.prompt("Enter a new template file")?;
            tracing::debug!("User entered new template file {}", entered);
            if Path::new(&entered).is_file() {
                self.persist(Setting::ChecklistTemplate, &entered);
                self.state.settings.checklist_template = entered;
            } else {
                tracing::warn!("Newly entered checklist template file {} does not exist", entered);
            }
        }
    }

    fn export_checklist(&mut self) -> Flow {
        let Some(template) = self.resolve_template() else {
            return Flow::Quit;
        };
        let values = ChecklistValues {
            site: self.state.site.clone(),
            gps: self.state.gps.clone(),
            frequency_hz: self.state.frequency_hz,
            identity: if self.state.connected {
                self.state.identity.clone()
            } else {
                None
            },
            at: Local::now().naive_local(),
        };
        if let Err(e) = checklist::export(&values, &template, &self.state.settings.site_info_folder) {
            tracing::warn!("FAILED to save checklist: {}", e);
            self.state.last_error = Some(e.to_string());
        }
        Flow::Continue
    }
}

impl<R: BufRead, W: Write> LogOperator for Console<R, W> {
    fn log_duration(&mut self, start: NaiveDateTime) -> u64 {
        let text = format!(
            "Capture will start at {}\n            How many seconds?\n            Strike ENTER key to end now.",
            start.format("%X")
        );
        match self.prompt(&text) {
            Some(input) => input.parse().unwrap_or(0),
            None => 0,
        }
    }

    fn countdown(&mut self, remaining: Duration) {
        let secs = remaining.as_secs();
        self.status_line(&format!(
            "{}  Capture will end in {:02}:{:02}",
            Local::now().format("%Y-%m-%d %X"),
            secs / 60,
            secs % 60
        ));
    }

    fn countdown_finished(&mut self) {
        self.end_status_line();
    }
}

/// The two things verified on the analyzer before the main menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteCheck {
    ResultsFolder,
    ChannelTable,
}

impl RemoteCheck {
    fn noun(self) -> &'static str {
        match self {
            RemoteCheck::ResultsFolder => "Measurement Results Folder",
            RemoteCheck::ChannelTable => "Channel Table",
        }
    }

    fn new_value_prompt(self) -> &'static str {
        match self {
            RemoteCheck::ResultsFolder => "New folder",
            RemoteCheck::ChannelTable => "New Channel Table name",
        }
    }

    fn default_value(self) -> &'static str {
        match self {
            RemoteCheck::ResultsFolder => config::DEFAULT_RESULTS_FOLDER,
            RemoteCheck::ChannelTable => config::DEFAULT_CHANNEL_TABLE,
        }
    }

    fn setting(self) -> Setting {
        match self {
            RemoteCheck::ResultsFolder => Setting::ResultsFolder,
            RemoteCheck::ChannelTable => Setting::ChannelTable,
        }
    }

    fn current(self, settings: &Settings) -> &str {
        match self {
            RemoteCheck::ResultsFolder => &settings.results_folder,
            RemoteCheck::ChannelTable => &settings.channel_table,
        }
    }

    fn store(self, settings: &mut Settings, value: String) {
        match self {
            RemoteCheck::ResultsFolder => settings.results_folder = value,
            RemoteCheck::ChannelTable => settings.channel_table = value,
        }
    }

    fn sanitize(self, input: &str) -> String {
        match self {
            RemoteCheck::ResultsFolder => site::sanitize_folder(input),
            RemoteCheck::ChannelTable => site::sanitize_file_name(input),
        }
    }

    fn exists(self, etl: &Etl, value: &str) -> Result<bool, InstrumentError> {
        match self {
            RemoteCheck::ResultsFolder => etl.results_folder_exists(value),
            RemoteCheck::ChannelTable => etl.channel_table_exists(value),
        }
    }
}

/// Free-text entries of the checklist menu.
#[derive(Debug, Clone, Copy)]
enum ChecklistField {
    Temperature,
    Wind,
    SkyConditions,
    Precipitation,
    Technician,
    AntennaDirMastUp,
    AntennaDirMastStowed,
}

impl ChecklistField {
    fn prompt(self) -> &'static str {
        match self {
            ChecklistField::Temperature => "Temperature?",
            ChecklistField::Wind => "Wind?",
            ChecklistField::SkyConditions => "Sky Conditions?",
            ChecklistField::Precipitation => "Precipitation?",
            ChecklistField::Technician => "Technician name?",
            ChecklistField::AntennaDirMastUp => "Actual antenna direction — Mast up?",
            ChecklistField::AntennaDirMastStowed => "Actual antenna direction — Mast stowed?",
        }
    }

    fn setting(self) -> Setting {
        match self {
            ChecklistField::Temperature => Setting::Temperature,
            ChecklistField::Wind => Setting::Wind,
            ChecklistField::SkyConditions => Setting::SkyConditions,
            ChecklistField::Precipitation => Setting::Precipitation,
            ChecklistField::Technician => Setting::Technician,
            ChecklistField::AntennaDirMastUp => Setting::AntennaDirMastUp,
            ChecklistField::AntennaDirMastStowed => Setting::AntennaDirMastStowed,
        }
    }

    fn get(self, site: &SiteRecord) -> &str {
        match self {
            ChecklistField::Temperature => &site.temperature,
            ChecklistField::Wind => &site.wind,
            ChecklistField::SkyConditions => &site.sky_conditions,
            ChecklistField::Precipitation => &site.precipitation,
            ChecklistField::Technician => &site.technician,
            ChecklistField::AntennaDirMastUp => &site.antenna_dir_mast_up,
            ChecklistField::AntennaDirMastStowed => &site.antenna_dir_mast_stowed,
        }
    }

    fn get_mut(self, site: &mut SiteRecord) -> &mut String {
        match self {
            ChecklistField::Temperature => &mut site.temperature,
            ChecklistField::Wind => &mut site.wind,
            ChecklistField::SkyConditions => &mut site.sky_conditions,
            ChecklistField::Precipitation => &mut site.precipitation,
            ChecklistField::Technician => &mut site.technician,
            ChecklistField::AntennaDirMastUp => &mut site.antenna_dir_mast_up,
            ChecklistField::AntennaDirMastStowed => &mut site.antenna_dir_mast_stowed,
        }
    }
}

// Config location, resolved before the app starts.

/// Makes sure the folder for the INI and log files exists. The operator may
/// create it, name another folder or fall back to `default`. `None` quits.
pub fn resolve_config_dir<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    requested: PathBuf,
    default: &Path,
) -> Option<PathBuf> {
    if requested.is_dir() {
        return Some(requested);
    }
    let mut candidate = requested;
    let mut entry_error = String::new();
    loop {
        let text = format!(
            "        Path for INI file does not exist:\n        '{path}'\n\n\
             \x20       1 — Create the path '{path}'\n\
             \x20       2 — Enter a different path\n\
             \x20       3 — Use default '{default}'\n\
             \x20       Q — Quit\n\
             \x20       {entry_error}\n\
             \x20       Type a choice and press ENTER",
            path = candidate.display(),
            default = default.display(),
        );
        let choice = console.prompt(&text)?;
        entry_error.clear();
        match choice.as_str() {
            "q" | "Q" => return None,
            "1" => match fs::create_dir_all(&candidate) {
                Ok(()) => return Some(candidate),
                Err(e) => entry_error = format!("Failed to create {}: {}", candidate.display(), e),
            },
            "2" => {
                let entered = PathBuf::from(console.prompt("Enter new path")?);
                if entered.is_dir() {
                    return Some(entered);
                }
                candidate = entered;
            }
            "3" => match fs::create_dir_all(default) {
                Ok(()) => return Some(default.to_path_buf()),
                Err(e) => entry_error = format!("Failed to create {}: {}", default.display(), e),
            },
            other => entry_error = invalid_choice(other),
        }
    }
}

/// Resolves an INI file named on the command line. A missing file may be
/// created (on first write) or replaced by another name in the same folder.
pub fn resolve_config_file<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    dir: &Path,
    name: &str,
) -> Option<PathBuf> {
    let mut name = name.to_string();
    let mut entry_error = String::new();
    loop {
        let path = dir.join(&name);
        if path.is_file() {
            return Some(path);
        }
        let text = format!(
            "              File name specified was: {name}\n\
             \x20             File does not exist in {dir}\n\n\
             \x20             1 — Create this file '{name}'\n\
             \x20             2 — Enter a different file name\n\
             \x20             Q — Quit\n\
             \x20             {entry_error}\n\
             \x20             Type a choice and press ENTER",
            dir = dir.display(),
        );
        let choice = console.prompt(&text)?;
        entry_error.clear();
        match choice.as_str() {
            "q" | "Q" => return None,
            "1" => return Some(path),
            "2" => name = console.prompt("Enter new file name")?,
            other => entry_error = invalid_choice(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_FILE_NAME;
    use std::io::Cursor;
    use std::net::TcpListener;
    use tempfile::{tempdir, TempDir};

    type TestApp = App<Cursor<Vec<u8>>, Vec<u8>>;

    fn app_with(dir: &TempDir, address: &str, input: &str) -> TestApp {
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE_NAME));
        if !address.is_empty() {
            store.set(Setting::IpAddress, address).unwrap();
        }
        store
            .set(Setting::SiteInfoFolder, &dir.path().join("site").to_string_lossy())
            .unwrap();
        let console = Console::new(Cursor::new(input.as_bytes().to_vec()), Vec::new());
        App::new(console, store)
            .unwrap()
            .with_pacing(Pacing::immediate())
            .with_time_server("ntp.invalid")
    }

    fn output(app: &TestApp) -> String {
        String::from_utf8_lossy(app.console().output()).into_owned()
    }

    fn refused_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("TCPIP::127.0.0.1::{}::SOCKET", port)
    }

    #[test]
    fn screenshot_capture_lands_at_the_expected_path() {
        let dir = tempdir().unwrap();
        let mut app = app_with(&dir, "SIM", "2\nwxyz\n8\n3\n270\n20\n4\na\n12\nq\n");
        app.run();

        let today = Local::now().format("%Y%m%d").to_string();
        let folder = format!(r"Z:\Measurement_results\WXYZ\{today}_WXYZ_R270M20\A\");
        let prefix = format!("{folder}WXYZ_R270M20_A_{today}_");
        let sim = app.etl().unwrap().simulator().unwrap();
        let sim = sim.borrow();
        let overview = sim
            .files
            .iter()
            .find(|f| f.starts_with(&prefix) && f.ends_with("_Overview.PNG"))
            .expect("overview capture");
        // <HHMMSS>_Overview.PNG
        assert_eq!(overview.len(), prefix.len() + 6 + "_Overview.PNG".len());
        assert_eq!(sim.files.len(), 6);
    }

    #[test]
    fn accepted_entries_are_persisted() {
        let dir = tempdir().unwrap();
        let mut app = app_with(&dir, "SIM", "2\nwxyz\n14\n3\n270\n20\n");
        app.run();

        let store = ConfigStore::new(dir.path().join(CONFIG_FILE_NAME));
        assert_eq!(store.get(Setting::Callsign).unwrap().as_deref(), Some("WXYZ"));
        assert_eq!(store.get(Setting::Channel).unwrap().as_deref(), Some("14"));
        assert_eq!(store.get(Setting::Radial).unwrap().as_deref(), Some("270"));
        assert_eq!(store.get(Setting::Distance).unwrap().as_deref(), Some("20"));
        assert_eq!(
            store.get(Setting::ChannelTable).unwrap().as_deref(),
            Some("TV-USA-ATSC")
        );
    }

    #[test]
    fn out_of_range_channel_reprompts_without_saving() {
        let dir = tempdir().unwrap();
        let mut app = app_with(&dir, "SIM", "2\n\n40\nabc\n12\nq\n");
        app.run();

        let text = output(&app);
        assert!(text.contains("MUST BE LESS THAN 37"));
        assert!(text.contains("MUST BE AN INTEGER"));
        assert_eq!(app.state().site.channel, 12);
        assert_eq!(app.state().site.callsign, "XXXX");
    }

    #[test]
    fn invalid_choice_is_shown_on_next_redraw() {
        let dir = tempdir().unwrap();
        let mut app = app_with(&dir, "SIM", "zz\nq\n");
        app.run();
        assert!(output(&app).contains("Your entry \"zz\" is not a valid choice"));
    }

    #[test]
    fn end_of_input_quits() {
        let dir = tempdir().unwrap();
        let mut app = app_with(&dir, "SIM", "");
        app.run();
        assert!(app.state().connected);
    }

    #[test]
    fn offline_session_skips_device_entries() {
        let dir = tempdir().unwrap();
        let mut app = app_with(&dir, &refused_address(), "1\n6\n12\n4\nc\nq\n");
        app.run();

        assert!(!app.state().connected);
        assert_eq!(app.state().site.test_position, "C");
        assert!(output(&app).contains("** No connection to"));
    }

    #[test]
    fn unreachable_address_then_quit() {
        let dir = tempdir().unwrap();
        let mut app = app_with(&dir, &refused_address(), "\n");
        app.run();
        assert!(output(&app).contains("Failed to open connection to"));
        assert!(!app.state().connected);
    }

    #[test]
    fn blank_address_is_requested_and_stored() {
        let dir = tempdir().unwrap();
        let mut app = app_with(&dir, "", "SIM\nq\n");
        app.run();
        assert!(app.state().connected);
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE_NAME));
        assert_eq!(store.get(Setting::IpAddress).unwrap().as_deref(), Some("SIM"));
    }

    #[test]
    fn missing_channel_table_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE_NAME));
        store.set(Setting::ChannelTable, "TV-NOWHERE").unwrap();
        let mut app = app_with(&dir, "SIM", "x\n3\nq\n");
        app.run();

        let text = output(&app);
        assert!(text.contains("Channel Table 'TV-NOWHERE' does NOT exist"));
        assert!(text.contains("Your entry \"x\" is not a valid choice"));
        assert_eq!(app.state().settings.channel_table, "TV-USA-ATSC");
    }

    #[test]
    fn missing_results_folder_can_be_replaced() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE_NAME));
        store.set(Setting::ResultsFolder, r"Q:\gone").unwrap();
        let mut app = app_with(&dir, "SIM", "2\nZ:\\Measurement_results*\nq\n");
        app.run();
        assert_eq!(app.state().settings.results_folder, r"Z:\Measurement_results");
        assert_eq!(
            store.get(Setting::ResultsFolder).unwrap().as_deref(),
            Some(r"Z:\Measurement_results")
        );
    }

    #[test]
    fn clock_warning_appears_when_device_drifts() {
        let dir = tempdir().unwrap();
        let mut app = app_with(&dir, "SIM", "");
        let etl = Etl::new(Resource::Simulated);
        etl.simulator().unwrap().borrow_mut().clock_offset = chrono::Duration::seconds(90);
        app.etl = Some(etl);
        assert_eq!(app.startup(), Flow::Continue);
        assert!(app.state().clock_warning.as_deref().unwrap().contains("seconds different from computer"));

        app.set_etl_clock();
        assert!(app.state().clock_warning.is_none());
    }

    #[test]
    fn checklist_exports_with_built_in_layout() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE_NAME));
        store
            .set(Setting::ChecklistTemplate, &dir.path().join("missing.xlsx").to_string_lossy())
            .unwrap();
        let mut app = app_with(&dir, "SIM", "14\n5\nPat\n6\n7\n10\n\nq\n");
        app.run();

        assert_eq!(app.state().site.technician, "Pat");
        assert_eq!(app.state().site.clutter, "7 — Residential");
        let visit = dir.path().join("site").join("XXXX");
        let exported: Vec<_> = fs::read_dir(&visit)
            .unwrap()
            .flat_map(|d| fs::read_dir(d.unwrap().path().join("Site Info")).unwrap())
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(exported.iter().any(|n| n.ends_with("_Checklist.xlsx")));
        assert!(exported.iter().any(|n| n == "Photos"));
    }

    #[test]
    fn alternate_template_is_used_and_saved_once_it_exists() {
        let dir = tempdir().unwrap();
        let template = dir.path().join("Checklist R3.xlsx");
        fs::write(&template, b"").unwrap();
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE_NAME));
        store
            .set(Setting::ChecklistTemplate, &dir.path().join("missing.xlsx").to_string_lossy())
            .unwrap();
        let typed = format!("1\n{}\n1\n{}\n", dir.path().join("nope.xlsx").display(), template.display());
        let mut app = app_with(&dir, "SIM", &typed);

        assert_eq!(app.resolve_template(), Some(Template::File(template.clone())));
        assert_eq!(
            store.get(Setting::ChecklistTemplate).unwrap().as_deref(),
            Some(template.to_string_lossy().as_ref())
        );
        assert_eq!(app.state().settings.checklist_template, template.to_string_lossy());
    }

    #[test]
    fn missing_alternate_template_is_not_saved() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.xlsx").to_string_lossy().into_owned();
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE_NAME));
        store.set(Setting::ChecklistTemplate, &missing).unwrap();
        let typed = format!("1\n{}\n\n", dir.path().join("nope.xlsx").display());
        let mut app = app_with(&dir, "SIM", &typed);

        assert_eq!(app.resolve_template(), Some(Template::BuiltIn));
        assert_eq!(store.get(Setting::ChecklistTemplate).unwrap(), Some(missing));
    }

    #[test]
    fn log_duration_reads_seconds_and_treats_junk_as_zero() {
        let start = Local::now().naive_local();
        let mut console = Console::new(Cursor::new(b"90\nabc\n\n-3\n".to_vec()), Vec::new());
        assert_eq!(console.log_duration(start), 90);
        assert_eq!(console.log_duration(start), 0);
        assert_eq!(console.log_duration(start), 0);
        assert_eq!(console.log_duration(start), 0);
        // Input exhausted.
        assert_eq!(console.log_duration(start), 0);
        let shown = String::from_utf8_lossy(console.output()).into_owned();
        assert!(shown.contains("How many seconds?"));
    }

    #[test]
    fn checklist_menu_returns_on_blank() {
        let dir = tempdir().unwrap();
        let mut app = app_with(&dir, "SIM", "14\n\nq\n");
        app.run();
        assert!(output(&app).contains("**** SITE CHECKLIST ****"));
    }

    #[test]
    fn config_dir_is_created_on_request() {
        let dir = tempdir().unwrap();
        let wanted = dir.path().join("Osborn");
        let mut console = Console::new(Cursor::new(b"1\n".to_vec()), Vec::new());
        let resolved = resolve_config_dir(&mut console, wanted.clone(), dir.path()).unwrap();
        assert_eq!(resolved, wanted);
        assert!(wanted.is_dir());
    }

    #[test]
    fn config_dir_quit() {
        let dir = tempdir().unwrap();
        let mut console = Console::new(Cursor::new(b"Q\n".to_vec()), Vec::new());
        assert!(resolve_config_dir(&mut console, dir.path().join("nope"), dir.path()).is_none());
    }

    #[test]
    fn config_file_alternative_name() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("other.INI"), "").unwrap();
        let mut console = Console::new(Cursor::new(b"2\nother.INI\n".to_vec()), Vec::new());
        let resolved = resolve_config_file(&mut console, dir.path(), "missing.INI").unwrap();
        assert_eq!(resolved, dir.path().join("other.INI"));
    }

    #[test]
    fn config_file_created_on_request() {
        let dir = tempdir().unwrap();
        let mut console = Console::new(Cursor::new(b"1\n".to_vec()), Vec::new());
        let resolved = resolve_config_file(&mut console, dir.path(), "new.INI").unwrap();
        assert_eq!(resolved, dir.path().join("new.INI"));
    }
}
