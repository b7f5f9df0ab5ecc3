//! Site checklist workbook export.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use umya_spreadsheet::{Spreadsheet, Worksheet};

use crate::error::ChecklistError;
use crate::etl::GpsFix;
use crate::site::{distance_text, radial_text, SiteRecord};

pub const NOT_CONNECTED: &str = "Not connected";

// Labels of the built-in layout, used when no template file is available.
const BUILT_IN_LABELS: &[(&str, &str)] = &[
    ("A1", "Station:"),
    ("A2", "TV Channel Number"),
    ("A3", "Radial:"),
    ("A4", "Measurement"),
    ("A5", "Lat:"),
    ("A6", "Lon:"),
    ("A7", "Site Elev (m)"),
    ("A8", "Heading to Tx (Calc):"),
    ("A9", "Frequency (MHz):"),
    ("A10", "1/4 Wave"),
    ("A11", "Date:"),
    ("A12", "Time:"),
    ("A13", "MEASUREMENTS"),
    ("A14", "Enter Truck Heading:"),
    ("A15", "Confirm Freq:"),
    ("A16", "Confirm Ant. Length:"),
    ("A17", "Location A"),
    ("A18", "Location B"),
    ("A19", "Temperature"),
    ("A20", "Wind"),
    ("A21", "Sky Conditions"),
    ("A22", "Precip"),
    ("A23", "Technician"),
    ("C14", "Calculated Point AZ:"),
    ("D16", "Actual Antenna Dir."),
    ("C17", "Mast 30'"),
    ("C18", "Mast Stowed"),
];

/// Where the workbook layout comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    File(PathBuf),
    BuiltIn,
}

/// Everything written into the checklist.
#[derive(Debug, Clone)]
pub struct ChecklistValues {
    pub site: SiteRecord,
    pub gps: Option<GpsFix>,
    pub frequency_hz: Option<f64>,
    // `None` when running without a connection.
    pub identity: Option<String>,
    pub at: NaiveDateTime,
}

impl ChecklistValues {
    pub fn frequency_mhz(&self) -> f64 {
        self.frequency_hz.unwrap_or(0.0) / 1_000_000.0
    }
}

/// `<root>/<cs>/<YYYYMMDD>_<cs>_<mp>/Site Info/<cs>_<mp>_<YYYYMMDD>_<HHMMSS>_Checklist.xlsx`
pub fn output_path(root: &Path, site: &SiteRecord, at: NaiveDateTime) -> PathBuf {
    let date = at.format("%Y%m%d");
    let point = site.measurement_point();
    root.join(&site.callsign)
        .join(format!("{}_{}_{}", date, site.callsign, point))
        .join("Site Info")
        .join(format!(
            "{}_{}_{}_{}_Checklist.xlsx",
            site.callsign,
            point,
            date,
            at.format("%H%M%S")
        ))
}

fn open_workbook(template: &Template) -> Result<Spreadsheet, ChecklistError> {
    match template {
        Template::File(path) => {
            umya_spreadsheet::reader::xlsx::read(path).map_err(|e| ChecklistError::Template {
                path: path.clone(),
                reason: format!("{:?}", e),
            })
        }
        Template::BuiltIn => Ok(umya_spreadsheet::new_file()),
    }
}

fn set_text(sheet: &mut Worksheet, cell: &str, value: &str) {
    sheet.get_cell_mut(cell).set_value(value);
}

fn set_number(sheet: &mut Worksheet, cell: &str, value: f64) {
    sheet.get_cell_mut(cell).set_value_number(value);
}

fn set_optional_number(sheet: &mut Worksheet, cell: &str, value: Option<u32>, missing: &str) {
    match value {
        Some(n) => set_number(sheet, cell, f64::from(n)),
        None => set_text(sheet, cell, missing),
    }
}

fn fill(sheet: &mut Worksheet, values: &ChecklistValues, template: &Template) {
    let site = &values.site;

    if *template == Template::BuiltIn {
        for (cell, label) in BUILT_IN_LABELS {
            set_text(sheet, cell, label);
        }
        set_number(sheet, "B9", values.frequency_mhz());
    }

    set_text(sheet, "B1", &site.callsign);
    set_number(sheet, "B2", f64::from(site.channel));
    set_optional_number(sheet, "B3", site.radial, &radial_text(None));
    set_optional_number(sheet, "B4", site.distance, &distance_text(None));

    let (lat, lon, alt) = match &values.gps {
        Some(fix) => (fix.latitude.as_str(), fix.longitude.as_str(), fix.altitude.as_str()),
        None => ("", "", ""),
    };
    set_text(sheet, "B5", lat);
    set_text(sheet, "B6", lon);
    set_text(sheet, "B7", alt);
    set_optional_number(sheet, "B8", site.reverse_radial(), "");
    set_text(sheet, "B11", &values.at.format("%m/%d/%Y").to_string());
    set_text(sheet, "B12", &values.at.format("%H:%M:%S").to_string());

    // Replaces the template's own labels here.
    set_text(sheet, "C19", "Clutter category");
    set_text(sheet, "C20", "");
    set_text(sheet, "C21", "");

    set_optional_number(sheet, "B14", site.truck_heading, "");
    set_number(sheet, "B15", values.frequency_mhz());
    set_text(sheet, "B19", &site.temperature);
    set_text(sheet, "B20", &site.wind);
    set_text(sheet, "B21", &site.sky_conditions);
    set_text(sheet, "B22", &site.precipitation);
    set_text(sheet, "B23", &site.technician);
    set_optional_number(sheet, "D14", site.azimuth_to_transmitter(), "");
    set_text(sheet, "D17", &site.antenna_dir_mast_up);
    set_text(sheet, "D18", &site.antenna_dir_mast_stowed);
    set_text(sheet, "D19", &site.clutter);
    set_text(sheet, "A32", "Test instrument:");
    set_text(sheet, "B32", values.identity.as_deref().unwrap_or(NOT_CONNECTED));
}

/// Fills the workbook and saves it under `root`, creating the `Site Info`
/// and `Photos` folders. Returns the saved file.
pub fn export(values: &ChecklistValues, template: &Template, root: &Path) -> Result<PathBuf, ChecklistError> {
    if *template == Template::BuiltIn {
        tracing::warn!("Creating a checklist without a template; the layout differs from the template's.");
    }
    let mut book = open_workbook(template)?;
    let sheet = book.get_sheet_mut(&0).ok_or(ChecklistError::NoWorksheet)?;
    fill(sheet, values, template);

    let path = output_path(root, &values.site, values.at);
    if let Some(folder) = path.parent() {
        fs::create_dir_all(folder.join("Photos"))?;
    }
    umya_spreadsheet::writer::xlsx::write(&book, &path).map_err(|e| ChecklistError::Save {
        path: path.clone(),
        reason: format!("{:?}", e),
    })?;

    if path.is_file() {
        tracing::warn!("Exported checklist to {}", path.display());
    } else {
        tracing::warn!("FAILED to save {}", path.display());
    }
    Ok(path)
}
