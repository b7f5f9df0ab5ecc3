//! INI-backed settings.
//!
//! Every accepted edit is written straight back to the file, so a crash
//! loses at most the entry being typed.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use ini::{EscapePolicy, Ini, ParseOption, WriteOption};

use crate::error::ConfigError;
use crate::site::SiteRecord;

pub const CONFIG_FILE_NAME: &str = "fsCapture.INI";
pub const LOG_FILE_NAME: &str = "fsCapture.log";
pub const VENDOR_DIR: &str = "Osborn";

pub const DEFAULT_CHANNEL_TABLE: &str = "TV-USA-ATSC";
pub const DEFAULT_RESULTS_FOLDER: &str = r"Z:\Measurement_results";
pub const DEFAULT_CHECKLIST_TEMPLATE: &str =
    r"C:\Shared\Info and Template\Folder Template\Site Info\Template Checklist R2.xlsx";

/// Every value mirrored in the INI file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    IpAddress,
    Callsign,
    Channel,
    Radial,
    Distance,
    TestPosition,
    TruckHeading,
    Temperature,
    Wind,
    SkyConditions,
    Precipitation,
    Technician,
    Clutter,
    AntennaDirMastUp,
    AntennaDirMastStowed,
    ChannelTable,
    ChecklistTemplate,
    ResultsFolder,
    SiteInfoFolder,
}

impl Setting {
    pub fn section(self) -> &'static str {
        match self {
            Setting::IpAddress => "DEFAULT",
            Setting::ChecklistTemplate => "ChecklistTemplate",
            Setting::ResultsFolder | Setting::SiteInfoFolder => "Measurement_Results_Folder",
            _ => "UserEntered",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Setting::IpAddress => "ipaddr",
            Setting::Callsign => "_callsign",
            Setting::Channel => "_channel",
            Setting::Radial => "_radial",
            Setting::Distance => "_dist",
            Setting::TestPosition => "_testposition",
            Setting::TruckHeading => "_truckheading",
            Setting::Temperature => "_temperature",
            Setting::Wind => "_wind",
            Setting::SkyConditions => "_skycond",
            Setting::Precipitation => "_precip",
            Setting::Technician => "_techname",
            Setting::Clutter => "_clutter",
            Setting::AntennaDirMastUp => "_antdirup",
            Setting::AntennaDirMastStowed => "_antdirdown",
            Setting::ChannelTable => "_channel_table",
            Setting::ChecklistTemplate => "_checklist_template",
            Setting::ResultsFolder => "_meas_results_folder",
            Setting::SiteInfoFolder => "_site_info_folder",
        }
    }
}

/// One INI file on disk.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn load(&self) -> Result<Option<Ini>, ConfigError> {
        if !self.exists() {
            return Ok(None);
        }
        Ini::load_from_file_opt(&self.path, plain_values())
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    /// Stored value, or `None` when the file, section or key is missing.
    pub fn get(&self, setting: Setting) -> Result<Option<String>, ConfigError> {
        let Some(ini) = self.load()? else {
            tracing::debug!("{} does not exist.", self.path.display());
            return Ok(None);
        };
        let value = ini.get_from(Some(setting.section()), setting.key()).map(str::to_string);
        if value.is_none() {
            tracing::debug!("Could not get {} from {}", setting.key(), self.path.display());
        }
        Ok(value)
    }

    /// Re-reads the file, updates one key and writes the whole file back
    /// before returning.
    pub fn set(&self, setting: Setting, value: &str) -> Result<(), ConfigError> {
        let mut ini = self.load()?.unwrap_or_default();
        ini.with_section(Some(setting.section())).set(setting.key(), value);
        self.write_atomically(&ini).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!("Wrote {}/{} = {}", setting.section(), setting.key(), value);
        Ok(())
    }

    fn write_atomically(&self, ini: &Ini) -> io::Result<()> {
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = File::create(&tmp_path)?;
        ini.write_to_opt(
            &mut file,
            WriteOption {
                escape_policy: EscapePolicy::Nothing,
                ..Default::default()
            },
        )?;
        file.flush()?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &self.path)
    }
}

// Values are Windows paths written by hand or by other tools: backslashes
// and quotes are literal.
fn plain_values() -> ParseOption {
    ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..Default::default()
    }
}

/// Per-user application data folder holding the INI and log files.
pub fn default_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().join(VENDOR_DIR))
}

/// Host folder the checklist workbook is saved under.
pub fn default_site_info_folder() -> PathBuf {
    if cfg!(windows) {
        return PathBuf::from(r"C:\Shared\Measurement_results");
    }
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join("Measurement_results"))
        .unwrap_or_else(|| PathBuf::from("Measurement_results"))
}

/// Session configuration: where things live rather than what was measured.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub ip_address: String,
    pub channel_table: String,
    pub checklist_template: String,
    pub results_folder: String,
    pub site_info_folder: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ip_address: String::new(),
            channel_table: DEFAULT_CHANNEL_TABLE.to_string(),
            checklist_template: DEFAULT_CHECKLIST_TEMPLATE.to_string(),
            results_folder: DEFAULT_RESULTS_FOLDER.to_string(),
            site_info_folder: default_site_info_folder(),
        }
    }
}

impl Settings {
    /// Stored values laid over the defaults.
    pub fn load(store: &ConfigStore) -> Result<Self, ConfigError> {
        let mut settings = Settings::default();
        if let Some(ip) = store.get(Setting::IpAddress)? {
            settings.ip_address = ip;
        }
        if let Some(table) = store.get(Setting::ChannelTable)? {
            settings.channel_table = table;
        }
        match store.get(Setting::ChecklistTemplate)? {
            Some(template) => settings.checklist_template = template,
            None => tracing::debug!("Did not read _checklist_template from INI file"),
        }
        match store.get(Setting::ResultsFolder)? {
            Some(folder) => settings.results_folder = folder,
            None => tracing::debug!("Did not read _meas_results_folder from INI file"),
        }
        if let Some(folder) = store.get(Setting::SiteInfoFolder)? {
            settings.site_info_folder = PathBuf::from(folder);
        }
        tracing::debug!("After reading INI file, _checklist_template is {}", settings.checklist_template);
        tracing::debug!("After reading INI file, _meas_results_folder is {}", settings.results_folder);
        Ok(settings)
    }
}

/// Loads the site record; malformed numbers keep their defaults.
pub fn load_site_record(store: &ConfigStore) -> Result<SiteRecord, ConfigError> {
    let mut site = SiteRecord::default();

    if let Some(callsign) = store.get(Setting::Callsign)? {
        site.callsign = callsign;
    }
    if let Some(channel) = parse_number(store, Setting::Channel)? {
        site.channel = channel;
    }
    site.radial = parse_number(store, Setting::Radial)?;
    site.distance = parse_number(store, Setting::Distance)?;
    if let Some(position) = store.get(Setting::TestPosition)? {
        site.test_position = position;
    }
    site.truck_heading = parse_number(store, Setting::TruckHeading)?;

    let text_fields: [(Setting, &mut String); 8] = [
        (Setting::Temperature, &mut site.temperature),
        (Setting::Wind, &mut site.wind),
        (Setting::SkyConditions, &mut site.sky_conditions),
        (Setting::Precipitation, &mut site.precipitation),
        (Setting::Technician, &mut site.technician),
        (Setting::Clutter, &mut site.clutter),
        (Setting::AntennaDirMastUp, &mut site.antenna_dir_mast_up),
        (Setting::AntennaDirMastStowed, &mut site.antenna_dir_mast_stowed),
    ];
    for (setting, field) in text_fields {
        if let Some(value) = store.get(setting)? {
            *field = value;
        }
    }

    tracing::debug!("After reading INI file, _callsign is {}", site.callsign);
    tracing::debug!("After reading INI file, _testposition is {}", site.test_position);
    Ok(site)
}

fn parse_number(store: &ConfigStore, setting: Setting) -> Result<Option<u32>, ConfigError> {
    let Some(raw) = store.get(setting)? else {
        return Ok(None);
    };
    match raw.trim().parse() {
        Ok(value) => Ok(Some(value)),
        Err(_) => {
            tracing::debug!("Ignoring {} = {:?}; not a number", setting.key(), raw);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE_NAME));
        assert_eq!(store.get(Setting::Callsign).unwrap(), None);
    }

    #[test]
    fn set_then_get_round_trips_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        ConfigStore::new(&path).set(Setting::Callsign, "WXYZ").unwrap();
        ConfigStore::new(&path).set(Setting::ResultsFolder, r"Z:\Elsewhere").unwrap();

        let reopened = ConfigStore::new(&path);
        assert_eq!(reopened.get(Setting::Callsign).unwrap().as_deref(), Some("WXYZ"));
        assert_eq!(
            reopened.get(Setting::ResultsFolder).unwrap().as_deref(),
            Some(r"Z:\Elsewhere")
        );
        assert_eq!(reopened.get(Setting::Channel).unwrap(), None);
    }

    #[test]
    fn set_overwrites_and_keeps_other_keys() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE_NAME));
        store.set(Setting::Channel, "8").unwrap();
        store.set(Setting::Radial, "270").unwrap();
        store.set(Setting::Channel, "14").unwrap();
        assert_eq!(store.get(Setting::Channel).unwrap().as_deref(), Some("14"));
        assert_eq!(store.get(Setting::Radial).unwrap().as_deref(), Some("270"));
        assert!(!dir.path().join("fsCapture.INI.tmp").exists());
    }

    #[test]
    fn file_uses_the_expected_sections() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE_NAME));
        store.set(Setting::IpAddress, "192.168.1.50").unwrap();
        store.set(Setting::ChecklistTemplate, r"C:\t.xlsx").unwrap();
        store.set(Setting::Callsign, "WXYZ").unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("[DEFAULT]"));
        assert!(text.contains("[ChecklistTemplate]"));
        assert!(text.contains("[UserEntered]"));
        assert!(text.contains("ipaddr=192.168.1.50"));
        assert!(text.contains(r"_checklist_template=C:\t.xlsx"));
    }

    #[test]
    fn backslash_paths_are_read_and_written_verbatim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            "[Measurement_Results_Folder]\n\
             _meas_results_folder = Z:\\Measurement_results\n\n\
             [ChecklistTemplate]\n\
             _checklist_template = C:\\Shared\\new\\Template.xlsx\n",
        )
        .unwrap();

        let store = ConfigStore::new(&path);
        assert_eq!(
            store.get(Setting::ResultsFolder).unwrap().as_deref(),
            Some(r"Z:\Measurement_results")
        );
        assert_eq!(
            store.get(Setting::ChecklistTemplate).unwrap().as_deref(),
            Some(r"C:\Shared\new\Template.xlsx")
        );

        store.set(Setting::Callsign, "WXYZ").unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains(r"_meas_results_folder=Z:\Measurement_results"));
        assert!(!text.contains(r"\\"));
        let settings = Settings::load(&store).unwrap();
        assert_eq!(settings.results_folder, r"Z:\Measurement_results");
        assert_eq!(settings.checklist_template, r"C:\Shared\new\Template.xlsx");
    }

    #[test]
    fn settings_default_when_file_is_missing() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE_NAME));
        let settings = Settings::load(&store).unwrap();
        assert_eq!(settings.channel_table, "TV-USA-ATSC");
        assert_eq!(settings.results_folder, r"Z:\Measurement_results");
        assert!(settings.ip_address.is_empty());
    }

    #[test]
    fn site_record_loads_and_ignores_placeholders() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE_NAME));
        store.set(Setting::Callsign, "KABC").unwrap();
        store.set(Setting::Channel, "14").unwrap();
        store.set(Setting::Radial, "xxx").unwrap();
        store.set(Setting::Distance, "20").unwrap();
        store.set(Setting::Wind, "calm").unwrap();

        let site = load_site_record(&store).unwrap();
        assert_eq!(site.callsign, "KABC");
        assert_eq!(site.channel, 14);
        assert_eq!(site.radial, None);
        assert_eq!(site.distance, Some(20));
        assert_eq!(site.wind, "calm");
        assert_eq!(site.test_position, "B");
    }

    #[test]
    fn malformed_channel_keeps_default() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE_NAME));
        store.set(Setting::Channel, "eight").unwrap();
        assert_eq!(load_site_record(&store).unwrap().channel, 8);
    }
}
