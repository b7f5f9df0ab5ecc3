//! Site record entered by the technician, plus the values derived from it.

use std::fmt;

/// Characters Windows refuses in file names.
const ILLEGAL_FILE_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Characters refused in a folder path. Separators and the drive colon stay.
const ILLEGAL_PATH_CHARS: &[char] = &['*', '?', '<', '>', '|'];

pub const CALLSIGN_MAX_LEN: usize = 9;
pub const TEST_POSITION_MAX_LEN: usize = 7;

/// Everything the technician records about the measurement site.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRecord {
    pub callsign: String,
    pub channel: u32,
    // Unset until entered; rendered as `xxx` / `xx` in the measurement point.
    pub radial: Option<u32>,
    pub distance: Option<u32>,
    pub test_position: String,
    pub truck_heading: Option<u32>,
    pub temperature: String,
    pub wind: String,
    pub sky_conditions: String,
    pub precipitation: String,
    pub technician: String,
    // Stored as the clutter menu label.
    pub clutter: String,
    pub antenna_dir_mast_up: String,
    pub antenna_dir_mast_stowed: String,
}

impl Default for SiteRecord {
    fn default() -> Self {
        Self {
            callsign: "XXXX".to_string(),
            channel: 8,
            radial: None,
            distance: None,
            test_position: "B".to_string(),
            truck_heading: None,
            temperature: String::new(),
            wind: String::new(),
            sky_conditions: String::new(),
            precipitation: String::new(),
            technician: String::new(),
            clutter: String::new(),
            antenna_dir_mast_up: String::new(),
            antenna_dir_mast_stowed: String::new(),
        }
    }
}

impl SiteRecord {
    /// `R<radial>M<distance>`, e.g. `R270M20`.
    pub fn measurement_point(&self) -> String {
        format!("R{}M{}", radial_text(self.radial), distance_text(self.distance))
    }

    pub fn reverse_radial(&self) -> Option<u32> {
        self.radial.map(reverse_radial)
    }

    /// Direction from the truck antenna to the transmitter, once both the
    /// radial and the truck heading are known.
    pub fn azimuth_to_transmitter(&self) -> Option<u32> {
        match (self.radial, self.truck_heading) {
            (Some(radial), Some(heading)) => Some(azimuth_to_transmitter(radial, heading)),
            _ => None,
        }
    }
}

pub fn radial_text(radial: Option<u32>) -> String {
    radial.map_or_else(|| "xxx".to_string(), |r| r.to_string())
}

pub fn distance_text(distance: Option<u32>) -> String {
    distance.map_or_else(|| "xx".to_string(), |d| d.to_string())
}

/// Radial pointing back at the transmitter.
pub fn reverse_radial(radial: u32) -> u32 {
    if radial >= 180 {
        radial - 180
    } else {
        radial + 180
    }
}

/// Reverse radial minus truck heading, wrapped into `[0, 360)`.
pub fn azimuth_to_transmitter(radial: u32, truck_heading: u32) -> u32 {
    let azimuth = reverse_radial(radial) as i64 - truck_heading as i64;
    if azimuth < 0 {
        (azimuth + 360) as u32
    } else {
        azimuth as u32
    }
}

/// Integer fields entered at a bounded prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundedField {
    Channel,
    Radial,
    Distance,
    TruckHeading,
}

impl BoundedField {
    pub fn range(self) -> (i64, i64) {
        match self {
            BoundedField::Channel => (2, 36),
            BoundedField::Radial => (0, 360),
            BoundedField::Distance => (0, 200),
            BoundedField::TruckHeading => (0, 360),
        }
    }

    /// Limits quoted back when an entry is out of range. The channel prompt
    /// quotes the first refused values; the others quote the bounds.
    fn quoted_limits(self) -> (i64, i64) {
        match self {
            BoundedField::Channel => (1, 37),
            BoundedField::Radial | BoundedField::TruckHeading => (0, 360),
            BoundedField::Distance => (0, 200),
        }
    }

    pub fn prompt(self) -> &'static str {
        match self {
            BoundedField::Channel => "Channel number?",
            BoundedField::Radial => "Radial?",
            BoundedField::Distance => "Distance?",
            BoundedField::TruckHeading => "Truck Heading?",
        }
    }

    /// Parses operator input, trimming surrounding whitespace.
    pub fn parse(self, input: &str) -> Result<u32, EntryError> {
        let (low, high) = self.range();
        let (below, above) = self.quoted_limits();
        let value: i64 = input.trim().parse().map_err(|_| EntryError::NotAnInteger)?;
        if value > high {
            Err(EntryError::TooHigh { limit: above })
        } else if value < low {
            Err(EntryError::TooLow { limit: below })
        } else {
            Ok(value as u32)
        }
    }
}

/// Why a bounded entry was refused. Displays as the re-prompt text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryError {
    NotAnInteger,
    TooHigh { limit: i64 },
    TooLow { limit: i64 },
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryError::NotAnInteger => write!(f, "MUST BE AN INTEGER"),
            EntryError::TooHigh { limit } => write!(f, "MUST BE LESS THAN {}", limit),
            EntryError::TooLow { limit } => write!(f, "MUST BE GREATER THAN {}", limit),
        }
    }
}

/// Removes spaces, upper-cases, keeps the first `max_len` characters and
/// drops anything illegal in a file name.
fn sanitize_identifier(input: &str, max_len: usize) -> String {
    input
        .chars()
        .filter(|c| *c != ' ')
        .flat_map(char::to_uppercase)
        .take(max_len)
        .filter(|c| !ILLEGAL_FILE_CHARS.contains(c))
        .collect()
}

pub fn sanitize_callsign(input: &str) -> String {
    sanitize_identifier(input, CALLSIGN_MAX_LEN)
}

pub fn sanitize_test_position(input: &str) -> String {
    sanitize_identifier(input, TEST_POSITION_MAX_LEN)
}

/// Channel table names become `<name>.CHT` files on the analyzer.
pub fn sanitize_file_name(input: &str) -> String {
    input.chars().filter(|c| !ILLEGAL_FILE_CHARS.contains(c)).collect()
}

pub fn sanitize_folder(input: &str) -> String {
    input.chars().filter(|c| !ILLEGAL_PATH_CHARS.contains(c)).collect()
}

/// Land-cover class around the measurement site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClutterCategory {
    OpenLand = 1,
    Agricultural,
    Rangeland,
    Water,
    ForestLand,
    Wetland,
    Residential,
    MixedUrban,
    CommercialIndustrial,
    SnowAndIce,
}

impl ClutterCategory {
    pub const ALL: [ClutterCategory; 10] = [
        ClutterCategory::OpenLand,
        ClutterCategory::Agricultural,
        ClutterCategory::Rangeland,
        ClutterCategory::Water,
        ClutterCategory::ForestLand,
        ClutterCategory::Wetland,
        ClutterCategory::Residential,
        ClutterCategory::MixedUrban,
        ClutterCategory::CommercialIndustrial,
        ClutterCategory::SnowAndIce,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            ClutterCategory::OpenLand => "Open land",
            ClutterCategory::Agricultural => "Agricultural",
            ClutterCategory::Rangeland => "Rangeland",
            ClutterCategory::Water => "Water",
            ClutterCategory::ForestLand => "Forest land",
            ClutterCategory::Wetland => "Wetland",
            ClutterCategory::Residential => "Residential",
            ClutterCategory::MixedUrban => "Mixed Urban / Buildings",
            ClutterCategory::CommercialIndustrial => "Commercial / Industrial",
            ClutterCategory::SnowAndIce => "Snow and Ice",
        }
    }

    /// Menu choice `1`..`10`.
    pub fn from_choice(choice: &str) -> Option<Self> {
        let n: usize = choice.trim().parse().ok()?;
        Self::ALL.get(n.checked_sub(1)?).copied()
    }
}

impl fmt::Display for ClutterCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} — {}", self.number(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measurement_point_uses_placeholders_until_entered() {
        let mut site = SiteRecord::default();
        assert_eq!(site.measurement_point(), "RxxxMxx");
        site.radial = Some(270);
        site.distance = Some(20);
        assert_eq!(site.measurement_point(), "R270M20");
    }

    #[test]
    fn reverse_radial_flips_half_circle() {
        assert_eq!(reverse_radial(270), 90);
        assert_eq!(reverse_radial(180), 0);
        assert_eq!(reverse_radial(0), 180);
        assert_eq!(reverse_radial(179), 359);
        assert_eq!(reverse_radial(360), 180);
    }

    #[test]
    fn azimuth_to_transmitter_wraps_negative() {
        assert_eq!(azimuth_to_transmitter(270, 45), 45);
        assert_eq!(azimuth_to_transmitter(270, 100), 350);
        assert_eq!(azimuth_to_transmitter(0, 360), 180);
        assert_eq!(azimuth_to_transmitter(180, 360), 0);
    }

    #[test]
    fn azimuth_needs_radial_and_heading() {
        let mut site = SiteRecord {
            radial: Some(270),
            ..Default::default()
        };
        assert_eq!(site.azimuth_to_transmitter(), None);
        site.truck_heading = Some(45);
        assert_eq!(site.azimuth_to_transmitter(), Some(45));
        assert_eq!(site.reverse_radial(), Some(90));
    }

    #[test]
    fn channel_bounds() {
        assert_eq!(BoundedField::Channel.parse("8"), Ok(8));
        assert_eq!(BoundedField::Channel.parse(" 36 "), Ok(36));
        assert_eq!(BoundedField::Channel.parse("2"), Ok(2));
        assert_eq!(BoundedField::Channel.parse("37"), Err(EntryError::TooHigh { limit: 37 }));
        assert_eq!(BoundedField::Channel.parse("1"), Err(EntryError::TooLow { limit: 1 }));
        assert_eq!(BoundedField::Channel.parse("eight"), Err(EntryError::NotAnInteger));
    }

    #[test]
    fn radial_distance_heading_bounds() {
        assert_eq!(BoundedField::Radial.parse("360"), Ok(360));
        assert!(BoundedField::Radial.parse("361").is_err());
        assert!(BoundedField::Radial.parse("-1").is_err());
        assert_eq!(BoundedField::Distance.parse("200"), Ok(200));
        assert!(BoundedField::Distance.parse("201").is_err());
        assert_eq!(BoundedField::TruckHeading.parse("0"), Ok(0));
        assert!(BoundedField::TruckHeading.parse("12.5").is_err());
    }

    #[test]
    fn out_of_range_texts_quote_the_prompt_limits() {
        let text = |field: BoundedField, input: &str| field.parse(input).unwrap_err().to_string();
        assert_eq!(text(BoundedField::Radial, "361"), "MUST BE LESS THAN 360");
        assert_eq!(text(BoundedField::Radial, "-1"), "MUST BE GREATER THAN 0");
        assert_eq!(text(BoundedField::Distance, "201"), "MUST BE LESS THAN 200");
        assert_eq!(text(BoundedField::Distance, "-5"), "MUST BE GREATER THAN 0");
        assert_eq!(text(BoundedField::TruckHeading, "400"), "MUST BE LESS THAN 360");
        assert_eq!(text(BoundedField::Channel, "40"), "MUST BE LESS THAN 37");
        assert_eq!(text(BoundedField::Channel, "0"), "MUST BE GREATER THAN 1");
    }

    #[test]
    fn entry_error_texts() {
        assert_eq!(EntryError::NotAnInteger.to_string(), "MUST BE AN INTEGER");
        assert_eq!(EntryError::TooHigh { limit: 37 }.to_string(), "MUST BE LESS THAN 37");
        assert_eq!(EntryError::TooLow { limit: 1 }.to_string(), "MUST BE GREATER THAN 1");
    }

    #[test]
    fn callsign_is_cleaned_and_truncated() {
        assert_eq!(sanitize_callsign("w x y z"), "WXYZ");
        assert_eq!(sanitize_callsign("kabc-dt2 extra"), "KABC-DT2E");
        assert_eq!(sanitize_callsign("w?x*y"), "WXY");
    }

    #[test]
    fn test_position_is_limited_to_seven() {
        assert_eq!(sanitize_test_position("a"), "A");
        assert_eq!(sanitize_test_position("abcdefghij"), "ABCDEFG");
    }

    #[test]
    fn file_and_folder_sanitizers() {
        assert_eq!(sanitize_file_name(r#"TV:USA/ATSC?"#), "TVUSAATSC");
        assert_eq!(sanitize_folder(r"Z:\Results*<2>"), r"Z:\Results2");
    }

    #[test]
    fn clutter_choices() {
        assert_eq!(ClutterCategory::from_choice("1"), Some(ClutterCategory::OpenLand));
        assert_eq!(ClutterCategory::from_choice("10"), Some(ClutterCategory::SnowAndIce));
        assert_eq!(ClutterCategory::from_choice("0"), None);
        assert_eq!(ClutterCategory::from_choice("11"), None);
        assert_eq!(ClutterCategory::Residential.to_string(), "7 — Residential");
    }
}
