use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of each FIPS segment making up a tract identifier.
const STATE_WIDTH: usize = 2;
const COUNTY_WIDTH: usize = 3;
const TRACT_WIDTH: usize = 6;
pub const TRACT_ID_WIDTH: usize = STATE_WIDTH + COUNTY_WIDTH + TRACT_WIDTH;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeographyError {
    #[error("{segment} FIPS '{value}' must be at most {width} digits")]
    InvalidSegment {
        segment: &'static str,
        value: String,
        width: usize,
    },
    #[error("tract identifier '{0}' must be 11 digits")]
    InvalidTractId(String),
}

/// Eleven digit state+county+tract identifier, always numeric and zero-padded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TractId(String);

impl TractId {
    /// Normalizes spreadsheet-style identifiers: trims, drops a trailing `.0`
    /// left by numeric cells, and left-pads to eleven digits.
    pub fn parse(raw: &str) -> Result<Self, GeographyError> {
        let trimmed = raw.trim();
        let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);
        if digits.is_empty()
            || digits.len() > TRACT_ID_WIDTH
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(GeographyError::InvalidTractId(raw.to_string()));
        }
        Ok(Self(format!("{digits:0>width$}", width = TRACT_ID_WIDTH)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn state_fips(&self) -> &str {
        &self.0[..STATE_WIDTH]
    }

    pub fn county_fips(&self) -> &str {
        &self.0[STATE_WIDTH..STATE_WIDTH + COUNTY_WIDTH]
    }

    pub fn tract_code(&self) -> &str {
        &self.0[STATE_WIDTH + COUNTY_WIDTH..]
    }
}

impl fmt::Display for TractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TractId {
    type Error = GeographyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TractId> for String {
    fn from(value: TractId) -> Self {
        value.0
    }
}

/// State, county and tract FIPS codes plus the optional block group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TractGeography {
    pub state_fips: String,
    pub county_fips: String,
    pub tract_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_group: Option<String>,
    pub tract_id: TractId,
}

impl TractGeography {
    pub fn new(
        state: &str,
        county: &str,
        tract: &str,
        block_group: Option<&str>,
    ) -> Result<Self, GeographyError> {
        let state_fips = pad_segment("state", state, STATE_WIDTH)?;
        let county_fips = pad_segment("county", county, COUNTY_WIDTH)?;
        let tract_code = pad_segment("tract", tract, TRACT_WIDTH)?;
        let block_group = match block_group.map(str::trim).filter(|bg| !bg.is_empty()) {
            Some(bg) => Some(pad_segment("block group", bg, 1)?),
            None => None,
        };

        let tract_id = TractId(format!("{state_fips}{county_fips}{tract_code}"));
        Ok(Self {
            state_fips,
            county_fips,
            tract_code,
            block_group,
            tract_id,
        })
    }

    pub fn tract_id(&self) -> &TractId {
        &self.tract_id
    }
}

fn pad_segment(segment: &'static str, raw: &str, width: usize) -> Result<String, GeographyError> {
    let value = raw.trim();
    if value.is_empty() || value.len() > width || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(GeographyError::InvalidSegment {
            segment,
            value: raw.to_string(),
            width,
        });
    }
    Ok(format!("{value:0>width$}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Which geocoding tier produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocoderKind {
    Census,
    GoogleMaps,
}

impl GeocoderKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Census => "U.S. Census Geocoder",
            Self::GoogleMaps => "Google Maps",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodedMatch {
    /// The candidate string that produced the match.
    pub candidate: String,
    pub standardized_address: String,
    pub coordinates: Coordinates,
    pub geography: TractGeography,
    pub provider: GeocoderKind,
}
