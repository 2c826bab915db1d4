use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

static UNIT_DESIGNATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\b(?:apt|apartment|unit|ste|suite)\b|#).*$").expect("unit pattern compiles")
});
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").expect("punctuation pattern"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Spelled-out words keyed by the abbreviations geocoders commonly miss.
const ABBREVIATIONS: &[(&str, &[&str])] = &[
    ("street", &["st", "str"]),
    ("avenue", &["ave", "av"]),
    ("boulevard", &["blvd", "blv"]),
    ("road", &["rd"]),
    ("drive", &["dr"]),
    ("lane", &["ln"]),
    ("court", &["ct"]),
    ("place", &["pl"]),
    ("circle", &["cir"]),
    ("north", &["n"]),
    ("south", &["s"]),
    ("east", &["e"]),
    ("west", &["w"]),
    ("northeast", &["ne"]),
    ("northwest", &["nw"]),
    ("southeast", &["se"]),
    ("southwest", &["sw"]),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("Address must be in format: \"Street, City State ZIP\"")]
    InvalidFormat,
    #[error("Must include city and state")]
    MissingCityState,
    #[error("{0} is required")]
    MissingField(&'static str),
}

/// Raw, user-supplied address parts. Nothing is validated on construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInput {
    pub street: String,
    pub city: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
}

impl AddressInput {
    pub fn new(
        street: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
        zip: Option<String>,
    ) -> Self {
        Self {
            street: street.into(),
            city: city.into(),
            state: state.into(),
            zip,
        }
    }

    pub fn validate(&self) -> Result<(), AddressParseError> {
        if self.street.trim().is_empty() {
            return Err(AddressParseError::MissingField("street"));
        }
        if self.city.trim().is_empty() {
            return Err(AddressParseError::MissingField("city"));
        }
        if self.state.trim().is_empty() {
            return Err(AddressParseError::MissingField("state"));
        }
        Ok(())
    }

    pub fn zip(&self) -> Option<&str> {
        self.zip.as_deref().map(str::trim).filter(|zip| !zip.is_empty())
    }

    /// `"Street, City, State ZIP"` with each part trimmed.
    pub fn one_line(&self) -> String {
        format_one_line(self.street.trim(), self.city.trim(), self.state.trim(), self.zip())
    }

    /// Parses a single-cell address such as `"25 Drake Ave, New Rochelle NY 10805"`
    /// or `"25 Drake Ave, New Rochelle, NY 10805"`.
    pub fn parse_line(line: &str) -> Result<Self, AddressParseError> {
        let mut cleaned = line.trim().trim_matches('"').trim();
        for country in ["United States", "USA"] {
            if let Some(stripped) = cleaned.strip_suffix(country) {
                cleaned = stripped.trim_end().trim_end_matches(',').trim_end();
            }
        }

        let parts: Vec<&str> = cleaned.split(',').map(str::trim).collect();
        if parts.len() < 2 || parts[0].is_empty() {
            return Err(AddressParseError::InvalidFormat);
        }
        let street = parts[0];

        let state_zip = parts[2..].join(" ");
        let (city, state, zip) = if parts.len() >= 3 {
            let mut tokens: Vec<&str> = state_zip.split_whitespace().collect();
            let zip = pop_zip(&mut tokens);
            (parts[1].to_string(), tokens.join(" "), zip)
        } else {
            let mut tokens: Vec<&str> = parts[1].split_whitespace().collect();
            let zip = pop_zip(&mut tokens);
            let state = tokens.pop().unwrap_or_default().to_string();
            (tokens.join(" "), state, zip)
        };

        if city.trim().is_empty() || state.trim().is_empty() {
            return Err(AddressParseError::MissingCityState);
        }

        Ok(Self::new(street, city, state, zip))
    }
}

fn pop_zip(tokens: &mut Vec<&str>) -> Option<String> {
    let last = tokens.last()?;
    if is_zip(last) {
        tokens.pop().map(str::to_string)
    } else {
        None
    }
}

fn is_zip(token: &str) -> bool {
    let (five, plus_four) = match token.split_once('-') {
        Some((five, four)) => (five, Some(four)),
        None => (token, None),
    };
    let digits = |value: &str, len: usize| {
        value.len() == len && value.bytes().all(|b| b.is_ascii_digit())
    };
    digits(five, 5) && plus_four.map_or(true, |four| digits(four, 4))
}

fn format_one_line(street: &str, city: &str, state: &str, zip: Option<&str>) -> String {
    match zip {
        Some(zip) => format!("{street}, {city}, {state} {zip}"),
        None => format!("{street}, {city}, {state}"),
    }
}

/// One address string submitted to a geocoder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct AddressCandidate(String);

impl AddressCandidate {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AddressCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces the ordered, duplicate-free candidate list for one address.
///
/// Order is the resolver's tie-break: the address as given, then with
/// abbreviations spelled out, then without a unit designator, then with
/// punctuation stripped. Each variant rewrites only the street and starts
/// from the original street, so the variants stay independent of each other.
#[derive(Debug, Clone)]
pub struct AddressVariationGenerator {
    abbreviations: HashMap<&'static str, &'static str>,
}

impl Default for AddressVariationGenerator {
    fn default() -> Self {
        let abbreviations = ABBREVIATIONS
            .iter()
            .flat_map(|(full, abbrs)| abbrs.iter().map(move |abbr| (*abbr, *full)))
            .collect();
        Self { abbreviations }
    }
}

impl AddressVariationGenerator {
    pub fn generate(&self, input: &AddressInput) -> Vec<AddressCandidate> {
        let street = input.street.trim();
        let streets = [
            street.to_string(),
            self.expand_abbreviations(street),
            strip_unit(street),
            strip_punctuation(street),
        ];

        let mut seen = HashSet::new();
        streets
            .iter()
            .filter(|variant| !variant.is_empty())
            .map(|variant| {
                format_one_line(variant, input.city.trim(), input.state.trim(), input.zip())
            })
            .filter(|candidate| seen.insert(candidate.clone()))
            .map(AddressCandidate)
            .collect()
    }

    /// The unmodified address only, for callers that disable fuzzy matching.
    pub fn original(&self, input: &AddressInput) -> Vec<AddressCandidate> {
        vec![AddressCandidate(input.one_line())]
    }

    /// Lower-cases the street and spells out known abbreviations, keeping any
    /// trailing comma on the token.
    pub fn expand_abbreviations(&self, street: &str) -> String {
        street
            .split_whitespace()
            .map(|token| {
                let core = token.trim_end_matches(['.', ',']);
                let trailing_comma = if token.ends_with(',') { "," } else { "" };
                let lowered = core.to_lowercase();
                match self.abbreviations.get(lowered.as_str()) {
                    Some(full) => format!("{full}{trailing_comma}"),
                    None => token.to_lowercase(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn strip_unit(street: &str) -> String {
    UNIT_DESIGNATOR
        .replace(street, "")
        .trim_end_matches(|c: char| c == ',' || c.is_whitespace())
        .to_string()
}

fn strip_punctuation(street: &str) -> String {
    let without = NON_WORD.replace_all(street, "");
    WHITESPACE.replace_all(&without, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(street: &str, zip: Option<&str>) -> AddressInput {
        AddressInput::new(street, "New Rochelle", "NY", zip.map(str::to_string))
    }

    #[test]
    fn first_candidate_is_original_one_line() {
        let generator = AddressVariationGenerator::default();
        let address = AddressInput::new("  25 Drake Ave ", " New Rochelle", "NY ", Some("10805".into()));
        let candidates = generator.generate(&address);
        assert_eq!(candidates[0].as_str(), "25 Drake Ave, New Rochelle, NY 10805");
        assert_eq!(candidates[0].as_str(), address.one_line());
    }

    #[test]
    fn variations_follow_policy_order() {
        let generator = AddressVariationGenerator::default();
        let candidates = generator.generate(&input("12 N. Main St. Apt 4B", Some("10801")));
        let values: Vec<&str> = candidates.iter().map(AddressCandidate::as_str).collect();
        assert_eq!(
            values,
            vec![
                "12 N. Main St. Apt 4B, New Rochelle, NY 10801",
                "12 north main street apt 4b, New Rochelle, NY 10801",
                "12 N. Main St., New Rochelle, NY 10801",
                "12 N Main St Apt 4B, New Rochelle, NY 10801",
            ]
        );
    }

    #[test]
    fn duplicate_variations_are_dropped() {
        let generator = AddressVariationGenerator::default();
        let candidates = generator.generate(&input("25 drake avenue", None));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].as_str(), "25 drake avenue, New Rochelle, NY");
    }

    #[test]
    fn candidates_are_unique_and_non_empty_for_assorted_inputs() {
        let generator = AddressVariationGenerator::default();
        for street in [
            "1600 Pennsylvania Ave NW",
            "350 5th Ave #3400",
            "1 Infinite Loop, Suite 100",
            "742 Evergreen Terrace",
            "10 Downing St.",
        ] {
            let candidates = generator.generate(&input(street, Some("10805")));
            assert!(!candidates.is_empty());
            let unique: HashSet<_> = candidates.iter().collect();
            assert_eq!(unique.len(), candidates.len(), "duplicates for {street}");
            assert_eq!(candidates[0].as_str(), input(street, Some("10805")).one_line());
        }
    }

    #[test]
    fn hash_designator_is_stripped() {
        assert_eq!(strip_unit("350 5th Ave #3400"), "350 5th Ave");
        assert_eq!(strip_unit("1 Infinite Loop, Suite 100"), "1 Infinite Loop");
        assert_eq!(strip_unit("742 Evergreen Terrace"), "742 Evergreen Terrace");
    }

    #[test]
    fn original_only_skips_variations() {
        let generator = AddressVariationGenerator::default();
        let candidates = generator.original(&input("12 N. Main St. Apt 4B", None));
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn parse_line_handles_two_and_three_part_addresses() {
        let two = AddressInput::parse_line("\"25 Drake Ave, New Rochelle NY 10805\"")
            .expect("two-part parses");
        assert_eq!(two, input("25 Drake Ave", Some("10805")));

        let three = AddressInput::parse_line("25 Drake Ave, New Rochelle, New York 10805-1234")
            .expect("three-part parses");
        assert_eq!(three.city, "New Rochelle");
        assert_eq!(three.state, "New York");
        assert_eq!(three.zip.as_deref(), Some("10805-1234"));

        let no_zip = AddressInput::parse_line("25 Drake Ave, New Rochelle NY, United States")
            .expect("country suffix stripped");
        assert_eq!(no_zip, input("25 Drake Ave", None));
    }

    #[test]
    fn parse_line_reports_format_errors() {
        assert_eq!(
            AddressInput::parse_line("25 Drake Ave New Rochelle"),
            Err(AddressParseError::InvalidFormat)
        );
        assert_eq!(
            AddressInput::parse_line("25 Drake Ave, NY"),
            Err(AddressParseError::MissingCityState)
        );
    }

    #[test]
    fn validate_flags_blank_fields() {
        let blank = AddressInput::new("  ", "Albany", "NY", None);
        assert_eq!(blank.validate(), Err(AddressParseError::MissingField("street")));
        assert!(input("1 Main St", None).validate().is_ok());
    }
}
