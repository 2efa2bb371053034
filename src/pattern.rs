//! Switch pattern and alert translation into TBBOX program ids.
//!
//! Four switches give 16 combinations, written as 4 characters over
//! `{0, 1, 9}` where `9` means "state unknown". Unknown switches count as
//! off. A pattern where all switches are unknown requests no transition at
//! all.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::consts::{ALERT_LENGTH, ALERT_SUFFIX, MAX_PROGRAM_ID, PATTERN_LENGTH, SWITCH_PROGRAMS};
use crate::error::{InvalidProgramId, PatternError};

/// TBBOX program identifier, "01" - "20".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProgramId(u8);

impl ProgramId {
    pub fn new(number: u8) -> Option<Self> {
        if (1..=MAX_PROGRAM_ID).contains(&number) {
            Some(Self(number))
        } else {
            None
        }
    }

    pub fn number(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

impl FromStr for ProgramId {
    type Err = InvalidProgramId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidProgramId(s.to_string()));
        }
        s.parse::<u8>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| InvalidProgramId(s.to_string()))
    }
}

impl TryFrom<String> for ProgramId {
    type Error = InvalidProgramId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProgramId> for String {
    fn from(id: ProgramId) -> Self {
        id.to_string()
    }
}

/// State of a single switch as reported by the gate controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    Off,
    On,
    /// `9` - not defined / not reported.
    Unknown,
}

impl Switch {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Off),
            '1' => Some(Self::On),
            '9' => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Check length and alphabet of a raw pattern/alert string.
fn validate(input: &str, expected: usize) -> Result<Vec<Switch>, PatternError> {
    if input.is_empty() {
        return Err(PatternError::Missing);
    }
    let actual = input.chars().count();
    if actual != expected {
        return Err(PatternError::WrongLength { expected, actual });
    }
    input
        .chars()
        .map(|c| Switch::from_char(c).ok_or(PatternError::InvalidCharacter(c)))
        .collect()
}

/// Four switch states, SW1 first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchPattern([Switch; PATTERN_LENGTH]);

impl SwitchPattern {
    pub fn from_levels(levels: [bool; PATTERN_LENGTH]) -> Self {
        Self(levels.map(|on| if on { Switch::On } else { Switch::Off }))
    }

    /// No switch state is known.
    pub fn is_undefined(&self) -> bool {
        self.0.iter().all(|s| *s == Switch::Unknown)
    }

    /// Binary value with unknown switches read as off. SW1 is the MSB.
    pub fn canonical(&self) -> u8 {
        self.0
            .iter()
            .fold(0, |acc, s| (acc << 1) | u8::from(*s == Switch::On))
    }
}

impl FromStr for SwitchPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let switches = validate(s, PATTERN_LENGTH)?;
        let mut pattern = [Switch::Off; PATTERN_LENGTH];
        pattern.copy_from_slice(&switches);
        Ok(Self(pattern))
    }
}

/// Canonical pattern -> program id. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct MappingTable {
    entries: HashMap<u8, ProgramId>,
}

impl MappingTable {
    /// Default table: binary value of the pattern + 1.
    pub fn algorithmic() -> Self {
        let entries = (0..SWITCH_PROGRAMS)
            .filter_map(|bits| ProgramId::new(bits + 1).map(|id| (bits, id)))
            .collect();
        Self { entries }
    }

    /// Build from raw `"0101" -> "06"` pairs. Bad entries are dropped.
    pub fn from_entries(raw: HashMap<String, String>) -> Self {
        let mut entries = HashMap::with_capacity(raw.len());
        for (pattern, program) in raw {
            let bits = if pattern.len() == PATTERN_LENGTH
                && pattern.bytes().all(|b| b == b'0' || b == b'1')
            {
                u8::from_str_radix(&pattern, 2).ok()
            } else {
                None
            };
            let Some(bits) = bits else {
                warn!("Ignoring mapping entry with invalid pattern {:?}", pattern);
                continue;
            };
            match program.parse::<ProgramId>() {
                Ok(id) => {
                    entries.insert(bits, id);
                }
                Err(err) => {
                    warn!("Ignoring mapping entry {:?}: {}", pattern, err);
                }
            }
        }
        Self { entries }
    }

    /// Load the override file. Missing or broken files fall back to the
    /// algorithmic table.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Self {
        let Some(path) = path else {
            info!("No switch mapping file configured, using default mapping");
            return Self::algorithmic();
        };
        let path = path.as_ref();

        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Switch mapping file {} not found, using default mapping",
                    path.display()
                );
                return Self::algorithmic();
            }
            Err(err) => {
                error!(
                    "Unable to read switch mapping file {}: {}. Using default mapping",
                    path.display(),
                    err
                );
                return Self::algorithmic();
            }
        };

        // JSON is valid YAML, so both formats go through the same parser.
        match serde_yaml::from_str::<HashMap<String, String>>(&data) {
            Ok(raw) => {
                let table = Self::from_entries(raw);
                info!(
                    "Loaded switch mapping from {}: {} patterns",
                    path.display(),
                    table.len()
                );
                table
            }
            Err(err) => {
                error!(
                    "Unable to parse switch mapping file {}: {}. Using default mapping",
                    path.display(),
                    err
                );
                Self::algorithmic()
            }
        }
    }

    pub fn get(&self, canonical: u8) -> Option<ProgramId> {
        self.entries.get(&canonical).copied()
    }

    /// Copy of all entries.
    pub fn entries(&self) -> HashMap<u8, ProgramId> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MappingTable {
    fn default() -> Self {
        Self::algorithmic()
    }
}

/// Outcome of a successful translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    Program(ProgramId),
    /// All switches unknown - leave the device alone.
    NoOp,
}

#[derive(Debug, Clone, Default)]
pub struct PatternTranslator {
    table: MappingTable,
}

impl PatternTranslator {
    pub fn new(table: MappingTable) -> Self {
        Self { table }
    }

    /// Translate a 4 character switch pattern, eg. "1019".
    pub fn translate(&self, pattern: &str) -> Result<Translation, PatternError> {
        let pattern: SwitchPattern = pattern.parse()?;
        if pattern.is_undefined() {
            debug!("All switches undefined, no transition requested");
            return Ok(Translation::NoOp);
        }
        self.lookup(pattern.canonical()).map(Translation::Program)
    }

    /// Translate an 8 character alert. Only the leading 4 characters select
    /// the program.
    pub fn translate_alert(&self, alert: &str) -> Result<Translation, PatternError> {
        validate(alert, ALERT_LENGTH)?;

        // Validated above: ASCII only, so byte slicing is safe.
        let (pattern, suffix) = alert.split_at(PATTERN_LENGTH);
        if suffix != ALERT_SUFFIX {
            warn!("Alert suffix is {:?}, expected {:?}", suffix, ALERT_SUFFIX);
        }

        let translation = self.translate(pattern)?;
        if let Translation::Program(id) = translation {
            info!("Pattern '{}' -> program '{}'", pattern, id);
        }
        Ok(translation)
    }

    /// Translate explicit switch levels, SW1 first.
    pub fn translate_switches(&self, levels: [bool; PATTERN_LENGTH]) -> Result<ProgramId, PatternError> {
        self.lookup(SwitchPattern::from_levels(levels).canonical())
    }

    /// Copy of the active mapping.
    pub fn mapping(&self) -> HashMap<u8, ProgramId> {
        self.table.entries()
    }

    fn lookup(&self, canonical: u8) -> Result<ProgramId, PatternError> {
        if let Some(id) = self.table.get(canonical) {
            return Ok(id);
        }

        let value = u16::from(canonical) + 1;
        debug!("Pattern {:04b} not in mapping, computed program {:02}", canonical, value);
        if !(1..=u16::from(SWITCH_PROGRAMS)).contains(&value) {
            error!("Computed program id {} out of range", value);
            return Err(PatternError::OutOfRange(value));
        }
        u8::try_from(value)
            .ok()
            .and_then(ProgramId::new)
            .ok_or(PatternError::OutOfRange(value))
    }
}
