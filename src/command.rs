//! Categories, gate commands and label normalization.
//!
//! The gate firmware understands single ASCII digits on the serial line:
//!
//! | byte  | meaning                            |
//! |-------|------------------------------------|
//! | `'0'` | close all gates                    |
//! | `'1'` | open gate 1 (Flammable)            |
//! | `'2'` | open gate 2 (Cold storage)         |
//! | `'3'` | open gate 3 (Corrosive)            |
//! | `'4'` | open gate 4 (Other chemicals)      |
//!
//! No acknowledgement is read back. `0x00` is ignored by the firmware and
//! is used as the liveness probe.

use crate::error::SortgateError;
use std::fmt;
use std::str::FromStr;

/// Byte written to check that an open handle still reaches the device.
pub const PROBE_BYTE: u8 = 0x00;

/// Characters stripped from the end of a classifier label.
const TRAILING_PUNCTUATION: [char; 6] = ['.', ',', ':', ';', '!', '?'];

/// Label the classifier returns when nothing actionable was seen.
pub const NONE_LABEL: &str = "None";

/// The four sorting bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Category {
    /// Gate 1
    Flammable,
    /// Gate 2
    ColdStorage,
    /// Gate 3
    Corrosive,
    /// Gate 4
    OtherChemicals,
}

impl Category {
    /// All categories in gate order.
    pub const ALL: [Category; 4] = [
        Category::Flammable,
        Category::ColdStorage,
        Category::Corrosive,
        Category::OtherChemicals,
    ];

    /// The label the classifier is prompted to answer with.
    pub fn label(self) -> &'static str {
        match self {
            Category::Flammable => "Flammable",
            Category::ColdStorage => "Cold storage",
            Category::Corrosive => "Corrosive",
            Category::OtherChemicals => "Other chemicals",
        }
    }

    /// Physical gate number (1-based).
    pub fn gate(self) -> u8 {
        match self {
            Category::Flammable => 1,
            Category::ColdStorage => 2,
            Category::Corrosive => 3,
            Category::OtherChemicals => 4,
        }
    }

    /// Map a label to a category.
    ///
    /// The label is normalized first; matching ignores ASCII case. Anything
    /// outside the table, including `"None"`, yields `None`.
    pub fn from_label(raw: &str) -> Option<Self> {
        let label = normalize_label(raw);
        Self::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = SortgateError;

    /// Accepts the classifier labels plus the short CLI spellings
    /// (`flammable`, `cold-storage`, `corrosive`, `other`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(category) = Category::from_label(s) {
            return Ok(category);
        }
        match normalize_label(s).to_ascii_lowercase().as_str() {
            "cold-storage" | "coldstorage" | "cold_storage" | "cold" => Ok(Category::ColdStorage),
            "other" | "others" | "other-chemicals" | "other_chemicals" => {
                Ok(Category::OtherChemicals)
            }
            _ => Err(SortgateError::UnknownCategory(s.to_string())),
        }
    }
}

/// A single actuation command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Open the gate for a category
    OpenGate(Category),
    /// Close every gate
    CloseAll,
}

impl Command {
    /// Wire encoding.
    pub fn to_byte(self) -> u8 {
        match self {
            Command::OpenGate(category) => b'0' + category.gate(),
            Command::CloseAll => b'0',
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::OpenGate(category) => {
                write!(f, "open gate {} ({})", category.gate(), category)
            }
            Command::CloseAll => f.write_str("close all gates"),
        }
    }
}

/// Strip surrounding whitespace and trailing `.,:;!?`.
///
/// Whitespace and punctuation are stripped together until neither remains,
/// so normalizing twice is the same as normalizing once.
pub fn normalize_label(raw: &str) -> &str {
    raw.trim_start()
        .trim_end_matches(|c: char| c.is_whitespace() || TRAILING_PUNCTUATION.contains(&c))
}

/// Whether a (raw or normalized) label means "no actionable classification".
pub fn is_none_label(raw: &str) -> bool {
    let label = normalize_label(raw);
    label.is_empty() || label.eq_ignore_ascii_case(NONE_LABEL)
}
