//! Turns the free-text answer of the vision model into an [`AnalysisResult`].
//!
//! The model is prompted to answer four numbered topics. Each topic in the answer is introduced
//! by its heading phrase and ends at the next blank line (or at the end of the text):
//!
//! ```text
//! Plant name
//! Aloe Vera
//!
//! Suitable planting locations
//! Indoor, bright indirect light
//! ```
//!
//! Lookup is independent per section and case-insensitive. Anything written on the heading's own
//! line is skipped. A section that cannot be found, or whose body is blank, becomes
//! [`NOT_AVAILABLE`]. Parsing never fails.
//!
//! Sections are only delimited by blank lines. When the model runs two sections together without
//! one, the first section's body also contains the second heading and its content.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Placeholder stored for a section that could not be extracted.
pub const NOT_AVAILABLE: &str = "Information not available";

/// The four topics the model is asked about, in prompt order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Name,
    Locations,
    Benefits,
    CareTips,
}

impl Section {
    pub const ALL: [Section; 4] = [Section::Name, Section::Locations, Section::Benefits, Section::CareTips];

    /// Heading phrase that introduces this section in the model output.
    pub const fn label(self) -> &'static str {
        match self {
            Section::Name => "Plant name",
            Section::Locations => "Suitable planting locations",
            Section::Benefits => "Benefits of keeping this plant",
            Section::CareTips => "Any important advisory or care tips",
        }
    }

    /// Key of this section in [`AnalysisResult`]'s serialized form.
    pub const fn field(self) -> &'static str {
        match self {
            Section::Name => "name",
            Section::Locations => "locations",
            Section::Benefits => "benefits",
            Section::CareTips => "care_tips",
        }
    }

    fn pattern(self) -> &'static Regex {
        let index = match self {
            Section::Name => 0,
            Section::Locations => 1,
            Section::Benefits => 2,
            Section::CareTips => 3,
        };
        &PATTERNS[index]
    }
}

// label, rest of the label's line, then the body up to the first blank line or end of text
static PATTERNS: Lazy<[Regex; 4]> = Lazy::new(|| Section::ALL.map(|section| build_pattern(section.label())));

fn build_pattern(label: &str) -> Regex {
    let source = format!(r"(?is){}[^\n]*(.*?)(?:\n\n|\z)", regex::escape(label));
    Regex::new(&source).expect("Failed to compile section pattern")
}

/// Structured plant information extracted from one model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AnalysisResult {
    /// Common or botanical name of the plant
    pub name: String,
    /// Where the plant does well (house garden, indoors, ...)
    pub locations: String,
    /// Why the plant is worth keeping
    pub benefits: String,
    /// Advisory and care tips
    pub care_tips: String,
}

impl AnalysisResult {
    pub fn get(&self, section: Section) -> &str {
        match section {
            Section::Name => &self.name,
            Section::Locations => &self.locations,
            Section::Benefits => &self.benefits,
            Section::CareTips => &self.care_tips,
        }
    }

    /// Number of sections that hold extracted text rather than the placeholder.
    pub fn found_sections(&self) -> usize {
        Section::ALL.iter().filter(|s| self.get(**s) != NOT_AVAILABLE).count()
    }
}

/// Extract the four sections from a raw model response.
pub fn parse(raw: &str) -> AnalysisResult {
    AnalysisResult {
        name: extract(raw, Section::Name),
        locations: extract(raw, Section::Locations),
        benefits: extract(raw, Section::Benefits),
        care_tips: extract(raw, Section::CareTips),
    }
}

fn extract(raw: &str, section: Section) -> String {
    section
        .pattern()
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str().trim())
        .filter(|body| !body.is_empty())
        .unwrap_or(NOT_AVAILABLE)
        .to_string()
}
