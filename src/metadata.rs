//! Filename-derived metadata, controlled vocabularies and text quality checks.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Sector vocabulary used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sector {
    /// Extractive industries.
    Minerals,
    /// Power and energy infrastructure.
    Energy,
    /// Agriculture and food security.
    Agriculture,
    /// Project finance and investment.
    Investment,
    /// Anything else.
    General,
}

impl Sector {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minerals => "minerals",
            Self::Energy => "energy",
            Self::Agriculture => "agriculture",
            Self::Investment => "investment",
            Self::General => "general",
        }
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sector {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "minerals" => Ok(Self::Minerals),
            "energy" => Ok(Self::Energy),
            "agriculture" => Ok(Self::Agriculture),
            "investment" => Ok(Self::Investment),
            "general" => Ok(Self::General),
            other => anyhow::bail!(
                "unknown sector '{other}'; expected minerals, energy, agriculture, investment or general"
            ),
        }
    }
}

/// Document type vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    /// Treaties, agreements and conventions.
    Treaty,
    /// Policies, strategies and frameworks.
    Policy,
    /// Feasibility studies and analyses.
    Study,
}

impl DocumentType {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Treaty => "treaty",
            Self::Policy => "policy",
            Self::Study => "study",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "treaty" => Ok(Self::Treaty),
            "policy" => Ok(Self::Policy),
            "study" => Ok(Self::Study),
            other => anyhow::bail!("unknown document type '{other}'; expected treaty, policy or study"),
        }
    }
}

/// Metadata inferred from a file name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilenameMetadata {
    /// Inferred document type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_type: Option<DocumentType>,
    /// Inferred sector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector: Option<Sector>,
    /// `YYYY-MM-DD` or `YYYY` found in the name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

struct FilenamePatterns {
    treaty: Regex,
    policy: Regex,
    study: Regex,
    minerals: Regex,
    energy: Regex,
    agriculture: Regex,
    full_date: Regex,
    year: Regex,
}

fn patterns() -> &'static FilenamePatterns {
    static PATTERNS: OnceLock<FilenamePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| FilenamePatterns {
        treaty: Regex::new(r"(?i)treaty|agreement|convention").expect("treaty pattern"),
        policy: Regex::new(r"(?i)policy|strategy|framework").expect("policy pattern"),
        study: Regex::new(r"(?i)feasibility|study|analysis").expect("study pattern"),
        minerals: Regex::new(r"(?i)mineral|mining|extractive").expect("minerals pattern"),
        energy: Regex::new(r"(?i)energy|power|electricity|renewable").expect("energy pattern"),
        agriculture: Regex::new(r"(?i)agriculture|agri|farming").expect("agriculture pattern"),
        full_date: Regex::new(r"\d{4}-\d{2}-\d{2}").expect("date pattern"),
        year: Regex::new(r"\d{4}").expect("year pattern"),
    })
}

/// Infers document type, sector and date from a file name.
pub fn extract_metadata_from_filename(filename: &str) -> FilenameMetadata {
    let p = patterns();
    let document_type = if p.treaty.is_match(filename) {
        Some(DocumentType::Treaty)
    } else if p.policy.is_match(filename) {
        Some(DocumentType::Policy)
    } else if p.study.is_match(filename) {
        Some(DocumentType::Study)
    } else {
        None
    };

    let sector = if p.minerals.is_match(filename) {
        Some(Sector::Minerals)
    } else if p.energy.is_match(filename) {
        Some(Sector::Energy)
    } else if p.agriculture.is_match(filename) {
        Some(Sector::Agriculture)
    } else {
        None
    };

    let date = p
        .full_date
        .find(filename)
        .or_else(|| p.year.find(filename))
        .map(|m| m.as_str().to_string());

    FilenameMetadata {
        document_type,
        sector,
        date,
    }
}

/// Outcome of [`validate_text_quality`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    /// True when no issue was found.
    pub valid: bool,
    /// Human-readable problems.
    pub issues: Vec<String>,
    /// Length in characters.
    pub length: usize,
    /// Share of alphanumeric characters (0.0 for empty text).
    pub alphanumeric_ratio: f64,
}

/// Heuristic quality gate for extracted text.
pub fn validate_text_quality(text: &str, min_length: usize, max_length: usize) -> QualityReport {
    let mut issues = Vec::new();
    let length = text.chars().count();

    if length < min_length {
        issues.push(format!("Text too short: {length} < {min_length}"));
    }
    if length > max_length {
        issues.push(format!("Text too long: {length} > {max_length}"));
    }

    let trimmed_len = text.trim().chars().count();
    if (trimmed_len as f64) < length as f64 * 0.5 {
        issues.push("Text contains excessive whitespace".to_string());
    }

    let alphanumeric_ratio = if length == 0 {
        0.0
    } else {
        text.chars().filter(|ch| ch.is_alphanumeric()).count() as f64 / length as f64
    };
    if alphanumeric_ratio < 0.5 {
        issues.push(format!(
            "Low alphanumeric content: {:.2}%",
            alphanumeric_ratio * 100.0
        ));
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > 10 {
        let unique: HashSet<&str> = words.iter().copied().collect();
        let unique_ratio = unique.len() as f64 / words.len() as f64;
        if unique_ratio < 0.3 {
            issues.push(format!(
                "High word repetition: {:.2}% unique",
                unique_ratio * 100.0
            ));
        }
    }

    QualityReport {
        valid: issues.is_empty(),
        issues,
        length,
        alphanumeric_ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_type_sector_and_full_date() {
        let meta = extract_metadata_from_filename("Regional_Mining_Policy_2023-05-17.pdf");
        assert_eq!(meta.document_type, Some(DocumentType::Policy));
        assert_eq!(meta.sector, Some(Sector::Minerals));
        assert_eq!(meta.date.as_deref(), Some("2023-05-17"));
    }

    #[test]
    fn first_matching_rule_wins() {
        // "agreement" outranks "strategy"; "power" outranks "farming".
        let meta = extract_metadata_from_filename("power_agreement_strategy_farming.docx");
        assert_eq!(meta.document_type, Some(DocumentType::Treaty));
        assert_eq!(meta.sector, Some(Sector::Energy));
    }

    #[test]
    fn falls_back_to_year_and_handles_unknowns() {
        let meta = extract_metadata_from_filename("vision2050.txt");
        assert_eq!(meta.date.as_deref(), Some("2050"));
        assert_eq!(meta.document_type, None);
        assert_eq!(meta.sector, None);

        let none = extract_metadata_from_filename("notes.md");
        assert_eq!(none, FilenameMetadata::default());
    }

    #[test]
    fn vocabulary_parsing_is_case_insensitive() {
        assert_eq!("Energy".parse::<Sector>().unwrap(), Sector::Energy);
        assert_eq!(" POLICY ".parse::<DocumentType>().unwrap(), DocumentType::Policy);
        assert!("fisheries".parse::<Sector>().is_err());
        assert!("memo".parse::<DocumentType>().is_err());
    }

    #[test]
    fn quality_report_flags_short_and_repetitive_text() {
        let report = validate_text_quality("ok", 100, 10_000);
        assert!(!report.valid);
        assert!(report.issues[0].starts_with("Text too short"));

        let repetitive = "spam ".repeat(40);
        let report = validate_text_quality(&repetitive, 10, 10_000);
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.starts_with("High word repetition")));
    }

    #[test]
    fn quality_report_accepts_prose() {
        let text = "The regional energy strategy expands cross-border transmission capacity \
                    and prioritises solar generation across member states, with financing \
                    drawn from development banks and private investors alike.";
        let report = validate_text_quality(text, 100, 10_000);
        assert!(report.valid, "unexpected issues: {:?}", report.issues);
        assert!(report.alphanumeric_ratio > 0.5);
    }
}
