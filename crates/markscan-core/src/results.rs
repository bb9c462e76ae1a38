//! Per-scan results: what was read from a sheet, and what it scored.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{option_label, parse_option_label};

/// Classified state of one question's bubble group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Answer {
    /// Exactly one bubble clearly filled (0 → 'A').
    Option(usize),
    /// No bubble filled.
    Blank,
    /// Several bubbles filled or no clear winner. Never scored.
    Ambiguous,
}

impl Answer {
    pub fn is_answered(&self) -> bool {
        matches!(self, Answer::Option(_))
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Option(i) => write!(f, "{}", option_label(*i)),
            Answer::Blank => write!(f, "-"),
            Answer::Ambiguous => write!(f, "?"),
        }
    }
}

impl FromStr for Answer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "-" => Ok(Answer::Blank),
            "?" => Ok(Answer::Ambiguous),
            other => parse_option_label(other)
                .map(Answer::Option)
                .ok_or_else(|| format!("unknown answer code: {other}")),
        }
    }
}

/// Whether a scan could be read at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScanStatus {
    Ok,
    Unreadable { reason: String },
}

impl ScanStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ScanStatus::Ok)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStatus::Ok => write!(f, "ok"),
            ScanStatus::Unreadable { reason } => write!(f, "unreadable: {reason}"),
        }
    }
}

impl FromStr for ScanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("ok") {
            return Ok(ScanStatus::Ok);
        }
        match s.strip_prefix("unreadable") {
            Some(rest) => Ok(ScanStatus::Unreadable {
                reason: rest.trim_start_matches(':').trim().to_string(),
            }),
            None => Err(format!("unknown scan status: {s}")),
        }
    }
}

/// Soft problems attached to an otherwise readable scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadFlag {
    /// Student-ID recognition confidence below the configured floor.
    LowIdConfidence,
    /// Model row was blank; the exam's only model was assumed.
    ModelInferred,
}

impl fmt::Display for ReadFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadFlag::LowIdConfidence => write!(f, "low_id_confidence"),
            ReadFlag::ModelInferred => write!(f, "model_inferred"),
        }
    }
}

impl FromStr for ReadFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low_id_confidence" => Ok(ReadFlag::LowIdConfidence),
            "model_inferred" => Ok(ReadFlag::ModelInferred),
            other => Err(format!("unknown flag: {other}")),
        }
    }
}

/// Everything read from one scan, before scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    /// Scan name (file name of the page image).
    pub scan: String,
    pub status: ScanStatus,
    /// Recognized student ID (may be empty).
    #[serde(default)]
    pub student_id: String,
    #[serde(default)]
    pub id_confidence: f64,
    /// Per-character recognition confidences.
    #[serde(default)]
    pub id_char_confidence: Vec<f64>,
    /// Recognized exam model id.
    #[serde(default)]
    pub model: Option<String>,
    /// Question number → classified answer.
    #[serde(default)]
    pub answers: BTreeMap<u32, Answer>,
    /// Question number → classifier margin for the chosen state.
    #[serde(default)]
    pub answer_confidence: BTreeMap<u32, f64>,
    #[serde(default)]
    pub flags: Vec<ReadFlag>,
}

impl RawResult {
    /// A row for a scan that could not be read.
    pub fn unreadable(scan: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            scan: scan.into(),
            status: ScanStatus::Unreadable {
                reason: reason.into(),
            },
            student_id: String::new(),
            id_confidence: 0.0,
            id_char_confidence: Vec::new(),
            model: None,
            answers: BTreeMap::new(),
            answer_confidence: BTreeMap::new(),
            flags: Vec::new(),
        }
    }

    pub fn is_readable(&self) -> bool {
        self.status.is_ok()
    }

    pub fn answer(&self, number: u32) -> Answer {
        self.answers.get(&number).copied().unwrap_or(Answer::Blank)
    }

    pub fn add_flag(&mut self, flag: ReadFlag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
            self.flags.sort();
        }
    }
}

/// Scoring outcome of one readable scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    pub correct: usize,
    pub wrong: usize,
    pub blank: usize,
    pub ambiguous: usize,
    /// Raw score (sum of weights, minus penalties).
    pub score: f64,
    /// Achievable score after voiding.
    pub max_score: f64,
    /// Scaled mark.
    pub mark: f64,
    /// Original ids of nice-voided questions dropped for this student.
    #[serde(default)]
    pub nicely_voided: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_codes() {
        assert_eq!(Answer::Option(2).to_string(), "C");
        assert_eq!(Answer::Blank.to_string(), "-");
        assert_eq!(Answer::Ambiguous.to_string(), "?");
        assert_eq!("b".parse::<Answer>().unwrap(), Answer::Option(1));
        assert_eq!("".parse::<Answer>().unwrap(), Answer::Blank);
        assert_eq!("?".parse::<Answer>().unwrap(), Answer::Ambiguous);
        assert!("AB".parse::<Answer>().is_err());
    }

    #[test]
    fn status_parse() {
        assert_eq!("ok".parse::<ScanStatus>().unwrap(), ScanStatus::Ok);
        let s: ScanStatus = "unreadable: too few markers".parse().unwrap();
        assert_eq!(
            s,
            ScanStatus::Unreadable {
                reason: "too few markers".into()
            }
        );
        assert_eq!(s.to_string(), "unreadable: too few markers");
        assert!("maybe".parse::<ScanStatus>().is_err());
    }

    #[test]
    fn missing_answer_is_blank() {
        let raw = RawResult::unreadable("a.png", "x");
        assert_eq!(raw.answer(3), Answer::Blank);
        assert!(!raw.is_readable());
    }

    #[test]
    fn flags_are_deduplicated() {
        let mut raw = RawResult::unreadable("a.png", "x");
        raw.add_flag(ReadFlag::ModelInferred);
        raw.add_flag(ReadFlag::LowIdConfidence);
        raw.add_flag(ReadFlag::ModelInferred);
        assert_eq!(
            raw.flags,
            vec![ReadFlag::LowIdConfidence, ReadFlag::ModelInferred]
        );
    }

    #[test]
    fn raw_result_json_roundtrip() {
        let mut raw = RawResult::unreadable("s.png", "blur");
        raw.status = ScanStatus::Ok;
        raw.answers.insert(1, Answer::Option(0));
        raw.answers.insert(2, Answer::Ambiguous);
        let json = serde_json::to_string(&raw).unwrap();
        let back: RawResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, raw);
    }
}
