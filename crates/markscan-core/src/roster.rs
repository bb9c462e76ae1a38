//! Class roster: loading, student matching and mark filling.
//!
//! A roster is any delimited text file with a student-ID column. Marks are
//! written back into a copy named `<stem>_with_marks.<ext>`; the original file
//! is never modified.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::matcher::{match_all, normalize_id, MatchOutcome};
use crate::report::{ResultRow, RosterMatch};

/// How to read the roster and write marks into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterConfig {
    /// Column holding the student ID.
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// Column holding the student name, if any.
    #[serde(default)]
    pub name_column: Option<String>,
    /// Column that receives the mark (created if missing).
    #[serde(default = "default_mark_column")]
    pub mark_column: String,
    /// `comma`, `semi`, `tab`, `pipe`, or a literal single character.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// `utf-8` or `latin-1`.
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// Decimal separator used when writing marks.
    #[serde(default = "default_decimal")]
    pub decimal_separator: String,
    /// Write only ID, name and mark columns.
    #[serde(default)]
    pub simplify: bool,
}

fn default_id_column() -> String {
    "id".to_string()
}
fn default_mark_column() -> String {
    "mark".to_string()
}
fn default_delimiter() -> String {
    "comma".to_string()
}
fn default_encoding() -> String {
    "utf-8".to_string()
}
fn default_decimal() -> String {
    ".".to_string()
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            id_column: default_id_column(),
            name_column: None,
            mark_column: default_mark_column(),
            delimiter: default_delimiter(),
            encoding: default_encoding(),
            decimal_separator: default_decimal(),
            simplify: false,
        }
    }
}

/// Parse a delimiter name or literal.
pub fn parse_delimiter(s: &str) -> Result<u8> {
    match s {
        "comma" | "," => Ok(b','),
        "semi" | "semicolon" | ";" => Ok(b';'),
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        "pipe" | "|" => Ok(b'|'),
        other if other.len() == 1 && other.is_ascii() => Ok(other.as_bytes()[0]),
        other => anyhow::bail!("unsupported delimiter '{other}' (use comma, semi, tab, pipe or one character)"),
    }
}

/// Text encodings supported for roster files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextEncoding::Utf8 => write!(f, "utf-8"),
            TextEncoding::Latin1 => write!(f, "latin-1"),
        }
    }
}

impl FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" | "iso8859-1" => Ok(TextEncoding::Latin1),
            other => Err(format!("unsupported encoding: {other}")),
        }
    }
}

/// Decode roster bytes. A UTF-8 byte-order mark is dropped.
pub fn decode_text(bytes: &[u8], encoding: TextEncoding) -> Result<String> {
    match encoding {
        TextEncoding::Utf8 => {
            let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
            String::from_utf8(bytes.to_vec()).context("roster is not valid UTF-8 (try --input-encoding latin-1)")
        }
        TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
    }
}

/// Encode text for writing. Characters outside Latin-1 become `?`.
pub fn encode_text(text: &str, encoding: TextEncoding) -> Vec<u8> {
    match encoding {
        TextEncoding::Utf8 => text.as_bytes().to_vec(),
        TextEncoding::Latin1 => text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect(),
    }
}

/// Two-decimal number with the given decimal separator.
pub fn format_decimal(value: f64, separator: &str) -> String {
    let s = format!("{value:.2}");
    if separator == "." {
        s
    } else {
        s.replace('.', separator)
    }
}

/// A loaded roster.
#[derive(Debug, Clone)]
pub struct Roster {
    pub path: PathBuf,
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
    id_index: usize,
    name_index: Option<usize>,
    delimiter: u8,
    encoding: TextEncoding,
}

impl Roster {
    /// Load a roster file.
    pub fn load(path: &Path, config: &RosterConfig) -> Result<Roster> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read roster: {}", path.display()))?;
        let encoding: TextEncoding = config.encoding.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        let text = decode_text(&bytes, encoding)
            .with_context(|| format!("failed to decode roster: {}", path.display()))?;
        let delimiter = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
            _ => parse_delimiter(&config.delimiter)?,
        };
        Self::parse(&text, path, delimiter, encoding, config)
            .with_context(|| format!("failed to parse roster: {}", path.display()))
    }

    /// Parse decoded roster text.
    pub fn parse(
        text: &str,
        path: &Path,
        delimiter: u8,
        encoding: TextEncoding,
        config: &RosterConfig,
    ) -> Result<Roster> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(text.as_bytes());
        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();

        let find = |name: &str| headers.iter().position(|h| h == name.trim());
        let id_index = find(&config.id_column).with_context(|| {
            format!(
                "ID column '{}' not found (columns: {})",
                config.id_column,
                headers.join(", ")
            )
        })?;
        let name_index = match &config.name_column {
            Some(name) => Some(find(name).with_context(|| format!("name column '{name}' not found"))?),
            None => None,
        };

        let mut records = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let mut fields: Vec<String> = record.iter().map(str::to_string).collect();
            fields.resize(headers.len().max(fields.len()), String::new());
            records.push(fields);
        }

        Ok(Roster {
            path: path.to_path_buf(),
            headers,
            records,
            id_index,
            name_index,
            delimiter,
            encoding,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Student IDs in roster order.
    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r[self.id_index].clone()).collect()
    }

    pub fn id(&self, index: usize) -> Option<&str> {
        self.records.get(index).map(|r| r[self.id_index].trim())
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        let col = self.name_index?;
        self.records.get(index).map(|r| r[col].trim())
    }

    /// File name of the filled copy: `<stem>_with_marks.<ext>`.
    pub fn output_file_name(&self) -> String {
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("roster");
        match self.path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{stem}_with_marks.{ext}"),
            None => format!("{stem}_with_marks.csv"),
        }
    }

    /// Write the roster with marks filled into `out_dir`.
    ///
    /// Roster rows without a matched scan get an empty mark.
    pub fn write_with_marks(
        &self,
        rows: &[ResultRow],
        config: &RosterConfig,
        out_dir: &Path,
    ) -> Result<PathBuf> {
        let marks: HashMap<String, f64> = rows
            .iter()
            .filter(|r| r.is_matched())
            .filter_map(|r| {
                let id = r.matched.as_ref()?.id.as_deref()?;
                Some((normalize_id(id), r.mark.as_ref()?.mark))
            })
            .collect();
        let mark_for = |record: &[String]| {
            marks
                .get(&normalize_id(&record[self.id_index]))
                .map(|m| format_decimal(*m, &config.decimal_separator))
                .unwrap_or_default()
        };

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(Vec::new());

        if config.simplify {
            let mark_header = config.mark_column.trim_start_matches('#').trim().to_string();
            let mut header = vec![self.headers[self.id_index].clone()];
            if let Some(n) = self.name_index {
                header.push(self.headers[n].clone());
            }
            header.push(mark_header);
            wtr.write_record(&header)?;
            for record in &self.records {
                let mut out = vec![record[self.id_index].clone()];
                if let Some(n) = self.name_index {
                    out.push(record[n].clone());
                }
                out.push(mark_for(&record[..]));
                wtr.write_record(&out)?;
            }
        } else {
            let mut header = self.headers.clone();
            let mark_index = match header.iter().position(|h| *h == config.mark_column) {
                Some(i) => i,
                None => {
                    header.push(config.mark_column.clone());
                    header.len() - 1
                }
            };
            wtr.write_record(&header)?;
            for record in &self.records {
                let mut out = record.clone();
                out.resize(header.len(), String::new());
                out[mark_index] = mark_for(&record[..]);
                wtr.write_record(&out)?;
            }
        }

        let buffer = wtr.into_inner().map_err(|e| anyhow::anyhow!("{e}"))?;
        let text = String::from_utf8(buffer).context("roster output is not UTF-8")?;

        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create {}", out_dir.display()))?;
        let out_path = out_dir.join(self.output_file_name());
        std::fs::write(&out_path, encode_text(&text, self.encoding))
            .with_context(|| format!("failed to write {}", out_path.display()))?;
        Ok(out_path)
    }
}

/// Counts from reconciling scans with a roster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSummary {
    pub matched: usize,
    pub unmatched_scans: usize,
    pub unmatched_roster: usize,
}

/// Match every readable row against the roster and record the outcome.
///
/// Unreadable rows are left without a match. Unmatched scans and roster rows
/// are logged, never dropped.
pub fn apply_matches(rows: &mut [ResultRow], roster: &Roster, threshold: f64) -> MatchSummary {
    let roster_ids = roster.ids();
    let readable: Vec<usize> = (0..rows.len()).filter(|&i| rows[i].raw.is_readable()).collect();
    let recognized: Vec<String> = readable.iter().map(|&i| rows[i].raw.student_id.clone()).collect();
    let outcomes = match_all(&recognized, &roster_ids, threshold);

    let mut summary = MatchSummary::default();
    let mut claimed = vec![false; roster.len()];
    for row in rows.iter_mut() {
        row.matched = None;
    }

    for (&i, outcome) in readable.iter().zip(outcomes) {
        let row = &mut rows[i];
        let (id, name) = match outcome.index() {
            Some(index) => {
                claimed[index] = true;
                summary.matched += 1;
                (
                    roster.id(index).map(str::to_string),
                    roster.name(index).map(str::to_string),
                )
            }
            None => {
                summary.unmatched_scans += 1;
                tracing::warn!(
                    "scan {} (id '{}') not matched: {} (best similarity {:.1})",
                    row.raw.scan,
                    row.raw.student_id,
                    outcome.status(),
                    outcome.similarity()
                );
                (None, None)
            }
        };
        if let MatchOutcome::Fuzzy { similarity, .. } = outcome {
            tracing::info!(
                "scan {}: '{}' fuzzy-matched to '{}' ({similarity:.1})",
                row.raw.scan,
                row.raw.student_id,
                id.as_deref().unwrap_or_default()
            );
        }
        row.matched = Some(RosterMatch {
            status: outcome.status(),
            id,
            name,
            similarity: outcome.similarity(),
        });
    }

    for (index, taken) in claimed.iter().enumerate() {
        if !taken {
            summary.unmatched_roster += 1;
            tracing::warn!(
                "roster student '{}' has no matching scan",
                roster.id(index).unwrap_or_default()
            );
        }
    }

    summary
}
