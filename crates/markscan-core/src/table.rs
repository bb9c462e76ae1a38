//! The results table (`correction_results.csv`).
//!
//! One row per scan with the raw reading, the mark and the roster match. The
//! same schema is written by `correct` and `rescore`, and the raw columns can be
//! read back (after manual edits) to rescore without touching the images.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::report::ResultRow;
use crate::results::{Answer, RawResult, ReadFlag, ScanStatus};

pub const RESULTS_FILE: &str = "correction_results.csv";

const LEADING: [&str; 5] = ["scan", "status", "student_id", "id_confidence", "model"];
const TRAILING: [&str; 11] = [
    "correct",
    "wrong",
    "blank",
    "ambiguous",
    "score",
    "max_score",
    "mark",
    "match",
    "matched_id",
    "matched_name",
    "flags",
];

/// Column names for a table with `questions` answer columns.
pub fn header(questions: usize) -> Vec<String> {
    LEADING
        .iter()
        .map(|s| s.to_string())
        .chain((1..=questions).map(|q| format!("answer_{q}")))
        .chain(TRAILING.iter().map(|s| s.to_string()))
        .collect()
}

fn fmt_num(v: f64) -> String {
    format!("{v:.3}")
}

fn join<T: ToString>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(";")
}

/// Write rows as CSV to any writer.
pub fn write_table<W: Write>(writer: W, rows: &[ResultRow], questions: usize) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(header(questions))?;

    for row in rows {
        let raw = &row.raw;
        let mut record: Vec<String> = vec![
            raw.scan.clone(),
            raw.status.to_string(),
            raw.student_id.clone(),
            fmt_num(raw.id_confidence),
            raw.model.clone().unwrap_or_default(),
        ];
        for q in 1..=questions as u32 {
            record.push(if raw.is_readable() {
                raw.answer(q).to_string()
            } else {
                String::new()
            });
        }
        match &row.mark {
            Some(m) => record.extend([
                m.correct.to_string(),
                m.wrong.to_string(),
                m.blank.to_string(),
                m.ambiguous.to_string(),
                fmt_num(m.score),
                fmt_num(m.max_score),
                fmt_num(m.mark),
            ]),
            None => record.extend(std::iter::repeat(String::new()).take(7)),
        }
        match &row.matched {
            Some(m) => record.extend([
                m.status.to_string(),
                m.id.clone().unwrap_or_default(),
                m.name.clone().unwrap_or_default(),
            ]),
            None => record.extend([String::new(), String::new(), String::new()]),
        }
        record.push(join(&raw.flags));
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Write `correction_results.csv` to a file.
pub fn write_results_table(path: &Path, rows: &[ResultRow], questions: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    write_table(file, rows, questions)
        .with_context(|| format!("failed to write results table {}", path.display()))
}

/// Read the raw columns of a results table.
///
/// Score and match columns are ignored: they are recomputed on rescore.
pub fn read_table<R: Read>(reader: R) -> Result<Vec<RawResult>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers().context("results table has no header")?.clone();

    let column = |name: &str| headers.iter().position(|h| h.trim() == name);
    let scan_col = column("scan").context("results table has no 'scan' column")?;
    let status_col = column("status");
    let id_col = column("student_id");
    let conf_col = column("id_confidence");
    let model_col = column("model");
    let flags_col = column("flags");
    let answer_cols: Vec<(u32, usize)> = headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| {
            h.trim()
                .strip_prefix("answer_")
                .and_then(|n| n.parse::<u32>().ok())
                .map(|n| (n, i))
        })
        .collect();

    let mut raws = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("malformed row {}", line + 2))?;
        let field = |col: Option<usize>| col.and_then(|c| record.get(c)).unwrap_or("").trim();
        let ctx = || format!("row {} ({})", line + 2, field(Some(scan_col)));

        let status: ScanStatus = match field(status_col) {
            "" => ScanStatus::Ok,
            s => s.parse().map_err(|e: String| anyhow::anyhow!(e)).with_context(ctx)?,
        };
        let id_confidence = match field(conf_col) {
            "" => 0.0,
            s => s
                .parse::<f64>()
                .with_context(|| format!("{}: bad id_confidence '{s}'", ctx()))?,
        };
        let model = Some(field(model_col).to_string()).filter(|m| !m.is_empty());

        let mut answers = BTreeMap::new();
        if status.is_ok() {
            for &(q, col) in &answer_cols {
                let answer: Answer = field(Some(col))
                    .parse()
                    .map_err(|e: String| anyhow::anyhow!(e))
                    .with_context(|| format!("{}: answer_{q}", ctx()))?;
                answers.insert(q, answer);
            }
        }

        let flags = field(flags_col)
            .split(';')
            .filter(|f| !f.trim().is_empty())
            .map(|f| f.parse::<ReadFlag>().map_err(|e| anyhow::anyhow!(e)))
            .collect::<Result<Vec<_>>>()
            .with_context(ctx)?;

        raws.push(RawResult {
            scan: field(Some(scan_col)).to_string(),
            status,
            student_id: field(id_col).to_string(),
            id_confidence,
            id_char_confidence: Vec::new(),
            model,
            answers,
            answer_confidence: BTreeMap::new(),
            flags,
        });
    }
    Ok(raws)
}

/// Read `correction_results.csv` from a file.
pub fn read_results_table(path: &Path) -> Result<Vec<RawResult>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open results table {}", path.display()))?;
    read_table(file).with_context(|| format!("failed to read results table {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatchStatus;
    use crate::report::RosterMatch;
    use crate::results::Mark;

    fn sample_rows() -> Vec<ResultRow> {
        let mut raw = RawResult::unreadable("scan_01.png", "");
        raw.status = ScanStatus::Ok;
        raw.student_id = "12345678".into();
        raw.id_confidence = 0.91;
        raw.model = Some("2".into());
        raw.answers.insert(1, Answer::Option(0));
        raw.answers.insert(2, Answer::Blank);
        raw.answers.insert(3, Answer::Ambiguous);
        raw.flags.push(ReadFlag::ModelInferred);
        let good = ResultRow {
            raw,
            mark: Some(Mark {
                correct: 1,
                wrong: 0,
                blank: 1,
                ambiguous: 1,
                score: 1.0,
                max_score: 3.0,
                mark: 10.0 / 3.0,
                nicely_voided: vec![],
            }),
            matched: Some(RosterMatch {
                status: MatchStatus::Exact,
                id: Some("12345678".into()),
                name: Some("Doe, Jane".into()),
                similarity: 100.0,
            }),
        };
        let bad = ResultRow::new(RawResult::unreadable(
            "scan_02.png",
            "geometry: found 2 fiducial marker(s), need at least 4",
        ));
        vec![good, bad]
    }

    #[test]
    fn header_layout() {
        let h = header(2);
        assert_eq!(h[..7], ["scan", "status", "student_id", "id_confidence", "model", "answer_1", "answer_2"]);
        assert_eq!(h.last().map(String::as_str), Some("flags"));
    }

    #[test]
    fn written_table_reads_back_raw_fields() {
        let rows = sample_rows();
        let mut buf = Vec::new();
        write_table(&mut buf, &rows, 3).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.contains("scan_01.png,ok,12345678,0.910,2,A,-,?,1,0,1,1,1.000,3.000,3.333,exact,12345678,\"Doe, Jane\",model_inferred"));

        let raws = read_table(buf.as_slice()).unwrap();
        assert_eq!(raws.len(), 2);
        assert_eq!(raws[0].answers, rows[0].raw.answers);
        assert_eq!(raws[0].model.as_deref(), Some("2"));
        assert_eq!(raws[0].flags, vec![ReadFlag::ModelInferred]);
        assert_eq!(raws[1].status, rows[1].raw.status);
        assert!(raws[1].answers.is_empty());
    }

    #[test]
    fn edited_answers_are_picked_up() {
        let csv = "scan,status,student_id,model,answer_1,answer_2\n\
                   a.png,ok, 42 ,1,b,\n";
        let raws = read_table(csv.as_bytes()).unwrap();
        assert_eq!(raws[0].student_id, "42");
        assert_eq!(raws[0].answer(1), Answer::Option(1));
        assert_eq!(raws[0].answer(2), Answer::Blank);
    }

    #[test]
    fn bad_answer_code_is_reported() {
        let csv = "scan,status,answer_1\na.png,ok,AB\n";
        let err = read_table(csv.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("answer_1"));
    }

    #[test]
    fn missing_scan_column() {
        assert!(read_table("x,y\n1,2\n".as_bytes()).is_err());
    }
}
