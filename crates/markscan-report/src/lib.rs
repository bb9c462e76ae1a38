//! markscan-report: output files of a correction run.
//!
//! Writes the re-ingestible results table, the per-student final marks, the
//! JSON report and a self-contained HTML report.

pub mod export;
pub mod html;

pub use export::{parse_formats, write_final_marks, Exporter};
pub use html::{generate_html, write_html_report};

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;

    use markscan_core::config::ScoringConfig;
    use markscan_core::matcher::MatchStatus;
    use markscan_core::model::{ExamBundle, ExamModel, KeyEntry, Layout, SheetSpec, SolutionKey};
    use markscan_core::report::{CorrectionReport, ResultRow, RosterMatch};
    use markscan_core::results::{Answer, Mark, RawResult, ScanStatus};

    fn exam() -> ExamBundle {
        let layout = Layout::standard("1", &SheetSpec::uniform(4, 4, &["1"])).unwrap();
        let key = SolutionKey {
            model: "1".into(),
            questions: (1..=4)
                .map(|n| KeyEntry {
                    number: n,
                    original_id: Some(n),
                    correct: 0,
                    weight: 2.5,
                    options: Some(4),
                })
                .collect(),
        };
        let mut models = BTreeMap::new();
        models.insert("1".to_string(), ExamModel { layout, key });
        ExamBundle { models }
    }

    fn scored(scan: &str, id: &str, answers: &[Answer], score: f64) -> ResultRow {
        let mut raw = RawResult::unreadable(scan, "");
        raw.status = ScanStatus::Ok;
        raw.student_id = id.into();
        raw.id_confidence = 0.9;
        raw.model = Some("1".into());
        raw.answers = answers
            .iter()
            .enumerate()
            .map(|(i, a)| (i as u32 + 1, *a))
            .collect();
        ResultRow {
            raw,
            mark: Some(Mark {
                correct: 2,
                wrong: 1,
                blank: 1,
                ambiguous: 0,
                score,
                max_score: 10.0,
                mark: score,
                nicely_voided: vec![],
            }),
            matched: None,
        }
    }

    /// Two scored rows (one matched to the roster) and one unreadable scan.
    pub fn sample_report() -> CorrectionReport {
        let mut jane = scored(
            "scan_01.png",
            "a100",
            &[Answer::Option(0), Answer::Blank, Answer::Ambiguous, Answer::Option(1)],
            5.5,
        );
        jane.matched = Some(RosterMatch {
            status: MatchStatus::Exact,
            id: Some("A100".into()),
            name: Some("Doe, Jane".into()),
            similarity: 100.0,
        });
        let other = scored(
            "scan_02.png",
            "B200",
            &[Answer::Option(0), Answer::Option(0), Answer::Option(0), Answer::Option(2)],
            7.5,
        );
        let lost = ResultRow::new(RawResult::unreadable(
            "scan_03.png",
            "too few markers & noise",
        ));
        CorrectionReport::new(
            vec![jane, other, lost],
            &exam(),
            &ScoringConfig::default(),
            12,
        )
    }
}
