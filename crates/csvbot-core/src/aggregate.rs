use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use csv::{ReaderBuilder, StringRecord};

use crate::{
    classify::{channel_group, clean_phone, Category, FilenameRules},
    errors::Error,
    Result,
};

pub const PHONE_COLUMN: &str = "phone";
pub const CHANNEL_COLUMN: &str = "channel_id";

/// `"<group> (<day>).txt"`.
pub fn output_file_name(group: &str, day: i64) -> String {
    format!("{group} ({day}).txt")
}

/// Phone buckets keyed by group name, in first-insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Groups {
    buckets: Vec<(String, Vec<String>)>,
}

impl Groups {
    pub fn push(&mut self, group: &str, phone: String) {
        match self.buckets.iter_mut().find(|(g, _)| g == group) {
            Some((_, phones)) => phones.push(phone),
            None => self.buckets.push((group.to_string(), vec![phone])),
        }
    }

    pub fn extend(&mut self, group: &str, phones: impl IntoIterator<Item = String>) {
        for phone in phones {
            self.push(group, phone);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.buckets
            .iter()
            .map(|(g, phones)| (g.as_str(), phones.as_slice()))
    }

    pub fn counts(&self) -> Vec<(String, usize)> {
        self.buckets
            .iter()
            .map(|(g, phones)| (g.clone(), phones.len()))
            .collect()
    }

    pub fn total(&self) -> usize {
        self.buckets.iter().map(|(_, phones)| phones.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Merge another set of buckets into this one, keeping order.
    pub fn absorb(&mut self, other: Groups) {
        for (group, phones) in other.buckets {
            self.extend(&group, phones);
        }
    }
}

/// Per-file line of the report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileSummary {
    Single {
        file: String,
        group: String,
        count: usize,
    },
    Split {
        file: String,
        counts: Vec<(String, usize)>,
    },
    Skipped {
        file: String,
        count: usize,
    },
}

impl FileSummary {
    /// Non-empty phones read from the file, grouped or not.
    pub fn processed(&self) -> usize {
        match self {
            Self::Single { count, .. } | Self::Skipped { count, .. } => *count,
            Self::Split { counts, .. } => counts.iter().map(|(_, c)| c).sum(),
        }
    }
}

impl fmt::Display for FileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single { file, group, count } => write!(f, "{file}: {count} строк → {group}"),
            Self::Split { file, counts } => {
                let total: usize = counts.iter().map(|(_, c)| c).sum();
                if counts.is_empty() {
                    return write!(f, "{file}: {total} строк");
                }
                let details = counts
                    .iter()
                    .map(|(g, c)| format!("{g}: {c}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{file}: {total} строк → {details}")
            }
            Self::Skipped { file, .. } => write!(f, "{file}: пропущен (не распознан)"),
        }
    }
}

/// Human-readable processing summary sent back to the user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub files: Vec<FileSummary>,
    pub groups: Vec<(String, usize)>,
    /// Every non-empty phone read, including those of skipped files.
    pub total: usize,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let files = self
            .files
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        write!(f, "{files}\n\n")?;
        for (group, count) in &self.groups {
            writeln!(f, "{group}: {count} строк")?;
        }
        write!(f, "Всего: {} строк", self.total)
    }
}

/// Result of classifying one or more CSV files.
#[derive(Clone, Debug)]
pub struct CsvOutcome {
    pub files: Vec<PathBuf>,
    pub report: Report,
}

/// Classifies CSV rows into groups and writes one TXT file per group.
#[derive(Clone, Debug, Default)]
pub struct Aggregator {
    rules: FilenameRules,
}

impl Aggregator {
    pub fn new(rules: FilenameRules) -> Self {
        Self { rules }
    }

    /// Classify a single file without touching the output directory.
    ///
    /// `file_name` is the user-visible name; the category is decided from it.
    pub fn classify_file(&self, path: &Path, file_name: &str) -> Result<(Groups, FileSummary)> {
        let table = Table::read(path)?;
        let phone_idx = table.require(PHONE_COLUMN, file_name)?;

        let Some(category) = self.rules.categorize(file_name) else {
            let count = table
                .rows
                .iter()
                .filter(|row| clean_phone(cell(row, phone_idx)).is_some())
                .count();
            return Ok((
                Groups::default(),
                FileSummary::Skipped {
                    file: file_name.to_string(),
                    count,
                },
            ));
        };

        match category {
            Category::ChannelSplit => {
                let channel_idx = table.require(CHANNEL_COLUMN, file_name)?;
                let mut groups = Groups::default();
                for row in &table.rows {
                    let Some(phone) = clean_phone(cell(row, phone_idx)) else {
                        continue;
                    };
                    groups.push(channel_group(cell(row, channel_idx)), phone);
                }
                let summary = FileSummary::Split {
                    file: file_name.to_string(),
                    counts: groups.counts(),
                };
                Ok((groups, summary))
            }
            Category::Single(group) => {
                let phones: Vec<String> = table
                    .rows
                    .iter()
                    .filter_map(|row| clean_phone(cell(row, phone_idx)))
                    .collect();
                let summary = FileSummary::Single {
                    file: file_name.to_string(),
                    group: group.clone(),
                    count: phones.len(),
                };
                let mut groups = Groups::default();
                groups.extend(group, phones);
                Ok((groups, summary))
            }
        }
    }

    /// Classify the given `(path, display name)` files, write the group files into
    /// `out_dir` and build the report.
    ///
    /// Any error aborts the whole run; no output files are left behind for it.
    pub fn process(&self, inputs: &[(&Path, &str)], day: i64, out_dir: &Path) -> Result<CsvOutcome> {
        let mut groups = Groups::default();
        let mut summaries = Vec::with_capacity(inputs.len());
        for (path, name) in inputs {
            let (file_groups, summary) = self.classify_file(path, name)?;
            groups.absorb(file_groups);
            summaries.push(summary);
        }

        let files = write_groups(&groups, day, out_dir)?;
        let report = Report {
            total: summaries.iter().map(FileSummary::processed).sum(),
            files: summaries,
            groups: groups.counts(),
        };
        Ok(CsvOutcome { files, report })
    }

    pub fn process_file(
        &self,
        path: &Path,
        file_name: &str,
        day: i64,
        out_dir: &Path,
    ) -> Result<CsvOutcome> {
        self.process(&[(path, file_name)], day, out_dir)
    }
}

/// Write each populated group as `"<group> (<day>).txt"`.
///
/// If a write fails, the files already written in this call are removed before
/// the error is returned.
pub fn write_groups(groups: &Groups, day: i64, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut written: Vec<PathBuf> = Vec::new();
    for (group, phones) in groups.iter() {
        if phones.is_empty() {
            continue;
        }
        let path = out_dir.join(output_file_name(group, day));
        if let Err(e) = fs::write(&path, phones.join("\n")) {
            tracing::warn!(
                "write of {} failed, removing {} partial outputs",
                path.display(),
                written.len()
            );
            for p in &written {
                let _ = fs::remove_file(p);
            }
            return Err(Error::Io(e));
        }
        written.push(path);
    }
    Ok(written)
}

struct Table {
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

impl Table {
    fn read(path: &Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_path(path)?;
        let headers = reader.headers()?.clone();
        let rows = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { headers, rows })
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}') == name)
    }

    fn require(&self, name: &'static str, file_name: &str) -> Result<usize> {
        self.column(name).ok_or_else(|| Error::MissingColumn {
            file: file_name.to_string(),
            column: name,
        })
    }
}

fn cell(row: &StringRecord, idx: usize) -> &str {
    row.get(idx).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_csv(dir: &Path, name: &str, body: &str) -> PathBuf {
        let p = dir.join(name);
        fs::write(&p, body).unwrap();
        p
    }

    fn read_lines(p: &Path) -> Vec<String> {
        fs::read_to_string(p)
            .unwrap()
            .split('\n')
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn single_group_file_keeps_row_order() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_csv(
            dir.path(),
            "in.csv",
            "name,phone\na,+79990000001\nb, 79990000002 \nc,\nd,+79990000003\n",
        );
        let out = tempfile::tempdir().unwrap();

        let res = Aggregator::default()
            .process_file(&input, "leads_253.csv", 60, out.path())
            .unwrap();

        assert_eq!(res.files, vec![out.path().join("253 (60).txt")]);
        assert_eq!(
            read_lines(&res.files[0]),
            vec!["79990000001", "79990000002", "79990000003"]
        );
        assert_eq!(res.report.total, 3);
        assert_eq!(res.report.groups, vec![("253".to_string(), 3)]);
        assert_eq!(
            res.report.to_string(),
            "leads_253.csv: 3 строк → 253\n\n253: 3 строк\nВсего: 3 строк"
        );
    }

    #[test]
    fn missing_phone_column_is_an_error_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_csv(dir.path(), "in.csv", "name,tel\na,+7999\n");
        let out = tempfile::tempdir().unwrap();

        let err = Aggregator::default()
            .process_file(&input, "leads_253.csv", 1, out.path())
            .unwrap_err();

        assert!(matches!(
            err,
            Error::MissingColumn {
                column: PHONE_COLUMN,
                ..
            }
        ));
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_phone_wins_over_unrecognized_name() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_csv(dir.path(), "in.csv", "tel\n1\n");
        let out = tempfile::tempdir().unwrap();
        let err = Aggregator::default()
            .process_file(&input, "whatever.csv", 1, out.path())
            .unwrap_err();
        assert!(matches!(err, Error::MissingColumn { .. }));
    }

    #[test]
    fn channel_split_routes_by_channel_id() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_csv(
            dir.path(),
            "in.csv",
            "phone,channel_id\n\
             +1,15883\n\
             +2,15686\n\
             +3,99999\n\
             ,15883\n\
             +4,15883\n\
             +5,\n",
        );
        let out = tempfile::tempdir().unwrap();

        let res = Aggregator::default()
            .process_file(&input, "export_6_web.csv", 7, out.path())
            .unwrap();

        let expected = vec![
            ("ББ".to_string(), 2),
            ("ББ ДОП_1".to_string(), 1),
            ("ББ ДОП_2".to_string(), 2),
        ];
        assert_eq!(res.report.groups, expected);
        let sum: usize = res.report.groups.iter().map(|(_, c)| c).sum();
        assert_eq!(sum, res.report.total);
        assert_eq!(res.report.total, 5);

        assert_eq!(res.files.len(), 3);
        assert_eq!(read_lines(&out.path().join("ББ (7).txt")), vec!["1", "4"]);
        assert_eq!(read_lines(&out.path().join("ББ ДОП_1 (7).txt")), vec!["2"]);
        assert_eq!(
            read_lines(&out.path().join("ББ ДОП_2 (7).txt")),
            vec!["3", "5"]
        );
        assert_eq!(
            res.report.files[0].to_string(),
            "export_6_web.csv: 5 строк → ББ: 2, ББ ДОП_1: 1, ББ ДОП_2: 2"
        );
    }

    #[test]
    fn channel_split_requires_channel_column() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_csv(dir.path(), "in.csv", "phone\n+1\n");
        let out = tempfile::tempdir().unwrap();
        let err = Aggregator::default()
            .process_file(&input, "6_web.csv", 1, out.path())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MissingColumn {
                column: CHANNEL_COLUMN,
                ..
            }
        ));
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn unrecognized_file_is_skipped_but_counted() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_csv(dir.path(), "in.csv", "phone\n+1\n+2\n \n");
        let out = tempfile::tempdir().unwrap();
        let res = Aggregator::default()
            .process_file(&input, "random.csv", 1, out.path())
            .unwrap();
        assert!(res.files.is_empty());
        assert!(res.report.groups.is_empty());
        assert_eq!(res.report.total, 2);
        assert_eq!(
            res.report.to_string(),
            "random.csv: пропущен (не распознан)\n\nВсего: 2 строк"
        );
    }

    #[test]
    fn grand_total_includes_skipped_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "phone\n+1\n+2\n");
        let b = write_csv(dir.path(), "b.csv", "phone\n+3\n");
        let out = tempfile::tempdir().unwrap();

        let res = Aggregator::default()
            .process(
                &[(a.as_path(), "a_253.csv"), (b.as_path(), "unknown.csv")],
                4,
                out.path(),
            )
            .unwrap();

        assert_eq!(res.report.groups, vec![("253".to_string(), 2)]);
        assert_eq!(res.report.total, 3);
        assert_eq!(res.files, vec![out.path().join("253 (4).txt")]);
    }

    #[test]
    fn bom_and_short_rows_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_csv(dir.path(), "in.csv", "\u{feff}id,phone\n1\n2,+7\n");
        let out = tempfile::tempdir().unwrap();
        let res = Aggregator::default()
            .process_file(&input, "MFO5.csv", 3, out.path())
            .unwrap();
        assert_eq!(read_lines(&out.path().join("Б0 (3).txt")), vec!["7"]);
        assert_eq!(res.report.total, 1);
    }

    #[test]
    fn multiple_files_share_groups() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "phone\n+1\n");
        let b = write_csv(dir.path(), "b.csv", "phone\n+2\n");
        let c = write_csv(dir.path(), "c.csv", "phone\n+3\n");
        let out = tempfile::tempdir().unwrap();

        let res = Aggregator::default()
            .process(
                &[
                    (a.as_path(), "x_389.csv"),
                    (b.as_path(), "y_389.csv"),
                    (c.as_path(), "z_390.csv"),
                ],
                10,
                out.path(),
            )
            .unwrap();

        assert_eq!(read_lines(&out.path().join("Н1 (10).txt")), vec!["1", "2"]);
        assert_eq!(
            res.report.to_string(),
            "x_389.csv: 1 строк → Н1\ny_389.csv: 1 строк → Н1\nz_390.csv: 1 строк → Н2\n\n\
             Н1: 2 строк\nН2: 1 строк\nВсего: 3 строк"
        );
    }

    #[test]
    fn failed_write_removes_earlier_outputs() {
        let out = tempfile::tempdir().unwrap();
        let mut groups = Groups::default();
        groups.push("ok", "1".to_string());
        // A group name containing a path separator into a missing directory cannot be written.
        groups.push("missing/dir", "2".to_string());

        let err = write_groups(&groups, 1, out.path()).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(!out.path().join("ok (1).txt").exists());
    }

    #[test]
    fn empty_file_reports_missing_phone() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_csv(dir.path(), "in.csv", "");
        let out = tempfile::tempdir().unwrap();
        let err = Aggregator::default()
            .process_file(&input, "253.csv", 1, out.path())
            .unwrap_err();
        assert!(matches!(err, Error::MissingColumn { .. }));
    }
}
