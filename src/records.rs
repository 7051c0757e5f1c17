use std::fs;
use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::model::UnmatchedRecord;
use crate::normalize::normalize_numeric;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ColumnRole {
    OperatorId,
    NewDepartment,
    OldDepartment,
}

struct SynonymRule {
    role: ColumnRole,
    synonyms: &'static [&'static str],
}

const HEADER_RULES: &[SynonymRule] = &[
    SynonymRule {
        role: ColumnRole::OperatorId,
        synonyms: &[
            "oper_oper_no",
            "oper no",
            "oper_no",
            "operator id",
            "operator",
            "oper id",
            "id",
            "oper",
        ],
    },
    SynonymRule {
        role: ColumnRole::NewDepartment,
        synonyms: &[
            "cs_dept",
            "cs dept",
            "cd_dept",
            "dept_code",
            "dept code",
            "dept",
            "department",
            "new dept",
            "new department",
        ],
    },
    SynonymRule {
        role: ColumnRole::OldDepartment,
        synonyms: &["aw_dept", "aw dept", "aw_dept_code", "aw dept code"],
    },
];

/// Column positions for the three record roles.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ColumnLayout {
    pub operator_id: Option<usize>,
    pub new_department: Option<usize>,
    pub old_department: Option<usize>,
}

impl ColumnLayout {
    /// Applies the synonym rules to the header and, when either required role
    /// stays unmatched, the positional fallback.
    pub fn detect(header: &[String]) -> Self {
        let mut layout = Self::from_header_names(header);
        if layout.operator_id.is_none() || layout.new_department.is_none() {
            layout.apply_positional_fallback(header.len());
        }
        layout
    }

    fn from_header_names(header: &[String]) -> Self {
        let mut layout = Self::default();
        for (index, name) in header.iter().enumerate() {
            let name = name.trim().to_lowercase();
            for rule in HEADER_RULES {
                if rule.synonyms.contains(&name.as_str()) {
                    layout.assign(rule.role, index);
                }
            }
        }
        layout
    }

    fn apply_positional_fallback(&mut self, width: usize) {
        self.operator_id = Some(0);
        if width >= 3 {
            self.old_department = Some(1);
            self.new_department = Some(2);
        } else if width == 2 {
            self.new_department = Some(1);
        }
    }

    fn assign(&mut self, role: ColumnRole, index: usize) {
        let slot = match role {
            ColumnRole::OperatorId => &mut self.operator_id,
            ColumnRole::NewDepartment => &mut self.new_department,
            ColumnRole::OldDepartment => &mut self.old_department,
        };
        *slot = Some(index);
    }
}

/// Lazily yields normalized records from an unmatched-department export.
pub struct UnmatchedRecords {
    rows: csv::StringRecordsIntoIter<Cursor<Vec<u8>>>,
    layout: ColumnLayout,
    done: bool,
}

impl UnmatchedRecords {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(mut bytes: Vec<u8>) -> Result<Self> {
        if bytes.starts_with(UTF8_BOM) {
            bytes.drain(..UTF8_BOM.len());
        }

        let mut rows = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(Cursor::new(bytes))
            .into_records();

        let (layout, done) = match rows.next() {
            Some(header) => {
                let header = header.context("failed to read CSV header row")?;
                let names: Vec<String> = header.iter().map(str::to_string).collect();
                (ColumnLayout::detect(&names), false)
            }
            None => (ColumnLayout::default(), true),
        };

        Ok(Self {
            rows,
            layout,
            done,
        })
    }

    pub fn layout(&self) -> ColumnLayout {
        self.layout
    }
}

impl Iterator for UnmatchedRecords {
    type Item = Result<UnmatchedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let row = match self.rows.next()? {
                Ok(row) => row,
                Err(err) => {
                    self.done = true;
                    return Some(Err(anyhow!(err).context("failed to read CSV row")));
                }
            };

            let (Some(oper_idx), Some(new_idx)) =
                (self.layout.operator_id, self.layout.new_department)
            else {
                self.done = true;
                return Some(Err(anyhow!(
                    "cannot locate operator and department columns in a single-column file"
                )));
            };

            let cell = |index: usize| row.get(index).map(str::trim).unwrap_or("");
            let operator = cell(oper_idx);
            let new_department = cell(new_idx);
            if operator.is_empty() || new_department.is_empty() {
                continue;
            }

            let record = UnmatchedRecord {
                operator_id: normalize_numeric(operator),
                new_department: normalize_numeric(new_department),
                old_department: self
                    .layout
                    .old_department
                    .map(|index| normalize_numeric(cell(index))),
            };
            if record.operator_id.is_empty() || record.new_department.is_empty() {
                continue;
            }
            return Some(Ok(record));
        }
        None
    }
}

pub fn read_unmatched(path: &Path) -> Result<Vec<UnmatchedRecord>> {
    let records = UnmatchedRecords::open(path)?;
    debug!(path = %path.display(), layout = ?records.layout(), "detected column layout");
    records.collect()
}
