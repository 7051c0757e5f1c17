use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::normalize::normalize_numeric;

const DEPT_CODE_COL: usize = 0;
const DEPT_NAME_COL: usize = 1;
const OPER_NAME_COL: usize = 2;
const OPER_ID_COL: usize = 3;

/// Name lookups built from the active operator list. Columns are positional:
/// department code, department name, operator name, operator id.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    operators: HashMap<String, String>,
    departments: HashMap<String, String>,
}

impl ReferenceIndex {
    /// Missing or unreadable files produce an empty index so lookups degrade
    /// to misses instead of failing the run.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            warn!(path = %path.display(), "reference list missing; names will not resolve");
            return Self::default();
        }

        match Self::read(path) {
            Ok(index) => {
                info!(
                    path = %path.display(),
                    operators = index.operators.len(),
                    departments = index.departments.len(),
                    "indexed reference list"
                );
                index
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "reference list unreadable");
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let mut bytes =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        if bytes.starts_with(b"\xEF\xBB\xBF") {
            bytes.drain(..3);
        }
        Self::from_csv(&bytes)
    }

    pub fn from_csv(data: &[u8]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(data);

        let mut index = Self::default();
        for (row_number, row) in reader.records().enumerate() {
            let row = row.with_context(|| format!("failed to read reference row {row_number}"))?;
            if row_number == 0 && looks_like_header(&row) {
                continue;
            }
            if row.len() <= OPER_ID_COL {
                continue;
            }

            let dept_code = normalize_numeric(&row[DEPT_CODE_COL]);
            let oper_id = normalize_numeric(&row[OPER_ID_COL]);
            if !dept_code.is_empty() {
                index.insert_department(dept_code, row[DEPT_NAME_COL].trim());
            }
            if !oper_id.is_empty() {
                index.insert_operator(oper_id, row[OPER_NAME_COL].trim());
            }
        }
        Ok(index)
    }

    pub fn operator_name(&self, operator_id: &str) -> Option<&str> {
        self.operators.get(operator_id).map(String::as_str)
    }

    pub fn department_name(&self, code: &str) -> Option<&str> {
        self.departments.get(code).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty() && self.departments.is_empty()
    }

    // First occurrence in file order wins on duplicate keys.
    fn insert_operator(&mut self, id: String, name: &str) {
        if let Entry::Vacant(slot) = self.operators.entry(id) {
            slot.insert(name.to_string());
        }
    }

    fn insert_department(&mut self, code: String, name: &str) {
        if let Entry::Vacant(slot) = self.departments.entry(code) {
            slot.insert(name.to_string());
        }
    }
}

fn looks_like_header(row: &csv::StringRecord) -> bool {
    let has_digit = |index: usize| {
        row.get(index)
            .is_some_and(|cell| cell.trim().chars().any(|ch| ch.is_ascii_digit()))
    };
    !has_digit(DEPT_CODE_COL) || !has_digit(OPER_ID_COL)
}
