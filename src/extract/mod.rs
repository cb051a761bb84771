pub mod descriptors;
pub mod fields;
pub mod normalize;
pub mod row;

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::view::RowHandle;
use descriptors::{RecordKind, TableDescriptor};
use fields::{FieldDiagnostic, FieldOutcome, Problem, Scalar};
use normalize::Normalizer;
use row::{CellAccessor, HtmlRow};

/// Parsed but not yet typed output for one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRow {
    pub kind: RecordKind,
    /// 0-based DOM position of the row.
    pub position: usize,
    pub fields: BTreeMap<&'static str, Scalar>,
    pub diagnostics: Vec<FieldDiagnostic>,
}

impl ExtractedRow {
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(Scalar::Text(t)) => Some(t),
            _ => None,
        }
    }

    pub fn string(&self, name: &str) -> Option<String> {
        self.text(name).map(str::to_string)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.fields.get(name) {
            Some(Scalar::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn date(&self, name: &str) -> Option<NaiveDate> {
        match self.fields.get(name) {
            Some(Scalar::Date(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn diagnostic(&self, name: &str) -> Option<&FieldDiagnostic> {
        self.diagnostics.iter().find(|d| d.field == name)
    }

    /// First required field that failed, if any.
    pub fn missing_required(&self) -> Option<&FieldDiagnostic> {
        self.diagnostics.iter().find(|d| d.required)
    }
}

/// Applies a table descriptor to rows. Never fails: every field is resolved
/// independently and problems are collected as diagnostics.
pub struct RowExtractor<'d> {
    descriptor: &'d TableDescriptor,
    normalizer: Normalizer,
}

impl<'d> RowExtractor<'d> {
    pub fn new(descriptor: &'d TableDescriptor, origin: &str) -> Self {
        RowExtractor {
            descriptor,
            normalizer: Normalizer::new(descriptor.date_format, origin),
        }
    }

    pub fn extract<R: CellAccessor + ?Sized>(&self, row: &R, position: usize) -> ExtractedRow {
        let mut fields = BTreeMap::new();
        let mut diagnostics = Vec::new();

        for spec in self.descriptor.fields {
            match fields::resolve(row, spec, &self.normalizer) {
                FieldOutcome::Value(v) => {
                    fields.insert(spec.name, v);
                }
                FieldOutcome::Absent(problem) => {
                    // Optional fields that are simply not there are not worth a note.
                    let noteworthy = spec.required || matches!(problem, Problem::Unparseable(_));
                    if noteworthy {
                        diagnostics.push(FieldDiagnostic {
                            field: spec.name,
                            problem,
                            required: spec.required,
                        });
                    }
                }
            }
        }

        ExtractedRow {
            kind: self.descriptor.kind,
            position,
            fields,
            diagnostics,
        }
    }

    pub fn extract_handle(&self, handle: &RowHandle) -> ExtractedRow {
        match HtmlRow::parse(&handle.markup, self.descriptor.cell_selector) {
            Some(row) => self.extract(&row, handle.position),
            None => ExtractedRow {
                kind: self.descriptor.kind,
                position: handle.position,
                fields: BTreeMap::new(),
                diagnostics: self
                    .descriptor
                    .fields
                    .iter()
                    .filter(|f| f.required)
                    .map(|f| FieldDiagnostic {
                        field: f.name,
                        problem: Problem::Missing,
                        required: true,
                    })
                    .collect(),
            },
        }
    }
}
