//! Record parser for delimited input files.
//!
//! The first row is the header. Each header cell is either the type column,
//! a parent pointer (`Type.field`), or a property of the file's node type.
//! A [`RecordSource`] reopens its file for every pass, so the same file
//! always yields the same sequence of records.

use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, Trim};

use crate::config::LoaderConfig;
use crate::error::ParseError;
use crate::record::{ParentPointer, ParentRef, Record};
use crate::schema::{is_identifier, Schema};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Column {
    Type,
    Property(String),
    Parent(ParentPointer),
}

/// A parseable input file bound to its node type.
#[derive(Debug, Clone)]
pub struct RecordSource {
    path: PathBuf,
    file: String,
    node_type: String,
    delimiter: u8,
    columns: Vec<Column>,
}

impl RecordSource {
    /// Read the header and decide the file's node type.
    ///
    /// Precedence: explicit `file_types` mapping, then the type column of the
    /// first row that has one, then the file stem.
    pub fn open(
        path: impl AsRef<Path>,
        schema: &Schema,
        config: &LoaderConfig,
    ) -> Result<Self, ParseError> {
        let path = path.as_ref().to_path_buf();
        let file = path.display().to_string();
        let delimiter = config.delimiter_byte();

        let mut reader = open_reader(&path, &file, delimiter)?;
        let headers = reader
            .headers()
            .map_err(|source| ParseError::Csv {
                file: file.clone(),
                line: 1,
                source,
            })?
            .clone();
        let columns = classify_header(&headers, &config.type_column, &file)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let node_type = match config.mapped_type(&file_name, &stem) {
            Some(mapped) => mapped.to_string(),
            None => match columns.iter().position(|c| *c == Column::Type) {
                Some(idx) => first_type_value(reader.into_records(), idx, &file)?.unwrap_or(stem),
                None => stem,
            },
        };

        if schema.node_type(&node_type).is_none() {
            return Err(ParseError::UnknownNodeType { file, node_type });
        }

        tracing::debug!(file = %file, node_type = %node_type, columns = columns.len(), "Opened input file");

        Ok(Self {
            path,
            file,
            node_type,
            delimiter,
            columns,
        })
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    /// Lazily iterate the data rows from the start of the file.
    pub fn records(&self) -> Result<Records, ParseError> {
        let mut reader = open_reader(&self.path, &self.file, self.delimiter)?;
        // Skip the header; it was checked in `open`.
        reader.headers().map_err(|source| ParseError::Csv {
            file: self.file.clone(),
            line: 1,
            source,
        })?;
        Ok(Records {
            rows: reader.into_records(),
            file: self.file.clone(),
            node_type: self.node_type.clone(),
            columns: self.columns.clone(),
        })
    }

    pub fn read_all(&self) -> Result<Vec<Record>, ParseError> {
        self.records()?.collect()
    }
}

/// Parse a whole file.
pub fn parse(
    path: impl AsRef<Path>,
    schema: &Schema,
    config: &LoaderConfig,
) -> Result<Vec<Record>, ParseError> {
    RecordSource::open(path, schema, config)?.read_all()
}

/// Iterator over the records of one file.
pub struct Records {
    rows: StringRecordsIntoIter<File>,
    file: String,
    node_type: String,
    columns: Vec<Column>,
}

impl Records {
    fn to_record(&self, row: &StringRecord) -> Result<Record, ParseError> {
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        let mut record = Record::new(&self.file, line, &self.node_type);

        for (column, value) in self.columns.iter().zip(row.iter()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match column {
                Column::Type => {
                    if value != self.node_type {
                        return Err(ParseError::InconsistentType {
                            file: self.file.clone(),
                            line,
                            expected: self.node_type.clone(),
                            found: value.to_string(),
                        });
                    }
                }
                Column::Property(name) => {
                    record.properties.insert(name.clone(), value.to_string());
                }
                Column::Parent(pointer) => record.parents.push(ParentRef {
                    pointer: pointer.clone(),
                    value: value.to_string(),
                }),
            }
        }

        Ok(record)
    }
}

impl Iterator for Records {
    type Item = Result<Record, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rows.next()? {
            Ok(row) => Some(self.to_record(&row)),
            Err(source) => {
                let line = source.position().map(|p| p.line()).unwrap_or(0);
                Some(Err(ParseError::Csv {
                    file: self.file.clone(),
                    line,
                    source,
                }))
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn open_reader(path: &Path, file: &str, delimiter: u8) -> Result<csv::Reader<File>, ParseError> {
    let handle = File::open(path).map_err(|source| ParseError::Io {
        file: file.to_string(),
        source,
    })?;
    Ok(ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(handle))
}

fn classify_header(
    headers: &StringRecord,
    type_column: &str,
    file: &str,
) -> Result<Vec<Column>, ParseError> {
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(ParseError::EmptyHeader {
            file: file.to_string(),
        });
    }

    let mut seen = std::collections::BTreeSet::new();
    let mut columns = Vec::with_capacity(headers.len());
    for header in headers.iter().map(str::trim) {
        if !seen.insert(header) {
            return Err(ParseError::DuplicateColumn {
                file: file.to_string(),
                column: header.to_string(),
            });
        }
        let column = if header == type_column {
            Column::Type
        } else if let Some(pointer) = ParentPointer::parse(header) {
            Column::Parent(pointer)
        } else if is_identifier(header) {
            Column::Property(header.to_string())
        } else {
            return Err(ParseError::InvalidColumn {
                file: file.to_string(),
                column: header.to_string(),
            });
        };
        columns.push(column);
    }
    Ok(columns)
}

fn first_type_value(
    rows: StringRecordsIntoIter<File>,
    idx: usize,
    file: &str,
) -> Result<Option<String>, ParseError> {
    for row in rows {
        let row = row.map_err(|source| ParseError::Csv {
            file: file.to_string(),
            line: source.position().map(|p| p.line()).unwrap_or(0),
            source,
        })?;
        if let Some(value) = row.get(idx).map(str::trim).filter(|v| !v.is_empty()) {
            return Ok(Some(value.to_string()));
        }
    }
    Ok(None)
}
