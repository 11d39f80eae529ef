// Reading labeled documents from csv, csv.gz, or parquet tables.

use arrow::array::{Array, StringArray};
use arrow::datatypes::DataType;
use flate2::read::GzDecoder;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::schemas::{determine_format, TableFormat};

pub const AG_NEWS_CLASSES: [&str; 4] = ["World", "Sports", "Business", "Sci/Tech"];

#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub text: String,

    // 0-based ground-truth category. Never used for training.
    pub label: usize,
    pub label_name: Option<String>,
}

// Which columns hold the label and text. Without a header, columns are
// referred to by their 0-based position.
#[derive(Clone, Debug)]
pub struct CorpusColumns {
    pub label: String,
    pub text: Vec<String>,
    pub has_header: bool,

    // subtracted from integer labels (1 for 1-based class indices)
    pub label_offset: usize,
    pub label_names: Option<Vec<String>>,
}

impl CorpusColumns {
    // Headerless `class index, title, description`, as AG News is distributed.
    pub fn ag_news() -> Self {
        CorpusColumns {
            label: String::from("0"),
            text: vec![String::from("1"), String::from("2")],
            has_header: false,
            label_offset: 1,
            label_names: Some(AG_NEWS_CLASSES.iter().map(|s| s.to_string()).collect()),
        }
    }
}

// Half-open range of rows to read, e.g. `..2000` or `100..600`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Split {
    pub start: usize,
    pub end: Option<usize>,
}

impl Split {
    fn contains(&self, row: usize) -> bool {
        row >= self.start && self.end.map_or(true, |end| row < end)
    }

    fn done(&self, row: usize) -> bool {
        self.end.map_or(false, |end| row >= end)
    }
}

impl FromStr for Split {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Split::default());
        }

        let (start, end) = s
            .split_once("..")
            .ok_or_else(|| Error::InvalidSplit(s.to_string()))?;

        let parse = |v: &str| -> Result<Option<usize>> {
            if v.is_empty() {
                Ok(None)
            } else {
                v.parse::<usize>()
                    .map(Some)
                    .map_err(|_| Error::InvalidSplit(s.to_string()))
            }
        };

        let start = parse(start)?.unwrap_or(0);
        let end = parse(end)?;
        if let Some(end) = end {
            if end < start {
                return Err(Error::InvalidSplit(s.to_string()));
            }
        }

        Ok(Split { start, end })
    }
}

// Turns raw label strings into 0-based indices. Integer labels are offset;
// anything else is treated as a category name, numbered by first appearance.
struct LabelEncoder<'a> {
    columns: &'a CorpusColumns,
    categories: HashMap<String, usize>,
}

impl<'a> LabelEncoder<'a> {
    fn new(columns: &'a CorpusColumns) -> Self {
        LabelEncoder {
            columns,
            categories: HashMap::new(),
        }
    }

    fn encode(&mut self, row: usize, value: &str) -> Result<(usize, Option<String>)> {
        let value = value.trim();
        if let Ok(index) = value.parse::<usize>() {
            let label = index
                .checked_sub(self.columns.label_offset)
                .ok_or_else(|| Error::InvalidLabel {
                    row,
                    value: value.to_string(),
                })?;
            let name = self
                .columns
                .label_names
                .as_ref()
                .and_then(|names| names.get(label).cloned());
            return Ok((label, name));
        }

        if value.is_empty() {
            return Err(Error::InvalidLabel {
                row,
                value: value.to_string(),
            });
        }

        let next = self.categories.len();
        let label = *self.categories.entry(value.to_string()).or_insert(next);
        Ok((label, Some(value.to_string())))
    }
}

pub fn read_documents(
    filename: &str,
    fmt: TableFormat,
    columns: &CorpusColumns,
    split: Split,
) -> Result<Vec<Document>> {
    let fmt = determine_format(filename, fmt)?;
    let input = File::open(filename)?;

    let documents = match fmt {
        TableFormat::Csv => read_documents_csv(input, columns, split)?,
        TableFormat::CsvGz => read_documents_csv(GzDecoder::new(input), columns, split)?,
        TableFormat::Parquet => read_documents_parquet(input, columns, split)?,
        TableFormat::Infer => return Err(Error::UnknownFormat(filename.to_string())),
    };

    if documents.is_empty() {
        return Err(Error::EmptyInput("no documents in the requested split"));
    }

    Ok(documents)
}

fn find_column_index(header: Option<&[String]>, column: &str) -> Result<usize> {
    match header {
        Some(header) => header
            .iter()
            .position(|name| name == column)
            .ok_or_else(|| Error::MissingColumn(column.to_string())),
        None => column
            .parse::<usize>()
            .map_err(|_| Error::MissingColumn(column.to_string())),
    }
}

fn join_text<'b, I: Iterator<Item = &'b str>>(parts: I) -> String {
    parts
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn read_documents_csv<R: Read>(
    input: R,
    columns: &CorpusColumns,
    split: Split,
) -> Result<Vec<Document>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(columns.has_header)
        .flexible(true)
        .from_reader(input);

    let header: Option<Vec<String>> = if columns.has_header {
        Some(rdr.headers()?.iter().map(|s| s.to_string()).collect())
    } else {
        None
    };

    let label_col = find_column_index(header.as_deref(), &columns.label)?;
    let text_cols = columns
        .text
        .iter()
        .map(|column| find_column_index(header.as_deref(), column))
        .collect::<Result<Vec<_>>>()?;

    let mut encoder = LabelEncoder::new(columns);
    let mut documents = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        if split.done(row) {
            break;
        }
        let record = record?;
        if !split.contains(row) {
            continue;
        }

        let label = record
            .get(label_col)
            .ok_or_else(|| Error::MissingColumn(columns.label.clone()))?;
        let (label, label_name) = encoder.encode(row, label)?;

        let text = join_text(text_cols.iter().filter_map(|&col| record.get(col)));
        documents.push(Document {
            text,
            label,
            label_name,
        });
    }

    Ok(documents)
}

fn read_documents_parquet(
    input: File,
    columns: &CorpusColumns,
    split: Split,
) -> Result<Vec<Document>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(input)?;
    let header: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect();

    // Parquet always carries column names; positional references still work.
    let lookup = |column: &str| {
        find_column_index(Some(header.as_slice()), column)
            .or_else(|_| find_column_index(None, column))
            .and_then(|col| {
                if col < header.len() {
                    Ok(col)
                } else {
                    Err(Error::MissingColumn(column.to_string()))
                }
            })
    };
    let label_col = lookup(columns.label.as_str())?;
    let text_cols = columns
        .text
        .iter()
        .map(|column| lookup(column.as_str()))
        .collect::<Result<Vec<_>>>()?;

    let rdr = builder.build()?;
    let mut encoder = LabelEncoder::new(columns);
    let mut documents = Vec::new();
    let mut row = 0;
    for batch in rdr {
        let batch = batch?;
        if split.done(row) {
            break;
        }

        let as_strings = |col: usize| -> Result<StringArray> {
            let array = arrow::compute::cast(batch.column(col), &DataType::Utf8)?;
            Ok(array
                .as_any()
                .downcast_ref::<StringArray>()
                .cloned()
                .unwrap_or_else(|| StringArray::from(Vec::<Option<String>>::new())))
        };

        let labels = as_strings(label_col)?;
        let texts = text_cols
            .iter()
            .map(|&col| as_strings(col))
            .collect::<Result<Vec<_>>>()?;

        for i in 0..batch.num_rows() {
            if split.done(row) {
                break;
            }
            if split.contains(row) {
                let label = if labels.is_null(i) { "" } else { labels.value(i) };
                let (label, label_name) = encoder.encode(row, label)?;
                let text = join_text(
                    texts
                        .iter()
                        .filter(|array| !array.is_null(i))
                        .map(|array| array.value(i)),
                );
                documents.push(Document {
                    text,
                    label,
                    label_name,
                });
            }
            row += 1;
        }
    }

    Ok(documents)
}
