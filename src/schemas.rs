// Table formats and schemas shared by corpus input and result output.

use arrow::datatypes::{DataType, Field, Schema};
use clap::ValueEnum;

use crate::error::{Error, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum TableFormat {
    Infer,
    Csv,
    CsvGz,
    Parquet,
}

pub fn determine_format(filename: &str, fmt: TableFormat) -> Result<TableFormat> {
    if fmt != TableFormat::Infer {
        return Ok(fmt);
    }

    if filename.ends_with(".csv.gz") {
        Ok(TableFormat::CsvGz)
    } else if filename.ends_with(".csv") {
        Ok(TableFormat::Csv)
    } else if filename.ends_with(".parquet") {
        Ok(TableFormat::Parquet)
    } else {
        Err(Error::UnknownFormat(filename.to_string()))
    }
}

pub fn large_utf8_if_parquet(fmt: TableFormat) -> DataType {
    match fmt {
        TableFormat::Parquet => DataType::LargeUtf8,
        _ => DataType::Utf8,
    }
}

pub fn assignment_schema(fmt: TableFormat) -> Schema {
    Schema::new(vec![
        Field::new("document", DataType::UInt64, false),
        Field::new("label", DataType::UInt32, false),
        Field::new("label_name", large_utf8_if_parquet(fmt), true),
        Field::new("cluster", DataType::UInt32, false),
        Field::new("confidence", DataType::Float32, false),
        Field::new("tsne_x", DataType::Float32, false),
        Field::new("tsne_y", DataType::Float32, false),
    ])
}
