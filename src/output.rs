// Writing the per-document assignment table.

use arrow::array::{
    ArrayRef, Float32Array, LargeStringArray, RecordBatch, StringArray, UInt32Array, UInt64Array,
};
use arrow::csv::WriterBuilder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use ndarray::Array2;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression as ParquetCompression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;

use crate::corpus::Document;
use crate::error::{Error, Result};
use crate::schemas::{assignment_schema, determine_format, TableFormat};

/// One row per document: its reference label, predicted cluster, the
/// probability of that cluster, and its t-SNE coordinates.
#[derive(Clone, Debug)]
pub struct AssignmentTable {
    pub document: Vec<u64>,
    pub label: Vec<u32>,
    pub label_name: Vec<Option<String>>,
    pub cluster: Vec<u32>,
    pub confidence: Vec<f32>,

    // [ndocuments, 2]
    pub tsne: Array2<f32>,
}

impl AssignmentTable {
    pub fn new(
        documents: &[Document],
        clusters: &[usize],
        confidence: &[f32],
        tsne: &Array2<f32>,
    ) -> Result<AssignmentTable> {
        let n = documents.len();
        if clusters.len() != n || confidence.len() != n || tsne.dim() != (n, 2) {
            return Err(Error::shape_mismatch(
                (n, n, (n, 2)),
                (clusters.len(), confidence.len(), tsne.dim()),
            ));
        }

        Ok(AssignmentTable {
            document: (0..n as u64).collect(),
            label: documents.iter().map(|doc| doc.label as u32).collect(),
            label_name: documents.iter().map(|doc| doc.label_name.clone()).collect(),
            cluster: clusters.iter().map(|&c| c as u32).collect(),
            confidence: confidence.to_vec(),
            tsne: tsne.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.document.len()
    }

    fn to_record_batch(&self, fmt: TableFormat) -> Result<RecordBatch> {
        let label_name: ArrayRef = match fmt {
            TableFormat::Parquet => Arc::new(LargeStringArray::from(self.label_name.clone())),
            _ => Arc::new(StringArray::from(self.label_name.clone())),
        };

        let columns: Vec<ArrayRef> = vec![
            Arc::new(UInt64Array::from(self.document.clone())),
            Arc::new(UInt32Array::from(self.label.clone())),
            label_name,
            Arc::new(UInt32Array::from(self.cluster.clone())),
            Arc::new(Float32Array::from(self.confidence.clone())),
            Arc::new(Float32Array::from_iter_values(self.tsne.column(0).iter().copied())),
            Arc::new(Float32Array::from_iter_values(self.tsne.column(1).iter().copied())),
        ];

        Ok(RecordBatch::try_new(
            Arc::new(assignment_schema(fmt)),
            columns,
        )?)
    }
}

pub fn write_assignments(filename: &str, fmt: TableFormat, table: &AssignmentTable) -> Result<()> {
    let fmt = determine_format(filename, fmt)?;
    let batch = table.to_record_batch(fmt)?;
    let file = File::create(filename)?;

    match fmt {
        TableFormat::Csv => {
            write_table_csv(file, &batch)?;
        }
        TableFormat::CsvGz => {
            let encoder = GzEncoder::new(file, Compression::default());
            let mut encoder = write_table_csv(encoder, &batch)?;
            encoder.try_finish()?;
        }
        TableFormat::Parquet => write_table_parquet(file, &batch)?,
        TableFormat::Infer => return Err(Error::UnknownFormat(filename.to_string())),
    };

    info!("Wrote {} assignments to {}", table.len(), filename);
    Ok(())
}

// Returns the underlying writer so compressed streams can be finished.
fn write_table_csv<W: Write>(output: W, batch: &RecordBatch) -> Result<W> {
    let mut writer = WriterBuilder::new().with_header(true).build(output);
    writer.write(batch)?;
    let mut output = writer.into_inner();
    output.flush()?;
    Ok(output)
}

fn write_table_parquet<W: Write + Send>(output: W, batch: &RecordBatch) -> Result<()> {
    let props = WriterProperties::builder()
        .set_compression(ParquetCompression::ZSTD(ZstdLevel::default()))
        .build();
    let mut writer = ArrowWriter::try_new(output, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;
    use flate2::read::GzDecoder;
    use ndarray::array;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::io::Read;

    fn table() -> AssignmentTable {
        let documents = vec![
            Document {
                text: "stocks rally".to_string(),
                label: 2,
                label_name: Some("Business".to_string()),
            },
            Document {
                text: "cup final".to_string(),
                label: 1,
                label_name: None,
            },
        ];
        let tsne = array![[0.5_f32, -1.0], [2.0, 3.0]];
        AssignmentTable::new(&documents, &[3, 0], &[0.9, 0.6], &tsne).unwrap()
    }

    #[test]
    fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let path = path.to_str().unwrap();
        write_assignments(path, TableFormat::Infer, &table()).unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            "document,label,label_name,cluster,confidence,tsne_x,tsne_y"
        );
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("0,2,Business,3,0.9"));
        assert!(lines[2].starts_with("1,1,,0,0.6"));
    }

    #[test]
    fn test_write_csv_gz() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv.gz");
        let path = path.to_str().unwrap();
        write_assignments(path, TableFormat::Infer, &table()).unwrap();

        let mut content = String::new();
        GzDecoder::new(File::open(path).unwrap())
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn test_write_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let path = path.to_str().unwrap();
        write_assignments(path, TableFormat::Infer, &table()).unwrap();

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let batches: Vec<RecordBatch> = reader.map(|batch| batch.unwrap()).collect();
        let nrows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(nrows, 2);
        assert_eq!(batches[0].num_columns(), 7);

        let clusters = batches[0]
            .column_by_name("cluster")
            .unwrap()
            .as_any()
            .downcast_ref::<UInt32Array>()
            .unwrap();
        assert_eq!(clusters.values().to_vec(), vec![3, 0]);
    }

    #[test]
    fn test_table_rejects_mismatched_lengths() {
        let tsne = Array2::<f32>::zeros((1, 2));
        assert!(AssignmentTable::new(&[], &[0], &[1.0], &tsne).is_err());
    }
}
