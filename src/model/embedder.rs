use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use log::{debug, info};
use serde::Deserialize;
use std::path::Path;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use super::progress_bar;
use crate::error::{Error, Result};

/// Maps raw texts to fixed-length vectors, one row per text in input order.
pub trait Embedder {
    fn hidden_size(&self) -> usize;

    fn embed_batch(&self, texts: &[&str]) -> Result<Tensor>;
}

/// Embed `texts` in chunks of `chunk_size` to bound peak memory and
/// concatenate the results in input order.
pub fn embed_documents<E: Embedder + ?Sized>(
    embedder: &E,
    texts: &[&str],
    chunk_size: usize,
) -> Result<Tensor> {
    if texts.is_empty() {
        return Err(Error::EmptyInput("no texts to embed"));
    }

    let progress = progress_bar(texts.len(), "embedding");
    let mut chunks = Vec::with_capacity(texts.len().div_ceil(chunk_size.max(1)));
    for (i, chunk) in texts.chunks(chunk_size.max(1)).enumerate() {
        let embedding = embedder.embed_batch(chunk)?;
        let shape = embedding.dims2()?;
        if shape != (chunk.len(), embedder.hidden_size()) {
            return Err(Error::shape_mismatch(
                (chunk.len(), embedder.hidden_size()),
                shape,
            ));
        }
        chunks.push(embedding.to_dtype(DType::F32)?);
        progress.inc(chunk.len() as u64);
        debug!("embedded chunk {} ({} texts)", i, chunk.len());
    }
    progress.finish_and_clear();

    Ok(Tensor::cat(&chunks, 0)?)
}

// Only the fields we need beyond what the model itself reads.
#[derive(Deserialize)]
struct EncoderDims {
    hidden_size: usize,
}

/// A pretrained BERT-family encoder pooled at the leading [CLS] position.
///
/// The model directory must hold `config.json`, `tokenizer.json` and
/// `model.safetensors`, as published on the Hugging Face hub.
pub struct BertEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    hidden_size: usize,
    device: Device,
}

impl BertEmbedder {
    /// Texts longer than `max_length` tokens are truncated; shorter ones are
    /// padded to the longest text in their chunk.
    pub fn load(model_dir: &Path, max_length: usize, device: Device) -> Result<Self> {
        let config_text = std::fs::read_to_string(model_dir.join("config.json"))?;
        let dims: EncoderDims = serde_json::from_str(&config_text)?;
        let config: BertConfig = serde_json::from_str(&config_text)?;

        let mut tokenizer =
            Tokenizer::from_file(model_dir.join("tokenizer.json")).map_err(Error::tokenizer)?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(Error::tokenizer)?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        let weights = model_dir.join("model.safetensors");
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DTYPE, &device)? };
        let model = BertModel::load(vb, &config)?;

        info!(
            "Loaded encoder from {} (hidden size {}, max length {})",
            model_dir.display(),
            dims.hidden_size,
            max_length
        );

        Ok(BertEmbedder {
            model,
            tokenizer,
            hidden_size: dims.hidden_size,
            device,
        })
    }
}

impl Embedder for BertEmbedder {
    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Tensor> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(Error::tokenizer)?;

        let nseqs = encodings.len();
        let seqlen = encodings.first().map_or(0, |e| e.get_ids().len());
        let mut ids = Vec::with_capacity(nseqs * seqlen);
        let mut type_ids = Vec::with_capacity(nseqs * seqlen);
        let mut mask = Vec::with_capacity(nseqs * seqlen);
        for encoding in &encodings {
            ids.extend_from_slice(encoding.get_ids());
            type_ids.extend_from_slice(encoding.get_type_ids());
            mask.extend_from_slice(encoding.get_attention_mask());
        }

        let input_ids = Tensor::from_vec(ids, (nseqs, seqlen), &self.device)?;
        let token_type_ids = Tensor::from_vec(type_ids, (nseqs, seqlen), &self.device)?;
        let attention_mask = Tensor::from_vec(mask, (nseqs, seqlen), &self.device)?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // [nseqs, seqlen, hidden] -> [nseqs, hidden] at position 0
        Ok(hidden.narrow(1, 0, 1)?.squeeze(1)?.to_dtype(DType::F32)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::Cell;

    // Deterministic stand-in for a transformer: each text maps to a vector
    // derived from its bytes, independent of the other texts in the batch.
    pub(crate) struct HashEmbedder {
        pub dim: usize,
        pub calls: Cell<usize>,
        device: Device,
    }

    impl HashEmbedder {
        pub(crate) fn new(dim: usize) -> Self {
            HashEmbedder {
                dim,
                calls: Cell::new(0),
                device: Device::Cpu,
            }
        }

        pub(crate) fn vector(&self, text: &str) -> Vec<f32> {
            let mut h: u64 = 1469598103934665603;
            for b in text.bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(1099511628211);
            }
            (0..self.dim)
                .map(|j| {
                    let v = h.rotate_left(j as u32 * 7) % 1000;
                    v as f32 / 1000.0
                })
                .collect()
        }
    }

    impl Embedder for HashEmbedder {
        fn hidden_size(&self) -> usize {
            self.dim
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Tensor> {
            self.calls.set(self.calls.get() + 1);
            let data: Vec<f32> = texts.iter().flat_map(|text| self.vector(text)).collect();
            Ok(Tensor::from_vec(data, (texts.len(), self.dim), &self.device)?)
        }
    }

    #[test]
    fn test_embed_documents_preserves_count_and_order() {
        let embedder = HashEmbedder::new(8);
        let texts: Vec<String> = (0..23).map(|i| format!("article number {}", i)).collect();
        let texts: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();

        let embeddings = embed_documents(&embedder, &texts, 5).unwrap();
        assert_eq!(embeddings.dims2().unwrap(), (23, 8));
        assert_eq!(embedder.calls.get(), 5);

        let rows = embeddings.to_vec2::<f32>().unwrap();
        for (row, text) in rows.iter().zip(&texts) {
            assert_eq!(row, &embedder.vector(text));
        }
    }

    #[test]
    fn test_embed_documents_rejects_empty_input() {
        let embedder = HashEmbedder::new(4);
        assert!(matches!(
            embed_documents(&embedder, &[], 8),
            Err(Error::EmptyInput(_))
        ));
    }

    // Drops the last row of every batch.
    struct ShortEmbedder {
        device: Device,
    }

    impl Embedder for ShortEmbedder {
        fn hidden_size(&self) -> usize {
            4
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Tensor> {
            Ok(Tensor::zeros((texts.len() - 1, 4), DType::F32, &self.device)?)
        }
    }

    #[test]
    fn test_embed_documents_checks_row_count() {
        assert!(matches!(
            embed_documents(&ShortEmbedder { device: Device::Cpu }, &["a", "b"], 2),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
