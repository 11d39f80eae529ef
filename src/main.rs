use anyhow::Context;
use candle_core::Device;
use clap::Parser;
use env_logger::Env;
use log::info;
use std::path::PathBuf;

mod config;
mod corpus;
mod error;
mod evaluate;
mod kmeans;
mod model;
mod output;
mod pipeline;
mod schemas;

use config::{AutoencoderConfig, DecConfig, KMeansConfig, PipelineConfig, TargetUpdate, TsneConfig};
use corpus::{read_documents, CorpusColumns, Split};
use evaluate::{contingency, write_scatter_svg};
use model::embedder::BertEmbedder;
use output::{write_assignments, AssignmentTable};
use schemas::TableFormat;

#[derive(Parser, Debug)]
#[command(name = "newsclust")]
#[command(about = "Cluster news articles with deep embedded clustering over transformer embeddings.")]
struct Args {
    /// Labeled corpus as csv, csv.gz, or parquet
    corpus: String,

    /// Directory with config.json, tokenizer.json, and model.safetensors
    model_dir: PathBuf,

    /// Read the corpus as headerless AG News (class index, title, description)
    #[arg(long, default_value_t = false)]
    ag_news: bool,

    #[arg(long, default_value = "label")]
    label_column: String,

    /// Columns joined with a space to form each document's text
    #[arg(long, num_args = 1.., default_value = "text")]
    text_column: Vec<String>,

    #[arg(long, default_value_t = false)]
    no_header: bool,

    /// Subtracted from integer labels
    #[arg(long, default_value_t = 0)]
    label_offset: usize,

    /// Row range to use, e.g. 0..2000
    #[arg(long, default_value = "..")]
    split: Split,

    #[arg(long, value_enum, default_value_t = TableFormat::Infer)]
    corpus_fmt: TableFormat,

    #[arg(long, default_value = "newsclust-assignments.csv.gz")]
    output_assignments: String,

    #[arg(long, value_enum, default_value_t = TableFormat::Infer)]
    output_assignments_fmt: TableFormat,

    #[arg(long, default_value = "newsclust-tsne.svg")]
    output_plot: PathBuf,

    #[arg(long, default_value = "DEC Clustering of News Articles")]
    plot_title: String,

    /// Maximum number of tokens per document
    #[arg(long, default_value_t = 128)]
    max_length: usize,

    #[arg(long, default_value_t = 32)]
    embed_chunk_size: usize,

    #[arg(long, default_value_t = 256)]
    hidden_dim: usize,

    #[arg(long, default_value_t = 64)]
    latent_dim: usize,

    #[arg(long, default_value_t = 1e-3)]
    autoencoder_learning_rate: f64,

    #[arg(long, default_value_t = 256)]
    autoencoder_batch_size: usize,

    #[arg(long, default_value_t = 20)]
    autoencoder_epochs: usize,

    #[arg(short = 'k', long, default_value_t = 4)]
    nclusters: usize,

    #[arg(long, default_value_t = 10)]
    kmeans_n_init: usize,

    #[arg(long, default_value_t = 300)]
    kmeans_max_iter: usize,

    #[arg(long, default_value_t = 1e-4)]
    kmeans_tolerance: f32,

    #[arg(long, default_value_t = 1e-4)]
    dec_learning_rate: f64,

    #[arg(long, default_value_t = 256)]
    dec_batch_size: usize,

    #[arg(long, default_value_t = 10)]
    dec_epochs: usize,

    /// Degrees of freedom of the Student's t kernel
    #[arg(long, default_value_t = 1.0)]
    alpha: f64,

    /// Recompute the DEC target over the whole corpus every this many
    /// epochs instead of from each minibatch
    #[arg(long, default_value = None)]
    target_update_interval: Option<usize>,

    #[arg(long, default_value_t = 30.0)]
    perplexity: f64,

    #[arg(long, default_value_t = 1000)]
    tsne_iterations: usize,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    #[arg(short = 't', long, default_value = None)]
    nthreads: Option<usize>,
}

impl Args {
    fn corpus_columns(&self) -> CorpusColumns {
        if self.ag_news {
            return CorpusColumns::ag_news();
        }
        CorpusColumns {
            label: self.label_column.clone(),
            text: self.text_column.clone(),
            has_header: !self.no_header,
            label_offset: self.label_offset,
            label_names: None,
        }
    }

    fn pipeline_config(&self) -> PipelineConfig {
        let target_update = match self.target_update_interval {
            Some(interval) => TargetUpdate::Dataset {
                interval: interval.max(1),
            },
            None => TargetUpdate::Batch,
        };

        PipelineConfig {
            embed_chunk_size: self.embed_chunk_size,
            autoencoder: AutoencoderConfig {
                hidden_dim: self.hidden_dim,
                latent_dim: self.latent_dim,
                learning_rate: self.autoencoder_learning_rate,
                batch_size: self.autoencoder_batch_size,
                epochs: self.autoencoder_epochs,
                seed: 0,
            },
            kmeans: KMeansConfig {
                nclusters: self.nclusters,
                n_init: self.kmeans_n_init,
                max_iter: self.kmeans_max_iter,
                tolerance: self.kmeans_tolerance,
                seed: 0,
            },
            dec: DecConfig {
                learning_rate: self.dec_learning_rate,
                batch_size: self.dec_batch_size,
                epochs: self.dec_epochs,
                alpha: self.alpha,
                target_update,
                seed: 0,
            },
            tsne: TsneConfig {
                perplexity: self.perplexity,
                max_iter: self.tsne_iterations,
                ..TsneConfig::default()
            },
        }
        .with_seed(self.seed)
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(Env::default().filter_or("RUST_LOG", "info"));
    let args = Args::parse();

    if let Some(nthreads) = args.nthreads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .build_global()
            .context("setting up thread pool")?;
    }
    info!("Using {} threads", rayon::current_num_threads());

    let columns = args.corpus_columns();
    let documents = read_documents(&args.corpus, args.corpus_fmt, &columns, args.split)
        .with_context(|| format!("reading corpus from {}", args.corpus))?;
    info!("Read {} documents", documents.len());

    let device = Device::Cpu;
    let embedder = BertEmbedder::load(&args.model_dir, args.max_length, device)
        .with_context(|| format!("loading encoder from {}", args.model_dir.display()))?;

    let config = args.pipeline_config();
    let result = pipeline::run(&config, &documents, &embedder).context("clustering")?;

    let labels: Vec<usize> = documents.iter().map(|doc| doc.label).collect();
    let table = contingency(&labels, &result.clusters)?;
    info!("Label x cluster counts:");
    for (label, row) in table.outer_iter().enumerate() {
        let name = documents
            .iter()
            .find(|doc| doc.label == label)
            .and_then(|doc| doc.label_name.clone())
            .unwrap_or_else(|| label.to_string());
        info!("  {:>12}: {:?}", name, row.to_vec());
    }

    let assignments = AssignmentTable::new(&documents, &result.clusters, &result.confidence, &result.tsne)?;
    write_assignments(&args.output_assignments, args.output_assignments_fmt, &assignments)
        .with_context(|| format!("writing {}", args.output_assignments))?;

    write_scatter_svg(&args.output_plot, &result.tsne, &result.clusters, &args.plot_title)
        .with_context(|| format!("writing {}", args.output_plot.display()))?;
    info!("Wrote plot to {}", args.output_plot.display());

    Ok(())
}
