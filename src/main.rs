//! Command-line front end: store corpora, train checkpoints, run attacks.

use whisper_trace::config::TRAIN_FRACTION;
use whisper_trace::mia::LEGACY_MAX_LOSS;
use whisper_trace::pipeline::{run_attack, train_checkpoint};
use whisper_trace::{
    AttackConfig, AttackRequest, Corpus, EarlyStopping, ModelConfig, Normalization,
    ResourceStore, ThresholdRule, TokenizerConfig, TraceError, TrainConfig, TrainRequest,
};

use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

// --- Configuration Structs ---

#[derive(Parser, Debug, Clone)]
struct StoreConfig {
    #[clap(long, default_value = "resource", help = "Root directory of the resource store")]
    store: PathBuf,
}

#[derive(Parser, Debug, Clone)]
struct ModelArgs {
    #[clap(long, default_value = "128", help = "Dimension of word embeddings")]
    embedding_dim: usize,
    #[clap(long, default_value = "256", help = "Width of the LSTM hidden state")]
    hidden_dim: usize,
}

#[derive(Parser, Debug, Clone)]
struct TrainArgs {
    #[clap(long, help = "Stored corpus to train on (its first 70% is used)")]
    corpus: String,
    #[clap(long, default_value = "100", help = "Full passes over the training split")]
    epochs: usize,
    #[clap(long, default_value = "64", help = "Sentences per optimizer step")]
    batch_size: usize,
    #[clap(long, default_value = "0.002", help = "Adam learning rate")]
    learning_rate: f64,
    #[clap(long, help = "Prefix for the generated checkpoint name")]
    name: Option<String>,
    #[clap(long, default_value = "42", help = "Seed for initialisation and shuffling")]
    seed: u64,
    #[clap(long, default_value = "1", help = "Minimum word count to enter the vocabulary")]
    min_freq: usize,
    #[clap(long, help = "Keep corpus order instead of shuffling every epoch")]
    no_shuffle: bool,
    #[clap(long, help = "Clip gradients to this global norm")]
    max_grad_norm: Option<f64>,
    #[clap(long, help = "Stop after this many epochs without improvement")]
    patience: Option<usize>,
    #[clap(long, default_value = "0.0", help = "Smallest loss decrease that counts as improvement")]
    min_delta: f64,
    #[clap(long, help = "Keep letter case when tokenizing")]
    keep_case: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum RuleArg {
    Youden,
    MedianMidpoint,
    Fixed,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum NormArg {
    MinMax,
    Logistic,
    Linear,
}

#[derive(Parser, Debug, Clone)]
struct AttackArgs {
    #[clap(long, help = "Stored checkpoint to attack")]
    checkpoint: String,
    #[clap(long, help = "Stored corpus providing member and held-out sentences")]
    corpus: String,
    #[clap(long, default_value = "64", help = "Sentences scored per batch")]
    batch_size: usize,
    #[clap(long, help = "Sentences to classify, separated by '|'")]
    input: Option<String>,
    #[clap(long, value_enum, default_value = "youden", help = "How the loss cutoff is chosen")]
    threshold_rule: RuleArg,
    #[clap(long, help = "Loss cutoff for --threshold-rule fixed")]
    cutoff: Option<f64>,
    #[clap(long, value_enum, default_value = "min-max", help = "Loss to score rescaling")]
    normalization: NormArg,
    #[clap(long, help = "Loss mapped to score 0 by --normalization linear (default 17)")]
    max_loss: Option<f64>,
}

// --- CLI Commands ---

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
enum Cli {
    /// Store a corpus from a text file (one sentence per line)
    AddCorpus {
        #[clap(flatten)]
        store: StoreConfig,
        #[clap(long, help = "Name to store the corpus under")]
        name: String,
        #[clap(long, help = "Text file with one sentence per line")]
        file: PathBuf,
    },
    /// List stored corpora
    Corpora {
        #[clap(flatten)]
        store: StoreConfig,
    },
    /// Train a checkpoint on a stored corpus
    Train {
        #[clap(flatten)]
        store: StoreConfig,
        #[clap(flatten)]
        model: ModelArgs,
        #[clap(flatten)]
        train: TrainArgs,
    },
    /// List stored checkpoints
    Checkpoints {
        #[clap(flatten)]
        store: StoreConfig,
    },
    /// Run a membership inference attack against a checkpoint
    Attack {
        #[clap(flatten)]
        store: StoreConfig,
        #[clap(flatten)]
        attack: AttackArgs,
    },
    /// List stored attack runs
    Attacks {
        #[clap(flatten)]
        store: StoreConfig,
    },
}

// --- Argument Conversion ---

fn train_config(model: &ModelArgs, args: &TrainArgs) -> TrainConfig {
    TrainConfig {
        seed: args.seed,
        shuffle: !args.no_shuffle,
        model: ModelConfig {
            embedding_dim: model.embedding_dim,
            hidden_dim: model.hidden_dim,
        },
        tokenizer: TokenizerConfig {
            lowercase: !args.keep_case,
            ..TokenizerConfig::default()
        },
        min_freq: args.min_freq,
        max_grad_norm: args.max_grad_norm,
        early_stopping: args.patience.map(|patience| EarlyStopping {
            patience,
            min_delta: args.min_delta,
        }),
        ..TrainConfig::default()
    }
}

fn attack_config(args: &AttackArgs) -> Result<AttackConfig, TraceError> {
    let threshold_rule = match (args.threshold_rule, args.cutoff) {
        (RuleArg::Youden, _) => ThresholdRule::Youden,
        (RuleArg::MedianMidpoint, _) => ThresholdRule::MedianMidpoint,
        (RuleArg::Fixed, Some(cutoff)) => ThresholdRule::Fixed(cutoff),
        (RuleArg::Fixed, None) => {
            return Err(TraceError::Configuration(
                "--threshold-rule fixed needs --cutoff".into(),
            ))
        }
    };
    let normalization = match args.normalization {
        NormArg::MinMax => Normalization::MinMax,
        NormArg::Logistic => Normalization::Logistic,
        NormArg::Linear => Normalization::Linear {
            max_loss: args.max_loss.unwrap_or(LEGACY_MAX_LOSS),
        },
    };
    Ok(AttackConfig {
        batch_size: args.batch_size,
        threshold_rule,
        normalization,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), TraceError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// --- Main Logic ---

fn main() -> Result<(), TraceError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("whisper_trace=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse() {
        Cli::AddCorpus { store, name, file } => {
            let store = ResourceStore::open(store.store)?;
            let corpus = Corpus::from_text(name, &fs::read_to_string(&file)?);
            let path = store.save_corpus(&corpus)?;
            let (members, held_out) = corpus.split(TRAIN_FRACTION);
            println!(
                "{}: {} sentences ({} member, {} held out) -> {}",
                corpus.name(),
                corpus.len(),
                members.len(),
                held_out.len(),
                path.display()
            );
        }
        Cli::Corpora { store } => {
            for name in ResourceStore::open(store.store)?.list_corpora()? {
                println!("{name}");
            }
        }
        Cli::Train { store, model, train } => {
            let store = ResourceStore::open(store.store)?;
            let request = TrainRequest {
                corpus_name: train.corpus.clone(),
                epochs: train.epochs,
                batch_size: train.batch_size,
                learning_rate: train.learning_rate,
                checkpoint_name: train.name.clone(),
            };
            let (outcome, path) = train_checkpoint(&store, &request, train_config(&model, &train))?;
            println!(
                "{} (final loss {:.4}) -> {}",
                outcome.checkpoint.name(),
                outcome.epoch_losses.last().copied().unwrap_or(f64::NAN),
                path.display()
            );
        }
        Cli::Checkpoints { store } => {
            print_json(&ResourceStore::open(store.store)?.list_checkpoints()?)?;
        }
        Cli::Attack { store, attack } => {
            let store = ResourceStore::open(store.store)?;
            let base = attack_config(&attack)?;
            let request = AttackRequest {
                checkpoint_name: attack.checkpoint,
                corpus_name: attack.corpus,
                batch_size: attack.batch_size,
                input: attack.input,
            };
            let (result, path) = run_attack(&store, &request, base)?;
            print_json(&result)?;
            eprintln!("report written to {}", path.display());
        }
        Cli::Attacks { store } => {
            print_json(&ResourceStore::open(store.store)?.list_attacks()?)?;
        }
    }

    Ok(())
}
