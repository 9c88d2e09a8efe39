//! Store-backed entry points: train-and-save and attack-and-save.

use std::path::PathBuf;

use crate::config::{AttackConfig, AttackRequest, TrainConfig, TrainRequest, TRAIN_FRACTION};
use crate::error::TraceResult;
use crate::mia::{MiaEngine, MiaResult};
use crate::store::ResourceStore;
use crate::trainer::{Trainer, TrainingOutcome};

/// Trains on the member split of a stored corpus and stores the checkpoint.
///
/// `base` supplies every setting the request does not carry (seed, model
/// widths, tokenizer policy, ...).
pub fn train_checkpoint(
    store: &ResourceStore,
    request: &TrainRequest,
    base: TrainConfig,
) -> TraceResult<(TrainingOutcome, PathBuf)> {
    let config = request.validate(base)?;
    let corpus = store.load_corpus(&request.corpus_name)?;
    let members = corpus.training_split(TRAIN_FRACTION);
    tracing::info!(
        corpus = corpus.name(),
        total = corpus.len(),
        members = members.len(),
        "training on member split"
    );
    let outcome = Trainer::new(config)?.train(&members, &request.resolved_checkpoint_name())?;
    let path = store.save_checkpoint(&outcome.checkpoint)?;
    Ok((outcome, path))
}

/// Attacks a stored checkpoint with the member/held-out split of a stored
/// corpus and stores the report.
pub fn run_attack(
    store: &ResourceStore,
    request: &AttackRequest,
    base: AttackConfig,
) -> TraceResult<(MiaResult, PathBuf)> {
    let engine = MiaEngine::new(request.validate(base)?)?;
    let checkpoint = store.load_checkpoint(&request.checkpoint_name)?;
    let corpus = store.load_corpus(&request.corpus_name)?;
    if checkpoint.corpus() != corpus.name() {
        tracing::warn!(
            trained_on = checkpoint.corpus(),
            attacked_with = corpus.name(),
            "checkpoint was trained on a different corpus; member labels may be wrong"
        );
    }
    let (members, non_members) = corpus.split(TRAIN_FRACTION);
    let custom = request.custom_sentences();
    let result = engine.run(
        &checkpoint,
        corpus.name(),
        members,
        non_members,
        custom.as_deref(),
    )?;
    let path = store.save_attack(&result)?;
    Ok((result, path))
}
