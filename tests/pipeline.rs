use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use whisper_trace::pipeline::{run_attack, train_checkpoint};
use whisper_trace::{
    AttackConfig, AttackRequest, Checkpoint, Corpus, LossScorer, MiaEngine, ModelConfig,
    ResourceStore, TraceError, TrainConfig, TrainRequest, Trainer,
};

fn small_model() -> ModelConfig {
    ModelConfig {
        embedding_dim: 8,
        hidden_dim: 12,
    }
}

fn train(sentences: &[&str], epochs: usize, batch_size: usize, lr: f64) -> Checkpoint {
    let config = TrainConfig {
        epochs,
        batch_size,
        learning_rate: lr,
        model: small_model(),
        ..TrainConfig::default()
    };
    Trainer::new(config)
        .unwrap()
        .train(&Corpus::new("toy", sentences), "toy")
        .unwrap()
        .checkpoint
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn scratch_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("whisper-trace-{tag}-{}-{nanos}", std::process::id()))
}

#[test]
fn toy_corpus_end_to_end() {
    let members = ["the cat sat", "the dog ran"];
    let config = TrainConfig {
        epochs: 1,
        batch_size: 2,
        model: small_model(),
        ..TrainConfig::default()
    };
    let outcome = Trainer::new(config)
        .unwrap()
        .train(&Corpus::new("toy", members), "toy__1__2__0.002")
        .unwrap();
    assert!(outcome.epoch_losses[0] > 0.0);
    assert!(outcome.epoch_losses[0].is_finite());

    let engine = MiaEngine::new(AttackConfig {
        batch_size: 2,
        ..AttackConfig::default()
    })
    .unwrap();
    let result = engine
        .run(
            &outcome.checkpoint,
            "toy",
            &strings(&members),
            &strings(&["a bird flew"]),
            None,
        )
        .unwrap();

    assert!((0.0..=1.0).contains(&result.auc));
    assert_eq!(result.sentences.len(), 3);
    assert_eq!(result.sentences[2].content, "a bird flew");
    for s in &result.sentences {
        assert!(s.loss >= 0.0);
        assert!((0.0..=1.0).contains(&s.normalized_score));
        assert_eq!(s.is_member, s.loss <= result.threshold);
    }
}

#[test]
fn custom_sentence_of_unknown_words_is_scored() {
    let checkpoint = train(&["the cat sat", "the dog ran"], 2, 2, 0.01);
    let custom = strings(&["completely unseen text about quantum gravity"]);
    let result = MiaEngine::default()
        .run(
            &checkpoint,
            "toy",
            &strings(&["the cat sat", "the dog ran"]),
            &strings(&["a bird flew"]),
            Some(custom.as_slice()),
        )
        .unwrap();
    assert_eq!(result.sentences.len(), 1);
    let record = &result.sentences[0];
    assert!(record.loss.is_finite() && record.loss >= 0.0);
    assert!((0.0..=1.0).contains(&record.normalized_score));
}

#[test]
fn overfit_model_separates_members() {
    let members = [
        "alice paints portraits in watercolor at dawn",
        "bob repairs old bicycles every sunday",
        "carol designs landscapes in charcoal on weekends",
        "dave writes poems about the sea",
        "erin bakes sourdough bread before work",
        "frank plays chess with his neighbour",
    ];
    let held_out = [
        "mallory composes melodies with strings at night",
        "nikola builds pipelines with privacy first design",
        "oscar collects stamps from distant islands",
        "peggy studies the migration of swallows",
    ];
    let checkpoint = train(&members, 120, 3, 0.02);
    let result = MiaEngine::default()
        .run(&checkpoint, "toy", &strings(&members), &strings(&held_out), None)
        .unwrap();
    assert!(result.auc > 0.75, "auc {}", result.auc);
    assert_eq!(result.sentences.len(), members.len() + held_out.len());
}

#[test]
fn empty_split_is_insufficient_data() {
    let checkpoint = train(&["the cat sat"], 1, 1, 0.01);
    let err = MiaEngine::default()
        .run(&checkpoint, "toy", &strings(&["the cat sat"]), &[], None)
        .unwrap_err();
    assert!(matches!(
        err,
        TraceError::InsufficientData {
            members: 1,
            non_members: 0
        }
    ));
}

#[test]
fn scoring_twice_gives_identical_losses() {
    let checkpoint = train(&["the cat sat", "the dog ran"], 3, 2, 0.01);
    let scorer = LossScorer::from_checkpoint(&checkpoint);
    let sentences = strings(&["the cat ran", "a dog sat", "zebra"]);
    let first = scorer.score_sentences("adhoc", &sentences, 2).unwrap();
    let second = scorer.score_sentences("adhoc", &sentences, 3).unwrap();
    assert_eq!(first, second);
}

#[test]
fn checkpoint_survives_serialization_and_scores_the_same() {
    let checkpoint = train(&["the cat sat", "the dog ran"], 2, 2, 0.01);
    let restored = Checkpoint::deserialize(&checkpoint.serialize().unwrap()).unwrap();
    let a = LossScorer::from_checkpoint(&checkpoint)
        .score_sentence("the cat sat")
        .unwrap();
    let b = LossScorer::from_checkpoint(&restored)
        .score_sentence("the cat sat")
        .unwrap();
    assert_eq!(a.to_bits(), b.to_bits());
}

#[test]
fn store_backed_train_and_attack() {
    let root = scratch_dir("pipeline");
    let store = ResourceStore::open(&root).unwrap();
    let corpus = Corpus::new(
        "pets",
        [
            "the cat sat on the mat",
            "the dog ran in the park",
            "a bird flew over the house",
            "the fish swam in the bowl",
            "a horse ate the hay",
            "the mouse hid under the bed",
            "a frog jumped into the pond",
            "the cow slept in the barn",
            "a goat climbed the hill",
            "the duck swam across the lake",
        ],
    );
    store.save_corpus(&corpus).unwrap();
    assert_eq!(store.list_corpora().unwrap(), vec!["pets".to_string()]);
    assert_eq!(store.load_corpus("pets").unwrap(), corpus);

    let mut request = TrainRequest::new("pets");
    request.epochs = 2;
    request.batch_size = 4;
    request.learning_rate = 0.01;
    let base = TrainConfig {
        model: small_model(),
        ..TrainConfig::default()
    };
    let (outcome, path) = train_checkpoint(&store, &request, base).unwrap();
    assert!(path.exists());
    assert_eq!(outcome.checkpoint.name(), "pets__2__4__0.01");

    let listed = store.list_checkpoints().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].corpus, "pets");
    assert_eq!((listed[0].epochs, listed[0].batch_size), (2, 4));

    let attack = AttackRequest {
        checkpoint_name: outcome.checkpoint.name().to_string(),
        corpus_name: "pets".into(),
        batch_size: 4,
        input: Some("the cat sat on the mat | quantum gravity".into()),
    };
    let (result, dir) = run_attack(&store, &attack, AttackConfig::default()).unwrap();
    assert_eq!((result.members, result.non_members), (7, 3));
    assert_eq!(result.sentences.len(), 2);
    assert!(dir.join("output.csv").exists());
    let csv = std::fs::read_to_string(dir.join("output.csv")).unwrap();
    assert!(csv.starts_with("content,is_member,loss,normalized_score\n"));
    assert_eq!(csv.lines().count(), 3);

    let attacks = store.list_attacks().unwrap();
    assert_eq!(attacks.len(), 1);
    assert_eq!(attacks[0].checkpoint, "pets__2__4__0.01");
    assert_eq!(attacks[0].corpus, "pets");
    let report = store.load_attack(&attacks[0].id).unwrap();
    assert_eq!(report.checkpoint, result.checkpoint);
    assert_eq!(report.sentences.len(), result.sentences.len());
    assert!((report.auc - result.auc).abs() < 1e-9);

    std::fs::remove_dir_all(&root).unwrap();
}

#[test]
fn missing_resources_are_reported_by_name() {
    let root = scratch_dir("missing");
    let store = ResourceStore::open(&root).unwrap();
    assert!(matches!(
        store.load_corpus("nope"),
        Err(TraceError::CorpusNotFound(name)) if name == "nope"
    ));
    assert!(matches!(
        store.load_checkpoint("nope__1__1__0.1"),
        Err(TraceError::CheckpointNotFound(_))
    ));
    let request = TrainRequest::new("nope");
    assert!(matches!(
        train_checkpoint(&store, &request, TrainConfig::default()),
        Err(TraceError::CorpusNotFound(_))
    ));
    std::fs::remove_dir_all(&root).unwrap();
}
