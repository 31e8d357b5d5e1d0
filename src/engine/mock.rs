/// Mock inference engine for testing purposes.
///
/// Tokenizes on whitespace, derives deterministic embeddings from token
/// hashes and counts every model and context it hands out, so tests can check
/// that nothing leaks. Faults can be injected at each pipeline step.
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, PoisonError};

use anyhow::{Result, bail};

use super::{Batch, ContextParams, Engine, InferenceContext, LoadedModel, ModelParams, Token, Vocabulary};

/// Token the vocabulary prepends when special tokens are requested.
pub const BOS_TOKEN: Token = 1;

const VOCAB_SIZE: u64 = 32_000;

/// Faults the mock engine injects. Word triggers match whole
/// whitespace-separated words of the input text.
#[derive(Debug, Clone, Default)]
pub struct MockFaults {
    pub panic_on_load: bool,
    pub missing_vocab: bool,
    pub context_fails: bool,
    /// Sizing pass returns a negative count.
    pub fail_sizing_on: Option<String>,
    /// Fill pass returns a negative count.
    pub fail_fill_on: Option<String>,
    pub fail_decode_on: Option<String>,
    pub null_embeddings_on: Option<String>,
    /// Panics inside `decode` while the context is live.
    pub panic_decode_on: Option<String>,
    /// Holds every `decode` until the test releases it.
    pub decode_gate: Option<Arc<DecodeGate>>,
}

/// Rendezvous that parks a decode mid-call so a test can act while an embed
/// is in flight.
#[derive(Debug)]
pub struct DecodeGate {
    entered: Barrier,
    release: Barrier,
}

impl DecodeGate {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Barrier::new(2),
            release: Barrier::new(2),
        })
    }

    /// Block until a decode has started and is waiting on the gate.
    pub fn wait_entered(&self) {
        self.entered.wait();
    }

    /// Let the parked decode continue.
    pub fn release(&self) {
        self.release.wait();
    }

    fn pass(&self) {
        self.entered.wait();
        self.release.wait();
    }
}

/// Resource and call counters shared by an engine and all its models.
#[derive(Debug, Default)]
pub struct MockStats {
    pub models_live: AtomicUsize,
    pub models_loaded: AtomicUsize,
    pub contexts_live: AtomicUsize,
    pub contexts_created: AtomicUsize,
    pub tokenize_calls: AtomicUsize,
    pub decode_calls: AtomicUsize,
    pub last_n_ctx: AtomicU32,
    last_outputs: Mutex<Vec<bool>>,
}

impl MockStats {
    /// Number of engine entry points invoked so far.
    #[must_use]
    pub fn engine_calls(&self) -> usize {
        self.models_loaded.load(Ordering::SeqCst)
            + self.contexts_created.load(Ordering::SeqCst)
            + self.tokenize_calls.load(Ordering::SeqCst)
            + self.decode_calls.load(Ordering::SeqCst)
    }

    /// Output flags of the most recently decoded batch.
    #[must_use]
    pub fn last_outputs(&self) -> Vec<bool> {
        self.last_outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct MockEngine {
    dimensions: usize,
    add_bos: bool,
    n_ctx_train: i32,
    faults: MockFaults,
    stats: Arc<MockStats>,
}

impl MockEngine {
    /// Create a new `MockEngine` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            add_bos: true,
            n_ctx_train: 512,
            faults: MockFaults::default(),
            stats: Arc::new(MockStats::default()),
        }
    }

    #[must_use]
    pub fn with_faults(mut self, faults: MockFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Vocabulary without a beginning-of-sequence token.
    #[must_use]
    pub fn without_bos(mut self) -> Self {
        self.add_bos = false;
        self
    }

    #[must_use]
    pub fn with_n_ctx_train(mut self, n_ctx_train: i32) -> Self {
        self.n_ctx_train = n_ctx_train;
        self
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<MockStats> {
        &self.stats
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new(384)
    }
}

impl Engine for MockEngine {
    type Model = MockModel;

    fn load_model(&self, path: &Path, _params: &ModelParams) -> Result<MockModel> {
        if self.faults.panic_on_load {
            panic!("mock engine crashed while loading {}", path.display());
        }
        if !path.is_file() {
            bail!("model file not found: {}", path.display());
        }
        if path.metadata()?.len() == 0 {
            bail!("model file is empty: {}", path.display());
        }

        self.stats.models_loaded.fetch_add(1, Ordering::SeqCst);
        self.stats.models_live.fetch_add(1, Ordering::SeqCst);

        Ok(MockModel {
            dimensions: self.dimensions,
            add_bos: self.add_bos,
            n_ctx_train: self.n_ctx_train,
            faults: self.faults.clone(),
            stats: Arc::clone(&self.stats),
        })
    }
}

#[derive(Debug)]
pub struct MockModel {
    dimensions: usize,
    add_bos: bool,
    n_ctx_train: i32,
    faults: MockFaults,
    stats: Arc<MockStats>,
}

impl Drop for MockModel {
    fn drop(&mut self) {
        self.stats.models_live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl LoadedModel for MockModel {
    type Vocab<'m> = MockVocab<'m>;
    type Context<'m> = MockContext<'m>;

    fn vocab(&self) -> Option<MockVocab<'_>> {
        (!self.faults.missing_vocab).then_some(MockVocab { model: self })
    }

    fn new_context(&self, params: &ContextParams) -> Option<MockContext<'_>> {
        self.stats.contexts_created.fetch_add(1, Ordering::SeqCst);
        if self.faults.context_fails || !params.embeddings {
            return None;
        }
        self.stats.last_n_ctx.store(params.n_ctx, Ordering::SeqCst);
        self.stats.contexts_live.fetch_add(1, Ordering::SeqCst);
        Some(MockContext {
            model: self,
            embedding: None,
        })
    }

    fn n_embd(&self) -> i32 {
        self.dimensions as i32
    }

    fn n_ctx_train(&self) -> i32 {
        self.n_ctx_train
    }
}

pub struct MockVocab<'m> {
    model: &'m MockModel,
}

impl Vocabulary for MockVocab<'_> {
    fn tokenize(
        &self,
        text: &[u8],
        tokens: &mut [Token],
        add_special: bool,
        _parse_special: bool,
    ) -> i32 {
        self.model.stats.tokenize_calls.fetch_add(1, Ordering::SeqCst);

        let faults = &self.model.faults;
        let sizing = tokens.is_empty();
        if sizing && contains_word(text, faults.fail_sizing_on.as_deref()) {
            return -1;
        }
        if !sizing && contains_word(text, faults.fail_fill_on.as_deref()) {
            return -1;
        }

        let mut ids = Vec::new();
        if add_special && self.model.add_bos {
            ids.push(BOS_TOKEN);
        }
        ids.extend(words(text).map(word_token));

        for (slot, id) in tokens.iter_mut().zip(&ids) {
            *slot = *id;
        }
        ids.len() as i32
    }
}

pub struct MockContext<'m> {
    model: &'m MockModel,
    embedding: Option<Vec<f32>>,
}

impl Drop for MockContext<'_> {
    fn drop(&mut self) {
        self.model.stats.contexts_live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InferenceContext for MockContext<'_> {
    fn decode(&mut self, batch: &Batch) -> i32 {
        let stats = &self.model.stats;
        stats.decode_calls.fetch_add(1, Ordering::SeqCst);
        *stats
            .last_outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = batch.outputs().to_vec();

        let faults = &self.model.faults;
        if let Some(gate) = &faults.decode_gate {
            gate.pass();
        }
        if batch_has_word(batch, faults.panic_decode_on.as_deref()) {
            panic!("mock engine crashed during decode");
        }
        if batch.is_empty() || batch_has_word(batch, faults.fail_decode_on.as_deref()) {
            return -1;
        }
        if batch_has_word(batch, faults.null_embeddings_on.as_deref()) {
            self.embedding = None;
            return 0;
        }

        self.embedding = batch
            .output_position()
            .map(|last| hashed_embedding(&batch.tokens()[..=last], self.model.dimensions));
        0
    }

    fn embeddings(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }
}

fn words(text: &[u8]) -> impl Iterator<Item = &[u8]> {
    text.split(u8::is_ascii_whitespace).filter(|w| !w.is_empty())
}

fn word_token(word: &[u8]) -> Token {
    let mut hasher = DefaultHasher::new();
    word.hash(&mut hasher);
    // Ids 0 and 1 are reserved.
    (hasher.finish() % VOCAB_SIZE) as Token + 2
}

fn contains_word(text: &[u8], trigger: Option<&str>) -> bool {
    trigger.is_some_and(|t| words(text).any(|w| w == t.as_bytes()))
}

fn batch_has_word(batch: &Batch, trigger: Option<&str>) -> bool {
    trigger.is_some_and(|t| batch.tokens().contains(&word_token(t.as_bytes())))
}

/// Deterministic unit vector seeded by the token sequence.
fn hashed_embedding(tokens: &[Token], dimensions: usize) -> Vec<f32> {
    let mut embedding = Vec::with_capacity(dimensions);
    let mut block = 0u64;
    while embedding.len() < dimensions {
        let mut hasher = DefaultHasher::new();
        tokens.hash(&mut hasher);
        block.hash(&mut hasher);
        let bytes = hasher.finish().to_le_bytes();
        for b in bytes.iter().take(dimensions - embedding.len()) {
            embedding.push(f32::from(*b) / 255.0 - 0.5);
        }
        block += 1;
    }

    // L2 normalize
    let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
    if norm_sq > 0.0 {
        let inv = 1.0 / norm_sq.sqrt();
        for v in &mut embedding {
            *v *= inv;
        }
    }
    embedding
}
