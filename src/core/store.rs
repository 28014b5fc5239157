//! Vocabulary store: resolves artifact references to files, parses them once,
//! and keeps the parsed vocabularies in a bounded LRU cache.
//!
//! Concurrent loads of the same key collapse onto a single parse. A load in
//! flight owns a slot guarded by its own mutex; the first caller to lock an
//! empty slot parses while later callers wait on the same lock and then reuse
//! the result. In-flight slots live outside the LRU, so eviction never splits
//! a load in two. A failed load leaves nothing behind: waiters start a fresh
//! round and later calls retry.

use lru::LruCache;
use rustc_hash::FxHashMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::bpe::RankedVocab;
use super::catalog::Encoding;
use super::config::EngineConfig;
use super::error::TokenizerError;
use super::pattern::Pattern;
use super::special::SpecialTokens;
use super::subword::{SubwordVocab, TokenizerConfig};
use super::vocab::{RankTable, VocabError, Vocabulary};

const HUB_BASE_URL: &str = "https://huggingface.co";
const TIKTOKEN_BASE_URL: &str = "https://openaipublic.blob.core.windows.net/encodings";

/// Location of one vocabulary's artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactRef {
    RankTable(Encoding),
    Hub { repo: String, revision: String },
}

impl ArtifactRef {
    pub fn cache_key(&self) -> String {
        match self {
            ArtifactRef::RankTable(encoding) => format!("tiktoken:{}", encoding.name()),
            ArtifactRef::Hub { repo, revision } => format!("hf:{}@{}", repo, revision),
        }
    }

    /// Files backing this artifact under `root`, required ones first.
    pub fn files(&self, root: &Path) -> Vec<ArtifactFile> {
        match self {
            ArtifactRef::RankTable(encoding) => {
                let name = format!("{}.tiktoken", encoding.rank_file());
                vec![ArtifactFile {
                    path: root.join("tiktoken").join(&name),
                    url: format!("{}/{}", TIKTOKEN_BASE_URL, name),
                    name,
                    required: true,
                }]
            }
            ArtifactRef::Hub { repo, revision } => {
                let mut dir = root.join("hf").join(repo);
                if revision != "main" {
                    dir = dir.join("revisions").join(revision.replace('/', "_"));
                }
                [("tokenizer.json", true), ("tokenizer_config.json", false)]
                    .into_iter()
                    .map(|(name, required)| ArtifactFile {
                        name: name.to_string(),
                        path: dir.join(name),
                        url: format!("{}/{}/resolve/{}/{}", HUB_BASE_URL, repo, revision, name),
                        required,
                    })
                    .collect()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub name: String,
    /// Where the store expects the file.
    pub path: PathBuf,
    /// Where a fetcher can download it from.
    pub url: String,
    pub required: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FetchError {
    pub message: String,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Materialises missing artifact files at [`ArtifactFile::path`].
///
/// The store never touches the network itself; downloading, retry policy
/// and credentials belong to the implementor.
pub trait ArtifactFetcher: Send + Sync {
    fn fetch(&self, file: &ArtifactFile) -> Result<(), FetchError>;
}

type Slot = Arc<Mutex<Option<Arc<Vocabulary>>>>;

pub struct VocabularyStore {
    root: PathBuf,
    cache: Mutex<LruCache<String, Arc<Vocabulary>>>,
    inflight: Mutex<FxHashMap<String, Slot>>,
    fetcher: Option<Box<dyn ArtifactFetcher>>,
    parses: AtomicUsize,
}

impl std::fmt::Debug for VocabularyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VocabularyStore")
            .field("root", &self.root)
            .field("cached", &self.cached_len())
            .field("parses", &self.parse_count())
            .finish_non_exhaustive()
    }
}

impl VocabularyStore {
    pub fn new(root: impl Into<PathBuf>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            root: root.into(),
            cache: Mutex::new(LruCache::new(capacity)),
            inflight: Mutex::new(FxHashMap::default()),
            fetcher: None,
            parses: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.artifact_root, config.cache_capacity)
    }

    pub fn with_fetcher(mut self, fetcher: impl ArtifactFetcher + 'static) -> Self {
        self.fetcher = Some(Box::new(fetcher));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load (or reuse) the vocabulary behind `artifact`.
    pub fn load(&self, artifact: &ArtifactRef) -> Result<Arc<Vocabulary>, TokenizerError> {
        let key = artifact.cache_key();
        loop {
            if let Some(vocab) = self.cached(&key) {
                debug!(key = %key, "vocabulary cache hit");
                return Ok(vocab);
            }

            let slot = self.slot(&key);
            let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(vocab) = guard.as_ref() {
                return Ok(Arc::clone(vocab));
            }
            // The round this slot belonged to has finished without a result.
            if !self.is_inflight(&key, &slot) {
                continue;
            }

            debug!(key = %key, "vocabulary cache miss");
            let result = self.load_uncached(&key, artifact).map(Arc::new);
            if let Ok(vocab) = &result {
                self.cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .put(key.clone(), Arc::clone(vocab));
                *guard = Some(Arc::clone(vocab));
            }
            self.inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            return result;
        }
    }

    fn cached(&self, key: &str) -> Option<Arc<Vocabulary>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(Arc::clone)
    }

    /// The in-flight slot for `key`, created empty on first use.
    fn slot(&self, key: &str) -> Slot {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(inflight.entry(key.to_string()).or_default())
    }

    fn is_inflight(&self, key: &str, slot: &Slot) -> bool {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    fn load_uncached(&self, key: &str, artifact: &ArtifactRef) -> Result<Vocabulary, TokenizerError> {
        let start = Instant::now();
        let files = self.resolve(key, artifact)?;

        let vocab = match artifact {
            ArtifactRef::RankTable(encoding) => {
                let data = fs::read(&files[0])?;
                let ranks = RankTable::parse(&data)?;
                let specials = SpecialTokens::new(encoding.special_tokens())?;
                let pattern = Pattern::new(encoding.pattern())?;
                Vocabulary::Ranked(RankedVocab::new(ranks, specials, pattern)?)
            }
            ArtifactRef::Hub { .. } => {
                let data = fs::read(&files[0])?;
                let config = match files.get(1) {
                    Some(path) => Some(
                        serde_json::from_slice::<TokenizerConfig>(&fs::read(path)?)
                            .map_err(VocabError::from)?,
                    ),
                    None => None,
                };
                Vocabulary::Subword(SubwordVocab::from_json(&data, config)?)
            }
        };

        self.parses.fetch_add(1, Ordering::Relaxed);
        info!(
            key = %key,
            vocab_size = vocab.vocab_size(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "parsed vocabulary"
        );
        Ok(vocab)
    }

    /// Paths of the files present for `artifact`, fetching missing ones.
    ///
    /// Required files come first; absent optional files are skipped.
    fn resolve(&self, key: &str, artifact: &ArtifactRef) -> Result<Vec<PathBuf>, TokenizerError> {
        let mut paths = Vec::new();
        for file in artifact.files(&self.root) {
            if !file.path.is_file() {
                if let Some(fetcher) = &self.fetcher {
                    if let Err(err) = fetcher.fetch(&file) {
                        warn!(key = %key, url = %file.url, error = %err, "artifact fetch failed");
                        if file.required {
                            return Err(TokenizerError::ArtifactFetch {
                                key: key.to_string(),
                                message: err.message,
                            });
                        }
                    }
                }
            }
            if file.path.is_file() {
                paths.push(file.path);
            } else if file.required {
                return Err(TokenizerError::ArtifactNotFound(file.path));
            }
        }
        Ok(paths)
    }

    /// Whether a parsed vocabulary for `artifact` is resident.
    pub fn is_cached(&self, artifact: &ArtifactRef) -> bool {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&artifact.cache_key())
    }

    /// Number of resident vocabularies.
    pub fn cached_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Total successful parses since construction.
    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::Relaxed)
    }

    /// Drop the cache's reference. Encoders holding the vocabulary keep it.
    pub fn evict(&self, artifact: &ArtifactRef) -> bool {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop(&artifact.cache_key())
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use std::fmt::Write;
    use std::sync::{mpsc, Barrier};
    use std::time::Duration;
    use tempfile::TempDir;

    fn rank_table_body() -> String {
        let mut body = String::new();
        for b in 0..=255u8 {
            writeln!(body, "{} {}", STANDARD.encode([b]), b).unwrap();
        }
        writeln!(body, "{} 256", STANDARD.encode("ab")).unwrap();
        body
    }

    fn write_rank_table(root: &Path, file: &str) {
        let dir = root.join("tiktoken");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{}.tiktoken", file)), rank_table_body()).unwrap();
    }

    /// Blocks every fetch until the test releases it, then writes a rank
    /// table (`true`) or fails (`false`).
    struct GatedFetcher {
        started: Mutex<mpsc::Sender<()>>,
        gate: Mutex<mpsc::Receiver<bool>>,
        calls: Arc<AtomicUsize>,
    }

    impl ArtifactFetcher for GatedFetcher {
        fn fetch(&self, file: &ArtifactFile) -> Result<(), FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.lock().unwrap().send(()).unwrap();
            if !self.gate.lock().unwrap().recv().unwrap_or(true) {
                return Err(FetchError::new("connection reset"));
            }
            fs::create_dir_all(file.path.parent().unwrap()).unwrap();
            fs::write(&file.path, rank_table_body()).unwrap();
            Ok(())
        }
    }

    fn gated_store(
        root: &Path,
        capacity: usize,
    ) -> (Arc<VocabularyStore>, mpsc::Receiver<()>, mpsc::Sender<bool>, Arc<AtomicUsize>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = GatedFetcher {
            started: Mutex::new(started_tx),
            gate: Mutex::new(gate_rx),
            calls: Arc::clone(&calls),
        };
        let store = Arc::new(VocabularyStore::new(root, capacity).with_fetcher(fetcher));
        (store, started_rx, gate_tx, calls)
    }

    fn spawn_load(
        store: &Arc<VocabularyStore>,
        encoding: Encoding,
    ) -> std::thread::JoinHandle<Result<Arc<Vocabulary>, TokenizerError>> {
        let store = Arc::clone(store);
        std::thread::spawn(move || store.load(&ArtifactRef::RankTable(encoding)))
    }

    struct FailingFetcher;

    impl ArtifactFetcher for FailingFetcher {
        fn fetch(&self, _file: &ArtifactFile) -> Result<(), FetchError> {
            Err(FetchError::new("connection reset"))
        }
    }

    #[test]
    fn test_files_layout() {
        let root = Path::new("/data");
        let hub = ArtifactRef::Hub {
            repo: "org/model".into(),
            revision: "refs/pr/5".into(),
        };
        let files = hub.files(root);
        assert_eq!(
            files[0].path,
            Path::new("/data/hf/org/model/revisions/refs_pr_5/tokenizer.json")
        );
        assert_eq!(
            files[0].url,
            "https://huggingface.co/org/model/resolve/refs/pr/5/tokenizer.json"
        );
        assert!(files[0].required);
        assert!(!files[1].required);

        let rank = ArtifactRef::RankTable(Encoding::Cl100kIm).files(root);
        assert_eq!(rank[0].path, Path::new("/data/tiktoken/cl100k_base.tiktoken"));
    }

    #[test]
    fn test_load_caches() {
        let dir = TempDir::new().unwrap();
        write_rank_table(dir.path(), "cl100k_base");
        let store = VocabularyStore::new(dir.path(), 4);
        let artifact = ArtifactRef::RankTable(Encoding::Cl100kBase);

        let first = store.load(&artifact).unwrap();
        let second = store.load(&artifact).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.parse_count(), 1);
        assert!(store.is_cached(&artifact));

        assert!(store.evict(&artifact));
        assert!(!store.is_cached(&artifact));
        store.load(&artifact).unwrap();
        assert_eq!(store.parse_count(), 2);
    }

    #[test]
    fn test_concurrent_loads_parse_once() {
        let dir = TempDir::new().unwrap();
        write_rank_table(dir.path(), "r50k_base");
        let store = Arc::new(VocabularyStore::new(dir.path(), 4));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    store.load(&ArtifactRef::RankTable(Encoding::Gpt2)).unwrap()
                })
            })
            .collect();
        let vocabs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(store.parse_count(), 1);
        assert!(vocabs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let store = VocabularyStore::new(dir.path(), 4);
        let artifact = ArtifactRef::RankTable(Encoding::O200kBase);

        let err = store.load(&artifact).unwrap_err();
        assert!(matches!(err, TokenizerError::ArtifactNotFound(_)));
        assert_eq!(store.cached_len(), 0);
    }

    #[test]
    fn test_fetch_failure_is_retryable_and_not_cached() {
        let dir = TempDir::new().unwrap();
        let store = VocabularyStore::new(dir.path(), 4).with_fetcher(FailingFetcher);
        let artifact = ArtifactRef::Hub {
            repo: "org/model".into(),
            revision: "main".into(),
        };

        let err = store.load(&artifact).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.cached_len(), 0);
    }

    #[test]
    fn test_corrupt_rank_table() {
        let dir = TempDir::new().unwrap();
        let tiktoken = dir.path().join("tiktoken");
        fs::create_dir_all(&tiktoken).unwrap();
        fs::write(tiktoken.join("p50k_base.tiktoken"), "YQ== 0\n").unwrap();
        let store = VocabularyStore::new(dir.path(), 4);

        let err = store.load(&ArtifactRef::RankTable(Encoding::P50kBase)).unwrap_err();
        assert!(matches!(err, TokenizerError::CorruptArtifact(_)));
        assert_eq!(store.cached_len(), 0);
    }

    #[test]
    fn test_lru_capacity() {
        let dir = TempDir::new().unwrap();
        write_rank_table(dir.path(), "r50k_base");
        write_rank_table(dir.path(), "p50k_base");
        let store = VocabularyStore::new(dir.path(), 1);

        store.load(&ArtifactRef::RankTable(Encoding::R50kBase)).unwrap();
        store.load(&ArtifactRef::RankTable(Encoding::P50kBase)).unwrap();
        assert_eq!(store.cached_len(), 1);
        assert!(!store.is_cached(&ArtifactRef::RankTable(Encoding::R50kBase)));
    }

    #[test]
    fn test_load_in_flight_survives_lru_pressure() {
        let dir = TempDir::new().unwrap();
        write_rank_table(dir.path(), "p50k_base");
        let (store, started, gate, calls) = gated_store(dir.path(), 1);

        let first = spawn_load(&store, Encoding::Gpt2);
        started.recv().unwrap();
        // Fills the single cache entry while r50k_base is still being fetched.
        store.load(&ArtifactRef::RankTable(Encoding::P50kBase)).unwrap();
        let second = spawn_load(&store, Encoding::Gpt2);
        std::thread::sleep(Duration::from_millis(50));
        gate.send(true).unwrap();

        let a = first.join().unwrap().unwrap();
        let b = second.join().unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.parse_count(), 2);
        assert_eq!(store.cached_len(), 1);
        assert!(store.is_cached(&ArtifactRef::RankTable(Encoding::Gpt2)));
    }

    #[test]
    fn test_waiter_retries_after_failed_load() {
        let dir = TempDir::new().unwrap();
        let (store, started, gate, calls) = gated_store(dir.path(), 4);

        let first = spawn_load(&store, Encoding::Gpt2);
        started.recv().unwrap();
        let second = spawn_load(&store, Encoding::Gpt2);
        std::thread::sleep(Duration::from_millis(50));
        gate.send(false).unwrap();
        gate.send(true).unwrap();

        let err = first.join().unwrap().unwrap_err();
        assert!(err.is_retryable());
        let loaded = second.join().unwrap().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.parse_count(), 1);

        // The retried result is the resident one, not a private copy.
        let again = store.load(&ArtifactRef::RankTable(Encoding::Gpt2)).unwrap();
        assert!(Arc::ptr_eq(&loaded, &again));
        assert_eq!(store.parse_count(), 1);
    }
}
