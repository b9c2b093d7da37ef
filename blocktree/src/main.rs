// Forbid unwrap() in production code to prevent panics from corrupt data.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::collections::BTreeSet;
use std::time::Instant;

use blocktree::btree::max_encoded_size;
use blocktree::storage::FileBlockStore;
use blocktree::{BTree, BTreeError, EngineConfig, Key};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Keys inserted by the walkthrough.
const DEMO_KEYS: &[Key] = &[
    10, 20, 30, 40, 50, 60, 70, 80, 5, 15, 25, 35, 45, 55, 65, 75, 85,
];

/// Parameters of the random-insert performance run.
const PERF_MIN_DEGREE: usize = 50;
const PERF_CACHE_CAPACITY: usize = 200;
const PERF_KEY_COUNT: usize = 1000;
const PERF_SEED: u64 = 42;

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blocktree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: data_file={}, min_degree={}, block_size={}, cache_capacity={}",
        config.data_file.display(),
        config.min_degree,
        config.block_size,
        config.cache_capacity
    );

    if let Some(parent) = config.data_file.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::error!("Failed to create data directory: {e}");
            std::process::exit(1);
        }
    }

    if let Err(e) = walkthrough(&config) {
        tracing::error!("Walkthrough failed: {e}");
        std::process::exit(1);
    }

    if let Err(e) = performance_run(&config) {
        tracing::error!("Performance run failed: {e}");
        std::process::exit(1);
    }
}

/// Open the tree in the configured file, creating the file if it is missing.
fn open_tree(config: &EngineConfig) -> Result<BTree<FileBlockStore>, Box<dyn std::error::Error>> {
    let store = FileBlockStore::open_or_create(&config.data_file, config.block_size)?;
    Ok(BTree::open(
        config.min_degree,
        store,
        config.cache_capacity,
    )?)
}

/// Build an empty tree in the performance run's own scratch file.
fn create_perf_tree(
    config: &EngineConfig,
) -> Result<BTree<FileBlockStore>, Box<dyn std::error::Error>> {
    let path = config.perf_data_file();
    // Left over from an earlier run.
    match std::fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let block_size = config.block_size.max(max_encoded_size(PERF_MIN_DEGREE));
    let store = FileBlockStore::create(&path, block_size)?;
    Ok(BTree::new(PERF_MIN_DEGREE, store, PERF_CACHE_CAPACITY)?)
}

/// Insert, dump, search and delete a fixed set of keys.
fn walkthrough(config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut tree = open_tree(config)?;

    tracing::info!("Inserting {} keys", DEMO_KEYS.len());
    for &key in DEMO_KEYS {
        match tree.insert(key) {
            Ok(()) => {}
            Err(BTreeError::DuplicateKey(_)) => tracing::info!("Key {key} already present"),
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!("Tree structure:\n{}", tree.dump()?);
    tracing::info!("Tree height: {}", tree.height()?);

    for key in [40, 25, 99, 1] {
        let found = tree.search(key)?;
        tracing::info!("Search {key}: {}", if found { "found" } else { "not found" });
    }

    for key in [25, 45, 99] {
        match tree.delete(key) {
            Ok(()) => tracing::info!("Deleted {key}"),
            Err(BTreeError::KeyNotFound(_)) => tracing::info!("Key {key} not found for deletion"),
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!("Tree structure after deletions:\n{}", tree.dump()?);
    report_violations(&mut tree)?;
    tree.sync()?;
    Ok(())
}

/// Insert and then look up random keys in a wide tree, timing both phases.
fn performance_run(config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut tree = create_perf_tree(config)?;
    let mut rng = StdRng::seed_from_u64(PERF_SEED);
    let mut inserted = BTreeSet::new();
    let mut duplicates = 0usize;

    let start = Instant::now();
    for _ in 0..PERF_KEY_COUNT {
        let key: Key = rng.random_range(1..10_000);
        match tree.insert(key) {
            Ok(()) => {
                inserted.insert(key);
            }
            Err(BTreeError::DuplicateKey(_)) => duplicates += 1,
            Err(e) => return Err(e.into()),
        }
    }
    let insert_elapsed = start.elapsed();

    tracing::info!(
        "Inserted {} random keys ({duplicates} duplicates skipped) in {} ms",
        inserted.len(),
        insert_elapsed.as_millis()
    );

    let start = Instant::now();
    let mut found = 0usize;
    for _ in 0..PERF_KEY_COUNT {
        let key: Key = rng.random_range(1..10_000);
        let hit = tree.search(key)?;
        if hit != inserted.contains(&key) {
            return Err(format!("search for {key} returned {hit}").into());
        }
        found += usize::from(hit);
    }
    let search_elapsed = start.elapsed();

    tracing::info!(
        "Searched {PERF_KEY_COUNT} random keys ({found} found) in {} ms",
        search_elapsed.as_millis()
    );

    let stats = tree.cache_stats();
    tracing::info!(
        "Tree height: {}, cache hits: {}, misses: {}, evictions: {}",
        tree.height()?,
        stats.hits,
        stats.misses,
        stats.evictions
    );

    let keys = tree.keys()?;
    if !keys.iter().copied().eq(inserted.iter().copied()) {
        return Err("tree contents differ from inserted keys".into());
    }
    report_violations(&mut tree)?;
    tree.sync()?;
    Ok(())
}

fn report_violations(tree: &mut BTree<FileBlockStore>) -> Result<(), Box<dyn std::error::Error>> {
    let violations = tree.verify()?;
    if violations.is_empty() {
        tracing::info!("Invariant check passed");
        return Ok(());
    }
    for violation in &violations {
        tracing::error!("Invariant violated: {violation}");
    }
    Err(format!("{} invariant violations", violations.len()).into())
}
