use std::collections::HashSet;
use std::sync::Arc;

use memo_ledger::filter::{Filter, FilterMode, FilterParams};
use memo_ledger::ledger::Ledger;
use memo_ledger::registry::{MemoRegistry, Registration};
use memo_ledger::storage::{FileStore, MemoryStore};
use memo_ledger::tx::{content_key, Transaction};
use rand::Rng;

fn random_key() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_get_distinct_indices() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let (ledger, _) = Ledger::open(FileStore::new(&path)).unwrap();
    let ledger = Arc::new(ledger);

    let mut handles = Vec::new();
    for _ in 0..32 {
        let ledger = ledger.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            ledger.append(Transaction::new(random_key())).unwrap()
        }));
    }

    let mut indices = HashSet::new();
    for handle in handles {
        assert!(indices.insert(handle.await.unwrap()));
    }
    assert_eq!(indices, (1..=32).collect::<HashSet<u64>>());
    assert_eq!(ledger.block_count(), 33);
    assert!(ledger.validate());

    // every append reached the store
    let (reopened, _) = Ledger::open(FileStore::new(&path)).unwrap();
    assert_eq!(reopened.blocks(), ledger.blocks());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_uploads_register_once() {
    let (ledger, _) = Ledger::open(MemoryStore::new()).unwrap();
    let (filter, _) = Filter::open(FilterParams::default(), MemoryStore::new()).unwrap();
    let registry = Arc::new(MemoRegistry::new(Arc::new(ledger), Arc::new(filter)));
    let key = content_key(b"the same memo uploaded many times");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let registry = registry.clone();
        let key = key.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            registry.register(Transaction::new(key)).unwrap()
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Registration::Created { block_index } => {
                assert_eq!(block_index, 1);
                created += 1;
            }
            Registration::Exists { block_index } => assert_eq!(block_index, 1),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(registry.ledger().transactions_by_key(&key).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_inserts_have_no_false_negatives() {
    for mode in [FilterMode::Exact, FilterMode::Bloom] {
        let params = FilterParams {
            mode,
            size: 8_192,
            hash_count: 4,
        };
        let (filter, _) = Filter::open(params, MemoryStore::new()).unwrap();
        let filter = Arc::new(filter);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let filter = filter.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let keys: Vec<String> = (0..50).map(|_| random_key()).collect();
                for key in &keys {
                    filter.insert(key).unwrap();
                    assert!(filter.might_contain(key));
                }
                keys
            }));
        }

        for handle in handles {
            for key in handle.await.unwrap() {
                assert!(filter.might_contain(&key));
            }
        }
        if mode == FilterMode::Exact {
            assert_eq!(filter.stats().items_added, 400);
        }
    }
}
