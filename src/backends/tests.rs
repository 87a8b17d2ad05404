//! Behaviour every engine must share, run against both reference engines,
//! plus unit tests for the scan machinery.

use super::*;
use crate::constants::MAX_TTL;
use crate::store::{DataStore, DataStoreExt, DataStoreManager};
use std::io::Cursor;

fn ctx() -> Context {
    Context::background()
}

async fn seed_prefix<S: DataStore>(store: &S) {
    let ctx = ctx();
    store.set(&ctx).by_key("o").string("before").await.unwrap();
    for i in 0..10 {
        store
            .set(&ctx)
            .by_key(format!("p/{i}"))
            .string(format!("v{i}"))
            .await
            .unwrap();
    }
    store.set(&ctx).by_key("q").string("after").await.unwrap();
}

fn keys(range: impl Iterator<Item = u32>) -> Vec<Vec<u8>> {
    range.map(|i| format!("p/{i}").into_bytes()).collect()
}

async fn binary_round_trip<S: DataStore + DataStoreManager>(store: &S) {
    let ctx = ctx();
    store.set(&ctx).by_key("k").binary(vec![0u8, 1, 2, 255]).await.unwrap();

    let value = store.get(&ctx).by_key("k").to_binary().await.unwrap();
    assert_eq!(value, Some(vec![0u8, 1, 2, 255]));

    assert_eq!(store.get(&ctx).by_key("missing").to_binary().await.unwrap(), None);
    let err = store
        .get(&ctx)
        .by_key("missing")
        .required()
        .to_binary()
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

async fn empty_value_is_present<S: DataStore + DataStoreManager>(store: &S) {
    let ctx = ctx();
    store.set(&ctx).by_key("empty").binary(Vec::new()).await.unwrap();
    assert_eq!(store.get(&ctx).by_key("empty").to_binary().await.unwrap(), Some(Vec::new()));
    assert!(store.get(&ctx).by_key("empty").exists().await.unwrap());
}

async fn counters<S: DataStore + DataStoreManager>(store: &S) {
    let ctx = ctx();
    assert_eq!(store.get(&ctx).by_key("c").to_counter().await.unwrap(), 0);
    store.set(&ctx).by_key("c").counter(42).await.unwrap();
    assert_eq!(store.get(&ctx).by_key("c").to_counter().await.unwrap(), 42);
}

async fn compare_and_set<S: DataStore + DataStoreManager>(store: &S) {
    let ctx = ctx();
    // version 0 means "must not exist"
    assert!(store.compare_and_set(&ctx).by_key("k").string("a").await.unwrap());
    assert!(!store.compare_and_set(&ctx).by_key("k").string("b").await.unwrap());

    let entry = store.get(&ctx).by_key("k").to_entry().await.unwrap().unwrap();
    assert!(
        store
            .compare_and_set(&ctx)
            .by_key("k")
            .with_version(entry.version)
            .string("c")
            .await
            .unwrap()
    );
    // stale version
    assert!(
        !store
            .compare_and_set(&ctx)
            .by_key("k")
            .with_version(entry.version)
            .string("d")
            .await
            .unwrap()
    );
    let value = store.get(&ctx).by_key("k").to_string().await.unwrap();
    assert_eq!(value.as_deref(), Some("c"));
}

async fn increment_semantics<S: DataStore + DataStoreManager>(store: &S) {
    let ctx = ctx();
    let previous = store
        .increment(&ctx)
        .by_key("n")
        .with_initial_value(10)
        .with_delta(5)
        .run()
        .await
        .unwrap();
    assert_eq!(previous, 10);
    assert_eq!(store.get(&ctx).by_key("n").to_counter().await.unwrap(), 15);

    assert_eq!(store.increment(&ctx).by_key("n").run().await.unwrap(), 15);
    assert_eq!(store.get(&ctx).by_key("n").to_counter().await.unwrap(), 16);

    // undersized values count as zero
    store.set(&ctx).by_key("short").binary(vec![1u8, 2, 3]).await.unwrap();
    let previous = store.increment(&ctx).by_key("short").with_delta(2).run().await.unwrap();
    assert_eq!(previous, 0);
    assert_eq!(store.get(&ctx).by_key("short").to_counter().await.unwrap(), 2);

    let previous = store.increment(&ctx).by_key("neg").with_delta(-3).run().await.unwrap();
    assert_eq!(previous, 0);
    let entry = store.get(&ctx).by_key("neg").to_counter_entry().await.unwrap().unwrap();
    assert_eq!(entry.value as i64, -3);
}

async fn ttl_expiry<S: DataStore + DataStoreManager>(store: &S) {
    let ctx = ctx();
    store.set(&ctx).by_key("temp").with_ttl(1).string("x").await.unwrap();
    store.set(&ctx).by_key("keep").string("y").await.unwrap();
    assert!(store.get(&ctx).by_key("temp").exists().await.unwrap());

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    assert!(!store.get(&ctx).by_key("temp").exists().await.unwrap());
    assert!(store.get(&ctx).by_key("keep").exists().await.unwrap());
    let err = store.touch(&ctx).by_key("temp").with_ttl(5).run().await.unwrap_err();
    assert!(err.is_not_found());

    // an expired key behaves as absent for compare-and-set
    assert!(store.compare_and_set(&ctx).by_key("temp").string("z").await.unwrap());
}

async fn touch<S: DataStore + DataStoreManager>(store: &S) {
    let ctx = ctx();
    store.set(&ctx).by_key("k").string("v").await.unwrap();

    store.touch(&ctx).by_key("k").with_ttl(60).run().await.unwrap();
    let entry = store.get(&ctx).by_key("k").to_entry().await.unwrap().unwrap();
    assert!((1..=60).contains(&entry.ttl));

    store.touch(&ctx).by_key("k").run().await.unwrap();
    let entry = store.get(&ctx).by_key("k").to_entry().await.unwrap().unwrap();
    assert_eq!(entry.ttl, 0);

    let err = store.touch(&ctx).by_key("missing").run().await.unwrap_err();
    assert!(err.is_not_found());
}

async fn touch_extends_window<S: DataStore + DataStoreManager>(store: &S) {
    let ctx = ctx();
    store.set(&ctx).by_key("session").with_ttl(1).string("s").await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(600)).await;
    store.touch(&ctx).by_key("session").with_ttl(2).run().await.unwrap();

    // past the original deadline, inside the new one
    tokio::time::sleep(std::time::Duration::from_millis(600)).await;
    assert!(store.get(&ctx).by_key("session").exists().await.unwrap());
    let entry = store.get(&ctx).by_key("session").to_entry().await.unwrap().unwrap();
    assert!((1..=2).contains(&entry.ttl));
}

async fn huge_ttl_is_clamped<S: DataStore + DataStoreManager>(store: &S) {
    let ctx = ctx();
    store.set(&ctx).by_key("forever").with_ttl(u64::MAX).string("f").await.unwrap();
    let entry = store.get(&ctx).by_key("forever").to_entry().await.unwrap().unwrap();
    assert!(entry.ttl > MAX_TTL - 5 && entry.ttl <= MAX_TTL, "ttl {}", entry.ttl);

    store.touch(&ctx).by_key("forever").with_ttl(u64::MAX - 1).run().await.unwrap();
    let entry = store.get(&ctx).by_key("forever").to_entry().await.unwrap().unwrap();
    assert!(entry.ttl > MAX_TTL - 5 && entry.ttl <= MAX_TTL, "ttl {}", entry.ttl);
}

async fn remove_is_idempotent<S: DataStore + DataStoreManager>(store: &S) {
    let ctx = ctx();
    store.set(&ctx).by_key("k").string("v").await.unwrap();
    store.remove(&ctx).by_key("k").run().await.unwrap();
    store.remove(&ctx).by_key("k").run().await.unwrap();
    assert!(!store.get(&ctx).by_key("k").exists().await.unwrap());
}

async fn enumerate_order<S: DataStore + DataStoreManager>(store: &S) {
    seed_prefix(store).await;
    let ctx = ctx();

    for batch_size in [1, 2, 3, 10, 256] {
        let forward = store
            .enumerate(&ctx)
            .by_prefix("p/")
            .with_batch_size(batch_size)
            .keys()
            .await
            .unwrap();
        assert_eq!(forward, keys(0..10), "batch size {batch_size}");

        let backward = store
            .enumerate(&ctx)
            .by_prefix("p/")
            .with_batch_size(batch_size)
            .reverse()
            .keys()
            .await
            .unwrap();
        assert_eq!(backward, keys((0..10).rev()), "batch size {batch_size}");
    }

    let entries = store.enumerate(&ctx).by_prefix("p/").collect().await.unwrap();
    assert_eq!(entries.len(), 10);
    assert_eq!(entries[3].value, b"v3");
}

async fn enumerate_seek<S: DataStore + DataStoreManager>(store: &S) {
    seed_prefix(store).await;
    let ctx = ctx();

    let forward = store
        .enumerate(&ctx)
        .by_prefix("p/")
        .seek("p/5")
        .with_batch_size(2)
        .keys()
        .await
        .unwrap();
    assert_eq!(forward, keys(5..10));

    let backward = store
        .enumerate(&ctx)
        .by_prefix("p/")
        .seek("p/5")
        .reverse()
        .keys()
        .await
        .unwrap();
    assert_eq!(backward, keys((0..=5).rev()));

    // seek before the prefix starts at the prefix
    let clamped = store.enumerate(&ctx).by_prefix("p/").seek("a").keys().await.unwrap();
    assert_eq!(clamped, keys(0..10));

    // descending from before the prefix finds nothing
    let below = store
        .enumerate(&ctx)
        .by_prefix("p/")
        .seek("a")
        .reverse()
        .keys()
        .await
        .unwrap();
    assert!(below.is_empty());

    // descending from past the prefix covers all of it
    let above = store
        .enumerate(&ctx)
        .by_prefix("p/")
        .seek("q")
        .reverse()
        .keys()
        .await
        .unwrap();
    assert_eq!(above, keys((0..10).rev()));
}

async fn enumerate_stops_early<S: DataStore + DataStoreManager>(store: &S) {
    seed_prefix(store).await;
    let ctx = ctx();

    let mut seen = Vec::new();
    store
        .enumerate(&ctx)
        .by_prefix("p/")
        .with_batch_size(2)
        .run(|entry| {
            seen.push(entry.key);
            seen.len() < 3
        })
        .await
        .unwrap();
    assert_eq!(seen, keys(0..3));
}

async fn enumerate_only_keys<S: DataStore + DataStoreManager>(store: &S) {
    seed_prefix(store).await;
    let ctx = ctx();

    let entries = store
        .enumerate(&ctx)
        .by_prefix("p/")
        .only_keys()
        .collect()
        .await
        .unwrap();
    assert_eq!(entries.len(), 10);
    assert!(entries.iter().all(|entry| entry.value.is_empty()));
}

async fn enumerate_high_prefix<S: DataStore + DataStoreManager>(store: &S) {
    let ctx = ctx();
    for key in [vec![0xfeu8], vec![0xff, 0x01], vec![0xff, 0xff], vec![0xff, 0xff, 0x00]] {
        store.set(&ctx).by_raw_key(key).string("x").await.unwrap();
    }
    let found = store.enumerate(&ctx).by_raw_prefix(vec![0xffu8]).keys().await.unwrap();
    assert_eq!(found, vec![vec![0xff, 0x01], vec![0xff, 0xff], vec![0xff, 0xff, 0x00]]);

    let all = store.enumerate(&ctx).keys().await.unwrap();
    assert_eq!(all.len(), 4);
}

async fn enumerate_skips_expired<S: DataStore + DataStoreManager>(store: &S) {
    let ctx = ctx();
    for i in 0..6 {
        let ttl = if i % 2 == 0 { 1 } else { 0 };
        store
            .set(&ctx)
            .by_key(format!("p/{i}"))
            .with_ttl(ttl)
            .string("x")
            .await
            .unwrap();
    }
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let found = store
        .enumerate(&ctx)
        .by_prefix("p/")
        .with_batch_size(2)
        .keys()
        .await
        .unwrap();
    assert_eq!(found, keys([1, 3, 5].into_iter()));
}

async fn empty_key_rejected<S: DataStore + DataStoreManager>(store: &S) {
    let ctx = ctx();
    let err = store.set(&ctx).by_key("").string("v").await.unwrap_err();
    assert!(matches!(err, Error::EmptyKey));
    let err = store.get(&ctx).to_binary().await.unwrap_err();
    assert!(matches!(err, Error::EmptyKey));
}

async fn canceled_context<S: DataStore + DataStoreManager>(store: &S) {
    let (ctx, cancel) = ctx().with_cancel();
    cancel.cancel();
    let err = store.set(&ctx).by_key("k").string("v").await.unwrap_err();
    assert!(err.is_canceled());
    let err = store.enumerate(&ctx).keys().await.unwrap_err();
    assert!(err.is_canceled());
}

async fn closed_store<S: DataStore + DataStoreManager>(store: &S) {
    let ctx = ctx();
    store.set(&ctx).by_key("k").string("v").await.unwrap();
    store.close().await.unwrap();
    // closing twice is harmless
    store.close().await.unwrap();

    let err = store.get(&ctx).by_key("k").to_binary().await.unwrap_err();
    assert!(matches!(err, Error::AlreadyClosed));
    let err = store.drop_all().await.unwrap_err();
    assert!(matches!(err, Error::AlreadyClosed));
}

async fn backup_and_restore<S: DataStore + DataStoreManager>(store: &S) {
    seed_prefix(store).await;
    let ctx = ctx();
    store.set(&ctx).by_key("ttl").with_ttl(600).string("t").await.unwrap();

    let mut dump = Vec::new();
    let max_version = store.backup(&mut dump, 0).await.unwrap();
    assert!(max_version >= 13);

    // nothing newer than the last backup
    let mut incremental = Vec::new();
    assert_eq!(store.backup(&mut incremental, max_version).await.unwrap(), max_version);
    assert!(incremental.is_empty());

    store.drop_all().await.unwrap();
    assert!(store.enumerate(&ctx).keys().await.unwrap().is_empty());

    store.restore(&mut Cursor::new(dump)).await.unwrap();
    let restored = store.enumerate(&ctx).by_prefix("p/").keys().await.unwrap();
    assert_eq!(restored, keys(0..10));
    let entry = store.get(&ctx).by_key("ttl").to_entry().await.unwrap().unwrap();
    assert!(entry.ttl > 0 && entry.ttl <= 600);

    // new writes get versions above the restored ones
    store.set(&ctx).by_key("fresh").string("f").await.unwrap();
    let fresh = store.get(&ctx).by_key("fresh").to_entry().await.unwrap().unwrap();
    assert!(fresh.version > max_version);
}

async fn drop_with_prefix<S: DataStore + DataStoreManager>(store: &S) {
    seed_prefix(store).await;
    let ctx = ctx();

    store.drop_with_prefix(b"p/").await.unwrap();
    let remaining = store.enumerate(&ctx).keys().await.unwrap();
    assert_eq!(remaining, vec![b"o".to_vec(), b"q".to_vec()]);
}

async fn compact_ratio<S: DataStore + DataStoreManager>(store: &S) {
    for ratio in [0.0, 1.0, -0.5, 2.0] {
        let err = store.compact(ratio).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)), "ratio {ratio}");
    }
    store.compact(0.5).await.unwrap();
}

macro_rules! conformance {
    ($($check:ident),* $(,)?) => {
        mod memory_engine {
            $(
                #[tokio::test]
                async fn $check() {
                    let store = crate::MemoryStore::new();
                    super::$check(&store).await;
                }
            )*
        }

        mod redb_engine {
            $(
                #[tokio::test]
                async fn $check() {
                    let tmp = tempfile::TempDir::new().unwrap();
                    let store = crate::RedbStore::open(tmp.path().join("conformance.redb")).unwrap();
                    super::$check(&store).await;
                }
            )*
        }
    };
}

conformance!(
    binary_round_trip,
    empty_value_is_present,
    counters,
    compare_and_set,
    increment_semantics,
    ttl_expiry,
    touch,
    touch_extends_window,
    huge_ttl_is_clamped,
    remove_is_idempotent,
    enumerate_order,
    enumerate_seek,
    enumerate_stops_early,
    enumerate_only_keys,
    enumerate_high_prefix,
    enumerate_skips_expired,
    empty_key_rejected,
    canceled_context,
    closed_store,
    backup_and_restore,
    drop_with_prefix,
    compact_ratio,
);

#[test]
fn test_prefix_successor() {
    assert_eq!(prefix_successor(b"p/"), Some(b"p0".to_vec()));
    assert_eq!(prefix_successor(&[0x01, 0xff]), Some(vec![0x02]));
    assert_eq!(prefix_successor(&[0xff, 0xff]), None);
    assert_eq!(prefix_successor(b""), None);
}

#[test]
fn test_cursor_bounds() {
    let request = EnumerateRequest {
        prefix: b"p/".to_vec(),
        seek: b"p/5".to_vec(),
        batch_size: 0,
        only_keys: false,
        reverse: false,
    };
    let cursor = ScanCursor::new(&request);
    assert_eq!(cursor.lower, Bound::Included(b"p/5".to_vec()));
    assert_eq!(cursor.upper, Bound::Excluded(b"p0".to_vec()));
    assert_eq!(cursor.limit, 1);

    let reverse = ScanCursor::new(&EnumerateRequest {
        reverse: true,
        ..request.clone()
    });
    assert_eq!(reverse.lower, Bound::Included(b"p/".to_vec()));
    assert_eq!(reverse.upper, Bound::Included(b"p/5".to_vec()));

    // seek equal to the prefix scans the whole prefix backwards
    let whole = ScanCursor::new(&EnumerateRequest {
        reverse: true,
        seek: b"p/".to_vec(),
        ..request.clone()
    });
    assert_eq!(whole.upper, Bound::Excluded(b"p0".to_vec()));

    let before = ScanCursor::new(&EnumerateRequest {
        reverse: true,
        seek: b"a".to_vec(),
        ..request
    });
    assert!(before.is_empty());
}

#[test]
fn test_cursor_advance_and_empty() {
    let mut cursor = ScanCursor::new(&EnumerateRequest {
        prefix: b"a".to_vec(),
        seek: b"a".to_vec(),
        batch_size: 2,
        only_keys: false,
        reverse: false,
    });
    assert!(!cursor.is_empty());
    cursor.advance(b"a9".to_vec());
    assert_eq!(cursor.lower, Bound::Excluded(b"a9".to_vec()));
    cursor.advance(b"b".to_vec());
    assert!(cursor.is_empty());

    // seek past the prefix end leaves nothing to scan
    let past = ScanCursor::new(&EnumerateRequest {
        prefix: b"a".to_vec(),
        seek: b"c".to_vec(),
        batch_size: 2,
        only_keys: false,
        reverse: false,
    });
    assert!(past.is_empty());
}

#[test]
fn test_apply_increment() {
    assert_eq!(apply_increment(None, 7, 1), (7, encode_counter(8)));
    assert_eq!(apply_increment(Some(&encode_counter(5)), 100, 2), (5, encode_counter(7)));
    assert_eq!(apply_increment(Some(&[1, 2]), 100, 2), (0, encode_counter(2)));
    let (previous, next) = apply_increment(Some(&encode_counter(i64::MAX as u64)), 0, 1);
    assert_eq!(previous, i64::MAX);
    assert_eq!(decode_counter(&next).map(|v| v as i64), Some(i64::MIN));
}

#[test]
fn test_ceil_secs() {
    assert_eq!(ceil_secs(Duration::from_secs(3)), 3);
    assert_eq!(ceil_secs(Duration::from_millis(2001)), 3);
    assert_eq!(ceil_secs(Duration::ZERO), 0);
}

#[test]
fn test_discard_ratio() {
    assert!(check_discard_ratio(0.5).is_ok());
    assert!(check_discard_ratio(0.0).is_err());
    assert!(check_discard_ratio(1.0).is_err());
    assert!(check_discard_ratio(f64::NAN).is_err());
}
