//! Content cache integration tests
//!
//! Commit, eviction and startup reconciliation against a real directory and
//! SQLite index.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use echo_player::cache::FileCache;
use echo_player::Error;
use helpers::open_cache;

fn hash(n: usize) -> String {
    format!("{:064x}", n)
}

async fn put(cache: &Arc<FileCache>, key: &str, bytes: usize) {
    let (mut writer, _pending) = cache.begin_write(key).await.unwrap();
    writer.write(&vec![7u8; bytes]).await.unwrap();
    writer.finish().await.unwrap().expect("non-empty write commits");
}

fn tmp_is_empty(cache: &FileCache) -> bool {
    std::fs::read_dir(cache.root().join("tmp"))
        .unwrap()
        .next()
        .is_none()
}

#[tokio::test]
async fn test_committed_file_is_found_with_its_size() {
    let (_dir, cache) = open_cache(1000).await;
    put(&cache, &hash(1), 64).await;

    let path = cache.lookup(&hash(1)).await.unwrap().unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 64);
    assert_eq!(path, cache.root().join(hash(1)));
    assert_eq!(cache.usage_bytes().await.unwrap(), 64);
    assert!(tmp_is_empty(&cache));
}

#[tokio::test]
async fn test_zero_byte_write_leaves_nothing_behind() {
    let (_dir, cache) = open_cache(1000).await;

    let (writer, pending) = cache.begin_write(&hash(1)).await.unwrap();
    assert_eq!(writer.finish().await.unwrap(), None);
    assert_eq!(pending.wait().await.unwrap(), None);

    assert_eq!(cache.lookup(&hash(1)).await.unwrap(), None);
    assert_eq!(cache.entry_count().await.unwrap(), 0);
    assert!(!cache.root().join(hash(1)).exists());
    assert!(tmp_is_empty(&cache));
}

#[tokio::test]
async fn test_eviction_removes_least_recently_inserted() {
    let (_dir, cache) = open_cache(100).await;

    for n in 1..=3 {
        put(&cache, &hash(n), 40).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cache.wait_for_eviction().await;

    assert_eq!(cache.usage_bytes().await.unwrap(), 80);
    assert_eq!(cache.lookup(&hash(1)).await.unwrap(), None);
    assert!(!cache.root().join(hash(1)).exists());
    assert!(cache.lookup(&hash(2)).await.unwrap().is_some());
    assert!(cache.lookup(&hash(3)).await.unwrap().is_some());
}

#[tokio::test]
async fn test_lookup_refreshes_eviction_order() {
    let (_dir, cache) = open_cache(100).await;

    put(&cache, &hash(1), 40).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    put(&cache, &hash(2), 40).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(cache.lookup(&hash(1)).await.unwrap().is_some());
    tokio::time::sleep(Duration::from_millis(5)).await;
    put(&cache, &hash(3), 40).await;
    cache.wait_for_eviction().await;

    assert!(cache.lookup(&hash(1)).await.unwrap().is_some());
    assert_eq!(cache.lookup(&hash(2)).await.unwrap(), None);
    assert!(cache.lookup(&hash(3)).await.unwrap().is_some());
}

#[tokio::test]
async fn test_failed_rename_discards_temp_file() {
    let (_dir, cache) = open_cache(1000).await;

    // A non-empty directory squatting on the final path makes the rename fail
    let blocker = cache.root().join(hash(1));
    std::fs::create_dir(&blocker).unwrap();
    std::fs::write(blocker.join("inner"), b"x").unwrap();

    let (mut writer, pending) = cache.begin_write(&hash(1)).await.unwrap();
    writer.write(b"audio").await.unwrap();

    assert!(matches!(
        writer.finish().await,
        Err(Error::CacheWriteFailed(_))
    ));
    assert!(pending.wait().await.is_err());
    assert!(tmp_is_empty(&cache));
    assert!(!cache.is_writing(&hash(1)));
    assert!(cache.index().get(&hash(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_keys_never_touch_the_filesystem() {
    let (dir, cache) = open_cache(1000).await;
    let traversal = format!("../{}", hash(1));

    for key in ["abc123".to_string(), traversal, "A".repeat(64)] {
        assert!(matches!(
            cache.lookup(&key).await,
            Err(Error::InvalidCacheKey(_))
        ));
        assert!(matches!(
            cache.begin_write(&key).await,
            Err(Error::InvalidCacheKey(_))
        ));
    }

    assert!(!dir.path().join(hash(1)).exists());
    assert!(tmp_is_empty(&cache));
}

#[tokio::test]
async fn test_missing_backing_file_heals_to_miss() {
    let (_dir, cache) = open_cache(1000).await;
    put(&cache, &hash(1), 10).await;

    std::fs::remove_file(cache.root().join(hash(1))).unwrap();

    assert_eq!(cache.lookup(&hash(1)).await.unwrap(), None);
    assert_eq!(cache.entry_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_writers_for_one_hash() {
    let (_dir, cache) = open_cache(1000).await;

    let (mut first, _pending) = cache.begin_write(&hash(1)).await.unwrap();
    assert!(cache.is_writing(&hash(1)));
    assert!(matches!(
        cache.begin_write(&hash(1)).await,
        Err(Error::CacheWriteFailed(_))
    ));

    first.write(b"abc").await.unwrap();
    first.finish().await.unwrap();
    assert!(!cache.is_writing(&hash(1)));

    // The hash is free again once the first writer is done
    let (again, _) = cache.begin_write(&hash(1)).await.unwrap();
    again.abort();
    assert!(cache.lookup(&hash(1)).await.unwrap().is_some());
}

#[tokio::test]
async fn test_startup_cleanup_reconciles_index_and_files() {
    let (_dir, cache) = open_cache(1000).await;
    put(&cache, &hash(1), 10).await;

    // Valid-looking file with no index row, plus a stray non-hash file
    std::fs::write(cache.root().join(hash(2)), b"orphan").unwrap();
    std::fs::write(cache.root().join("notes.txt"), b"junk").unwrap();
    // Index row with no file
    cache.index().upsert(&hash(3), 99).await.unwrap();
    // Leftover from a crashed write
    std::fs::write(cache.root().join("tmp").join(hash(4)), b"partial").unwrap();

    let report = cache.cleanup_on_startup().await;

    assert_eq!(report.orphan_files_removed, 2);
    assert_eq!(report.stale_entries_removed, 1);
    assert_eq!(report.temp_files_removed, 1);
    assert_eq!(report.bytes_in_use, 10);

    assert!(cache.lookup(&hash(1)).await.unwrap().is_some());
    assert!(!cache.root().join(hash(2)).exists());
    assert!(!cache.root().join("notes.txt").exists());
    assert!(cache.index().get(&hash(3)).await.unwrap().is_none());
    assert!(tmp_is_empty(&cache));
}

#[tokio::test]
async fn test_startup_cleanup_evicts_down_to_budget() {
    let (dir, cache) = open_cache(1000).await;
    for n in 1..=3 {
        put(&cache, &hash(n), 40).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cache.wait_for_eviction().await;
    drop(cache);

    // Reopen the same directory with a smaller budget
    let pool = echo_common::db::init_database(&dir.path().join("echo.db"))
        .await
        .unwrap();
    let reopened = FileCache::open(dir.path().join("cache"), 50, pool)
        .await
        .unwrap();
    let report = reopened.cleanup_on_startup().await;

    assert_eq!(report.bytes_in_use, 40);
    assert!(reopened.lookup(&hash(3)).await.unwrap().is_some());
    assert_eq!(reopened.entry_count().await.unwrap(), 1);
}
