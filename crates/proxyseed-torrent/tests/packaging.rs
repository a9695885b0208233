use std::collections::BTreeMap;

use bytes::Bytes;
use proxyseed_config::TorrentSettings;
use proxyseed_content::ContentStore;
use proxyseed_core::{FetchResult, PackageError, Packager, SeedState, Seeder, SeederError};
use proxyseed_test_support::fixtures::DataDir;
use proxyseed_torrent::{RegistrySeeder, TorrentPackager, bencode, read_infohash};
use uuid::Uuid;

fn fetched(body: &'static [u8]) -> FetchResult {
    FetchResult {
        content: Bytes::from_static(body),
        content_type: "text/plain".to_string(),
        status_code: 200,
        headers: BTreeMap::new(),
        url: "https://example.test/file.txt".to_string(),
    }
}

fn packager(dir: &DataDir, piece_size: u32) -> anyhow::Result<TorrentPackager> {
    let settings = TorrentSettings {
        piece_size,
        announce_url: "https://tracker.test/announce".to_string(),
        ..TorrentSettings::default()
    };
    Ok(TorrentPackager::new(
        ContentStore::open(dir.content())?,
        dir.torrents(),
        settings,
    )?)
}

#[tokio::test]
async fn package_writes_single_file_metainfo() -> anyhow::Result<()> {
    let dir = DataDir::new()?;
    let packager = packager(&dir, 4)?;
    let package = packager
        .package(&fetched(b"hello world"), Uuid::new_v4())
        .await?;

    assert_eq!(package.content_size, 11);
    assert_eq!(package.content_hash.len(), 64);
    assert_eq!(package.package_id.len(), 40);
    assert!(package.content_path.is_file());
    assert_eq!(
        package.package_path,
        dir.torrents().join(format!("{}.torrent", package.content_hash))
    );

    let document = bencode::decode(&std::fs::read(&package.package_path)?)?;
    assert_eq!(
        document.get("announce").and_then(bencode::Value::as_bytes),
        Some(&b"https://tracker.test/announce"[..])
    );
    let info = document.get("info").expect("info dictionary");
    assert_eq!(info.get("length").and_then(bencode::Value::as_int), Some(11));
    assert_eq!(info.get("piece length").and_then(bencode::Value::as_int), Some(4));
    assert_eq!(info.get("private").and_then(bencode::Value::as_int), Some(1));
    assert_eq!(
        info.get("name").and_then(bencode::Value::as_bytes),
        Some(package.content_hash.as_bytes())
    );
    // 11 bytes in 4-byte pieces: three SHA-1 digests.
    assert_eq!(
        info.get("pieces").and_then(bencode::Value::as_bytes).map(<[u8]>::len),
        Some(60)
    );
    assert_eq!(read_infohash(&package.package_path)?, package.package_id);
    Ok(())
}

#[tokio::test]
async fn identical_content_reuses_object_and_metainfo() -> anyhow::Result<()> {
    let dir = DataDir::new()?;
    let packager = packager(&dir, 16)?;
    let first = packager.package(&fetched(b"same bytes"), Uuid::new_v4()).await?;
    let modified = std::fs::metadata(&first.package_path)?.modified()?;
    let second = packager.package(&fetched(b"same bytes"), Uuid::new_v4()).await?;

    assert_eq!(first, second);
    assert_eq!(packager.content_store().writes_total(), 1);
    assert_eq!(std::fs::metadata(&second.package_path)?.modified()?, modified);
    Ok(())
}

#[tokio::test]
async fn empty_content_is_invalid() -> anyhow::Result<()> {
    let dir = DataDir::new()?;
    let packager = packager(&dir, 16)?;
    let err = packager
        .package(&fetched(b""), Uuid::new_v4())
        .await
        .expect_err("empty content cannot be packaged");
    assert!(matches!(err, PackageError::Invalid { .. }));
    Ok(())
}

#[tokio::test]
async fn seeder_registers_restores_and_removes() -> anyhow::Result<()> {
    let dir = DataDir::new()?;
    let package = packager(&dir, 16)?
        .package(&fetched(b"seed me"), Uuid::new_v4())
        .await?;

    let seeder = RegistrySeeder::new(dir.resume())?;
    seeder
        .add_package(&package.package_path, &package.content_path, &package.package_id)
        .await?;
    seeder
        .add_package(&package.package_path, &package.content_path, &package.package_id)
        .await?;
    let stats = seeder.status(&package.package_id).await.expect("registered");
    assert_eq!(stats.state, SeedState::Seeding);
    assert!((stats.progress - 1.0).abs() < f64::EPSILON);
    assert!(dir.resume().join(format!("{}.json", package.package_id)).is_file());
    seeder.shutdown().await?;
    assert!(seeder.status(&package.package_id).await.is_none());

    let restarted = RegistrySeeder::new(dir.resume())?;
    assert_eq!(restarted.restore().await?, 1);
    assert_eq!(restarted.package_ids(), vec![package.package_id.clone()]);

    assert!(restarted.remove(&package.package_id).await?);
    assert!(!restarted.remove(&package.package_id).await?);
    assert!(!dir.resume().join(format!("{}.json", package.package_id)).exists());
    Ok(())
}

#[tokio::test]
async fn seeder_rejects_missing_files_and_wrong_infohash() -> anyhow::Result<()> {
    let dir = DataDir::new()?;
    let package = packager(&dir, 16)?
        .package(&fetched(b"payload"), Uuid::new_v4())
        .await?;
    let seeder = RegistrySeeder::new(dir.resume())?;

    let missing = dir.path().join("absent.torrent");
    let err = seeder
        .add_package(&missing, &package.content_path, &package.package_id)
        .await
        .expect_err("metainfo is missing");
    assert!(matches!(err, SeederError::MissingFile { ref path } if *path == missing));

    let err = seeder
        .add_package(&package.package_path, &package.content_path, &"0".repeat(40))
        .await
        .expect_err("infohash does not match");
    assert!(matches!(err, SeederError::Failed { operation: "metainfo.verify", .. }));
    assert!(seeder.package_ids().is_empty());
    Ok(())
}

#[tokio::test]
async fn restore_drops_stale_records() -> anyhow::Result<()> {
    let dir = DataDir::new()?;
    let package = packager(&dir, 16)?
        .package(&fetched(b"ephemeral"), Uuid::new_v4())
        .await?;
    let seeder = RegistrySeeder::new(dir.resume())?;
    seeder
        .add_package(&package.package_path, &package.content_path, &package.package_id)
        .await?;
    std::fs::remove_file(&package.package_path)?;

    let restarted = RegistrySeeder::new(dir.resume())?;
    assert_eq!(restarted.restore().await?, 0);
    assert!(!dir.resume().join(format!("{}.json", package.package_id)).exists());
    Ok(())
}
