use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use iocat_core::{ChangeEntry, Field, FieldValue, HlcClock, ImageKey, Origin, TagSet, WriterIdentity};
use iocat_engine::{CatalogState, ConflictKind, EngineError};
use iocat_harness::{TestNetwork, TestPeer};
use iocat_storage::{LogStore, SqliteStorage};

// Keeps wall-clock order between edits on different copies unambiguous.
fn tick() {
    sleep(Duration::from_millis(5));
}

fn dir_len(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Two copies of a catalog whose `img1.jpg` is tagged `beach`.
fn beach_network() -> Result<TestNetwork, EngineError> {
    let mut net = TestNetwork::new()?;
    let a = net.add_peer("ana")?;
    net.peer_mut(a).add("img1.jpg")?;
    net.peer_mut(a).tag("img1.jpg", &["beach"])?;
    net.add_peer("ben")?;
    Ok(net)
}

// ============================================================================
// Reconciliation
// ============================================================================

#[test]
fn self_merge_has_no_conflicts() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let mut peer = TestPeer::create(dir.path(), "ana")?;
    peer.add("a.jpg")?;
    peer.tag("a.jpg", &["x"])?;
    let before = peer.catalog.projection().clone();

    let own = peer.path();
    let report = peer.sync_with(&own)?;
    assert!(report.is_empty());
    assert_eq!(peer.catalog.projection(), &before);
    assert_eq!(peer.catalog.history().len(), 2);
    Ok(())
}

#[test]
fn later_tag_edit_wins_and_loser_is_reported() -> Result<(), Box<dyn std::error::Error>> {
    let mut net = beach_network()?;
    let (a, b) = (0, 1);

    let lost = net.peer_mut(a).tag("img1.jpg", &["sunset"])?;
    tick();
    net.peer_mut(b).untag("img1.jpg", &["beach"])?;
    net.peer_mut(b).tag("img1.jpg", &["sunset"])?;

    let report = net.sync(b, a)?;
    assert_eq!(net.peer(a).tags("img1.jpg"), vec!["sunset"]);
    assert_eq!(report.len(), 1);
    let notice = &report.notices()[0];
    assert_eq!(notice.kind, ConflictKind::Discarded);
    assert_eq!(notice.field, Field::Tags);
    assert_eq!(notice.discarded.entry_id, lost.entry_id);

    // Discarded entries stay in the log.
    assert!(net.peer(a).catalog.history().iter().any(|e| e.entry_id == lost.entry_id));

    // Ben's copy only catches up: every one of its edits is already in Ana's.
    let report = net.sync(a, b)?;
    assert!(report.is_empty());
    assert_eq!(net.peer(b).tags("img1.jpg"), vec!["sunset"]);
    assert_eq!(net.peer(a).catalog.projection(), net.peer(b).catalog.projection());
    Ok(())
}

#[test]
fn edits_to_different_fields_both_survive() -> Result<(), Box<dyn std::error::Error>> {
    let mut net = beach_network()?;
    let (a, b) = (0, 1);
    net.peer_mut(a).tag("img1.jpg", &["dunes"])?;
    net.peer_mut(b).rename("img1.jpg", Some("Coast"))?;
    net.peer_mut(b).add("img2.jpg")?;

    let report = net.sync(b, a)?;
    assert!(report.is_empty());
    let record = net.peer(a).record("img1.jpg").unwrap();
    assert_eq!(record.display_name(), "Coast");
    assert!(record.tags.contains("dunes"));
    assert!(net.peer(a).record("img2.jpg").is_some());
    Ok(())
}

#[test]
fn edit_overrides_delete() -> Result<(), Box<dyn std::error::Error>> {
    let mut net = beach_network()?;
    let (a, b) = (0, 1);
    net.peer_mut(b).tag("img1.jpg", &["family"])?;
    tick();
    net.peer_mut(a).remove("img1.jpg")?;

    let report = net.sync(b, a)?;
    assert_eq!(net.peer(a).tags("img1.jpg"), vec!["beach", "family"]);
    let overridden: Vec<_> = report
        .iter()
        .filter(|n| n.kind == ConflictKind::DeletionOverridden)
        .collect();
    assert_eq!(overridden.len(), 1);
    assert_eq!(overridden[0].field, Field::Presence);

    let restore = net.peer(a).catalog.history().last().unwrap().clone();
    assert_eq!(restore.origin, Origin::MergeRestore);
    assert_eq!(restore.writer, net.peer(a).catalog.writer_id());
    restore.verify_signature()?;

    // The other copy picks up the restore without a second override.
    let report = net.sync(a, b)?;
    assert!(report.iter().all(|n| n.kind != ConflictKind::DeletionOverridden));
    assert!(net.peer(b).record("img1.jpg").is_some());
    Ok(())
}

#[test]
fn delete_stands_without_competing_edits() -> Result<(), Box<dyn std::error::Error>> {
    let mut net = beach_network()?;
    let (a, b) = (0, 1);
    net.peer_mut(a).remove("img1.jpg")?;
    net.peer_mut(b).add("img2.jpg")?;

    let report = net.sync(a, b)?;
    assert!(report.is_empty());
    assert!(net.peer(b).record("img1.jpg").is_none());
    assert!(net.peer(b).record("img2.jpg").is_some());
    Ok(())
}

#[test]
fn three_copies_converge_through_shared_folder() -> Result<(), Box<dyn std::error::Error>> {
    let mut net = beach_network()?;
    let c = net.add_peer("cal")?;
    net.peer_mut(0).tag("img1.jpg", &["a"])?;
    net.peer_mut(1).rename("img1.jpg", Some("Bay"))?;
    net.peer_mut(c).add("img3.jpg")?;

    net.publish(0)?;
    net.pull(1)?;
    net.publish(1)?;
    net.pull(c)?;
    net.publish(c)?;
    net.pull(0)?;
    net.pull(1)?;

    let reference = net.peer(0).catalog.projection().clone();
    for i in 1..3 {
        assert_eq!(net.peer(i).catalog.projection(), &reference);
        assert_eq!(net.peer(i).catalog.history().len(), net.peer(0).catalog.history().len());
    }
    assert_eq!(net.peer(c).record("img1.jpg").unwrap().display_name(), "Bay");
    Ok(())
}

// ============================================================================
// Merge state machine
// ============================================================================

#[test]
fn writes_rejected_while_merge_pending() -> Result<(), Box<dyn std::error::Error>> {
    let mut net = beach_network()?;
    net.peer_mut(1).tag("img1.jpg", &["remote"])?;
    let other = net.peer(1).path();
    let original = std::fs::read(net.peer(0).path())?;

    let pending = net.peer_mut(0).catalog.begin_merge(&other)?;
    assert_eq!(net.peer(0).catalog.state(), CatalogState::Merging);
    assert_eq!(pending.imported(), 1);
    assert!(pending.projection().get(&ImageKey::new("img1.jpg")?).unwrap().tags.contains("remote"));
    assert!(matches!(net.peer_mut(0).tag("img1.jpg", &["x"]), Err(EngineError::MergeInProgress)));
    assert!(matches!(net.peer_mut(0).catalog.begin_merge(&other), Err(EngineError::MergeInProgress)));

    drop(pending);
    assert_eq!(net.peer(0).catalog.state(), CatalogState::Clean);
    assert_eq!(std::fs::read(net.peer(0).path())?, original);
    assert_eq!(net.peer(0).tags("img1.jpg"), vec!["beach"]);

    let pending = net.peer_mut(0).catalog.begin_merge(&other)?;
    net.peer_mut(0).catalog.commit_merge(pending)?;
    assert_eq!(net.peer(0).catalog.state(), CatalogState::Clean);
    assert_eq!(net.peer(0).tags("img1.jpg"), vec!["beach", "remote"]);
    net.peer_mut(0).tag("img1.jpg", &["after"])?;
    Ok(())
}

#[test]
fn committed_merge_survives_reopen() -> Result<(), Box<dyn std::error::Error>> {
    let mut net = beach_network()?;
    net.peer_mut(1).rename("img1.jpg", Some("Shore"))?;
    net.sync(1, 0)?;
    let merged = net.peer(0).catalog.projection().clone();

    let reopened = TestPeer::open(&net.peer(0).path(), "ana")?;
    assert_eq!(reopened.catalog.projection(), &merged);
    reopened.catalog.verify_log()?;
    Ok(())
}

// ============================================================================
// Failed merges
// ============================================================================

fn assert_untouched(net: &TestNetwork, original: &[u8], entries: usize, files: usize) {
    let peer = net.peer(0);
    assert_eq!(peer.catalog.state(), CatalogState::Clean);
    assert_eq!(std::fs::read(peer.path()).unwrap(), original);
    assert_eq!(peer.catalog.history().len(), entries);
    assert_eq!(dir_len(peer.path().parent().unwrap()), files);
}

#[test]
fn unreadable_other_file_leaves_catalog_untouched() -> Result<(), Box<dyn std::error::Error>> {
    let mut net = beach_network()?;
    let original = std::fs::read(net.peer(0).path())?;
    let entries = net.peer(0).catalog.history().len();
    let files = dir_len(net.peer(0).path().parent().unwrap());

    let garbage = net.root().join("garbage.iocat");
    std::fs::write(&garbage, b"this is not a catalog")?;
    assert!(net.peer_mut(0).sync_with(&garbage).is_err());
    assert_untouched(&net, &original, entries, files);

    let missing = net.root().join("missing.iocat");
    assert!(net.peer_mut(0).sync_with(&missing).is_err());
    assert_untouched(&net, &original, entries, files);
    Ok(())
}

#[test]
fn forged_entry_fails_merge() -> Result<(), Box<dyn std::error::Error>> {
    let mut net = beach_network()?;
    net.peer_mut(1).tag("img1.jpg", &["honest"])?;
    net.publish(1)?;
    {
        let conn = rusqlite::Connection::open(net.cloud_path())?;
        let (seq, body): (i64, Vec<u8>) = conn.query_row(
            "SELECT seq, body FROM entries ORDER BY seq DESC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let mut entry = ChangeEntry::from_body(seq as u64, &body)?;
        entry.new = FieldValue::Tags(["forged".to_string()].into());
        conn.execute(
            "UPDATE entries SET body = ?1 WHERE seq = ?2",
            rusqlite::params![entry.to_body()?, seq],
        )?;
    }

    let original = std::fs::read(net.peer(0).path())?;
    let entries = net.peer(0).catalog.history().len();
    let files = dir_len(net.peer(0).path().parent().unwrap());

    assert!(matches!(net.pull(0), Err(EngineError::Core(_))));
    assert_untouched(&net, &original, entries, files);
    Ok(())
}

// ============================================================================
// Forward compatibility
// ============================================================================

#[test]
fn unknown_fields_and_meta_survive_merge() -> Result<(), Box<dyn std::error::Error>> {
    let mut net = beach_network()?;
    net.publish(1)?;

    // An entry and a meta key written by a newer version of the format.
    let future = WriterIdentity::generate("future");
    let mut entry = ChangeEntry::new_signed(
        &future,
        HlcClock::new().tick()?,
        ImageKey::new("img1.jpg")?,
        FieldValue::Tags(["beach".to_string()].into()),
        FieldValue::Tags(TagSet::from(["beach".to_string(), "kite".to_string()])),
        Origin::Edit,
    )?;
    entry.unknown.insert("mood".to_string(), rmpv::Value::from("calm"));
    entry.signature = future.sign(&entry.signing_bytes()?);
    {
        let mut cloud = SqliteStorage::open(&net.cloud_path())?;
        entry.seq = cloud.entry_count()? + 1;
        cloud.append_entry(&entry)?;
        cloud.set_meta("future_setting", b"\x01\x02")?;
    }

    net.pull(0)?;
    assert_eq!(net.peer(0).tags("img1.jpg"), vec!["beach", "kite"]);

    let stored = SqliteStorage::open_read_only(&net.peer(0).path())?;
    let reloaded = stored
        .load_entries()?
        .into_iter()
        .find(|e| e.entry_id == entry.entry_id)
        .expect("imported entry");
    assert_eq!(reloaded.unknown.get("mood"), Some(&rmpv::Value::from("calm")));
    reloaded.verify_signature()?;
    assert_eq!(stored.get_meta("future_setting")?, Some(b"\x01\x02".to_vec()));
    Ok(())
}

#[test]
fn catalog_with_unknown_field_kind_opens_and_merges() -> Result<(), Box<dyn std::error::Error>> {
    let mut net = beach_network()?;
    net.publish(1)?;

    // A field kind this version has never heard of.
    let future = WriterIdentity::generate("future");
    let rating = |stars: i64| FieldValue::Opaque {
        variant: "Rating".to_string(),
        value: rmpv::Value::from(stars),
    };
    let mut entry = ChangeEntry::new_signed(
        &future,
        HlcClock::new().tick()?,
        ImageKey::new("img1.jpg")?,
        rating(0),
        rating(3),
        Origin::Edit,
    )?;
    {
        let mut cloud = SqliteStorage::open(&net.cloud_path())?;
        entry.seq = cloud.entry_count()? + 1;
        cloud.append_entry(&entry)?;
    }

    let opened = TestPeer::open(&net.cloud_path(), "cal")?;
    assert_eq!(opened.tags("img1.jpg"), vec!["beach"]);
    assert!(opened.catalog.history().iter().any(|e| e.entry_id == entry.entry_id));
    drop(opened);

    let before = net.peer(0).catalog.projection().clone();
    let report = net.pull(0)?;
    assert!(report.is_empty());
    assert_eq!(net.peer(0).catalog.projection(), &before);

    let stored = SqliteStorage::open_read_only(&net.peer(0).path())?;
    let kept = stored
        .load_entries()?
        .into_iter()
        .find(|e| e.entry_id == entry.entry_id)
        .expect("unknown-kind entry kept");
    assert_eq!(kept.field, Field::Unknown("Rating".to_string()));
    assert_eq!(kept.new, rating(3));
    kept.verify_signature()?;
    drop(stored);

    // The merged copy reopens and stays writable.
    net.peer_mut(0).tag("img1.jpg", &["kite"])?;
    let reopened = TestPeer::open(&net.peer(0).path(), "ana")?;
    assert_eq!(reopened.tags("img1.jpg"), vec!["beach", "kite"]);
    Ok(())
}
