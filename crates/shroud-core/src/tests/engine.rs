use tempfile::TempDir;

use crate::engine::{Engine, EngineOptions};
use crate::store::{MemoryStore, ObjectStore};
use crate::testutil::*;
use shroud_types::error::ShroudError;
use shroud_types::{Direction, ObjectKind, Oid};

fn refs(store: &MemoryStore, prefix: &str) -> Vec<(String, Oid)> {
    store.references(prefix).unwrap()
}

/// A plaintext store with branches `main` and `topic`, tag `v1` and HEAD on
/// `main`.
fn populated() -> (MemoryStore, Oid, Oid) {
    let plain = MemoryStore::new();
    let c1 = commit(&plain, &tree_of(&plain, &[("id.key", b"k1\n"), ("README", b"r\n")]), &[], "one");
    let c2 = commit(&plain, &tree_of(&plain, &[("id.key", b"k2\n"), ("README", b"r\n")]), &[c1], "two");
    plain.set_reference("refs/heads/main", &c2, "").unwrap();
    plain.set_reference("refs/heads/topic", &c1, "").unwrap();
    let tag = annotated_tag(&plain, &c1, ObjectKind::Commit, "v1");
    plain.set_reference("refs/tags/v1", &tag, "").unwrap();
    plain
        .set_symbolic_reference("HEAD", "refs/heads/main", "")
        .unwrap();
    (plain, c1, c2)
}

#[test]
fn tauten_heads_and_tags_stage_every_ref() {
    let dir = TempDir::new().unwrap();
    let (plain, c1, c2) = populated();
    let cipher = MemoryStore::new();
    let engine = engine(&plain, &cipher, dir.path(), &["*.key shroud"]);

    let heads = engine.tauten_heads().unwrap();
    assert_eq!(heads.len(), 2);
    assert_eq!(heads[0].name, "refs/heads/main");
    assert_eq!(heads[0].staged, "refs/staged-out/heads/main");
    assert_eq!(heads[0].source, c2);
    assert_eq!(
        engine.mapping().try_get(Direction::Tauten, &c2).unwrap(),
        Some(heads[0].target)
    );
    assert_eq!(heads[1].source, c1);

    let tags = engine.tauten_tags().unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].staged, "refs/staged-out/tags/v1");
    assert_eq!(cipher.read(&tags[0].target).unwrap().kind, ObjectKind::Tag);

    let staged: Vec<_> = refs(&cipher, "refs/staged-out/")
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(
        staged,
        [
            "refs/staged-out/heads/main",
            "refs/staged-out/heads/topic",
            "refs/staged-out/tags/v1"
        ]
    );
    // nothing outside the staging namespace is touched
    assert!(refs(&cipher, "refs/heads/").is_empty());
}

#[test]
fn failed_batch_stages_nothing() {
    let dir = TempDir::new().unwrap();
    let (plain, _, _) = populated();
    let cipher = MemoryStore::new();
    // sorts after main and topic, and points at a tree with a missing blob
    let broken_tree = plain
        .write(
            ObjectKind::Tree,
            &[b"100644 gone\0".as_slice(), &[0xEE; 20]].concat(),
        )
        .unwrap();
    let broken = commit(&plain, &broken_tree, &[], "broken");
    plain.set_reference("refs/heads/zzz", &broken, "").unwrap();

    let engine = engine(&plain, &cipher, dir.path(), &["*.key shroud"]);
    assert!(matches!(
        engine.tauten_heads(),
        Err(ShroudError::ObjectNotFound(_))
    ));
    assert!(refs(&cipher, "refs/staged-out/").is_empty());
}

#[test]
fn stale_staged_refs_are_dropped() {
    let dir = TempDir::new().unwrap();
    let (plain, _, _) = populated();
    let cipher = MemoryStore::new();
    let engine = engine(&plain, &cipher, dir.path(), &[]);

    engine.tauten_heads().unwrap();
    plain.delete_reference("refs/heads/topic").unwrap();
    engine.tauten_heads().unwrap();

    let staged: Vec<_> = refs(&cipher, "refs/staged-out/heads/")
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(staged, ["refs/staged-out/heads/main"]);
}

#[test]
fn symbolic_head_is_staged_and_promoted() {
    let dir = TempDir::new().unwrap();
    let (plain, _, c2) = populated();
    let cipher = MemoryStore::new();
    let engine = engine(&plain, &cipher, dir.path(), &["*.key shroud"]);

    let (staged, head) = engine.tauten_all(true).unwrap();
    assert_eq!(staged.len(), 3);
    let head = head.unwrap();
    assert_eq!(head.name, "refs/heads/main");
    assert_eq!(head.source, c2);
    assert_eq!(
        cipher.symbolic_target("refs/staged-out/HEAD").unwrap().as_deref(),
        Some("refs/staged-out/heads/main")
    );

    let promoted = engine.update_destination_head().unwrap();
    assert_eq!(
        promoted,
        ["refs/heads/main", "refs/heads/topic", "refs/tags/v1", "HEAD"]
    );
    assert_eq!(cipher.reference("refs/heads/main").unwrap(), Some(head.target));
    assert_eq!(
        cipher.symbolic_target("HEAD").unwrap().as_deref(),
        Some("refs/heads/main")
    );
    assert_eq!(cipher.reference("HEAD").unwrap(), Some(head.target));
}

#[test]
fn detached_head_is_staged_directly() {
    let dir = TempDir::new().unwrap();
    let (plain, c1, _) = populated();
    plain.set_reference("HEAD", &c1, "").unwrap();
    let cipher = MemoryStore::new();
    let engine = engine(&plain, &cipher, dir.path(), &[]);

    let head = engine.tauten_head().unwrap().unwrap();
    assert_eq!(head.staged, "refs/staged-out/HEAD");
    assert_eq!(head.target, c1);
    assert_eq!(cipher.reference("refs/staged-out/HEAD").unwrap(), Some(c1));

    assert_eq!(engine.update_destination_head().unwrap(), ["HEAD"]);
    assert_eq!(cipher.symbolic_target("HEAD").unwrap(), None);
    assert_eq!(cipher.reference("HEAD").unwrap(), Some(c1));
}

#[test]
fn unborn_head_stages_nothing() {
    let dir = TempDir::new().unwrap();
    let plain = MemoryStore::new();
    plain
        .set_symbolic_reference("HEAD", "refs/heads/main", "")
        .unwrap();
    let cipher = MemoryStore::new();
    let engine = engine(&plain, &cipher, dir.path(), &[]);
    assert_eq!(engine.tauten_head().unwrap(), None);
    assert!(refs(&cipher, "").is_empty());
}

#[test]
fn regain_stages_plaintext_targets_and_confirms_fetches() {
    let dir = TempDir::new().unwrap();
    let (plain, c1, c2) = populated();
    let cipher = MemoryStore::new();
    {
        let engine = engine(&plain, &cipher, dir.path(), &["*.key shroud"]);
        engine.tauten_all(true).unwrap();
        engine.update_destination_head().unwrap();
    }

    let dir2 = TempDir::new().unwrap();
    let plain2 = MemoryStore::new();
    let engine = engine(&plain2, &cipher, dir2.path(), &["*.key shroud"]);
    let heads = engine.regain_heads().unwrap();
    let tags = engine.regain_tags().unwrap();

    assert_eq!(heads[0].staged, "refs/staged-in/heads/main");
    assert_eq!(heads[0].target, c2);
    assert_eq!(heads[1].target, c1);
    assert_eq!(tags[0].staged, "refs/staged-in/tags/v1");
    assert_eq!(Some(tags[0].target), plain.reference("refs/tags/v1").unwrap());
    assert!(plain2.contains(&c2).unwrap());

    engine.confirm_fetch("refs/heads/main", &c2).unwrap();
    assert!(matches!(
        engine.confirm_fetch("refs/heads/main", &c1),
        Err(ShroudError::RequestedOidMismatch { requested, computed, .. })
            if requested == c1 && computed == c2
    ));
    assert!(matches!(
        engine.confirm_fetch("refs/heads/missing", &c1),
        Err(ShroudError::Other(_))
    ));
}

#[test]
fn key_trait_is_checked_before_opening_the_mapping() {
    let dir = TempDir::new().unwrap();
    let (plain, cipher) = (MemoryStore::new(), MemoryStore::new());
    let path = dir.path().join("oidmap.redb");

    let wrong = EngineOptions {
        key_trait: Some(other_key().key_trait(SITE).unwrap()),
        ..options(&[])
    };
    let result = Engine::initialize(&plain, &cipher, &path, &test_key(), wrong);
    assert!(matches!(result, Err(ShroudError::KeyTraitMismatch { .. })));
    assert!(!path.exists());

    let right = EngineOptions {
        key_trait: Some(test_key().key_trait(SITE).unwrap()),
        ..options(&[])
    };
    Engine::initialize(&plain, &cipher, &path, &test_key(), right).unwrap();
    assert!(path.exists());
}

#[test]
fn wrong_key_cannot_regain() {
    let dir = TempDir::new().unwrap();
    let (plain, c1, _) = populated();
    let cipher = MemoryStore::new();
    let c1_cipher = {
        let engine = engine(&plain, &cipher, dir.path(), &["*.key shroud"]);
        engine.transform_commit(&c1, Direction::Tauten).unwrap()
    };

    let dir2 = TempDir::new().unwrap();
    let plain2 = MemoryStore::new();
    let engine = Engine::initialize(
        &plain2,
        &cipher,
        &dir2.path().join("oidmap.redb"),
        &other_key(),
        options(&["*.key shroud"]),
    )
    .unwrap();
    assert!(matches!(
        engine.transform_commit(&c1_cipher, Direction::Regain),
        Err(ShroudError::CorruptEnvelope(_))
    ));
}

#[test]
fn reveal_reports_envelope_metadata() {
    let dir = TempDir::new().unwrap();
    let plain = MemoryStore::new();
    let cipher = MemoryStore::new();
    let content = text(200, 5);
    let tree = tree_of(&plain, &[("app.log", &content), ("plain.txt", b"p\n")]);
    let c1 = commit(&plain, &tree, &[], "one");
    let engine = engine(&plain, &cipher, dir.path(), &["*.log shroud compression-target-ratio"]);
    let c1_cipher = engine.transform_commit(&c1, Direction::Tauten).unwrap();
    let cipher_tree = tree_of_commit(&cipher, &c1_cipher);

    let writes = plain.write_count() + cipher.write_count();
    let reveal = engine
        .reveal(&blob_at(&cipher, &cipher_tree, "app.log"))
        .unwrap();
    assert_eq!(reveal.version, 1);
    assert!(reveal.compressed);
    assert!(reveal.payload_len < content.len() as u64);
    assert_eq!(reveal.extra_len, 0);
    assert_eq!(reveal.delta_base, None);
    assert_eq!(reveal.plaintext, content);
    assert_eq!(reveal.plain_oid, blob_at(&plain, &tree, "app.log"));
    assert_eq!(plain.write_count() + cipher.write_count(), writes);

    assert!(matches!(
        engine.reveal(&blob_at(&cipher, &cipher_tree, "plain.txt")),
        Err(ShroudError::CorruptEnvelope(_))
    ));
    assert!(matches!(
        engine.reveal(&c1_cipher),
        Err(ShroudError::UnexpectedKind { .. })
    ));
}

#[test]
fn truncate_then_rerun_rebuilds_identically() {
    let dir = TempDir::new().unwrap();
    let (plain, _, c2) = populated();
    let cipher = MemoryStore::new();
    let engine = engine(&plain, &cipher, dir.path(), &["*.key shroud"]);

    let first = engine.transform_commit(&c2, Direction::Tauten).unwrap();
    assert!(!engine.mapping().is_empty().unwrap());
    engine.truncate_mappings().unwrap();
    assert!(engine.mapping().is_empty().unwrap());
    assert_eq!(engine.transform_commit(&c2, Direction::Tauten).unwrap(), first);

    let stats = engine.finish();
    assert_eq!(stats.commits, 4);
}

#[test]
fn explicit_ref_batches_stage_only_what_was_asked() {
    let dir = TempDir::new().unwrap();
    let (plain, c1, _) = populated();
    let cipher = MemoryStore::new();
    let engine = engine(&plain, &cipher, dir.path(), &["*.key shroud"]);

    let staged = engine
        .stage_outbound_refs(&[("refs/heads/topic".to_string(), c1)])
        .unwrap();
    assert_eq!(staged.len(), 1);
    assert_eq!(
        refs(&cipher, "refs/staged-out/"),
        [("refs/staged-out/heads/topic".to_string(), staged[0].target)]
    );

    let back = engine
        .stage_inbound_refs(&[("refs/heads/topic".to_string(), staged[0].target)])
        .unwrap();
    assert_eq!(back[0].staged, "refs/staged-in/heads/topic");
    assert_eq!(back[0].target, c1);
}

#[test]
fn promotion_covers_only_the_last_outbound_batch() {
    let dir = TempDir::new().unwrap();
    let (plain, c1, _) = populated();
    let cipher = MemoryStore::new();
    let engine = engine(&plain, &cipher, dir.path(), &["*.key shroud"]);

    engine.tauten_head().unwrap();
    engine.tauten_heads().unwrap();
    let topic = engine
        .stage_outbound_refs(&[("refs/heads/topic".to_string(), c1)])
        .unwrap();

    // main and HEAD are still staged from the earlier batches
    assert!(cipher.reference("refs/staged-out/heads/main").unwrap().is_some());
    assert!(cipher.symbolic_target("refs/staged-out/HEAD").unwrap().is_some());

    assert_eq!(engine.update_destination_head().unwrap(), ["refs/heads/topic"]);
    assert_eq!(cipher.reference("refs/heads/topic").unwrap(), Some(topic[0].target));
    assert_eq!(cipher.reference("refs/heads/main").unwrap(), None);
    assert_eq!(cipher.symbolic_target("HEAD").unwrap(), None);
}

#[test]
fn outbound_batch_survives_reopening_the_engine() {
    let dir = TempDir::new().unwrap();
    let (plain, _, c2) = populated();
    let cipher = MemoryStore::new();
    {
        let engine = engine(&plain, &cipher, dir.path(), &["*.key shroud"]);
        engine.tauten_head().unwrap();
    }

    let engine = engine(&plain, &cipher, dir.path(), &["*.key shroud"]);
    assert_eq!(
        engine.update_destination_head().unwrap(),
        ["refs/heads/main", "HEAD"]
    );
    let main = cipher.reference("refs/heads/main").unwrap().unwrap();
    assert_eq!(engine.mapping().try_get(Direction::Regain, &main).unwrap(), Some(c2));
}

#[test]
fn pass_through_commit_maps_its_tree_and_blob_to_themselves() {
    let dir = TempDir::new().unwrap();
    let plain = MemoryStore::new();
    let cipher = MemoryStore::new();
    let keyed = commit(&plain, &tree_of(&plain, &[("id.key", b"k\n"), ("README", b"one\n")]), &[], "key");
    let readme_only = tree_of(&plain, &[("README", b"two\n")]);
    let child = commit(&plain, &readme_only, &[keyed], "drop the key, edit README");
    let clean_tree = tree_of(&plain, &[("README", b"three\n")]);
    let clean = commit(&plain, &clean_tree, &[], "clean root");
    plain.set_reference("refs/heads/main", &child, "").unwrap();
    plain.set_reference("refs/heads/clean", &clean, "").unwrap();

    let engine = engine(&plain, &cipher, dir.path(), &["*.key shroud"]);
    engine.tauten_heads().unwrap();
    let mapping = engine.mapping();

    let readme = blob_at(&plain, &readme_only, "README");
    assert_eq!(mapping.try_get(Direction::Tauten, &readme).unwrap(), Some(readme));
    assert_eq!(mapping.try_get(Direction::Regain, &readme).unwrap(), Some(readme));
    assert_eq!(
        mapping.try_get(Direction::Tauten, &readme_only).unwrap(),
        Some(readme_only)
    );
    assert_eq!(mapping.try_get(Direction::Tauten, &clean).unwrap(), Some(clean));

    // an ancestor carried an encoded blob, so the commit itself changes
    let rewritten = mapping.try_get(Direction::Tauten, &child).unwrap().unwrap();
    assert_ne!(rewritten, child);
    assert_eq!(tree_of_commit(&cipher, &rewritten), readme_only);
}
