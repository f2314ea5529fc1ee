use lodestar_ledger::ArtifactStore;

#[test]
fn identical_bytes_share_an_id_and_do_not_grow_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(dir.path()).unwrap();
    let first = store.save("draft", b"same bytes", &[]).unwrap();
    let second = store.save("draft", b"same bytes", &[]).unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.content_hash, second.content_hash);
    assert_eq!(first.id.len(), 16);
    assert_eq!(store.count().unwrap(), 1);

    let other = store.save("draft", b"other bytes", &[]).unwrap();
    assert_ne!(other.id, first.id);
    assert_eq!(store.count().unwrap(), 2);
}

#[test]
fn lineage_is_carried_and_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(dir.path()).unwrap();
    let draft = store.save_text("draft", "draft text", &[]).unwrap();
    let verify = store
        .save_text("verify", "looks fine", &[draft.id.clone()])
        .unwrap();
    let refine = store
        .save_text(
            "refine",
            "better text",
            &[draft.id.clone(), verify.id.clone()],
        )
        .unwrap();
    assert_eq!(refine.lineage, vec![draft.id.clone(), verify.id.clone()]);
    assert_eq!(
        store.lineage_of(&refine.id).unwrap(),
        Some(vec![draft.id.clone(), verify.id])
    );
    assert_eq!(store.load(&refine).unwrap(), b"better text".to_vec());
    assert!(store.lineage_of("missing").unwrap().is_none());
}

#[test]
fn id_is_independent_of_type() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(dir.path()).unwrap();
    let a = store.save("json", b"{}", &[]).unwrap();
    let b = store.save("txt", b"{}", &[]).unwrap();
    assert_eq!(a.id, b.id);
    assert_ne!(a.path, b.path);
}
