//! Sender/receiver replication round-trips: full sync, incremental
//! deltas, removals, slot reuse, and receiver-side change detection.

use tagtree::{Accessor, BitReader, BitWriter, NodeKind, Tree};

/// Opt-in log output: `RUST_LOG=tagtree=debug cargo test`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// One tick: emit from `sender` against `baseline`, apply on `receiver`.
/// Returns the new baseline when something was sent.
fn replicate(
    sender: &Tree,
    receiver: &Tree,
    baseline: Option<&tagtree::Baseline>,
) -> Option<tagtree::Baseline> {
    let mut w = BitWriter::new();
    let new_baseline = sender.write_delta(&mut w, baseline)?;
    let bytes = w.finish();
    let mut r = BitReader::new(&bytes);
    assert!(receiver.apply_delta(&mut r), "apply failed");
    assert!(!r.is_error());
    sender.clear_dirty_this_frame();
    Some(new_baseline)
}

fn populate(sender: &Tree) {
    let root = sender.accessor();
    root.child_by_key("hp").ensure_set_i32(100);
    let items = root.child_by_key("items");
    assert!(items.ensure_list().is_ok());
    for label in ["a", "b", "c"] {
        items
            .list_add()
            .unwrap()
            .ensure_set_string(label.to_string());
    }
}

#[test]
fn delta_round_trip_from_empty_baseline() {
    init_tracing();
    let sender = Tree::new();
    let receiver = Tree::new();

    // Baseline taken while still empty: the following changes travel as
    // an incremental delta, not a full sync.
    let baseline = sender.baseline();
    populate(&sender);

    let new_baseline =
        replicate(&sender, &receiver, Some(&baseline)).expect("changes were pending");
    assert_eq!(receiver.save_bytes(), sender.save_bytes());
    assert_eq!(receiver.data_version(), sender.data_version());
    assert_eq!(receiver.node_count(), sender.node_count());
    assert_eq!(
        receiver.accessor().child_by_key("hp").get_i32(),
        Some(100)
    );

    // Nothing changed since: nothing to send.
    let mut w = BitWriter::new();
    assert!(sender.write_delta(&mut w, Some(&new_baseline)).is_none());
}

#[test]
fn full_sync_then_quiet() {
    let sender = Tree::new();
    populate(&sender);
    let receiver = Tree::new();

    let baseline = replicate(&sender, &receiver, None).expect("initial full sync");
    assert_eq!(receiver.save_bytes(), sender.save_bytes());
    assert!(receiver.accessor().is_equal(&sender.accessor()));

    // Unchanged container: no further traffic, receiver stays identical.
    let mut w = BitWriter::new();
    assert!(sender.write_delta(&mut w, Some(&baseline)).is_none());
    assert_eq!(w.byte_len(), 0);
    assert_eq!(receiver.save_bytes(), sender.save_bytes());
}

#[test]
fn untouched_sender_defers_first_sync() {
    let sender = Tree::new();
    let mut w = BitWriter::new();
    assert!(sender.write_delta(&mut w, None).is_none());

    // After the first real change the full sync goes out.
    sender.accessor().child_by_key("x").ensure_set_bool(true);
    let mut w = BitWriter::new();
    assert!(sender.write_delta(&mut w, None).is_some());
    assert!(sender.is_replicated());
}

#[test]
fn incremental_update_and_remove() {
    let sender = Tree::new();
    populate(&sender);
    let receiver = Tree::new();
    let baseline = replicate(&sender, &receiver, None).unwrap();

    // Update one value, remove one key.
    sender.accessor().child_by_key("hp").try_set_i32(55);
    sender.accessor().map_remove("items");
    let baseline = replicate(&sender, &receiver, Some(&baseline)).unwrap();

    assert_eq!(receiver.accessor().child_by_key("hp").get_i32(), Some(55));
    assert!(!receiver.accessor().child_by_key("items").exists());
    assert_eq!(receiver.save_bytes(), sender.save_bytes());
    assert_eq!(receiver.node_count(), sender.node_count());

    // Third tick after more mutation: still converges byte-for-byte.
    sender.accessor().child_by_key("mp").ensure_set_i32(9);
    replicate(&sender, &receiver, Some(&baseline)).unwrap();
    assert_eq!(receiver.save_bytes(), sender.save_bytes());
}

#[test]
fn slot_reuse_travels_as_replacement() {
    let sender = Tree::new();
    sender.accessor().child_by_key("old").ensure_set_i32(1);
    let receiver = Tree::new();
    let baseline = replicate(&sender, &receiver, None).unwrap();

    // Free the slot and reuse it under a new key; the generation bumps,
    // so the receiver replaces the cell rather than updating it.
    sender.accessor().map_remove("old");
    sender.accessor().child_by_key("new").ensure_set_string("fresh".into());
    replicate(&sender, &receiver, Some(&baseline)).unwrap();

    assert!(!receiver.accessor().child_by_key("old").exists());
    assert_eq!(
        receiver.accessor().child_by_key("new").get_string(),
        Some("fresh".to_string())
    );
    assert_eq!(receiver.save_bytes(), sender.save_bytes());
}

#[test]
fn receiver_change_detectors_fire() {
    let sender = Tree::new();
    populate(&sender);
    let receiver = Tree::new();
    let baseline = replicate(&sender, &receiver, None).unwrap();

    let receiver_hp = receiver.accessor().child_by_key("hp");
    let receiver_root = receiver.accessor();
    receiver_hp.mark();
    receiver_root.mark_subtree();
    receiver_root.mark();
    assert!(!receiver_hp.is_data_changed());
    assert!(!receiver_root.is_subtree_changed());

    sender.accessor().child_by_key("hp").try_set_i32(42);
    replicate(&sender, &receiver, Some(&baseline)).unwrap();

    assert!(receiver_hp.is_data_changed());
    assert!(
        receiver_root.is_subtree_changed(),
        "subtree versions bubble on the receiver"
    );
    assert_eq!(receiver_hp.get_i32(), Some(42));
}

#[test]
fn receiver_does_not_redirty_itself() {
    let sender = Tree::new();
    populate(&sender);
    let receiver = Tree::new();
    let baseline = replicate(&sender, &receiver, None).unwrap();
    receiver.clear_dirty_this_frame();

    sender.accessor().child_by_key("hp").try_set_i32(7);
    replicate(&sender, &receiver, Some(&baseline)).unwrap();
    assert!(
        !receiver.is_dirty_this_frame(),
        "applying a delta must not schedule a tick on the receiver"
    );
}

#[test]
fn deep_structure_replicates() {
    let sender = Tree::new();
    let squad = sender.accessor().child_by_key("squad");
    for i in 0..4 {
        let member = squad.child_by_key(format!("m{i}").as_str());
        member.child_by_key("hp").ensure_set_i32(100 + i);
        let loadout = member.child_by_key("loadout");
        assert!(loadout.ensure_list().is_ok());
        loadout
            .list_add()
            .unwrap()
            .ensure_set_string(format!("weapon{i}"));
    }

    let receiver = Tree::new();
    let baseline = replicate(&sender, &receiver, None).unwrap();
    assert!(receiver.accessor().is_equal(&sender.accessor()));

    // Deep mutation travels incrementally.
    sender
        .accessor()
        .child_by_key("squad")
        .child_by_key("m2")
        .child_by_key("hp")
        .try_set_i32(1);
    replicate(&sender, &receiver, Some(&baseline)).unwrap();
    assert_eq!(
        receiver
            .accessor()
            .child_by_key("squad")
            .child_by_key("m2")
            .child_by_key("hp")
            .get_i32(),
        Some(1)
    );
    assert_eq!(receiver.save_bytes(), sender.save_bytes());
    assert!(receiver.validate_integrity());
}

#[test]
fn accessor_net_path_round_trip() {
    let tree = Tree::new();
    let items = tree.accessor().child_by_key("items");
    assert!(items.ensure_list().is_ok());
    items.list_add().unwrap().ensure_set_i32(5);
    let deep = items.child_by_index(0);

    let mut w = BitWriter::new();
    deep.write_net(&mut w);
    let bytes = w.finish();

    let mut r = BitReader::new(&bytes);
    let rebuilt = Accessor::read_net(&mut r, &tree);
    assert!(!r.is_error());
    assert_eq!(rebuilt.path_segments(), deep.path_segments());
    assert_eq!(rebuilt.get_i32(), Some(5));
}

#[test]
fn net_path_rejects_garbage_tags() {
    let tree = Tree::new();
    let mut w = BitWriter::new();
    w.write_bit(true);
    w.write_packed_u32(1);
    w.write_u8(9); // neither key nor index
    let bytes = w.finish();
    let mut r = BitReader::new(&bytes);
    let rebuilt = Accessor::read_net(&mut r, &tree);
    assert!(r.is_error());
    assert!(!rebuilt.is_valid());
    assert!(rebuilt.path_segments().is_empty());
}

#[test]
fn kinds_survive_replication() {
    let sender = Tree::new();
    let root = sender.accessor();
    root.child_by_key("guid")
        .ensure_set_guid(tagtree::Uuid::from_bytes([9; 16]));
    root.child_by_key("pos")
        .ensure_set_vec3(tagtree::Vec3::new(1.5, -2.0, 0.25));
    root.child_by_key("bytes")
        .ensure_set_array_i8(vec![-3, 0, 3]);
    root.child_by_key("when")
        .ensure_set_date_time(tagtree::DateTime::from_ticks(638_000_000));

    let receiver = Tree::new();
    replicate(&sender, &receiver, None).unwrap();

    let got = receiver.accessor();
    assert_eq!(got.child_by_key("guid").kind(), Some(NodeKind::Guid));
    assert_eq!(
        got.child_by_key("pos").get_vec3(),
        Some(tagtree::Vec3::new(1.5, -2.0, 0.25))
    );
    assert_eq!(got.child_by_key("bytes").get_array_i8(), Some(vec![-3, 0, 3]));
    assert_eq!(
        got.child_by_key("when").get_date_time(),
        Some(tagtree::DateTime::from_ticks(638_000_000))
    );
    assert_eq!(receiver.save_bytes(), sender.save_bytes());
}

#[test]
fn truncated_delta_leaves_receiver_consistent() {
    let sender = Tree::new();
    populate(&sender);

    let mut w = BitWriter::new();
    sender.write_delta(&mut w, None).unwrap();
    let bytes = w.finish();

    let receiver = Tree::new();
    let truncated = &bytes[..bytes.len() / 2];
    let mut r = BitReader::new(truncated);
    assert!(!receiver.apply_delta(&mut r));
    assert!(r.is_error());
    // Stale, but the container stays usable: a reset restores the empty
    // root invariant.
    receiver.reset();
    assert_eq!(receiver.node_count(), 1);
    assert!(receiver.validate_integrity());
}

#[test]
fn replicate_then_keep_writing() {
    // Interleave local writes and ticks over several frames; the receiver
    // must track the net effect of each frame.
    let sender = Tree::new();
    let receiver = Tree::new();
    let mut baseline = None;

    for round in 0..5i32 {
        sender
            .accessor()
            .child_by_key("round")
            .ensure_set_i32(round);
        let counters = sender.accessor().child_by_key("counters");
        assert!(counters.ensure_list().is_ok() || counters.is_list());
        counters.list_add().unwrap().ensure_set_i32(round * 10);

        baseline = replicate(&sender, &receiver, baseline.as_ref()).or(baseline);
        assert_eq!(receiver.save_bytes(), sender.save_bytes(), "round {round}");
    }
    assert_eq!(
        receiver.accessor().child_by_key("counters").list_len(),
        Some(5)
    );
}
