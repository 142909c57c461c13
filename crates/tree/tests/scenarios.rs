//! End-to-end scenarios over a single tree: creation, writes, list
//! growth, copies, and the documented boundary behaviors.

use tagtree::slab::SlabAllocator;
use tagtree::{Accessor, NodeKind, OpResult, Tree};

#[test]
fn empty_init() {
    let tree = Tree::new();
    assert_eq!(tree.node_count(), 1);
    assert_eq!(tree.accessor().kind(), Some(NodeKind::Map));
    assert_eq!(tree.data_version(), 0);
    assert_eq!(tree.struct_version(), 0);
}

#[test]
fn simple_write() {
    let tree = Tree::new();
    let root = tree.accessor();

    let report = root.child_by_key("hp").ensure_set_i32(100);
    assert_eq!(report, OpResult::Success);

    assert_eq!(tree.node_count(), 2);
    assert_eq!(tree.struct_version(), 1);
    assert_eq!(tree.data_version(), 1);
    assert!(root.subtree_version().unwrap() > 0);
    assert_eq!(root.child_by_key("hp").get_i32(), Some(100));
}

#[test]
fn idempotent_write() {
    let tree = Tree::new();
    let hp = tree.accessor().child_by_key("hp");
    assert_eq!(hp.ensure_set_i32(100), OpResult::Success);
    let data_version = tree.data_version();
    let struct_version = tree.struct_version();

    assert_eq!(hp.ensure_set_i32(100), OpResult::SameAndNotChange);
    assert_eq!(tree.data_version(), data_version);
    assert_eq!(tree.struct_version(), struct_version);
}

fn string_items(items: &Accessor) -> Vec<String> {
    items
        .accessors_from_list()
        .unwrap()
        .iter()
        .map(|a| a.get_string().unwrap())
        .collect()
}

#[test]
fn list_growth_and_removal() {
    let tree = Tree::new();
    let items = tree.accessor().child_by_key("items");
    assert!(items.ensure_list().is_ok());

    for label in ["a", "b", "c"] {
        let element = items.list_add().unwrap();
        assert_eq!(element.ensure_set_string(label.to_string()), OpResult::Success);
    }
    assert_eq!(items.list_len(), Some(3));
    assert_eq!(string_items(&items), ["a", "b", "c"]);

    assert_eq!(items.list_remove(1, false), OpResult::Success);
    assert_eq!(string_items(&items), ["a", "c"]);

    // Rebuild and exercise swap-remove: the last element moves into the
    // removed slot.
    assert_eq!(items.list_clear(), OpResult::Success);
    for label in ["a", "b", "c"] {
        items
            .list_add()
            .unwrap()
            .ensure_set_string(label.to_string());
    }
    assert_eq!(items.list_remove(1, true), OpResult::Success);
    assert_eq!(items.list_len(), Some(2));
    assert_eq!(string_items(&items), ["a", "c"]);

    // Swap-removing the last element just shrinks the list.
    assert_eq!(items.list_remove(1, true), OpResult::Success);
    assert_eq!(string_items(&items), ["a"]);
}

#[test]
fn list_insert_bounds() {
    let tree = Tree::new();
    let items = tree.accessor().child_by_key("items");
    assert!(items.ensure_list().is_ok());
    items.list_add().unwrap().ensure_set_string("x".into());

    // index == len appends
    let appended = items.list_insert(1).unwrap();
    assert_eq!(appended.list_current_index(), Some(1));

    assert_eq!(
        items.list_insert(-1).unwrap_err(),
        OpResult::PermissionDenied
    );
    assert_eq!(
        items.list_insert(3).unwrap_err(),
        OpResult::PermissionDenied
    );
}

#[test]
fn lists_never_grow_through_index() {
    let tree = Tree::new();
    let items = tree.accessor().child_by_key("items");
    assert!(items.ensure_list().is_ok());

    let report = items.child_by_index(0).ensure_set_i32(1);
    assert_eq!(report, OpResult::PermissionDenied);
    assert_eq!(items.list_len(), Some(0));
}

#[test]
fn deep_copy_with_redirect() {
    let a = Tree::new();
    let ax = a.accessor().child_by_key("x");
    let y = ax.child_by_key("y");
    assert!(y.ensure_list().is_ok());
    y.list_add().unwrap().ensure_set_i32(1);
    y.list_add().unwrap().ensure_set_i32(2);

    let b = Tree::new();
    let bz = b.accessor().child_by_key("z");
    assert_eq!(bz.ensure_copy_from(&ax), OpResult::Success);

    let bzy = bz.child_by_key("y");
    assert!(bzy.is_equal(&y), "copied subtree is deep-equal");
    assert_eq!(bzy.child_by_index(0).get_i32(), Some(1));

    // Independent storage: mutating the copy leaves the source alone.
    assert_eq!(bzy.child_by_index(0).try_set_i32(99), OpResult::Success);
    assert_eq!(y.child_by_index(0).get_i32(), Some(1));
    assert!(!bzy.is_equal(&y));
}

#[test]
fn copy_between_leaves_writes_in_place() {
    let tree = Tree::new();
    let root = tree.accessor();
    root.child_by_key("a").ensure_set_i32(7);
    root.child_by_key("b").ensure_set_string("old".into());

    let b = root.child_by_key("b");
    assert_eq!(b.try_copy_from(&root.child_by_key("a")), OpResult::Success);
    assert_eq!(b.get_i32(), Some(7));
    // Same value again: idempotence signal, no version movement.
    let version = tree.data_version();
    assert_eq!(
        b.try_copy_from(&root.child_by_key("a")),
        OpResult::SameAndNotChange
    );
    assert_eq!(tree.data_version(), version);
}

#[test]
fn swap_rejects_ancestry_and_swaps_subtrees() {
    let tree = Tree::new();
    let root = tree.accessor();
    let x = root.child_by_key("x");
    x.child_by_key("inner").ensure_set_i32(1);
    let y = root.child_by_key("y");
    y.ensure_set_string("leaf".into());

    assert_eq!(x.try_swap(&x.child_by_key("inner")), OpResult::InvalidId);
    assert_eq!(x.child_by_key("inner").try_swap(&x), OpResult::InvalidId);

    assert_eq!(x.try_swap(&y), OpResult::Success);
    assert_eq!(x.get_string(), Some("leaf".to_string()));
    assert_eq!(y.child_by_key("inner").get_i32(), Some(1));
    assert!(tree.validate_integrity());
}

#[test]
fn swap_across_trees() {
    let a = Tree::new();
    a.accessor().child_by_key("v").ensure_set_i32(1);
    let b = Tree::new();
    b.accessor()
        .child_by_key("v")
        .child_by_key("deep")
        .ensure_set_i32(2);

    let av = a.accessor().child_by_key("v");
    let bv = b.accessor().child_by_key("v");
    assert_eq!(av.try_swap(&bv), OpResult::Success);
    assert_eq!(av.child_by_key("deep").get_i32(), Some(2));
    assert_eq!(bv.get_i32(), Some(1));
    assert!(a.validate_integrity());
    assert!(b.validate_integrity());
}

#[test]
fn path_depth_limit() {
    let tree = Tree::new();
    let mut deep = tree.accessor();
    for i in 0..64 {
        deep = deep.child_by_key(format!("n{i}").as_str());
    }
    assert_eq!(deep.ensure_set_i32(1), OpResult::Success, "depth 64 works");

    let too_deep = deep.child_by_key("one-more");
    assert_eq!(too_deep.ensure_set_i32(1), OpResult::InvalidContainer);
}

#[test]
fn allocator_hard_cap() {
    let mut slab = SlabAllocator::new();
    for _ in 0..65534 {
        assert!(slab.allocate().is_valid());
    }
    assert!(!slab.allocate().is_valid(), "65535th node is refused");
    assert_eq!(slab.current_active(), 65534);
}

#[test]
fn accessors_survive_tree_drop() {
    let tree = Tree::new();
    let hp = tree.accessor().child_by_key("hp");
    hp.ensure_set_i32(5);
    drop(tree);

    assert!(!hp.is_valid());
    assert_eq!(hp.get_i32(), None);
    assert_eq!(hp.try_set_i32(6), OpResult::InvalidContainer);
    assert_eq!(hp.remove(), 0);
}

#[test]
fn change_marks() {
    let tree = Tree::new();
    let hp = tree.accessor().child_by_key("hp");
    hp.ensure_set_i32(10);

    hp.mark();
    assert!(!hp.is_data_changed());

    assert_eq!(hp.try_set_i32(11), OpResult::Success);
    assert!(hp.is_data_changed());
    assert!(hp.is_data_changed_and_mark());
    assert!(!hp.is_data_changed());

    // A write elsewhere does not disturb this node's data mark.
    tree.accessor().child_by_key("mp").ensure_set_i32(1);
    assert!(!hp.is_data_changed());
}

#[test]
fn subtree_marks_see_descendant_writes() {
    let tree = Tree::new();
    let root = tree.accessor();
    let pet = root.child_by_key("pet");
    pet.child_by_key("name").ensure_set_string("Mog".into());

    pet.mark_subtree();
    root.mark();
    assert!(!pet.is_subtree_changed());

    pet.child_by_key("name").try_set_string("Mogri".into());
    assert!(pet.is_subtree_changed());
    assert!(root.is_subtree_changed(), "root sees descendant writes");
}

#[test]
fn remove_returns_freed_count_and_detaches() {
    let tree = Tree::new();
    let root = tree.accessor();
    let x = root.child_by_key("x");
    x.child_by_key("a").ensure_set_i32(1);
    x.child_by_key("b").child_by_key("c").ensure_set_i32(2);
    assert_eq!(tree.node_count(), 5);

    assert_eq!(x.remove(), 4, "x, a, b, c all freed");
    assert_eq!(tree.node_count(), 1);
    assert!(!root.child_by_key("x").exists());
    assert_eq!(root.map_len(), Some(0));
    assert!(tree.validate_integrity());
}

#[test]
fn visit_walks_depth_first() {
    let tree = Tree::new();
    let root = tree.accessor();
    root.child_by_key("a").ensure_set_i32(1);
    let list = root.child_by_key("list");
    assert!(list.ensure_list().is_ok());
    list.list_add().unwrap().ensure_set_string("x".into());

    let mut seen = Vec::new();
    root.visit(|depth, kind, key, index, _accessor| {
        seen.push((
            depth,
            kind,
            key.map(|k| k.as_str().to_string()),
            index,
        ));
    });

    assert_eq!(seen.len(), 4);
    assert_eq!(seen[0], (0, NodeKind::Map, None, None));
    assert_eq!(seen[1], (1, NodeKind::Int32, Some("a".to_string()), None));
    assert_eq!(seen[2], (1, NodeKind::List, Some("list".to_string()), None));
    assert_eq!(seen[3], (2, NodeKind::String, None, Some(0)));
}

#[test]
fn generic_accessors() {
    let tree = Tree::new();
    let root = tree.accessor();
    root.child_by_key("small").ensure_set_i8(5);
    root.child_by_key("flag").ensure_set_bool(true);
    root.child_by_key("ratio").ensure_set_f32(0.5);

    assert_eq!(root.child_by_key("small").get_generic_int(), Some(5));
    assert_eq!(root.child_by_key("flag").get_generic_int(), Some(1));
    assert_eq!(root.child_by_key("ratio").get_generic_float(), Some(0.5));

    assert_eq!(
        root.child_by_key("small").try_set_generic_int(1000),
        OpResult::Success
    );
    assert_eq!(root.child_by_key("small").get_i8(), Some(127), "clamped");
    assert_eq!(
        root.child_by_key("ratio").try_set_generic_int(1),
        OpResult::NodeTypeMismatch
    );
}

#[test]
fn ensure_respects_existing_kind() {
    let tree = Tree::new();
    let hp = tree.accessor().child_by_key("hp");
    hp.ensure_set_i32(10);

    assert_eq!(hp.ensure_set_string("oops".into()), OpResult::NodeTypeMismatch);
    assert_eq!(hp.get_i32(), Some(10));

    // Override is the explicit escape hatch.
    assert_eq!(hp.override_to_string("now a string".into()), OpResult::Success);
    assert_eq!(hp.get_string(), Some("now a string".to_string()));
}

#[test]
fn ensure_through_wrong_kind_is_denied() {
    let tree = Tree::new();
    let hp = tree.accessor().child_by_key("hp");
    hp.ensure_set_i32(10);

    let below = tree.accessor().child_by_key("hp").child_by_key("sub");
    assert_eq!(below.ensure_set_i32(1), OpResult::PermissionDenied);

    // Force mode re-kinds the intermediate and destroys the old value.
    assert_eq!(below.override_to_i32(1), OpResult::Success);
    assert!(tree.accessor().child_by_key("hp").is_map());
}
