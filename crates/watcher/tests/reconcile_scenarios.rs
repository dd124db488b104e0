//! Reconciler behavior against real directory trees
//!
//! Each test changes the tree on disk and then applies the events the kernel
//! reports for that change.

mod common;

use common::*;
use dtree_core::{Event, EventKind, OverflowStrategy, WatchId};
use dtree_watcher::{Flow, KernelWatcher, Policy, WatchError};

fn permissive() -> Policy {
    Policy {
        abort_on_cache_problem: false,
        ..Policy::default()
    }
}

#[tokio::test]
async fn test_create_rename_delete_until_root_is_gone() {
    let mut fx = Fixture::new(&[]);
    let root = fx.id("root");

    fx.mkdir("root/b");
    assert_eq!(fx.handle(create(root, "b")).unwrap(), Flow::Continue);
    let b = fx.id("root/b");
    assert_eq!(fx.cached(), vec!["root", "root/b"]);

    fx.rename("root/b", "root/c");
    fx.handle(moved_from(root, "b", 7)).unwrap();
    fx.handle(moved_to(root, "c", 7)).unwrap();
    fx.handle(move_self(b)).unwrap();
    assert_eq!(fx.cached(), vec!["root", "root/c"]);
    assert_eq!(fx.id("root/c"), b);

    fx.rmdir("root/c");
    fx.handle(delete_self(b)).unwrap();
    fx.handle(ignored(b)).unwrap();
    assert_eq!(fx.cached(), vec!["root"]);

    fx.rmdir("root");
    assert_eq!(fx.handle(delete_self(root)).unwrap(), Flow::RootsExhausted);
    assert!(fx.reconciler.cache().is_empty());
    assert_eq!(fx.reconciler.roots().live_count(), 0);
}

#[tokio::test]
async fn test_create_watches_subdirectories_made_before_the_event() {
    let mut fx = Fixture::new(&[]);
    let root = fx.id("root");

    // mkdir -p finishes before the create is read
    std::fs::create_dir_all(fx.path("root/new/a/b")).unwrap();
    fx.handle(create(root, "new")).unwrap();

    assert_eq!(
        fx.cached(),
        vec!["root", "root/new", "root/new/a", "root/new/a/b"]
    );
    assert_eq!(fx.reconciler.stats().created, 1);
}

#[tokio::test]
async fn test_rename_rewrites_whole_subtree() {
    let mut fx = Fixture::new(&["root/x/y/z", "root/other"]);
    let root = fx.id("root");
    let other = fx.id("root/other");
    let ids = (fx.id("root/x"), fx.id("root/x/y"), fx.id("root/x/y/z"));

    fx.rename("root/x", "root/other/w");
    fx.handle(moved_from(root, "x", 11)).unwrap();
    fx.handle(moved_to(other, "w", 11)).unwrap();

    assert_eq!(
        fx.cached(),
        vec![
            "root",
            "root/other",
            "root/other/w",
            "root/other/w/y",
            "root/other/w/y/z"
        ]
    );
    assert_eq!(
        (
            fx.id("root/other/w"),
            fx.id("root/other/w/y"),
            fx.id("root/other/w/y/z")
        ),
        ids
    );
    assert!(!fx.reconciler.has_pending_moves());
    assert_eq!(fx.reconciler.stats().renamed, 1);
}

#[tokio::test]
async fn test_rename_of_uncached_directory_watches_destination() {
    let mut fx = Fixture::new(&[]);
    let root = fx.id("root");

    // Created and renamed before either event is read
    fx.mkdir("root/b");
    fx.rename("root/b", "root/c");
    fx.handle(create(root, "b")).unwrap();
    fx.handle(moved_from(root, "b", 3)).unwrap();
    fx.handle(moved_to(root, "c", 3)).unwrap();

    assert_eq!(fx.cached(), vec!["root", "root/c"]);
}

#[tokio::test]
async fn test_rename_does_not_rebind_directory_recreated_at_old_name() {
    let mut fx = Fixture::new(&[]);
    let root = fx.id("root");

    // mkdir b; mv b c; mkdir b, all before the first event is read
    fx.mkdir("root/b");
    fx.rename("root/b", "root/c");
    fx.mkdir("root/b");

    fx.handle(create(root, "b")).unwrap();
    let new_b = fx.id("root/b");
    fx.handle(moved_from(root, "b", 7)).unwrap();
    fx.handle(moved_to(root, "c", 7)).unwrap();
    fx.handle(create(root, "b")).unwrap();

    assert_eq!(fx.cached(), vec!["root", "root/b", "root/c"]);
    assert_eq!(fx.id("root/b"), new_b);
    assert_ne!(fx.id("root/c"), new_b);
    assert!(!fx.reconciler.check().unwrap().is_divergent());
}

#[tokio::test]
async fn test_rename_to_vanished_destination_keeps_watch_identity() {
    let mut fx = Fixture::new(&[]);
    let root = fx.id("root");

    fx.mkdir("root/b");
    fx.handle(create(root, "b")).unwrap();
    let b = fx.id("root/b");

    fx.rename("root/b", "root/c");
    fx.rmdir("root/c");
    fx.handle(moved_from(root, "b", 8)).unwrap();
    fx.handle(moved_to(root, "c", 8)).unwrap();
    assert_eq!(fx.id("root/c"), b);

    fx.handle(delete_self(b)).unwrap();
    fx.handle(ignored(b)).unwrap();
    assert_eq!(fx.cached(), vec!["root"]);
}

#[tokio::test]
async fn test_unpaired_move_out_superseded_by_next_event() {
    let mut fx = Fixture::new(&["root/out/deep", "root/keep", "elsewhere"]);
    let root = fx.id("root");
    let out = fx.id("root/out");
    let deep = fx.id("root/out/deep");

    fx.rename("root/out", "elsewhere/out");
    fx.handle(moved_from(root, "out", 5)).unwrap();
    assert!(fx.reconciler.has_pending_moves());
    // Still cached until something else arrives
    assert!(fx.is_cached("root/out"));

    fx.mkdir("root/fresh");
    fx.handle(create(root, "fresh")).unwrap();

    assert_eq!(fx.cached(), vec!["root", "root/fresh", "root/keep"]);
    assert!(!fx.reconciler.watcher().is_watched(out));
    assert!(!fx.reconciler.watcher().is_watched(deep));
    assert_eq!(fx.reconciler.stats().moved_out, 1);

    // The removed watches report Ignored without tripping the cache checks
    fx.drain().await.unwrap();
    assert_eq!(fx.reconciler.stats().stale, 0);
}

#[tokio::test]
async fn test_unpaired_move_out_expired_by_window() {
    let mut fx = Fixture::new(&["root/out", "elsewhere"]);
    let root = fx.id("root");

    fx.rename("root/out", "elsewhere/out");
    fx.handle(moved_from(root, "out", 9)).unwrap();

    assert_eq!(fx.reconciler.expire_pending_moves(), 1);
    assert_eq!(fx.cached(), vec!["root"]);
    assert!(!fx.reconciler.has_pending_moves());
}

#[tokio::test]
async fn test_events_on_moved_out_watch_are_stale() {
    let mut fx = Fixture::new(&["root/out", "elsewhere"]);
    let root = fx.id("root");
    let out = fx.id("root/out");

    fx.rename("root/out", "elsewhere/out");
    fx.handle(moved_from(root, "out", 9)).unwrap();
    fx.reconciler.expire_pending_moves();

    // Activity in the departed directory before its Ignored is read
    std::fs::create_dir(fx.path("elsewhere/out/sub")).unwrap();
    fx.handle(create(out, "sub")).unwrap();
    fx.handle(move_self(out)).unwrap();

    assert_eq!(fx.reconciler.stats().stale, 2);
    assert_eq!(fx.cached(), vec!["root"]);
}

#[tokio::test]
async fn test_move_in_from_outside_is_a_create() {
    let mut fx = Fixture::new(&["elsewhere/in/sub"]);
    let root = fx.id("root");

    fx.rename("elsewhere/in", "root/in");
    fx.handle(moved_to(root, "in", 21)).unwrap();

    assert_eq!(fx.cached(), vec!["root", "root/in", "root/in/sub"]);
    assert_eq!(fx.reconciler.stats().renamed, 0);
}

#[tokio::test]
async fn test_overflow_rebuilds_from_disk() {
    let mut fx = Fixture::new(&["root/a"]);

    // Changes whose events were lost
    fx.mkdir("root/b");
    fx.rmdir("root/a");
    fx.handle(moved_from(fx.id("root"), "x", 1)).unwrap();
    fx.handle(Event::overflow()).unwrap();

    assert_eq!(fx.cached(), vec!["root", "root/b"]);
    assert!(!fx.reconciler.has_pending_moves());
    assert_eq!(fx.reconciler.stats().overflows, 1);
    assert_eq!(fx.reconciler.stats().rebuilds, 1);
    assert_eq!(fx.reconciler.watcher().diagnostics().resets, 1);
}

#[tokio::test]
async fn test_overflow_abort_strategy_is_divergence() {
    let policy = Policy {
        overflow: OverflowStrategy::Abort,
        ..Policy::default()
    };
    let mut fx = Fixture::with_policy(&[], policy);

    let result = fx.handle(Event::overflow());

    assert!(matches!(result, Err(WatchError::Divergence(_))));
}

#[tokio::test]
async fn test_deleting_one_of_two_roots() {
    let mut fx = Fixture::with_roots(&["r1", "r2"], &["r1/sub"], Policy::default());
    let r1 = fx.id("r1");
    let sub = fx.id("r1/sub");
    let r2 = fx.id("r2");

    fx.rmdir("r1/sub");
    fx.handle(delete_self(sub)).unwrap();
    fx.rmdir("r1");
    assert_eq!(fx.handle(delete_self(r1)).unwrap(), Flow::Continue);
    assert_eq!(fx.reconciler.roots().live_count(), 1);

    // The remaining root keeps working
    fx.mkdir("r2/x");
    fx.handle(create(r2, "x")).unwrap();
    assert_eq!(fx.cached(), vec!["r2", "r2/x"]);

    fx.handle(ignored(sub)).unwrap();
    fx.handle(ignored(r1)).unwrap();
    assert_eq!(fx.reconciler.stats().roots_retired, 1);
}

#[tokio::test]
async fn test_root_renamed_away_is_retired() {
    let mut fx = Fixture::with_roots(&["r1", "r2"], &["r1/sub"], Policy::default());
    let r1 = fx.id("r1");

    fx.rename("r1", "gone");
    assert_eq!(fx.handle(move_self(r1)).unwrap(), Flow::Continue);

    assert_eq!(fx.cached(), vec!["r2"]);
    assert!(!fx.reconciler.roots().is_root(&fx.path("r1")));
    assert_eq!(fx.reconciler.watcher().watch_count(), 1);
}

#[tokio::test]
async fn test_last_root_renamed_away_exhausts() {
    let mut fx = Fixture::new(&[]);
    let root = fx.id("root");

    fx.rename("root", "moved");

    assert_eq!(fx.handle(move_self(root)).unwrap(), Flow::RootsExhausted);
}

#[tokio::test]
async fn test_unmount_drops_subtree() {
    let mut fx = Fixture::new(&["root/mnt/a/b", "root/keep"]);
    let mnt = fx.id("root/mnt");

    fx.handle(Event::on_watch(mnt, EventKind::Unmount)).unwrap();

    assert_eq!(fx.cached(), vec!["root", "root/keep"]);
    fx.handle(ignored(mnt)).unwrap();
    fx.drain().await.unwrap();
    assert_eq!(fx.cached(), vec!["root", "root/keep"]);
}

#[tokio::test]
async fn test_unknown_watch_is_divergence_when_strict() {
    let mut fx = Fixture::new(&[]);

    let result = fx.handle(create(WatchId::new(404), "x"));

    assert!(matches!(result, Err(WatchError::Divergence(_))));
}

#[tokio::test]
async fn test_unknown_watch_rebuilds_when_permissive() {
    let mut fx = Fixture::with_policy(&["root/a"], permissive());

    fx.handle(moved_to(WatchId::new(404), "x", 1)).unwrap();

    assert_eq!(fx.reconciler.stats().rebuilds, 1);
    assert_eq!(fx.cached(), vec!["root", "root/a"]);
}

#[tokio::test]
async fn test_plain_lookup_misses_are_benign() {
    let mut fx = Fixture::new(&[]);

    fx.handle(delete_self(WatchId::new(404))).unwrap();
    fx.handle(move_self(WatchId::new(405))).unwrap();
    fx.handle(ignored(WatchId::new(406))).unwrap();

    assert_eq!(fx.cached(), vec!["root"]);
}

#[tokio::test]
async fn test_file_events_do_not_touch_cache() {
    let mut fx = Fixture::new(&[]);
    let root = fx.id("root");

    std::fs::write(fx.path("root/f"), b"x").unwrap();
    fx.handle(Event::on_child(root, EventKind::Create, "f", false))
        .unwrap();
    fx.handle(Event::on_child(root, EventKind::MovedFrom, "f", false).with_cookie(2))
        .unwrap();

    assert!(!fx.reconciler.has_pending_moves());
    assert_eq!(fx.cached(), vec!["root"]);
}

#[tokio::test]
async fn test_check_counts_missing_without_failing() {
    let mut fx = Fixture::new(&["root/a"]);

    fx.rmdir("root/a");
    let report = fx.reconciler.check().unwrap();

    assert_eq!(report.checked, 2);
    assert_eq!(report.missing, 1);
    assert!(!report.is_divergent());
    // Checks never mutate the cache
    assert_eq!(fx.cached(), vec!["root", "root/a"]);
}

#[tokio::test]
async fn test_check_non_directory_is_divergence() {
    let mut fx = Fixture::new(&["root/a"]);

    fx.rmdir("root/a");
    std::fs::write(fx.path("root/a"), b"file").unwrap();

    assert!(matches!(
        fx.reconciler.check(),
        Err(WatchError::Divergence(_))
    ));
}
