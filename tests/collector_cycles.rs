//! Collection cycles driven through the reference collector

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use refqueue::{
    IdentityToken, Reference, ReferenceCollector, ReferenceConfig, ReferenceQueue, Strength,
};

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[test]
fn hard_references_survive_every_cycle() {
    let collector = ReferenceCollector::default();
    let hard = collector.hard(Arc::new(1u32), None);

    for _ in 0..20 {
        collector.on_heap_growth();
        collector.collect();
    }
    assert_eq!(hard.strength(), Strength::Hard);
    assert_eq!(hard.get().as_deref(), Some(&1));
}

#[test]
fn unreachable_object_clears_all_its_references() {
    let collector = ReferenceCollector::default();
    let queue = ReferenceQueue::new();
    let object = Arc::new(String::from("shared"));
    let identity = IdentityToken::of(&object);

    let mut refs: Vec<Reference<String>> = vec![
        collector.weak(&object, Some(&queue)),
        collector.soft(Arc::clone(&object), Some(&queue)),
    ];
    for name in ["a", "b", "c"] {
        let class = collector.soft_class(name, 10).unwrap();
        refs.push(collector.soft_in(&class, Arc::clone(&object), Some(&queue)).unwrap());
    }
    // Asking again hands out the cached references.
    assert_eq!(collector.weak(&object, Some(&queue)), refs[0]);
    assert_eq!(collector.refs_count_for_identity(identity), 5);

    assert_eq!(collector.clear_refs_for_identity(identity), 5);
    assert!(refs.iter().all(|reference| reference.get().is_none()));
    assert_eq!(queue.len(), 5);
    assert_eq!(collector.refs_count_for_identity(identity), 0);

    // The object itself is still owned here; clearing only severs references.
    assert_eq!(object.as_str(), "shared");
}

#[test]
fn evicted_soft_target_is_dropped() {
    let drops = Arc::new(AtomicUsize::new(0));
    let collector = ReferenceCollector::default();
    let class = collector.soft_class("short", 2).unwrap();
    let soft = collector
        .soft_in(&class, Arc::new(DropCounter(Arc::clone(&drops))), None)
        .unwrap();

    collector.collect();
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    let report = collector.collect();

    assert_eq!(report.evicted_soft, 1);
    assert!(soft.is_cleared());
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn collect_reports_both_phases() {
    let collector = ReferenceCollector::default();
    let class = collector.soft_class("once", 1).unwrap();
    let doomed = Arc::new(0u8);
    let _weak = collector.weak(&doomed, None);
    let _soft = collector.soft_in(&class, Arc::new(1u8), None).unwrap();
    drop(doomed);

    let report = collector.collect();
    assert_eq!(report.cleared_unreachable, 1);
    assert_eq!(report.evicted_soft, 1);

    let stats = collector.stats();
    assert_eq!(stats.total_cleared, 1);
    assert_eq!(stats.total_evicted, 1);
    assert_eq!(stats.cycles_completed, 1);
}

#[test]
fn background_collector_clears_dropped_targets() {
    let config = ReferenceConfig {
        collection_interval: Duration::from_millis(5),
        ..ReferenceConfig::default()
    };
    let collector = Arc::new(ReferenceCollector::new(config).unwrap());
    let queue = ReferenceQueue::new();
    let object = Arc::new(3u32);
    let weak = collector.weak(&object, Some(&queue));

    assert!(collector.start_background_collector());
    assert!(!collector.start_background_collector());

    drop(object);
    collector.request_collection();
    assert!(wait_for(Duration::from_secs(5), || !queue.is_empty()));
    assert!(weak.is_cleared());

    collector.shutdown();
    assert!(collector.wait_for_background_stop(Duration::from_secs(5)));
}

#[test]
fn concurrent_tracking_and_sweeping() {
    let collector = ReferenceCollector::default();
    let queue = ReferenceQueue::new();

    crossbeam::scope(|s| {
        for _ in 0..4 {
            let collector = &collector;
            let queue = &queue;
            s.spawn(move |_| {
                for i in 0..200u32 {
                    let object = Arc::new(i);
                    let _reference = collector.weak(&object, Some(queue));
                    drop(object);
                }
            });
        }
        for _ in 0..2 {
            let collector = &collector;
            s.spawn(move |_| {
                for _ in 0..50 {
                    collector.sweep();
                }
            });
        }
    })
    .unwrap();

    // Handles were dropped uncleared, so nothing is delivered; bookkeeping is pruned.
    collector.sweep();
    assert_eq!(collector.stats().tracked_objects, 0);
    assert_eq!(collector.stats().total_tracked, 800);
    assert!(queue.len() <= 800);
}
