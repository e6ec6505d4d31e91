use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::bounded;

use condflags::{Action, Condition, ExecutionContext, ObserveOptions, SerialQueue};

const SETTLE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Ready {
    Network,
    Disk,
    Config,
}

fn flags(items: &[Ready]) -> BTreeSet<Ready> {
    items.iter().copied().collect()
}

fn condition(initial: &[Ready]) -> (Arc<SerialQueue>, Condition<BTreeSet<Ready>>) {
    let queue = Arc::new(SerialQueue::named("e2e-default").unwrap());
    let ctx: Arc<dyn ExecutionContext> = Arc::clone(&queue) as Arc<dyn ExecutionContext>;
    (queue, Condition::new(ctx, flags(initial)))
}

fn counting(label: &str) -> (Action, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    let action = Action::new(label.to_string(), move || {
        h.fetch_add(1, Ordering::SeqCst);
    });
    (action, hits)
}

#[test]
fn already_satisfied_observer_fires_without_mutation() {
    let (_queue, cond) = condition(&[Ready::Network]);

    let (tx, rx) = bounded::<()>(4);
    cond.observe(
        flags(&[Ready::Network]),
        Action::new("network-up", move || {
            let _ = tx.try_send(());
        }),
    );

    rx.recv_timeout(SETTLE).unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn unrelated_mutations_do_not_refire() {
    let (queue, cond) = condition(&[Ready::Network]);
    let (action, hits) = counting("network");
    cond.observe(flags(&[Ready::Network]), action);
    queue.flush(SETTLE).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    for _ in 0..10 {
        cond.set_on(&flags(&[Ready::Disk]));
        cond.set_off(&flags(&[Ready::Disk]));
        cond.set_on(&flags(&[Ready::Config]));
        queue.flush(SETTLE).unwrap();
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn refires_after_unmet_then_met() {
    let (queue, cond) = condition(&[Ready::Network]);
    let (action, hits) = counting("cycle");
    cond.observe(flags(&[Ready::Network]), action);
    queue.flush(SETTLE).unwrap();

    for expected in 2..=4 {
        cond.set_off(&flags(&[Ready::Network]));
        queue.flush(SETTLE).unwrap();
        cond.set_on(&flags(&[Ready::Network]));
        queue.flush(SETTLE).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), expected);
    }
}

#[test]
fn multi_flag_requirement_waits_for_all() {
    let (queue, cond) = condition(&[]);
    let (action, hits) = counting("all-ready");
    cond.observe(flags(&[Ready::Network, Ready::Disk, Ready::Config]), action);

    cond.set_on(&flags(&[Ready::Network]));
    queue.flush(SETTLE).unwrap();
    cond.set_on(&flags(&[Ready::Disk]));
    queue.flush(SETTLE).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    cond.set_on(&flags(&[Ready::Config]));
    queue.flush(SETTLE).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn auto_remove_observer_is_gone_after_firing() {
    let (queue, cond) = condition(&[]);
    let (action, hits) = counting("once");
    let handle = cond.observe_with(flags(&[Ready::Disk]), action, ObserveOptions::once());

    cond.set_on(&flags(&[Ready::Disk]));
    queue.flush(SETTLE).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(!cond.contains(handle));

    cond.set_off(&flags(&[Ready::Disk]));
    queue.flush(SETTLE).unwrap();
    cond.set_on(&flags(&[Ready::Disk]));
    queue.flush(SETTLE).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    cond.remove_observer(handle);
    assert_eq!(cond.observer_count(), 0);
}

#[test]
fn wait_with_timeout_unregisters_unsatisfied_observer() {
    let (queue, cond) = condition(&[Ready::Network]);
    let (action, hits) = counting("never");
    let handle = cond.wait(flags(&[Ready::Config]), action, Duration::from_millis(25));
    assert_eq!(cond.observer_count(), 1);

    std::thread::sleep(Duration::from_millis(100));
    queue.flush(SETTLE).unwrap();
    assert!(!cond.contains(handle));
    assert_eq!(cond.observer_count(), 0);

    // Manual removal after expiry is a no-op.
    cond.remove_observer(handle);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn wait_fires_once_then_timeout_is_noop() {
    let (queue, cond) = condition(&[]);
    let (action, hits) = counting("wait");
    cond.wait(flags(&[Ready::Disk]), action, Duration::from_millis(40));

    cond.set_on(&flags(&[Ready::Disk]));
    queue.flush(SETTLE).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(cond.observer_count(), 0);

    std::thread::sleep(Duration::from_millis(80));
    queue.flush(SETTLE).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn observers_on_separate_contexts_all_fire() {
    let (queue, cond) = condition(&[]);
    let side = Arc::new(SerialQueue::named("e2e-side").unwrap());
    let side_ctx: Arc<dyn ExecutionContext> = Arc::clone(&side) as Arc<dyn ExecutionContext>;

    let (inline, inline_hits) = counting("inline");
    let (remote, remote_hits) = counting("remote");
    cond.observe(flags(&[Ready::Network]), inline);
    cond.observe_with(flags(&[Ready::Network]), remote, ObserveOptions::on(side_ctx));

    cond.set_on(&flags(&[Ready::Network, Ready::Disk]));
    queue.flush(SETTLE).unwrap();
    side.flush(SETTLE).unwrap();

    assert_eq!(inline_hits.load(Ordering::SeqCst), 1);
    assert_eq!(remote_hits.load(Ordering::SeqCst), 1);
    assert_eq!(cond.in_flight(), 0);
}

#[test]
fn blocking_wait_across_threads() {
    let (_queue, cond) = condition(&[]);
    let producer = cond.clone();
    let handle = std::thread::spawn(move || {
        for item in [Ready::Network, Ready::Disk, Ready::Config] {
            std::thread::sleep(Duration::from_millis(5));
            producer.set_on(&flags(&[item]));
        }
    });

    cond.wait_blocking(flags(&[Ready::Network, Ready::Disk, Ready::Config]), SETTLE)
        .unwrap();
    handle.join().unwrap();
    assert!(cond.meets(&flags(&[Ready::Network, Ready::Disk, Ready::Config])));
}
