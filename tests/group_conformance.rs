//! Conformance tests for group completion semantics.

mod common;

use common::init_test_logging;
use dispatchq::{Group, QosClass, Queue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

#[test]
fn launch_chain_completes_regardless_of_finish_order() {
    init_test_logging();
    let fast = Queue::global(QosClass::Default);
    let slow = Queue::serial("conf-slow");
    let done_queue = Queue::serial("conf-done");

    for &(slow_first, delay_ms) in &[(true, 15u64), (false, 15u64)] {
        let group = Group::new();
        let completed = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        let (c1, c2, c3) = (
            Arc::clone(&completed),
            Arc::clone(&completed),
            Arc::clone(&completed),
        );
        let first_delay = if slow_first { delay_ms } else { 0 };
        let second_delay = if slow_first { 0 } else { delay_ms };
        group
            .launch(&slow, move || {
                thread::sleep(Duration::from_millis(first_delay));
                c1.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
            .launch(&fast, move || {
                thread::sleep(Duration::from_millis(second_delay));
                c2.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
            .notify(&done_queue, move || {
                tx.send(c3.load(Ordering::SeqCst)).unwrap();
            });

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
    }
}

#[test]
fn completion_fires_exactly_once_per_return_to_zero() {
    init_test_logging();
    let queue = Queue::serial("conf-once");
    let fired = Arc::new(AtomicUsize::new(0));
    let group = Group::new();

    for round in 1..=3 {
        let fired_clone = Arc::clone(&fired);
        let (tx, rx) = mpsc::channel();
        group.enter();
        group.notify(&queue, move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
            tx.send(()).unwrap();
        });
        group.enter();
        group.leave();
        group.leave();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), round);
    }
}

#[test]
fn mixed_manual_and_launched_entries_aggregate() {
    init_test_logging();
    let queue = Queue::concurrent("conf-mixed");
    let done_queue = Queue::serial("conf-mixed-done");
    let group = Group::new();
    let (tx, rx) = mpsc::channel();

    // One manual entry standing in for externally-signaled work.
    group.enter();
    let external = {
        let group = group.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            group.leave();
        })
    };
    for _ in 0..4 {
        group.launch(&queue, || {}).unwrap();
    }
    group.notify(&done_queue, move || tx.send(()).unwrap());

    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    external.join().unwrap();
}

#[test]
fn wait_blocks_until_all_entries_leave() {
    init_test_logging();
    let queue = Queue::concurrent("conf-wait");
    let group = Group::new();
    let completed = Arc::new(AtomicUsize::new(0));

    for _ in 0..8 {
        let completed = Arc::clone(&completed);
        group
            .launch(&queue, move || {
                thread::sleep(Duration::from_millis(5));
                completed.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }
    group.wait();
    assert_eq!(completed.load(Ordering::SeqCst), 8);
}

#[test]
fn wait_timeout_reports_unfinished_work() {
    init_test_logging();
    let queue = Queue::serial("conf-timeout");
    let group = Group::new();
    let gate = Arc::new(dispatchq::Semaphore::new(0));

    let gate_clone = Arc::clone(&gate);
    group.launch(&queue, move || gate_clone.wait()).unwrap();

    assert!(!group.wait_timeout(Duration::from_millis(20)));
    gate.signal();
    assert!(group.wait_timeout(Duration::from_secs(5)));
}

#[test]
fn contended_launches_fire_notification_after_every_unit() {
    init_test_logging();
    let queue = Queue::global(QosClass::Background);
    let done_queue = Queue::serial("conf-contended-done");
    let group = Group::new();
    let completed = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let mut submitters = Vec::new();
    // Hold one entry so the group cannot drain while submitter threads
    // are still racing to launch.
    group.enter();
    for _ in 0..4 {
        let group = group.clone();
        let queue = queue.clone();
        let completed = Arc::clone(&completed);
        submitters.push(thread::spawn(move || {
            for _ in 0..25 {
                let completed = Arc::clone(&completed);
                group
                    .launch(&queue, move || {
                        completed.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
            }
        }));
    }
    for submitter in submitters {
        submitter.join().unwrap();
    }
    let completed_at_fire = Arc::clone(&completed);
    group.notify(&done_queue, move || {
        tx.send(completed_at_fire.load(Ordering::SeqCst)).unwrap();
    });
    group.leave();

    assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), 100);
}
