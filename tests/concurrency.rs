//! Integration tests for the scenarios `spec.md` §8 names explicitly
//! (S1-S6): uncontended round trips, multiple concurrent readers, writer
//! preference over a steady stream of readers, FIFO among queued
//! exclusive waiters, the shared-waiter cascade on release, and a
//! shared-to-exclusive conversion overtaking the rest of the queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use sysview_rwlock::FairRwLock;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// S1: an exclusive acquire/release followed by a shared acquire/release
/// leaves the lock fully unowned both times.
#[test]
fn s1_uncontended_round_trip() {
    init_logging();
    let lock = FairRwLock::new();

    let g = lock.acquire_exclusive();
    assert!(lock.owned());
    drop(g);
    assert!(!lock.owned());

    let g = lock.acquire_shared();
    assert_eq!(lock.shared_owners(), 1);
    drop(g);
    assert!(!lock.owned());
}

/// S2: three readers may hold the lock at once.
#[test]
fn s2_three_shared_readers() {
    init_logging();
    let lock = Arc::new(FairRwLock::new());
    let barrier = Arc::new(std::sync::Barrier::new(3));
    let concurrent = Arc::new(AtomicUsize::new(0));
    let max_concurrent = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..3)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let barrier = Arc::clone(&barrier);
            let concurrent = Arc::clone(&concurrent);
            let max_concurrent = Arc::clone(&max_concurrent);
            thread::spawn(move || {
                let _g = lock.acquire_shared();
                barrier.wait();
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                concurrent.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(max_concurrent.load(Ordering::SeqCst), 3);
    assert!(!lock.owned());
}

/// S3: a writer queued behind active readers is not starved by a
/// continuing stream of new readers (fresh shared acquires must not join
/// once `Waiters` is set).
#[test]
fn s3_writer_preference_over_new_readers() {
    init_logging();
    let lock = Arc::new(FairRwLock::new());
    let reader = lock.acquire_shared();

    let writer_lock = Arc::clone(&lock);
    let writer_acquired = Arc::new(AtomicUsize::new(0));
    let writer_acquired2 = Arc::clone(&writer_acquired);
    let writer = thread::spawn(move || {
        let _g = writer_lock.acquire_exclusive();
        writer_acquired2.store(1, Ordering::SeqCst);
    });

    // Give the writer time to enqueue.
    thread::sleep(Duration::from_millis(30));
    assert_eq!(writer_acquired.load(Ordering::SeqCst), 0);

    // A fresh shared acquire must not be able to join ahead of the writer.
    let late_reader_lock = Arc::clone(&lock);
    let late_reader_joined = Arc::new(AtomicUsize::new(0));
    let late_reader_joined2 = Arc::clone(&late_reader_joined);
    let late_reader = thread::spawn(move || {
        let _g = late_reader_lock.acquire_shared();
        late_reader_joined2.store(1, Ordering::SeqCst);
    });

    thread::sleep(Duration::from_millis(30));
    assert_eq!(writer_acquired.load(Ordering::SeqCst), 0);
    assert_eq!(late_reader_joined.load(Ordering::SeqCst), 0);

    drop(reader);
    writer.join().unwrap();
    late_reader.join().unwrap();
    assert_eq!(writer_acquired.load(Ordering::SeqCst), 1);
    assert_eq!(late_reader_joined.load(Ordering::SeqCst), 1);
}

/// S4: multiple queued exclusive waiters are granted the lock in the
/// order they enqueued.
#[test]
fn s4_fifo_among_exclusive_waiters() {
    init_logging();
    let lock = Arc::new(FairRwLock::new());
    let order = Arc::new(Mutex::new(Vec::new()));
    let holder = lock.acquire_exclusive();

    let mut threads = Vec::new();
    for i in 0..4 {
        let lock = Arc::clone(&lock);
        let order = Arc::clone(&order);
        threads.push(thread::spawn(move || {
            thread::sleep(Duration::from_millis(15 * (i + 1) as u64));
            let _g = lock.acquire_exclusive();
            order.lock().unwrap().push(i);
        }));
    }
    thread::sleep(Duration::from_millis(120));
    drop(holder);
    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
}

/// S5: releasing a writer with a run of shared waiters queued behind it
/// wakes the whole run at once, not one at a time.
#[test]
fn s5_shared_cascade_on_release() {
    init_logging();
    let lock = Arc::new(FairRwLock::new());
    let writer = lock.acquire_exclusive();
    let concurrent = Arc::new(AtomicUsize::new(0));
    let max_concurrent = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(std::sync::Barrier::new(3));

    let threads: Vec<_> = (0..3)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let concurrent = Arc::clone(&concurrent);
            let max_concurrent = Arc::clone(&max_concurrent);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let _g = lock.acquire_shared();
                barrier.wait();
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                concurrent.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(40));
    drop(writer);
    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(max_concurrent.load(Ordering::SeqCst), 3);
}

/// S6: a shared-to-exclusive conversion overtakes other queued waiters
/// rather than joining the back of the line.
#[test]
fn s6_conversion_overtakes_queue() {
    init_logging();
    let lock = Arc::new(FairRwLock::new());
    let order = Arc::new(Mutex::new(Vec::new()));

    let converting_reader = lock.acquire_shared();
    let other_reader = lock.acquire_shared();

    thread::scope(|scope| {
        // Queue an ordinary exclusive waiter behind the two readers.
        let waiting_writer_lock = Arc::clone(&lock);
        let order2 = Arc::clone(&order);
        let waiting_writer = scope.spawn(move || {
            let _g = waiting_writer_lock.acquire_exclusive();
            order2.lock().unwrap().push("plain-writer");
        });
        thread::sleep(Duration::from_millis(30));

        // The original reader converts; it must win the race against the
        // already-queued plain writer once the other reader drops.
        let lock2 = Arc::clone(&lock);
        let order3 = Arc::clone(&order);
        let converter = scope.spawn(move || {
            let exclusive = converting_reader.upgrade();
            order3.lock().unwrap().push("converter");
            drop(exclusive);
            let _ = lock2.owned();
        });
        thread::sleep(Duration::from_millis(30));

        drop(other_reader);
        converter.join().unwrap();
        waiting_writer.join().unwrap();
    });

    assert_eq!(*order.lock().unwrap(), vec!["converter", "plain-writer"]);
}
