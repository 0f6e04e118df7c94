use jobfiber::{Counter, Job, JobManager, JobPriority, ManagerConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn config(threads: usize) -> ManagerConfig {
    ManagerConfig::new(threads).with_stack_size(256 * 1024)
}

#[test]
fn test_high_priority_jobs_run_first() {
    // One thread: nothing runs until main parks, so every queue is full
    // when the first job is picked.
    let manager = Arc::new(JobManager::new(config(1)));
    let order = Arc::new(Mutex::new(Vec::new()));

    let order_clone = order.clone();
    manager
        .run(move |manager| {
            let counter = Counter::new(0);
            for i in 0..8 {
                for (priority, tag) in [
                    (JobPriority::Low, 'L'),
                    (JobPriority::Normal, 'N'),
                    (JobPriority::High, 'H'),
                ] {
                    if priority == JobPriority::Low && i >= 4 {
                        continue;
                    }
                    let order = order_clone.clone();
                    manager.schedule_job_with_counter(priority, &counter, move |_| {
                        order.lock().unwrap().push(tag);
                    });
                }
            }
            manager.wait_for_counter(&counter, 0, false);
        })
        .unwrap();

    let order: String = order.lock().unwrap().iter().collect();
    assert_eq!(order, "HHHHHHHHNNNNNNNNLLLL");
}

#[test]
fn test_args_are_passed_exactly_once() {
    let manager = Arc::new(JobManager::new(config(1)));
    let calls = Arc::new(Mutex::new(Vec::new()));

    let calls_clone = calls.clone();
    manager
        .run(move |manager| {
            let calls = calls_clone.clone();
            manager.schedule_job_with_args(
                JobPriority::Normal,
                move |(a, b): (i32, f64)| calls.lock().unwrap().push((a, b)),
                (-3, 2.5),
            );
            // The low job can only run after the normal one on a single thread.
            manager.wait_for_single(JobPriority::Low, |_| {});
        })
        .unwrap();

    assert_eq!(*calls.lock().unwrap(), vec![(-3, 2.5)]);
}

#[test]
fn test_wait_for_single() {
    let manager = Arc::new(JobManager::new(config(2)));
    let result = Arc::new(AtomicUsize::new(0));

    let result_clone = result.clone();
    manager
        .run(move |manager| {
            let value = result_clone.clone();
            manager.wait_for_single(JobPriority::High, move |_| {
                std::thread::sleep(Duration::from_millis(5));
                value.store(42, Ordering::SeqCst);
            });
            assert_eq!(result_clone.load(Ordering::SeqCst), 42);
        })
        .unwrap();

    assert_eq!(result.load(Ordering::SeqCst), 42);
}

#[test]
fn test_satisfied_wait_does_not_switch_fibers() {
    let manager = Arc::new(JobManager::new(config(1)));

    manager
        .run(|manager| {
            let counter = Counter::new(0);
            let before = manager.metrics();
            manager.wait_for_counter(&counter, 0, false);
            let after = manager.metrics();

            assert_eq!(after.fiber_switches, before.fiber_switches);
            assert_eq!(after.waits_suspended, before.waits_suspended);
            assert_eq!(after.waits_immediate, before.waits_immediate + 1);
        })
        .unwrap();
}

#[test]
fn test_unsatisfied_wait_switches_fibers() {
    let manager = Arc::new(JobManager::new(config(1)));

    manager
        .run(|manager| {
            let before = manager.metrics();
            manager.wait_for_single(JobPriority::Normal, |_| {});
            let after = manager.metrics();

            assert_eq!(after.waits_suspended, before.waits_suspended + 1);
            assert!(after.fiber_switches >= before.fiber_switches + 2);
            assert_eq!(after.fibers_resumed, before.fibers_resumed + 1);
        })
        .unwrap();
}

#[test]
fn test_waiters_on_different_targets_wake_separately() {
    let manager = Arc::new(JobManager::new(config(2)));
    let woken = Arc::new(Mutex::new(Vec::new()));

    let woken_clone = woken.clone();
    manager
        .run(move |manager| {
            let counter = Counter::new(6);
            let done = Counter::new(0);

            for (target, tag) in [(3, "three"), (5, "five")] {
                let counter = counter.clone();
                let woken = woken_clone.clone();
                manager.schedule_job_with_counter(JobPriority::Normal, &done, move |manager| {
                    manager.wait_for_counter(&counter, target, false);
                    woken.lock().unwrap().push(tag);
                });
            }

            let deadline = Instant::now() + Duration::from_secs(10);
            while counter.waiting_fibers() < 2 {
                assert!(Instant::now() < deadline, "waiters never registered");
                std::thread::yield_now();
            }

            counter.decrement(1, manager);
            manager.wait_for_counter(&done, 1, false);
            assert_eq!(*woken_clone.lock().unwrap(), vec!["five"]);
            assert_eq!(counter.waiting_fibers(), 1);

            counter.decrement(1, manager);
            assert_eq!(counter.waiting_fibers(), 1);
            counter.decrement(1, manager);
            manager.wait_for_counter(&done, 0, false);
            assert_eq!(*woken_clone.lock().unwrap(), vec!["five", "three"]);
        })
        .unwrap();
}

#[test]
fn test_wake_from_plain_thread_resumes_fiber() {
    let manager = Arc::new(JobManager::new(config(2)));
    let counter = Counter::new(1);
    let resumed = Arc::new(AtomicUsize::new(0));

    let waker = {
        let manager = manager.clone();
        let counter = counter.clone();
        std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(10);
            while counter.waiting_fibers() == 0 {
                assert!(Instant::now() < deadline, "waiter never registered");
                std::thread::yield_now();
            }
            counter.decrement(1, &*manager);
        })
    };

    let resumed_clone = resumed.clone();
    manager
        .run(move |manager| {
            manager.wait_for_counter(&counter, 0, false);
            resumed_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    waker.join().unwrap();
    assert_eq!(resumed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_prepared_job_with_counter() {
    let manager = Arc::new(JobManager::new(config(2)));
    let hits = Arc::new(AtomicUsize::new(0));

    let hits_clone = hits.clone();
    manager
        .run(move |manager| {
            let counter = Counter::new(0);
            for _ in 0..5 {
                let hits = hits_clone.clone();
                let job = Job::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                })
                .with_counter(&counter);
                manager.schedule(JobPriority::Normal, job);
            }
            manager.wait_for_counter(&counter, 0, false);
        })
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 5);
}
