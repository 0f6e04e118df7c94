use jobfiber::{Job, JobList, JobManager, JobPriority, JobQueue, ManagerConfig, TinyCounter};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn config(threads: usize) -> ManagerConfig {
    ManagerConfig::new(threads).with_stack_size(256 * 1024)
}

#[test]
fn test_ten_thousand_jobs_run_exactly_once() {
    const NUM_JOBS: usize = 10_000;
    let manager = Arc::new(JobManager::new(config(4)));
    let total = Arc::new(AtomicUsize::new(0));
    let runs: Arc<Vec<AtomicU8>> = Arc::new((0..NUM_JOBS).map(|_| AtomicU8::new(0)).collect());

    let total_clone = total.clone();
    let runs_clone = runs.clone();
    manager
        .run(move |manager| {
            let list = JobList::new(manager);
            for i in 0..NUM_JOBS {
                let total = total_clone.clone();
                let runs = runs_clone.clone();
                list.add(JobPriority::Normal, move |_| {
                    total.fetch_add(1, Ordering::Relaxed);
                    runs[i].fetch_add(1, Ordering::Relaxed);
                });
            }
            list.wait(0);
            assert_eq!(list.pending(), 0);
            assert_eq!(total_clone.load(Ordering::Relaxed), NUM_JOBS);
        })
        .unwrap();

    assert_eq!(total.load(Ordering::Relaxed), NUM_JOBS);
    assert!(runs.iter().all(|r| r.load(Ordering::Relaxed) == 1));
}

#[test]
fn test_partial_wait_on_list() {
    let manager = Arc::new(JobManager::new(config(2)));
    let done = Arc::new(AtomicUsize::new(0));
    let gated_ran = Arc::new(AtomicBool::new(false));

    let done_clone = done.clone();
    let gated_clone = gated_ran.clone();
    manager
        .run(move |manager| {
            let gate = TinyCounter::new(1);
            let list = JobList::new(manager);
            for _ in 0..3 {
                let done = done_clone.clone();
                list.add(JobPriority::Normal, move |_| {
                    done.fetch_add(1, Ordering::SeqCst);
                });
            }
            let job_gate = gate.clone();
            let gated = gated_clone.clone();
            list.add(JobPriority::Low, move |manager| {
                manager.wait_for_counter(&job_gate, 0, false);
                gated.store(true, Ordering::SeqCst);
            });

            // Only the gated job is left once the list drains to one.
            list.wait(1);
            assert_eq!(done_clone.load(Ordering::SeqCst), 3);
            assert!(!gated_clone.load(Ordering::SeqCst));

            gate.decrement(1, manager);
            list.wait(0);
        })
        .unwrap();

    assert!(gated_ran.load(Ordering::SeqCst));
}

#[test]
fn test_job_list_inside_jobs() {
    let manager = Arc::new(JobManager::new(config(3)));
    let leaves = Arc::new(AtomicUsize::new(0));

    let leaves_clone = leaves.clone();
    manager
        .run(move |manager| {
            let parents = JobList::new(manager);
            for _ in 0..6 {
                let leaves = leaves_clone.clone();
                parents.add(JobPriority::Normal, move |manager| {
                    let children = JobList::new(manager);
                    for _ in 0..10 {
                        let leaves = leaves.clone();
                        children.add(JobPriority::High, move |_| {
                            leaves.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                    children.wait(0);
                });
            }
            parents.wait(0);
        })
        .unwrap();

    assert_eq!(leaves.load(Ordering::SeqCst), 60);
}

#[test]
fn test_job_queue_runs_serially_in_order() {
    let manager = Arc::new(JobManager::new(config(4)));
    let order = Arc::new(Mutex::new(Vec::new()));
    let running = Arc::new(AtomicBool::new(false));

    let order_clone = order.clone();
    manager
        .run(move |manager| {
            let mut queue = JobQueue::new(manager);
            for i in 0..10 {
                let order = order_clone.clone();
                let running = running.clone();
                let priority = if i % 2 == 0 {
                    JobPriority::Low
                } else {
                    JobPriority::High
                };
                queue.add(priority, move |_| {
                    assert!(!running.swap(true, Ordering::SeqCst), "jobs overlapped");
                    order.lock().unwrap().push(i);
                    running.store(false, Ordering::SeqCst);
                });
            }
            assert_eq!(queue.len(), 10);
            queue.execute();
            assert!(queue.is_empty());
        })
        .unwrap();

    assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_add_job_with_args() {
    let manager = Arc::new(JobManager::new(config(2)));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    manager
        .run(move |manager| {
            let list = JobList::new(manager);
            for n in 0..4u64 {
                let seen = seen_clone.clone();
                list.add_job(
                    JobPriority::Normal,
                    Job::with_args(
                        move |(a, b): (u64, String)| seen.lock().unwrap().push((a, b)),
                        (n, format!("job-{}", n)),
                    ),
                );
            }
            list.wait(0);
        })
        .unwrap();

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(
        seen,
        (0..4u64).map(|n| (n, format!("job-{}", n))).collect::<Vec<_>>()
    );
}
