use jobfiber::{JobManager, JobPriority, ManagerConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn test_pinned_threads_run_jobs() {
    let threads = jobfiber::thread::hardware_threads().min(4);
    let manager = Arc::new(JobManager::new(
        ManagerConfig::new(threads)
            .with_thread_affinity(true)
            .with_stack_size(256 * 1024),
    ));
    let executed = Arc::new(AtomicUsize::new(0));

    let executed_clone = executed.clone();
    manager
        .run(move |manager| {
            // Pinning itself can't be observed portably; the run must simply work.
            let counter = jobfiber::Counter::new(0);
            for _ in 0..100 {
                let executed = executed_clone.clone();
                manager.schedule_job_with_counter(JobPriority::Normal, &counter, move |_| {
                    executed.fetch_add(1, Ordering::SeqCst);
                });
            }
            manager.wait_for_counter(&counter, 0, false);
        })
        .unwrap();

    assert_eq!(executed.load(Ordering::SeqCst), 100);
    assert_eq!(manager.num_threads(), threads);
}

#[test]
fn test_pin_out_of_range_core_fails() {
    assert!(!jobfiber::thread::pin_current_thread(usize::MAX));
}
