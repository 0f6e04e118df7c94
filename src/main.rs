use jobfiber::{Counter, JobList, JobManager, JobPriority, ManagerConfig, ReturnCode};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

fn main() {
    env_logger::init();
    println!("jobfiber - Fiber-Based Job Scheduler\n");

    let num_threads = 4;
    let manager = Arc::new(JobManager::new(ManagerConfig::new(num_threads)));
    println!("Starting job manager with {} scheduler threads\n", num_threads);

    let result = manager.run(|manager| {
        // Example 1: Single job
        println!("Example 1: Simple job execution");
        manager.wait_for_single(JobPriority::Normal, |_| {
            println!("  Hello from a fiber job!");
        });
        println!("  Job completed\n");

        // Example 2: Parallel computation under one list
        println!("Example 2: Parallel computation");
        let sum = Arc::new(AtomicUsize::new(0));
        let num_jobs = 100;
        let start = Instant::now();

        let list = JobList::new(manager);
        for i in 0..num_jobs {
            let sum = sum.clone();
            list.add(JobPriority::Normal, move |_| {
                let mut _local_sum = 0;
                for j in 0..1000 {
                    _local_sum += j;
                }
                sum.fetch_add(i, Ordering::SeqCst);
            });
        }
        list.wait(0);

        let expected_sum: usize = (0..num_jobs).sum();
        println!("  Executed {} jobs in {:?}", num_jobs, start.elapsed());
        println!("  Sum result: {} (expected: {})\n", sum.load(Ordering::SeqCst), expected_sum);

        // Example 3: Jobs that wait on their own children
        println!("Example 3: Nested jobs");
        let leaves = Arc::new(AtomicUsize::new(0));
        let parents = Counter::new(0);
        for _ in 0..8 {
            let leaves = leaves.clone();
            manager.schedule_job_with_counter(JobPriority::Normal, &parents, move |manager| {
                let children = Counter::new(0);
                for _ in 0..16 {
                    let leaves = leaves.clone();
                    manager.schedule_job_with_counter(JobPriority::High, &children, move |_| {
                        leaves.fetch_add(1, Ordering::Relaxed);
                    });
                }
                manager.wait_for_counter(&children, 0, false);
            });
        }
        manager.wait_for_counter(&parents, 0, false);
        println!("  Leaf jobs executed: {}\n", leaves.load(Ordering::Relaxed));

        // Example 4: Throughput
        println!("Example 4: High-throughput benchmark");
        let num_jobs = 10_000;
        let start = Instant::now();
        let list = JobList::new(manager);
        for _ in 0..num_jobs {
            list.add(JobPriority::Normal, |_| {
                let mut _x = 0;
                for i in 0..10 {
                    _x += i;
                }
            });
        }
        list.wait(0);

        let duration = start.elapsed();
        println!("  Executed {} jobs in {:?}", num_jobs, duration);
        println!(
            "  Throughput: {:.2} jobs/second\n",
            num_jobs as f64 / duration.as_secs_f64()
        );

        println!("Shutting down job manager...");
    });

    let code = ReturnCode::from(&result);
    match result {
        Ok(()) => {
            let metrics = manager.metrics();
            println!(
                "Done! {} jobs executed, {} fiber switches",
                metrics.jobs_executed, metrics.fiber_switches
            );
        }
        Err(e) => eprintln!("Job manager failed to start ({:?}): {}", code, e),
    }
}
