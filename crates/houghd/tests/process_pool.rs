//! Integration tests for the process pool running real `hough-worker`
//! processes.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};

use hough_protocol::{RoiRecord, RoiSpec, Thresholds};
use houghd::pool::{
    DetectionTask, FAULT_INJECTION_ENV, ProcessPool, ProcessPoolConfig, TaskError, TaskRunner,
    WorkerCommand,
};

fn worker_command() -> WorkerCommand {
    WorkerCommand::new(env!("CARGO_BIN_EXE_hough-worker"))
}

fn pool_config(workers: usize, command: WorkerCommand) -> ProcessPoolConfig {
    ProcessPoolConfig {
        workers,
        command,
        task_timeout: None,
        shutdown_timeout: Duration::from_secs(5),
        max_frame_bytes: hough_protocol::DEFAULT_MAX_FRAME_BYTES,
    }
}

fn disc_pixels(size: u32, centre: (i64, i64), radius: i64) -> Vec<u8> {
    (0..size)
        .flat_map(|y| (0..size).map(move |x| (x, y)))
        .map(|(x, y)| {
            let dx = i64::from(x) - centre.0;
            let dy = i64::from(y) - centre.1;
            if dx * dx + dy * dy <= radius * radius { 255 } else { 0 }
        })
        .collect()
}

fn task(id: &str, size: u32, pixels: Vec<u8>) -> DetectionTask {
    let spec = RoiSpec {
        id: id.to_owned(),
        height: size,
        width: size,
        num_bytes: u64::from(size) * u64::from(size),
        min_radius: 5,
        max_radius: 20,
    };
    let record = RoiRecord::from_frame(spec, pixels).expect("valid record");
    DetectionTask::new(record, Thresholds { low: 50, high: 150 })
}

fn disc(id: &str) -> DetectionTask {
    task(id, 64, disc_pixels(64, (30, 30), 10))
}

fn blank(id: &str) -> DetectionTask {
    task(id, 32, vec![0; 32 * 32])
}

fn faulty_pool(directive: &str) -> ProcessPool {
    let command = worker_command().env(FAULT_INJECTION_ENV, directive);
    ProcessPool::start(pool_config(1, command)).expect("pool should start")
}

#[fixture]
fn pool() -> ProcessPool {
    ProcessPool::start(pool_config(2, worker_command())).expect("pool should start")
}

#[rstest]
#[expect(clippy::float_arithmetic, reason = "tolerances on fitted coordinates")]
fn locates_a_clean_disc(pool: ProcessPool) {
    let circle = pool
        .submit(disc("disc"))
        .wait()
        .expect("detection succeeds")
        .expect("a circle is found");

    assert!((circle.x - 30.0).abs() <= 1.5, "x = {}", circle.x);
    assert!((circle.y - 30.0).abs() <= 1.5, "y = {}", circle.y);
    assert!((circle.r - 10.0).abs() <= 1.5, "r = {}", circle.r);
    assert_eq!(pool.stats().tasks_completed, 1);
}

#[rstest]
fn edgeless_images_yield_no_match(pool: ProcessPool) {
    assert_eq!(pool.submit(blank("blank")).wait(), Ok(None));
}

#[rstest]
fn concurrent_submissions_all_complete(pool: ProcessPool) {
    let shared = Arc::new(pool);
    let handles: Vec<_> = (0..6)
        .map(|index| {
            let submitter = Arc::clone(&shared);
            thread::spawn(move || submitter.submit(disc(&format!("disc-{index}"))).wait())
        })
        .collect();

    for handle in handles {
        let outcome = handle.join().expect("submitter thread");
        assert!(matches!(outcome, Ok(Some(_))), "{outcome:?}");
    }
    assert_eq!(shared.stats().tasks_completed, 6);
}

#[rstest]
fn panics_in_detection_are_reported_as_faults() {
    let pool = faulty_pool("panic:boom");

    let outcome = pool.submit(blank("boom")).wait();
    let after = pool.submit(blank("fine")).wait();

    assert!(
        matches!(&outcome, Err(TaskError::Fault { message }) if message.contains("injected fault")),
        "{outcome:?}"
    );
    assert_eq!(after, Ok(None));
    assert_eq!(pool.stats().worker_restarts, 0);
}

#[rstest]
fn crashed_workers_are_replaced() {
    let pool = faulty_pool("abort:crash");

    let outcome = pool.submit(blank("crash")).wait();
    let after = pool.submit(disc("after")).wait();

    assert_eq!(outcome, Err(TaskError::WorkerDied));
    assert_eq!(
        outcome.map_err(|error| error.to_string()),
        Err(String::from("worker process exited during detection"))
    );
    assert!(matches!(after, Ok(Some(_))), "{after:?}");
    let stats = pool.stats();
    assert!(stats.worker_restarts >= 1);
    assert_eq!(stats.task_faults, 1);
}

#[rstest]
fn stalled_workers_time_out() {
    let mut config = pool_config(1, worker_command().env(FAULT_INJECTION_ENV, "stall:slow"));
    config.task_timeout = Some(Duration::from_millis(300));
    let pool = ProcessPool::start(config).expect("pool should start");

    let started = Instant::now();
    let outcome = pool.submit(blank("slow")).wait();

    assert_eq!(
        outcome,
        Err(TaskError::Timeout {
            timeout: Duration::from_millis(300)
        })
    );
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(pool.submit(blank("next")).wait(), Ok(None));
    assert!(pool.stats().worker_restarts >= 1);
}

#[rstest]
fn closed_pools_refuse_new_work(pool: ProcessPool) {
    pool.close();
    pool.close();

    assert_eq!(pool.submit(blank("late")).wait(), Err(TaskError::PoolClosed));
}

#[rstest]
fn shutdown_finishes_queued_work() {
    let pool = ProcessPool::start(pool_config(1, worker_command())).expect("pool should start");
    let pending: Vec<_> = (0..4)
        .map(|index| pool.submit(disc(&format!("queued-{index}"))))
        .collect();

    pool.close();

    for outcome in pending.into_iter().map(|task| task.wait()) {
        assert!(matches!(outcome, Ok(Some(_))), "{outcome:?}");
    }
}

#[rstest]
fn missing_worker_programs_fail_at_start() {
    let command = WorkerCommand::new("/nonexistent/hough-worker");

    let error = ProcessPool::start(pool_config(1, command))
        .err()
        .expect("spawn fails");

    assert!(error.to_string().contains("/nonexistent/hough-worker"), "{error}");
}
