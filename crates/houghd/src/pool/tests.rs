//! Unit tests for the pool's task plumbing and the worker loop.

use std::io::Cursor;
use std::time::Duration;

use rstest::{fixture, rstest};

use hough_protocol::{
    DEFAULT_MAX_FRAME_BYTES, RoiRecord, RoiSpec, Thresholds, read_json, write_frame, write_json,
};

use super::protocol::{WorkerReply, WorkerRequest};
use super::*;

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

fn task(id: &str, size: u32, pixels: Vec<u8>, thresholds: Thresholds) -> DetectionTask {
    let spec = RoiSpec {
        id: id.to_owned(),
        height: size,
        width: size,
        num_bytes: u64::from(size) * u64::from(size),
        min_radius: 5,
        max_radius: 20,
    };
    let record = RoiRecord::from_frame(spec, pixels).expect("record");
    DetectionTask::new(record, thresholds)
}

#[fixture]
fn thresholds() -> Thresholds {
    Thresholds { low: 50, high: 150 }
}

/// Encodes the parent's side of a worker conversation.
fn script(tasks: &[DetectionTask], exit: bool) -> Cursor<Vec<u8>> {
    let mut input = Vec::new();
    for task in tasks {
        write_json(&mut input, &WorkerRequest::detect(task)).expect("request");
        write_frame(&mut input, &task.record.pixels).expect("pixels");
    }
    if exit {
        write_json(&mut input, &WorkerRequest::Exit).expect("exit");
    }
    Cursor::new(input)
}

fn replies(output: Vec<u8>) -> Vec<WorkerReply> {
    let mut cursor = Cursor::new(output);
    let mut replies = Vec::new();
    while cursor.position() < cursor.get_ref().len() as u64 {
        replies.push(read_json(&mut cursor, DEFAULT_MAX_FRAME_BYTES).expect("reply"));
    }
    replies
}

#[rstest]
#[expect(clippy::float_arithmetic, reason = "tolerances on fitted coordinates")]
fn worker_reports_ready_then_answers_each_task(thresholds: Thresholds) {
    let tasks = [
        task("disc", 64, disc_pixels(64, (30, 30), 10), thresholds),
        task("blank", 64, vec![0; 64 * 64], thresholds),
    ];
    let mut input = script(&tasks, true);
    let mut output = Vec::new();

    run_worker(&mut input, &mut output, DEFAULT_MAX_FRAME_BYTES, None).expect("worker loop");

    let replies = replies(output);
    assert_eq!(replies.len(), 3);
    assert_eq!(replies.first(), Some(&WorkerReply::Ready));
    match replies.get(1) {
        Some(WorkerReply::Shape { x, y, r }) => {
            assert!((x - 30.0).abs() <= 1.0, "x = {x}");
            assert!((y - 30.0).abs() <= 1.0, "y = {y}");
            assert!((r - 10.0).abs() <= 1.0, "r = {r}");
        }
        other => panic!("expected a shape, got {other:?}"),
    }
    assert_eq!(replies.get(2), Some(&WorkerReply::NoMatch));
}

#[rstest]
fn worker_stops_cleanly_at_end_of_input(thresholds: Thresholds) {
    let tasks = [task("blank", 16, vec![0; 256], thresholds)];
    let mut input = script(&tasks, false);
    let mut output = Vec::new();

    run_worker(&mut input, &mut output, DEFAULT_MAX_FRAME_BYTES, None).expect("worker loop");

    assert_eq!(replies(output).len(), 2);
}

#[rstest]
fn injected_panic_becomes_a_fault_and_the_worker_survives(thresholds: Thresholds) {
    let tasks = [
        task("boom", 16, vec![0; 256], thresholds),
        task("fine", 16, vec![0; 256], thresholds),
    ];
    let fault: FaultInjection = "panic:boom".parse().expect("directive");
    let mut input = script(&tasks, true);
    let mut output = Vec::new();

    run_worker(&mut input, &mut output, DEFAULT_MAX_FRAME_BYTES, Some(&fault))
        .expect("worker loop");

    let replies = replies(output);
    match replies.get(1) {
        Some(WorkerReply::Fault { message }) => assert!(message.contains("boom"), "{message}"),
        other => panic!("expected a fault, got {other:?}"),
    }
    assert_eq!(replies.get(2), Some(&WorkerReply::NoMatch));
}

#[rstest]
#[expect(clippy::float_arithmetic, reason = "tolerances on fitted coordinates")]
fn inverted_thresholds_detect_like_ordered_ones() {
    let inverted = Thresholds { low: 150, high: 50 };
    let tasks = [task("inverted", 64, disc_pixels(64, (30, 30), 10), inverted)];
    let mut input = script(&tasks, true);
    let mut output = Vec::new();

    run_worker(&mut input, &mut output, DEFAULT_MAX_FRAME_BYTES, None).expect("worker loop");

    match replies(output).get(1) {
        Some(WorkerReply::Shape { x, y, r }) => {
            assert!((x - 30.0).abs() <= 1.0, "x = {x}");
            assert!((y - 30.0).abs() <= 1.0, "y = {y}");
            assert!((r - 10.0).abs() <= 1.0, "r = {r}");
        }
        other => panic!("expected a shape, got {other:?}"),
    }
}

#[rstest]
fn malformed_requests_end_the_worker() {
    let mut input = Vec::new();
    write_frame(&mut input, br#"{"type":"rotate"}"#).expect("frame");
    let mut output = Vec::new();

    let error = run_worker(&mut Cursor::new(input), &mut output, DEFAULT_MAX_FRAME_BYTES, None)
        .expect_err("unknown request");

    assert!(matches!(error, WorkerError::Request(_)));
}

#[rstest]
#[case("abort:a", true)]
#[case("stall:roi-7", true)]
#[case("panic:x:y", true)]
#[case("panic:", false)]
#[case("explode:a", false)]
#[case("abort", false)]
fn fault_injection_directives_parse(#[case] directive: &str, #[case] valid: bool) {
    assert_eq!(directive.parse::<FaultInjection>().is_ok(), valid);
}

#[rstest]
fn requests_serialise_with_a_type_tag(thresholds: Thresholds) {
    let exit = serde_json::to_value(WorkerRequest::Exit).expect("exit");
    assert_eq!(exit, serde_json::json!({ "type": "exit" }));

    let detect = serde_json::to_value(WorkerRequest::detect(&task(
        "a",
        8,
        vec![0; 64],
        thresholds,
    )))
    .expect("detect");
    assert_eq!(detect["type"], "detect");
    assert_eq!(detect["max_radius"], 20);
    assert_eq!(detect["high"], 150);
}

#[rstest]
fn pending_task_delivers_its_outcome() {
    let (completer, pending) = PendingTask::channel();
    completer.complete(Ok(None));
    assert_eq!(pending.wait(), Ok(None));
}

#[rstest]
fn dropped_completer_abandons_the_task() {
    let (completer, pending) = PendingTask::channel();
    drop(completer);
    assert_eq!(pending.wait(), Err(TaskError::Abandoned));
}

#[rstest]
fn completing_an_abandoned_handle_is_harmless() {
    let (completer, pending) = PendingTask::channel();
    drop(pending);
    completer.complete(Err(TaskError::WorkerDied));
}

#[rstest]
#[case(TaskError::WorkerDied, true)]
#[case(TaskError::Timeout { timeout: Duration::from_secs(1) }, true)]
#[case(TaskError::Protocol { message: String::from("junk") }, true)]
#[case(TaskError::Fault { message: String::from("panic") }, false)]
#[case(TaskError::PoolClosed, false)]
fn only_broken_workers_are_replaced(#[case] error: TaskError, #[case] poisons: bool) {
    assert_eq!(error.poisons_worker(), poisons);
}

#[rstest]
fn timeout_message_names_the_budget() {
    let error = TaskError::Timeout {
        timeout: Duration::from_secs(5),
    };
    assert_eq!(error.to_string(), "detection timed out after 5s");
}

#[rstest]
fn missing_worker_program_fails_pool_start() {
    let config = ProcessPoolConfig {
        workers: 2,
        command: WorkerCommand::new("/nonexistent/hough-worker"),
        task_timeout: None,
        shutdown_timeout: Duration::from_secs(1),
        max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
    };
    let error = ProcessPool::start(config).err().expect("start should fail");
    assert!(matches!(error, PoolError::Spawn { .. }), "{error}");
}
