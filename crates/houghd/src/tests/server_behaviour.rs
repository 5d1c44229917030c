//! Behavioural tests for the detection server over TCP.

use std::cell::RefCell;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use hough_config::{Config, SocketEndpoint};
use hough_protocol::{DetectResponse, RoiResult, write_json};

use super::support::{InlineRunner, Roi, is_closed, read_response, send_batch};
use crate::pool::TaskRunner;
use crate::server::{RunningServer, Server};

struct ServerWorld {
    server: Option<RunningServer>,
    runner: Option<Arc<InlineRunner>>,
    address: Option<SocketAddr>,
    client: Option<TcpStream>,
    response: Option<DetectResponse>,
}

impl ServerWorld {
    const fn new() -> Self {
        Self {
            server: None,
            runner: None,
            address: None,
            client: None,
            response: None,
        }
    }

    fn start(&mut self, runner: InlineRunner) {
        let config = Config {
            socket: SocketEndpoint::tcp("127.0.0.1", 0),
            accept_poll_ms: 20,
            idle_timeout_secs: 5,
            ..Config::default()
        };
        let inline = Arc::new(runner);
        let shared: Arc<dyn TaskRunner> = inline.clone();
        let server = Server::new(config)
            .with_runner(shared)
            .start()
            .expect("server should start");
        self.address = server.local_addr();
        self.server = Some(server);
        self.runner = Some(inline);
    }

    fn client(&mut self) -> &mut TcpStream {
        let address = self.address.expect("server address");
        self.client.get_or_insert_with(|| {
            let stream = TcpStream::connect(address).expect("connect client");
            stream
                .set_read_timeout(Some(Duration::from_secs(10)))
                .expect("client timeout");
            stream
        })
    }

    fn exchange(&mut self, rois: &[Roi]) {
        let client = self.client();
        send_batch(client, rois);
        let response = read_response(client);
        self.response = Some(response);
    }

    fn response(&self) -> &DetectResponse {
        self.response.as_ref().expect("a response should have been read")
    }

    fn result(&self, id: &str) -> &RoiResult {
        self.response()
            .results
            .iter()
            .find(|result| result.id == id)
            .unwrap_or_else(|| panic!("no result for '{id}'"))
    }
}

#[fixture]
fn world() -> RefCell<ServerWorld> {
    RefCell::new(ServerWorld::new())
}

#[given("a detection server backed by an in-process runner")]
fn given_server(world: &RefCell<ServerWorld>) {
    world.borrow_mut().start(InlineRunner::new());
}

#[given("a detection server whose runner faults on \"{id}\"")]
fn given_faulting_server(world: &RefCell<ServerWorld>, id: String) {
    world.borrow_mut().start(InlineRunner::new().fault_on(&id));
}

#[given("a detection server whose runner delays \"{id}\" by {millis} milliseconds")]
fn given_delaying_server(world: &RefCell<ServerWorld>, id: String, millis: u64) {
    world
        .borrow_mut()
        .start(InlineRunner::new().delay(&id, Duration::from_millis(millis)));
}

#[when("a client sends a {size} pixel image with a disc of radius {radius} at {x}, {y}")]
fn when_disc(world: &RefCell<ServerWorld>, size: u32, radius: i64, x: i64, y: i64) {
    world
        .borrow_mut()
        .exchange(&[Roi::disc("disc", size, (x, y), radius)]);
}

#[when("a client sends a blank {size} pixel image named \"{id}\"")]
fn when_blank(world: &RefCell<ServerWorld>, size: u32, id: String) {
    world.borrow_mut().exchange(&[Roi::blank(&id, size)]);
}

#[when("a client sends a batch of \"{first}\", \"{second}\" and \"{third}\"")]
fn when_batch(world: &RefCell<ServerWorld>, first: String, second: String, third: String) {
    world.borrow_mut().exchange(&[
        Roi::disc(&first, 64, (30, 30), 10),
        Roi::blank(&second, 32),
        Roi::blank(&third, 32),
    ]);
}

#[when("a client sends a header without roi_specs")]
fn when_malformed_header(world: &RefCell<ServerWorld>) {
    let mut world = world.borrow_mut();
    let client = world.client();
    write_json(
        client,
        &serde_json::json!({ "type": "detect", "params": { "low": 50, "high": 150 } }),
    )
    .expect("write header");
    let response = read_response(client);
    world.response = Some(response);
}

#[when("a client streams an image with an empty radius range without waiting")]
fn when_streamed_rejected(world: &RefCell<ServerWorld>) {
    let mut roi = Roi::blank("flat", 32);
    roi.spec.max_radius = roi.spec.min_radius;
    world.borrow_mut().exchange(&[roi]);
}

#[when("a client sends an image whose pixel frame is {short} bytes short")]
fn when_short_frame(world: &RefCell<ServerWorld>, short: usize) {
    let mut roi = Roi::blank("short", 32);
    roi.pixels.truncate(roi.pixels.len() - short);
    world.borrow_mut().exchange(&[roi]);
}

#[when("the server is stopped")]
fn when_stopped(world: &RefCell<ServerWorld>) {
    let server = world.borrow_mut().server.take().expect("running server");
    server.stop().expect("server should stop cleanly");
}

#[then("the response succeeds")]
fn then_success(world: &RefCell<ServerWorld>) {
    let world = world.borrow();
    let response = world.response();
    assert!(response.ok, "unexpected failure: {:?}", response.error);
    assert!(response.error.is_none());
    assert!(response.elapsed_ms.is_some());
}

#[then("the response fails with a message starting \"{prefix}\"")]
fn then_failure(world: &RefCell<ServerWorld>, prefix: String) {
    let world = world.borrow();
    let response = world.response();
    assert!(!response.ok);
    let error = response.error.as_deref().unwrap_or_default();
    assert!(error.starts_with(&prefix), "unexpected error: {error}");
}

#[then("the response has no results")]
fn then_no_results(world: &RefCell<ServerWorld>) {
    assert!(world.borrow().response().results.is_empty());
}

#[then("the result for \"{id}\" is a circle near {x}, {y} with radius {r}")]
#[expect(clippy::float_arithmetic, reason = "tolerances on fitted coordinates")]
fn then_circle(world: &RefCell<ServerWorld>, id: String, x: f64, y: f64, r: f64) {
    let world = world.borrow();
    let result = world.result(&id);
    let shape = result.shape.unwrap_or_else(|| panic!("no shape for '{id}': {result:?}"));
    assert!((shape.x - x).abs() <= 1.5, "x = {}", shape.x);
    assert!((shape.y - y).abs() <= 1.5, "y = {}", shape.y);
    assert!((shape.r - r).abs() <= 1.5, "r = {}", shape.r);
}

#[then("the result for \"{id}\" has neither a shape nor an error")]
fn then_no_match(world: &RefCell<ServerWorld>, id: String) {
    let world = world.borrow();
    let result = world.result(&id);
    assert!(result.shape.is_none() && result.error.is_none(), "{result:?}");
}

#[then("the result for \"{id}\" reports an error")]
fn then_item_error(world: &RefCell<ServerWorld>, id: String) {
    let world = world.borrow();
    let result = world.result(&id);
    assert!(result.shape.is_none());
    assert!(result.error.is_some(), "{result:?}");
}

#[then("the results are ordered \"{first}\", \"{second}\", \"{third}\"")]
fn then_ordered(world: &RefCell<ServerWorld>, first: String, second: String, third: String) {
    let world = world.borrow();
    let ids: Vec<&str> = world
        .response()
        .results
        .iter()
        .map(|result| result.id.as_str())
        .collect();
    assert_eq!(ids, [first.as_str(), second.as_str(), third.as_str()]);
}

#[then("the server closes the connection")]
fn then_closed(world: &RefCell<ServerWorld>) {
    let mut world = world.borrow_mut();
    assert!(is_closed(world.client()));
}

#[then("the runner is closed")]
fn then_runner_closed(world: &RefCell<ServerWorld>) {
    let world = world.borrow();
    let runner = world.runner.as_ref().expect("runner");
    assert!(runner.is_closed());
    assert_eq!(runner.submitted(), 0);
}

#[then("new clients are refused")]
fn then_refused(world: &RefCell<ServerWorld>) {
    let address = world.borrow().address.expect("address");
    assert!(TcpStream::connect_timeout(&address, Duration::from_secs(1)).is_err());
}

#[scenario(path = "tests/features/detection_server.feature", name = "A clean disc is located")]
fn clean_disc(#[from(world)] world: RefCell<ServerWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/detection_server.feature",
    name = "An image without edges yields no match"
)]
fn no_edges(#[from(world)] world: RefCell<ServerWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/detection_server.feature",
    name = "A malformed header is rejected without closing the connection"
)]
fn malformed_header(#[from(world)] world: RefCell<ServerWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/detection_server.feature",
    name = "Pixels sent after a rejected header close the connection"
)]
fn stray_pixels(#[from(world)] world: RefCell<ServerWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/detection_server.feature",
    name = "A faulting item does not fail its batch"
)]
fn faulting_item(#[from(world)] world: RefCell<ServerWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/detection_server.feature",
    name = "A short pixel frame closes the connection"
)]
fn short_frame(#[from(world)] world: RefCell<ServerWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/detection_server.feature",
    name = "Results keep request order when later items finish first"
)]
fn request_order(#[from(world)] world: RefCell<ServerWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/detection_server.feature",
    name = "Stopping the server closes the runner"
)]
fn stopping_closes_runner(#[from(world)] world: RefCell<ServerWorld>) {
    drop(world);
}
