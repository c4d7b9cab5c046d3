//! Behavioural tests for request correlation using `rstest-bdd`.

use std::cell::RefCell;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tikapi_wire::SentenceKind;

use crate::tests::support::{DeviceScript, REBOOT_MESSAGE, TestWorld};
use crate::{ApiError, QUIT_COMMAND, Request};

#[fixture]
fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}

#[given("a device that interleaves two ping streams")]
fn given_interleaving_device(world: &RefCell<TestWorld>) {
    world.borrow_mut().start_device(DeviceScript::Interleaved);
}

#[given("a device that answers {count} pings with a fatal sentence")]
fn given_fatal_device(world: &RefCell<TestWorld>, count: usize) {
    world.borrow_mut().start_device(DeviceScript::Fatal(count));
}

#[given("a device that serves quit")]
fn given_quit_device(world: &RefCell<TestWorld>) {
    world.borrow_mut().start_device(DeviceScript::Quit);
}

#[given("a device that honours cancel")]
fn given_cancel_device(world: &RefCell<TestWorld>) {
    world.borrow_mut().start_device(DeviceScript::Cancel);
}

#[given("the client is logged in")]
fn given_logged_in(world: &RefCell<TestWorld>) {
    world.borrow_mut().log_in();
}

#[when("the client sends {count} ping requests")]
fn when_send_pings(world: &RefCell<TestWorld>, count: usize) {
    world.borrow_mut().send_pings(count);
}

#[when("the client waits for every request")]
fn when_wait_for_all(world: &RefCell<TestWorld>) {
    let mut world = world.borrow_mut();
    let outcome = world.connection().wait_for_all();
    world.record(outcome);
}

#[when("the client quits")]
fn when_quit(world: &RefCell<TestWorld>) {
    let mut world = world.borrow_mut();
    let outcome = world.connection().exchange(Request::plain(QUIT_COMMAND));
    world.record(outcome);
}

#[when("the client cancels the first request after its first row")]
fn when_cancel_first(world: &RefCell<TestWorld>) {
    let mut world = world.borrow_mut();
    let (tag, _) = world.requests.first().cloned().expect("a request was sent");
    let connection = world.connection();
    connection.pump().expect("first row");
    connection.cancel(tag).expect("cancel");
}

#[then("each request received {count} rows")]
fn then_rows_received(world: &RefCell<TestWorld>, count: usize) {
    let world = world.borrow();
    for (tag, recorder) in &world.requests {
        let rows = recorder
            .sentences()
            .iter()
            .filter(|sentence| sentence.is(SentenceKind::Re))
            .count();
        assert_eq!(rows, count, "rows for request {tag}");
    }
}

#[then("no request is outstanding")]
fn then_nothing_outstanding(world: &RefCell<TestWorld>) {
    assert_eq!(world.borrow_mut().connection().outstanding(), 0);
}

#[then("the error is fatal with message {message}")]
fn then_fatal_error(world: &RefCell<TestWorld>, message: String) {
    let world = world.borrow();
    match &world.error {
        Some(ApiError::Fatal { message: received }) => {
            assert_eq!(received, message.trim_matches('"'));
        }
        other => panic!("expected a fatal error, got {other:?}"),
    }
}

#[then("every request saw the fatal sentence")]
fn then_fatal_delivered(world: &RefCell<TestWorld>) {
    let world = world.borrow();
    for (tag, recorder) in &world.requests {
        let sentences = recorder.sentences();
        let last = sentences.last().expect("a sentence was delivered");
        assert!(last.is(SentenceKind::Fatal), "request {tag} missed the fatal");
        assert_eq!(last.message(), Some(REBOOT_MESSAGE));
    }
}

#[then("the client is disconnected")]
fn then_disconnected(world: &RefCell<TestWorld>) {
    assert!(!world.borrow_mut().connection().is_connected());
}

#[then("no error was raised")]
fn then_no_error(world: &RefCell<TestWorld>) {
    let world = world.borrow();
    assert!(world.error.is_none(), "unexpected error: {:?}", world.error);
}

#[then("the first request saw a row, a trap and a done")]
fn then_canceled_sequence(world: &RefCell<TestWorld>) {
    let world = world.borrow();
    let (_, recorder) = world.requests.first().expect("a request was sent");
    let kinds: Vec<_> = recorder
        .sentences()
        .iter()
        .map(tikapi_wire::Sentence::kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            Some(SentenceKind::Re),
            Some(SentenceKind::Trap),
            Some(SentenceKind::Done)
        ]
    );
}

#[then("the device script completes")]
fn then_device_completes(world: &RefCell<TestWorld>) {
    world.borrow_mut().finish_device();
}

#[scenario(
    path = "tests/features/connection.feature",
    name = "Interleaved replies reach the requests that asked for them"
)]
fn interleaved_replies(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/connection.feature",
    name = "A fatal sentence ends every outstanding request"
)]
fn fatal_sweep(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/connection.feature",
    name = "Quitting ends the session without an error"
)]
fn quit_suppresses_fatal(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/connection.feature",
    name = "A canceled request completes exactly once"
)]
fn cancel_completes_once(world: RefCell<TestWorld>) {
    let _ = world;
}
