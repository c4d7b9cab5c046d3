//! Shared helpers for fake-device tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tikapi_testkit::{DEVICE_HOST, DeviceSession, FakeDevice, tag_of};
use tikapi_wire::Sentence;

use crate::{
    ApiError, CANCEL_COMMAND, CallbackError, Connection, ConnectionConfig, ReplyContext, Tag,
};

/// Configuration pointing at `device` with test-sized timeouts.
pub(super) fn config_for(device: &FakeDevice) -> ConnectionConfig {
    ConnectionConfig::new(DEVICE_HOST)
        .with_port(device.port())
        .with_connect_timeout(Duration::from_secs(2))
        .with_command_timeout(Duration::from_secs(5))
}

/// Opens and logs in to `device`, which must serve the default handshake.
pub(super) fn open(device: &FakeDevice) -> Connection {
    Connection::open(config_for(device)).expect("login against fake device")
}

/// Sentences seen by a callback, shared with the test body.
#[derive(Clone, Default)]
pub(super) struct Recorder {
    seen: Arc<Mutex<Vec<Sentence>>>,
}

impl Recorder {
    /// A callback that records every sentence it receives.
    pub(super) fn callback(
        &self,
    ) -> impl FnMut(&mut ReplyContext<'_>, &Sentence) -> Result<(), CallbackError> + Send + 'static
    {
        let seen = Arc::clone(&self.seen);
        move |_, sentence| {
            seen.lock().expect("recorder lock").push(sentence.clone());
            Ok(())
        }
    }

    /// Recorded sentences, in delivery order.
    pub(super) fn sentences(&self) -> Vec<Sentence> {
        self.seen.lock().expect("recorder lock").clone()
    }

    /// Values of `key` across recorded sentences, skipping absent ones.
    pub(super) fn values(&self, key: &str) -> Vec<String> {
        self.sentences()
            .iter()
            .filter_map(|sentence| sentence.value(key).map(str::to_owned))
            .collect()
    }
}

/// Scripted conversations the behaviour scenarios run against.
#[derive(Debug, Clone, Copy)]
pub(super) enum DeviceScript {
    /// Two `/ping` requests whose rows arrive interleaved.
    Interleaved,
    /// `/ping` requests answered by a single `!fatal`.
    Fatal(usize),
    /// A `/ping` that streams one row and is then canceled.
    Cancel,
    /// The `/quit` farewell.
    Quit,
}

impl DeviceScript {
    fn run(self, session: &mut DeviceSession) -> anyhow::Result<()> {
        session.serve_handshake()?;
        match self {
            Self::Interleaved => {
                let first = tag_of(&session.expect_command(PING)?)?;
                let second = tag_of(&session.expect_command(PING)?)?;
                for seq in ["seq=0", "seq=1"] {
                    session.send_re(&second, &[seq])?;
                    session.send_re(&first, &[seq])?;
                }
                session.send_done(&first)?;
                session.send_done(&second)
            }
            Self::Fatal(requests) => {
                for _ in 0..requests {
                    session.expect_command(PING)?;
                }
                session.send_fatal(REBOOT_MESSAGE)
            }
            Self::Cancel => {
                let target = tag_of(&session.expect_command(PING)?)?;
                session.send_re(&target, &["seq=0"])?;
                let cancel = tag_of(&session.expect_command(CANCEL_COMMAND)?)?;
                session.send_trap(&target, "interrupted")?;
                session.send_done(&target)?;
                session.send_done(&cancel)
            }
            Self::Quit => session.serve_quit(),
        }
    }
}

/// Command streamed by the behaviour scenarios.
pub(super) const PING: &str = "/ping";

/// Reason carried by the scripted `!fatal`.
pub(super) const REBOOT_MESSAGE: &str = "system is rebooting";

/// State shared by the steps of one scenario.
#[derive(Default)]
pub(super) struct TestWorld {
    pub(super) device: Option<FakeDevice>,
    pub(super) connection: Option<Connection>,
    pub(super) requests: Vec<(Tag, Recorder)>,
    pub(super) error: Option<ApiError>,
}

impl TestWorld {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn start_device(&mut self, script: DeviceScript) {
        let device = FakeDevice::spawn(move |session| script.run(session)).expect("spawn device");
        self.device = Some(device);
    }

    pub(super) fn log_in(&mut self) {
        let device = self.device.as_ref().expect("device started");
        self.connection = Some(open(device));
    }

    pub(super) fn connection(&mut self) -> &mut Connection {
        self.connection.as_mut().expect("client logged in")
    }

    pub(super) fn send_pings(&mut self, count: usize) {
        for _ in 0..count {
            let recorder = Recorder::default();
            let tag = self
                .connection()
                .request_each(PING, [("address", "192.0.2.1")], recorder.callback())
                .expect("send ping");
            self.requests.push((tag, recorder));
        }
    }

    pub(super) fn record<T>(&mut self, outcome: Result<T, ApiError>) {
        if let Err(error) = outcome {
            self.error = Some(error);
        }
    }

    pub(super) fn finish_device(&mut self) {
        self.connection = None;
        self.device
            .take()
            .expect("device started")
            .finish()
            .expect("device script");
    }
}
