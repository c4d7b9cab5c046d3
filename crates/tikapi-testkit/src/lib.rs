//! Fake RouterOS device for connection tests.
//!
//! [`FakeDevice`] listens on an ephemeral loopback port and runs a scripted
//! conversation on a background thread. Scripts receive a [`DeviceSession`]
//! that reads and writes sentences in the wire format, so tests can assert on
//! exactly what the client sent and control exactly what it receives.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail, ensure};
use md5::{Digest, Md5};
use tikapi_wire::{Sentence, SentenceAssembler, encode_sentence};

/// Loopback address the fake device binds.
pub const DEVICE_HOST: &str = "127.0.0.1";

/// Challenge bytes used by [`DeviceSession::serve_handshake`].
pub const DEFAULT_CHALLENGE: [u8; 16] = *b"tikapi-challenge";

/// Version reported by [`DeviceSession::serve_handshake`].
pub const DEFAULT_VERSION: &str = "7.15.3 (stable)";

const ACCEPT_DEADLINE: Duration = Duration::from_secs(5);
const SESSION_READ_TIMEOUT: Duration = Duration::from_secs(5);

type Outcome = Arc<Mutex<Option<Result<()>>>>;

/// A scripted device serving a fixed number of connections.
pub struct FakeDevice {
    port: u16,
    result: Outcome,
    handle: Option<thread::JoinHandle<()>>,
}

impl FakeDevice {
    /// Spawns a device that accepts one connection and runs `script` on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub fn spawn<F>(script: F) -> Result<Self>
    where
        F: FnOnce(&mut DeviceSession) -> Result<()> + Send + 'static,
    {
        let mut script = Some(script);
        Self::spawn_many(1, move |session, _| {
            let script = script.take().context("script already consumed")?;
            script(session)
        })
    }

    /// Spawns a device that accepts `connections` connections in sequence.
    ///
    /// The script receives the zero-based connection index.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub fn spawn_many<F>(connections: usize, script: F) -> Result<Self>
    where
        F: FnMut(&mut DeviceSession, usize) -> Result<()> + Send + 'static,
    {
        let listener = TcpListener::bind((DEVICE_HOST, 0)).context("bind fake device")?;
        listener
            .set_nonblocking(true)
            .context("fake device nonblocking")?;
        let port = listener.local_addr().context("local addr")?.port();
        let result: Outcome = Arc::new(Mutex::new(None));
        let result_clone = Arc::clone(&result);
        let handle = thread::spawn(move || {
            let outcome = serve(&listener, connections, script);
            if let Ok(mut guard) = result_clone.lock() {
                *guard = Some(outcome);
            }
        });
        Ok(Self {
            port,
            result,
            handle: Some(handle),
        })
    }

    /// Port the device listens on.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Waits for the script to finish and returns its outcome.
    ///
    /// # Errors
    ///
    /// Returns the script's error, or an error if the device thread panicked.
    pub fn finish(mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("fake device thread panicked"))?;
        }
        self.result
            .lock()
            .map_err(|error| anyhow!("lock fake device result: {error}"))?
            .take()
            .unwrap_or(Ok(()))
            .context("fake device script failed")
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve<F>(listener: &TcpListener, connections: usize, mut script: F) -> Result<()>
where
    F: FnMut(&mut DeviceSession, usize) -> Result<()>,
{
    for index in 0..connections {
        let stream = accept(listener).with_context(|| format!("accept connection {index}"))?;
        let mut session = DeviceSession::new(stream)?;
        script(&mut session, index)?;
    }
    Ok(())
}

fn accept(listener: &TcpListener) -> Result<TcpStream> {
    let deadline = Instant::now() + ACCEPT_DEADLINE;
    loop {
        match listener.accept() {
            Ok((stream, _)) => return Ok(stream),
            Err(ref error)
                if error.kind() == io::ErrorKind::WouldBlock && Instant::now() < deadline =>
            {
                thread::sleep(Duration::from_millis(10));
            }
            Err(error) => return Err(error).context("accept connection"),
        }
    }
}

/// One accepted client connection.
pub struct DeviceSession {
    stream: TcpStream,
    assembler: SentenceAssembler,
}

impl DeviceSession {
    fn new(stream: TcpStream) -> Result<Self> {
        stream
            .set_nonblocking(false)
            .context("session blocking mode")?;
        stream
            .set_read_timeout(Some(SESSION_READ_TIMEOUT))
            .context("session read timeout")?;
        Ok(Self {
            stream,
            assembler: SentenceAssembler::new(),
        })
    }

    /// Reads the next sentence sent by the client.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, malformed framing, or if the client closes the
    /// connection first.
    pub fn read_sentence(&mut self) -> Result<Sentence> {
        let mut chunk = [0_u8; 4096];
        loop {
            if let Some(sentence) = self
                .assembler
                .next_sentence()
                .context("decode client sentence")?
            {
                return Ok(sentence);
            }
            let read = self.stream.read(&mut chunk).context("read from client")?;
            ensure!(read > 0, "client closed the connection");
            self.assembler
                .extend(chunk.get(..read).context("read length within chunk")?);
        }
    }

    /// Reads the next sentence and checks it starts with `command`.
    ///
    /// # Errors
    ///
    /// Fails if reading fails or the sentence carries another command.
    pub fn expect_command(&mut self, command: &str) -> Result<Sentence> {
        let sentence = self.read_sentence()?;
        let actual = command_of(&sentence);
        ensure!(
            actual == Some(command),
            "expected {command}, client sent {sentence}"
        );
        Ok(sentence)
    }

    /// Reports whether the client has closed its side of the connection.
    ///
    /// # Errors
    ///
    /// Fails if unread data arrives instead.
    pub fn expect_eof(&mut self) -> Result<()> {
        let mut chunk = [0_u8; 64];
        match self.stream.read(&mut chunk) {
            Ok(0) => Ok(()),
            Ok(read) => bail!("expected end of stream, received {read} bytes"),
            Err(error) if error.kind() == io::ErrorKind::ConnectionReset => Ok(()),
            Err(error) => Err(error).context("wait for end of stream"),
        }
    }

    /// Sends one sentence built from `words`.
    ///
    /// # Errors
    ///
    /// Fails on encoding or write errors.
    pub fn send<I, W>(&mut self, words: I) -> Result<()>
    where
        I: IntoIterator<Item = W>,
        W: AsRef<[u8]>,
    {
        let bytes = encode_sentence(words).context("encode device sentence")?;
        self.send_raw(&bytes)
    }

    /// Writes raw bytes to the client.
    ///
    /// # Errors
    ///
    /// Fails on write errors.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).context("write to client")?;
        self.stream.flush().context("flush to client")
    }

    /// Sends `!re` with the given `key=value` fields for `tag`.
    ///
    /// # Errors
    ///
    /// Fails on write errors.
    pub fn send_re(&mut self, tag: &str, fields: &[&str]) -> Result<()> {
        self.send_tagged("!re", tag, fields)
    }

    /// Sends `!done` for `tag`.
    ///
    /// # Errors
    ///
    /// Fails on write errors.
    pub fn send_done(&mut self, tag: &str) -> Result<()> {
        self.send_tagged("!done", tag, &[])
    }

    /// Sends `!trap` with `message` for `tag`.
    ///
    /// # Errors
    ///
    /// Fails on write errors.
    pub fn send_trap(&mut self, tag: &str, message: &str) -> Result<()> {
        let message = format!("message={message}");
        self.send_tagged("!trap", tag, &[message.as_str()])
    }

    /// Sends an untagged `!fatal` with `message`.
    ///
    /// # Errors
    ///
    /// Fails on write errors.
    pub fn send_fatal(&mut self, message: &str) -> Result<()> {
        self.send(["!fatal", message])
    }

    fn send_tagged(&mut self, kind: &str, tag: &str, fields: &[&str]) -> Result<()> {
        let mut words = vec![kind.to_owned()];
        words.extend(fields.iter().map(|field| format!("={field}")));
        words.push(format!(".tag={tag}"));
        self.send(words)
    }

    /// Closes both directions of the connection.
    ///
    /// # Errors
    ///
    /// Fails if the shutdown itself fails.
    pub fn close(&mut self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(error) => Err(error).context("shut down session"),
        }
    }

    /// Serves a `/login =name= =password=` exchange.
    ///
    /// Returns whether the credentials matched; a mismatch is answered with
    /// `!trap` then `!done`.
    ///
    /// # Errors
    ///
    /// Fails if the client sends anything else.
    pub fn serve_modern_login(&mut self, user: &str, password: &str) -> Result<bool> {
        let request = self.expect_command("/login")?;
        let tag = tag_of(&request)?;
        let accepted =
            request.value("name") == Some(user) && request.value("password") == Some(password);
        if accepted {
            self.send_done(&tag)?;
        } else {
            self.send_trap(&tag, "invalid user name or password (6)")?;
            self.send_done(&tag)?;
        }
        Ok(accepted)
    }

    /// Serves the challenge-response login.
    ///
    /// The first `/login` is answered with `ret=<hex challenge>`. The
    /// follow-up must carry `name` and the expected `response`.
    ///
    /// # Errors
    ///
    /// Fails if the client sends anything else.
    pub fn serve_challenge_login(
        &mut self,
        user: &str,
        password: &str,
        challenge: &[u8],
    ) -> Result<bool> {
        let first = self.expect_command("/login")?;
        let tag = tag_of(&first)?;
        self.send_tagged("!done", &tag, &[format!("ret={}", hex::encode(challenge)).as_str()])?;

        let second = self.expect_command("/login")?;
        let tag = tag_of(&second)?;
        let expected = challenge_response(password, challenge);
        let accepted = second.value("name") == Some(user)
            && second.value("response") == Some(expected.as_str());
        if accepted {
            self.send_done(&tag)?;
        } else {
            self.send_trap(&tag, "cannot log in")?;
            self.send_done(&tag)?;
        }
        Ok(accepted)
    }

    /// Blocks until the client has sent more bytes and leaves them unread.
    ///
    /// Ending the script afterwards closes the socket with data pending, so
    /// the client sees a connection reset rather than end of stream.
    ///
    /// # Errors
    ///
    /// Fails if the client closes first or nothing arrives in time.
    pub fn await_unread_bytes(&mut self) -> Result<()> {
        ensure!(
            self.assembler.buffered() == 0,
            "client bytes already consumed"
        );
        let mut first = [0_u8; 1];
        let pending = self.stream.peek(&mut first).context("peek at client bytes")?;
        ensure!(pending > 0, "client closed the connection");
        Ok(())
    }

    /// Answers `/system/resource/getall` with `version`, or with a bare
    /// `!done` when `version` is `None`.
    ///
    /// # Errors
    ///
    /// Fails if the client sends anything else.
    pub fn serve_version(&mut self, version: Option<&str>) -> Result<()> {
        let request = self.expect_command("/system/resource/getall")?;
        let tag = tag_of(&request)?;
        if let Some(version) = version {
            let field = format!("version={version}");
            self.send_re(&tag, &[field.as_str(), "board-name=CHR"])?;
        }
        self.send_done(&tag)
    }

    /// Serves the default handshake: challenge login for `admin` with an
    /// empty password, then the version query.
    ///
    /// # Errors
    ///
    /// Fails if login is rejected or the client deviates.
    pub fn serve_handshake(&mut self) -> Result<()> {
        let accepted = self.serve_challenge_login("admin", "", &DEFAULT_CHALLENGE)?;
        ensure!(accepted, "default credentials rejected");
        self.serve_version(Some(DEFAULT_VERSION))
    }

    /// Serves `/quit` with the device's farewell `!fatal` and closes.
    ///
    /// # Errors
    ///
    /// Fails if the client sends anything else.
    pub fn serve_quit(&mut self) -> Result<()> {
        self.expect_command("/quit")?;
        self.send_fatal("session terminated on request")?;
        self.close()
    }
}

/// Returns the command word of a client sentence.
#[must_use]
pub fn command_of(sentence: &Sentence) -> Option<&str> {
    sentence
        .iter()
        .next()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with('/'))
}

/// Returns the `.tag` of a client sentence.
///
/// # Errors
///
/// Fails when the sentence is untagged.
pub fn tag_of(sentence: &Sentence) -> Result<String> {
    sentence
        .tag()
        .map(str::to_owned)
        .with_context(|| format!("client sentence without tag: {sentence}"))
}

/// Computes the `response` value the client must send for a challenge.
#[must_use]
pub fn challenge_response(password: &str, challenge: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update([0_u8]);
    hasher.update(password.as_bytes());
    hasher.update(challenge);
    format!("00{}", hex::encode(hasher.finalize()))
}
