//! Login handshake and version discovery.

use md5::{Digest, Md5};
use tikapi_wire::{Sentence, SentenceKind, TAG_KEY};
use tracing::{debug, info, warn};

use super::{Connection, ensure_connected};
use crate::LOGIN_TARGET;
use crate::error::{ApiError, ProtocolError};
use crate::reply::Reply;
use crate::request::{Argument, Request};

const LOGIN_COMMAND: &str = "/login";
const RESOURCE_COMMAND: &str = "/system/resource/getall";

impl Connection {
    /// Connects if needed, authenticates and records the device version.
    ///
    /// With TLS, or when plaintext login is requested, the password is sent
    /// in `/login` directly. Devices that answer with a challenge instead,
    /// and all plain connections otherwise, use the MD5 challenge-response
    /// exchange.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError`](crate::ConnectionError) when the socket cannot
    ///   be opened.
    /// - [`ApiError::Authentication`] when the device rejects the
    ///   credentials.
    /// - [`ProtocolError::UnexpectedLoginReply`] for any other reply shape.
    ///
    /// The socket is closed before authentication and protocol failures are
    /// returned.
    pub fn login(&mut self) -> Result<(), ApiError> {
        ensure_connected(self)?;
        if let Err(error) = self.authenticate() {
            if matches!(
                error,
                ApiError::Authentication { .. } | ApiError::Protocol(_)
            ) {
                self.close();
            }
            return Err(error);
        }
        self.query_version()
    }

    fn authenticate(&mut self) -> Result<(), ApiError> {
        let user = self.config.user.clone();
        let password = self.config.password.clone();

        let challenge_reply = if self.config.uses_password_login() {
            if !self.config.tls {
                warn!(target: LOGIN_TARGET, %user, "sending password over an unencrypted connection");
            }
            let reply = self.login_exchange(Request::new(
                LOGIN_COMMAND,
                [Argument::pair("name", &user), Argument::pair("password", &password)],
                true,
            ))?;
            if is_lone_done(&reply) {
                info!(target: LOGIN_TARGET, %user, "logged in with password");
                return Ok(());
            }
            debug!(target: LOGIN_TARGET, "device answered password login with a challenge");
            reply
        } else {
            self.login_exchange(Request::plain(LOGIN_COMMAND))?
        };

        let challenge = parse_challenge(&challenge_reply)?;
        let response = challenge_response(&password, &challenge);
        let reply = self.login_exchange(Request::new(
            LOGIN_COMMAND,
            [Argument::pair("name", &user), Argument::pair("response", response)],
            true,
        ))?;
        if !is_lone_done(&reply) {
            return Err(unexpected(&reply));
        }
        info!(target: LOGIN_TARGET, %user, "logged in with challenge response");
        Ok(())
    }

    /// Sends one `/login` step and rejects trapped replies.
    ///
    /// A device may trap the credentials and drop the socket before `!done`.
    /// The trap still decides the outcome in that case.
    fn login_exchange(&mut self, request: Request) -> Result<Reply, ApiError> {
        let tag = self.send(request.retain_reply())?;
        let reply = match self.wait_for(tag) {
            Ok(reply) => reply.unwrap_or_default(),
            Err(error @ ApiError::Fatal { .. }) => {
                reject_trap(&self.take_reply(tag).unwrap_or_default())?;
                return Err(error);
            }
            Err(error) => return Err(error),
        };
        reject_trap(&reply)?;
        Ok(reply)
    }

    fn query_version(&mut self) -> Result<(), ApiError> {
        let reply = self.exchange(Request::plain(RESOURCE_COMMAND))?;
        self.os_version = reply
            .first()
            .filter(|sentence| sentence.is(SentenceKind::Re))
            .and_then(|sentence| sentence.value("version"))
            .map(str::to_owned);
        debug!(target: LOGIN_TARGET, version = ?self.os_version, "device version");
        Ok(())
    }
}

fn reject_trap(reply: &Reply) -> Result<(), ApiError> {
    match reply.trap_message() {
        Some(message) => {
            warn!(target: LOGIN_TARGET, %message, "login rejected");
            Err(ApiError::authentication(message))
        }
        None => Ok(()),
    }
}

/// A single `!done` carrying nothing but its tag.
fn is_lone_done(reply: &Reply) -> bool {
    match reply.sentences() {
        [sentence] => {
            sentence.is(SentenceKind::Done)
                && sentence
                    .iter()
                    .all(|(key, _)| key == SentenceKind::Done.key() || key == TAG_KEY)
        }
        _ => false,
    }
}

/// Extracts the challenge from a single `!done =ret=<hex>` sentence.
fn parse_challenge(reply: &Reply) -> Result<Vec<u8>, ApiError> {
    let [sentence] = reply.sentences() else {
        return Err(unexpected(reply));
    };
    let Some(encoded) = challenge_text(sentence) else {
        return Err(unexpected(reply));
    };
    let padded = if encoded.len() & 1 == 1 {
        format!("0{encoded}")
    } else {
        encoded.to_owned()
    };
    hex::decode(padded).map_err(|_| unexpected(reply))
}

fn challenge_text(sentence: &Sentence) -> Option<&str> {
    if sentence.len() == 3 {
        sentence.value("ret")
    } else {
        None
    }
}

/// `00` followed by the hex MD5 of `0x00 ‖ password ‖ challenge`.
pub(crate) fn challenge_response(password: &str, challenge: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update([0_u8]);
    hasher.update(password.as_bytes());
    hasher.update(challenge);
    format!("00{}", hex::encode(hasher.finalize()))
}

fn unexpected(reply: &Reply) -> ApiError {
    let rendered = reply
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ");
    ProtocolError::UnexpectedLoginReply { reply: rendered }.into()
}
