//! Connection parameters.

use std::fmt;
use std::time::Duration;

/// API port for plain TCP.
pub const DEFAULT_PLAIN_PORT: u16 = 8728;

/// API port for TLS.
pub const DEFAULT_TLS_PORT: u16 = 8729;

/// User name used when none is configured.
pub const DEFAULT_USER: &str = "admin";

/// Time allowed for TCP connect and the TLS handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed without receiving bytes while requests are outstanding.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Parameters for one device connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Host name or address of the device.
    pub host: String,
    /// Explicit port. `None` selects the default for the transport.
    pub port: Option<u16>,
    /// Login user name.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Wrap the connection in TLS.
    pub tls: bool,
    /// Verify the device certificate against the web PKI roots.
    pub verify_certificates: bool,
    /// Send the password with `/login` even without TLS.
    pub plaintext_login: bool,
    /// Limit for connect and TLS handshake. Zero disables it.
    pub connect_timeout: Duration,
    /// Limit for silence while waiting on replies. Zero disables it.
    pub command_timeout: Duration,
}

impl ConnectionConfig {
    /// Configuration for `host` with default credentials and timeouts.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            user: DEFAULT_USER.to_owned(),
            password: String::new(),
            tls: false,
            verify_certificates: true,
            plaintext_login: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Port used for the connection.
    #[must_use]
    pub const fn effective_port(&self) -> u16 {
        match self.port {
            Some(port) => port,
            None if self.tls => DEFAULT_TLS_PORT,
            None => DEFAULT_PLAIN_PORT,
        }
    }

    /// `host:port` for logs and errors.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.effective_port())
    }

    /// Sets an explicit port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the login credentials.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Enables or disables TLS.
    #[must_use]
    pub const fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Enables or disables certificate verification for TLS.
    #[must_use]
    pub const fn with_certificate_verification(mut self, verify: bool) -> Self {
        self.verify_certificates = verify;
        self
    }

    /// Requests the password login on unencrypted connections.
    #[must_use]
    pub const fn with_plaintext_login(mut self, plaintext: bool) -> Self {
        self.plaintext_login = plaintext;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the command timeout.
    #[must_use]
    pub const fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Reports whether login sends the password in the `/login` request.
    #[must_use]
    pub const fn uses_password_login(&self) -> bool {
        self.tls || self.plaintext_login
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.effective_port())
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("tls", &self.tls)
            .field("verify_certificates", &self.verify_certificates)
            .field("plaintext_login", &self.plaintext_login)
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}
