//! FTP session: control channel, data channel negotiation, and the
//! operation lock

use crate::commands;
use crate::config::{FtpConfig, TlsOptions, TransferMode};
use crate::error::{FtpError, Result};
use crate::features::Features;
use crate::listing::{parse_mdtm, parse_mlst_entry, FileInfo};
use crate::response::{codes, FtpReply};
use crate::stream::Connection;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;
use tracing::{debug, trace, warn};

/// FTP session lifecycle
///
/// The phases between connect and readiness (greeting, FEAT, TLS upgrade,
/// login, binary mode) run to completion inside [`FtpClient::connect`], so
/// only the endpoints are observable.
enum SessionState {
    /// Created; `connect` not yet called
    New,
    /// Connected, negotiated, authenticated, binary mode set
    Ready,
    /// Closed by `close`, a fatal transport error, or an abandoned exchange
    Closed,
}

/// Dangerous certificate verifier that accepts all certificates
///
/// **Security Warning:** disables all certificate validation, making
/// connections vulnerable to man-in-the-middle attacks. Only used when
/// [`TlsOptions::allow_insecure`] is set.
#[derive(Debug)]
struct DangerousAcceptAnyCertificate;

impl ServerCertVerifier for DangerousAcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

/// TLS connector shared by the control channel and every data connection
struct TlsSetup {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl TlsSetup {
    fn new(opts: &TlsOptions, host: &str) -> Result<Self> {
        use tokio_rustls::rustls::crypto::{ring, CryptoProvider};
        let _ = CryptoProvider::install_default(ring::default_provider());

        let tls_config = if opts.allow_insecure {
            warn!("TLS certificate validation disabled - connection vulnerable to MITM attacks");
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(DangerousAcceptAnyCertificate))
                .with_no_client_auth()
        } else {
            let mut root_store = RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            for der in &opts.trusted_certs {
                root_store
                    .add(CertificateDer::from(der.clone()))
                    .map_err(|e| FtpError::Tls(format!("bad trusted certificate: {}", e)))?;
            }
            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        };

        let name = opts.hostname.as_deref().unwrap_or(host);
        let server_name = ServerName::try_from(name)
            .map_err(|e| FtpError::Tls(format!("invalid domain: {}", e)))?
            .to_owned();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(tls_config)),
            server_name,
        })
    }

    async fn handshake(&self, stream: TcpStream) -> Result<TlsStream<TcpStream>> {
        self.connector
            .connect(self.server_name.clone(), stream)
            .await
            .map_err(|e| FtpError::Tls(format!("TLS handshake failed: {}", e)))
    }
}

/// Data-channel endpoint prepared before the transfer verb is sent
enum DataSetup {
    /// Passive mode: socket already connected to the server's port
    Connected(TcpStream),
    /// Active mode: bound listener the server will connect back to
    Listening(TcpListener),
}

/// Outcome of a SIZE query used by the `stat` fallback
enum SizeOutcome {
    Bytes(u64),
    /// 550: the path exists but is not a plain file; carries the reply text
    NotAFile(String),
}

struct Session {
    config: Arc<FtpConfig>,
    state: SessionState,
    /// Control channel; absent before connect and after close
    control: Option<BufReader<Connection>>,
    /// Populated once during connect, immutable afterwards
    features: Features,
    tls: Option<TlsSetup>,
    /// Set before an operation's first wire write, cleared when its
    /// exchanges complete. Found set by a later operation, it means the
    /// previous one was cancelled mid-exchange and the control channel
    /// state is unknowable.
    exchange_in_flight: bool,
}

/// Async FTP client driving one logical session
///
/// Operations are serialized through an internal async mutex: concurrent
/// callers are ordered, and each operation's full command/reply sequence
/// (including the trailing transfer reply) completes before the next begins.
///
/// # Example
///
/// ```no_run
/// use ftp_rs::{FtpClient, FtpConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = FtpConfig::with_login("ftp.example.com", "user", "pass");
/// let client = FtpClient::new(Arc::new(config));
/// client.connect().await?;
///
/// let data = client.download("report.txt").await?;
/// println!("{} bytes", data.len());
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FtpClient {
    session: Arc<Mutex<Session>>,
}

impl FtpClient {
    /// Create a client for the given configuration; no I/O happens until
    /// [`connect`](Self::connect)
    pub fn new(config: Arc<FtpConfig>) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session {
                config,
                state: SessionState::New,
                control: None,
                features: Features::default(),
                tls: None,
                exchange_in_flight: false,
            })),
        }
    }

    /// Connect and drive the session to readiness
    ///
    /// Walks the full setup sequence: TCP connect (TLS handshake first for
    /// implicit mode), greeting, FEAT, AUTH TLS upgrade with PBSZ/PROT for
    /// explicit mode, USER/PASS login, and TYPE I. Must be called exactly
    /// once.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - [`FtpError::AlreadyConnected`] - `connect` was already called
    /// - [`FtpError::Io`] - TCP connection or control I/O failed
    /// - [`FtpError::Tls`] - TLS handshake failed
    /// - [`FtpError::UnexpectedReply`] - a setup exchange got the wrong code
    ///
    /// Any failure closes the session.
    pub async fn connect(&self) -> Result<()> {
        let mut session = self.session.clone().lock_owned().await;
        match session.state {
            SessionState::New => {}
            _ => return Err(FtpError::AlreadyConnected),
        }

        session.exchange_in_flight = true;
        let result = session.establish().await;
        match result {
            Ok(()) => {
                session.exchange_in_flight = false;
                session.state = SessionState::Ready;
                Ok(())
            }
            Err(err) => {
                session.close_session();
                Err(err)
            }
        }
    }

    /// Feature matrix advertised by the server's FEAT reply
    pub async fn features(&self) -> Features {
        self.session.lock().await.features.clone()
    }

    /// Check whether the session has been closed
    pub async fn is_closed(&self) -> bool {
        matches!(self.session.lock().await.state, SessionState::Closed)
    }

    /// Current working directory (PWD)
    pub async fn pwd(&self) -> Result<String> {
        self.with_session(async |session| {
            let reply = session.exchange(&commands::pwd(), codes::DIR_CREATED).await?;
            commands::parse_pwd_path(&reply.message)
        })
        .await
    }

    /// Change working directory (CWD)
    pub async fn chdir(&self, path: &str) -> Result<()> {
        self.with_session(async |session| {
            session.exchange(&commands::cwd(path), codes::ACTION_OK).await?;
            Ok(())
        })
        .await
    }

    /// Change to the parent directory (CDUP)
    pub async fn cdup(&self) -> Result<()> {
        self.with_session(async |session| {
            session.exchange(&commands::cdup(), codes::ACTION_OK).await?;
            Ok(())
        })
        .await
    }

    /// Create a directory (MKD)
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        self.with_session(async |session| {
            session.exchange(&commands::mkd(path), codes::DIR_CREATED).await?;
            Ok(())
        })
        .await
    }

    /// Remove a directory (RMD)
    pub async fn rmdir(&self, path: &str) -> Result<()> {
        self.with_session(async |session| {
            session.exchange(&commands::rmd(path), codes::ACTION_OK).await?;
            Ok(())
        })
        .await
    }

    /// Delete a file (DELE)
    pub async fn rm(&self, path: &str) -> Result<()> {
        self.with_session(async |session| {
            session.exchange(&commands::dele(path), codes::ACTION_OK).await?;
            Ok(())
        })
        .await
    }

    /// Rename a file or directory (RNFR + RNTO)
    ///
    /// Both halves run under one lock acquisition; a failed RNFR leaves
    /// RNTO unsent.
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.with_session(async |session| {
            session
                .exchange(&commands::rnfr(from), codes::NEED_FILE_INFO)
                .await?;
            session.exchange(&commands::rnto(to), codes::ACTION_OK).await?;
            Ok(())
        })
        .await
    }

    /// File size in bytes (SIZE)
    pub async fn size(&self, path: &str) -> Result<u64> {
        self.with_session(async |session| {
            match session.query_size(path).await? {
                SizeOutcome::Bytes(size) => Ok(size),
                SizeOutcome::NotAFile(message) => Err(FtpError::UnexpectedReply {
                    expected: codes::FILE_STATUS,
                    code: codes::FILE_UNKNOWN,
                    message,
                }),
            }
        })
        .await
    }

    /// File modification time (MDTM)
    ///
    /// # Errors
    ///
    /// [`FtpError::FeatureUnsupported`] when the server did not advertise
    /// MDTM.
    pub async fn modified(&self, path: &str) -> Result<DateTime<Utc>> {
        self.with_session(async |session| {
            if !session.features.mdtm {
                return Err(FtpError::FeatureUnsupported("MDTM"));
            }
            session.query_modified(path).await
        })
        .await
    }

    /// File metadata (MLST, with SIZE/MDTM fallback)
    ///
    /// On servers with MLST the entry line of the 250 reply is parsed
    /// directly. Otherwise the metadata is assembled from SIZE - where a
    /// 550 means "not a plain file", reported as a directory - and MDTM
    /// when advertised.
    pub async fn stat(&self, path: &str) -> Result<FileInfo> {
        self.with_session(async |session| {
            if session.features.mlst.is_some() {
                let reply = session.exchange(&commands::mlst(path), codes::ACTION_OK).await?;
                let line = reply.lines().nth(1).ok_or_else(|| {
                    FtpError::Parse(format!("MLST reply without entry: {}", reply.message))
                })?;
                // Entry lines on the control channel carry one leading space
                let (_, info) = parse_mlst_entry(line.strip_prefix(' ').unwrap_or(line))?;
                return Ok(info);
            }

            match session.query_size(path).await? {
                SizeOutcome::NotAFile(_) => Ok(FileInfo {
                    is_file: false,
                    is_directory: true,
                    ..FileInfo::default()
                }),
                SizeOutcome::Bytes(size) => {
                    let mut info = FileInfo {
                        size,
                        ..FileInfo::default()
                    };
                    if session.features.mdtm {
                        info.mtime = Some(session.query_modified(path).await?);
                    }
                    Ok(info)
                }
            }
        })
        .await
    }

    /// Raw directory listing lines (LIST)
    pub async fn list(&self, path: Option<&str>) -> Result<Vec<String>> {
        self.with_session(async |session| {
            let data = session.command_with_data(&commands::list(path)).await?;
            Ok(split_text_lines(&data))
        })
        .await
    }

    /// Machine-readable directory listing (MLSD)
    ///
    /// Returns `(name, metadata)` per entry, in server order.
    pub async fn extended_list(&self, path: Option<&str>) -> Result<Vec<(String, FileInfo)>> {
        self.with_session(async |session| {
            let data = session.command_with_data(&commands::mlsd(path)).await?;
            split_text_lines(&data)
                .iter()
                .map(|line| parse_mlst_entry(line))
                .collect()
        })
        .await
    }

    /// Download a file into memory (RETR)
    pub async fn download(&self, path: &str) -> Result<Vec<u8>> {
        self.with_session(async |session| {
            session.command_with_data(&commands::retr(path)).await
        })
        .await
    }

    /// Upload a file from memory (STOR)
    pub async fn upload(&self, path: &str, data: &[u8]) -> Result<()> {
        self.with_session(async |session| {
            session.command_send_data(&commands::stor(path), data).await
        })
        .await
    }

    /// Start a streaming download (RETR)
    ///
    /// The session lock travels with the returned stream: no other
    /// operation can run until [`DownloadStream::finalize`] is called.
    /// Dropping the stream without finalizing closes the session on the
    /// next operation.
    pub async fn download_stream(&self, path: &str) -> Result<DownloadStream> {
        let mut session = self.lock_ready().await?;
        session.exchange_in_flight = true;
        let result = session.open_transfer(&commands::retr(path)).await;
        match result {
            Ok(data) => Ok(DownloadStream { data, session }),
            Err(err) => session.finish(Err(err)),
        }
    }

    /// Start a streaming upload (STOR, optionally preceded by ALLO)
    ///
    /// `allocate` sends `ALLO n` first; servers answer 200 or, when
    /// preallocation is unnecessary, 202. The session lock travels with the
    /// returned stream until [`UploadStream::finalize`].
    pub async fn upload_stream(&self, path: &str, allocate: Option<u64>) -> Result<UploadStream> {
        let mut session = self.lock_ready().await?;
        session.exchange_in_flight = true;
        let result = async {
            if let Some(size) = allocate {
                let reply = session.roundtrip(&commands::allo(size)).await?;
                if reply.code != codes::OK && reply.code != codes::NOT_NEEDED {
                    return Err(FtpError::UnexpectedReply {
                        expected: codes::OK,
                        code: reply.code,
                        message: reply.message,
                    });
                }
            }
            session.open_transfer(&commands::stor(path)).await
        }
        .await;
        match result {
            Ok(data) => Ok(UploadStream { data, session }),
            Err(err) => session.finish(Err(err)),
        }
    }

    /// Close the session
    ///
    /// Sends a best-effort QUIT when the control channel is still healthy,
    /// then releases the socket. Safe to call in any state; afterwards all
    /// operations fail with [`FtpError::NotConnected`].
    pub async fn close(&self) -> Result<()> {
        let mut session = self.session.clone().lock_owned().await;
        if matches!(session.state, SessionState::Ready) && !session.exchange_in_flight {
            let _ = session.send_command(&commands::quit()).await;
            let _ = session.read_reply().await;
        }
        session.close_session();
        Ok(())
    }

    async fn lock_ready(&self) -> Result<OwnedMutexGuard<Session>> {
        let mut session = self.session.clone().lock_owned().await;
        session.check_ready()?;
        Ok(session)
    }

    /// Run one operation under the session lock
    ///
    /// Acquires the lock, verifies readiness, brackets the exchange with the
    /// in-flight flag, and applies the error policy: transport failures
    /// close the session, protocol failures leave it usable. The lock guard
    /// drops on every exit path.
    async fn with_session<T>(
        &self,
        op: impl AsyncFnOnce(&mut Session) -> Result<T>,
    ) -> Result<T> {
        let mut session = self.lock_ready().await?;
        session.exchange_in_flight = true;
        let result = op(&mut *session).await;
        session.finish(result)
    }
}

impl Session {
    fn check_ready(&mut self) -> Result<()> {
        if self.exchange_in_flight {
            // The previous holder was cancelled mid-exchange; whatever the
            // server thinks the conversation state is, we no longer know it.
            self.close_session();
            return Err(FtpError::ConnectionClosed);
        }
        match self.state {
            SessionState::Ready => Ok(()),
            _ => Err(FtpError::NotConnected),
        }
    }

    fn close_session(&mut self) {
        self.control = None;
        self.state = SessionState::Closed;
        self.exchange_in_flight = false;
    }

    /// Apply the per-operation error policy and clear the in-flight flag
    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Err(FtpError::Io(_)) | Err(FtpError::ConnectionClosed) | Err(FtpError::InvalidReply(_)) => {
                self.close_session();
            }
            _ => self.exchange_in_flight = false,
        }
        result
    }

    /// Connect and walk the setup phases; called with the lock held
    async fn establish(&mut self) -> Result<()> {
        let config = self.config.clone();
        debug!("Connecting to FTP server {}:{}", config.host, config.port);

        let tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;
        // The control channel is a command/reply ping-pong; never batch
        tcp.set_nodelay(true)?;

        if let Some(opts) = &config.tls {
            self.tls = Some(TlsSetup::new(opts, &config.host)?);
        }

        let implicit = config.tls.as_ref().is_some_and(|t| t.implicit);
        let control = match (&self.tls, implicit) {
            (Some(tls), true) => Connection::Tls(Box::new(tls.handshake(tcp).await?)),
            _ => Connection::Plain(tcp),
        };
        self.control = Some(BufReader::new(control));

        let mut greeting = self.read_reply().await?;
        if greeting.code == codes::READY_SOON {
            greeting = self.read_reply().await?;
        }
        expect_code(&greeting, codes::READY)?;
        debug!("Server greeting: {} {}", greeting.code, greeting.message);

        self.send_command(&commands::feat()).await?;
        let reply = self.read_reply().await?;
        self.features = if reply.is_success() {
            Features::parse(&reply.message)
        } else {
            debug!("FEAT refused with {}; assuming no optional features", reply.code);
            Features::default()
        };

        if let Some(opts) = &config.tls {
            if !opts.implicit {
                if !self.features.auth_supports("TLS") && !self.features.prot {
                    warn!(
                        "TLS requested but server advertises neither AUTH TLS nor PROT; \
                         attempting the upgrade anyway"
                    );
                }
                self.send_command(&commands::auth_tls()).await?;
                let reply = self.read_reply().await?;
                expect_code(&reply, codes::AUTH_PROCEED)?;
                self.upgrade_control_tls().await?;
            }
            // RFC 2228: PBSZ must precede PROT; for TLS the size is 0
            self.send_command(&commands::pbsz(0)).await?;
            expect_code(&self.read_reply().await?, codes::OK)?;
            self.send_command(&commands::prot('P')).await?;
            expect_code(&self.read_reply().await?, codes::OK)?;
        }

        debug!("Logging in as {}", config.user);
        self.send_command(&commands::user(&config.user)).await?;
        let reply = self.read_reply().await?;
        match reply.code {
            codes::NEED_PASS => {
                self.send_command(&commands::pass(&config.pass)).await?;
                let reply = self.read_reply().await?;
                expect_code(&reply, codes::LOGGED_IN)?;
            }
            codes::LOGGED_IN => {}
            _ => {
                return Err(FtpError::UnexpectedReply {
                    expected: codes::LOGGED_IN,
                    code: reply.code,
                    message: reply.message,
                });
            }
        }

        self.send_command(&commands::type_image()).await?;
        expect_code(&self.read_reply().await?, codes::OK)?;

        debug!("Session ready");
        Ok(())
    }

    /// Swap the plain control stream for its TLS upgrade after AUTH TLS
    async fn upgrade_control_tls(&mut self) -> Result<()> {
        let control = self.control.take().ok_or(FtpError::NotConnected)?;
        // The server stays silent between its 234 and our handshake, so the
        // read buffer being discarded here is necessarily empty.
        let Connection::Plain(tcp) = control.into_inner() else {
            return Err(FtpError::Tls("control channel already encrypted".to_string()));
        };
        let tls = self
            .tls
            .as_ref()
            .ok_or_else(|| FtpError::Tls("no TLS configuration".to_string()))?;
        let stream = tls.handshake(tcp).await?;
        self.control = Some(BufReader::new(Connection::Tls(Box::new(stream))));
        Ok(())
    }

    /// Write one command line; never partial
    async fn send_command(&mut self, command: &str) -> Result<()> {
        trace!("Sending command: {}", command.trim_end());
        let control = self.control.as_mut().ok_or(FtpError::NotConnected)?;
        control.get_mut().write_all(command.as_bytes()).await?;
        control.get_mut().flush().await?;
        Ok(())
    }

    /// Read exactly one framed reply (RFC 959 Section 4.2)
    ///
    /// Single-line replies end at their CRLF. A `NNN-` opening keeps
    /// reading until a line starting with the same code and a non-dash;
    /// middle lines are arbitrary, including ones that merely resemble a
    /// closing line with a different code.
    async fn read_reply(&mut self) -> Result<FtpReply> {
        let control = self.control.as_mut().ok_or(FtpError::NotConnected)?;

        let first = read_control_line(control).await?;
        let (code, rest) = commands::parse_reply_line(&first)?;
        if !commands::is_multiline_start(&first) {
            return Ok(FtpReply {
                code,
                message: rest.trim_end().to_string(),
            });
        }

        let mut message = rest;
        loop {
            let line = read_control_line(control).await?;
            let done = commands::is_multiline_end(&line, code);
            message.push('\n');
            message.push_str(&line);
            if done {
                break;
            }
        }

        Ok(FtpReply {
            code,
            message: message.trim_end().to_string(),
        })
    }

    /// One command/reply round trip without a code assertion
    async fn roundtrip(&mut self, command: &str) -> Result<FtpReply> {
        self.send_command(command).await?;
        self.read_reply().await
    }

    /// One command/reply round trip asserting the reply code
    async fn exchange(&mut self, command: &str, expected: u16) -> Result<FtpReply> {
        let reply = self.roundtrip(command).await?;
        expect_code(&reply, expected)?;
        Ok(reply)
    }

    async fn query_size(&mut self, path: &str) -> Result<SizeOutcome> {
        let reply = self.roundtrip(&commands::size(path)).await?;
        match reply.code {
            codes::FILE_STATUS => {
                let size = reply.message.trim().parse().map_err(|_| {
                    FtpError::Parse(format!("bad SIZE payload: {}", reply.message))
                })?;
                Ok(SizeOutcome::Bytes(size))
            }
            codes::FILE_UNKNOWN => Ok(SizeOutcome::NotAFile(reply.message)),
            _ => Err(FtpError::UnexpectedReply {
                expected: codes::FILE_STATUS,
                code: reply.code,
                message: reply.message,
            }),
        }
    }

    async fn query_modified(&mut self, path: &str) -> Result<DateTime<Utc>> {
        let reply = self.exchange(&commands::mdtm(path), codes::FILE_STATUS).await?;
        parse_mdtm(reply.message.trim())
    }

    /// Establish the data-channel endpoint for the configured mode
    ///
    /// Precondition: session Ready, lock held. In passive mode the returned
    /// socket is connected; in active mode the listener stays bound and
    /// acceptance waits for [`finalize_data_channel`](Self::finalize_data_channel).
    async fn negotiate_data_channel(&mut self) -> Result<DataSetup> {
        let config = self.config.clone();
        match config.mode {
            TransferMode::Passive => {
                let (host, port): (String, u16) = if self.features.epsv {
                    let reply = self
                        .exchange(&commands::epsv(), codes::EXTENDED_PASSIVE)
                        .await?;
                    (config.host.clone(), commands::parse_epsv(&reply.message)?)
                } else {
                    let reply = self.exchange(&commands::pasv(), codes::PASSIVE).await?;
                    let (addr, port) = commands::parse_pasv(&reply.message)?;
                    (addr.to_string(), port)
                };
                trace!("Passive data connection to {}:{}", host, port);
                let stream = TcpStream::connect((host.as_str(), port)).await?;
                Ok(DataSetup::Connected(stream))
            }
            TransferMode::Active => {
                // PORT cannot carry an IPv6 address; refuse before touching
                // the network
                if !self.features.eprt && config.active_ip.is_ipv6() {
                    return Err(FtpError::FeatureUnsupported("EPRT"));
                }

                // Bind before any command: a failed bind must not leave the
                // server waiting for a connection that cannot come
                let listener =
                    TcpListener::bind((config.active_ip, config.active_port)).await?;
                let port = listener.local_addr()?.port();

                if self.features.eprt {
                    let family = if config.active_ip.is_ipv6() { 2 } else { 1 };
                    self.exchange(&commands::eprt(family, &config.active_ip, port), codes::OK)
                        .await?;
                } else {
                    let IpAddr::V4(addr) = config.active_ip else {
                        return Err(FtpError::FeatureUnsupported("EPRT"));
                    };
                    self.exchange(&commands::port(addr, port), codes::OK).await?;
                }
                trace!("Active data listener on port {}", port);
                Ok(DataSetup::Listening(listener))
            }
        }
    }

    /// Turn the prepared endpoint into a live data connection
    ///
    /// Called after the transfer verb was acknowledged with 150. Accepts
    /// the pending connection in active mode, then wraps in TLS when the
    /// session negotiated PROT P.
    async fn finalize_data_channel(&mut self, setup: DataSetup) -> Result<Connection> {
        let stream = match setup {
            DataSetup::Connected(stream) => stream,
            DataSetup::Listening(listener) => {
                let (stream, peer) = listener.accept().await?;
                trace!("Accepted data connection from {}", peer);
                stream
            }
        };

        match &self.tls {
            Some(tls) => match tls.handshake(stream).await {
                Ok(stream) => Ok(Connection::Tls(Box::new(stream))),
                // The TCP stream died inside the handshake; nothing left to close
                Err(err) => Err(err),
            },
            None => Ok(Connection::Plain(stream)),
        }
    }

    /// Send a transfer verb and hand back the live data connection
    ///
    /// Shared prefix of the buffered and streaming operations: negotiate,
    /// send the verb, require 150, finalize. Failures tear down whatever
    /// endpoint exists before propagating.
    async fn open_transfer(&mut self, command: &str) -> Result<Connection> {
        let setup = self.negotiate_data_channel().await?;

        let started = async {
            let reply = self.roundtrip(command).await?;
            expect_code(&reply, codes::START_TRANSFER)
        }
        .await;
        if let Err(err) = started {
            return Err(err.with_cleanup(teardown_setup(setup).await));
        }

        self.finalize_data_channel(setup).await
    }

    /// Run a data-returning command to completion (LIST, MLSD, RETR)
    ///
    /// Negotiate, send the verb, require 150, finalize, drain the data
    /// socket to EOF, close it, require the trailing 226.
    async fn command_with_data(&mut self, command: &str) -> Result<Vec<u8>> {
        let mut data_conn = self.open_transfer(command).await?;

        let mut data = Vec::new();
        if let Err(err) = data_conn.read_to_end(&mut data).await {
            return Err(FtpError::Io(err).with_cleanup(close_data(data_conn).await));
        }
        drop(data_conn);

        let reply = self.read_reply().await?;
        expect_code(&reply, codes::DATA_CLOSE)?;
        Ok(data)
    }

    /// Run a data-sending command to completion (STOR)
    async fn command_send_data(&mut self, command: &str, data: &[u8]) -> Result<()> {
        let mut data_conn = self.open_transfer(command).await?;

        let written = async {
            data_conn.write_all(data).await?;
            data_conn.shutdown().await
        }
        .await;
        if let Err(err) = written {
            return Err(FtpError::Io(err).with_cleanup(close_data(data_conn).await));
        }
        drop(data_conn);

        let reply = self.read_reply().await?;
        expect_code(&reply, codes::DATA_CLOSE)?;
        Ok(())
    }
}

/// Streaming download handle returned by [`FtpClient::download_stream`]
///
/// Implements [`AsyncRead`] over the data channel. The session lock is held
/// for the handle's whole lifetime; callers must consume the stream and then
/// call [`finalize`](Self::finalize) to read the trailing transfer reply and
/// release the session.
pub struct DownloadStream {
    data: Connection,
    session: OwnedMutexGuard<Session>,
}

impl AsyncRead for DownloadStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().data).poll_read(cx, buf)
    }
}

impl DownloadStream {
    /// Close the data channel, read the trailing 226, release the session
    pub async fn finalize(self) -> Result<()> {
        finalize_stream(self.data, self.session).await
    }
}

/// Streaming upload handle returned by [`FtpClient::upload_stream`]
///
/// Implements [`AsyncWrite`] over the data channel. As with downloads, the
/// session lock is held until [`finalize`](Self::finalize).
pub struct UploadStream {
    data: Connection,
    session: OwnedMutexGuard<Session>,
}

impl AsyncWrite for UploadStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().data).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().data).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().data).poll_shutdown(cx)
    }
}

impl UploadStream {
    /// Close the data channel (signalling EOF to the server), read the
    /// trailing 226, release the session
    pub async fn finalize(self) -> Result<()> {
        finalize_stream(self.data, self.session).await
    }
}

/// Shared tail of both streaming operations
async fn finalize_stream(mut data: Connection, mut session: OwnedMutexGuard<Session>) -> Result<()> {
    let closed = data.shutdown().await;
    drop(data);

    let trailing: Result<()> = async {
        let reply = session.read_reply().await?;
        expect_code(&reply, codes::DATA_CLOSE)
    }
    .await;

    let outcome = match (trailing, closed) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(err)) => Err(FtpError::Io(err)),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => Err(err.with_cleanup(vec![FtpError::Io(close_err)])),
    };
    session.finish(outcome)
}

fn expect_code(reply: &FtpReply, expected: u16) -> Result<()> {
    if reply.code == expected {
        Ok(())
    } else {
        Err(FtpError::UnexpectedReply {
            expected,
            code: reply.code,
            message: reply.message.clone(),
        })
    }
}

/// Read one CRLF-terminated control line, without its terminator
async fn read_control_line(control: &mut BufReader<Connection>) -> Result<String> {
    let mut line_bytes = Vec::new();
    control.read_until(b'\n', &mut line_bytes).await?;

    if line_bytes.is_empty() {
        return Err(FtpError::ConnectionClosed);
    }
    // A line without its newline means the peer closed mid-reply
    if !line_bytes.ends_with(b"\n") {
        return Err(FtpError::ConnectionClosed);
    }

    let line = String::from_utf8_lossy(&line_bytes);
    let line = line.trim_end_matches(['\r', '\n']);
    trace!("Received: {}", line);
    Ok(line.to_string())
}

/// Split listing payload bytes into lines, tolerating LF-only servers
fn split_text_lines(data: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(data)
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect()
}

/// Tear down a not-yet-finalized data endpoint, collecting any errors
async fn teardown_setup(setup: DataSetup) -> Vec<FtpError> {
    match setup {
        DataSetup::Connected(mut stream) => match stream.shutdown().await {
            Ok(()) => Vec::new(),
            Err(err) => vec![FtpError::Io(err)],
        },
        // Dropping the listener unbinds it
        DataSetup::Listening(_) => Vec::new(),
    }
}

/// Close a live data connection, collecting any errors
async fn close_data(mut conn: Connection) -> Vec<FtpError> {
    match conn.shutdown().await {
        Ok(()) => Vec::new(),
        Err(err) => vec![FtpError::Io(err)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_text_lines() {
        assert_eq!(
            split_text_lines(b"a.txt\r\nb.txt\r\n"),
            vec!["a.txt".to_string(), "b.txt".to_string()]
        );
        // LF-only and missing trailing newline both tolerated
        assert_eq!(split_text_lines(b"a\nb"), vec!["a".to_string(), "b".to_string()]);
        assert!(split_text_lines(b"").is_empty());
    }
}
