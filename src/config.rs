//! FTP session configuration

use std::net::{IpAddr, Ipv4Addr};

/// How the data channel is established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransferMode {
    /// The server listens and the client connects (PASV / EPSV)
    #[default]
    Passive,
    /// The client listens and the server connects (PORT / EPRT)
    Active,
}

/// TLS settings for a session
///
/// Present on [`FtpConfig::tls`] when the session should be encrypted;
/// absent for plain FTP.
#[must_use]
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TlsOptions {
    /// Hostname for SNI and certificate verification; defaults to the
    /// session host
    pub hostname: Option<String>,

    /// Extra DER-encoded root certificates trusted in addition to the
    /// built-in webpki roots
    pub trusted_certs: Vec<Vec<u8>>,

    /// Implicit TLS: handshake immediately on connect instead of upgrading
    /// via AUTH TLS after the greeting
    #[cfg_attr(feature = "serde", serde(default))]
    pub implicit: bool,

    /// Accept any server certificate
    ///
    /// **Security Warning:** disables all certificate validation, leaving
    /// the connection open to man-in-the-middle attacks. Only for testing
    /// or servers trusted over a secure network.
    #[cfg_attr(feature = "serde", serde(default))]
    pub allow_insecure: bool,
}

impl TlsOptions {
    /// Explicit TLS: connect plain, then upgrade with AUTH TLS
    pub fn explicit() -> Self {
        Self::default()
    }

    /// Implicit TLS: handshake before the first reply
    pub fn implicit() -> Self {
        Self {
            implicit: true,
            ..Self::default()
        }
    }
}

/// FTP server configuration
///
/// # Example
///
/// ```
/// use ftp_rs::{FtpConfig, TlsOptions};
///
/// // Anonymous plain FTP on port 21
/// let config = FtpConfig::new("ftp.example.com");
///
/// // Authenticated with explicit TLS
/// let mut config = FtpConfig::with_login("ftp.example.com", "user", "pass");
/// config.tls = Some(TlsOptions::explicit());
/// ```
#[must_use]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FtpConfig {
    /// Server hostname
    pub host: String,

    /// Control-channel port
    #[cfg_attr(feature = "serde", serde(default = "default_port"))]
    pub port: u16,

    /// Username; anonymous by default
    #[cfg_attr(feature = "serde", serde(default = "default_credential"))]
    pub user: String,

    /// Password; anonymous by default
    #[cfg_attr(feature = "serde", serde(default = "default_credential"))]
    pub pass: String,

    /// Data-channel establishment mode
    #[cfg_attr(feature = "serde", serde(default))]
    pub mode: TransferMode,

    /// Address the active-mode listener binds and advertises
    ///
    /// An IPv6 address here requires the server to support EPRT.
    #[cfg_attr(feature = "serde", serde(default = "default_active_ip"))]
    pub active_ip: IpAddr,

    /// Port the active-mode listener binds
    #[cfg_attr(feature = "serde", serde(default = "default_active_port"))]
    pub active_port: u16,

    /// TLS settings; `None` for a plain session
    #[cfg_attr(feature = "serde", serde(default))]
    pub tls: Option<TlsOptions>,
}

fn default_port() -> u16 {
    21
}

fn default_credential() -> String {
    "anonymous".to_string()
}

fn default_active_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_active_port() -> u16 {
    20
}

impl FtpConfig {
    /// Create an anonymous configuration with defaults for everything but
    /// the host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: default_credential(),
            pass: default_credential(),
            mode: TransferMode::default(),
            active_ip: default_active_ip(),
            active_port: default_active_port(),
            tls: None,
        }
    }

    /// Create a configuration with explicit credentials
    pub fn with_login(
        host: impl Into<String>,
        user: impl Into<String>,
        pass: impl Into<String>,
    ) -> Self {
        let mut config = Self::new(host);
        config.user = user.into();
        config.pass = pass.into();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults() {
        let config = FtpConfig::new("ftp.example.com");
        assert_eq!(config.host, "ftp.example.com");
        assert_eq!(config.port, 21);
        assert_eq!(config.user, "anonymous");
        assert_eq!(config.pass, "anonymous");
        assert_eq!(config.mode, TransferMode::Passive);
        assert_eq!(config.active_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.active_port, 20);
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_with_login() {
        let config = FtpConfig::with_login("ftp.example.com", "user", "secret");
        assert_eq!(config.user, "user");
        assert_eq!(config.pass, "secret");
        assert_eq!(config.port, 21);
    }

    #[test]
    fn test_tls_options_ctors() {
        assert!(!TlsOptions::explicit().implicit);
        assert!(TlsOptions::implicit().implicit);
        assert!(!TlsOptions::explicit().allow_insecure);
        assert!(TlsOptions::explicit().hostname.is_none());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_serde_defaults() {
        let json = r#"{"host":"ftp.example.com"}"#;
        let config: FtpConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.port, 21);
        assert_eq!(config.user, "anonymous");
        assert_eq!(config.mode, TransferMode::Passive);
        assert!(config.tls.is_none());
    }
}
