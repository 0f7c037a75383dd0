//! Integration tests for ftp-rs
//!
//! These tests verify the public API works correctly.
//! They do not require an FTP server.

use ftp_rs::{parse_mdtm, parse_mlst_entry, FtpConfig, FtpError, TlsOptions, TransferMode};

#[test]
fn test_config_defaults() {
    let config = FtpConfig::new("ftp.example.com");
    assert_eq!(config.host, "ftp.example.com");
    assert_eq!(config.port, 21);
    assert_eq!(config.user, "anonymous");
    assert_eq!(config.pass, "anonymous");
    assert_eq!(config.mode, TransferMode::Passive);
    assert_eq!(config.active_port, 20);
    assert!(config.tls.is_none());
}

#[test]
fn test_config_with_login() {
    let config = FtpConfig::with_login("ftp.example.com", "user", "secret");
    assert_eq!(config.user, "user");
    assert_eq!(config.pass, "secret");
}

#[test]
fn test_tls_options() {
    let explicit = TlsOptions::explicit();
    assert!(!explicit.implicit);
    assert!(!explicit.allow_insecure);

    let implicit = TlsOptions::implicit();
    assert!(implicit.implicit);
}

#[test]
fn test_error_display() {
    let err = FtpError::NotConnected;
    assert_eq!(err.to_string(), "Session not connected");

    let err = FtpError::FeatureUnsupported("MDTM");
    assert_eq!(err.to_string(), "Server does not support MDTM");

    let err = FtpError::UnexpectedReply {
        expected: 250,
        code: 550,
        message: "No such file".to_string(),
    };
    assert_eq!(err.to_string(), "FTP error 550 (expected 250): No such file");

    let err = FtpError::ConnectionClosed;
    assert_eq!(err.to_string(), "Connection closed");
}

#[test]
fn test_cleanup_error_wraps_source() {
    let primary = FtpError::UnexpectedReply {
        expected: 150,
        code: 425,
        message: "Cannot open data connection".to_string(),
    };
    let wrapped = primary.with_cleanup(vec![FtpError::ConnectionClosed]);
    match wrapped {
        FtpError::Cleanup { source, related } => {
            assert!(matches!(*source, FtpError::UnexpectedReply { code: 425, .. }));
            assert_eq!(related.len(), 1);
        }
        other => panic!("expected Cleanup, got {:?}", other),
    }
}

#[test]
fn test_cleanup_with_no_related_is_identity() {
    let primary = FtpError::ConnectionClosed;
    assert!(matches!(
        primary.with_cleanup(Vec::new()),
        FtpError::ConnectionClosed
    ));
}

#[test]
fn test_public_mlst_parsing() {
    let (name, info) = parse_mlst_entry("type=file;size=42; data.bin").unwrap();
    assert_eq!(name, "data.bin");
    assert_eq!(info.size, 42);
    assert!(info.is_file);
}

#[test]
fn test_public_mdtm_parsing() {
    let t = parse_mdtm("20230515121314").unwrap();
    assert_eq!(ftp_rs::format_mdtm(&t), "20230515121314");
}

#[cfg(feature = "serde")]
#[test]
fn test_config_serde_round_trip() {
    let config = FtpConfig::with_login("ftp.example.com", "user", "pass");

    let json = serde_json::to_string(&config).unwrap();
    assert!(json.contains("ftp.example.com"));
    assert!(json.contains("\"port\":21"));

    let deserialized: FtpConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(deserialized.host, config.host);
    assert_eq!(deserialized.port, config.port);
    assert_eq!(deserialized.user, config.user);
}
