#![doc = include_str!("../README.md")]

mod client;
/// FTP command builders and reply parsers
pub mod commands;
mod config;
mod error;
mod features;
/// RFC 3659 machine-readable listings and timestamps
pub mod listing;
mod response;
mod stream;

pub use client::{DownloadStream, FtpClient, UploadStream};
pub use config::{FtpConfig, TlsOptions, TransferMode};
pub use error::{FtpError, Result};
pub use features::{Features, MlstFact};
pub use listing::{format_mdtm, parse_mdtm, parse_mlst_entry, FileInfo};
pub use response::{codes, FtpReply};
