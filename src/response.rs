//! FTP reply types and status codes

/// One framed FTP reply: 3-digit code plus message text
///
/// For multi-line replies (RFC 959 Section 4.2) `message` holds every line of
/// the reply joined with `\n`, with the `NNN ` / `NNN-` prefix stripped from
/// the first line. Callers that need structured payloads (PASV addresses,
/// PWD paths, FEAT bodies) route the message through the dedicated parsers
/// instead of picking at the text.
#[derive(Debug, Clone)]
pub struct FtpReply {
    /// 3-digit FTP reply code
    pub code: u16,
    /// Reply text with CRLF framing stripped
    pub message: String,
}

impl FtpReply {
    /// Check if the reply is a positive preliminary (1xx): transfer starting
    pub fn is_preliminary(&self) -> bool {
        self.code >= 100 && self.code < 200
    }

    /// Check if the reply is a positive completion (2xx)
    pub fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// Check if the reply is a positive intermediate (3xx): more input wanted
    pub fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// Check if the reply indicates an error (4xx or 5xx)
    pub fn is_error(&self) -> bool {
        self.code >= 400
    }

    /// Lines of the reply message, in framing order
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.message.split('\n')
    }
}

/// FTP reply codes (RFC 959, RFC 2228, RFC 2428, RFC 3659)
#[allow(dead_code)]
pub mod codes {
    // 1xx - Positive preliminary
    /// Service ready in a moment
    pub const READY_SOON: u16 = 120;
    /// File status okay; about to open data connection
    pub const START_TRANSFER: u16 = 150;

    // 2xx - Positive completion
    /// Command okay
    pub const OK: u16 = 200;
    /// Command superfluous (ALLO on servers that do not need it)
    pub const NOT_NEEDED: u16 = 202;
    /// System status reply (SIZE, MDTM)
    pub const FILE_STATUS: u16 = 213;
    /// System type (RFC 959 Section 4.2 SYST)
    pub const SYSTEM: u16 = 215;
    /// Service ready for new user
    pub const READY: u16 = 220;
    /// Service closing control connection
    pub const GOODBYE: u16 = 221;
    /// Closing data connection; transfer complete
    pub const DATA_CLOSE: u16 = 226;
    /// Entering passive mode (RFC 959)
    pub const PASSIVE: u16 = 227;
    /// Entering extended passive mode (RFC 2428)
    pub const EXTENDED_PASSIVE: u16 = 229;
    /// User logged in
    pub const LOGGED_IN: u16 = 230;
    /// Security exchange accepted (RFC 2228 AUTH)
    pub const AUTH_PROCEED: u16 = 234;
    /// Requested file action okay
    pub const ACTION_OK: u16 = 250;
    /// Pathname created (MKD; also carries the PWD path)
    pub const DIR_CREATED: u16 = 257;

    // 3xx - Positive intermediate
    /// Username okay, need password
    pub const NEED_PASS: u16 = 331;
    /// Requested action pending further information (RNFR)
    pub const NEED_FILE_INFO: u16 = 350;

    // 4xx - Transient errors
    /// Cannot open data connection
    pub const DATA_FAIL: u16 = 425;
    /// File unavailable (busy)
    pub const FILE_BUSY: u16 = 450;

    // 5xx - Permanent errors
    /// File unavailable (not found, no access, not a plain file)
    pub const FILE_UNKNOWN: u16 = 550;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(code: u16) -> FtpReply {
        FtpReply {
            code,
            message: String::new(),
        }
    }

    #[test]
    fn test_is_preliminary() {
        assert!(reply(150).is_preliminary());
        assert!(!reply(150).is_success());
        assert!(!reply(150).is_error());
    }

    #[test]
    fn test_is_success() {
        assert!(reply(226).is_success());
        assert!(!reply(226).is_intermediate());
        assert!(!reply(226).is_error());
    }

    #[test]
    fn test_is_intermediate() {
        assert!(reply(331).is_intermediate());
        assert!(!reply(331).is_success());
        assert!(!reply(331).is_error());
    }

    #[test]
    fn test_is_error() {
        assert!(reply(425).is_error());
        assert!(reply(550).is_error());
        assert!(!reply(550).is_success());
    }

    #[test]
    fn test_boundary_codes() {
        // 199 is preliminary, 200 is not
        assert!(reply(199).is_preliminary());
        assert!(!reply(200).is_preliminary());
        // 299 is success, 300 is not
        assert!(reply(299).is_success());
        assert!(!reply(300).is_success());
        // 399 is intermediate, 400 is an error
        assert!(reply(399).is_intermediate());
        assert!(reply(400).is_error());
    }

    #[test]
    fn test_lines_iterates_framed_lines() {
        let reply = FtpReply {
            code: 211,
            message: "Features:\n MLST type*;size*;\n EPSV\n211 End".to_string(),
        };
        let lines: Vec<&str> = reply.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Features:");
        assert_eq!(lines[2], " EPSV");
    }
}
