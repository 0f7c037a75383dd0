//! FTP command builders and reply parsers

use crate::error::{FtpError, Result};
use std::net::Ipv4Addr;

/// Parse an FTP reply line into code and message
///
/// Accepts both `NNN text` and bare `NNN`; the separator byte (space or `-`)
/// is not validated here, only skipped.
pub fn parse_reply_line(line: &str) -> Result<(u16, String)> {
    // Check minimum length and that first 3 chars are ASCII digits
    let bytes = line.as_bytes();
    if bytes.len() < 3
        || !bytes[0].is_ascii_digit()
        || !bytes[1].is_ascii_digit()
        || !bytes[2].is_ascii_digit()
    {
        return Err(FtpError::InvalidReply(line.chars().take(100).collect()));
    }

    // Safe to slice since we verified ASCII
    let code = line[0..3]
        .parse::<u16>()
        .map_err(|_| FtpError::InvalidReply(line.chars().take(100).collect()))?;

    if !(100..=599).contains(&code) {
        return Err(FtpError::InvalidReply(line.chars().take(100).collect()));
    }

    let message = if line.len() > 4 {
        line[4..].to_string()
    } else {
        String::new()
    };

    Ok((code, message))
}

/// Check whether the first line of a reply opens a multi-line block
///
/// RFC 959 Section 4.2: a reply is multi-line when the code is immediately
/// followed by `-` instead of a space.
pub fn is_multiline_start(line: &str) -> bool {
    line.as_bytes().get(3) == Some(&b'-')
}

/// Check whether a line closes the multi-line reply opened with `code`
///
/// The closing line begins with the same three digits followed by anything
/// other than `-`. Intervening lines that merely start with the digits and
/// a `-` (or with unrelated text) do not terminate the block.
pub fn is_multiline_end(line: &str, code: u16) -> bool {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || !line.starts_with(&format!("{:03}", code)) {
        return false;
    }
    bytes.get(3) != Some(&b'-')
}

/// Parse a PASV reply payload (RFC 959): `(h1,h2,h3,h4,p1,p2)`
///
/// Tolerates arbitrary text around the parenthesized tuple, as servers
/// disagree on the exact phrasing.
pub fn parse_pasv(message: &str) -> Result<(Ipv4Addr, u16)> {
    let start = message
        .find('(')
        .ok_or_else(|| FtpError::Parse(format!("no address in PASV reply: {}", message)))?;
    let end = message[start..]
        .find(')')
        .map(|i| start + i)
        .ok_or_else(|| FtpError::Parse(format!("unterminated PASV reply: {}", message)))?;

    let fields: Vec<&str> = message[start + 1..end].split(',').collect();
    if fields.len() != 6 {
        return Err(FtpError::Parse(format!(
            "PASV reply has {} fields, expected 6",
            fields.len()
        )));
    }

    let mut octets = [0u8; 6];
    for (i, field) in fields.iter().enumerate() {
        octets[i] = field
            .trim()
            .parse::<u8>()
            .map_err(|_| FtpError::Parse(format!("bad PASV octet: {}", field)))?;
    }

    let addr = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
    let port = (u16::from(octets[4]) << 8) | u16::from(octets[5]);
    Ok((addr, port))
}

/// Parse an EPSV reply payload (RFC 2428): `(<d><d><d>port<d>)`
///
/// The delimiter is whatever character opens the tuple, conventionally `|`.
pub fn parse_epsv(message: &str) -> Result<u16> {
    let start = message
        .find('(')
        .ok_or_else(|| FtpError::Parse(format!("no port in EPSV reply: {}", message)))?;
    let end = message[start..]
        .find(')')
        .map(|i| start + i)
        .ok_or_else(|| FtpError::Parse(format!("unterminated EPSV reply: {}", message)))?;

    let inner = &message[start + 1..end];
    let delim = inner
        .chars()
        .next()
        .ok_or_else(|| FtpError::Parse("empty EPSV reply".to_string()))?;

    let fields: Vec<&str> = inner.split(delim).collect();
    // "|||51234|" splits into ["", "", "", "51234", ""]
    if fields.len() != 5 {
        return Err(FtpError::Parse(format!("malformed EPSV reply: {}", inner)));
    }

    fields[3]
        .parse::<u16>()
        .map_err(|_| FtpError::Parse(format!("bad EPSV port: {}", fields[3])))
}

/// Extract the quoted path from a PWD / MKD reply (RFC 959 Section 4.2)
///
/// The path sits between the first double-quote and its matching close;
/// a doubled quote inside represents one literal quote character.
pub fn parse_pwd_path(message: &str) -> Result<String> {
    let start = message
        .find('"')
        .ok_or_else(|| FtpError::Parse(format!("no quoted path in reply: {}", message)))?;

    let mut path = String::new();
    let mut chars = message[start + 1..].chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                path.push('"');
            } else {
                return Ok(path);
            }
        } else {
            path.push(c);
        }
    }

    Err(FtpError::Parse(format!(
        "unterminated quoted path in reply: {}",
        message
    )))
}

/// Build USER command (RFC 959 Section 4.1.1)
pub fn user(name: &str) -> String {
    format!("USER {}\r\n", name)
}

/// Build PASS command (RFC 959 Section 4.1.1)
pub fn pass(password: &str) -> String {
    format!("PASS {}\r\n", password)
}

/// Build FEAT command (RFC 2389 Section 3)
pub fn feat() -> String {
    "FEAT\r\n".to_string()
}

/// Build AUTH TLS command (RFC 2228 / RFC 4217)
pub fn auth_tls() -> String {
    "AUTH TLS\r\n".to_string()
}

/// Build PBSZ command (RFC 2228)
///
/// For TLS the protection buffer size is always zero.
pub fn pbsz(size: u64) -> String {
    format!("PBSZ {}\r\n", size)
}

/// Build PROT command (RFC 2228)
///
/// `P` puts the data channel under the same TLS protection as the control
/// channel; `C` leaves it in the clear.
pub fn prot(level: char) -> String {
    format!("PROT {}\r\n", level)
}

/// Build TYPE command (RFC 959 Section 4.1.2) for binary (image) transfers
pub fn type_image() -> String {
    "TYPE I\r\n".to_string()
}

/// Build PASV command (RFC 959 Section 4.1.2)
pub fn pasv() -> String {
    "PASV\r\n".to_string()
}

/// Build EPSV command (RFC 2428 Section 3)
pub fn epsv() -> String {
    "EPSV\r\n".to_string()
}

/// Build PORT command (RFC 959 Section 4.1.2)
///
/// The address and port travel as six comma-separated decimal octets.
pub fn port(addr: Ipv4Addr, port: u16) -> String {
    let o = addr.octets();
    format!(
        "PORT {},{},{},{},{},{}\r\n",
        o[0],
        o[1],
        o[2],
        o[3],
        port >> 8,
        port & 0xff
    )
}

/// Build EPRT command (RFC 2428 Section 2)
///
/// `family` is 1 for IPv4 and 2 for IPv6.
pub fn eprt(family: u8, addr: &std::net::IpAddr, port: u16) -> String {
    format!("EPRT |{}|{}|{}|\r\n", family, addr, port)
}

/// Build RETR command (RFC 959 Section 4.1.3)
pub fn retr(path: &str) -> String {
    format!("RETR {}\r\n", path)
}

/// Build STOR command (RFC 959 Section 4.1.3)
pub fn stor(path: &str) -> String {
    format!("STOR {}\r\n", path)
}

/// Build ALLO command (RFC 959 Section 4.1.3)
///
/// Reserves space ahead of a STOR. Servers that do not need it answer 202.
pub fn allo(size: u64) -> String {
    format!("ALLO {}\r\n", size)
}

/// Build LIST command (RFC 959 Section 4.1.3)
pub fn list(path: Option<&str>) -> String {
    match path {
        Some(path) => format!("LIST {}\r\n", path),
        None => "LIST\r\n".to_string(),
    }
}

/// Build MLSD command (RFC 3659 Section 7)
pub fn mlsd(path: Option<&str>) -> String {
    match path {
        Some(path) => format!("MLSD {}\r\n", path),
        None => "MLSD\r\n".to_string(),
    }
}

/// Build MLST command (RFC 3659 Section 7)
pub fn mlst(path: &str) -> String {
    format!("MLST {}\r\n", path)
}

/// Build SIZE command (RFC 3659 Section 4)
pub fn size(path: &str) -> String {
    format!("SIZE {}\r\n", path)
}

/// Build MDTM command (RFC 3659 Section 3)
pub fn mdtm(path: &str) -> String {
    format!("MDTM {}\r\n", path)
}

/// Build CWD command (RFC 959 Section 4.1.1)
pub fn cwd(path: &str) -> String {
    format!("CWD {}\r\n", path)
}

/// Build CDUP command (RFC 959 Section 4.1.1)
pub fn cdup() -> String {
    "CDUP\r\n".to_string()
}

/// Build PWD command (RFC 959 Section 4.1.3)
pub fn pwd() -> String {
    "PWD\r\n".to_string()
}

/// Build MKD command (RFC 959 Section 4.1.3)
pub fn mkd(path: &str) -> String {
    format!("MKD {}\r\n", path)
}

/// Build RMD command (RFC 959 Section 4.1.3)
pub fn rmd(path: &str) -> String {
    format!("RMD {}\r\n", path)
}

/// Build DELE command (RFC 959 Section 4.1.3)
pub fn dele(path: &str) -> String {
    format!("DELE {}\r\n", path)
}

/// Build RNFR command (RFC 959 Section 4.1.3)
///
/// First half of a rename; server answers 350 and waits for RNTO.
pub fn rnfr(path: &str) -> String {
    format!("RNFR {}\r\n", path)
}

/// Build RNTO command (RFC 959 Section 4.1.3)
pub fn rnto(path: &str) -> String {
    format!("RNTO {}\r\n", path)
}

/// Build QUIT command (RFC 959 Section 4.1.1)
pub fn quit() -> String {
    "QUIT\r\n".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply_line() {
        let (code, message) = parse_reply_line("220 Welcome").unwrap();
        assert_eq!(code, 220);
        assert_eq!(message, "Welcome");
    }

    #[test]
    fn test_parse_reply_line_bare_code() {
        let (code, message) = parse_reply_line("221").unwrap();
        assert_eq!(code, 221);
        assert_eq!(message, "");
    }

    #[test]
    fn test_parse_reply_line_rejects_garbage() {
        assert!(parse_reply_line("hello").is_err());
        assert!(parse_reply_line("2x0 nope").is_err());
        assert!(parse_reply_line("").is_err());
    }

    #[test]
    fn test_parse_reply_line_rejects_out_of_range_code() {
        // Three digits but outside [100, 599]
        assert!(parse_reply_line("099 too small").is_err());
        assert!(parse_reply_line("600 too large").is_err());
    }

    #[test]
    fn test_multiline_start_detection() {
        assert!(is_multiline_start("211-Features:"));
        assert!(!is_multiline_start("211 End"));
        assert!(!is_multiline_start("211"));
    }

    #[test]
    fn test_multiline_end_detection() {
        assert!(is_multiline_end("211 End", 211));
        assert!(is_multiline_end("211", 211));
        assert!(!is_multiline_end("211-more", 211));
        assert!(!is_multiline_end(" MLST type*;", 211));
        // A different code never closes the block
        assert!(!is_multiline_end("212 End", 211));
    }

    #[test]
    fn test_parse_pasv() {
        let (addr, port) =
            parse_pasv("Entering Passive Mode (192,168,1,5,200,143)").unwrap();
        assert_eq!(addr, Ipv4Addr::new(192, 168, 1, 5));
        assert_eq!(port, (200 << 8) | 143);
    }

    #[test]
    fn test_parse_pasv_bare_tuple() {
        let (addr, port) = parse_pasv("(127,0,0,1,4,1)").unwrap();
        assert_eq!(addr, Ipv4Addr::LOCALHOST);
        assert_eq!(port, 1025);
    }

    #[test]
    fn test_parse_pasv_rejects_bad_input() {
        assert!(parse_pasv("Entering Passive Mode").is_err());
        assert!(parse_pasv("(1,2,3,4,5)").is_err());
        assert!(parse_pasv("(1,2,3,4,5,999)").is_err());
        assert!(parse_pasv("(a,b,c,d,e,f)").is_err());
    }

    #[test]
    fn test_parse_epsv() {
        let port = parse_epsv("Entering Extended Passive Mode (|||51234|)").unwrap();
        assert_eq!(port, 51234);
    }

    #[test]
    fn test_parse_epsv_alternate_delimiter() {
        // RFC 2428 allows any delimiter character
        assert_eq!(parse_epsv("(###2121#)").unwrap(), 2121);
    }

    #[test]
    fn test_parse_epsv_rejects_bad_input() {
        assert!(parse_epsv("no tuple here").is_err());
        assert!(parse_epsv("(|||notaport|)").is_err());
        assert!(parse_epsv("(||51234|)").is_err());
    }

    #[test]
    fn test_parse_pwd_path() {
        let path = parse_pwd_path("\"/home/user\" is the current directory").unwrap();
        assert_eq!(path, "/home/user");
    }

    #[test]
    fn test_parse_pwd_path_doubled_quotes() {
        // RFC 959: a quote inside the path is sent doubled
        let path = parse_pwd_path("\"/odd\"\"name\" created").unwrap();
        assert_eq!(path, "/odd\"name");
    }

    #[test]
    fn test_parse_pwd_path_rejects_unquoted() {
        assert!(parse_pwd_path("/home/user is the current directory").is_err());
        assert!(parse_pwd_path("\"/never/closed").is_err());
    }

    #[test]
    fn test_command_builders_terminate_with_crlf() {
        assert_eq!(user("anonymous"), "USER anonymous\r\n");
        assert_eq!(pass("secret"), "PASS secret\r\n");
        assert_eq!(type_image(), "TYPE I\r\n");
        assert_eq!(retr("a.bin"), "RETR a.bin\r\n");
        assert_eq!(list(None), "LIST\r\n");
        assert_eq!(list(Some("/pub")), "LIST /pub\r\n");
        assert_eq!(mlsd(None), "MLSD\r\n");
        assert_eq!(pbsz(0), "PBSZ 0\r\n");
        assert_eq!(prot('P'), "PROT P\r\n");
    }

    #[test]
    fn test_port_builder_splits_port_bytes() {
        let cmd = port(Ipv4Addr::new(192, 168, 1, 5), 2020);
        assert_eq!(cmd, "PORT 192,168,1,5,7,228\r\n");
    }

    #[test]
    fn test_eprt_builder() {
        let v4: std::net::IpAddr = Ipv4Addr::new(10, 0, 0, 2).into();
        assert_eq!(eprt(1, &v4, 6000), "EPRT |1|10.0.0.2|6000|\r\n");

        let v6: std::net::IpAddr = "::1".parse().unwrap();
        assert_eq!(eprt(2, &v6, 6000), "EPRT |2|::1|6000|\r\n");
    }
}
