//! RFC 3659 machine-readable listings and timestamps
//!
//! MLST and MLSD entries carry `fact=value;` pairs followed by a single space
//! and the pathname. MDTM replies and the `modify`/`create` facts share the
//! `YYYYMMDDhhmmss[.fff]` timestamp format, always in UTC.

use crate::error::{FtpError, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

/// Parsed metadata for one remote file or directory
///
/// Every field a server can advertise is optional except the entry kind and
/// size, which default to a zero-length plain file. Instances are built
/// per-call and never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    /// Entry is a plain file
    pub is_file: bool,
    /// Entry is a directory (including `cdir`/`pdir` entries)
    pub is_directory: bool,
    /// Entry is a symbolic link
    pub is_symlink: bool,
    /// Size in bytes
    pub size: u64,
    /// Modification time (`modify` fact, MDTM)
    pub mtime: Option<DateTime<Utc>>,
    /// Inode change time; no MLST fact carries this
    pub ctime: Option<DateTime<Utc>>,
    /// Access time; no MLST fact carries this
    pub atime: Option<DateTime<Utc>>,
    /// Creation time (`create` fact)
    pub birthtime: Option<DateTime<Utc>>,
    /// POSIX permission bits (`UNIX.mode` fact, octal on the wire)
    pub mode: Option<u32>,
    /// Owner uid (`UNIX.uid` fact)
    pub uid: Option<u32>,
    /// Owner gid (`UNIX.gid` fact)
    pub gid: Option<u32>,
    /// Raw `type` fact as advertised
    pub ftp_type: Option<String>,
    /// `perm` fact: the server's permission letters
    pub ftp_perms: Option<String>,
    /// `charset` fact
    pub charset: Option<String>,
    /// `lang` fact
    pub lang: Option<String>,
    /// `media-type` fact
    pub media_type: Option<String>,
}

impl Default for FileInfo {
    fn default() -> Self {
        Self {
            is_file: true,
            is_directory: false,
            is_symlink: false,
            size: 0,
            mtime: None,
            ctime: None,
            atime: None,
            birthtime: None,
            mode: None,
            uid: None,
            gid: None,
            ftp_type: None,
            ftp_perms: None,
            charset: None,
            lang: None,
            media_type: None,
        }
    }
}

/// Parse an MDTM-style timestamp: `YYYYMMDDhhmmss[.fff]`, UTC
///
/// Some servers insert a `T` between the date and time digits; both forms
/// are accepted. The fractional part is a decimal fraction of a second of
/// any length.
pub fn parse_mdtm(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (value, None),
    };

    let digits: String = if whole.len() == 15 && whole.as_bytes()[8] == b'T' {
        format!("{}{}", &whole[..8], &whole[9..])
    } else {
        whole.to_string()
    };

    if digits.len() != 14 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FtpError::Parse(format!("bad timestamp: {}", value)));
    }

    // Safe to parse since every byte was verified as an ASCII digit.
    // Wire format is 1-based month and day.
    let year: i32 = digits[0..4].parse().unwrap();
    let month: u32 = digits[4..6].parse().unwrap();
    let day: u32 = digits[6..8].parse().unwrap();
    let hour: u32 = digits[8..10].parse().unwrap();
    let minute: u32 = digits[10..12].parse().unwrap();
    let second: u32 = digits[12..14].parse().unwrap();

    let nanos = match fraction {
        Some(fraction) => parse_second_fraction(fraction)
            .ok_or_else(|| FtpError::Parse(format!("bad timestamp fraction: {}", value)))?,
        None => 0,
    };

    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| FtpError::Parse(format!("impossible date: {}", value)))?;
    let time = NaiveTime::from_hms_nano_opt(hour, minute, second, nanos)
        .ok_or_else(|| FtpError::Parse(format!("impossible time: {}", value)))?;

    Ok(Utc.from_utc_datetime(&date.and_time(time)))
}

/// Render a timestamp in the MDTM wire format
///
/// Subsecond precision is emitted as milliseconds only when nonzero, so
/// whole-second timestamps survive a format/parse round trip byte-for-byte.
pub fn format_mdtm(when: &DateTime<Utc>) -> String {
    let base = when.format("%Y%m%d%H%M%S").to_string();
    let millis = when.timestamp_subsec_millis();
    if millis == 0 {
        base
    } else {
        format!("{}.{:03}", base, millis)
    }
}

/// Interpret a fraction string as nanoseconds past the second
fn parse_second_fraction(fraction: &str) -> Option<u32> {
    if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut nanos: u64 = 0;
    for i in 0..9 {
        let digit = fraction.as_bytes().get(i).map_or(0, |b| u64::from(b - b'0'));
        nanos = nanos * 10 + digit;
    }
    Some(nanos as u32)
}

/// Parse one MLST / MLSD entry line into its pathname and metadata
///
/// Wire format: `fact1=val1;fact2=val2;... filename`. The single space after
/// the fact list is mandatory (RFC 3659 Section 7.2) even when there are no
/// facts; it is stripped from the returned name.
pub fn parse_mlst_entry(line: &str) -> Result<(String, FileInfo)> {
    let (facts, name) = line
        .split_once(' ')
        .ok_or_else(|| FtpError::Parse(format!("entry without pathname: {}", line)))?;

    if name.is_empty() {
        return Err(FtpError::Parse(format!("entry without pathname: {}", line)));
    }

    let mut info = FileInfo::default();

    for fact in facts.split(';').filter(|f| !f.is_empty()) {
        let (key, value) = fact
            .split_once('=')
            .ok_or_else(|| FtpError::Parse(format!("bad fact: {}", fact)))?;

        match key.to_ascii_lowercase().as_str() {
            "type" => {
                info.ftp_type = Some(value.to_string());
                apply_type_fact(&mut info, value);
            }
            "size" => {
                info.size = value
                    .parse()
                    .map_err(|_| FtpError::Parse(format!("bad size fact: {}", value)))?;
            }
            "modify" => info.mtime = Some(parse_mdtm(value)?),
            "create" => info.birthtime = Some(parse_mdtm(value)?),
            "perm" => info.ftp_perms = Some(value.to_string()),
            "lang" => info.lang = Some(value.to_string()),
            "media-type" => info.media_type = Some(value.to_string()),
            "charset" => info.charset = Some(value.to_string()),
            "unix.mode" => {
                info.mode = Some(u32::from_str_radix(value, 8).map_err(|_| {
                    FtpError::Parse(format!("bad UNIX.mode fact: {}", value))
                })?);
            }
            "unix.uid" => {
                info.uid = Some(value.parse().map_err(|_| {
                    FtpError::Parse(format!("bad UNIX.uid fact: {}", value))
                })?);
            }
            "unix.gid" => {
                info.gid = Some(value.parse().map_err(|_| {
                    FtpError::Parse(format!("bad UNIX.gid fact: {}", value))
                })?);
            }
            // Facts outside the recognized set are dropped
            _ => {}
        }
    }

    Ok((name.to_string(), info))
}

/// Map a `type` fact value onto the entry-kind booleans
fn apply_type_fact(info: &mut FileInfo, value: &str) {
    let value = value.to_ascii_lowercase();
    match value.as_str() {
        "file" => {
            info.is_file = true;
            info.is_directory = false;
            info.is_symlink = false;
        }
        // cdir/pdir are the current and parent directory entries
        "dir" | "cdir" | "pdir" => {
            info.is_file = false;
            info.is_directory = true;
            info.is_symlink = false;
        }
        _ if value == "os.unix:symlink" || value.starts_with("os.unix:slink") => {
            info.is_file = false;
            info.is_directory = false;
            info.is_symlink = true;
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_mdtm_whole_seconds() {
        let t = parse_mdtm("20230515121314").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2023, 5, 15, 12, 13, 14).unwrap());
    }

    #[test]
    fn test_parse_mdtm_fractional_seconds() {
        let t = parse_mdtm("20230515121314.500").unwrap();
        assert_eq!(t.nanosecond(), 500_000_000);
    }

    #[test]
    fn test_parse_mdtm_short_fraction() {
        // ".5" means half a second, not 5 nanoseconds
        let t = parse_mdtm("20230515121314.5").unwrap();
        assert_eq!(t.nanosecond(), 500_000_000);
    }

    #[test]
    fn test_parse_mdtm_t_separator() {
        let t = parse_mdtm("20230515T121314").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2023, 5, 15, 12, 13, 14).unwrap());
    }

    #[test]
    fn test_parse_mdtm_rejects_garbage() {
        assert!(parse_mdtm("not-a-date").is_err());
        assert!(parse_mdtm("2023051512131").is_err());
        assert!(parse_mdtm("20231315121314").is_err());
        assert!(parse_mdtm("20230515121314.").is_err());
        assert!(parse_mdtm("20230515121314.12a").is_err());
    }

    #[test]
    fn test_mdtm_round_trip_whole_seconds() {
        let t = Utc.with_ymd_and_hms(1999, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(parse_mdtm(&format_mdtm(&t)).unwrap(), t);
        assert_eq!(format_mdtm(&t), "19991231235959");
    }

    #[test]
    fn test_mdtm_round_trip_milliseconds() {
        let t = Utc
            .with_ymd_and_hms(2023, 5, 15, 12, 13, 14)
            .unwrap()
            .with_nanosecond(250_000_000)
            .unwrap();
        assert_eq!(format_mdtm(&t), "20230515121314.250");
        assert_eq!(parse_mdtm(&format_mdtm(&t)).unwrap(), t);
    }

    #[test]
    fn test_parse_mlst_file_entry() {
        let (name, info) =
            parse_mlst_entry("type=file;size=42;modify=20230515T121314.500; report.txt").unwrap();

        assert_eq!(name, "report.txt");
        assert!(info.is_file);
        assert!(!info.is_directory);
        assert_eq!(info.size, 42);
        let mtime = info.mtime.unwrap();
        assert_eq!(
            mtime.date_naive(),
            NaiveDate::from_ymd_opt(2023, 5, 15).unwrap()
        );
        assert_eq!(mtime.nanosecond(), 500_000_000);
    }

    #[test]
    fn test_parse_mlst_directory_entry() {
        let (name, info) = parse_mlst_entry("type=dir;modify=20230101000000; pub").unwrap();
        assert_eq!(name, "pub");
        assert!(info.is_directory);
        assert!(!info.is_file);
    }

    #[test]
    fn test_parse_mlst_cdir_and_pdir_are_directories() {
        let (name, info) = parse_mlst_entry("type=cdir; .").unwrap();
        assert_eq!(name, ".");
        assert!(info.is_directory);

        let (name, info) = parse_mlst_entry("type=pdir; ..").unwrap();
        assert_eq!(name, "..");
        assert!(info.is_directory);
        assert!(!info.is_file);
    }

    #[test]
    fn test_parse_mlst_symlink_entry() {
        let (_, info) = parse_mlst_entry("type=OS.unix:symlink; link").unwrap();
        assert!(info.is_symlink);
        assert!(!info.is_file);

        let (_, info) = parse_mlst_entry("type=OS.unix:slink:/target; link").unwrap();
        assert!(info.is_symlink);
    }

    #[test]
    fn test_parse_mlst_unix_facts() {
        let (_, info) =
            parse_mlst_entry("type=file;UNIX.mode=0644;UNIX.uid=1000;UNIX.gid=100; f").unwrap();
        assert_eq!(info.mode, Some(0o644));
        assert_eq!(info.uid, Some(1000));
        assert_eq!(info.gid, Some(100));
    }

    #[test]
    fn test_parse_mlst_string_facts() {
        let (_, info) = parse_mlst_entry(
            "type=file;perm=adfrw;lang=en;media-type=text/plain;charset=UTF-8; f.txt",
        )
        .unwrap();
        assert_eq!(info.ftp_perms.as_deref(), Some("adfrw"));
        assert_eq!(info.lang.as_deref(), Some("en"));
        assert_eq!(info.media_type.as_deref(), Some("text/plain"));
        assert_eq!(info.charset.as_deref(), Some("UTF-8"));
        assert_eq!(info.ftp_type.as_deref(), Some("file"));
    }

    #[test]
    fn test_parse_mlst_zero_facts() {
        // Just the mandatory space and a name
        let (name, info) = parse_mlst_entry(" report.txt").unwrap();
        assert_eq!(name, "report.txt");
        assert_eq!(info, FileInfo::default());
    }

    #[test]
    fn test_parse_mlst_name_with_spaces() {
        // Only the first space separates facts from the pathname
        let (name, _) = parse_mlst_entry("type=file; my file.txt").unwrap();
        assert_eq!(name, "my file.txt");
    }

    #[test]
    fn test_parse_mlst_unknown_facts_ignored() {
        let (_, info) = parse_mlst_entry("type=file;x.custom=1;size=7; f").unwrap();
        assert!(info.is_file);
        assert_eq!(info.size, 7);
    }

    #[test]
    fn test_parse_mlst_rejects_missing_name() {
        assert!(parse_mlst_entry("type=file;size=42;").is_err());
        assert!(parse_mlst_entry("type=file; ").is_err());
    }

    #[test]
    fn test_parse_mlst_rejects_bad_facts() {
        assert!(parse_mlst_entry("type; f").is_err());
        assert!(parse_mlst_entry("size=big; f").is_err());
        assert!(parse_mlst_entry("modify=junk; f").is_err());
    }

    #[test]
    fn test_case_insensitive_fact_names() {
        let (_, info) = parse_mlst_entry("Type=DIR;Size=9; d").unwrap();
        assert!(info.is_directory);
        assert_eq!(info.size, 9);
    }
}
