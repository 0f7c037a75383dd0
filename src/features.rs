//! FEAT feature matrix parsing and storage (RFC 2389 Section 3)
//!
//! The FEAT reply advertises which optional capabilities a server supports.
//! The matrix is populated once, right after the greeting, and read-only for
//! the rest of the session.

use std::collections::HashMap;

/// One fact name from a FEAT `MLST` line
///
/// A `*` suffix on the wire marks the fact as enabled by default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlstFact {
    /// Fact name as advertised (e.g. `type`, `size`, `modify`)
    pub name: String,
    /// Whether the server emits this fact without an OPTS MLST request
    pub enabled: bool,
}

/// Capabilities advertised by an FTP server in its FEAT reply
///
/// The known tags are a closed set of typed fields; anything else the server
/// advertises lands in [`other`](Features::other) untouched.
#[must_use]
#[derive(Debug, Clone, Default)]
pub struct Features {
    /// MLST facts the server knows, when MLST is advertised
    pub mlst: Option<Vec<MlstFact>>,
    /// MLSD machine-readable directory listings
    pub mlsd: bool,
    /// MDTM modification-time queries
    pub mdtm: bool,
    /// SIZE queries
    pub size: bool,
    /// REST restart arguments (e.g. `STREAM`), when advertised
    pub rest: Option<Vec<String>>,
    /// EPSV extended passive mode
    pub epsv: bool,
    /// EPRT extended active mode
    pub eprt: bool,
    /// PROT data-channel protection level command
    pub prot: bool,
    /// PBSZ protection buffer size command
    pub pbsz: bool,
    /// AUTH mechanism tokens (e.g. `TLS`, `SSL`), when advertised
    pub auth: Option<Vec<String>>,
    /// UTF-8 pathnames
    pub utf8: bool,
    /// Unrecognized feature lines: name (uppercased) to raw argument text
    pub other: HashMap<String, String>,
}

impl Features {
    /// Parse the feature matrix out of a full FEAT reply message
    ///
    /// The message is the framed multi-line text; the opening (`Features:`)
    /// and closing (`End`) lines are discarded and each middle line,
    /// left-trimmed, is one feature token.
    pub fn parse(message: &str) -> Self {
        let lines: Vec<&str> = message.split('\n').collect();
        if lines.len() < 2 {
            return Self::default();
        }
        Self::parse_lines(&lines[1..lines.len() - 1])
    }

    /// Parse feature tokens from the body lines of a FEAT reply
    pub fn parse_lines(lines: &[&str]) -> Self {
        let mut features = Self::default();

        for line in lines {
            let token = line.trim();
            if token.is_empty() {
                continue;
            }

            let (name, args) = match token.split_once(char::is_whitespace) {
                Some((name, rest)) => (name, rest.trim()),
                None => (token, ""),
            };

            match name.to_uppercase().as_str() {
                "MLST" => features.mlst = Some(parse_mlst_facts(args)),
                "MLSD" => features.mlsd = true,
                "MDTM" => features.mdtm = true,
                "SIZE" => features.size = true,
                "REST" => features.rest = Some(split_tokens(args)),
                "EPSV" => features.epsv = true,
                "EPRT" => features.eprt = true,
                "PROT" => features.prot = true,
                "PBSZ" => features.pbsz = true,
                "AUTH" => {
                    // Merge, not replace: servers may send one AUTH line per mechanism
                    let mechanisms = features.auth.get_or_insert_with(Vec::new);
                    mechanisms.extend(split_tokens(args));
                }
                "UTF8" => features.utf8 = true,
                other => {
                    features.other.insert(other.to_string(), args.to_string());
                }
            }
        }

        features
    }

    /// Check whether a specific AUTH mechanism was advertised
    pub fn auth_supports(&self, mechanism: &str) -> bool {
        self.auth
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mechanism))
    }

    /// Names of the advertised MLST facts, ignoring the default-enabled flag
    pub fn mlst_fact_names(&self) -> Vec<&str> {
        self.mlst
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|f| f.name.as_str())
            .collect()
    }
}

/// Split an MLST fact list: `type*;size*;modify*;perm`
fn parse_mlst_facts(args: &str) -> Vec<MlstFact> {
    args.split(';')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|fact| match fact.strip_suffix('*') {
            Some(name) => MlstFact {
                name: name.to_string(),
                enabled: true,
            },
            None => MlstFact {
                name: fact.to_string(),
                enabled: false,
            },
        })
        .collect()
}

/// Split AUTH / REST argument tokens on whitespace and commas
///
/// RFC 2228 is ambiguous about the separator for multiple mechanisms, so
/// both forms are accepted.
fn split_tokens(args: &str) -> Vec<String> {
    args.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}
