//! Mount options and authentication configuration.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::error::{Error, Result};

/// how credentials are acquired for the `-auth` flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthMode {
    Force,
    Full,
    Required,
    Optional,
    None,
    Git,
    Token(String),
}

impl AuthMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "force" => Ok(AuthMode::Force),
            "full" => Ok(AuthMode::Full),
            "required" => Ok(AuthMode::Required),
            "optional" => Ok(AuthMode::Optional),
            "none" => Ok(AuthMode::None),
            "git" => Ok(AuthMode::Git),
            other => match other.strip_prefix("token=") {
                Some(token) => Ok(AuthMode::Token(token.to_string())),
                None => Err(Error::InvalidRef(format!("unrecognized -auth value {other:?}"))),
            },
        }
    }
}

/// `key=value` mount options. Unknown tokens are collected separately so
/// the caller can forward them as FUSE mount options.
#[derive(Clone, Debug, Default)]
pub struct MountOptions {
    pub cache_dir: Option<PathBuf>,
    pub ttl: Option<Duration>,
    pub case_insensitive: bool,
    pub fullrefs: bool,
    pub filter: Option<String>,
    pub unrecognized: Vec<String>,
}

impl MountOptions {
    /// parses a comma-separated `-o key=value,...` token list.
    pub fn parse(tokens: &str) -> Result<Self> {
        let mut opts = MountOptions::default();
        for token in tokens.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = token.split_once('=').unwrap_or((token, ""));
            match key {
                "config.dir" => {
                    opts.cache_dir = if value == ":" { None } else { Some(PathBuf::from(value)) };
                }
                "config.ttl" => {
                    opts.ttl = Some(parse_duration(value)?);
                }
                "config._caseins" => {
                    opts.case_insensitive = value == "1";
                }
                "config._fullrefs" => {
                    opts.fullrefs = value == "1";
                }
                "config._filter" => {
                    opts.filter = Some(value.to_string());
                }
                _ => opts.unrecognized.push(token.to_string()),
            }
        }
        Ok(opts)
    }
}

/// parses a plain integer (seconds) or a `10s`/`5m`/`1h` suffixed duration.
fn parse_duration(s: &str) -> Result<Duration> {
    let bad = || Error::InvalidRef(format!("invalid duration {s:?}"));
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let (digits, unit) = s.split_at(s.len().saturating_sub(1));
    let n: u64 = digits.parse().map_err(|_| bad())?;
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        _ => return Err(bad()),
    };
    Ok(Duration::from_secs(secs))
}

/// abstracts token acquisition so `-auth=git` can be exercised without
/// shelling out in tests.
pub trait CredentialHelper: Send + Sync {
    fn fill(&self, host: &str) -> Result<String>;
}

/// shells out to `git credential fill`, writing a minimal protocol block to
/// stdin and reading the `password=` line back from stdout.
pub struct GitCredentialFill;

impl CredentialHelper for GitCredentialFill {
    fn fill(&self, host: &str) -> Result<String> {
        let mut child = Command::new("git")
            .args(["credential", "fill"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Transport(format!("spawning git credential fill: {e}")))?;

        {
            let stdin = child.stdin.as_mut().expect("piped stdin");
            write!(stdin, "protocol=https\nhost={host}\n\n").map_err(|e| Error::Transport(e.to_string()))?;
        }

        let output = child.wait_with_output().map_err(|e| Error::Transport(e.to_string()))?;
        let text = String::from_utf8_lossy(&output.stdout);
        text.lines()
            .find_map(|line| line.strip_prefix("password="))
            .map(str::to_string)
            .ok_or_else(|| Error::Unauthorized(format!("git credential fill returned no password for {host}")))
    }
}
