//! Netscape cookie files as a seed for the batch cookie jar.
//!
//! A seed file holds one cookie per line, 7 TAB-separated fields:
//! `domain`, `include_subdomains`, `path`, `secure`, `expires`, `name`,
//! `value`. `#` lines are comments except the `#HttpOnly_` domain prefix
//! written by curl and browser exporters.

use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::cookie::Jar;
use tracing::{debug, info, instrument, warn};
use url::Url;

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// One cookie from a seed file.
///
/// The value is redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct SeedCookie {
    /// Domain, with a leading dot when subdomains match.
    pub domain: String,
    /// Whether subdomains also receive the cookie.
    pub include_subdomains: bool,
    /// Path scope.
    pub path: String,
    /// HTTPS only.
    pub secure: bool,
    /// Marked `#HttpOnly_` in the file.
    pub http_only: bool,
    /// Unix expiry; 0 for a session cookie.
    pub expires: u64,
    /// Cookie name.
    pub name: String,
    value: String,
}

impl SeedCookie {
    /// Returns the cookie value. Never log it.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true when the cookie expired before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        if self.expires == 0 {
            return false;
        }
        UNIX_EPOCH
            .checked_add(Duration::from_secs(self.expires))
            .is_some_and(|expiry| expiry <= now)
    }

    /// `Set-Cookie` form understood by [`Jar::add_cookie_str`].
    fn set_cookie_header(&self) -> String {
        let mut header = format!("{}={}; Path={}", self.name, self.value, self.path);
        if self.include_subdomains {
            header.push_str("; Domain=");
            header.push_str(self.domain.trim_start_matches('.'));
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        if let Some(expiry) = UNIX_EPOCH
            .checked_add(Duration::from_secs(self.expires))
            .filter(|_| self.expires > 0)
        {
            header.push_str("; Expires=");
            header.push_str(&httpdate::fmt_http_date(expiry));
        }
        header
    }

    /// URL the cookie is registered under.
    fn origin_url(&self) -> Option<Url> {
        let scheme = if self.secure { "https" } else { "http" };
        let host = self.domain.trim_start_matches('.');
        Url::parse(&format!("{scheme}://{host}{}", self.path)).ok()
    }
}

impl fmt::Debug for SeedCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeedCookie")
            .field("domain", &self.domain)
            .field("include_subdomains", &self.include_subdomains)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("http_only", &self.http_only)
            .field("expires", &self.expires)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Errors reading a cookie seed file.
#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    /// The file could not be read.
    #[error("failed to read cookie file: {0}")]
    Io(#[from] std::io::Error),

    /// The file has data lines but none of them parsed.
    #[error("no valid cookies found ({malformed} malformed lines)")]
    NoCookiesFound {
        /// Lines that failed to parse.
        malformed: usize,
    },
}

/// Parsed seed file: cookies plus per-line warnings for skipped records.
#[derive(Debug, Default)]
pub struct CookieSeed {
    /// Valid cookies in file order.
    pub cookies: Vec<SeedCookie>,
    /// `(line number, reason)` for each skipped line.
    pub warnings: Vec<(usize, String)>,
}

impl CookieSeed {
    /// Parses a Netscape cookie file.
    ///
    /// Malformed lines are skipped with a warning; a file whose every data
    /// line is malformed is an error.
    ///
    /// # Errors
    ///
    /// Returns [`CookieError::Io`] on read failure and
    /// [`CookieError::NoCookiesFound`] when nothing parsed.
    #[instrument(level = "debug", skip(reader))]
    pub fn parse(reader: impl BufRead) -> Result<Self, CookieError> {
        let mut seed = Self::default();
        let mut data_lines = 0usize;

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end();
            let (record, http_only) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
                Some(rest) => (rest, true),
                None if line.is_empty() || line.starts_with('#') => continue,
                None => (line, false),
            };

            data_lines += 1;
            match parse_record(record, http_only) {
                Ok(cookie) => seed.cookies.push(cookie),
                Err(reason) => {
                    warn!(line = idx + 1, %reason, "skipping malformed cookie line");
                    seed.warnings.push((idx + 1, reason));
                }
            }
        }

        if seed.cookies.is_empty() && data_lines > 0 {
            return Err(CookieError::NoCookiesFound {
                malformed: seed.warnings.len(),
            });
        }
        Ok(seed)
    }

    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    ///
    /// Same as [`parse`](Self::parse).
    pub fn from_file(path: &Path) -> Result<Self, CookieError> {
        let file = std::fs::File::open(path)?;
        Self::parse(std::io::BufReader::new(file))
    }

    /// Adds every unexpired cookie to `jar`; returns how many were added.
    pub fn apply_to(&self, jar: &Jar) -> usize {
        let now = SystemTime::now();
        let mut added = 0;
        for cookie in &self.cookies {
            if cookie.is_expired_at(now) {
                debug!(domain = %cookie.domain, name = %cookie.name, "skipping expired cookie");
                continue;
            }
            let Some(url) = cookie.origin_url() else {
                warn!(domain = %cookie.domain, name = %cookie.name, "skipping cookie with unusable domain");
                continue;
            };
            jar.add_cookie_str(&cookie.set_cookie_header(), &url);
            added += 1;
        }
        added
    }
}

/// Loads a seed file into `jar`.
///
/// # Errors
///
/// Returns a [`CookieError`] if the file cannot be read or holds no valid cookie.
pub fn seed_jar_from_file(path: &Path, jar: &Jar) -> Result<usize, CookieError> {
    let seed = CookieSeed::from_file(path)?;
    let added = seed.apply_to(jar);
    info!(
        path = %path.display(),
        added,
        skipped_lines = seed.warnings.len(),
        "cookie seed loaded"
    );
    Ok(added)
}

fn parse_record(record: &str, http_only: bool) -> Result<SeedCookie, String> {
    let fields: Vec<&str> = record.split('\t').collect();
    let [domain, subdomains, path, secure, expires, name, value] = fields.as_slice() else {
        return Err(format!(
            "expected 7 TAB-separated fields, found {}",
            fields.len()
        ));
    };

    if domain.is_empty() {
        return Err("domain field is empty".to_string());
    }
    if name.is_empty() {
        return Err("cookie name field is empty".to_string());
    }
    let expires = expires
        .parse::<u64>()
        .map_err(|_| format!("expires must be a non-negative integer, got '{expires}'"))?;

    Ok(SeedCookie {
        domain: (*domain).to_string(),
        include_subdomains: parse_flag(subdomains, "include_subdomains")?,
        path: if path.is_empty() { "/" } else { *path }.to_string(),
        secure: parse_flag(secure, "secure")?,
        http_only,
        expires,
        name: (*name).to_string(),
        value: (*value).to_string(),
    })
}

fn parse_flag(value: &str, field: &str) -> Result<bool, String> {
    match value {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        other => Err(format!("{field} must be TRUE or FALSE, got '{other}'")),
    }
}
