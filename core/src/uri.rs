/*
 * uri.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Postern, a SASL client and secure connection library.
 *
 * Postern is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Postern is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Postern.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Server URLs: `scheme://[user][;AUTH=mechanism]@host[:port][/path]`.
//!
//! Schemes ending in `s` (imaps, pop3s, smtps, nntps) use implicit TLS. The userinfo part is
//! percent-encoded; `;AUTH=*` means "any mechanism" (RFC 5092, RFC 2384).

use std::fmt;
use std::str::FromStr;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::config::ConfigError;

/// Userinfo in authority: encode @ and other reserved so one @ separates userinfo from host.
const USERINFO: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'@')
    .add(b':')
    .add(b';')
    .add(b'%')
    .add(b'/')
    .add(b'?')
    .add(b'#')
    .add(b'[')
    .add(b']');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Imap,
    Imaps,
    Pop3,
    Pop3s,
    Smtp,
    Smtps,
    Submission,
    Nntp,
    Nntps,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Imap => "imap",
            Scheme::Imaps => "imaps",
            Scheme::Pop3 => "pop3",
            Scheme::Pop3s => "pop3s",
            Scheme::Smtp => "smtp",
            Scheme::Smtps => "smtps",
            Scheme::Submission => "submission",
            Scheme::Nntp => "nntp",
            Scheme::Nntps => "nntps",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "imap" => Some(Scheme::Imap),
            "imaps" => Some(Scheme::Imaps),
            "pop" | "pop3" => Some(Scheme::Pop3),
            "pops" | "pop3s" => Some(Scheme::Pop3s),
            "smtp" => Some(Scheme::Smtp),
            "smtps" => Some(Scheme::Smtps),
            "submission" => Some(Scheme::Submission),
            "nntp" | "news" => Some(Scheme::Nntp),
            "nntps" | "snews" => Some(Scheme::Nntps),
            _ => None,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Imap => 143,
            Scheme::Imaps => 993,
            Scheme::Pop3 => 110,
            Scheme::Pop3s => 995,
            Scheme::Smtp => 25,
            Scheme::Smtps => 465,
            Scheme::Submission => 587,
            Scheme::Nntp => 119,
            Scheme::Nntps => 563,
        }
    }

    /// TLS handshake immediately after connect.
    pub fn implicit_tls(&self) -> bool {
        matches!(self, Scheme::Imaps | Scheme::Pop3s | Scheme::Smtps | Scheme::Nntps)
    }

    /// GSSAPI service name used for DIGEST-MD5 digest-uri.
    pub fn service_name(&self) -> &'static str {
        match self {
            Scheme::Imap | Scheme::Imaps => "imap",
            Scheme::Pop3 | Scheme::Pop3s => "pop",
            Scheme::Smtp | Scheme::Smtps | Scheme::Submission => "smtp",
            Scheme::Nntp | Scheme::Nntps => "nntp",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUri {
    pub scheme: Scheme,
    pub username: Option<String>,
    /// `None` when absent or `*`.
    pub mechanism: Option<String>,
    pub host: String,
    explicit_port: Option<u16>,
}

impl ServerUri {
    pub fn new(scheme: Scheme, host: impl Into<String>) -> Self {
        Self { scheme, username: None, mechanism: None, host: host.into(), explicit_port: None }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.explicit_port = Some(port);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_mechanism(mut self, mechanism: impl Into<String>) -> Self {
        self.mechanism = Some(mechanism.into());
        self
    }

    /// Explicit port, else the scheme default.
    pub fn port(&self) -> u16 {
        self.explicit_port.unwrap_or_else(|| self.scheme.default_port())
    }

    pub fn parse(uri: &str) -> Result<Self, ConfigError> {
        let invalid = |msg: &str| ConfigError::InvalidUri(format!("{}: {}", msg, uri));
        let (scheme, rest) = uri.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let scheme = Scheme::parse(scheme).ok_or_else(|| ConfigError::UnsupportedScheme(scheme.to_string()))?;
        let authority = rest.split(['/', '?', '#']).next().unwrap_or("");

        let (userinfo, hostport) = match authority.rsplit_once('@') {
            Some((u, h)) => (Some(u), h),
            None => (None, authority),
        };

        let (host, port) = if let Some(bracketed) = hostport.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']').ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            let port = match after.strip_prefix(':') {
                Some(p) => Some(p),
                None if after.is_empty() => None,
                None => return Err(invalid("garbage after IPv6 literal")),
            };
            (host, port)
        } else {
            match hostport.rsplit_once(':') {
                Some((h, p)) => (h, Some(p)),
                None => (hostport, None),
            }
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let explicit_port = match port {
            Some(p) => match p.parse::<u16>() {
                Ok(n) if n != 0 => Some(n),
                _ => return Err(ConfigError::InvalidPort(p.to_string())),
            },
            None => None,
        };

        let (username, mechanism) = match userinfo {
            Some(u) => parse_userinfo(u),
            None => (None, None),
        };
        Ok(Self { scheme, username, mechanism, host: host.to_string(), explicit_port })
    }
}

/// `user`, `user;AUTH=mech`, or `;AUTH=mech`. The AUTH keyword is case-insensitive.
fn parse_userinfo(userinfo: &str) -> (Option<String>, Option<String>) {
    let decode = |s: &str| percent_decode_str(s).decode_utf8_lossy().into_owned();
    let lower = userinfo.to_ascii_lowercase();
    let (user, mechanism) = match lower.find(";auth=") {
        Some(i) => {
            let mech = decode(&userinfo[i + 6..]);
            let mech = if mech == "*" || mech.is_empty() { None } else { Some(mech.to_ascii_uppercase()) };
            (&userinfo[..i], mech)
        }
        None => (userinfo, None),
    };
    let user = if user.is_empty() { None } else { Some(decode(user)) };
    (user, mechanism)
}

impl FromStr for ServerUri {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ServerUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if self.username.is_some() || self.mechanism.is_some() {
            if let Some(user) = &self.username {
                write!(f, "{}", utf8_percent_encode(user, USERINFO))?;
            }
            if let Some(mech) = &self.mechanism {
                write!(f, ";AUTH={}", mech)?;
            }
            write!(f, "@")?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            write!(f, "{}", self.host)?;
        }
        if let Some(port) = self.explicit_port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}
