//! SSDP wire format.
//!
//! SSDP frames are HTTP-like text over UDP: a request/status line followed by
//! `Name: value` headers and a blank line. This module parses inbound frames
//! into [`SsdpMessage`] and renders the frames this engine sends.

use std::collections::HashMap;
use std::fmt;

use crate::device::SsdpDevice;

/// NT value identifying a root device announcement.
pub const ROOT_DEVICE_NT: &str = "upnp:rootdevice";

/// Header block of an SSDP frame with case-insensitive lookup.
///
/// Keys are stored lowercased and values trimmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SsdpHeaders(HashMap<String, String>);

impl SsdpHeaders {
    /// Create an empty header block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any previous value.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0
            .insert(name.trim().to_ascii_lowercase(), value.into().trim().to_string());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Look up a header by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the block has no headers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn usn(&self) -> Option<&str> {
        self.get("usn")
    }

    pub fn nt(&self) -> Option<&str> {
        self.get("nt")
    }

    pub fn nts(&self) -> Option<&str> {
        self.get("nts")
    }

    pub fn st(&self) -> Option<&str> {
        self.get("st")
    }

    pub fn location(&self) -> Option<&str> {
        self.get("location")
    }

    pub fn server(&self) -> Option<&str> {
        self.get("server")
    }

    /// `max-age` directive of the CACHE-CONTROL header, if present and numeric.
    pub fn max_age(&self) -> Option<u32> {
        parse_max_age(self.get("cache-control")?)
    }
}

/// A parsed inbound SSDP frame, classified by its leading line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsdpMessage {
    /// `M-SEARCH * HTTP/1.1`
    SearchRequest(SsdpHeaders),
    /// `NOTIFY * HTTP/1.1`, alive or byebye depending on NTS
    Notify(SsdpHeaders),
    /// `HTTP/1.1 200 OK`; the ST header has been copied to NT
    SearchResponse(SsdpHeaders),
}

impl SsdpMessage {
    /// Parse a frame. Returns `None` for empty input or an unknown command line.
    ///
    /// Header lines without a colon are skipped individually; they do not
    /// invalidate the rest of the frame.
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines();
        let command = lines.next()?.trim();

        let mut headers = SsdpHeaders::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if !name.trim().is_empty() {
                    headers.insert(name, value);
                }
            }
        }

        if starts_with_ignore_case(command, "M-SEARCH *") {
            Some(Self::SearchRequest(headers))
        } else if starts_with_ignore_case(command, "NOTIFY *") {
            Some(Self::Notify(headers))
        } else if starts_with_ignore_case(command, "HTTP/1.1 200") {
            if let Some(st) = headers.st().map(str::to_string) {
                headers.insert("nt", st);
            }
            Some(Self::SearchResponse(headers))
        } else {
            None
        }
    }

    /// Headers of the frame regardless of kind.
    pub fn headers(&self) -> &SsdpHeaders {
        match self {
            Self::SearchRequest(h) | Self::Notify(h) | Self::SearchResponse(h) => h,
        }
    }
}

/// NTS values for NOTIFY frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifySubtype {
    Alive,
    ByeBye,
}

impl NotifySubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alive => "ssdp:alive",
            Self::ByeBye => "ssdp:byebye",
        }
    }
}

impl fmt::Display for NotifySubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render an M-SEARCH request addressed to the multicast group.
pub fn search_request(host: &str, search_target: &str, mx: u32, user_agent: &str) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {host}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {mx}\r\n\
         ST: {search_target}\r\n\
         USER-AGENT: {user_agent}\r\n\
         \r\n",
        mx = mx.max(1),
    )
}

/// Render a NOTIFY announcement for a local device.
pub fn notify_message(host: &str, device: &SsdpDevice, nts: NotifySubtype, server: &str) -> String {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
         HOST: {host}\r\n\
         NTS: {nts}\r\n\
         USN: {usn}\r\n\
         NT: {nt}\r\n\
         LOCATION: {location}\r\n\
         SERVER: {server}\r\n\
         CACHE-CONTROL: max-age={max_age}\r\n\
         \r\n",
        usn = device.usn,
        nt = device.nt,
        location = device.location,
        server = device.server.as_deref().unwrap_or(server),
        max_age = device.max_age,
    )
}

/// Render the unicast answer to an M-SEARCH for a local device.
pub fn search_response(device: &SsdpDevice, search_target: &str, server: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         CACHE-CONTROL: max-age={max_age}\r\n\
         EXT:\r\n\
         LOCATION: {location}\r\n\
         SERVER: {server}\r\n\
         ST: {search_target}\r\n\
         USN: {usn}\r\n\
         \r\n",
        max_age = device.max_age,
        location = device.location,
        server = device.server.as_deref().unwrap_or(server),
        usn = device.usn,
    )
}

fn parse_max_age(cache_control: &str) -> Option<u32> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("max-age") {
            value.trim().trim_matches('"').parse().ok()
        } else {
            None
        }
    })
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len()
        && text.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}
