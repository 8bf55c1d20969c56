// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource paths.
//!
//! A [`ResourcePath`] is the location of a REST or WebSocket resource on the
//! server: an ordered list of path segments and a set of query parameters.
//! Values are immutable; every builder method returns a new path.
//!
//! ```
//! use lxd_client::ResourcePath;
//!
//! let path = ResourcePath::api().join("instances").join("wow");
//! assert_eq!(path.to_string(), "/1.0/instances/wow");
//!
//! let parsed: ResourcePath = "/1.0/operations/abc?project=default".parse().unwrap();
//! assert_eq!(parsed.query_value("project"), Some("default"));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use url::Url;

use crate::error::{LxdError, Result};

/// API version prefix every LXD resource lives under.
pub const API_VERSION: &str = "1.0";

/// Characters escaped inside a single path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Base used to resolve absolute-path locators.
const LOCATOR_BASE: &str = "https://lxd.invalid";

/// Location of a REST/WS resource: path segments plus query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    segments: Vec<String>,
    query: BTreeMap<String, String>,
}

impl ResourcePath {
    /// The empty path. Renders as `""`.
    pub fn root() -> Self {
        Self::default()
    }

    /// The API root, `/1.0`.
    pub fn api() -> Self {
        Self::root().join(API_VERSION)
    }

    /// Append one segment. The segment is escaped on render, so it may contain `/`.
    pub fn join(&self, segment: impl Into<String>) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend(self.segments.iter().cloned());
        segments.push(segment.into());
        Self {
            segments,
            query: self.query.clone(),
        }
    }

    /// Set a query parameter, replacing any previous value for `key`.
    pub fn with_query(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut query = self.query.clone();
        query.insert(key.into(), value.into());
        Self {
            segments: self.segments.clone(),
            query,
        }
    }

    /// Remove a query parameter.
    pub fn without_query(&self, key: &str) -> Self {
        let mut query = self.query.clone();
        query.remove(key);
        Self {
            segments: self.segments.clone(),
            query,
        }
    }

    /// Scope the request to an LXD project.
    pub fn with_project(&self, project: impl Into<String>) -> Self {
        self.with_query("project", project)
    }

    /// Attach a websocket secret.
    pub fn with_secret(&self, secret: impl Into<String>) -> Self {
        self.with_query("secret", secret)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// Last segment, typically the resource name.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Canonical string form, `/seg1/seg2?k=v&...` with keys in lexicographic order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            match segment.as_str() {
                "." => out.push_str("%2E"),
                ".." => out.push_str("%2E%2E"),
                _ => out.extend(utf8_percent_encode(segment, SEGMENT)),
            }
        }
        if !self.query.is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.query.iter())
                .finish();
            out.push('?');
            out.push_str(&query);
        }
        out
    }

    /// Parse a locator returned by the server.
    ///
    /// Accepts absolute paths (`/1.0/operations/x`), a bare query (`?k=v`, the
    /// rendering of an empty path) and absolute URLs; the scheme and host of a
    /// URL are discarded.
    pub fn parse(raw: &str) -> Result<Self> {
        let malformed = || LxdError::MalformedLocator(raw.to_string());

        let relative = if raw.starts_with('/') || raw.starts_with('?') {
            raw
        } else {
            let url = Url::parse(raw).map_err(|_| malformed())?;
            if url.cannot_be_a_base() {
                return Err(malformed());
            }
            // Keep the locator's own path text; `Url` resolves dot segments.
            let after_scheme = raw
                .split_once("://")
                .map(|(_, rest)| rest)
                .ok_or_else(malformed)?;
            after_scheme
                .find(['/', '?', '#'])
                .map_or("", |start| &after_scheme[start..])
        };

        let relative = relative.split_once('#').map_or(relative, |(head, _)| head);
        let (path, query) = relative.split_once('?').unwrap_or((relative, ""));

        let segments = match path {
            "" | "/" => Vec::new(),
            _ => path
                .strip_prefix('/')
                .ok_or_else(malformed)?
                .split('/')
                .map(|segment| {
                    percent_decode_str(segment)
                        .decode_utf8()
                        .map(|s| s.into_owned())
                        .map_err(|_| malformed())
                })
                .collect::<Result<Vec<_>>>()?,
        };

        let query = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();

        Ok(Self { segments, query })
    }

    /// Whether a segment is `.` or `..`, which URL normalisation would
    /// resolve away on the wire.
    pub(crate) fn has_dot_segment(&self) -> bool {
        self.segments.iter().any(|s| s == "." || s == "..")
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl FromStr for ResourcePath {
    type Err = LxdError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
