use std::{fmt, str::FromStr};

use percent_encoding::percent_decode_str;
use url::Url;

use crate::{
    hash::{is_digest_name, HashSpec},
    path::is_plain_segment,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("[PXM300] invalid link '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("[PXM301] unsupported hash algorithm '{0}'")]
    UnknownHashAlgo(String),
    #[error("[PXM302] malformed hash spec '{0}'")]
    InvalidHashSpec(String),
    #[error("[PXM303] link '{0}' has no file name")]
    MissingBasename(String),
    #[error("[PXM304] link file name '{0}' is not a plain file name")]
    UnsafeBasename(String),
    #[error("[PXM305] link '{0}' has an empty egg fragment")]
    EmptyEggFragment(String),
}

/// A download link as published by an upstream index page.
///
/// The fragment may carry either a declared digest (`#sha256=<hex>`) or an
/// egg marker (`#egg=<name>`) for VCS-style links.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    url: Url,
    hash_spec: Option<HashSpec>,
    egg: Option<String>,
}

impl Link {
    /// # Errors
    ///
    /// Fails on unparsable URLs, links whose decoded final path segment is
    /// missing or not a plain file name, empty `#egg=` fragments, and hash
    /// fragments naming an unsupported algorithm.
    pub fn parse(raw: &str) -> Result<Self, LinkError> {
        let url = Url::parse(raw).map_err(|err| LinkError::InvalidUrl {
            url: raw.to_string(),
            reason: err.to_string(),
        })?;
        let mut hash_spec = None;
        let mut egg = None;
        if let Some(fragment) = url.fragment() {
            for part in fragment.split('&') {
                match part.split_once('=') {
                    Some(("egg", "")) => return Err(LinkError::EmptyEggFragment(raw.to_string())),
                    Some(("egg", name)) => egg = Some(name.to_string()),
                    Some((key, _)) if is_digest_name(key) => {
                        hash_spec = Some(part.parse::<HashSpec>()?);
                    }
                    // subdirectory= and other non-digest keys
                    _ => {}
                }
            }
        }
        let link = Self {
            url,
            hash_spec,
            egg,
        };
        let basename = link.basename();
        if basename.is_empty() {
            return Err(LinkError::MissingBasename(raw.to_string()));
        }
        if !is_plain_segment(&basename) {
            return Err(LinkError::UnsafeBasename(basename));
        }
        Ok(link)
    }

    #[must_use]
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// The link with any `#...` fragment removed.
    #[must_use]
    pub fn url_nofrag(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.into()
    }

    /// Percent-decoded final path segment.
    #[must_use]
    pub fn basename(&self) -> String {
        let last = self
            .url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default();
        percent_decode_str(last).decode_utf8_lossy().into_owned()
    }

    /// Host plus the directory segments leading to the basename.
    #[must_use]
    pub fn dir_parts(&self) -> Vec<String> {
        let mut parts = Vec::new();
        if let Some(host) = self.url.host_str() {
            match self.url.port() {
                Some(port) => parts.push(format!("{host}:{port}")),
                None => parts.push(host.to_string()),
            }
        }
        if let Some(segments) = self.url.path_segments() {
            let segments: Vec<&str> = segments.collect();
            if let Some((_, dirs)) = segments.split_last() {
                parts.extend(
                    dirs.iter()
                        .filter(|segment| !segment.is_empty())
                        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned()),
                );
            }
        }
        parts
    }

    #[must_use]
    pub fn hash_spec(&self) -> Option<&HashSpec> {
        self.hash_spec.as_ref()
    }

    #[must_use]
    pub fn eggfragment(&self) -> Option<&str> {
        self.egg.as_deref()
    }

    /// Copy of this link carrying `spec` instead of its current hash.
    #[must_use]
    pub fn with_hash_spec(&self, spec: HashSpec) -> Self {
        let mut url = self.url.clone();
        url.set_fragment(Some(&spec.to_string()));
        Self {
            url,
            hash_spec: Some(spec),
            egg: None,
        }
    }
}

impl FromStr for Link {
    type Err = LinkError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}
