//! Remote sources: fetch a document named by URL into memory.
//!
//! Uploads already arrive as bytes; this stage brings `url` sources to the
//! same shape, a [`DocumentStream`] whose name carries the format hint.
//!
//! A `url` field makes the server issue a request of the client's choosing,
//! so every hop is checked before it is sent. The host must resolve to
//! public addresses only (unless [`DownloadPolicy::allow_private_hosts`] is
//! set) and the connection is pinned to the address that was checked.
//! Redirects are followed by hand, up to [`MAX_REDIRECTS`], with the same
//! check on each target. The body is capped at the upload limit while it
//! streams in.

use crate::converter::DocumentStream;
use crate::error::ParseError;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Filename used when the URL path has no usable last segment.
pub const DEFAULT_DOWNLOAD_NAME: &str = "downloaded.pdf";

/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 5;

/// Limits applied to every `url` download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadPolicy {
    pub timeout_secs: u64,
    /// Largest accepted body in bytes; `None` accepts anything.
    pub max_bytes: Option<usize>,
    /// Permit loopback, private and link-local targets.
    pub allow_private_hosts: bool,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            max_bytes: None,
            allow_private_hosts: false,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Download a URL fully into memory.
pub async fn download(url: &str, policy: &DownloadPolicy) -> Result<DocumentStream, ParseError> {
    let url = url.trim();
    if !is_url(url) {
        return Err(ParseError::InvalidUrl {
            input: url.to_string(),
        });
    }
    let mut current = reqwest::Url::parse(url).map_err(|_| ParseError::InvalidUrl {
        input: url.to_string(),
    })?;

    info!("Downloading document from: {}", url);

    let map_send_err = |e: reqwest::Error| {
        if e.is_timeout() {
            ParseError::DownloadTimeout {
                url: url.to_string(),
                secs: policy.timeout_secs,
            }
        } else {
            ParseError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    for _ in 0..=MAX_REDIRECTS {
        let pinned = check_host(&current, policy.allow_private_hosts).await?;

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(policy.timeout_secs))
            .redirect(reqwest::redirect::Policy::none());
        if let Some((host, addr)) = pinned {
            builder = builder.resolve(&host, addr);
        }
        let client = builder.build().map_err(|e| ParseError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let response = client
            .get(current.clone())
            .send()
            .await
            .map_err(map_send_err)?;

        if response.status().is_redirection() {
            current = redirect_target(&current, &response).ok_or_else(|| {
                ParseError::DownloadFailed {
                    url: url.to_string(),
                    reason: format!("HTTP {} without a usable Location", response.status()),
                }
            })?;
            debug!("Following redirect to {}", current);
            continue;
        }

        if !response.status().is_success() {
            return Err(ParseError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let data = read_limited(response, url, policy.max_bytes, map_send_err).await?;
        let name = filename_from_url(&current);
        debug!("Downloaded {} bytes as '{}'", data.len(), name);

        return Ok(DocumentStream::new(name, data));
    }

    Err(ParseError::DownloadFailed {
        url: url.to_string(),
        reason: format!("more than {} redirects", MAX_REDIRECTS),
    })
}

/// Resolve the host of `url` and refuse non-public targets.
///
/// Returns the host and the checked address to pin the connection to; IP
/// literals and permitted private hosts need no pinning.
async fn check_host(
    url: &reqwest::Url,
    allow_private: bool,
) -> Result<Option<(String, SocketAddr)>, ParseError> {
    let invalid = || ParseError::InvalidUrl {
        input: url.to_string(),
    };
    let host = url.host_str().ok_or_else(invalid)?;
    let port = url.port_or_known_default().ok_or_else(invalid)?;
    let bare = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = bare.parse::<IpAddr>() {
        if !allow_private && !is_public(ip) {
            return Err(forbidden(url, ip));
        }
        return Ok(None);
    }
    if allow_private {
        return Ok(None);
    }

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((bare, port))
        .await
        .map_err(|e| ParseError::DownloadFailed {
            url: url.to_string(),
            reason: format!("cannot resolve '{}': {}", bare, e),
        })?
        .collect();

    if let Some(addr) = addrs.iter().find(|a| !is_public(a.ip())) {
        return Err(forbidden(url, addr.ip()));
    }
    let first = addrs.first().copied().ok_or_else(|| ParseError::DownloadFailed {
        url: url.to_string(),
        reason: format!("'{}' resolved to no addresses", bare),
    })?;

    Ok(Some((bare.to_string(), first)))
}

fn forbidden(url: &reqwest::Url, addr: IpAddr) -> ParseError {
    warn!("Refusing download from non-public address {} ({})", addr, url);
    ParseError::ForbiddenHost {
        url: url.to_string(),
        addr,
    }
}

/// Whether `ip` is a globally routable unicast address.
fn is_public(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_multicast()
                || a == 0
                // 100.64.0.0/10 carrier-grade NAT
                || (a == 100 && (b & 0xC0) == 64))
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_public(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            !(v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                // fc00::/7 unique local
                || (first & 0xFE00) == 0xFC00
                // fe80::/10 link local
                || (first & 0xFFC0) == 0xFE80)
        }
    }
}

fn redirect_target(current: &reqwest::Url, response: &reqwest::Response) -> Option<reqwest::Url> {
    let location = response
        .headers()
        .get(reqwest::header::LOCATION)?
        .to_str()
        .ok()?;
    current.join(location).ok().filter(|u| is_url(u.as_str()))
}

/// Read the response body, aborting once it grows past `limit`.
async fn read_limited(
    mut response: reqwest::Response,
    url: &str,
    limit: Option<usize>,
    map_err: impl Fn(reqwest::Error) -> ParseError,
) -> Result<Vec<u8>, ParseError> {
    let too_large = |limit: usize| ParseError::DownloadTooLarge {
        url: url.to_string(),
        limit,
    };

    if let (Some(limit), Some(declared)) = (limit, response.content_length()) {
        if declared > limit as u64 {
            warn!(declared, limit, "Remote document exceeds size limit, not reading it");
            return Err(too_large(limit));
        }
    }

    let mut data: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(&map_err)? {
        data.extend_from_slice(&chunk);
        if let Some(limit) = limit {
            if data.len() > limit {
                warn!(received = data.len(), limit, "Download size limit exceeded, aborting");
                return Err(too_large(limit));
            }
        }
    }
    Ok(data)
}

/// Take the last path segment when it looks like a filename.
fn filename_from_url(url: &reqwest::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|last| !last.is_empty() && last.contains('.'))
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_DOWNLOAD_NAME.to_string())
}
