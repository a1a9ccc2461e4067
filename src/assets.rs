//! Asset store for listing photos.
//!
//! Files live flat in one directory that is also served under `/uploads`.
//! Link downloads go through [`LinkPolicy`]: http(s) only, optional host
//! allow-list (re-checked on every redirect), a byte cap and a timeout.
//! Without an allow-list only public addresses are fetched: IP literals are
//! checked on the URL, names are filtered after DNS resolution.

use std::{
    io::ErrorKind,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Utc;
use futures::StreamExt;
use reqwest::{
    dns::{Addrs, Name, Resolve, Resolving},
    redirect, Url,
};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::LinkPolicy;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("{0}")]
    Rejected(String),

    #[error("download exceeds {0} bytes")]
    TooLarge(u64),

    #[error("{0}")]
    Fetch(#[from] reqwest::Error),

    #[error("remote answered with status {0}")]
    Status(u16),

    #[error("asset io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct AssetStore {
    dir: PathBuf,
    policy: LinkPolicy,
    client: reqwest::Client,
}

impl AssetStore {
    pub fn new(dir: impl Into<PathBuf>, policy: LinkPolicy) -> Result<Self, AssetError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let redirect_policy = policy.clone();
        let mut builder = reqwest::Client::builder()
            .timeout(policy.timeout)
            .redirect(redirect::Policy::custom(move |attempt| {
                if attempt.previous().len() >= 5 {
                    attempt.error("too many redirects")
                } else if let Err(reason) = check_url(&redirect_policy, attempt.url()) {
                    attempt.error(reason)
                } else {
                    attempt.follow()
                }
            }));
        if policy.public_only() {
            builder = builder.dns_resolver(Arc::new(PublicOnlyResolver));
        }
        let client = builder.build()?;

        Ok(Self { dir, policy, client })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store an uploaded file under a fresh name that keeps the original
    /// extension. Returns the stored name.
    pub async fn save_upload(&self, original_name: &str, bytes: &[u8]) -> Result<String, AssetError> {
        let name = format!("{}.{}", Uuid::new_v4().simple(), extension(original_name));
        fs::write(self.dir.join(&name), bytes).await?;
        debug!(%name, size = bytes.len(), "stored upload");
        Ok(name)
    }

    /// Best-effort removal of stored files, used when a batch upload fails
    /// part way.
    pub async fn discard(&self, names: &[String]) {
        for name in names {
            if let Err(e) = fs::remove_file(self.dir.join(name)).await {
                warn!(%name, error = %e, "failed to discard upload");
            }
        }
    }

    /// Validate `link` against the policy without fetching it.
    pub fn check_link(&self, link: &str) -> Result<Url, AssetError> {
        let url = Url::parse(link.trim())
            .map_err(|e| AssetError::Rejected(format!("invalid link: {e}")))?;
        check_url(&self.policy, &url).map_err(AssetError::Rejected)?;
        Ok(url)
    }

    /// Download `link` into the store as `photo<millis>.jpg`.
    pub async fn download(&self, link: &str) -> Result<String, AssetError> {
        let url = self.check_link(link)?;

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AssetError::Status(response.status().as_u16()));
        }
        if let Some(len) = response.content_length() {
            if len > self.policy.max_bytes {
                return Err(AssetError::TooLarge(self.policy.max_bytes));
            }
        }

        let (name, file) = self.create_photo_file().await?;
        let path = self.dir.join(&name);

        if let Err(e) = self.write_capped(response, file).await {
            if let Err(cleanup) = fs::remove_file(&path).await {
                warn!(%name, error = %cleanup, "failed to remove partial download");
            }
            return Err(e);
        }

        debug!(%name, "stored link download");
        Ok(name)
    }

    async fn create_photo_file(&self) -> Result<(String, fs::File), AssetError> {
        let stamp = Utc::now().timestamp_millis();
        for attempt in 0..100u32 {
            let name = match attempt {
                0 => format!("photo{stamp}.jpg"),
                n => format!("photo{stamp}-{n}.jpg"),
            };
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.dir.join(&name))
                .await
            {
                Ok(file) => return Ok((name, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AssetError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "no free photo name",
        )))
    }

    async fn write_capped(&self, response: reqwest::Response, mut file: fs::File) -> Result<(), AssetError> {
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if written > self.policy.max_bytes {
                return Err(AssetError::TooLarge(self.policy.max_bytes));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

fn check_url(policy: &LinkPolicy, url: &Url) -> Result<(), String> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("scheme {} is not allowed", url.scheme()));
    }
    let host = url
        .host_str()
        .ok_or_else(|| "link has no host".to_string())?
        .to_ascii_lowercase();

    if let Some(allowed) = &policy.allowed_hosts {
        if !allowed.iter().any(|h| h == &host) {
            return Err(format!("host {host} is not allowed"));
        }
    }

    if policy.public_only() {
        if host == "localhost" || host.ends_with(".localhost") {
            return Err(format!("host {host} is not public"));
        }
        if let Ok(ip) = host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
            if !is_public(ip) {
                return Err(format!("address {ip} is not public"));
            }
        }
    }
    Ok(())
}

fn is_public(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => is_public_v4(ip),
        IpAddr::V6(ip) => match ip.to_ipv4_mapped() {
            Some(v4) => is_public_v4(v4),
            None => is_public_v6(ip),
        },
    }
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    !(ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || ip.is_documentation()
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (64..128).contains(&b)))
}

fn is_public_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    !(ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (first & 0xffc0) == 0xfe80)
}

/// DNS resolver for link downloads that drops non-public addresses, so a
/// public-looking name cannot lead the client to an internal host.
struct PublicOnlyResolver;

impl Resolve for PublicOnlyResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        Box::pin(async move {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
                .await?
                .filter(|addr| is_public(addr.ip()))
                .collect();
            if addrs.is_empty() {
                return Err(format!("{host} has no public address").into());
            }
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

/// Last extension of `original`, lower-cased, or `bin` when there is no
/// usable one.
fn extension(original: &str) -> String {
    match original.rsplit_once('.') {
        Some((_, ext))
            if (1..=8).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext.to_ascii_lowercase()
        }
        _ => "bin".to_string(),
    }
}
