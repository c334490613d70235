use crate::errors::{AppError, Result};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Component, Path};
use url::{Host, Url};

use super::{MAX_WORKERS, MIN_WORKERS};

const MAX_NAME_LEN: usize = 255;

pub struct InputValidator {
    block_private_hosts: bool,
}

impl InputValidator {
    pub fn new(block_private_hosts: bool) -> Self {
        Self { block_private_hosts }
    }

    /// Accepts absolute http(s) URLs with a host. Internal addresses are
    /// refused unless private hosts were explicitly allowed.
    pub fn validate_url(&self, url: &str) -> Result<Url> {
        if url.trim().is_empty() {
            return Err(AppError::Validation("URL cannot be empty".to_string()));
        }

        let parsed_url = Url::parse(url.trim())
            .map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

        if !matches!(parsed_url.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "Unsupported URL scheme: {}. Only http and https are allowed",
                parsed_url.scheme()
            )));
        }

        let host = parsed_url
            .host()
            .ok_or_else(|| AppError::Validation("URL must have a host".to_string()))?;

        if self.block_private_hosts && is_internal_host(&host) {
            return Err(AppError::Validation(format!(
                "Refusing to fetch from internal address: {}",
                host
            )));
        }

        Ok(parsed_url)
    }

    pub fn validate_workers(&self, workers: usize) -> Result<()> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&workers) {
            return Err(AppError::Validation(format!(
                "workers must be between {} and {}, got {}",
                MIN_WORKERS, MAX_WORKERS, workers
            )));
        }
        Ok(())
    }

    /// A display name doubles as a directory name in server mode, so it must
    /// stay a single path component.
    pub fn validate_name(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(AppError::Validation("Name cannot be empty".to_string()));
        }

        if name.len() > MAX_NAME_LEN {
            return Err(AppError::Validation(format!(
                "Name too long (maximum {} bytes)",
                MAX_NAME_LEN
            )));
        }

        if name.contains('\0') {
            return Err(AppError::Validation("Null bytes not allowed in name".to_string()));
        }

        if name.contains('/') || name.contains('\\') {
            return Err(AppError::Validation("Name must not contain path separators".to_string()));
        }

        let path = Path::new(name);
        if path
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(AppError::Validation("Path traversal detected".to_string()));
        }

        Ok(())
    }
}

fn is_internal_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Host::Ipv4(ip) => is_internal_v4(ip),
        Host::Ipv6(ip) => is_internal_v6(ip),
    }
}

fn is_internal_v4(ip: &Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
}

fn is_internal_v6(ip: &Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_internal_v4(&mapped);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // unique local
        || (first & 0xffc0) == 0xfe80 // link local
}
