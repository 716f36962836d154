//! Source-address gate for provider webhook deliveries.
//!
//! The provider signs every payload, so this is a second fence: deliveries from
//! outside the configured networks are refused before the body is read.

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};

use crate::config::{AllowedIps, Config};
use crate::error::AppError;

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

#[derive(Debug, Clone)]
pub struct SourceAllowList {
    allowed: AllowedIps,
    trusted_proxy_depth: usize,
}

impl SourceAllowList {
    pub fn new(allowed: AllowedIps, trusted_proxy_depth: usize) -> Self {
        Self {
            allowed,
            trusted_proxy_depth,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.allowed_ips.clone(), config.trusted_proxy_depth)
    }

    /// An unknown source only passes an open list.
    pub fn permits(&self, source: Option<IpAddr>) -> bool {
        match (&self.allowed, source) {
            (AllowedIps::Any, _) => true,
            (AllowedIps::Cidrs(networks), Some(addr)) => networks.iter().any(|net| net.contains(&addr)),
            (AllowedIps::Cidrs(_), None) => false,
        }
    }

    pub fn source_of(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
        client_ip(headers, peer, self.trusted_proxy_depth)
    }
}

/// The forwarded hop just before our trusted proxies, falling back to the peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trusted_proxy_depth: usize) -> Option<IpAddr> {
    forwarded_client(headers, trusted_proxy_depth).or(peer)
}

fn forwarded_client(headers: &HeaderMap, trusted_proxy_depth: usize) -> Option<IpAddr> {
    let chain = headers.get(FORWARDED_FOR_HEADER)?.to_str().ok()?;
    let hops: Vec<IpAddr> = chain.split(',').filter_map(parse_hop).collect();
    hops.iter().rev().nth(trusted_proxy_depth).copied()
}

// Some proxies append the source port.
fn parse_hop(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

pub async fn enforce_source_allow_list<B>(
    State(allow_list): State<SourceAllowList>,
    req: Request<B>,
    next: Next<B>,
) -> Result<Response, AppError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let source = allow_list.source_of(req.headers(), peer);

    if !allow_list.permits(source) {
        tracing::warn!(
            source = ?source,
            path = %req.uri().path(),
            "webhook delivery refused: source outside allow-list"
        );
        return Err(AppError::Forbidden("source address not allowed".to_string()));
    }

    Ok(next.run(req).await)
}
