//! # Magnet Links
//!
//! A magnet link carries just enough to join a swarm without a metainfo
//! file:
//!
//! ```text
//! magnet:?xt=urn:btih:<40 hex chars>&dn=<name>&tr=<tracker>
//! ```
//!
//! Only the `xt` exact topic is mandatory; it holds the hex info-hash.
//! `dn` (display name) and `tr` (tracker) are optional.

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum MagnetError {
    #[error("not a magnet link (scheme {0:?})")]
    Scheme(String),
    #[error("could not parse magnet link: {0}")]
    Url(#[from] url::ParseError),
    #[error("magnet link has no urn:btih exact topic")]
    MissingTopic,
    #[error("magnet info hash is not 40 hex characters")]
    InvalidInfoHash,
}

/// Fields of a parsed magnet link.
pub struct Magnet {
    /// 20-byte info-hash decoded from the exact topic
    pub info_hash: [u8; 20],
    /// Display name, if present
    pub name: Option<String>,
    /// Tracker URL, if present
    pub tracker: Option<String>,
}

impl Magnet {
    /// Parse a `magnet:` URI.
    pub fn parse(uri: &str) -> Result<Magnet, MagnetError> {
        let url = Url::parse(uri)?;
        if url.scheme() != "magnet" {
            return Err(MagnetError::Scheme(url.scheme().to_string()));
        }

        let mut topic = None;
        let mut name = None;
        let mut tracker = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => topic = Some(value.into_owned()),
                "dn" => name = Some(value.into_owned()),
                "tr" => tracker = Some(value.into_owned()),
                _ => {}
            }
        }

        let topic = topic.ok_or(MagnetError::MissingTopic)?;
        let digest = topic
            .strip_prefix("urn:btih:")
            .ok_or(MagnetError::MissingTopic)?;
        if digest.len() != 40 {
            return Err(MagnetError::InvalidInfoHash);
        }

        let digest = hex::decode(digest).map_err(|_| MagnetError::InvalidInfoHash)?;
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&digest);

        Ok(Magnet {
            info_hash,
            name,
            tracker,
        })
    }
}
