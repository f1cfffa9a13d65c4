/*!
 * Access links for relayed objects
 *
 * The primary URL is either pre-signed by the store or built from a public
 * bucket base URL. Streamable videos also get player variants: the direct
 * URL, an Android media intent, a VLC scheme URL and the embeddable web
 * player.
 */

use crate::media::{is_streamable, MediaKind};
use crate::registry::FileId;
use crate::store::{ObjectRef, ObjectStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// How the primary URL is produced; exactly one per deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPolicy {
    /// Store-signed URL valid for `ttl`
    Presigned { ttl: Duration },

    /// Public-read bucket reachable under `base_url`
    Public { base_url: Url },
}

/// Named player-specific URL forms
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerVariant {
    Direct,
    Intent,
    Vlc,
    Web,
}

impl fmt::Display for PlayerVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlayerVariant::Direct => "direct",
            PlayerVariant::Intent => "intent",
            PlayerVariant::Vlc => "vlc",
            PlayerVariant::Web => "web",
        })
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to sign URL for {key}: {source}")]
    Sign {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to build URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("base URL {0} cannot carry path segments")]
    NotABase(String),
}

/// URLs generated for one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSet {
    pub primary_url: String,
    pub player_variants: BTreeMap<PlayerVariant, String>,
    pub is_streamable: bool,
}

/// Everything known about one relayed file. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub file_id: FileId,
    pub file_name: String,
    pub object_key: String,
    pub size: u64,
    pub kind: MediaKind,
    pub primary_url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub player_variants: BTreeMap<PlayerVariant, String>,
    pub is_streamable: bool,
    pub created_at: DateTime<Utc>,
}

impl LinkRecord {
    pub fn new(
        file_id: FileId,
        file_name: impl Into<String>,
        object: &ObjectRef,
        links: LinkSet,
        created_at: DateTime<Utc>,
    ) -> Self {
        let file_name = file_name.into();
        Self {
            kind: MediaKind::from_file_name(&file_name),
            file_id,
            file_name,
            object_key: object.key.clone(),
            size: object.size,
            primary_url: links.primary_url,
            player_variants: links.player_variants,
            is_streamable: links.is_streamable,
            created_at,
        }
    }
}

/// Derives primary and player URLs for uploaded objects
#[derive(Clone)]
pub struct LinkGenerator {
    store: Arc<dyn ObjectStore>,
    policy: AccessPolicy,
    player_base: Url,
}

impl LinkGenerator {
    pub fn new(store: Arc<dyn ObjectStore>, policy: AccessPolicy, player_base: Url) -> Self {
        Self {
            store,
            policy,
            player_base,
        }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub async fn generate(&self, file_name: &str, object: &ObjectRef) -> Result<LinkSet, LinkError> {
        let primary_url = match &self.policy {
            AccessPolicy::Presigned { ttl } => self
                .store
                .sign_url(object, *ttl)
                .await
                .map_err(|source| LinkError::Sign {
                    key: object.key.clone(),
                    source,
                })?,
            AccessPolicy::Public { base_url } => public_url(base_url, &object.key)?,
        };

        let is_streamable = is_streamable(file_name);
        let player_variants = if is_streamable {
            self.player_variants(&primary_url, file_name)?
        } else {
            BTreeMap::new()
        };

        Ok(LinkSet {
            primary_url,
            player_variants,
            is_streamable,
        })
    }

    fn player_variants(
        &self,
        primary_url: &str,
        file_name: &str,
    ) -> Result<BTreeMap<PlayerVariant, String>, LinkError> {
        let encoded: String = url::form_urlencoded::byte_serialize(primary_url.as_bytes()).collect();

        let mut web = self.player_base.clone();
        web.path_segments_mut()
            .map_err(|_| LinkError::NotABase(self.player_base.to_string()))?
            .pop_if_empty()
            .push("player");
        web.query_pairs_mut()
            .append_pair("url", primary_url)
            .append_pair("name", file_name);

        Ok(BTreeMap::from([
            (PlayerVariant::Direct, primary_url.to_string()),
            (
                PlayerVariant::Intent,
                format!("intent:{}#Intent;type=video/*;end", encoded),
            ),
            (PlayerVariant::Vlc, format!("vlc://{}", primary_url)),
            (PlayerVariant::Web, web.to_string()),
        ]))
    }
}

/// `base_url` joined with the percent-encoded object key
fn public_url(base_url: &Url, key: &str) -> Result<String, LinkError> {
    let mut url = base_url.clone();
    url.path_segments_mut()
        .map_err(|_| LinkError::NotABase(base_url.to_string()))?
        .pop_if_empty()
        .push(key);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn object(key: &str) -> ObjectRef {
        ObjectRef {
            key: key.to_string(),
            size: 4,
            content_id: None,
        }
    }

    fn presigned(store: &MemoryStore) -> LinkGenerator {
        LinkGenerator::new(
            Arc::new(store.clone()),
            AccessPolicy::Presigned {
                ttl: Duration::from_secs(604_800),
            },
            Url::parse("http://localhost:8000").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_streamable_gets_all_variants() {
        let store = MemoryStore::new("media");
        store.put_object("movie.MKV", b"data");

        let links = presigned(&store)
            .generate("movie.MKV", &object("movie.MKV"))
            .await
            .unwrap();

        assert!(links.is_streamable);
        assert!(!links.primary_url.is_empty());
        assert_eq!(links.player_variants.len(), 4);
        assert_eq!(links.player_variants[&PlayerVariant::Direct], links.primary_url);
        assert_eq!(
            links.player_variants[&PlayerVariant::Vlc],
            format!("vlc://{}", links.primary_url)
        );

        let intent = &links.player_variants[&PlayerVariant::Intent];
        assert!(intent.starts_with("intent:https%3A%2F%2Fmemory.invalid%2Fmedia%2F"));
        assert!(intent.ends_with("#Intent;type=video/*;end"));

        let web = Url::parse(&links.player_variants[&PlayerVariant::Web]).unwrap();
        assert_eq!(web.path(), "/player");
        let params: BTreeMap<_, _> = web.query_pairs().into_owned().collect();
        assert_eq!(params["url"], links.primary_url);
        assert_eq!(params["name"], "movie.MKV");
    }

    #[tokio::test]
    async fn test_document_gets_primary_only() {
        let store = MemoryStore::new("media");
        store.put_object("doc.pdf", b"data");

        let links = presigned(&store)
            .generate("doc.pdf", &object("doc.pdf"))
            .await
            .unwrap();
        assert!(!links.is_streamable);
        assert!(links.player_variants.is_empty());
        assert!(links.primary_url.contains("X-Expires=604800"));
    }

    #[tokio::test]
    async fn test_public_policy() {
        let store = MemoryStore::new("media");
        let generator = LinkGenerator::new(
            Arc::new(store),
            AccessPolicy::Public {
                base_url: Url::parse("https://cdn.example.com/media/").unwrap(),
            },
            Url::parse("http://localhost:8000/").unwrap(),
        );

        let links = generator
            .generate("my clip.mp4", &object("my clip.mp4"))
            .await
            .unwrap();
        assert_eq!(links.primary_url, "https://cdn.example.com/media/my%20clip.mp4");
        assert!(links.player_variants[&PlayerVariant::Web].starts_with("http://localhost:8000/player?"));
    }

    #[tokio::test]
    async fn test_sign_failure() {
        let store = MemoryStore::new("media");
        store.put_object("a.mp4", b"x");
        store.set_sign_fault(Some(StoreError::Presign("clock skew".to_string())));

        let result = presigned(&store).generate("a.mp4", &object("a.mp4")).await;
        assert!(matches!(result, Err(LinkError::Sign { .. })));
    }

    #[test]
    fn test_record_serializes_variants_by_name() {
        let links = LinkSet {
            primary_url: "https://x/a.mp4".to_string(),
            player_variants: BTreeMap::from([(PlayerVariant::Vlc, "vlc://https://x/a.mp4".to_string())]),
            is_streamable: true,
        };
        let record = LinkRecord::new(
            FileId::from_hex("0123456789abcdef").unwrap(),
            "a.mp4",
            &object("a.mp4"),
            links,
            Utc::now(),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["file_id"], "0123456789abcdef");
        assert_eq!(json["kind"], "video");
        assert_eq!(json["player_variants"]["vlc"], "vlc://https://x/a.mp4");
    }
}
