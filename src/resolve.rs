//! 外部 ID から正準 ID への解決。
//!
//! IMDB ID を持つ項目はそのまま採用する。TMDB ID しか持たない項目は
//! キャッシュを介して TMDB の external_ids を引く。解決の失敗は項目の
//! 脱落にとどめ、認証エラーだけを致命として伝播する。

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::clients::{ExternalIds, TmdbClient};
use crate::model::{CanonicalId, MediaKind};
use crate::store::identity::{IdentityCache, IdentityLookup};
use crate::util::error::ErrorKind;

pub(crate) struct IdentityResolver {
    cache: Arc<IdentityCache>,
    tmdb: Option<Arc<TmdbClient>>,
}

impl IdentityResolver {
    pub(crate) fn new(cache: Arc<IdentityCache>, tmdb: Option<Arc<TmdbClient>>) -> Self {
        Self { cache, tmdb }
    }

    /// 1 項目の正準 ID を解決する。解決できない項目は `None`。
    pub(crate) async fn resolve(
        &self,
        kind: MediaKind,
        ids: &ExternalIds,
        now: DateTime<Utc>,
    ) -> Result<Option<CanonicalId>> {
        if let Some(imdb) = ids.imdb.as_deref() {
            if let Some(id) = CanonicalId::parse(imdb) {
                return Ok(Some(id));
            }
            debug!(imdb, "discarding malformed imdb id");
        }

        let Some(tmdb_id) = ids.tmdb else {
            return Ok(None);
        };
        let key = format!("tmdb:{}:{tmdb_id}", kind.as_str());
        match self.cache.lookup(&key, now) {
            IdentityLookup::Found(id) => return Ok(Some(id)),
            IdentityLookup::Unresolvable => return Ok(None),
            IdentityLookup::Miss => {}
        }

        let Some(client) = self.tmdb.as_ref() else {
            // TMDB キーなしでは解決できない。項目を落として続行する。
            return Ok(None);
        };
        match client.external_imdb_id(kind, tmdb_id).await {
            Ok(Some(imdb)) => {
                if let Some(id) = CanonicalId::parse(&imdb) {
                    self.cache.store_found(&key, id.clone(), now);
                    Ok(Some(id))
                } else {
                    warn!(imdb, tmdb_id, "tmdb returned an unparseable imdb id");
                    self.cache.store_missing(&key, now);
                    Ok(None)
                }
            }
            Ok(None) => {
                self.cache.store_missing(&key, now);
                Ok(None)
            }
            Err(error) => {
                if error.kind() == ErrorKind::Fatal {
                    return Err(error.into());
                }
                warn!(tmdb_id, error = %error, "identity lookup failed; item skipped this run");
                self.cache.store_error(&key, now);
                Ok(None)
            }
        }
    }
}
