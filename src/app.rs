use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{
    batch::{BatchRunner, BatchStores},
    clients::{TmdbClient, TmdbConfig, TraktClient, TraktConfig, TraktTokens},
    config::Config,
    lists::{ListsFile, Provider},
    pipeline::ListPipeline,
    pipeline::fetch::ProviderFetchStage,
    pipeline::persist::OutputPersistStage,
    pipeline::score::EnrichScoreStage,
    pipeline::select::RotationSelectStage,
    resolve::IdentityResolver,
    store::history::StateStore,
    store::identity::{IdentityCache, IdentityTtls},
    store::output::OutputStore,
    store::ratings::RatingCache,
    store::snapshots::SnapshotStore,
    util::retry::RetryConfig,
};

pub struct ComponentRegistry {
    config: Arc<Config>,
    runner: BatchRunner,
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ComponentRegistry {
    /// 設定とリスト定義から全コンポーネントを組み立てる。
    ///
    /// プロバイダのクライアントはリスト定義が実際に参照するものだけを必須と
    /// し、認証情報の不足はこの時点で起動エラーにする。TMDB の API キーが
    /// 設定されていれば、TMDB ソースが無くても ID 解決とレーティング補完の
    /// ためにクライアントを構築する。
    ///
    /// # Errors
    /// リスト定義の読み込み・検証、認証情報の検証、HTTP クライアントの構築
    /// に失敗した場合はエラーを返す。
    pub fn build(config: Config, dry_run: bool) -> Result<Self> {
        let config = Arc::new(config);
        let lists = ListsFile::load(config.lists_path()).with_context(|| {
            format!(
                "failed to load list definitions from {}",
                config.lists_path().display()
            )
        })?;

        let trakt = if lists.uses_provider(Provider::Trakt) {
            let client_id = config.require_trakt_client_id()?.to_string();
            let tokens = match config.trakt_tokens_path() {
                Some(path) => TraktTokens::load(path).with_context(|| {
                    format!("failed to load trakt tokens from {}", path.display())
                })?,
                None => TraktTokens::default(),
            };
            Some(Arc::new(TraktClient::new(&TraktConfig {
                base_url: config.trakt_base_url().to_string(),
                client_id,
                access_token: tokens.access_token,
                connect_timeout: config.http_connect_timeout(),
                total_timeout: config.http_total_timeout(),
                page_limit: config.page_limit(),
            })?))
        } else {
            None
        };

        let tmdb = if lists.uses_provider(Provider::Tmdb) {
            let api_key = config.require_tmdb_api_key()?;
            Some(tmdb_client(&config, api_key)?)
        } else if let Some(api_key) = config.tmdb_api_key() {
            Some(tmdb_client(&config, api_key)?)
        } else {
            None
        };

        let outputs = Arc::new(OutputStore::new(config.outputs_dir()));
        let state = Arc::new(StateStore::new(config.state_dir()));
        let snapshots = Arc::new(SnapshotStore::new(
            config.snapshots_dir(),
            config.snapshot_ttl(),
        ));
        let identity = Arc::new(IdentityCache::new(
            config.state_dir().join("identity.json"),
            IdentityTtls {
                found: config.identity_found_ttl(),
                not_found: config.identity_missing_ttl(),
                error: config.identity_error_ttl(),
            },
        ));
        let ratings = Arc::new(RatingCache::new(
            config.state_dir().join("ratings.json"),
            config.rating_ttl(),
        ));

        let resolver = Arc::new(IdentityResolver::new(Arc::clone(&identity), tmdb.clone()));
        let retry = RetryConfig::new(
            config.http_max_retries(),
            config.http_backoff_base_ms(),
            config.http_backoff_cap_ms(),
        );

        let pipeline = ListPipeline::builder()
            .with_fetch_stage(Arc::new(ProviderFetchStage::new(
                trakt,
                tmdb.clone(),
                resolver,
                snapshots,
                retry,
                config.source_pacing(),
            )))
            .with_score_stage(Arc::new(EnrichScoreStage::new(
                Arc::clone(&state),
                Arc::clone(&ratings),
                tmdb,
                config.rating_lookup_budget(),
            )))
            .with_select_stage(Arc::new(RotationSelectStage))
            .with_persist_stage(Arc::new(OutputPersistStage::new(
                Arc::clone(&outputs),
                Arc::clone(&state),
                dry_run,
            )))
            .with_outputs(outputs)
            .with_state(Arc::clone(&state))
            .with_dry_run(dry_run)
            .build();

        let runner = BatchRunner::new(
            lists,
            pipeline,
            BatchStores {
                state,
                identity,
                ratings,
            },
            config.history_max_entries(),
            config.exposure_max_entries(),
            dry_run,
        );

        Ok(Self { config, runner })
    }

    #[must_use]
    pub fn runner(&self) -> &BatchRunner {
        &self.runner
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }
}

fn tmdb_client(config: &Config, api_key: &str) -> Result<Arc<TmdbClient>> {
    Ok(Arc::new(TmdbClient::new(&TmdbConfig {
        base_url: config.tmdb_base_url().to_string(),
        api_key: api_key.to_string(),
        connect_timeout: config.http_connect_timeout(),
        total_timeout: config.http_total_timeout(),
    })?))
}
