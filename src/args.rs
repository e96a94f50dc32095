use std::{net::SocketAddr, sync::Arc};

use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use tracing::{info_span, Instrument};

use crate::{
    api,
    authn::Authenticator,
    cache::{AccessCacheMetrics, SyncConfig, SyncTrigger, SynchronizedAccessCache},
    index,
    k8s::{self, rbac},
};

#[derive(Debug, Parser)]
#[clap(
    name = "tenant-lister",
    about = "Serves the tenant namespaces an authenticated identity may read"
)]
pub struct Args {
    #[clap(long, default_value = "error", env = "TENANT_LISTER_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Address of the namespace-list API server.
    #[clap(long, default_value = "0.0.0.0:8080")]
    api_addr: SocketAddr,

    /// Label selector scoping the namespace watch to tenant namespaces.
    #[clap(long, default_value = "tenant-lister.dev/type=tenant")]
    tenant_label_selector: String,

    /// Interval between periodic full restocks of the access cache.
    #[clap(long, default_value = "10m", env = "CACHE_RESYNC_PERIOD")]
    cache_resync_period: humantime::Duration,

    /// Trusted request header carrying the authenticated username.
    ///
    /// When unset, or when a request does not carry the header, bearer
    /// tokens are authenticated through the cluster's TokenReview API.
    #[clap(long, env = "AUTH_USERNAME_HEADER")]
    username_header: Option<String>,

    /// Trusted request header carrying the authenticated groups; may be
    /// repeated per group.
    #[clap(long, env = "AUTH_GROUPS_HEADER")]
    groups_header: Option<String>,
}

// === impl Args ===

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            api_addr,
            tenant_label_selector,
            cache_resync_period,
            username_header,
            groups_header,
        } = self;

        let mut prom = Registry::with_prefix("tenant_lister");
        let cache_metrics =
            AccessCacheMetrics::register(prom.sub_registry_with_prefix("access_cache"));
        let api_metrics = api::Metrics::register(prom.sub_registry_with_prefix("http"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // The index holds the watched policy objects; the synchronized cache
        // recomputes the access snapshot from it.
        let index = index::Index::shared();
        let reader = index::Reader::new(index.clone());
        let cache = Arc::new(SynchronizedAccessCache::new(
            reader.clone(),
            reader,
            SyncConfig {
                resync_period: cache_resync_period.into(),
                metrics: cache_metrics,
                ..Default::default()
            },
        ));

        // Feed the index from resource watches; every event also offers a
        // coalesced synchronization request.
        let namespaces = runtime.watch_all::<k8s::Namespace>(
            watcher::Config::default().labels(&tenant_label_selector),
        );
        tokio::spawn(
            kubert::index::cluster(
                SyncTrigger::shared(index.clone(), cache.requester()),
                namespaces,
            )
            .instrument(info_span!("namespaces")),
        );

        let cluster_roles = runtime.watch_all::<rbac::ClusterRole>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(
                SyncTrigger::shared(index.clone(), cache.requester()),
                cluster_roles,
            )
            .instrument(info_span!("clusterroles")),
        );

        let cluster_role_bindings =
            runtime.watch_all::<rbac::ClusterRoleBinding>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(
                SyncTrigger::shared(index.clone(), cache.requester()),
                cluster_role_bindings,
            )
            .instrument(info_span!("clusterrolebindings")),
        );

        let roles = runtime.watch_all::<rbac::Role>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(
                SyncTrigger::shared(index.clone(), cache.requester()),
                roles,
            )
            .instrument(info_span!("roles")),
        );

        let role_bindings = runtime.watch_all::<rbac::RoleBinding>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(
                SyncTrigger::shared(index.clone(), cache.requester()),
                role_bindings,
            )
            .instrument(info_span!("rolebindings")),
        );

        SynchronizedAccessCache::spawn(&cache, runtime.shutdown_handle());

        // Prime the snapshot; event- and time-triggered requests keep it
        // fresh from here on.
        cache.synch().await?;

        let authenticator = Authenticator::new(runtime.client(), username_header, groups_header);
        tokio::spawn(
            api::serve(
                api_addr,
                cache.cache_handle(),
                authenticator,
                api_metrics,
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("api")),
        );

        // Block on the shutdown signal; the spawned tasks drain with it.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
