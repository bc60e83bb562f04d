use crate::{
    admission::Admission,
    core::ProviderRegistry,
    gatekeeper::{self, EnforcementAction, Gatekeeper},
    index::{Cache, Index},
    k8s::{self, Policy, Rule},
    manager::{Config, Metrics, Operator, Stores},
    store::ApiWriter,
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::{sync::Arc, time::Duration};
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "admission", about = "An admission policy controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "admission=info,warn",
        env = "ADMISSION_POLICY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    /// Enables policy providers. When false, no provider is enabled and policies cannot be
    /// created.
    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    admission_enabled: bool,

    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    gatekeeper_provider_enabled: bool,

    /// Bounds each call to a provider.
    #[clap(long, default_value = "5000")]
    provider_timeout_ms: u64,

    #[clap(long, default_value = "admission-policy-controller")]
    field_manager: String,

    #[clap(long, default_value = "deny")]
    gatekeeper_enforcement_action: EnforcementAction,

    /// Accepts policies whose template has no content for their provider.
    #[clap(long)]
    allow_empty_policies: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            admission_controller_disabled,
            admission_enabled,
            gatekeeper_provider_enabled,
            provider_timeout_ms,
            field_manager,
            gatekeeper_enforcement_action,
            allow_empty_policies,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        let mut prom = <Registry>::default();
        let metrics = Metrics::register(prom.sub_registry_with_prefix("admission"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        // Spawn resource watches. Reads are served from this index.
        let index = Index::shared();

        let templates = runtime.watch_all::<k8s::PolicyTemplate>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index.clone(), templates)
                .instrument(info_span!("policytemplates")),
        );

        let policies = runtime.watch_all::<Policy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index.clone(), policies).instrument(info_span!("policies")),
        );

        let rules = runtime.watch_all::<Rule>(watcher::Config::default());
        tokio::spawn(kubert::index::cluster(index.clone(), rules).instrument(info_span!("rules")));

        let client = runtime.client();
        let providers = ProviderRegistry::builder()
            .with_optional_provider(
                admission_enabled && gatekeeper_provider_enabled,
                gatekeeper::PROVIDER_NAME,
                || {
                    Gatekeeper::new(
                        client.clone(),
                        &field_manager,
                        gatekeeper_enforcement_action,
                    )
                },
            )
            .build();
        tracing::info!(?providers, "Providers enabled");

        let stores = Stores {
            reader: Arc::new(Cache::new(index)),
            policies: Arc::new(ApiWriter::<Policy>::new(client.clone(), &field_manager)),
            rules: Arc::new(ApiWriter::<Rule>::new(client, &field_manager)),
        };
        let config = Config {
            provider_timeout: Duration::from_millis(provider_timeout_ms),
            allow_empty_policies,
        };
        let operator = Operator::new(stores, providers, config, metrics);

        let runtime = runtime.spawn_server(move || Admission::new(operator));

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks
        // to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
