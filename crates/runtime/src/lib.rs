//! Assembly of the ingestion pipeline: independently scheduled source
//! fetches feed per-category ingest workers, which normalize, store, and
//! evaluate events, handing fired alerts to the dispatch loop.

mod health;

pub use health::{HealthBoard, SourceHealth};

use alerts::{HttpPreferenceSource, PreferenceSource, RuleEngine, StaticPreferences};
use anyhow::Context;
use chrono::Utc;
use dispatch::{DeliveryAudit, Dispatcher, LogAudit};
use futures::StreamExt;
use models::{
    AdapterProvider, AlertEvent, Category, Config, NormalizeConfig, Observation, SolarEvent,
};
use normalize::Normalizer;
use rand::Rng;
use sources::{KForecastAdapter, KIndexAdapter, OvationAdapter, SdoImageryAdapter, SourceAdapter};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use store::Store;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// ScheduledSource is one adapter and its fetch schedule.
#[derive(Clone)]
pub struct ScheduledSource {
    pub adapter: Arc<dyn SourceAdapter>,
    pub interval: Duration,
    pub timeout: Duration,
}

/// Pipeline owns the assembled components and exposes the pipeline's
/// read-only query boundary: `store`, `health`, and the accepted-event
/// subscription consumed by the historical-archive collaborator.
pub struct Pipeline {
    sources: Vec<ScheduledSource>,
    preferences: Arc<dyn PreferenceSource>,
    dispatcher: Arc<Dispatcher>,
    audit: Arc<dyn DeliveryAudit>,
    store: Arc<Store>,
    health: Arc<HealthBoard>,
    engine: Arc<Mutex<RuleEngine>>,
    events_tx: broadcast::Sender<SolarEvent>,
    normalize: NormalizeConfig,
    refresh_interval: Duration,
    dispatch_concurrency: usize,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl Pipeline {
    /// A Pipeline over explicit sources, preference source, dispatcher,
    /// and audit.
    pub fn new(
        config: &Config,
        sources: Vec<ScheduledSource>,
        preferences: Arc<dyn PreferenceSource>,
        dispatcher: Dispatcher,
        audit: Arc<dyn DeliveryAudit>,
    ) -> anyhow::Result<Self> {
        let mut seen = std::collections::BTreeSet::new();
        for source in &sources {
            if !seen.insert(source.adapter.id().clone()) {
                anyhow::bail!("duplicate source id {:?}", source.adapter.id());
            }
            if source.interval.is_zero() {
                anyhow::bail!(
                    "source {:?} has a zero fetch interval",
                    source.adapter.id()
                );
            }
        }
        if config.alerts.refresh_interval.is_zero() {
            anyhow::bail!("alerts.refreshInterval must be a non-zero duration");
        }

        let health = HealthBoard::new(
            config.health,
            sources.iter().map(|source| source.adapter.id().clone()),
        );
        let (events_tx, _) = broadcast::channel(256);

        Ok(Self {
            sources,
            preferences,
            dispatcher: Arc::new(dispatcher),
            audit,
            store: Arc::new(Store::new(config.store)),
            health: Arc::new(health),
            engine: Arc::new(Mutex::new(RuleEngine::new(config.alerts.trigger_policy))),
            events_tx,
            normalize: config.normalize.clone(),
            refresh_interval: config.alerts.refresh_interval,
            dispatch_concurrency: config.dispatch.concurrency.max(1),
        })
    }

    /// A Pipeline with the standard adapters and sinks of `config`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let mut sources = Vec::with_capacity(config.sources.len());
        for def in &config.sources {
            let client = reqwest::Client::builder()
                .timeout(def.timeout)
                .build()
                .context("building HTTP client")?;

            let adapter: Arc<dyn SourceAdapter> = match def.provider {
                AdapterProvider::NoaaKIndex => Arc::new(KIndexAdapter::new(
                    def.id.clone(),
                    def.endpoint.clone(),
                    client,
                )),
                AdapterProvider::NoaaKForecast => Arc::new(KForecastAdapter::new(
                    def.id.clone(),
                    def.endpoint.clone(),
                    client,
                )),
                AdapterProvider::NoaaOvation => Arc::new(OvationAdapter::new(
                    def.id.clone(),
                    def.endpoint.clone(),
                    def.min_latitude,
                    client,
                )),
                AdapterProvider::SdoImagery => Arc::new(SdoImageryAdapter::new(
                    def.id.clone(),
                    def.endpoint.clone(),
                    def.channel,
                    client,
                )),
            };
            tracing::info!(
                source = %def.id,
                category = %def.provider.category(),
                interval = ?def.interval,
                "configured source"
            );
            sources.push(ScheduledSource {
                adapter,
                interval: def.interval,
                timeout: def.timeout,
            });
        }

        let preferences: Arc<dyn PreferenceSource> = match &config.alerts.preferences_url {
            Some(url) => Arc::new(HttpPreferenceSource::new(
                url.clone(),
                reqwest::Client::new(),
            )),
            None => Arc::new(StaticPreferences(Vec::new())),
        };
        let dispatcher = Dispatcher::from_config(&config.dispatch)?;

        Self::new(&config, sources, preferences, dispatcher, Arc::new(LogAudit))
    }

    /// The bounded recent-event store, for image and metric queries.
    pub fn store(&self) -> Arc<Store> {
        self.store.clone()
    }

    /// Per-source health, for the "data stale" indicator.
    pub fn health(&self) -> Arc<HealthBoard> {
        self.health.clone()
    }

    /// Subscribe to every accepted event, in arrival order per category.
    /// The historical-archive collaborator consumes this feed.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SolarEvent> {
        self.events_tx.subscribe()
    }

    /// Run the pipeline until `shutdown` is cancelled, then drain:
    /// fetch schedules halt, queued observations flow through evaluation,
    /// and in-flight dispatches complete.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut tasks = tokio::task::JoinSet::new();

        // One single-writer ingest worker per category serializes the
        // normalize-insert-evaluate path within the category.
        let (alert_tx, alert_rx) = mpsc::channel::<AlertEvent>(256);
        let mut ingest_tx: BTreeMap<Category, mpsc::Sender<Observation>> = BTreeMap::new();
        for category in Category::ALL {
            let (tx, rx) = mpsc::channel(256);
            ingest_tx.insert(category, tx);
            tasks.spawn(ingest_loop(
                category,
                Normalizer::new(category, &self.normalize),
                self.store.clone(),
                self.engine.clone(),
                self.events_tx.clone(),
                alert_tx.clone(),
                rx,
            ));
        }
        drop(alert_tx);

        for source in &self.sources {
            let tx = ingest_tx[&source.adapter.category()].clone();
            tasks.spawn(fetch_loop(
                source.clone(),
                tx,
                self.health.clone(),
                shutdown.clone(),
            ));
        }
        drop(ingest_tx);

        tasks.spawn(refresh_loop(
            self.preferences.clone(),
            self.engine.clone(),
            self.refresh_interval,
            shutdown.clone(),
        ));
        tasks.spawn(dispatch_loop(
            self.dispatcher.clone(),
            self.audit.clone(),
            alert_rx,
            self.dispatch_concurrency,
        ));

        while let Some(joined) = tasks.join_next().await {
            joined.context("pipeline task panicked")??;
        }
        tracing::info!("pipeline drained and stopped");
        Ok(())
    }
}

/// Fetch one source on its interval until shutdown. A fetch failure is
/// recorded against the source's health and never aborts the schedule.
async fn fetch_loop(
    source: ScheduledSource,
    tx: mpsc::Sender<Observation>,
    health: Arc<HealthBoard>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let id = source.adapter.id().clone();

    // Stagger the first fetch so co-scheduled sources don't all hit
    // their providers at the same instant.
    let stagger = rand::thread_rng().gen_range(0..source.interval.as_millis().max(4) as u64 / 4);
    tokio::select! {
        () = shutdown.cancelled() => return Ok(()),
        () = tokio::time::sleep(Duration::from_millis(stagger)) => (),
    }

    let mut ticks = tokio::time::interval(source.interval);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::info!(source = %id, "halting fetch schedule");
                return Ok(());
            }
            _ = ticks.tick() => (),
        }

        // The fetch itself is not cancelled by shutdown; it completes or
        // times out, and the loop exits on the next tick.
        match tokio::time::timeout(source.timeout, source.adapter.fetch()).await {
            Ok(Ok(observations)) => {
                health.record_success(&id);
                tracing::debug!(source = %id, count = observations.len(), "fetched observations");
                for observation in observations {
                    if tx.send(observation).await.is_err() {
                        return Ok(());
                    }
                }
            }
            Ok(Err(error)) => {
                health.record_failure(&id);
                tracing::warn!(source = %id, %error, transient = error.is_transient(), "fetch failed");
            }
            Err(_elapsed) => {
                health.record_failure(&id);
                tracing::warn!(source = %id, timeout = ?source.timeout, "fetch timed out");
            }
        }
    }
}

/// Consume one category's observation queue: normalize, insert, publish
/// to the archive feed, and evaluate alert rules. Exits once every
/// fetch loop has dropped its sender and the queue is drained.
async fn ingest_loop(
    category: Category,
    mut normalizer: Normalizer,
    store: Arc<Store>,
    engine: Arc<Mutex<RuleEngine>>,
    events_tx: broadcast::Sender<SolarEvent>,
    alert_tx: mpsc::Sender<AlertEvent>,
    mut rx: mpsc::Receiver<Observation>,
) -> anyhow::Result<()> {
    while let Some(observation) = rx.recv().await {
        let event = match normalizer.normalize(observation) {
            Ok(event) => event,
            Err(reason) => {
                metrics::counter!("observations_rejected", "category" => category.as_str())
                    .increment(1);
                tracing::info!(%category, %reason, "dropping observation");
                continue;
            }
        };

        store.insert(event.clone());
        metrics::counter!("events_accepted", "category" => category.as_str()).increment(1);
        // Nobody listening is fine; the archive tap is optional.
        let _ = events_tx.send(event.clone());

        let fired = engine.lock().unwrap().evaluate(&event, Utc::now());
        for alert in fired {
            if alert_tx.send(alert).await.is_err() {
                return Ok(());
            }
        }
    }
    tracing::debug!(%category, "ingest queue drained");
    Ok(())
}

/// Refresh the preference snapshot on an interval until shutdown.
/// A failed refresh keeps the previous snapshot.
async fn refresh_loop(
    preferences: Arc<dyn PreferenceSource>,
    engine: Arc<Mutex<RuleEngine>>,
    interval: Duration,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut ticks = tokio::time::interval(interval);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            _ = ticks.tick() => (),
        }

        match preferences.fetch().await {
            Ok(snapshot) => {
                let mut engine = engine.lock().unwrap();
                engine.set_preferences(snapshot);
                metrics::gauge!("registered_preferences").set(engine.preference_count() as f64);
            }
            Err(error) => {
                tracing::warn!(?error, "preference refresh failed, keeping previous snapshot");
            }
        }
    }
}

/// Deliver fired alerts with bounded concurrency. One recipient's slow
/// or failing delivery never fails another's; exhausted deliveries are
/// surfaced to the audit. Runs until the alert queue closes and drains.
async fn dispatch_loop(
    dispatcher: Arc<Dispatcher>,
    audit: Arc<dyn DeliveryAudit>,
    rx: mpsc::Receiver<AlertEvent>,
    concurrency: usize,
) -> anyhow::Result<()> {
    let alerts = futures::stream::unfold(rx, |mut rx| async { rx.recv().await.map(|alert| (alert, rx)) });

    alerts
        .map(|alert| {
            let dispatcher = dispatcher.clone();
            let audit = audit.clone();
            async move {
                match dispatcher.dispatch(&alert).await {
                    Ok(ack) => {
                        tracing::info!(
                            alert = %ack.alert_id,
                            channel = ack.channel,
                            attempts = ack.attempts,
                            "delivered alert"
                        );
                    }
                    Err(error) => audit.undeliverable(&alert, &error),
                }
            }
        })
        .buffer_unordered(concurrency)
        .collect::<()>()
        .await;

    Ok(())
}
