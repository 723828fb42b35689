//! Background settlement relayer and its metrics endpoint.
//!
//! Each pass retries queued fee payouts and resumes unresolved withdrawals. Both paths check any
//! recorded signature before submitting again, so a pass is safe to repeat after a crash.

use axum::{
    body::Body,
    extract::State as AxumState,
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use growbet_execution::{ChainGateway, Engine, Error, KeyProvider, State};
use growbet_types::{TransferStatus, WithdrawalOutcome};
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use std::{
    future::Future,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

pub struct Metrics {
    registry: Registry,
    pub passes: Counter,
    pub pass_errors: Counter,
    pub payouts_confirmed: Counter,
    pub payouts_failed: Counter,
    pub withdrawals_confirmed: Counter,
    pub payouts_queued: Gauge,
    pub withdrawals_unresolved: Gauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("growbet");
        let passes = Counter::default();
        let pass_errors = Counter::default();
        let payouts_confirmed = Counter::default();
        let payouts_failed = Counter::default();
        let withdrawals_confirmed = Counter::default();
        let payouts_queued = Gauge::default();
        let withdrawals_unresolved = Gauge::default();
        registry.register(
            "relayer_passes",
            "Completed relayer passes.",
            passes.clone(),
        );
        registry.register(
            "relayer_pass_errors",
            "Relayer passes aborted by an error.",
            pass_errors.clone(),
        );
        registry.register(
            "payouts_confirmed",
            "Fee payouts confirmed by the relayer.",
            payouts_confirmed.clone(),
        );
        registry.register(
            "payouts_failed",
            "Fee payouts that failed and now wait for an operator.",
            payouts_failed.clone(),
        );
        registry.register(
            "withdrawals_confirmed",
            "Withdrawals confirmed on resume.",
            withdrawals_confirmed.clone(),
        );
        registry.register(
            "payouts_queued",
            "Fee payouts not yet confirmed.",
            payouts_queued.clone(),
        );
        registry.register(
            "withdrawals_unresolved",
            "Withdrawals not yet confirmed or failed.",
            withdrawals_unresolved.clone(),
        );
        Self {
            registry,
            passes,
            pass_errors,
            payouts_confirmed,
            payouts_failed,
            withdrawals_confirmed,
            payouts_queued,
            withdrawals_unresolved,
        }
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

/// What one relayer pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub payouts_confirmed: usize,
    pub payouts_failed: usize,
    pub withdrawals_confirmed: usize,
    pub withdrawals_pending: usize,
    pub payouts_queued: usize,
    pub withdrawals_unresolved: usize,
}

pub struct Relayer<S: State, G: ChainGateway, K: KeyProvider> {
    engine: Arc<Engine<S, G, K>>,
    interval: Duration,
    metrics: Arc<Metrics>,
}

impl<S: State + 'static, G: ChainGateway, K: KeyProvider> Relayer<S, G, K> {
    pub fn new(engine: Arc<Engine<S, G, K>>, interval: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            engine,
            interval,
            metrics,
        }
    }

    pub async fn pass(&self, now: u64) -> Result<PassSummary, Error> {
        let mut summary = PassSummary::default();
        for (payout, status) in self.engine.retry_payouts(now).await? {
            match status {
                TransferStatus::Confirmed => summary.payouts_confirmed += 1,
                TransferStatus::Failed => summary.payouts_failed += 1,
                status => debug!(payout, ?status, "payout still unresolved"),
            }
        }
        for outcome in self.engine.resume_withdrawals(now).await? {
            match outcome {
                WithdrawalOutcome::Confirmed { .. } => summary.withdrawals_confirmed += 1,
                WithdrawalOutcome::Pending { .. } => summary.withdrawals_pending += 1,
            }
        }
        summary.payouts_queued = self.engine.pending_payouts().await?.len();
        summary.withdrawals_unresolved = self.engine.unresolved_withdrawals().await?.len();

        self.metrics.passes.inc();
        self.metrics
            .payouts_confirmed
            .inc_by(summary.payouts_confirmed as u64);
        self.metrics.payouts_failed.inc_by(summary.payouts_failed as u64);
        self.metrics
            .withdrawals_confirmed
            .inc_by(summary.withdrawals_confirmed as u64);
        self.metrics.payouts_queued.set(summary.payouts_queued as i64);
        self.metrics
            .withdrawals_unresolved
            .set(summary.withdrawals_unresolved as i64);
        Ok(summary)
    }

    /// Runs passes every interval until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        info!(interval = ?self.interval, "relayer started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("relayer stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            match self.pass(unix_now()).await {
                Ok(summary) if summary == PassSummary::default() => debug!("relayer idle"),
                Ok(summary) => info!(?summary, "relayer pass"),
                Err(err) => {
                    self.metrics.pass_errors.inc();
                    error!(?err, "relayer pass failed");
                }
            }
        }
    }
}

async fn metrics_handler(
    AxumState(metrics): AxumState<Arc<Metrics>>,
) -> Result<Response<Body>, StatusCode> {
    let body = metrics.encode().map_err(|err| {
        error!("metrics encode failed: {err}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .map_err(|err| {
            error!("metrics response build failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

pub fn metrics_router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(metrics)
}

pub fn spawn_metrics_server(addr: SocketAddr, metrics: Arc<Metrics>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => {
                error!("metrics server bind failed on {addr}: {err}");
                return;
            }
        };
        info!(%addr, "metrics server listening");
        if let Err(err) = axum::serve(listener, metrics_router(metrics).into_make_service()).await {
            error!("metrics server failed on {addr}: {err}");
        }
    })
}
