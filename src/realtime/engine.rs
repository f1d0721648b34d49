use crate::config::TraderConfig;
use crate::connectors::DryRunMaster;
use crate::core::error::EngineError;
use crate::core::events::FillEvent;
use crate::exchanges::binance::fetch_klines;
use crate::exchanges::{BinanceFuturesClient, BitmexClient, OkxClient};
use crate::market_data::MarketBuffer;
use crate::monitoring::{build_notifier, Category, Notifier, Severity};
use crate::replication::{ReplicationManager, SlaveVenue};
use crate::strategy::Orchestrator;
use crate::streaming::{
    KlineHandler, ListenKeyManager, OrderResponseHandler, RequestSigner, StreamEndpoint, StreamHandler,
    StreamSession, UserDataHandler,
};
use crate::traits::MasterExecution;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Simulated starting balance of the dry-run master
const DRY_RUN_BALANCE: f64 = 10_000.0;

/// Everything the live process runs, wired from one [`TraderConfig`].
///
/// `build` only constructs; nothing connects until `run`.
pub struct TradingEngine {
    config: Arc<TraderConfig>,
    notifier: Arc<dyn Notifier>,
    buffer: Arc<MarketBuffer>,
    master: Arc<dyn MasterExecution>,
    replication: Arc<ReplicationManager>,
    orchestrator: Arc<Orchestrator>,
    sessions: Vec<(Arc<StreamSession>, Arc<dyn StreamHandler>)>,
    listen_key: Option<Arc<ListenKeyManager>>,
    fills: Option<mpsc::UnboundedReceiver<FillEvent>>,
}

impl TradingEngine {
    pub fn build(config: TraderConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let config = Arc::new(config);
        let endpoints = config.endpoints();
        let reconnect_delay = Duration::from_secs(config.engine.reconnect_delay_secs);

        let notifier = build_notifier(config.slack.as_ref(), &endpoints.slack_api_url);
        let buffer = Arc::new(MarketBuffer::new(config.engine.max_bars));

        let kline_session = Arc::new(StreamSession::new(
            "kline",
            StreamEndpoint::Fixed(config.kline_stream_url()),
            reconnect_delay,
            notifier.clone(),
        ));
        let mut sessions: Vec<(Arc<StreamSession>, Arc<dyn StreamHandler>)> =
            vec![(kline_session, Arc::new(KlineHandler::new(buffer.clone())))];

        let (fills_tx, fills_rx) = mpsc::unbounded_channel();
        let mut listen_key = None;

        let master: Arc<dyn MasterExecution> = match (&config.master_credentials, config.dry_run) {
            (Some(credentials), false) => {
                let signer = RequestSigner::new(credentials.api_key.clone(), credentials.api_secret.clone());
                let orders = Arc::new(
                    StreamSession::new(
                        "orders",
                        StreamEndpoint::Fixed(endpoints.ws_api_url.clone()),
                        reconnect_delay,
                        notifier.clone(),
                    )
                    .with_signer(signer.clone()),
                );
                sessions.push((orders.clone(), Arc::new(OrderResponseHandler::new(notifier.clone()))));

                let manager = Arc::new(ListenKeyManager::new(&endpoints.rest_url, credentials.api_key.clone()));
                let user = Arc::new(StreamSession::new(
                    "user",
                    StreamEndpoint::ListenKey {
                        manager: manager.clone(),
                        base_url: endpoints.stream_url.clone(),
                    },
                    reconnect_delay,
                    notifier.clone(),
                ));
                sessions.push((user, Arc::new(UserDataHandler::new(fills_tx))));
                listen_key = Some(manager);

                Arc::new(BinanceFuturesClient::new(
                    &config.master_symbol(),
                    &config.timeframe,
                    &endpoints.rest_url,
                    signer,
                    orders,
                ))
            }
            _ => {
                log::warn!("DRY RUN: master orders are simulated");
                Arc::new(DryRunMaster::new(&config.master_symbol(), DRY_RUN_BALANCE))
            }
        };

        let mut replication = ReplicationManager::new(notifier.clone())
            .with_timeout(Duration::from_secs(config.engine.replication_timeout_secs));
        if config.dry_run {
            log::warn!("DRY RUN: slave venues disabled");
        } else {
            if let Some(credentials) = &config.bitmex_credentials {
                replication.add_venue(SlaveVenue::new(
                    "bitmex",
                    BitmexClient::instrument_for(&config.symbol),
                    Arc::new(BitmexClient::new(credentials.clone(), &endpoints.bitmex_url)),
                ));
            }
            if let Some(credentials) = &config.okx_credentials {
                replication.add_venue(SlaveVenue::new(
                    "okx",
                    OkxClient::instrument_for(&config.symbol),
                    Arc::new(OkxClient::new(credentials.clone(), &endpoints.okx_url, config.testnet)),
                ));
            }
            if replication.is_empty() {
                log::warn!("No slave venues configured, trading the master only");
            }
        }
        let replication = Arc::new(replication);

        let orchestrator = Arc::new(Orchestrator::new(
            master.clone(),
            replication.clone(),
            buffer.clone(),
            notifier.clone(),
            &config,
        ));

        Ok(Self {
            config,
            notifier,
            buffer,
            master,
            replication,
            orchestrator,
            sessions,
            listen_key,
            fills: Some(fills_rx),
        })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn buffer(&self) -> &Arc<MarketBuffer> {
        &self.buffer
    }

    pub fn replication(&self) -> &Arc<ReplicationManager> {
        &self.replication
    }

    pub fn session_names(&self) -> Vec<String> {
        self.sessions.iter().map(|(s, _)| s.name().to_string()).collect()
    }

    /// Fill the buffer with recent history before any stream starts
    pub async fn warm_up(&self) -> Result<usize, EngineError> {
        let limit = self.config.engine.max_bars;
        let bars = if self.config.dry_run {
            let rest_url = self.config.endpoints().rest_url;
            fetch_klines(
                &reqwest::Client::new(),
                &rest_url,
                &self.config.master_symbol(),
                &self.config.timeframe,
                limit,
            )
            .await?
        } else {
            self.master.fetch_ohlcv(limit).await?
        };
        self.buffer.reset(bars);
        log::info!("Warm-up loaded {} bars", self.buffer.len());
        Ok(self.buffer.len())
    }

    /// Start every stream and run the strategy loop until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), EngineError> {
        self.master.load_markets().await?;
        self.replication.prepare().await;
        self.warm_up().await?;

        let mut handles = Vec::new();
        for (session, handler) in &self.sessions {
            handles.push(session.connect(handler.clone(), cancel.clone()));
        }
        if let Some(manager) = &self.listen_key {
            handles.push(manager.spawn_keepalive(
                Duration::from_secs(self.config.engine.listen_key_refresh_secs),
                self.notifier.clone(),
                cancel.clone(),
            ));
        }
        if let Some(fills) = self.fills.take() {
            handles.push(self.orchestrator.spawn_fill_listener(fills, cancel.clone()));
        }

        self.notifier.notify(
            &format!(
                "Engine started: {} {} ({})",
                self.config.master_symbol(),
                self.config.timeframe,
                if self.config.testnet { "testnet" } else { "mainnet" }
            ),
            Severity::Info,
            Category::Engine,
        );

        self.orchestrator.clone().run(cancel.clone()).await;
        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("Background task ended abnormally: {}", e);
            }
        }
        Ok(())
    }
}

/// Cancel `cancel` once `signal` fires. A signal listener that fails to
/// install is logged and leaves the engine running.
pub async fn cancel_on_signal<F>(signal: F, cancel: CancellationToken)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            log::info!("Shutdown signal received");
            cancel.cancel();
        }
        Err(e) => log::error!("Unable to listen for the shutdown signal: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::VenueCredentials;

    #[test]
    fn test_dry_run_wires_market_stream_only() {
        let config = TraderConfig {
            dry_run: true,
            ..TraderConfig::default()
        };
        let engine = TradingEngine::build(config).unwrap();
        assert_eq!(engine.session_names(), vec!["kline".to_string()]);
        assert!(engine.replication().is_empty());
        assert!(engine.listen_key.is_none());
    }

    #[test]
    fn test_live_wiring_with_slaves() {
        let mut config = TraderConfig::default();
        config.master_credentials = Some(VenueCredentials::new("k", "s"));
        config.bitmex_credentials = Some(VenueCredentials::new("bk", "bs"));
        config.okx_credentials = Some(VenueCredentials::new("ok", "os").with_passphrase("pp"));

        let engine = TradingEngine::build(config).unwrap();
        assert_eq!(
            engine.session_names(),
            vec!["kline".to_string(), "orders".to_string(), "user".to_string()]
        );
        let instruments: Vec<&str> = engine
            .replication()
            .venues()
            .iter()
            .map(|v| v.instrument.as_str())
            .collect();
        assert_eq!(instruments, vec!["XBTUSDT", "BTC-USDT-SWAP"]);
    }

    #[test]
    fn test_dry_run_ignores_slave_credentials() {
        let mut config = TraderConfig {
            dry_run: true,
            ..TraderConfig::default()
        };
        config.bitmex_credentials = Some(VenueCredentials::new("bk", "bs"));
        let engine = TradingEngine::build(config).unwrap();
        assert!(engine.replication().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = TraderConfig {
            dry_run: true,
            ..TraderConfig::default()
        };
        config.strategy.min_leverage = 0;
        assert!(matches!(TradingEngine::build(config), Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_signal_listener_failure_keeps_running() {
        let cancel = CancellationToken::new();
        let failed = async { Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "no signal handler")) };
        cancel_on_signal(failed, cancel.clone()).await;
        assert!(!cancel.is_cancelled());

        cancel_on_signal(async { Ok::<(), std::io::Error>(()) }, cancel.clone()).await;
        assert!(cancel.is_cancelled());
    }
}
