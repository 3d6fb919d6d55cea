//! Application wiring.
//!
//! Builds one gateway per account, a shared order store, audit sink, news
//! source and single-flight registry, then runs one [`TickLoop`] per account
//! until ctrl-c.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sigexec_core::{normalize_symbol, Clock, Price, SystemClock};
use sigexec_executor::{ControllerDeps, OrderController, SingleFlight, TickLoop};
use sigexec_gateway::{
    BybitCredentials, BybitGateway, CalendarFileSource, DynGateway, DynNewsSource, PaperGateway,
};
use sigexec_persistence::{
    DynAuditSink, DynOrderStore, InMemoryOrderStore, JournalOrderStore, JsonLinesAuditSink,
    MemoryAuditSink,
};
use sigexec_telemetry::Metrics;

use crate::config::{AccountConfig, AppConfig, ExchangeKind, StoreBackend};
use crate::error::{AppError, AppResult};

/// Main application.
pub struct Application {
    config: AppConfig,
    shutdown: CancellationToken,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Token that stops every tick loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// One controller per configured account.
    pub fn build_controllers(&self) -> AppResult<Vec<Arc<OrderController>>> {
        let (store, audit) = self.open_store()?;
        let news = self.news_source();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let flights = SingleFlight::new();

        let mut controllers = Vec::with_capacity(self.config.accounts.len());
        for account in &self.config.accounts {
            let deps = ControllerDeps {
                gateway: build_gateway(account)?,
                store: store.clone(),
                audit: audit.clone(),
                news: news.clone(),
                clock: clock.clone(),
                flights: flights.clone(),
            };
            let controller = OrderController::new(
                account.settings.clone(),
                self.config.controller.clone(),
                self.config.news.clone(),
                deps,
            )?;
            info!(
                user_id = %account.settings.user_id,
                symbol = %account.settings.symbol,
                exchange = account.exchange.as_str(),
                "Account ready"
            );
            controllers.push(Arc::new(controller));
        }
        Ok(controllers)
    }

    /// Run every account's tick loop until ctrl-c or the shutdown token.
    pub async fn run(self) -> AppResult<()> {
        let controllers = self.build_controllers()?;

        let mut handles = Vec::with_capacity(controllers.len());
        for controller in controllers {
            let tick_loop = TickLoop::new(controller, self.shutdown.clone());
            handles.push(tokio::spawn(tick_loop.run()));
        }
        info!(accounts = handles.len(), "Tick loops running");

        let shutdown = self.shutdown.clone();
        tokio::select! {
            () = shutdown.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
                }
                shutdown.cancel();
            }
        }

        for handle in handles {
            match handle.await {
                Ok(ticks) => info!(ticks, "Tick loop joined"),
                Err(e) => error!(error = %e, "Tick loop task failed"),
            }
        }

        self.write_metrics()?;
        info!("Shutdown complete");
        Ok(())
    }

    /// Close every open position of every account, best-effort.
    /// Returns the number of accounts whose close failed.
    pub async fn flatten_all(&self) -> AppResult<usize> {
        let mut failed = 0;
        for account in &self.config.accounts {
            let gateway = build_gateway(account)?;
            let symbol = normalize_symbol(&account.settings.symbol);
            match gateway.close_all(&symbol).await {
                Ok(()) => info!(
                    user_id = %account.settings.user_id,
                    symbol = %symbol,
                    "Positions closed"
                ),
                Err(e) => {
                    failed += 1;
                    error!(
                        user_id = %account.settings.user_id,
                        symbol = %symbol,
                        error = %e,
                        "Failed to close positions"
                    );
                }
            }
        }
        Ok(failed)
    }

    fn open_store(&self) -> AppResult<(DynOrderStore, DynAuditSink)> {
        let persistence = &self.config.persistence;
        match persistence.backend {
            StoreBackend::Memory => {
                warn!("In-memory order store: orders are lost on restart");
                Ok((
                    Arc::new(InMemoryOrderStore::new()),
                    Arc::new(MemoryAuditSink::new()),
                ))
            }
            StoreBackend::Journal => {
                let store = JournalOrderStore::open(&persistence.data_dir)?;
                let audit = JsonLinesAuditSink::open(&persistence.data_dir)?;
                Ok((Arc::new(store), Arc::new(audit)))
            }
        }
    }

    fn news_source(&self) -> Option<DynNewsSource> {
        let news = &self.config.news;
        if !news.enabled {
            return None;
        }
        match &news.calendar_file {
            Some(path) => {
                info!(path = %path.display(), "News gate reading calendar file");
                Some(Arc::new(CalendarFileSource::new(path.clone())))
            }
            None => {
                warn!("News gate enabled without a calendar file; no events will block entries");
                None
            }
        }
    }

    fn write_metrics(&self) -> AppResult<()> {
        let Some(path) = &self.config.telemetry.metrics_file else {
            return Ok(());
        };
        let text = Metrics::gather_text()?;
        std::fs::write(path, text)?;
        info!(path = %path.display(), "Metrics snapshot written");
        Ok(())
    }
}

fn build_gateway(account: &AccountConfig) -> AppResult<DynGateway> {
    match account.exchange {
        ExchangeKind::Paper => {
            let gateway = PaperGateway::new(ExchangeKind::Paper.as_str());
            gateway.set_margin(account.paper.margin);
            match account.paper.price {
                Some(price) if price > Decimal::ZERO => {
                    gateway.set_price(&normalize_symbol(&account.settings.symbol), Price::new(price));
                }
                _ => warn!(
                    user_id = %account.settings.user_id,
                    "Paper account has no price; sizing will fail"
                ),
            }
            Ok(Arc::new(gateway))
        }
        ExchangeKind::Bybit => {
            let credentials =
                BybitCredentials::from_env(&account.api_key_env, &account.api_secret_env)?;
            let gateway = BybitGateway::new(
                ExchangeKind::Bybit.as_str(),
                account.bybit.clone(),
                credentials,
            )?;
            Ok(Arc::new(gateway))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistenceConfig;
    use rust_decimal_macros::dec;
    use sigexec_executor::AccountSettings;

    fn paper_config(backend: StoreBackend, data_dir: &std::path::Path) -> AppConfig {
        let mut account = AccountConfig::new(
            AccountSettings::new("alice", "BTCUSD", "bybit"),
            ExchangeKind::Paper,
        );
        account.paper.price = Some(dec!(60000));
        AppConfig {
            persistence: PersistenceConfig {
                backend,
                data_dir: data_dir.to_path_buf(),
            },
            accounts: vec![account],
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_rejects_empty_accounts() {
        let result = Application::new(AppConfig::default());
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_builds_paper_controllers() {
        let dir = tempfile::tempdir().unwrap();
        let app = Application::new(paper_config(StoreBackend::Memory, dir.path())).unwrap();
        let controllers = app.build_controllers().unwrap();
        assert_eq!(controllers.len(), 1);
        assert_eq!(controllers[0].exchange(), "paper");
        assert_eq!(controllers[0].account().user_id, "alice");
    }

    #[test]
    fn test_journal_backend_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("state");
        let app = Application::new(paper_config(StoreBackend::Journal, &data_dir)).unwrap();
        app.build_controllers().unwrap();
        assert!(data_dir.is_dir());
    }

    #[test]
    fn test_bybit_without_credentials_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = paper_config(StoreBackend::Memory, dir.path());
        config.accounts[0].exchange = ExchangeKind::Bybit;
        config.accounts[0].api_key_env = "SIGEXEC_TEST_UNSET_KEY".to_string();
        config.accounts[0].api_secret_env = "SIGEXEC_TEST_UNSET_SECRET".to_string();
        let app = Application::new(config).unwrap();
        assert!(matches!(app.build_controllers(), Err(AppError::Gateway(_))));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = paper_config(StoreBackend::Memory, dir.path());
        config.telemetry.metrics_file = Some(dir.path().join("metrics.prom"));
        let app = Application::new(config).unwrap();
        let shutdown = app.shutdown_token();
        shutdown.cancel();

        tokio_test::assert_ok!(app.run().await);
        assert!(dir.path().join("metrics.prom").exists());
    }

    #[tokio::test]
    async fn test_flatten_all_on_flat_paper_account() {
        let dir = tempfile::tempdir().unwrap();
        let app = Application::new(paper_config(StoreBackend::Memory, dir.path())).unwrap();
        assert_eq!(app.flatten_all().await.unwrap(), 0);
    }
}
