// =============================================================================
// Connector Factory — enum-keyed registry with cached instances
// =============================================================================
//
// The factory is the only place venue strings become `Exchange` variants
// and the only producer of connector instances. It is an explicit value
// constructed in main (or per test), not a global; tests get isolation by
// building a fresh factory.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::binance::BinanceConnector;
use crate::bitget::BitgetConnector;
use crate::config::ExchangeConfig;
use crate::connector::ExchangeConnector;
use crate::errors::{ExchangeError, ExchangeResult};
use crate::mock::MockConnector;
use crate::types::Exchange;

type FactoryFn = fn() -> Arc<dyn ExchangeConnector>;

pub struct ConnectorFactory {
    registry: HashMap<Exchange, FactoryFn>,
    cache: Mutex<HashMap<Exchange, Arc<dyn ExchangeConnector>>>,
}

impl ConnectorFactory {
    /// Factory with every implemented venue registered.
    pub fn new() -> Self {
        let mut factory = Self::empty();
        factory.register(Exchange::Binance, || Arc::new(BinanceConnector::new()));
        factory.register(Exchange::Bitget, || Arc::new(BitgetConnector::new()));
        factory.register(Exchange::Mock, || Arc::new(MockConnector::new()));
        factory
    }

    /// Factory with no registrations (test isolation).
    pub fn empty() -> Self {
        Self {
            registry: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&mut self, exchange: Exchange, factory_fn: FactoryFn) {
        self.registry.insert(exchange, factory_fn);
    }

    pub fn supported_exchanges(&self) -> Vec<Exchange> {
        self.registry.keys().copied().collect()
    }

    /// Build (or fetch from cache) a configured connector for `exchange`.
    /// `config.exchange` must agree with `exchange`. The cache lock is held
    /// across construction so concurrent callers observe one instance.
    pub fn create_connector(
        &self,
        exchange: Exchange,
        config: ExchangeConfig,
        use_cache: bool,
    ) -> ExchangeResult<Arc<dyn ExchangeConnector>> {
        if config.exchange != exchange {
            return Err(ExchangeError::exchange(
                "config",
                format!(
                    "config is for {} but a {} connector was requested",
                    config.exchange, exchange
                ),
            ));
        }

        let factory_fn = self
            .registry
            .get(&exchange)
            .copied()
            .ok_or_else(|| ExchangeError::UnsupportedExchange(exchange.to_string()))?;

        if !use_cache {
            let connector = factory_fn();
            connector.configure(config)?;
            return Ok(connector);
        }

        let mut cache = self.cache.lock();
        if let Some(cached) = cache.get(&exchange) {
            debug!(exchange = %exchange, "returning cached connector");
            return Ok(cached.clone());
        }

        let connector = factory_fn();
        connector.configure(config)?;
        cache.insert(exchange, connector.clone());
        debug!(exchange = %exchange, "connector built and cached");
        Ok(connector)
    }

    /// Evict one cached instance. Returns whether something was removed.
    pub fn remove_connector(&self, exchange: Exchange) -> bool {
        self.cache.lock().remove(&exchange).is_some()
    }

    pub fn remove_all(&self) {
        self.cache.lock().clear();
    }
}

impl Default for ConnectorFactory {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn mock_config() -> ExchangeConfig {
        ExchangeConfig::new(Exchange::Mock)
    }

    #[test]
    fn default_registrations_cover_all_venues() {
        let factory = ConnectorFactory::new();
        let mut supported = factory.supported_exchanges();
        supported.sort_by_key(|e| e.to_string());
        assert_eq!(
            supported,
            vec![Exchange::Binance, Exchange::Bitget, Exchange::Mock]
        );
    }

    #[test]
    fn mismatched_config_is_a_parameter_error() {
        let factory = ConnectorFactory::new();
        let err = factory
            .create_connector(Exchange::Binance, mock_config(), true)
            .unwrap_err();
        assert_eq!(err.kind(), "exchange");
        assert!(err.to_string().contains("BINANCE"));
    }

    #[test]
    fn unknown_exchange_is_unsupported() {
        let factory = ConnectorFactory::empty();
        let err = factory
            .create_connector(Exchange::Mock, mock_config(), true)
            .unwrap_err();
        assert!(matches!(err, ExchangeError::UnsupportedExchange(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn cache_returns_the_same_instance() {
        let factory = ConnectorFactory::new();
        let a = factory
            .create_connector(Exchange::Mock, mock_config(), true)
            .unwrap();
        let b = factory
            .create_connector(Exchange::Mock, mock_config(), true)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn cache_bypass_builds_fresh_instances() {
        let factory = ConnectorFactory::new();
        let a = factory
            .create_connector(Exchange::Mock, mock_config(), false)
            .unwrap();
        let b = factory
            .create_connector(Exchange::Mock, mock_config(), false)
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn eviction_forces_a_rebuild() {
        let factory = ConnectorFactory::new();
        let a = factory
            .create_connector(Exchange::Mock, mock_config(), true)
            .unwrap();
        assert!(factory.remove_connector(Exchange::Mock));
        assert!(!factory.remove_connector(Exchange::Mock));

        let b = factory
            .create_connector(Exchange::Mock, mock_config(), true)
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));

        factory.remove_all();
        let c = factory
            .create_connector(Exchange::Mock, mock_config(), true)
            .unwrap();
        assert!(!Arc::ptr_eq(&b, &c));
    }

    #[test]
    fn concurrent_creations_share_one_instance() {
        let factory = Arc::new(ConnectorFactory::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let factory = factory.clone();
            handles.push(std::thread::spawn(move || {
                factory
                    .create_connector(Exchange::Mock, mock_config(), true)
                    .unwrap()
            }));
        }
        let connectors: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for connector in &connectors[1..] {
            assert!(Arc::ptr_eq(&connectors[0], connector));
        }
    }
}
