//! Marketplace facade: wires negotiation, settlement and history over one store
use crate::collaborators::{Notifier, PublicationDirectory};
use crate::config::EngineConfig;
use crate::error::MarketResult;
use crate::history::SettlementHistory;
use crate::negotiation::NegotiationService;
use crate::settlement::SettlementService;
use crate::store::Store;
use std::sync::Arc;

pub struct Marketplace {
    pub negotiation: NegotiationService,
    pub settlement: SettlementService,
    pub history: SettlementHistory,
    store: Store,
}

impl Marketplace {
    /// Opens the sled database at `config.db_path`
    pub fn open(
        config: &EngineConfig,
        publications: Arc<dyn PublicationDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let db = Arc::new(sled::open(&config.db_path)?);
        Ok(Self::with_db(db, config, publications, notifier)?)
    }

    pub fn with_db(
        db: Arc<sled::Db>,
        config: &EngineConfig,
        publications: Arc<dyn PublicationDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> MarketResult<Self> {
        let store = Store::open(db)?;
        tracing::debug!(
            commission_bps = config.rates.commission_bps,
            tax_bps = config.rates.tax_bps,
            "marketplace store opened"
        );

        Ok(Self {
            negotiation: NegotiationService::new(
                store.clone(),
                publications,
                Arc::clone(&notifier),
                config.rates,
            ),
            settlement: SettlementService::new(
                store.clone(),
                notifier,
                config.rates,
                config.otc,
                config.fee_due,
            ),
            history: SettlementHistory::new(store.clone()),
            store,
        })
    }

    pub fn flush(&self) -> MarketResult<()> {
        self.store.flush()
    }
}
