use std::{fmt, sync::Arc};

use crate::{
    appliance::{ApplianceApi, Credentials},
    config::EngineConfig,
    hashing::ContentHasher,
    ledger::SubmissionLedger,
};

/// Everything a run needs, built once by the caller and passed down to each
/// component.
#[derive(Clone)]
pub struct EngineContext {
    config: Arc<EngineConfig>,
    ledger: Arc<dyn SubmissionLedger>,
    api: Arc<dyn ApplianceApi>,
    hasher: Arc<dyn ContentHasher>,
    credentials: Credentials,
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("config", &self.config)
            .field("hash_algorithm", &self.hasher.algorithm())
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        ledger: Arc<dyn SubmissionLedger>,
        api: Arc<dyn ApplianceApi>,
        hasher: Arc<dyn ContentHasher>,
        credentials: Credentials,
    ) -> Self {
        Self {
            config: Arc::new(config),
            ledger,
            api,
            hasher,
            credentials,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        self.config.as_ref()
    }

    pub fn ledger(&self) -> &dyn SubmissionLedger {
        self.ledger.as_ref()
    }

    pub fn api(&self) -> &dyn ApplianceApi {
        self.api.as_ref()
    }

    pub fn hasher(&self) -> &dyn ContentHasher {
        self.hasher.as_ref()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}
