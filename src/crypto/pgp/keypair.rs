//! Entry point for turning engine output into key bundles.

use crate::config::PgpConfig;
use crate::crypto::pgp::bundle::KeyBundle;
use crate::crypto::pgp::engine::PgpEngine;
use crate::crypto::pgp::entity::Entity;
use crate::crypto::pgp::rpgp_engine::RpgpEngine;
use std::fmt;
use std::sync::Arc;

/// Shared handle on the OpenPGP engine and the key-handling configuration.
///
/// Every `KeyBundle` keeps an `Arc` back to the manager that created it so
/// it can serialize, sign and re-decode itself later.
pub struct PgpKeyManager {
    engine: Arc<dyn PgpEngine>,
    config: PgpConfig,
}

impl PgpKeyManager {
    pub fn new(engine: Arc<dyn PgpEngine>) -> Arc<Self> {
        Self::with_config(engine, PgpConfig::default())
    }

    /// Manager over the rPGP engine.
    pub fn with_rpgp(config: PgpConfig) -> Arc<Self> {
        Self::with_config(Arc::new(RpgpEngine::new()), config)
    }

    /// Build a manager from a hand-assembled config. Settings that would
    /// make the unlock loop or the gpg fallback unusable are replaced with
    /// their defaults.
    pub fn with_config(engine: Arc<dyn PgpEngine>, mut config: PgpConfig) -> Arc<Self> {
        if config.unlock_attempts == 0 {
            log::warn!("unlock_attempts of 0 would never prompt; using 1");
            config.unlock_attempts = 1;
        }
        if config.gpg_program.trim().is_empty() {
            log::warn!("Blank gpg_program; using the default");
            config.gpg_program = PgpConfig::default().gpg_program;
        }
        log::debug!(
            "PGP key manager ready (unlock attempts: {}, gpg: {})",
            config.unlock_attempts,
            config.gpg_program
        );
        Arc::new(Self { engine, config })
    }

    pub fn engine(&self) -> &dyn PgpEngine {
        self.engine.as_ref()
    }

    pub fn config(&self) -> &PgpConfig {
        &self.config
    }

    /// Wrap an already decoded entity imported from elsewhere.
    pub fn bundle(self: &Arc<Self>, entity: Entity) -> KeyBundle {
        KeyBundle::new(Arc::clone(self), entity)
    }

    /// Wrap an entity this platform just generated.
    pub fn generated_bundle(self: &Arc<Self>, entity: Entity) -> KeyBundle {
        KeyBundle::new_generated(Arc::clone(self), entity)
    }
}

impl fmt::Debug for PgpKeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgpKeyManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
