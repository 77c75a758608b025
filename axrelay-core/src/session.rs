//! Per-appliance session lifecycle.

use tracing::{error, info, warn};

use crate::{
    appliance::{Appliance, SessionToken},
    context::EngineContext,
    error::AuthError,
    types::ApplianceId,
};

/// An appliance that accepted a login for this run.
#[derive(Debug, Clone)]
pub struct ActiveAppliance {
    pub appliance: Appliance,
    pub token: SessionToken,
}

impl ActiveAppliance {
    pub fn id(&self) -> &ApplianceId {
        &self.appliance.id
    }
}

/// Appliances with live sessions, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct AppliancePool {
    members: Vec<ActiveAppliance>,
}

impl AppliancePool {
    pub fn new(members: Vec<ActiveAppliance>) -> Self {
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[ActiveAppliance] {
        &self.members
    }

    pub fn get(&self, index: usize) -> Option<&ActiveAppliance> {
        self.members.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveAppliance> {
        self.members.iter()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionManager<'a> {
    ctx: &'a EngineContext,
}

impl<'a> SessionManager<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    pub async fn open(
        &self,
        appliance: &Appliance,
    ) -> Result<SessionToken, AuthError> {
        self.ctx
            .api()
            .authenticate(appliance, self.ctx.credentials())
            .await
    }

    /// Best-effort logout; failures are logged and swallowed.
    pub async fn close(&self, active: &ActiveAppliance) {
        match self
            .ctx
            .api()
            .end_session(&active.appliance, &active.token)
            .await
        {
            Ok(()) => info!(appliance = %active.appliance.id, "logged out"),
            Err(err) => warn!(
                appliance = %active.appliance.id,
                error = %err,
                "logout failed; session will expire on the appliance"
            ),
        }
    }

    /// Logs in to each appliance in turn. Appliances that refuse are left out
    /// of the pool for the rest of the run.
    pub async fn open_all(&self, appliances: &[Appliance]) -> AppliancePool {
        let mut members = Vec::with_capacity(appliances.len());
        for appliance in appliances {
            match self.open(appliance).await {
                Ok(token) => {
                    info!(
                        appliance = %appliance.id,
                        address = %appliance.address,
                        "session established"
                    );
                    members.push(ActiveAppliance {
                        appliance: appliance.clone(),
                        token,
                    });
                }
                Err(err) => {
                    error!(
                        appliance = %appliance.id,
                        address = %appliance.address,
                        error = %err,
                        "login failed; excluding appliance from this run"
                    );
                }
            }
        }
        AppliancePool::new(members)
    }

    pub async fn close_all(&self, pool: &AppliancePool) {
        for active in pool.iter() {
            self.close(active).await;
        }
    }
}
