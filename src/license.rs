//! License registry.
//!
//! Read/write view of per-account spending limits. The source of truth is
//! the contract; the registry only knows who the owner is.

use tracing::{debug, warn};

use crate::adapters::{ChainAdapter, UnsignedPayload};
use crate::error::{ErrorKind, Result};
use crate::types::Account;

/// Owner-gated access to `licensedLimits`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LicenseRegistry {
    owner: Account,
}

impl LicenseRegistry {
    pub fn new(owner: Account) -> Self {
        Self { owner }
    }

    pub fn owner(&self) -> &Account {
        &self.owner
    }

    /// Local authorization check; no chain call.
    pub fn authorize(&self, caller: &Account) -> Result<()> {
        if caller == &self.owner {
            Ok(())
        } else {
            warn!(caller = %caller, owner = %self.owner, "license update refused");
            Err(ErrorKind::Unauthorized {
                caller: caller.to_string(),
                owner: self.owner.to_string(),
            })
        }
    }

    /// Build the `setLicense` transaction, after checking that `caller` is
    /// the owner.
    pub fn set_limit(
        &self,
        adapter: &dyn ChainAdapter,
        caller: &Account,
        account: &Account,
        limit: u128,
        nonce: u64,
    ) -> Result<UnsignedPayload> {
        self.authorize(caller)?;
        debug!(account = %account, limit, nonce, "building license update");
        Ok(adapter.build_set_license(caller, account, limit, nonce)?)
    }

    /// Current limit of `account`; unknown accounts read as zero.
    pub async fn get_limit(&self, adapter: &dyn ChainAdapter, account: &Account) -> Result<u128> {
        Ok(adapter.read_limit(account).await?)
    }
}
