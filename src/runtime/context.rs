//! Orchestrator context.
//!
//! Holds one binding per chain: the adapter, the operator signing key and
//! the license registry. Built once and shared by every request; there is
//! no ambient global state.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::adapters::{ChainAAdapter, ChainAdapter, ChainBAdapter, NodeTransport};
use crate::config::{OrchestratorConfig, RetryPolicy};
use crate::error::{AdapterError, ErrorKind, Result};
use crate::keys::OperatorKey;
use crate::license::LicenseRegistry;
use crate::types::{standard_interface, Account, Deployment, Network};

/// Everything needed to act on one chain.
pub struct ChainBinding {
    pub adapter: Arc<dyn ChainAdapter>,
    pub key: OperatorKey,
    /// Account controlled by `key`.
    pub operator: Account,
    pub registry: LicenseRegistry,
}

enum ChainSlot {
    Ready(ChainBinding),
    /// Recognized chain that cannot be used; carries operator guidance.
    Unavailable(String),
}

/// Adapters and key handles, one per configured chain.
#[derive(Default)]
pub struct OrchestratorContext {
    chains: BTreeMap<Network, ChainSlot>,
}

impl OrchestratorContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an already-constructed adapter.
    ///
    /// `owner` is the contract owner as recorded by the deployment; when
    /// absent the operator account is assumed to be the owner.
    pub fn bind(
        &mut self,
        adapter: Arc<dyn ChainAdapter>,
        key: OperatorKey,
        owner: Option<&str>,
    ) -> Result<&mut Self> {
        let network = adapter.network();
        let operator = adapter.account_of(&key);
        let owner = match owner {
            Some(raw) => adapter.normalize(raw)?,
            None => operator.clone(),
        };
        if owner != operator {
            warn!(%network, operator = %operator, owner = %owner, "operator key is not the contract owner");
        }
        info!(%network, operator = %operator, "chain bound");

        self.chains.insert(
            network,
            ChainSlot::Ready(ChainBinding {
                adapter,
                key,
                operator,
                registry: LicenseRegistry::new(owner),
            }),
        );
        Ok(self)
    }

    /// Construct the adapter for `deployment` and bind it.
    ///
    /// A deployment path this tool cannot serve is recorded as unavailable
    /// rather than failing the whole context, so the other chain keeps
    /// working and requests for this one fail fast with guidance.
    pub fn bind_deployment(
        &mut self,
        deployment: &Deployment,
        transport: Arc<dyn NodeTransport>,
        key: OperatorKey,
        retry: &RetryPolicy,
    ) -> Result<&mut Self> {
        let poll = retry.poll_interval();
        let adapter: std::result::Result<Arc<dyn ChainAdapter>, AdapterError> =
            match deployment.network {
                Network::ChainA => ChainAAdapter::new(deployment, transport)
                    .map(|a| Arc::new(a.with_poll_interval(poll)) as Arc<dyn ChainAdapter>),
                Network::ChainB => ChainBAdapter::new(deployment, transport)
                    .map(|a| Arc::new(a.with_poll_interval(poll)) as Arc<dyn ChainAdapter>),
            };

        match adapter {
            Ok(adapter) => self.bind(adapter, key, deployment.owner.as_deref()),
            Err(AdapterError::NotImplemented(guidance)) => {
                warn!(network = %deployment.network, %guidance, "chain unavailable");
                self.chains
                    .insert(deployment.network, ChainSlot::Unavailable(guidance));
                Ok(self)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Build a context from configuration, one transport per configured
    /// chain. Chains without a transport are skipped.
    pub fn from_config(
        config: &OrchestratorConfig,
        transports: &BTreeMap<Network, Arc<dyn NodeTransport>>,
    ) -> Result<Self> {
        let mut context = Self::new();
        for (network, settings) in &config.chains {
            let Some(transport) = transports.get(network) else {
                warn!(%network, rpc_url = %settings.rpc_url, "no transport for configured chain");
                continue;
            };
            if settings.signing_key.is_empty() {
                return Err(ErrorKind::Signing(format!("no signing key configured for {}", network)));
            }
            let key = OperatorKey::from_hex(settings.signing_key.expose())?;
            let deployment = Deployment {
                network: *network,
                contract_address: settings.contract_address.clone(),
                owner: settings.owner.clone(),
                interface: standard_interface(),
            };
            context.bind_deployment(&deployment, transport.clone(), key, &config.retry)?;
        }
        Ok(context)
    }

    /// Resolve the binding for `network`.
    pub fn binding(&self, network: Network) -> Result<&ChainBinding> {
        match self.chains.get(&network) {
            Some(ChainSlot::Ready(binding)) => Ok(binding),
            Some(ChainSlot::Unavailable(guidance)) => Err(ErrorKind::NotImplemented(guidance.clone())),
            None => Err(ErrorKind::UnsupportedNetwork(network.to_string())),
        }
    }

    /// Connectivity check: query each bound chain's clock.
    pub async fn probe(&self) -> Vec<(Network, Result<u64>)> {
        let mut results = Vec::new();
        for (network, slot) in &self.chains {
            let outcome = match slot {
                ChainSlot::Ready(binding) => binding
                    .adapter
                    .query_state(&[])
                    .await
                    .map(|state| state.now)
                    .map_err(ErrorKind::from),
                ChainSlot::Unavailable(guidance) => Err(ErrorKind::NotImplemented(guidance.clone())),
            };
            results.push((*network, outcome));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimulatedNode;

    fn key() -> OperatorKey {
        OperatorKey::from_bytes(&[3u8; 32]).unwrap()
    }

    #[test]
    fn test_unbound_network_is_unsupported() {
        let context = OrchestratorContext::new();
        assert_eq!(
            context.binding(Network::ChainA).err(),
            Some(ErrorKind::UnsupportedNetwork("chain-a".into()))
        );
    }

    #[test]
    fn test_undeployed_chain_b_is_not_implemented() {
        let mut context = OrchestratorContext::new();
        let deployment = Deployment {
            network: Network::ChainB,
            contract_address: None,
            owner: None,
            interface: standard_interface(),
        };
        context
            .bind_deployment(
                &deployment,
                Arc::new(SimulatedNode::new(0, 10)),
                key(),
                &RetryPolicy::default(),
            )
            .unwrap();
        assert!(matches!(
            context.binding(Network::ChainB).err(),
            Some(ErrorKind::NotImplemented(_))
        ));
    }

    #[test]
    fn test_owner_defaults_to_operator() {
        let mut context = OrchestratorContext::new();
        let deployment = Deployment {
            network: Network::ChainA,
            contract_address: Some(format!("0x{}", hex::encode([0xAB; 20]))),
            owner: None,
            interface: standard_interface(),
        };
        context
            .bind_deployment(
                &deployment,
                Arc::new(SimulatedNode::new(0, 10)),
                key(),
                &RetryPolicy::default(),
            )
            .unwrap();
        let binding = context.binding(Network::ChainA).unwrap();
        assert_eq!(binding.registry.owner(), &binding.operator);
    }

    #[tokio::test]
    async fn test_probe_reports_clock() {
        let mut context = OrchestratorContext::new();
        let deployment = Deployment {
            network: Network::ChainA,
            contract_address: Some(format!("0x{}", hex::encode([0xAB; 20]))),
            owner: None,
            interface: standard_interface(),
        };
        context
            .bind_deployment(
                &deployment,
                Arc::new(SimulatedNode::new(1_234, 10_000)),
                key(),
                &RetryPolicy::default(),
            )
            .unwrap();
        let results = context.probe().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, Ok(1_234));
    }
}
