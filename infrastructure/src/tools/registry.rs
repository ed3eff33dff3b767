//! Provider Registry
//!
//! The [`ProviderRegistry`] owns every configured [`ToolProvider`], tracks
//! its lifecycle state and implements the [`ToolGateway`] port.
//!
//! # Usage
//!
//! ```ignore
//! use pentree_infrastructure::tools::{McpToolProvider, ProviderRegistry};
//!
//! let registry = ProviderRegistry::new(settings)
//!     .register(McpToolProvider::new(ProviderId::new("kali"), transport));
//!
//! let report = registry.connect_all().await;
//! let keepalive = Arc::new(registry).spawn_keepalive(interval, cancel.clone());
//! ```
//!
//! # Lifecycle
//!
//! | From | Event | To |
//! |------|-------|----|
//! | Disconnected | connect + discovery succeeded | Ready |
//! | Disconnected | every connect attempt failed | Dead |
//! | Ready | one timeout / failed keep-alive | Degraded |
//! | Degraded | successful invocation or keep-alive | Ready |
//! | Degraded | failed re-probe / keep-alive | Dead |
//! | any live | transport closed, protocol violation, too many timeouts | Dead |
//!
//! Dead is final for the run. Capabilities are discovered once per session
//! and cleared whenever the provider (re)connects or dies.
//!
//! The registry owns the invocation deadline: a Degraded provider's re-probe
//! and the call itself share one `timeout`. An invocation whose future is
//! dropped before it finishes still counts as a timeout.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use pentree_application::ports::tool_gateway::{InvocationError, ToolGateway};
use pentree_domain::{ProviderError, ProviderId, ProviderState, ToolCapability, ToolProvider};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection and health-check settings shared by all providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    /// Bound on one connect + discovery attempt
    pub connect_timeout: Duration,
    pub connect_attempts: usize,
    /// Consecutive invocation timeouts after which a provider is Dead
    pub max_consecutive_timeouts: usize,
    pub ping_timeout: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            connect_attempts: 2,
            max_consecutive_timeouts: 3,
            ping_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of [`ProviderRegistry::connect_all`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConnectReport {
    /// Providers that came up, with their capability count
    pub connected: Vec<(ProviderId, usize)>,
    /// Providers that stayed down, with the last error
    pub failed: Vec<(ProviderId, String)>,
}

impl ConnectReport {
    pub fn any_connected(&self) -> bool {
        !self.connected.is_empty()
    }
}

#[derive(Debug)]
struct SlotHealth {
    state: ProviderState,
    capabilities: Vec<ToolCapability>,
    consecutive_timeouts: usize,
}

struct ProviderSlot {
    provider: Arc<dyn ToolProvider>,
    health: StdMutex<SlotHealth>,
}

impl ProviderSlot {
    fn id(&self) -> &ProviderId {
        self.provider.id()
    }

    fn health(&self) -> std::sync::MutexGuard<'_, SlotHealth> {
        self.health.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> ProviderState {
        self.health().state
    }

    fn set_state(&self, state: ProviderState) {
        let mut health = self.health();
        if health.state != state {
            debug!(provider = %self.id(), from = %health.state, to = %state, "Provider state change");
            health.state = state;
        }
    }

    /// Ready or Degraded after a successful probe.
    fn recover(&self) {
        let mut health = self.health();
        health.consecutive_timeouts = 0;
        if health.state == ProviderState::Degraded {
            info!(provider = %self.id(), "Provider recovered");
            health.state = ProviderState::Ready;
        }
    }

    fn degrade(&self, reason: &str) {
        let mut health = self.health();
        if health.state == ProviderState::Ready {
            warn!(provider = %self.id(), reason, "Provider degraded");
            health.state = ProviderState::Degraded;
        }
    }

    /// Returns false when the slot was already Dead.
    fn mark_dead(&self, reason: &str) -> bool {
        let mut health = self.health();
        if health.state == ProviderState::Dead {
            return false;
        }
        warn!(provider = %self.id(), reason, "Provider dead for the rest of the run");
        health.state = ProviderState::Dead;
        health.capabilities.clear();
        true
    }

    async fn kill(&self, reason: &str) {
        if self.mark_dead(reason) {
            self.provider.shutdown().await;
        }
    }

    /// Counts one invocation timeout. Returns true when it made the slot Dead.
    fn record_timeout(&self, max_consecutive: usize) -> bool {
        let timeouts = {
            let mut health = self.health();
            health.consecutive_timeouts += 1;
            health.consecutive_timeouts
        };
        if timeouts >= max_consecutive {
            self.mark_dead(&format!("{timeouts} consecutive timeouts"))
        } else {
            self.degrade("invocation timed out");
            false
        }
    }
}

/// An invocation that has been handed to a provider.
///
/// If it is dropped before [`finish`](Self::finish), the caller gave up on
/// it: the timeout is recorded on the spot and the provider is told to
/// cancel from a spawned task.
struct InFlight<'a> {
    slot: &'a ProviderSlot,
    max_consecutive_timeouts: usize,
    done: bool,
}

impl<'a> InFlight<'a> {
    fn new(slot: &'a ProviderSlot, max_consecutive_timeouts: usize) -> Self {
        Self {
            slot,
            max_consecutive_timeouts,
            done: false,
        }
    }

    fn finish(mut self) {
        self.done = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        debug!(provider = %self.slot.id(), "Invocation abandoned before completion");
        let died = self.slot.record_timeout(self.max_consecutive_timeouts);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let provider = Arc::clone(&self.slot.provider);
        runtime.spawn(async move {
            provider.cancel_in_flight().await;
            if died {
                provider.shutdown().await;
            }
        });
    }
}

/// Registry of tool providers, implementing [`ToolGateway`].
pub struct ProviderRegistry {
    slots: Vec<ProviderSlot>,
    settings: RegistrySettings,
}

impl ProviderRegistry {
    pub fn new(settings: RegistrySettings) -> Self {
        Self {
            slots: Vec::new(),
            settings,
        }
    }

    /// Register a provider; duplicate ids are ignored.
    pub fn register<P: ToolProvider + 'static>(self, provider: P) -> Self {
        self.register_arc(Arc::new(provider))
    }

    /// Register a provider (Arc version)
    pub fn register_arc(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        if self.slots.iter().any(|s| s.id() == provider.id()) {
            warn!(provider = %provider.id(), "Duplicate provider id, ignoring");
            return self;
        }
        self.slots.push(ProviderSlot {
            provider,
            health: StdMutex::new(SlotHealth {
                state: ProviderState::Disconnected,
                capabilities: Vec::new(),
                consecutive_timeouts: 0,
            }),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    fn slot(&self, id: &ProviderId) -> Option<&ProviderSlot> {
        self.slots.iter().find(|s| s.id() == id)
    }

    /// Connect and discover every provider concurrently.
    pub async fn connect_all(&self) -> ConnectReport {
        let results = join_all(self.slots.iter().map(|slot| self.connect_slot(slot))).await;

        let mut report = ConnectReport::default();
        for (slot, result) in self.slots.iter().zip(results) {
            match result {
                Ok(count) => report.connected.push((slot.id().clone(), count)),
                Err(reason) => report.failed.push((slot.id().clone(), reason)),
            }
        }
        info!(
            connected = report.connected.len(),
            failed = report.failed.len(),
            "Tool providers connected"
        );
        report
    }

    async fn connect_slot(&self, slot: &ProviderSlot) -> Result<usize, String> {
        {
            let mut health = slot.health();
            health.state = ProviderState::Connecting;
            health.capabilities.clear();
            health.consecutive_timeouts = 0;
        }

        let attempts = self.settings.connect_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            let session = async {
                slot.provider.connect().await?;
                slot.provider.list_capabilities().await
            };
            match tokio::time::timeout(self.settings.connect_timeout, session).await {
                Ok(Ok(capabilities)) => {
                    let count = capabilities.len();
                    {
                        let mut health = slot.health();
                        health.state = ProviderState::Ready;
                        health.capabilities = capabilities;
                    }
                    info!(provider = %slot.id(), capabilities = count, attempt, "Provider ready");
                    return Ok(count);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("connect timed out after {:?}", self.settings.connect_timeout)
                }
            }
            warn!(
                provider = %slot.id(),
                attempt,
                attempts,
                error = %last_error,
                "Provider connect failed"
            );
        }

        slot.kill(&last_error).await;
        Err(last_error)
    }

    /// Ping every live provider once, concurrently.
    pub async fn keepalive_once(&self) {
        let live = self.slots.iter().filter(|s| s.state().is_live());
        join_all(live.map(|slot| async move {
            match tokio::time::timeout(self.settings.ping_timeout, slot.provider.ping()).await {
                Ok(Ok(())) => slot.recover(),
                Ok(Err(e)) if e.is_fatal_for_provider() => slot.kill(&e.to_string()).await,
                failure => {
                    let reason = match failure {
                        Ok(Err(e)) => e.to_string(),
                        _ => "keep-alive timed out".to_string(),
                    };
                    if slot.state() == ProviderState::Degraded {
                        slot.kill(&reason).await;
                    } else {
                        slot.degrade(&reason);
                    }
                }
            }
        }))
        .await;
    }

    /// Run [`keepalive_once`](Self::keepalive_once) every `interval` until
    /// `cancel` fires.
    pub fn spawn_keepalive(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => registry.keepalive_once().await,
                }
            }
            debug!("Keep-alive stopped");
        })
    }

    /// Shut down every session. Live providers end up Disconnected.
    pub async fn shutdown_all(&self) {
        join_all(self.slots.iter().map(|slot| async move {
            slot.provider.shutdown().await;
            if slot.state() != ProviderState::Dead {
                slot.set_state(ProviderState::Disconnected);
            }
        }))
        .await;
    }

    /// Re-probe a Degraded provider within what is left of `deadline`.
    async fn reprobe(&self, slot: &ProviderSlot, deadline: Instant) -> Reprobe {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let budget = self.settings.ping_timeout.min(remaining);
        match tokio::time::timeout(budget, slot.provider.ping()).await {
            Ok(Ok(())) => Reprobe::Alive,
            Ok(Err(e)) => Reprobe::Failed(e.to_string()),
            Err(_) if budget < self.settings.ping_timeout => Reprobe::OutOfTime,
            Err(_) => Reprobe::Failed("re-probe timed out".to_string()),
        }
    }

    /// Timeout bookkeeping after the deadline passed while we were still waiting.
    async fn timed_out(&self, slot: &ProviderSlot, timeout: Duration) -> InvocationError {
        let died = slot.record_timeout(self.settings.max_consecutive_timeouts);
        slot.provider.cancel_in_flight().await;
        if died {
            slot.provider.shutdown().await;
        }
        InvocationError::Timeout(timeout)
    }
}

enum Reprobe {
    Alive,
    Failed(String),
    /// The invocation deadline ran out before the ping answered
    OutOfTime,
}

#[async_trait]
impl ToolGateway for ProviderRegistry {
    fn catalog(&self) -> Vec<ToolCapability> {
        self.slots
            .iter()
            .flat_map(|slot| {
                let health = slot.health();
                if health.state.is_live() {
                    health.capabilities.clone()
                } else {
                    Vec::new()
                }
            })
            .collect()
    }

    fn provider_states(&self) -> Vec<(ProviderId, ProviderState)> {
        self.slots
            .iter()
            .map(|slot| (slot.id().clone(), slot.state()))
            .collect()
    }

    async fn invoke(
        &self,
        provider: &ProviderId,
        capability: &str,
        parameters: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<String, InvocationError> {
        let deadline = Instant::now() + timeout;
        let Some(slot) = self.slot(provider) else {
            return Err(InvocationError::ProviderUnavailable(format!(
                "unknown provider {provider}"
            )));
        };

        match slot.state() {
            ProviderState::Ready => {}
            ProviderState::Degraded => match self.reprobe(slot, deadline).await {
                Reprobe::Alive => {}
                Reprobe::OutOfTime => return Err(self.timed_out(slot, timeout).await),
                Reprobe::Failed(reason) => {
                    slot.kill(&reason).await;
                    return Err(InvocationError::ProviderUnavailable(format!(
                        "{provider} failed re-probe: {reason}"
                    )));
                }
            },
            state => {
                return Err(InvocationError::ProviderUnavailable(format!(
                    "{provider} is {state}"
                )));
            }
        }

        debug!(provider = %provider, capability, "Dispatching invocation");
        let in_flight = InFlight::new(slot, self.settings.max_consecutive_timeouts);
        let outcome =
            tokio::time::timeout_at(deadline, slot.provider.invoke(capability, parameters)).await;
        in_flight.finish();

        match outcome {
            Ok(Ok(output)) => {
                slot.recover();
                Ok(output)
            }
            Ok(Err(e)) if e.is_fatal_for_provider() => {
                slot.kill(&e.to_string()).await;
                Err(InvocationError::ProviderUnavailable(format!(
                    "{provider} failed during {capability}: {e}"
                )))
            }
            Ok(Err(e)) => {
                // The provider answered, so it is alive.
                slot.recover();
                Err(match e {
                    ProviderError::ToolFailed(detail) => InvocationError::ToolFailed(detail),
                    other => InvocationError::ToolFailed(other.to_string()),
                })
            }
            Err(_) => Err(self.timed_out(slot, timeout).await),
        }
    }
}
