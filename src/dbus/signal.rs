//! Scoped one-shot signal waits.

use futures::{StreamExt, stream::BoxStream};
use tracing::{debug, warn};

use super::{
    DbusError, RemoteObject, SharedTransport, Value,
    transport::{MatchRule, SignalEvent},
};

/// Waits for a single signal.
///
/// Installing the wait adds a bus match rule and a local filter. The rule is
/// removed when the wait is closed or dropped, whichever comes first, so a
/// wait that errors or is cancelled never leaves a rule behind.
///
/// ```ignore
/// let mut wait = installer.wait_for("Completed").await?;
/// installer.call("InstallBundle", args).await?;
/// let body = wait.wait_for_signal().await?;
/// wait.close().await?;
/// ```
pub struct SignalWait {
    transport: SharedTransport,
    rule: Option<MatchRule>,
    messages: BoxStream<'static, SignalEvent>,
}

impl SignalWait {
    pub(crate) async fn install(
        object: &RemoteObject,
        interface: &str,
        member: &str,
    ) -> Result<Self, DbusError> {
        object.ensure_connected()?;

        let transport = SharedTransport::clone(object.transport());
        let rule = MatchRule::signal(object.address(), interface, member);
        let messages = transport.signals();
        transport.add_match(&rule).await?;
        debug!("Waiting for {interface}.{member} on {}", object.address());

        Ok(Self {
            transport,
            rule: Some(rule),
            messages,
        })
    }

    /// Suspends until one matching signal arrives and returns its body with
    /// variant wrappers stripped.
    ///
    /// # Errors
    /// Returns `DbusError::NotConnected` if the bus stops delivering messages
    /// or the wait was already closed.
    pub async fn wait_for_signal(&mut self) -> Result<Vec<Value>, DbusError> {
        let Some(rule) = self.rule.as_ref() else {
            return Err(DbusError::NotConnected(String::from("signal wait closed")));
        };

        while let Some(event) = self.messages.next().await {
            match event {
                SignalEvent::Message(message) if rule.matches(&message) => {
                    return Ok(message.body.into_iter().map(Value::strip_variants).collect());
                }
                SignalEvent::Message(_) => {}
                SignalEvent::Lagged(missed) => {
                    warn!("Wait for {}.{} missed {missed} signals", rule.interface, rule.member);
                }
            }
        }

        Err(DbusError::NotConnected(format!(
            "bus closed while waiting for {}.{}",
            rule.interface, rule.member
        )))
    }

    /// Removes the match rule now.
    ///
    /// # Errors
    /// Returns the classified bus error if the rule cannot be removed.
    pub async fn close(mut self) -> Result<(), DbusError> {
        match self.rule.take() {
            Some(rule) => Ok(self.transport.remove_match(&rule).await?),
            None => Ok(()),
        }
    }
}

impl Drop for SignalWait {
    fn drop(&mut self) {
        let Some(rule) = self.rule.take() else {
            return;
        };

        let transport = SharedTransport::clone(&self.transport);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = transport.remove_match(&rule).await {
                        debug!("Failed to remove match {rule}: {err}");
                    }
                });
            }
            Err(_) => warn!("No runtime left to remove match {rule}"),
        }
    }
}
