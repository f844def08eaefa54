// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Subscriptions
//!
//! Binding of application sessions to this client. The REST side of a bind
//! is delegated to a [`SessionBinder`]; the bind completes when the server
//! confirms it with a `subscription_complete` command.

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use tokio::sync::oneshot;

use crate::network::SignalError;

/// Arguments of a bind or unbind call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    /// Session key issued by the REST login.
    pub session_key: String,
    /// Subscription to bind.
    pub subscription_id: String,
    /// Client id the session is bound to.
    pub client_id: String,
    /// Channels the subscription covers.
    pub channels: Vec<String>,
}

/// Performs the request/response side of session binding.
pub trait SessionBinder: Send + Sync {
    /// Asks the server to bind a session to the client.
    fn bind(&self, request: BindRequest) -> BoxFuture<'static, Result<(), SignalError>>;

    /// Asks the server to release a binding.
    fn unbind(&self, request: BindRequest) -> BoxFuture<'static, Result<(), SignalError>>;
}

/// One logical subscription of a session to a set of channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Session key.
    pub session_key: String,
    /// Client id at bind time.
    pub client_id: String,
    /// Subscription id.
    pub subscription_id: String,
    /// Channels covered.
    pub channels: Vec<String>,
    /// Set once the server confirmed the bind.
    pub bound: bool,
}

impl Subscription {
    /// The request that binds or unbinds this subscription.
    pub fn request(&self) -> BindRequest {
        BindRequest {
            session_key: self.session_key.clone(),
            subscription_id: self.subscription_id.clone(),
            client_id: self.client_id.clone(),
            channels: self.channels.clone(),
        }
    }
}

struct Entry {
    subscription: Subscription,
    pending: Option<oneshot::Sender<()>>,
}

/// Subscriptions keyed by id, with the bind futures still waiting on a
/// server confirmation.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: HashMap<String, Entry>,
}

impl SubscriptionRegistry {
    /// Registers `subscription` and returns the receiver resolved on
    /// confirmation. Replaces an earlier entry with the same id, which
    /// cancels its pending bind.
    pub(crate) fn insert(&mut self, subscription: Subscription) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            subscription.subscription_id.clone(),
            Entry {
                subscription,
                pending: Some(tx),
            },
        );
        rx
    }

    /// Marks a subscription bound and resolves its pending bind.
    pub(crate) fn complete(&mut self, subscription_id: &str) -> bool {
        let Some(entry) = self.entries.get_mut(subscription_id) else {
            return false;
        };
        entry.subscription.bound = true;
        if let Some(pending) = entry.pending.take() {
            let _ = pending.send(());
        }
        true
    }

    /// Cancels a pending bind. Returns the subscription, if known.
    pub(crate) fn cancel_pending(&mut self, subscription_id: &str) -> Option<Subscription> {
        let entry = self.entries.get_mut(subscription_id)?;
        entry.pending.take();
        Some(entry.subscription.clone())
    }

    pub(crate) fn remove(&mut self, subscription_id: &str) -> Option<Subscription> {
        self.entries
            .remove(subscription_id)
            .map(|entry| entry.subscription)
    }

    pub(crate) fn get(&self, subscription_id: &str) -> Option<Subscription> {
        self.entries
            .get(subscription_id)
            .map(|entry| entry.subscription.clone())
    }

    pub(crate) fn list(&self) -> Vec<Subscription> {
        self.entries
            .values()
            .map(|entry| entry.subscription.clone())
            .collect()
    }

    /// Drops every subscription, cancelling pending binds.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
