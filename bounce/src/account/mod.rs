//! # Account configuration
//!
//! Module dedicated to account configuration.
//!
//! This module contains the representation of the user's current
//! account configuration named [`AccountConfig`].

use serde::{Deserialize, Serialize};

use crate::mailbox::config::MailboxConfig;

/// The user's account configuration.
///
/// It represents everything that the user can customize for a given
/// account. The account name is used as an unique identifier for a
/// given configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AccountConfig {
    /// The name of the user account.
    ///
    /// The account name is used as an unique identifier for a given
    /// configuration, and keys the reconciliation lock file.
    pub name: String,

    /// The bounce mailbox configuration.
    ///
    /// When the configuration is missing or incomplete, the
    /// reconciliation pass is skipped rather than failed: the account
    /// simply has no bounce mailbox to reconcile from.
    pub mailbox: Option<MailboxConfig>,
}

impl AccountConfig {
    /// Find the bounce mailbox configuration, if complete.
    ///
    /// Returns `None` when the configuration is absent or when any of
    /// the host, login or password is empty.
    pub fn find_mailbox_config(&self) -> Option<&MailboxConfig> {
        self.mailbox.as_ref().filter(|config| config.is_complete())
    }
}
