//! Module dedicated to the bounce mailbox configuration.
//!
//! This module contains the configuration specific to the POP3
//! mailbox the delivery status notifications are collected from.

use std::{fmt, marker::PhantomData, result};

use serde::{de, Deserialize, Deserializer, Serialize};

/// The default POP3 over TLS port.
pub const POP3S_PORT: u16 = 995;

/// The bounce mailbox configuration.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MailboxConfig {
    /// The POP3 server host name.
    pub host: String,

    /// The POP3 server host port.
    pub port: u16,

    /// The POP3 encryption protocol to use.
    ///
    /// Defaults to SSL/TLS, the way mailbox providers usually expose
    /// POP3 on port 995.
    #[serde(default, deserialize_with = "some_bool_or_kind")]
    pub encryption: Option<MailboxEncryptionKind>,

    /// The POP3 server login.
    ///
    /// Usually, the login is either the email address or its left
    /// part (before @).
    pub login: String,

    /// The POP3 server password.
    pub passwd: String,
}

impl MailboxConfig {
    /// Return `true` if the host, login and password are all set.
    pub fn is_complete(&self) -> bool {
        !self.host.is_empty() && !self.login.is_empty() && !self.passwd.is_empty()
    }

    /// Return `true` if TLS is enabled.
    pub fn is_encryption_enabled(&self) -> bool {
        match self.encryption.as_ref() {
            None => true,
            Some(MailboxEncryptionKind::Tls) => true,
            Some(MailboxEncryptionKind::None) => false,
        }
    }
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            host: Default::default(),
            port: POP3S_PORT,
            encryption: Default::default(),
            login: Default::default(),
            passwd: Default::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MailboxEncryptionKind {
    #[default]
    #[serde(alias = "ssl")]
    Tls,
    None,
}

impl fmt::Display for MailboxEncryptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tls => write!(f, "SSL/TLS"),
            Self::None => write!(f, "None"),
        }
    }
}

impl From<bool> for MailboxEncryptionKind {
    fn from(value: bool) -> Self {
        if value {
            Self::Tls
        } else {
            Self::None
        }
    }
}

fn some_bool_or_kind<'de, D>(
    deserializer: D,
) -> result::Result<Option<MailboxEncryptionKind>, D::Error>
where
    D: Deserializer<'de>,
{
    struct SomeBoolOrKind(PhantomData<fn() -> Option<MailboxEncryptionKind>>);

    impl<'de> de::Visitor<'de> for SomeBoolOrKind {
        type Value = Option<MailboxEncryptionKind>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("some or none")
        }

        fn visit_some<D>(self, deserializer: D) -> result::Result<Self::Value, D::Error>
        where
            D: Deserializer<'de>,
        {
            struct BoolOrKind(PhantomData<fn() -> MailboxEncryptionKind>);

            impl<'de> de::Visitor<'de> for BoolOrKind {
                type Value = MailboxEncryptionKind;

                fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                    formatter.write_str("boolean or string")
                }

                fn visit_bool<E>(self, v: bool) -> result::Result<Self::Value, E>
                where
                    E: de::Error,
                {
                    Ok(v.into())
                }

                fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
                where
                    E: de::Error,
                {
                    Deserialize::deserialize(de::value::StrDeserializer::new(v))
                }
            }

            deserializer
                .deserialize_any(BoolOrKind(PhantomData))
                .map(Option::Some)
        }
    }

    deserializer.deserialize_option(SomeBoolOrKind(PhantomData))
}
