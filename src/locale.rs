//! Locale selection for user-visible error messages.
//!
//! Messages surfaced to users (error displays) are rendered in one of the
//! supported locales. The default locale is a process-wide setting,
//! typically installed once at startup from [`MuxConfig::apply`].
//!
//! [`MuxConfig::apply`]: crate::config::MuxConfig::apply

use crate::error::ErrorKind;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

/// A supported message locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Locale {
    /// English (default).
    #[default]
    En,
    /// German.
    De,
}

impl Locale {
    /// Returns the BCP 47 language tag for this locale.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::De => "de",
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::De,
            _ => Self::En,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::En => 0,
            Self::De => 1,
        }
    }
}

impl std::fmt::Display for Locale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for Locale {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept full tags such as "en-US" by matching the language subtag.
        let lang = s.split(['-', '_']).next().unwrap_or(s);
        match lang.to_ascii_lowercase().as_str() {
            "en" => Ok(Self::En),
            "de" => Ok(Self::De),
            _ => Err(()),
        }
    }
}

static DEFAULT_LOCALE: AtomicU8 = AtomicU8::new(0);

/// Installs the process-wide default locale.
pub fn set_default_locale(locale: Locale) {
    DEFAULT_LOCALE.store(locale.as_u8(), Ordering::Release);
}

/// Returns the process-wide default locale.
#[must_use]
pub fn default_locale() -> Locale {
    Locale::from_u8(DEFAULT_LOCALE.load(Ordering::Acquire))
}

/// Returns the base message for an error kind in the given locale.
#[must_use]
pub(crate) fn kind_message(kind: ErrorKind, locale: Locale) -> &'static str {
    match locale {
        Locale::En => match kind {
            ErrorKind::Escalation => {
                "exclusive acquisition inside a shared critical section on the same lock"
            }
            ErrorKind::Cancelled => "acquisition cancelled",
            ErrorKind::Instrumentation => "lock context could not be attached to the owner",
            ErrorKind::InvariantViolated => "internal lock-queue invariant violated",
            ErrorKind::WouldWait => "lock is busy, acquisition would wait",
            ErrorKind::ConfigError => "invalid configuration",
            ErrorKind::User => "operation failed",
        },
        Locale::De => match kind {
            ErrorKind::Escalation => {
                "exklusive Anforderung innerhalb eines geteilten kritischen Abschnitts derselben Sperre"
            }
            ErrorKind::Cancelled => "Anforderung abgebrochen",
            ErrorKind::Instrumentation => {
                "Sperrkontext konnte nicht an den Eigentümer angehängt werden"
            }
            ErrorKind::InvariantViolated => "interne Invariante der Sperrwarteschlange verletzt",
            ErrorKind::WouldWait => "Sperre ist belegt, Anforderung würde warten",
            ErrorKind::ConfigError => "ungültige Konfiguration",
            ErrorKind::User => "Vorgang fehlgeschlagen",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_language_subtags() {
        assert_eq!("en".parse(), Ok(Locale::En));
        assert_eq!("en-US".parse(), Ok(Locale::En));
        assert_eq!("de_DE".parse(), Ok(Locale::De));
        assert_eq!("DE".parse(), Ok(Locale::De));
        assert!("fr".parse::<Locale>().is_err());
    }

    #[test]
    fn default_locale_round_trips() {
        set_default_locale(Locale::De);
        assert_eq!(default_locale(), Locale::De);
        set_default_locale(Locale::En);
        assert_eq!(default_locale(), Locale::En);
    }

    #[test]
    fn every_kind_has_a_message_in_every_locale() {
        for kind in [
            ErrorKind::Escalation,
            ErrorKind::Cancelled,
            ErrorKind::Instrumentation,
            ErrorKind::InvariantViolated,
            ErrorKind::WouldWait,
            ErrorKind::ConfigError,
            ErrorKind::User,
        ] {
            for locale in [Locale::En, Locale::De] {
                assert!(!kind_message(kind, locale).is_empty(), "{kind:?}/{locale}");
            }
        }
    }

    #[test]
    fn tag_display() {
        assert_eq!(Locale::En.to_string(), "en");
        assert_eq!(Locale::De.to_string(), "de");
    }
}
