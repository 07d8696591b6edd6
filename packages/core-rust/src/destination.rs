//! Destination classification by prefix.
//!
//! Destinations are not stored entities; they are strings classified at
//! routing time against two prefixes. A prefix matches a destination that
//! equals it or continues it with `/`, so `/app` matches `/app/hello` but not
//! `/application`.

use serde::{Deserialize, Serialize};

use crate::error::{PrefixError, RouteError};

/// Where a destination should be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// Handled by an application handler; carries the destination without the prefix.
    Application(&'a str),
    /// Relayed by the broker to subscribers; carries the destination without the prefix.
    Broker(&'a str),
    /// Matches neither prefix.
    Unroutable,
}

/// Classifies `destination` against the application and broker prefixes.
///
/// The application prefix is checked first.
#[must_use]
pub fn classify<'a>(destination: &'a str, app_prefix: &str, broker_prefix: &str) -> Route<'a> {
    if let Some(rest) = strip_prefix(destination, app_prefix) {
        Route::Application(rest)
    } else if let Some(rest) = strip_prefix(destination, broker_prefix) {
        Route::Broker(rest)
    } else {
        Route::Unroutable
    }
}

fn strip_prefix<'a>(destination: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = destination.strip_prefix(prefix.trim_end_matches('/'))?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

/// The two configured destination prefixes.
///
/// Construction guarantees both prefixes are absolute, non-root, and disjoint
/// (neither matches the other).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPrefixes", into = "RawPrefixes")]
pub struct DestinationPrefixes {
    application: String,
    broker: String,
}

#[derive(Serialize, Deserialize)]
struct RawPrefixes {
    application: String,
    broker: String,
}

impl TryFrom<RawPrefixes> for DestinationPrefixes {
    type Error = PrefixError;

    fn try_from(raw: RawPrefixes) -> Result<Self, Self::Error> {
        Self::new(raw.application, raw.broker)
    }
}

impl From<DestinationPrefixes> for RawPrefixes {
    fn from(prefixes: DestinationPrefixes) -> Self {
        Self {
            application: prefixes.application,
            broker: prefixes.broker,
        }
    }
}

impl DestinationPrefixes {
    pub const DEFAULT_APPLICATION: &'static str = "/app";
    pub const DEFAULT_BROKER: &'static str = "/topic";

    /// Validates and normalizes (trailing `/` removed) a prefix pair.
    ///
    /// # Errors
    ///
    /// Returns `PrefixError` if a prefix does not start with `/`, names no
    /// segment, or if the prefixes overlap.
    pub fn new(
        application: impl Into<String>,
        broker: impl Into<String>,
    ) -> Result<Self, PrefixError> {
        let application = normalize(application.into())?;
        let broker = normalize(broker.into())?;

        if strip_prefix(&application, &broker).is_some()
            || strip_prefix(&broker, &application).is_some()
        {
            return Err(PrefixError::Overlapping {
                application,
                broker,
            });
        }

        Ok(Self {
            application,
            broker,
        })
    }

    #[must_use]
    pub fn application(&self) -> &str {
        &self.application
    }

    #[must_use]
    pub fn broker(&self) -> &str {
        &self.broker
    }

    #[must_use]
    pub fn classify<'a>(&self, destination: &'a str) -> Route<'a> {
        classify(destination, &self.application, &self.broker)
    }

    /// Like [`classify`](Self::classify), but reports `Unroutable` as an error.
    ///
    /// # Errors
    ///
    /// Returns `RouteError::Unroutable` if the destination matches neither prefix.
    pub fn route<'a>(&self, destination: &'a str) -> Result<Route<'a>, RouteError> {
        match self.classify(destination) {
            Route::Unroutable => Err(RouteError::Unroutable {
                destination: destination.to_string(),
            }),
            route => Ok(route),
        }
    }

    /// Whether `destination` lies under the broker prefix.
    #[must_use]
    pub fn is_broker_destination(&self, destination: &str) -> bool {
        matches!(self.classify(destination), Route::Broker(_))
    }
}

impl Default for DestinationPrefixes {
    fn default() -> Self {
        Self {
            application: Self::DEFAULT_APPLICATION.to_string(),
            broker: Self::DEFAULT_BROKER.to_string(),
        }
    }
}

fn normalize(prefix: String) -> Result<String, PrefixError> {
    if !prefix.starts_with('/') {
        return Err(PrefixError::NotAbsolute { prefix });
    }
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(PrefixError::Empty { prefix });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_application_destination() {
        assert_eq!(
            classify("/app/hello", "/app", "/topic"),
            Route::Application("hello")
        );
    }

    #[test]
    fn classifies_broker_destination() {
        assert_eq!(classify("/topic/x", "/app", "/topic"), Route::Broker("x"));
    }

    #[test]
    fn classifies_unknown_destination_as_unroutable() {
        assert_eq!(classify("/other", "/app", "/topic"), Route::Unroutable);
    }

    #[test]
    fn prefix_must_end_at_segment_boundary() {
        assert_eq!(classify("/application/x", "/app", "/topic"), Route::Unroutable);
        assert_eq!(classify("/topics", "/app", "/topic"), Route::Unroutable);
    }

    #[test]
    fn bare_prefix_has_empty_rest() {
        assert_eq!(classify("/topic", "/app", "/topic"), Route::Broker(""));
    }

    #[test]
    fn nested_rest_keeps_inner_slashes() {
        assert_eq!(
            classify("/topic/chat/room-1", "/app", "/topic"),
            Route::Broker("chat/room-1")
        );
    }

    #[test]
    fn trailing_slash_in_prefix_is_ignored() {
        assert_eq!(classify("/app/hello", "/app/", "/topic/"), Route::Application("hello"));
    }

    #[test]
    fn defaults_are_app_and_topic() {
        let prefixes = DestinationPrefixes::default();
        assert_eq!(prefixes.application(), "/app");
        assert_eq!(prefixes.broker(), "/topic");
        assert!(prefixes.is_broker_destination("/topic/greetings"));
        assert!(!prefixes.is_broker_destination("/app/hello"));
    }

    #[test]
    fn new_normalizes_trailing_slash() {
        let prefixes = DestinationPrefixes::new("/app/", "/topic").unwrap();
        assert_eq!(prefixes.application(), "/app");
    }

    #[test]
    fn new_rejects_invalid_prefixes() {
        assert!(matches!(
            DestinationPrefixes::new("app", "/topic"),
            Err(PrefixError::NotAbsolute { .. })
        ));
        assert!(matches!(
            DestinationPrefixes::new("/", "/topic"),
            Err(PrefixError::Empty { .. })
        ));
        assert!(matches!(
            DestinationPrefixes::new("/app", "/app/topic"),
            Err(PrefixError::Overlapping { .. })
        ));
        assert!(matches!(
            DestinationPrefixes::new("/topic", "/topic"),
            Err(PrefixError::Overlapping { .. })
        ));
    }

    #[test]
    fn similar_but_disjoint_prefixes_are_allowed() {
        let prefixes = DestinationPrefixes::new("/app", "/application").unwrap();
        assert_eq!(prefixes.classify("/application/x"), Route::Broker("x"));
    }

    #[test]
    fn route_reports_unroutable() {
        let prefixes = DestinationPrefixes::default();
        let err = prefixes.route("/queue/x").unwrap_err();
        assert_eq!(
            err,
            RouteError::Unroutable {
                destination: "/queue/x".to_string()
            }
        );
        assert_eq!(prefixes.route("/app/a"), Ok(Route::Application("a")));
    }

    #[test]
    fn deserialization_validates() {
        let ok: DestinationPrefixes =
            serde_json::from_str(r#"{"application":"/app","broker":"/topic"}"#).unwrap();
        assert_eq!(ok, DestinationPrefixes::default());

        let bad = serde_json::from_str::<DestinationPrefixes>(
            r#"{"application":"/app","broker":"/app"}"#,
        );
        assert!(bad.is_err());
    }
}
