use std::{
    fmt::Display,
    sync::LazyLock,
};

use regex::Regex;
use serde::{
    Deserialize,
    Serialize,
};
use thiserror::Error;

/// Error for an invalid URI.
#[derive(Debug, Error)]
#[error("invalid URI: {0:?}")]
pub struct InvalidUri(String);

/// Validates a URI with the loose rules: non-empty components separated by single dots, none
/// containing whitespace or `#`.
///
/// Case and punctuation are left to applications, so `com.example.onHello` and `com.my-app.topic`
/// are both valid.
fn validate_uri(uri: &str) -> Result<(), InvalidUri> {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        // Static pattern, known to compile.
        Regex::new(r"^([^\s\.#]+\.)*([^\s\.#]+)$").unwrap()
    });
    if !RE.is_match(uri) {
        return Err(InvalidUri(uri.to_owned()));
    }
    Ok(())
}

/// A uniform resource identifier, used for identifying realms, topics, procedures, and errors.
///
/// Checked on construction and when read off the wire.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uri(String);

impl Uri {
    /// Constructs a URI directly from a value known to be valid, skipping validation.
    pub(crate) fn from_known<S>(value: S) -> Self
    where
        S: Into<String>,
    {
        Self(value.into())
    }

    /// The URI for a standard WAMP error.
    pub fn for_wamp_error(component: &str) -> Self {
        Self::from_known(format!("wamp.error.{component}"))
    }
}

impl Display for Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for Uri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Uri {
    type Error = InvalidUri;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_uri(&value)?;
        Ok(Self(value))
    }
}

impl TryFrom<&str> for Uri {
    type Error = InvalidUri;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        validate_uri(value)?;
        Ok(Self(value.to_owned()))
    }
}

impl From<Uri> for String {
    fn from(value: Uri) -> Self {
        value.0
    }
}

#[cfg(test)]
mod uri_test {
    use crate::core::uri::Uri;

    #[test]
    fn accepts_loose_uris() {
        assert_matches::assert_matches!(Uri::try_from("realm1"), Ok(_));
        assert_matches::assert_matches!(Uri::try_from("com.example.add2"), Ok(uri) => {
            assert_eq!(uri.as_ref(), "com.example.add2");
        });
        assert_matches::assert_matches!(Uri::try_from("wamp.error.no_such_procedure"), Ok(_));
        assert_matches::assert_matches!(Uri::try_from("com.example.onHello"), Ok(uri) => {
            assert_eq!(uri.to_string(), "com.example.onHello");
        });
        assert_matches::assert_matches!(Uri::try_from("com.my-app.topic"), Ok(_));
        assert_matches::assert_matches!(Uri::try_from("Com.Example"), Ok(_));
    }

    #[test]
    fn rejects_invalid_uris() {
        assert_matches::assert_matches!(Uri::try_from(""), Err(_));
        assert_matches::assert_matches!(Uri::try_from("com..example"), Err(_));
        assert_matches::assert_matches!(Uri::try_from("com.example."), Err(_));
        assert_matches::assert_matches!(Uri::try_from(".com.example"), Err(_));
        assert_matches::assert_matches!(Uri::try_from("com.example onhello"), Err(_));
        assert_matches::assert_matches!(Uri::try_from("com.example\tonhello"), Err(_));
        assert_matches::assert_matches!(Uri::try_from("com.#.x"), Err(_));
    }

    #[test]
    fn deserialization_validates_uri() {
        assert_matches::assert_matches!(serde_json::from_str::<Uri>(r#""com.example.onCounter""#), Ok(_));
        assert_matches::assert_matches!(serde_json::from_str::<Uri>(r#""com.example.""#), Err(err) => {
            assert!(err.to_string().contains(r#"invalid URI: "com.example.""#));
        });
        assert_matches::assert_matches!(serde_json::from_str::<Uri>("7"), Err(_));
    }
}
