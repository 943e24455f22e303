//! Validated text primitives shared across the care plan crates.
//!
//! Values of these types can only be built through their constructors, so code holding one can
//! assume the invariant without re-checking it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
    /// The input is not a plausible BCP 47 primary language code
    #[error("Invalid language code: {0}")]
    InvalidLanguage(String),
    /// The input is not a plausible email address
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),
}

/// A string type that guarantees non-empty content.
///
/// The input is trimmed of leading and trailing whitespace during construction. Used for
/// override justifications and change requests, where an empty value must be rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Returns `Err(TextError::Empty)` if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// A lowercase language code such as `en`, `es` or `zh-hant`.
///
/// Accepts a two or three letter primary subtag, optionally followed by `-` separated
/// alphanumeric subtags. Input is trimmed and lowercased, so `ES` and `es` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LanguageCode(String);

impl LanguageCode {
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let normalised = input.as_ref().trim().to_ascii_lowercase();
        let mut parts = normalised.split('-');
        let primary = parts.next().unwrap_or_default();

        let primary_ok =
            (2..=3).contains(&primary.len()) && primary.bytes().all(|b| b.is_ascii_lowercase());
        let rest_ok = parts.all(|p| {
            (1..=8).contains(&p.len()) && p.bytes().all(|b| b.is_ascii_alphanumeric())
        });

        if !primary_ok || !rest_ok {
            return Err(TextError::InvalidLanguage(input.as_ref().to_owned()));
        }
        Ok(Self(normalised))
    }

    /// English, the source language of every care plan.
    pub fn english() -> Self {
        Self("en".to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An email address with the minimum structure needed for matching and delivery.
///
/// Stored lowercased: patients are matched on email within a tenant and `A@x.org` must find the
/// record created for `a@x.org`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn parse(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        let invalid = || TextError::InvalidEmail(trimmed.to_owned());

        let (local, domain) = trimmed.split_once('@').ok_or_else(invalid)?;
        if local.is_empty()
            || domain.is_empty()
            || domain.contains('@')
            || !domain.contains('.')
            || domain.starts_with('.')
            || domain.ends_with('.')
            || trimmed.chars().any(char::is_whitespace)
        {
            return Err(invalid());
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! string_newtype_impls {
    ($name:ident, $ctor:ident) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $name::$ctor(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

string_newtype_impls!(NonEmptyText, new);
string_newtype_impls!(LanguageCode, new);
string_newtype_impls!(EmailAddress, parse);
