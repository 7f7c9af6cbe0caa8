//! Macros for defining typed ID types.

/// Macro to define a typed, provider-assigned ID.
///
/// This generates a newtype wrapper around `String` with:
/// - A `KIND` constant used in error messages and logs
/// - `parse()` with strict validation
/// - `Display`, `FromStr`, `AsRef<str>` implementations
/// - `Serialize` and `Deserialize` implementations that validate on input
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_id!(InstanceId, "instance");
///
/// let id: InstanceId = "sb-1".parse()?;
/// assert_eq!(id.as_str(), "sb-1");
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $kind:literal) => {
        /// A typed, provider-assigned ID.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Human-readable resource kind for this ID type.
            pub const KIND: &'static str = $kind;

            /// Parses an ID from a string.
            ///
            /// Rejects empty input, inputs longer than [`MAX_ID_LEN`](crate::MAX_ID_LEN),
            /// whitespace, control characters and `/`, `?`, `#`, which would
            /// otherwise leak into request paths.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }

                if s.len() > $crate::MAX_ID_LEN {
                    return Err($crate::IdError::TooLong {
                        len: s.len(),
                        max: $crate::MAX_ID_LEN,
                    });
                }

                if let Some(ch) = s
                    .chars()
                    .find(|c| c.is_whitespace() || c.is_control() || matches!(c, '/' | '?' | '#'))
                {
                    return Err($crate::IdError::InvalidCharacter {
                        ch,
                        id: s.to_string(),
                    });
                }

                Ok(Self(s.to_string()))
            }

            /// Returns the ID as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the ID, returning the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}
