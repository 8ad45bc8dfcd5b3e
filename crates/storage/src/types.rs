//! Identifier types shared by the stores.

/// Defines a newtype wrapper around `i64` with standard trait implementations.
///
/// Each generated type:
/// - Is a transparent wrapper around `i64`
/// - Derives `Copy`, `Clone`, `Debug`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Serializes transparently as the inner integer
/// - Converts from and into `i64`
/// - Displays as the inner value
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<i64>().map(Self)
            }
        }
    };
}

define_id!(
    /// Identifier of a [`Principal`](crate::auth::Principal).
    ///
    /// Allocated by the principal store from a monotonically increasing
    /// counter; never reused.
    ///
    /// # Examples
    ///
    /// ```
    /// use yeoladin_storage::PrincipalId;
    ///
    /// let id = PrincipalId::from(42);
    /// assert_eq!(i64::from(id), 42);
    /// assert_eq!(id.to_string(), "42");
    /// assert_eq!("42".parse::<PrincipalId>().unwrap(), id);
    /// ```
    PrincipalId
);
