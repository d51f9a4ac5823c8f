//! Type-safe names for streams, partitions and buckets.
//!
//! Names end up in object store keys and in the index tables, so they are
//! restricted to a conservative character set.

use snafu::Snafu;

/// Errors that can occur when parsing resource names.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum ResourceError {
    #[snafu(display(
        "invalid {resource} name: '{id}' - must be at least 1 character long, start with lowercase letter, and contain only lowercase letters, numbers, hyphens, and underscores"
    ))]
    InvalidResourceId { resource: &'static str, id: String },
}

pub type ResourceResult<T, E = ResourceError> = ::std::result::Result<T, E>;

/// Validate a resource id.
///
/// Valid ids must:
/// - Be at least 1 character long
/// - Start with a lowercase letter [a-z]
/// - Contain only lowercase letters, numbers, hyphens (-), and underscores (_)
pub fn validate_resource_id(resource: &'static str, id: &str) -> ResourceResult<()> {
    let invalid = || ResourceError::InvalidResourceId {
        resource,
        id: id.to_string(),
    };

    let mut chars = id.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return Err(invalid()),
    }

    for ch in chars {
        if !ch.is_ascii_lowercase() && !ch.is_ascii_digit() && ch != '-' && ch != '_' {
            return Err(invalid());
        }
    }

    Ok(())
}

/// Generates a validated string newtype.
#[macro_export]
macro_rules! resource_name {
    ($(#[$meta:meta])* $name:ident, $resource:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Creates a new name, validating it.
            pub fn new(id: impl Into<String>) -> $crate::name::ResourceResult<Self> {
                let id = id.into();
                $crate::name::validate_resource_id($resource, &id)?;
                Ok(Self(id))
            }

            /// Creates a new name without returning an error.
            ///
            /// # Panics
            ///
            /// Panics if the name is invalid.
            pub fn new_unchecked(id: impl Into<String>) -> Self {
                let id = id.into();
                $crate::name::validate_resource_id($resource, &id)
                    .expect("resource name must be valid");
                Self(id)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::name::ResourceError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

resource_name!(
    /// Name of a logical ingestion stream (one live buffer per stream).
    StreamName,
    "stream"
);

resource_name!(
    /// Name of the storage partition snapshots are written to, e.g. `daily`.
    PartitionName,
    "partition"
);

resource_name!(
    /// Name of an object store bucket.
    BucketName,
    "bucket"
);
