//! Shared primitive types used across the engine.

use chrono::NaiveDate;

/// A stable, unique identifier for any entity (person, company, fund, trust).
pub type EntityId = String;

/// Identifier of a relationship edge row.
pub type EdgeId = String;

/// Identifier of a holding position row.
pub type HoldingId = String;

/// Identifier of a UBO record.
pub type RecordId = String;

/// Identifier of a KYC case (owned by case management, referenced here).
pub type CaseId = String;

/// Point-in-time parameter threaded through every query.
pub type AsOf = NaiveDate;

/// Percentages are carried as 0..=100.
pub type Pct = f64;

/// Tolerance used when comparing percentages produced by multiplication.
pub const PCT_EPSILON: f64 = 1e-9;

pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

/// Declares a closed set of string-coded values: the enum, its canonical
/// text form, `Display` and `FromStr`. The text form is what the store
/// persists and what serde emits.
#[macro_export]
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }
    };
}
