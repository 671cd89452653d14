//! Macro for implementing Display and FromStr for status enums
//!
//! Audit actions, incident severities and incident statuses are stored as
//! text by the SQLite audit store and rendered in log fields; this macro
//! keeps both directions in one table.
//!
//! # Example
//!
//! ```rust
//! use phivault_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum ReviewState {
//!     Pending,
//!     Done,
//! }
//!
//! impl_domain_status_conversions!(ReviewState {
//!     Pending => "pending",
//!     Done => "done",
//! });
//!
//! assert_eq!(ReviewState::Done.to_string(), "done");
//! assert_eq!("PENDING".parse::<ReviewState>(), Ok(ReviewState::Pending));
//! ```

/// Implements Display and FromStr traits for status enums
///
/// - Display writes the mapped string
/// - FromStr parses case-insensitively; mapped strings must be lowercase
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl ::std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    $(Self::$variant => write!(f, $str),)+
                }
            }
        }

        impl ::std::str::FromStr for $enum_name {
            type Err = ::std::string::String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => ::std::result::Result::Ok(Self::$variant),)+
                    _ => ::std::result::Result::Err(::std::format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}
