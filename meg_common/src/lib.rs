//! Types shared by every crate in the marketplace escrow gateway workspace.
mod amount;
mod helpers;
mod secret;

pub mod op;

pub use amount::{is_valid_currency_code, Amount, AmountConversionError, DEFAULT_CURRENCY_CODE};
pub use helpers::{parse_boolean_flag, parse_env_var};
pub use secret::Secret;
