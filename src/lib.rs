//! Checkpointed token ledger with fractional vote delegation.
//!
//! Every tracked quantity is kept as an append-only history indexed by a
//! logical clock, so balances and voting weight can be queried at any past
//! index:
//!
//! * [`checkpoint`]: generic per-key `(index, value)` histories with binary
//!   search lookup.
//! * [`ledger`]: checkpointed balances and the `credit_debit` mutation hook.
//! * [`delegation`]: bounded per-account lists of `(delegatee, percentage)`.
//! * [`votepower`]: own and received vote power, push-maintained by a cascade
//!   whose cost is bounded by the delegation limit.
//! * [`token`]: the token surface (mint, burn, transfer, delegate), atomic
//!   mutation batches, events and snapshots.
//!
//! Delegation is single-hop: power received from others is never passed on.

pub mod checkpoint;
pub mod config;
pub mod delegation;
pub mod ledger;
pub mod token;
pub mod votepower;

mod error;

pub use config::{ConfigError, LedgerConfig};
pub use error::LedgerError;
pub use token::TokenLedger;

pub type AccountId = String;
pub type Amount = u64;
/// Logical clock value; block height in a chain deployment.
pub type SequenceIndex = u64;
