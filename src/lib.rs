//! `perp-ladder-executor` — a multi-account automated trading executor
//! for a perpetual-futures venue.
//!
//! One [`engine::run::Run`] per [`model::TradeInstruction`]: places three
//! laddered limit orders per account, monitors fills, attaches TP/SL
//! protection per filled tier, watches the resulting position to close,
//! and cancels any tiers still resting once the account is done.

pub mod config;
pub mod engine;
pub mod model;
pub mod signer;
pub mod summary;
pub mod time_anchor;
pub mod venue;

pub use config::Config;
pub use engine::cancel::{CancellationSource, ManualCancellationSource, NeverCancel, StdinCancellationSource};
pub use engine::run::Run;
pub use model::{ClientOrderId, Credentials, Protection, Side, Tier, TradeInstruction};
pub use summary::{AccountSummary, RunSummary};
