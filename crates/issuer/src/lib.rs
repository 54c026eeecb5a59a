//! License issuer: redeems one-time license objects against tenant accounts.
//!
//! A [`Reconciler`] reads a license, checks the [`DuplicateRecorder`] and the
//! [`RedemptionLedger`], validates the token locally or against a remote
//! authority, credits the account, records the redemption, notifies the
//! owning namespace and deletes the license.

pub mod account;
pub mod config;
pub mod error;
pub mod ledger;
pub mod notification;
pub mod reconciler;
pub mod recorder;
pub mod server;
pub mod store;
pub mod validator;

pub use account::{Account, AccountStore, CreditApplier, InMemoryAccountStore};
pub use config::IssuerConfig;
pub use error::{IssuerError, Result};
pub use ledger::{FileLedger, MemoryLedger, RedemptionLedger, RedemptionRecord};
pub use notification::{
    LogTransport, MemoryTransport, Notice, NoticeLevel, NotificationEmitter, NotificationTransport,
};
pub use reconciler::{Collaborators, Reconciler, RedemptionContext, RedemptionState};
pub use recorder::DuplicateRecorder;
pub use server::IssuerState;
pub use store::{ConfigObject, InMemoryObjectStore, ObjectStore};
pub use validator::{
    LicenseValidator, LocalValidator, NetworkMode, RemoteValidator, ValidationOutcome,
    ValidationStrategy,
};
