pub mod client;
pub mod debt;
pub mod error;
pub mod license;
pub mod token;

pub use client::{ClientConfig, LicenseClient};
pub use debt::{DebtRecord, DebtStatus, DebtThresholds, DEBT_PREFIX};
pub use error::{Result, SdkError};
pub use license::{
    AccountView, License, NetworkModeRequest, ObjectKey, RedemptionOutcome, RedemptionReport,
    SubmitLicenseRequest,
};
pub use token::{hash_token, LicensePayload, LicenseSigner, LicenseVerifier};
