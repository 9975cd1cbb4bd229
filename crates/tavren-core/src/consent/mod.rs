//! Consent ledger, validator, restriction checks, and signed exports

pub mod export;
pub mod ledger;
pub mod restriction;
pub mod validator;

pub use export::{ConsentExportService, ExportBundle};
pub use ledger::{
    chain_hash, timestamp_iso, ConsentLedgerService, JournalRecord, LedgerInconsistency,
    LedgerJournal, VerificationReport, GENESIS_HASH,
};
pub use restriction::{find_restriction, RestrictionDetails};
pub use validator::{ConsentDecision, ConsentValidator};
