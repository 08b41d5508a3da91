mod db;
mod error;
mod models;

pub use db::Ledger;
pub use error::{LedgerError, LedgerResult};
pub use models::ProcessedImage;
