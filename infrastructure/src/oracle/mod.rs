//! Decision oracle adapters.

mod offline;
mod openai;

pub use offline::OfflineOracle;
pub use openai::OpenAiCompatibleOracle;
