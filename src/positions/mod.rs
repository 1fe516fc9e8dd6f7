pub mod ledger;

pub use ledger::{EntryOrder, Ledger};
