//! In-process stand-ins for the master and slave venues: a dry-run master for
//! paper trading and scripted venues for tests.

pub mod dry_run;
pub mod mock;

pub use dry_run::{DryRunMaster, MasterCall};
pub use mock::{MockOrder, MockVenue, RecordingNotifier};
