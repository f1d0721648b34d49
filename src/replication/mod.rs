//! Fan-out of master trades onto slave venues
pub mod manager;

pub use manager::{
    ReplicationManager, ReplicationReport, SlaveVenue, VenueOutcome, VenueResult, MIN_SLAVE_BALANCE,
};
