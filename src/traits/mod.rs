pub mod execution;
pub mod venue;

pub use execution::MasterExecution;
pub use venue::VenueClient;

#[cfg(test)]
pub use venue::MockVenueClient;
