pub mod booking;
pub mod errors;
pub mod scheduling_view;
pub mod status_transition;
pub mod sync_coordinator;

#[cfg(test)]
pub(crate) mod test_support;
