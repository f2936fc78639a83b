//! Activities and scope reservation.

mod activity;
mod reservation;

pub use activity::ActivityId;
pub use reservation::{Reservation, ReservationGuard, ReservationState};

#[cfg(test)]
mod concurrency_test;
