//! 后台任务

pub mod reservation_reaper;

pub use reservation_reaper::{ReservationReaper, SweepReport};
