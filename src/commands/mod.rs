pub mod clean;
pub mod events;
pub mod reset;
pub mod sync;
