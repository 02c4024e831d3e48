pub mod events;
pub mod vehicle;
