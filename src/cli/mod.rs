pub mod app;
pub mod hotel;
