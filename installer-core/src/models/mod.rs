pub mod requests;
pub mod responses;
pub mod state;
pub mod steps;
