pub mod message;
pub mod presence;
