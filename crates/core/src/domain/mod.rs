pub mod calendar;
pub mod classification;
pub mod conversation;
pub mod message;
pub mod processing;
