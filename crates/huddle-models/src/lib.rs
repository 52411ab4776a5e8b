pub mod gateway;
pub mod group;
pub mod id;
pub mod message;
pub mod user;
