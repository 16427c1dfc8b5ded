pub mod conversation;
pub mod gateway;
pub mod id;
pub mod message;
pub mod presence;
pub mod user;
