pub mod access;
pub mod chat;
pub mod commands;
pub mod media;
pub mod responses;
pub mod safety;
