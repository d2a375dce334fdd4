pub mod config;
pub mod controller;
pub mod node;
pub mod sampling;
