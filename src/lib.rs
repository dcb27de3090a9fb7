// Cifra - handwritten digit recognition service
// Library exports

pub mod config;
pub mod data;
pub mod logging;
pub mod models;
pub mod server;
pub mod training;
