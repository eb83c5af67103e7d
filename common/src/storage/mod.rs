pub mod artifacts;
pub mod db;
pub mod types;
