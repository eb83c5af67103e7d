#![allow(clippy::missing_docs_in_private_items)]

pub mod storage;
pub mod utils;
