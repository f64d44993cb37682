pub mod calc;
pub mod db;
pub mod ipc;
pub mod logging;
