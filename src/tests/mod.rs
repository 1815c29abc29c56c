pub mod common;

mod config_loading;
