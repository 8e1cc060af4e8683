pub mod toml_loader;

pub use toml_loader::{load_all_session_files, load_session_config};
