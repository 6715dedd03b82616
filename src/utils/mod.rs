pub mod logging;
pub mod upload_dir;
