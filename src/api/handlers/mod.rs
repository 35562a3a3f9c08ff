mod admin;
mod files;
mod uploads;

pub use admin::{clean, health, list_files, list_uploads};
pub use files::{add_file, delete_file, download_file};
pub use uploads::{create_upload, delete_upload, get_upload};
