pub mod auth;
pub mod file;
pub mod lock;

pub use auth::AuthService;
pub use file::FileService;
pub use lock::FileLocks;
