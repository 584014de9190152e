pub mod cli;
pub mod handler;

pub use cli::FetchArgs;
pub use handler::handle;
