pub mod list;
pub mod read;
pub mod utils;

pub use list::list;
pub use read::read;
