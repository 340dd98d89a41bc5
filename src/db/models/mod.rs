mod category;
mod common;
mod transaction;
mod user;

pub use category::*;
pub use common::*;
pub use transaction::*;
pub use user::*;
