pub mod session;

pub use session::{create_session, delete_session, find_session, SessionUser};
