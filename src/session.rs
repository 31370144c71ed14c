//! Keys stored in the `tower-sessions` session after a successful login.

pub const USER_ID: &str = "user_id";
pub const USERNAME: &str = "username";
