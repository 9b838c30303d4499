//! Persisted key layout.

/// Prefix of per-user membership sets.
pub const USER_SESSIONS_PREFIX: &str = "user_sessions:";

/// Record key: `session:{user_id}:{session_id}`.
#[must_use]
pub fn session(user_id: &str, session_id: &str) -> String {
    format!("session:{user_id}:{session_id}")
}

/// Membership set key: `user_sessions:{user_id}`.
#[must_use]
pub fn user_sessions(user_id: &str) -> String {
    format!("{USER_SESSIONS_PREFIX}{user_id}")
}

/// Memory blob key: `long_term_memory:{user_id}`.
#[must_use]
pub fn long_term_memory(user_id: &str) -> String {
    format!("long_term_memory:{user_id}")
}

/// Execution lease key: `session_lease:{user_id}:{session_id}`.
#[must_use]
pub fn session_lease(user_id: &str, session_id: &str) -> String {
    format!("session_lease:{user_id}:{session_id}")
}

/// Extract the user id from a membership set key.
#[must_use]
pub fn user_from_sessions_key(key: &str) -> Option<&str> {
    key.strip_prefix(USER_SESSIONS_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        assert_eq!(session("u1", "s1"), "session:u1:s1");
        assert_eq!(user_sessions("u1"), "user_sessions:u1");
        assert_eq!(long_term_memory("u1"), "long_term_memory:u1");
        assert_eq!(session_lease("u1", "s1"), "session_lease:u1:s1");
    }

    #[test]
    fn user_id_may_contain_separator() {
        let key = user_sessions("team:alice");
        assert_eq!(user_from_sessions_key(&key), Some("team:alice"));
        assert_eq!(user_from_sessions_key("session:u1:s1"), None);
    }
}
