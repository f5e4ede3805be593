use std::fmt;

/// Identity used to scope every remote query.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub uid: i64,
    pub login: String,
    /// Password or API key sent with each `execute_kw` call.
    pub secret: String,
    pub is_admin: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("uid", &self.uid)
            .field("login", &self.login)
            .field("secret", &"<redacted>")
            .field("is_admin", &self.is_admin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_secret() {
        let session = Session {
            uid: 2,
            login: "admin".to_string(),
            secret: "hunter2".to_string(),
            is_admin: true,
        };
        let rendered = format!("{:?}", session);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("hunter2"));
    }
}
