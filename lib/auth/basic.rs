//! HTTP Basic authentication header construction.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::auth::Credentials;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds an `Authorization: Basic <...>` header value from a username/password pair.
pub fn basic_auth_header(credentials: &Credentials) -> String {
    let raw = format!("{}:{}", credentials.username, credentials.password);
    format!("Basic {}", STANDARD.encode(raw))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_header() {
        let creds = Credentials {
            username: "aladdin".to_string(),
            password: "opensesame".to_string(),
        };
        assert_eq!(basic_auth_header(&creds), "Basic YWxhZGRpbjpvcGVuc2VzYW1l");
    }
}
