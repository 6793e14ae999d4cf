//! Test user accounts
//!
//! Users created through the backend API during a test, registered in an
//! [`EphemeralEntityStore`](crate::entity::EphemeralEntityStore) and deleted
//! at teardown with the credentials captured at creation time.

use crate::entity::{DeleteError, EntityDeleter, EphemeralEntity};
use serde::{Deserialize, Serialize};

/// Honorific shown on the signup form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserTitle {
    /// Mr.
    Mr,
    /// Mrs.
    Mrs,
}

/// Data captured by the test rather than returned by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestData {
    /// Session cookie issued at login
    pub session_id: Option<String>,
    /// CSRF token issued at login
    pub csrf: Option<String>,
    /// Password the account was created with
    pub password: Option<String>,
    /// Phone number the account was created with
    pub phone_number: Option<String>,
}

impl TestData {
    /// Set the session id
    #[must_use]
    pub fn with_session_id(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Set the CSRF token
    #[must_use]
    pub fn with_csrf(mut self, csrf: &str) -> Self {
        self.csrf = Some(csrf.to_string());
        self
    }

    /// Set the password
    #[must_use]
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// Set the phone number
    #[must_use]
    pub fn with_phone(mut self, phone: &str) -> Self {
        self.phone_number = Some(phone.to_string());
        self
    }
}

/// A user account on the shop backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Backend id
    pub id: Option<u64>,
    /// Email, the account's stable identity
    pub email: String,
    /// Password as known to the backend
    pub password: Option<String>,
    /// Display name
    pub name: Option<String>,
    /// First name
    pub first_name: Option<String>,
    /// Last name
    pub last_name: Option<String>,
    /// Title
    pub title: Option<UserTitle>,
    /// Company
    pub company: Option<String>,
    /// Country
    pub country: Option<String>,
    /// City
    pub city: Option<String>,
    /// Test-side data
    pub test_data: TestData,
}

impl User {
    /// Create a user identified by `email`
    #[must_use]
    pub fn new(email: &str) -> Self {
        Self {
            email: email.to_string(),
            ..Self::default()
        }
    }

    /// Set the backend id
    #[must_use]
    pub const fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the password
    #[must_use]
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// Set the display name
    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set first and last name
    #[must_use]
    pub fn with_full_name(mut self, first_name: &str, last_name: &str) -> Self {
        self.first_name = Some(first_name.to_string());
        self.last_name = Some(last_name.to_string());
        self
    }

    /// Set the title
    #[must_use]
    pub const fn with_title(mut self, title: UserTitle) -> Self {
        self.title = Some(title);
        self
    }

    /// Set the test data
    #[must_use]
    pub fn with_test_data(mut self, test_data: TestData) -> Self {
        self.test_data = test_data;
        self
    }

    /// Password to authenticate deletion with: the one the test created the
    /// account with, else the backend's
    #[must_use]
    pub fn deletion_password(&self) -> Option<&str> {
        self.test_data
            .password
            .as_deref()
            .or(self.password.as_deref())
    }
}

impl EphemeralEntity for User {
    fn key(&self) -> String {
        self.email.clone()
    }

    fn describe(&self) -> String {
        format!(
            "Email = {}, password = [{}], test_data_password = [{}]",
            self.email,
            self.password.as_deref().unwrap_or_default(),
            self.test_data.password.as_deref().unwrap_or_default()
        )
    }
}

/// Backend account API, as far as teardown needs it
pub trait UserApi: Send + Sync {
    /// Delete the account identified by `email`.
    ///
    /// # Errors
    ///
    /// Returns the backend failure.
    fn delete_user(&self, email: &str, password: &str) -> Result<(), DeleteError>;
}

/// Deletes [`User`]s through a [`UserApi`]
#[derive(Debug, Clone)]
pub struct UserApiDeleter<A>(pub A);

impl<A: UserApi> EntityDeleter<User> for UserApiDeleter<A> {
    fn delete(&self, user: &User) -> Result<(), DeleteError> {
        let password = user
            .deletion_password()
            .ok_or_else(|| format!("no password recorded for {}", user.email))?;
        self.0.delete_user(&user.email, password)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct FakeUserApi {
        deleted: Mutex<Vec<(String, String)>>,
    }

    impl UserApi for FakeUserApi {
        fn delete_user(&self, email: &str, password: &str) -> Result<(), DeleteError> {
            if password == "wrong" {
                return Err("Account not found!".into());
            }
            self.deleted
                .lock()
                .unwrap()
                .push((email.to_string(), password.to_string()));
            Ok(())
        }
    }

    #[test]
    fn test_key_is_email() {
        let user = User::new("buyer@test.com").with_id(7);
        assert_eq!(user.key(), "buyer@test.com");
    }

    #[test]
    fn test_describe_lists_credentials() {
        let user = User::new("buyer@test.com")
            .with_password("backend")
            .with_test_data(TestData::default().with_password("created"));
        assert_eq!(
            user.describe(),
            "Email = buyer@test.com, password = [backend], test_data_password = [created]"
        );
    }

    #[test]
    fn test_deletion_password_prefers_test_data() {
        let user = User::new("a@test.com").with_password("backend");
        assert_eq!(user.deletion_password(), Some("backend"));

        let user = user.with_test_data(TestData::default().with_password("created"));
        assert_eq!(user.deletion_password(), Some("created"));

        assert_eq!(User::new("b@test.com").deletion_password(), None);
    }

    #[test]
    fn test_api_deleter() {
        let deleter = UserApiDeleter(FakeUserApi::default());
        let user = User::new("a@test.com").with_test_data(TestData::default().with_password("pw"));
        deleter.delete(&user).unwrap();
        assert_eq!(
            *deleter.0.deleted.lock().unwrap(),
            vec![("a@test.com".to_string(), "pw".to_string())]
        );

        assert!(deleter.delete(&User::new("nopw@test.com")).is_err());
        assert!(deleter
            .delete(&User::new("x@test.com").with_password("wrong"))
            .is_err());
    }

    #[test]
    fn test_builders() {
        let user = User::new("a@test.com")
            .with_name("Ann")
            .with_full_name("Ann", "Lee")
            .with_title(UserTitle::Mrs)
            .with_test_data(
                TestData::default()
                    .with_session_id("s")
                    .with_csrf("c")
                    .with_phone("+100"),
            );
        assert_eq!(user.first_name.as_deref(), Some("Ann"));
        assert_eq!(user.title, Some(UserTitle::Mrs));
        assert_eq!(user.test_data.csrf.as_deref(), Some("c"));
        assert_eq!(user.test_data.phone_number.as_deref(), Some("+100"));
    }

    #[test]
    fn test_serde() {
        let user = User::new("a@test.com").with_title(UserTitle::Mr);
        let json = serde_json::to_string(&user).unwrap();
        let back: User = serde_json::from_str(&json).unwrap();
        assert_eq!(back, user);
    }
}
