//! API users.

use super::{check_unique, prefix, Entity, Validation};
use crate::core::error::ModelError;
use crate::tracker::index::{self, Index, IndexValue};
use crate::tracker::locks::LockedStores;
use serde::{Deserialize, Serialize};

/// An API user with an scrypt-hashed password.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct User {
    #[serde(flatten)]
    pub validation: Validation,
    /// Login name.
    pub name: String,
    /// scrypt hash in PHC string format; empty until a password is set.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password_hash: String,
}

impl User {
    pub fn key(&self) -> String {
        self.name.clone()
    }

    /// Verify a plaintext password against the stored hash.
    ///
    /// A user with no hash matches nothing.
    pub fn check_password(&self, password: &str) -> bool {
        crate::auth::verify_password(&self.password_hash, password)
    }

    /// Replace the stored hash with one for `password`. The caller is
    /// responsible for saving the user afterwards.
    pub fn set_password(&mut self, password: &str) -> Result<(), ModelError> {
        match crate::auth::hash_password(password) {
            Ok(h) => {
                self.password_hash = h;
                Ok(())
            }
            Err(err) => {
                let mut e = ModelError::validation(prefix::USERS, &self.name);
                e.errorf(format!("Failed to hash password: {err}"));
                Err(e)
            }
        }
    }

    /// Copy with the password hash stripped, for API output.
    pub fn sanitize(&self) -> User {
        let mut u = self.clone();
        u.password_hash = String::new();
        u
    }
}

pub static INDEXES: [Index; 1] = [Index {
    name: "Name",
    kind: "string",
    unique: true,
    key_of: |e| IndexValue::Str(e.key()),
    parse: index::parse_str,
}];

pub(crate) fn before_save(u: &mut User, d: &LockedStores) -> Result<(), ModelError> {
    let mut e = ModelError::validation(prefix::USERS, &u.name);
    if u.name.is_empty() {
        e.errorf("User must have a name");
    }
    check_unique(&mut e, &Entity::User(u.clone()), d.store(prefix::USERS).items());
    if !e.contains_error() {
        u.validation.finish(&e);
    }
    e.or_ok()
}
