//! User accounts and credential checking.

use mudlark_entity::{EntityError, Record, ValueReader};
use mudlark_schema::{ColumnType, FieldDef, Value};

/// A Mudlark user account.
///
/// Each user may own one or more player characters. Only a hash of the
/// password is ever stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Unique login name.
    pub name: String,
    /// Password hash; never a cleartext password.
    pub password_hash: String,
}

impl Record for User {
    const KIND: &'static str = "user";

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::required("name", ColumnType::Text),
            FieldDef::required("password_hash", ColumnType::Text),
        ]
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::from(self.name.clone()),
            Value::from(self.password_hash.clone()),
        ]
    }

    fn from_values(values: Vec<Value>) -> Result<Self, EntityError> {
        let mut reader = ValueReader::new(Self::KIND, values);
        Ok(Self {
            name: reader.next_text("name")?,
            password_hash: reader.next_text("password_hash")?,
        })
    }
}

/// Checks a password attempt against a stored hash.
///
/// The hashing scheme is supplied by the embedding server, keeping the
/// world layer free of any particular algorithm.
pub trait PasswordVerifier: Send + Sync {
    /// Whether `password` matches `hash`.
    ///
    /// Must return `false` for malformed hashes rather than erroring; a
    /// broken hash in the database must not let anyone in.
    fn verify(&self, hash: &str, password: &str) -> bool;
}
