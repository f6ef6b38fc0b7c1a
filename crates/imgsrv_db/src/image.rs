//! The catalog record type.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One discovered disk-image file.
///
/// `path` is the absolute scan path and the store identity; it is never
/// serialized to clients. The (driver, category, name) tuple is the natural
/// key a client addresses an image by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    #[serde(skip_serializing)]
    pub path: String,
    pub driver: String,
    pub category: String,
    pub group: String,
    pub name: String,
    pub link: String,
    pub mod_time: DateTime<Utc>,
}

impl Image {
    /// Canonical HTTP path of the record: `/driver[/category]/name`.
    pub fn endpoint(&self) -> String {
        let mut s = String::from("/");
        s.push_str(&self.driver);

        if !self.category.is_empty() {
            s.push('/');
            s.push_str(&self.category);
        }
        s.push('/');
        s.push_str(&self.name);
        s
    }
}
