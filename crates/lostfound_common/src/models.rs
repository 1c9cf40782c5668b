// --- File: crates/lostfound_common/src/models.rs ---

// Records stored in the `items`, `favorites` and `users` collections, plus the
// principal published by the identity service. Field names on the wire are
// camelCase to match the documents written by other clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Collection holding lost-and-found posts.
pub const ITEMS_COLLECTION: &str = "items";
/// Join collection for user-favorited-item rows.
pub const FAVORITES_COLLECTION: &str = "favorites";
/// Profile documents keyed by identity-service uid.
pub const USERS_COLLECTION: &str = "users";

/// Lifecycle of an item. Only `pending -> found` is ever performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Pending,
    Found,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Found => "found",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The categories offered by the posting form.
///
/// The data layer stores categories as free strings; this enum is only the
/// list the UI offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemCategory {
    Electronics,
    PersonalItems,
    Clothing,
    Books,
    Accessories,
    Other,
}

impl ItemCategory {
    pub const ALL: [ItemCategory; 6] = [
        ItemCategory::Electronics,
        ItemCategory::PersonalItems,
        ItemCategory::Clothing,
        ItemCategory::Books,
        ItemCategory::Accessories,
        ItemCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemCategory::Electronics => "Electronics",
            ItemCategory::PersonalItems => "Personal Items",
            ItemCategory::Clothing => "Clothing",
            ItemCategory::Books => "Books",
            ItemCategory::Accessories => "Accessories",
            ItemCategory::Other => "Other",
        }
    }
}

impl fmt::Display for ItemCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}

/// A lost-and-found post as held in the items mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Document id assigned by the store
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub location: String,
    /// `YYYY-MM-DD`
    #[serde(default)]
    pub date: String,
    /// Remote URL, or a device-local `file://` reference before upload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default)]
    pub status: ItemStatus,
    /// Server-assigned; `None` only while the write is still pending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// The caller-supplied fields of a new item. Attribution, status and the
/// creation timestamp are filled in by the repository.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewItem {
    pub title: String,
    pub description: Option<String>,
    pub location: String,
    pub date: String,
    pub image_uri: Option<String>,
    pub category: Option<String>,
}

impl NewItem {
    pub fn new(title: impl Into<String>, location: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            location: location.into(),
            date: date.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_image_uri(mut self, image_uri: impl Into<String>) -> Self {
        self.image_uri = Some(image_uri.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// A `(userId, itemId)` row of the favorites join collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    pub item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Favorite {
    /// Deterministic document id for the pair, so a favorite is a single
    /// upsertable document instead of a query-then-insert.
    pub fn key(user_id: &str, item_id: &str) -> String {
        format!("{}_{}", user_id, item_id)
    }
}

/// The profile document stored under `users/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_uri: Option<String>,
}

/// A partial profile update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub student_id: Option<String>,
    pub profile_image_uri: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.student_id.is_none()
            && self.profile_image_uri.is_none()
    }

    /// Applies the defined fields to a local copy of the profile.
    pub fn apply_to(&self, user: &mut User) {
        if let Some(name) = &self.name {
            user.name = name.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(phone) = &self.phone {
            user.phone = Some(phone.clone());
        }
        if let Some(student_id) = &self.student_id {
            user.student_id = Some(student_id.clone());
        }
        if let Some(uri) = &self.profile_image_uri {
            user.profile_image_uri = Some(uri.clone());
        }
    }
}

/// The signed-in principal as reported by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_deserializes_camel_case_with_defaults() {
        let item: Item = serde_json::from_value(json!({
            "id": "abc",
            "title": "Lost Wallet",
            "location": "Gym",
            "date": "2025-03-01",
            "userId": "u1",
            "createdAt": "2025-03-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(item.user_id, "u1");
        assert_eq!(item.status, ItemStatus::Pending);
        assert!(item.image_uri.is_none());
        assert!(item.created_at.is_some());
    }

    #[test]
    fn test_item_serialization_omits_absent_optionals() {
        let item = Item {
            id: "abc".into(),
            title: "Keys".into(),
            description: None,
            location: "Library".into(),
            date: "2025-01-02".into(),
            image_uri: None,
            category: None,
            user_id: "u1".into(),
            user_name: None,
            user_email: None,
            status: ItemStatus::Found,
            created_at: None,
        };
        let value = serde_json::to_value(&item).unwrap();
        let obj = value.as_object().unwrap();

        assert!(!obj.contains_key("imageUri"));
        assert!(!obj.contains_key("description"));
        assert_eq!(obj["status"], "found");
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("personal items".parse::<ItemCategory>(), Ok(ItemCategory::PersonalItems));
        assert_eq!(" Books ".parse::<ItemCategory>(), Ok(ItemCategory::Books));
        assert!("Furniture".parse::<ItemCategory>().is_err());
    }

    #[test]
    fn test_profile_update_only_touches_defined_fields() {
        let mut user = User {
            id: "u1".into(),
            name: "Jane".into(),
            email: "jane@u.edu".into(),
            phone: None,
            student_id: Some("S123".into()),
            profile_image_uri: None,
        };
        let update = ProfileUpdate {
            phone: Some("+1 555".into()),
            ..Default::default()
        };
        update.apply_to(&mut user);

        assert_eq!(user.name, "Jane");
        assert_eq!(user.phone.as_deref(), Some("+1 555"));
        assert_eq!(user.student_id.as_deref(), Some("S123"));
        assert!(ProfileUpdate::default().is_empty());
    }

    #[test]
    fn test_favorite_key_is_stable() {
        assert_eq!(Favorite::key("u1", "i9"), "u1_i9");
    }
}
