// --- File: crates/lostfound_config/src/models.rs ---

use serde::{Deserialize, Serialize};

// --- Firebase Config ---
// Holds the client-side project settings. The API key may be injected with
// the "secret_from_env" marker (env var FIREBASE_API_KEY).
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FirebaseConfig {
    pub api_key: Option<String>,
    pub project_id: Option<String>,
    pub storage_bucket: Option<String>,
    /// Overrides for the REST endpoints, mainly for emulators and tests.
    #[serde(default)]
    pub auth_base_url: Option<String>,
    #[serde(default)]
    pub firestore_base_url: Option<String>,
    #[serde(default)]
    pub storage_base_url: Option<String>,
    /// How often a listener re-reads its query, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

// --- Item Config ---
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ItemConfig {
    pub max_image_size: u64, // bytes
    pub max_description_length: usize,
    pub max_title_length: usize,
    pub min_title_length: usize,
    pub min_location_length: usize,
    pub categories: Vec<String>,
}

impl Default for ItemConfig {
    fn default() -> Self {
        Self {
            max_image_size: 5 * 1024 * 1024,
            max_description_length: 1000,
            max_title_length: 100,
            min_title_length: 3,
            min_location_length: 3,
            categories: [
                "Electronics",
                "Personal Items",
                "Clothing",
                "Books",
                "Accessories",
                "Other",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        }
    }
}

// --- User Config ---
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct UserConfig {
    pub min_password_length: usize,
    pub max_name_length: usize,
    pub max_profile_image_size: u64, // bytes
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            min_password_length: 6,
            max_name_length: 50,
            max_profile_image_size: 2 * 1024 * 1024,
        }
    }
}

// --- Blob Storage Config ---
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub items_path: String,
    pub profiles_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            items_path: "items".to_string(),
            profiles_path: "profiles".to_string(),
        }
    }
}

// --- Image Processing Config ---
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ImageConfig {
    /// JPEG quality in the range 0.0..=1.0
    pub quality: f32,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            quality: 0.8,
            max_width: 1200,
            max_height: 1200,
        }
    }
}

// --- Unified App Configuration ---
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    // Without a firebase section only the in-memory backend can be used
    #[serde(default)]
    pub firebase: Option<FirebaseConfig>,

    #[serde(default)]
    pub item: ItemConfig,
    #[serde(default)]
    pub user: UserConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub image: ImageConfig,
}
