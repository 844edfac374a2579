//! Support for library configuration options

use std::error::Error;
use std::path::Path;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Part of the ProdID string that describes the organization (example of a ProdID string: `-//ABC Corporation//My Product//EN`).
/// Feel free to override it when initing this library.
pub static ORG_NAME: Lazy<Arc<Mutex<String>>> = Lazy::new(|| Arc::new(Mutex::new("My organization".to_string())));

/// Part of the ProdID string that describes the product name (example of a ProdID string: `-//ABC Corporation//My Product//EN`).
/// Feel free to override it when initing this library.
pub static PRODUCT_NAME: Lazy<Arc<Mutex<String>>> = Lazy::new(|| Arc::new(Mutex::new("DavTaskSync".to_string())));

/// Tunables of a sync backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Namespace of the attributes this backend stores on local tasks
    pub namespace: String,
    /// Categories (and local tags) starting with this prefix designate a calendar, not a user tag
    pub calendar_tag_prefix: String,
    /// How many passes the dependency ordering may take before giving up on unresolved parents
    pub max_ordering_passes: usize,
    /// Ask calendars for their changes since the last sync token before listing them
    pub use_sync_tokens: bool,
    /// Period of the scheduler timer, in seconds
    pub period_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            namespace: "caldav".to_string(),
            calendar_tag_prefix: "DAV_".to_string(),
            max_ordering_passes: crate::ordering::DEFAULT_MAX_PASSES,
            use_sync_tokens: false,
            period_secs: 600,
        }
    }
}

impl SyncSettings {
    /// Read settings from a JSON file. Missing keys take their default values
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn Error>> {
        let file = match std::fs::File::open(path) {
            Err(err) => return Err(format!("Unable to open settings file {:?}: {}", path, err).into()),
            Ok(file) => file,
        };
        let settings = serde_json::from_reader(file)?;
        Ok(settings)
    }
}

/// The PRODID written in every calendar resource we build
pub fn prod_id() -> String {
    format!("-//{}//{}//EN", ORG_NAME.lock().unwrap(), PRODUCT_NAME.lock().unwrap())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings() {
        let settings: SyncSettings = serde_json::from_str(r#"{"namespace": "work", "use_sync_tokens": true}"#).unwrap();
        assert_eq!(settings.namespace, "work");
        assert!(settings.use_sync_tokens);
        assert_eq!(settings.calendar_tag_prefix, "DAV_");
        assert_eq!(settings.max_ordering_passes, 500);
    }
}
