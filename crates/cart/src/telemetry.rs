//! Sentry helpers.
//!
//! Server-class failures (gateway and storage) are captured as events;
//! validation, auth and stock errors are expected outcomes and are not.
//! Without an initialized Sentry client every call here is a no-op.

use tracing::error;

use crate::error::CartError;

/// Add a breadcrumb describing a sync step.
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

/// Report `err` to Sentry if it is server-class.
///
/// Returns whether an event was captured.
pub fn capture_error(err: &CartError) -> bool {
    if !err.is_server_error() {
        return false;
    }
    let event_id = sentry::capture_error(err);
    error!(error = %err, sentry_event_id = %event_id, "Cart sync error");
    true
}
