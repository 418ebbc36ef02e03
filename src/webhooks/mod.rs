pub mod reconciler;

pub use reconciler::{WebhookData, WebhookEvent, WebhookReconciler};
