pub mod notifier;

pub use notifier::{ChatSender, NotificationResult, PushMessage, PushSender};
