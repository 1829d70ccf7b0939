pub mod notifiers;
pub mod traits;

pub use notifiers::{LogNotifier, NtfyNotifier, TelegramClient, TelegramNotifier};
pub use traits::{ChatSender, NotificationResult, PushMessage, PushSender};
