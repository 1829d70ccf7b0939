// Delivery channel implementations
pub mod log;
pub mod ntfy;
pub mod telegram;

pub use log::LogNotifier;
pub use ntfy::NtfyNotifier;
pub use telegram::{TelegramClient, TelegramNotifier};
