pub mod aggregator;
pub mod providers;
pub mod push;
pub mod settings_watch;

pub use aggregator::Aggregator;
pub use push::PushInbox;
pub use settings_watch::SettingsWatcher;
