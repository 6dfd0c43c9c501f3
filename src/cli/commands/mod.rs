mod ask;
mod config;
mod documents;
mod history;
mod ingest;
mod reconcile;
mod status;
mod watch;

pub use ask::AskArgs;
pub use config::ConfigCommand;
pub use documents::{DeleteArgs, DocumentsArgs};
pub use history::HistoryArgs;
pub use ingest::IngestArgs;
pub use reconcile::ReconcileArgs;
pub use watch::WatchArgs;

pub use ask::handle_ask;
pub use config::handle_config;
pub use documents::{handle_delete, handle_documents};
pub use history::handle_history;
pub use ingest::handle_ingest;
pub use reconcile::handle_reconcile;
pub use status::handle_status;
pub use watch::{handle_sync, handle_watch};
