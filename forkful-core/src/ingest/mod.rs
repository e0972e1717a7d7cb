mod processor;
mod watcher;
mod workers;

pub use processor::FileProcessor;
pub use watcher::DirectoryWatcher;
