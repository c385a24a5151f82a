pub mod directory;

pub use directory::TestDirectory;
